//
// vestool - Vesicle modeling and subtraction for cryo-EM micrographs
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! MRC (MRC2014) image file support.
//!
//! Only the first section of a stack is read. Files are written as single-section, mode 2 (32-bit float),
//! little-endian images.
//!

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt, LE};
use crate::image::Image;
use std::io::{BufReader, BufWriter, Read, Write};

const HEADER_SIZE: usize = 1024;

/// Header word indices (0-based, each word is 4 bytes).
mod word {
    pub const NX: usize = 0;
    pub const NY: usize = 1;
    pub const NZ: usize = 2;
    pub const MODE: usize = 3;
    pub const MX: usize = 7;
    pub const XLEN: usize = 10;
    pub const NSYMBT: usize = 23;
    pub const MAP: usize = 52;
    pub const MACHST: usize = 53;
}

#[derive(Debug)]
pub enum MrcError {
    Io(std::io::Error),
    InvalidHeader(String),
    UnsupportedMode(i32)
}

impl std::fmt::Display for MrcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MrcError::Io(e) => write!(f, "I/O error: {}", e),
            MrcError::InvalidHeader(msg) => write!(f, "invalid MRC header: {}", msg),
            MrcError::UnsupportedMode(mode) => write!(f, "unsupported MRC data mode: {}", mode)
        }
    }
}

impl From<std::io::Error> for MrcError {
    fn from(e: std::io::Error) -> MrcError { MrcError::Io(e) }
}

struct Header {
    nx: u32,
    ny: u32,
    mode: i32,
    nsymbt: u32,
    big_endian: bool,
    pixel_size: Option<f64>
}

fn header_i32(buf: &[u8], idx: usize, big_endian: bool) -> i32 {
    let bytes = &buf[4 * idx..4 * idx + 4];
    if big_endian { BigEndian::read_i32(bytes) } else { LittleEndian::read_i32(bytes) }
}

fn header_f32(buf: &[u8], idx: usize, big_endian: bool) -> f32 {
    let bytes = &buf[4 * idx..4 * idx + 4];
    if big_endian { BigEndian::read_f32(bytes) } else { LittleEndian::read_f32(bytes) }
}

fn parse_header(buf: &[u8]) -> Result<Header, MrcError> {
    let stamp = &buf[4 * word::MACHST..4 * word::MACHST + 2];
    let big_endian = match stamp {
        [0x11, 0x11] => true,
        [0x44, 0x44] | [0x44, 0x41] => false,
        // no valid machine stamp (older files); choose the byte order giving a plausible mode
        _ => {
            let mode_le = header_i32(buf, word::MODE, false);
            !(0..=16).contains(&mode_le)
        }
    };

    let nx = header_i32(buf, word::NX, big_endian);
    let ny = header_i32(buf, word::NY, big_endian);
    let nz = header_i32(buf, word::NZ, big_endian);
    if nx <= 0 || ny <= 0 || nz <= 0 {
        return Err(MrcError::InvalidHeader(format!("dimensions {}x{}x{}", nx, ny, nz)));
    }

    let nsymbt = header_i32(buf, word::NSYMBT, big_endian);
    if nsymbt < 0 {
        return Err(MrcError::InvalidHeader(format!("extended header size {}", nsymbt)));
    }

    let mx = header_i32(buf, word::MX, big_endian);
    let xlen = header_f32(buf, word::XLEN, big_endian) as f64;
    let pixel_size = if mx > 0 && xlen > 0.0 { Some(xlen / mx as f64) } else { None };

    Ok(Header{
        nx: nx as u32,
        ny: ny as u32,
        mode: header_i32(buf, word::MODE, big_endian),
        nsymbt: nsymbt as u32,
        big_endian,
        pixel_size
    })
}

fn read_values<B: ByteOrder, R: Read>(reader: &mut R, mode: i32, output: &mut [f64]) -> Result<(), MrcError> {
    match mode {
        0 => for value in output.iter_mut() { *value = reader.read_i8()? as f64; },
        1 => for value in output.iter_mut() { *value = reader.read_i16::<B>()? as f64; },
        2 => for value in output.iter_mut() { *value = reader.read_f32::<B>()? as f64; },
        6 => for value in output.iter_mut() { *value = reader.read_u16::<B>()? as f64; },
        _ => return Err(MrcError::UnsupportedMode(mode))
    }

    Ok(())
}

/// Reads the first section of an MRC stream; returns the image and the pixel size (Å) if the header specifies one.
pub fn read_mrc<R: Read>(reader: &mut R) -> Result<(Image, Option<f64>), MrcError> {
    let mut buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut buf)?;
    let header = parse_header(&buf)?;

    // skip the extended header
    let skipped = std::io::copy(&mut reader.by_ref().take(header.nsymbt as u64), &mut std::io::sink())?;
    if skipped != header.nsymbt as u64 {
        return Err(MrcError::InvalidHeader("truncated extended header".to_string()));
    }

    let num_pixels = header.nx.checked_mul(header.ny).ok_or_else(
        || MrcError::InvalidHeader(format!("image too large: {}x{}", header.nx, header.ny))
    )?;
    let mut pixels = vec![0.0; num_pixels as usize];
    if header.big_endian {
        read_values::<BigEndian, _>(reader, header.mode, &mut pixels)?;
    } else {
        read_values::<LittleEndian, _>(reader, header.mode, &mut pixels)?;
    }

    Ok((Image::new_from_pixels(header.nx, header.ny, pixels), header.pixel_size))
}

pub fn load_mrc(file_name: &str) -> Result<(Image, Option<f64>), MrcError> {
    let file = std::fs::File::open(file_name)?;
    read_mrc(&mut BufReader::new(file))
}

/// Writes `image` as a mode 2 MRC stream.
pub fn write_mrc<W: Write>(image: &Image, pixel_size: f64, writer: &mut W) -> Result<(), MrcError> {
    let (dmin, dmax, dmean) = image.statistics();
    let rms = (image.pixels().iter().map(|p| (p - dmean).powi(2)).sum::<f64>()
        / image.pixels().len().max(1) as f64).sqrt();

    // words 1-4: dimensions and mode
    writer.write_i32::<LE>(image.width() as i32)?;
    writer.write_i32::<LE>(image.height() as i32)?;
    writer.write_i32::<LE>(1)?;
    writer.write_i32::<LE>(2)?;
    // words 5-7: start indices
    writer.write_all(&[0u8; 4 * 3])?;
    // words 8-10: sampling
    writer.write_i32::<LE>(image.width() as i32)?;
    writer.write_i32::<LE>(image.height() as i32)?;
    writer.write_i32::<LE>(1)?;
    // words 11-16: cell dimensions (Å) and angles
    writer.write_f32::<LE>((image.width() as f64 * pixel_size) as f32)?;
    writer.write_f32::<LE>((image.height() as f64 * pixel_size) as f32)?;
    writer.write_f32::<LE>(pixel_size as f32)?;
    for _ in 0..3 { writer.write_f32::<LE>(90.0)?; }
    // words 17-19: axis order
    writer.write_i32::<LE>(1)?;
    writer.write_i32::<LE>(2)?;
    writer.write_i32::<LE>(3)?;
    // words 20-22: statistics
    writer.write_f32::<LE>(dmin as f32)?;
    writer.write_f32::<LE>(dmax as f32)?;
    writer.write_f32::<LE>(dmean as f32)?;
    // words 23-24: space group, extended header size
    writer.write_i32::<LE>(0)?;
    writer.write_i32::<LE>(0)?;
    // we're at word 25 now: skip to the map identifier
    writer.write_all(&[0u8; 4 * (word::MAP - 24)])?;
    writer.write_all(b"MAP ")?;
    // machine stamp: little-endian
    writer.write_all(&[0x44, 0x44, 0x00, 0x00])?;
    writer.write_f32::<LE>(rms as f32)?;
    // number of labels and the labels
    writer.write_i32::<LE>(0)?;
    writer.write_all(&[0u8; 800])?;

    for value in image.pixels() {
        writer.write_f32::<LE>(*value as f32)?;
    }

    writer.flush()?;

    Ok(())
}

pub fn save_mrc(image: &Image, pixel_size: f64, file_name: &str) -> Result<(), MrcError> {
    let file = std::fs::OpenOptions::new().read(false).write(true).create(true).truncate(true).open(file_name)?;
    write_mrc(image, pixel_size, &mut BufWriter::new(file))
}
