//
// vestool - Vesicle modeling and subtraction for cryo-EM micrographs
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Utilities: text file I/O.
//!

use cgmath::Vector2;
use crate::vesicle::Vesicle;
use std::io::{BufRead, Write};

#[derive(Debug)]
pub enum TextFileError {
    Io(std::io::Error),
    /// `line` is 1-based.
    Parse{ line: usize, reason: String }
}

impl From<std::io::Error> for TextFileError {
    fn from(err: std::io::Error) -> TextFileError {
        TextFileError::Io(err)
    }
}

impl std::fmt::Display for TextFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextFileError::Io(err) => write!(f, "I/O error: {}", err),
            TextFileError::Parse{ line, reason } => write!(f, "line {}: {}", line, reason)
        }
    }
}

fn open_lines(file_name: &str) -> Result<std::io::Lines<std::io::BufReader<std::fs::File>>, TextFileError> {
    let file = std::fs::OpenOptions::new().read(true).write(false).open(file_name)?;
    Ok(std::io::BufReader::new(file).lines())
}

/// Returns all non-empty lines of the specified file, except those starting with '#'.
pub fn parse_list_file(file_name: &str) -> Result<Vec<String>, TextFileError> {
    parse_list_file_priv(open_lines(file_name)?)
}

/// Implements `parse_list_file`.
fn parse_list_file_priv<B: BufRead>(lines: std::io::Lines<B>) -> Result<Vec<String>, TextFileError> {
    let mut entries = vec![];
    for line in lines {
        let line = line?;
        let trimmed = line.trim();
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            entries.push(trimmed.to_string());
        }
    }
    Ok(entries)
}

/// Reads rows of 4 or 5 whitespace-separated numbers; empty lines are skipped.
fn parse_numeric_rows<B: BufRead>(lines: std::io::Lines<B>) -> Result<Vec<[f64; 4]>, TextFileError> {
    let mut rows = vec![];

    for (i, line) in lines.enumerate() {
        let line = line?;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() { continue; }

        if tokens.len() != 4 && tokens.len() != 5 {
            return Err(TextFileError::Parse{
                line: i + 1,
                reason: format!("expected 4 or 5 values, found {}", tokens.len())
            });
        }

        let mut row = [0.0; 4];
        for (j, token) in tokens.iter().enumerate() {
            let value = token.parse::<f64>().map_err(|_| TextFileError::Parse{
                line: i + 1,
                reason: format!("invalid number: {}", token)
            })?;
            // the 5th column (type) is not used
            if j < 4 { row[j] = value; }
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Reads a vesicle file.
///
/// Each line contains: x y radius amplitude [type]. Coordinates are 1-based pixels, radius is in Å.
///
pub fn read_vesicle_file(file_name: &str) -> Result<Vec<Vesicle>, TextFileError> {
    read_vesicles_priv(open_lines(file_name)?)
}

/// Implements `read_vesicle_file`.
fn read_vesicles_priv<B: BufRead>(lines: std::io::Lines<B>) -> Result<Vec<Vesicle>, TextFileError> {
    Ok(parse_numeric_rows(lines)?.iter().map(|r| Vesicle::new(r[0], r[1], r[2], r[3])).collect())
}

/// Reads positions (1-based pixels) from a particle box file (same layout as a vesicle file).
pub fn read_box_positions(file_name: &str) -> Result<Vec<Vector2<f64>>, TextFileError> {
    Ok(parse_numeric_rows(open_lines(file_name)?)?.iter().map(|r| Vector2{ x: r[0], y: r[1] }).collect())
}

/// Writes vesicles as rows: x y radius amplitude.
pub fn write_vesicle_file(file_name: &str, vesicles: &[Vesicle]) -> Result<(), TextFileError> {
    let file = std::fs::OpenOptions::new().read(false).write(true).create(true).truncate(true).open(file_name)?;
    let mut writer = std::io::BufWriter::new(file);
    write_vesicles_priv(&mut writer, vesicles)?;
    writer.flush()?;
    Ok(())
}

/// Implements `write_vesicle_file`.
fn write_vesicles_priv<W: Write>(writer: &mut W, vesicles: &[Vesicle]) -> Result<(), TextFileError> {
    for v in vesicles {
        writeln!(writer, "{} {} {} {}", v.center.x, v.center.y, v.radius, v.amplitude)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_file_skips_empty_lines_and_comments() {
        let input =
r#"# micrographs
a.mrc

  b.mrc
"#;
        let entries = parse_list_file_priv(input.as_bytes().lines()).unwrap();
        assert_eq!(vec!["a.mrc", "b.mrc"], entries);
    }

    #[test]
    fn given_4_or_5_columns_vesicles_are_read() {
        let input =
r#"100.5 200 150.25 0.012
1 2 30 1e-3 0

3 4 50 0.5
"#;
        let vesicles = read_vesicles_priv(input.as_bytes().lines()).unwrap();
        assert_eq!(vec![
            Vesicle::new(100.5, 200.0, 150.25, 0.012),
            Vesicle::new(1.0, 2.0, 30.0, 1.0e-3),
            Vesicle::new(3.0, 4.0, 50.0, 0.5)
        ], vesicles);
    }

    #[test]
    fn non_finite_values_are_accepted_for_later_filtering() {
        let vesicles = read_vesicles_priv("1 2 NaN inf".as_bytes().lines()).unwrap();
        assert!(!vesicles[0].is_finite());
    }

    #[test]
    fn when_column_count_is_wrong_reading_fails() {
        let result = read_vesicles_priv("1 2 3 4\n1 2 3".as_bytes().lines());
        match result {
            Err(TextFileError::Parse{ line, .. }) => assert_eq!(2, line),
            _ => panic!("expected a parse error")
        }
    }

    #[test]
    fn when_value_is_not_a_number_reading_fails() {
        assert!(read_vesicles_priv("1 2 x 4".as_bytes().lines()).is_err());
    }

    #[test]
    fn written_vesicles_are_read_back() {
        let vesicles = vec![Vesicle::new(12.25, 7.0, 180.5, 0.0125), Vesicle::new(1.0, 2.0, 3.0, -4.0)];
        let mut buffer: Vec<u8> = vec![];
        write_vesicles_priv(&mut buffer, &vesicles).unwrap();

        assert_eq!("12.25 7 180.5 0.0125\n1 2 3 -4\n", String::from_utf8(buffer.clone()).unwrap());
        assert_eq!(vesicles, read_vesicles_priv(buffer.as_slice().lines()).unwrap());
    }
}
