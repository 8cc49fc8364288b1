//
// vestool - Vesicle modeling and subtraction for cryo-EM micrographs
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Image data structure, I/O and basic operations.
//!

pub mod mrc;
pub mod point;

pub use mrc::MrcError;
pub use point::{Point, Rect};

/// Single-channel image with `f64` pixels stored row by row (`x` is the column index).
#[derive(Clone, PartialEq)]
pub struct Image {
    width: u32,
    height: u32,
    pixels: Vec<f64>
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Image {}x{}, pixels = {:?}...",
            self.width,
            self.height,
            &self.pixels[..self.pixels.len().min(8)]
        )
    }
}

impl Image {
    /// Creates a zero-filled image.
    pub fn new(width: u32, height: u32) -> Image {
        Image::new_filled(width, height, 0.0)
    }

    pub fn new_filled(width: u32, height: u32, value: f64) -> Image {
        Image{ width, height, pixels: vec![value; (width * height) as usize] }
    }

    pub fn new_from_pixels(width: u32, height: u32, pixels: Vec<f64>) -> Image {
        assert!(pixels.len() == (width * height) as usize);
        Image{ width, height, pixels }
    }

    /// Creates an image whose pixel at (x, y) is `f(x, y)`.
    pub fn from_fn<F: FnMut(u32, u32) -> f64>(width: u32, height: u32, mut f: F) -> Image {
        let mut pixels = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Image{ width, height, pixels }
    }

    pub fn width(&self) -> u32 { self.width }

    pub fn height(&self) -> u32 { self.height }

    pub fn pixels(&self) -> &[f64] { &self.pixels }

    pub fn pixels_mut(&mut self) -> &mut [f64] { &mut self.pixels }

    pub fn line(&self, y: u32) -> &[f64] {
        let start = (y * self.width) as usize;
        &self.pixels[start..start + self.width as usize]
    }

    pub fn line_mut(&mut self, y: u32) -> &mut [f64] {
        let start = (y * self.width) as usize;
        &mut self.pixels[start..start + self.width as usize]
    }

    #[cfg(test)]
    pub fn get(&self, x: u32, y: u32) -> f64 {
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, value: f64) {
        self.pixels[(y * self.width + x) as usize] = value;
    }

    pub fn img_rect(&self) -> Rect {
        Rect{ x: 0, y: 0, width: self.width, height: self.height }
    }

    pub fn mean(&self) -> f64 {
        if self.pixels.is_empty() {
            0.0
        } else {
            self.pixels.iter().sum::<f64>() / self.pixels.len() as f64
        }
    }

    #[cfg(test)]
    pub fn sum_of_squares(&self) -> f64 {
        self.pixels.iter().map(|p| p * p).sum()
    }

    /// Returns (min, max, mean).
    pub fn statistics(&self) -> (f64, f64, f64) {
        let min = self.pixels.iter().cloned().fold(std::f64::INFINITY, f64::min);
        let max = self.pixels.iter().cloned().fold(std::f64::NEG_INFINITY, f64::max);
        (min, max, self.mean())
    }

    pub fn is_finite(&self) -> bool {
        self.pixels.iter().all(|p| p.is_finite())
    }

    /// Multiplies pixels by the corresponding pixels of `other` (must have the same size).
    pub fn multiply_by(&mut self, other: &Image) {
        assert!(self.width == other.width && self.height == other.height);
        for (p, q) in self.pixels.iter_mut().zip(other.pixels.iter()) {
            *p *= q;
        }
    }

    #[cfg(test)]
    pub fn scale_values(&mut self, factor: f64) {
        for p in self.pixels.iter_mut() {
            *p *= factor;
        }
    }

    /// Returns a copy of image's fragment. The fragment boundaries may extend outside of the image.
    ///
    /// The fragment to copy is `width`x`height` pixels and starts at `src_pos`.
    /// Fragment's areas outside of the image are set to `fill`.
    ///
    pub fn fragment_copy(&self, src_pos: &Point, width: u32, height: u32, fill: f64) -> Image {
        let mut dest_img = Image::new_filled(width, height, fill);
        self.copy_into(&mut dest_img, *src_pos, width, height, Point::zero());
        dest_img
    }

    /// Copies (with cropping) a fragment of image to another. There is no scaling.
    ///
    /// The fragment to copy is `width`x`height` pixels and starts at `src_pos` in `&self`
    /// and at `dest_pos` in `dest_img`. Parts of the fragment lying outside of either image are skipped
    /// and the corresponding destination pixels are left unchanged.
    ///
    pub fn copy_into(&self, dest_img: &mut Image, src_pos: Point, width: u32, height: u32, dest_pos: Point) {
        let src_rect = Rect{ x: src_pos.x, y: src_pos.y, width, height }.intersection(&self.img_rect());
        if src_rect.is_empty() { return; }

        // same fragment in destination coordinates
        let offset = dest_pos - src_pos;
        let dest_rect = Rect{
            x: src_rect.x + offset.x,
            y: src_rect.y + offset.y,
            width: src_rect.width,
            height: src_rect.height
        }.intersection(&dest_img.img_rect());
        if dest_rect.is_empty() { return; }

        let src_x = (dest_rect.x - offset.x) as usize;
        let src_y = dest_rect.y - offset.y;
        let len = dest_rect.width as usize;

        for y in 0..dest_rect.height as i32 {
            let src_line = &self.line((src_y + y) as u32)[src_x..src_x + len];
            let dest_x = dest_rect.x as usize;
            dest_img.line_mut((dest_rect.y + y) as u32)[dest_x..dest_x + len].copy_from_slice(src_line);
        }
    }

    /// Returns the image placed in the middle of a `width`x`height` canvas filled with `fill`.
    ///
    /// The image's origin lands at (floor(width/2) - floor(self.width/2), floor(height/2) - floor(self.height/2)),
    /// so the central pixels of both coincide.
    ///
    pub fn centered_in(&self, width: u32, height: u32, fill: f64) -> Image {
        let mut result = Image::new_filled(width, height, fill);
        let pos = Point{
            x: (width / 2) as i32 - (self.width / 2) as i32,
            y: (height / 2) as i32 - (self.height / 2) as i32
        };
        self.copy_into(&mut result, Point::zero(), self.width, self.height, pos);
        result
    }

    /// Returns the image cyclically shifted so that pixel (1, 1) moves to (`x`, `y`) (1-based coordinates).
    ///
    /// Shifting by (1, 1) leaves the image unchanged; values wrap around both axes.
    ///
    pub fn shift_cyclic(&self, x: i64, y: i64) -> Image {
        let w = self.width as i64;
        let h = self.height as i64;
        let dx = (x - 1).rem_euclid(w) as usize;
        let dy = (y - 1).rem_euclid(h) as usize;

        let mut result = Image::new(self.width, self.height);
        for src_y in 0..self.height as usize {
            let dest_y = (src_y + dy) % h as usize;
            let src_line = self.line(src_y as u32);
            let dest_line = result.line_mut(dest_y as u32);
            // dest[dx..] gets the beginning of the source line, dest[..dx] its end
            let split = self.width as usize - dx;
            dest_line[dx..].copy_from_slice(&src_line[..split]);
            dest_line[..dx].copy_from_slice(&src_line[split..]);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(width: u32, height: u32) -> Image {
        Image::from_fn(width, height, |x, y| (y * width + x) as f64)
    }

    #[test]
    fn shift_by_one_is_identity() {
        let img = numbered(5, 4);
        assert_eq!(img, img.shift_cyclic(1, 1));
    }

    #[test]
    fn shift_moves_first_pixel() {
        let img = numbered(5, 4);
        let shifted = img.shift_cyclic(3, 2);
        assert_eq!(0.0, shifted.get(2, 1));
        // wrapped around
        assert_eq!(img.get(4, 3), shifted.get(1, 0));
        assert_eq!(img.get(3, 0), shifted.get(0, 1));
    }

    #[test]
    fn shifts_compose_cyclically() {
        let img = numbered(6, 6);
        let back = img.shift_cyclic(4, 5).shift_cyclic(6 - 4 + 2, 6 - 5 + 2);
        assert_eq!(img, back);
    }

    #[test]
    fn fragment_outside_image_is_filled() {
        let img = numbered(4, 4);
        let fragment = img.fragment_copy(&Point::new(-1, 2), 3, 3, -7.0);
        assert_eq!(-7.0, fragment.get(0, 0));
        assert_eq!(img.get(0, 2), fragment.get(1, 0));
        assert_eq!(img.get(1, 3), fragment.get(2, 1));
        assert_eq!(-7.0, fragment.get(2, 2));
    }

    #[test]
    fn centered_canvas_keeps_central_pixel() {
        let img = numbered(3, 3);
        let padded = img.centered_in(8, 8, 0.0);
        assert_eq!(img.get(1, 1), padded.get(4, 4));
        assert_eq!(img.get(0, 0), padded.get(3, 3));
        assert_eq!(0.0, padded.get(0, 0));
        assert_eq!(img.pixels().iter().sum::<f64>(), padded.pixels().iter().sum::<f64>());
    }
}
