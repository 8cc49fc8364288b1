//
// vestool - Vesicle modeling and subtraction for cryo-EM micrographs
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Point and rectangle structs and operations.
//!

use std::cmp::{min, max};
use std::ops::{Sub, SubAssign};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Point {
    pub x: i32,
    pub y: i32
}

impl Sub for Point {
    type Output = Point;

    fn sub(mut self, other: Point) -> Point {
        self -= other;
        self
    }
}

impl SubAssign for Point {
    fn sub_assign(&mut self, other: Point) {
        *self = Point {
            x: self.x - other.x,
            y: self.y - other.y,
        };
    }
}

impl Point {
    pub fn new(x: i32, y: i32) -> Point { Point{ x, y } }

    pub fn zero() -> Point { Point{ x: 0, y: 0 } }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32
}

impl Rect {
    #[cfg(test)]
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Rect { Rect{ x, y, width, height } }

    pub fn get_pos(&self) -> Point { Point{ x: self.x, y: self.y } }

    pub fn is_empty(&self) -> bool { self.width == 0 || self.height == 0 }

    /// Returns the common part of both rectangles (empty if they do not overlap).
    pub fn intersection(&self, other: &Rect) -> Rect {
        let x0 = max(self.x, other.x);
        let y0 = max(self.y, other.y);
        let x1 = min(self.x + self.width as i32, other.x + other.width as i32);
        let y1 = min(self.y + self.height as i32, other.y + other.height as i32);

        if x1 <= x0 || y1 <= y0 {
            Rect{ x: x0, y: y0, width: 0, height: 0 }
        } else {
            Rect{ x: x0, y: y0, width: (x1 - x0) as u32, height: (y1 - y0) as u32 }
        }
    }
}
