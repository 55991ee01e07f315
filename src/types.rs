use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A 2D point with floating-point coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub const fn zero() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    /// Euclidean distance to another point. Symmetric, non-negative, and
    /// zero exactly when the points coincide.
    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Euclidean norm of the point treated as a vector from the origin.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Unit vector in this point's direction. Undefined for the zero
    /// vector; callers guarantee non-degenerate input.
    pub fn normalized(&self) -> Point {
        let m = self.magnitude();
        Point::new(self.x / m, self.y / m)
    }
}

impl std::ops::Add for Point {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl std::ops::AddAssign for Point {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl std::ops::Sub for Point {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

impl std::ops::Mul<f32> for Point {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self::Output {
        Self {
            x: self.x * rhs,
            y: self.y * rhs,
        }
    }
}

/// A face bounding box defined by top-left corner, width, and height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Convert a point from normalized coordinates [0,1] relative to this
    /// box into image coordinates.
    pub fn denormalize_point(&self, p: Point) -> Point {
        Point::new(self.x + p.x * self.width, self.y + p.y * self.height)
    }
}

/// A simple owned grayscale image buffer.
pub struct GrayImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl GrayImage {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(data.len(), (width * height) as usize);
        Self {
            data,
            width,
            height,
        }
    }

    pub fn from_fn<F>(width: u32, height: u32, f: F) -> Self
    where
        F: Fn(u32, u32) -> u8,
    {
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            data,
            width,
            height,
        }
    }

    /// Grayscale intensity at (x, y). Returns 0 for out-of-bounds pixels.
    pub fn get_pixel(&self, x: i32, y: i32) -> u8 {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return 0;
        }
        self.data[(y as u32 * self.width + x as u32) as usize]
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// One detected face's landmark points under the 68-point annotation
/// scheme. Index positions carry fixed anatomical meaning (see the
/// [`landmark`](crate::landmark) table); the set is immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Landmarks {
    points: [Point; Landmarks::COUNT],
}

impl Landmarks {
    /// Number of points in the annotation scheme.
    pub const COUNT: usize = 68;

    /// Build a landmark set from exactly [`Landmarks::COUNT`] points, in
    /// scheme order.
    pub fn from_points(points: Vec<Point>) -> Result<Self> {
        let points: [Point; Self::COUNT] =
            points
                .try_into()
                .map_err(|v: Vec<Point>| Error::LandmarkCount {
                    expected: Self::COUNT,
                    got: v.len(),
                })?;
        Ok(Self { points })
    }

    /// Build a landmark set by evaluating `f` at every scheme index.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(usize) -> Point,
    {
        let mut points = [Point::zero(); Self::COUNT];
        for (i, p) in points.iter_mut().enumerate() {
            *p = f(i);
        }
        Self { points }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point> {
        self.points.iter()
    }
}

impl std::ops::Index<usize> for Landmarks {
    type Output = Point;

    fn index(&self, idx: usize) -> &Self::Output {
        &self.points[idx]
    }
}
