use serde::{Deserialize, Serialize};

/// A 2D point in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate2D {
    pub x: f32,
    pub y: f32,
}

impl Coordinate2D {
    pub const fn new(x: f32, y: f32) -> Self {
        Coordinate2D { x, y }
    }

    pub const fn zero() -> Self {
        Coordinate2D { x: 0.0, y: 0.0 }
    }
}

impl std::ops::Add for Coordinate2D {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Coordinate2D::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::AddAssign for Coordinate2D {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl std::ops::Sub for Coordinate2D {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Coordinate2D::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Mul<f32> for Coordinate2D {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self::Output {
        Coordinate2D::new(self.x * rhs, self.y * rhs)
    }
}

/// An axis-aligned face region: top-left corner plus width and height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        BoundingBox {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Map a point from normalized [0,1] box coordinates into image coordinates.
    pub fn denormalize_point(&self, p: Coordinate2D) -> Coordinate2D {
        Coordinate2D::new(self.x + p.x * self.width, self.y + p.y * self.height)
    }

    /// Map a point from image coordinates into normalized [0,1] box coordinates.
    pub fn normalize_point(&self, p: Coordinate2D) -> Coordinate2D {
        Coordinate2D::new((p.x - self.x) / self.width, (p.y - self.y) / self.height)
    }
}

/// An ordered set of facial landmark points.
///
/// Positions follow the iBUG annotation convention of the underlying model
/// (index 36 = left eye corner, and so on).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    pub points: Vec<Coordinate2D>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Coordinate2D>) -> Self {
        LandmarkSet { points }
    }

    /// A set of `n` points at the origin.
    pub fn zeros(n: usize) -> Self {
        LandmarkSet {
            points: vec![Coordinate2D::zero(); n],
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Accumulate another set's points into this one, pointwise.
    pub fn add_delta(&mut self, delta: &LandmarkSet) {
        debug_assert_eq!(self.points.len(), delta.points.len());
        for (p, d) in self.points.iter_mut().zip(delta.points.iter()) {
            *p += *d;
        }
    }

    /// Flatten to `[x0, y0, x1, y1, ...]`.
    pub fn to_flat_vec(&self) -> Vec<f32> {
        let mut flat = Vec::with_capacity(self.points.len() * 2);
        for p in &self.points {
            flat.push(p.x);
            flat.push(p.y);
        }
        flat
    }

    /// Build a set from `[x0, y0, x1, y1, ...]`.
    pub fn from_flat_vec(flat: &[f32]) -> Self {
        debug_assert!(flat.len() % 2 == 0);
        LandmarkSet {
            points: flat
                .chunks_exact(2)
                .map(|pair| Coordinate2D::new(pair[0], pair[1]))
                .collect(),
        }
    }
}

impl std::ops::Index<usize> for LandmarkSet {
    type Output = Coordinate2D;

    fn index(&self, idx: usize) -> &Self::Output {
        &self.points[idx]
    }
}

impl std::ops::IndexMut<usize> for LandmarkSet {
    fn index_mut(&mut self, idx: usize) -> &mut Self::Output {
        &mut self.points[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_arithmetic() {
        let a = Coordinate2D::new(1.0, 2.0);
        let b = Coordinate2D::new(3.0, 5.0);

        let sum = a + b;
        assert_eq!(sum, Coordinate2D::new(4.0, 7.0));

        let diff = b - a;
        assert_eq!(diff, Coordinate2D::new(2.0, 3.0));

        let scaled = a * 2.0;
        assert_eq!(scaled, Coordinate2D::new(2.0, 4.0));
    }

    #[test]
    fn bounding_box_round_trip() {
        let region = BoundingBox::new(50.0, 20.0, 200.0, 100.0);

        let center = region.denormalize_point(Coordinate2D::new(0.5, 0.5));
        assert_eq!(center, Coordinate2D::new(150.0, 70.0));

        let back = region.normalize_point(center);
        assert!((back.x - 0.5).abs() < 1e-6);
        assert!((back.y - 0.5).abs() < 1e-6);
    }

    #[test]
    fn landmark_set_delta_and_flatten() {
        let mut set = LandmarkSet::new(vec![
            Coordinate2D::new(0.0, 0.0),
            Coordinate2D::new(1.0, 1.0),
        ]);
        let delta = LandmarkSet::new(vec![
            Coordinate2D::new(0.5, -0.5),
            Coordinate2D::new(0.25, 0.25),
        ]);
        set.add_delta(&delta);

        assert_eq!(set.to_flat_vec(), vec![0.5, -0.5, 1.25, 1.25]);

        let rebuilt = LandmarkSet::from_flat_vec(&set.to_flat_vec());
        assert_eq!(rebuilt, set);
    }
}
