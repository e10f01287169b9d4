use crate::pose::Landmark;
use std::ops::Sub;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) struct Point3 {
    x: f32,
    y: f32,
    z: f32,
}

impl Point3 {
    pub(crate) fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub(crate) fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    #[inline]
    pub(crate) fn norm(self) -> f32 {
        self.dot(self).sqrt()
    }

    #[inline]
    fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Sub for Point3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::Output {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
        }
    }
}

impl From<&Landmark> for Point3 {
    fn from(landmark: &Landmark) -> Self {
        Self::new(landmark.x, landmark.y, landmark.z)
    }
}

/// Angle in whole degrees at `vertex` between the rays towards `p1` and `p3`.
///
/// Coincident or non-finite points have no defined angle and yield `0`.
pub(crate) fn angle_between(p1: Point3, vertex: Point3, p3: Point3) -> f32 {
    let v1 = p1 - vertex;
    let v2 = p3 - vertex;
    if !v1.is_finite() || !v2.is_finite() {
        return 0.0;
    }

    let magnitudes = v1.norm() * v2.norm();
    if magnitudes == 0.0 {
        return 0.0;
    }

    let cos = (v1.dot(v2) / magnitudes).clamp(-1.0, 1.0);
    cos.acos().to_degrees().round()
}
