//! Bounding accumulation with degenerate-axis recovery.

use glam::DVec3;

/// Axis-aligned box in whatever frame the accumulator was fed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    pub const ZERO: Aabb = Aabb { min: DVec3::ZERO, max: DVec3::ZERO };

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// Running min/max over folded points.
///
/// Starts at +∞/−∞. Axes that never saw a vertex, and axes that folded NaN,
/// resolve to 0 on extraction, so callers always get finite output.
#[derive(Debug, Clone, Copy)]
pub struct BoundingAccumulator {
    min: DVec3,
    max: DVec3,
}

impl Default for BoundingAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundingAccumulator {
    pub fn new() -> Self {
        Self {
            min: DVec3::splat(f64::INFINITY),
            max: DVec3::splat(f64::NEG_INFINITY),
        }
    }

    #[inline]
    pub fn fold(&mut self, p: DVec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// True when no vertex contributed on any axis.
    pub fn is_empty(&self) -> bool {
        self.max.x == f64::NEG_INFINITY
            && self.max.y == f64::NEG_INFINITY
            && self.max.z == f64::NEG_INFINITY
    }

    /// Midpoint per axis; empty or NaN axes resolve to 0.
    pub fn center(&self) -> DVec3 {
        DVec3::new(
            resolve_axis(self.min.x, self.max.x),
            resolve_axis(self.min.y, self.max.y),
            resolve_axis(self.min.z, self.max.z),
        )
    }

    /// Finite box; empty axes collapse to [0, 0].
    pub fn aabb(&self) -> Aabb {
        let mut min = self.min;
        let mut max = self.max;
        for i in 0..3 {
            if max[i] == f64::NEG_INFINITY || !min[i].is_finite() || !max[i].is_finite() {
                min[i] = 0.0;
                max[i] = 0.0;
            }
        }
        Aabb { min, max }
    }
}

#[inline]
fn resolve_axis(min: f64, max: f64) -> f64 {
    if max == f64::NEG_INFINITY {
        return 0.0;
    }
    let mid = (min + max) * 0.5;
    if mid.is_finite() {
        mid
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_accumulator_resolves_to_zero() {
        let acc = BoundingAccumulator::new();
        assert!(acc.is_empty());
        assert_eq!(acc.center(), DVec3::ZERO);
        assert_eq!(acc.aabb(), Aabb::ZERO);
    }

    #[test]
    fn center_is_midpoint() {
        let mut acc = BoundingAccumulator::new();
        acc.fold(DVec3::new(-2.0, 0.0, 10.0));
        acc.fold(DVec3::new(4.0, 2.0, 30.0));
        assert_eq!(acc.center(), DVec3::new(1.0, 1.0, 20.0));
    }

    #[test]
    fn nan_axis_resolves_to_zero() {
        let mut acc = BoundingAccumulator::new();
        acc.fold(DVec3::new(1.0, f64::NAN, 2.0));
        acc.fold(DVec3::new(3.0, f64::NAN, 4.0));
        let c = acc.center();
        assert_eq!(c.x, 2.0);
        assert_eq!(c.y, 0.0);
        assert_eq!(c.z, 3.0);
        assert!(c.is_finite());
    }
}
