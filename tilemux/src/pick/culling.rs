//! Frustum pre-filter for pick candidates.

use glam::DVec3;

use crate::geometry::Aabb;

/// Conservative visibility test built from the camera frustum's world-space
/// corner points.
///
/// The eight corners are collapsed into one axis-aligned box, so the test
/// can report false positives near the frustum's slanted planes but never
/// false negatives. That is the right trade for a pre-filter: rejected
/// tiles are definitely invisible, accepted tiles still face the exact
/// ray/OBB test.
pub struct FrustumCuller {
    world_bounds: Aabb,
}

impl FrustumCuller {
    /// Builds a culler from frustum corners (4 near, 4 far).
    pub fn from_corners(corners: &[DVec3; 8]) -> Self {
        Self {
            world_bounds: Aabb::from_points(corners),
        }
    }

    /// True if `bounds` may be inside the frustum.
    pub fn intersects(&self, bounds: &Aabb) -> bool {
        self.world_bounds.intersects(bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_frustum() -> FrustumCuller {
        FrustumCuller::from_corners(&[
            DVec3::new(-1.0, -1.0, -1.0),
            DVec3::new(1.0, -1.0, -1.0),
            DVec3::new(1.0, 1.0, -1.0),
            DVec3::new(-1.0, 1.0, -1.0),
            DVec3::new(-10.0, -10.0, -100.0),
            DVec3::new(10.0, -10.0, -100.0),
            DVec3::new(10.0, 10.0, -100.0),
            DVec3::new(-10.0, 10.0, -100.0),
        ])
    }

    #[test]
    fn test_contained_box_intersects() {
        let culler = unit_frustum();
        let inside = Aabb::from_points(&[
            DVec3::new(-1.0, -1.0, -50.0),
            DVec3::new(1.0, 1.0, -52.0),
        ]);
        assert!(culler.intersects(&inside));
    }

    #[test]
    fn test_straddling_box_intersects() {
        let culler = unit_frustum();
        let straddling = Aabb::from_points(&[
            DVec3::new(9.0, 9.0, -99.0),
            DVec3::new(20.0, 20.0, -120.0),
        ]);
        assert!(culler.intersects(&straddling));
    }

    #[test]
    fn test_disjoint_box_rejected() {
        let culler = unit_frustum();
        let behind = Aabb::from_points(&[
            DVec3::new(-1.0, -1.0, 5.0),
            DVec3::new(1.0, 1.0, 10.0),
        ]);
        assert!(!culler.intersects(&behind));

        let beside = Aabb::from_points(&[
            DVec3::new(50.0, 0.0, -50.0),
            DVec3::new(60.0, 1.0, -52.0),
        ]);
        assert!(!culler.intersects(&beside));
    }
}
