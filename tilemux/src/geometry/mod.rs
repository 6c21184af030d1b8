//! Geometric primitives for picking and culling.
//!
//! Provides the small set of world-space primitives the pick engine needs:
//! [`Ray`], axis-aligned [`Aabb`], and [`OrientedBox`]. All math is `f64`
//! since pick distances are compared against a 1e-4 epsilon band.

use glam::{DQuat, DVec3};

/// Direction components smaller than this are treated as parallel to a slab.
const PARALLEL_EPSILON: f64 = 1e-12;

// =============================================================================
// Ray
// =============================================================================

/// A ray in world space defined by an origin and a unit direction.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    /// Ray origin (typically the camera position).
    pub origin: DVec3,
    /// Normalized ray direction.
    pub direction: DVec3,
}

impl Ray {
    /// Creates a ray, normalizing the direction.
    pub fn new(origin: DVec3, direction: DVec3) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
        }
    }

    /// Returns the point at parameter `t` along the ray.
    pub fn point_at(&self, t: f64) -> DVec3 {
        self.origin + self.direction * t
    }
}

// =============================================================================
// Axis-aligned bounding box
// =============================================================================

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    /// Creates a box from explicit corners.
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// Creates an empty (inverted) box that any expansion will overwrite.
    pub fn empty() -> Self {
        Self {
            min: DVec3::splat(f64::MAX),
            max: DVec3::splat(f64::MIN),
        }
    }

    /// Returns true if min <= max on every axis.
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    /// Builds the tightest box enclosing all `points`.
    pub fn from_points(points: &[DVec3]) -> Self {
        let mut aabb = Self::empty();
        for p in points {
            aabb.expand_point(*p);
        }
        aabb
    }

    /// Expands the box to include `point`.
    pub fn expand_point(&mut self, point: DVec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Box center.
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// Returns true if the boxes overlap (touching counts).
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Slab-method ray test.
    ///
    /// Returns the entry distance along the ray, or `None` if the ray misses
    /// the box. An origin inside the box yields distance 0.
    pub fn intersects_ray(&self, ray: &Ray) -> Option<f64> {
        let mut t_near = f64::MIN;
        let mut t_far = f64::MAX;

        for axis in 0..3 {
            let origin = ray.origin[axis];
            let dir = ray.direction[axis];
            let (lo, hi) = (self.min[axis], self.max[axis]);

            if dir.abs() < PARALLEL_EPSILON {
                // Ray parallel to this slab
                if origin < lo || origin > hi {
                    return None;
                }
            } else {
                let inv = 1.0 / dir;
                let mut t1 = (lo - origin) * inv;
                let mut t2 = (hi - origin) * inv;
                if t1 > t2 {
                    std::mem::swap(&mut t1, &mut t2);
                }
                t_near = t_near.max(t1);
                t_far = t_far.min(t2);
                if t_near > t_far || t_far < 0.0 {
                    return None;
                }
            }
        }

        Some(t_near.max(0.0))
    }
}

// =============================================================================
// Oriented bounding box
// =============================================================================

/// Oriented bounding box: a center, half-extents, and a rotation.
///
/// Tiles carry one of these because tile geometry is not axis-aligned on a
/// curved world. The ray test rotates the ray into box space and reuses the
/// axis-aligned slab test.
#[derive(Debug, Clone, Copy)]
pub struct OrientedBox {
    /// World-space center.
    pub center: DVec3,
    /// Half-extents along the box's local axes.
    pub extents: DVec3,
    /// Rotation from box space to world space.
    pub orientation: DQuat,
}

impl OrientedBox {
    /// Creates an oriented box.
    pub fn new(center: DVec3, extents: DVec3, orientation: DQuat) -> Self {
        Self {
            center,
            extents,
            orientation,
        }
    }

    /// Creates an axis-aligned oriented box (identity rotation).
    pub fn axis_aligned(center: DVec3, extents: DVec3) -> Self {
        Self::new(center, extents, DQuat::IDENTITY)
    }

    /// Returns a copy translated by `offset` (world-wrap adjustment).
    pub fn translated(&self, offset: DVec3) -> Self {
        Self {
            center: self.center + offset,
            ..*self
        }
    }

    /// Ray test in box space; returns the entry distance or `None` on miss.
    pub fn intersects_ray(&self, ray: &Ray) -> Option<f64> {
        let inv = self.orientation.conjugate();
        let local_ray = Ray {
            origin: inv * (ray.origin - self.center),
            direction: inv * ray.direction,
        };
        let local_box = Aabb::new(-self.extents, self.extents);
        local_box.intersects_ray(&local_ray)
    }

    /// Conservative world-space AABB enclosing this box.
    pub fn world_aabb(&self) -> Aabb {
        let mut aabb = Aabb::empty();
        for sx in [-1.0, 1.0] {
            for sy in [-1.0, 1.0] {
                for sz in [-1.0, 1.0] {
                    let corner = DVec3::new(
                        sx * self.extents.x,
                        sy * self.extents.y,
                        sz * self.extents.z,
                    );
                    aabb.expand_point(self.center + self.orientation * corner);
                }
            }
        }
        aabb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_4;

    fn unit_box_at_origin() -> Aabb {
        Aabb::new(DVec3::splat(-1.0), DVec3::splat(1.0))
    }

    #[test]
    fn test_ray_hits_box_head_on() {
        let ray = Ray::new(DVec3::new(0.0, 0.0, 10.0), DVec3::new(0.0, 0.0, -1.0));
        let dist = unit_box_at_origin().intersects_ray(&ray).unwrap();
        assert!((dist - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_ray_misses_box() {
        let ray = Ray::new(DVec3::new(5.0, 0.0, 10.0), DVec3::new(0.0, 0.0, -1.0));
        assert!(unit_box_at_origin().intersects_ray(&ray).is_none());
    }

    #[test]
    fn test_ray_origin_inside_box_yields_zero() {
        let ray = Ray::new(DVec3::ZERO, DVec3::new(1.0, 0.0, 0.0));
        assert_eq!(unit_box_at_origin().intersects_ray(&ray), Some(0.0));
    }

    #[test]
    fn test_ray_behind_box_misses() {
        // Box entirely behind the ray origin
        let ray = Ray::new(DVec3::new(0.0, 0.0, -10.0), DVec3::new(0.0, 0.0, -1.0));
        assert!(unit_box_at_origin().intersects_ray(&ray).is_none());
    }

    #[test]
    fn test_parallel_ray_inside_slab() {
        let ray = Ray::new(DVec3::new(0.5, 0.5, 10.0), DVec3::new(0.0, 0.0, -1.0));
        assert!(unit_box_at_origin().intersects_ray(&ray).is_some());
    }

    #[test]
    fn test_aabb_overlap() {
        let a = unit_box_at_origin();
        let b = Aabb::new(DVec3::splat(0.5), DVec3::splat(2.0));
        let c = Aabb::new(DVec3::splat(1.5), DVec3::splat(2.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        // Touching faces count as overlap
        let d = Aabb::new(DVec3::new(1.0, -1.0, -1.0), DVec3::new(2.0, 1.0, 1.0));
        assert!(a.intersects(&d));
    }

    #[test]
    fn test_from_points_encloses_all() {
        let points = [
            DVec3::new(1.0, -2.0, 3.0),
            DVec3::new(-4.0, 5.0, -6.0),
            DVec3::new(0.0, 0.0, 0.0),
        ];
        let aabb = Aabb::from_points(&points);
        assert_eq!(aabb.min, DVec3::new(-4.0, -2.0, -6.0));
        assert_eq!(aabb.max, DVec3::new(1.0, 5.0, 3.0));
    }

    #[test]
    fn test_oriented_box_axis_aligned_matches_aabb() {
        let obb = OrientedBox::axis_aligned(DVec3::ZERO, DVec3::splat(1.0));
        let ray = Ray::new(DVec3::new(0.0, 0.0, 10.0), DVec3::new(0.0, 0.0, -1.0));
        let dist = obb.intersects_ray(&ray).unwrap();
        assert!((dist - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_oriented_box_rotation_matters() {
        // A thin slab rotated 45° around Z catches a ray that would miss the
        // unrotated slab.
        let rot = DQuat::from_rotation_z(FRAC_PI_4);
        let obb = OrientedBox::new(DVec3::ZERO, DVec3::new(4.0, 0.1, 1.0), rot);
        let ray = Ray::new(DVec3::new(2.0, 2.0, 10.0), DVec3::new(0.0, 0.0, -1.0));
        assert!(obb.intersects_ray(&ray).is_some());

        let unrotated = OrientedBox::axis_aligned(DVec3::ZERO, DVec3::new(4.0, 0.1, 1.0));
        assert!(unrotated.intersects_ray(&ray).is_none());
    }

    #[test]
    fn test_oriented_box_world_aabb_conservative() {
        let rot = DQuat::from_rotation_z(FRAC_PI_4);
        let obb = OrientedBox::new(DVec3::ZERO, DVec3::new(1.0, 1.0, 1.0), rot);
        let aabb = obb.world_aabb();
        // Rotated cube's AABB grows to sqrt(2) in X/Y
        let expected = 2.0_f64.sqrt();
        assert!((aabb.max.x - expected).abs() < 1e-9);
        assert!((aabb.max.y - expected).abs() < 1e-9);
        assert!((aabb.max.z - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_translated_shifts_center_only() {
        let obb = OrientedBox::axis_aligned(DVec3::ZERO, DVec3::splat(1.0));
        let moved = obb.translated(DVec3::new(10.0, 0.0, 0.0));
        assert_eq!(moved.center, DVec3::new(10.0, 0.0, 0.0));
        assert_eq!(moved.extents, obb.extents);
    }
}
