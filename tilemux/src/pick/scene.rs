//! Scene collaborators of the pick engine.
//!
//! The pick handler never talks to a renderer directly. It sees the scene
//! through three narrow traits — [`PickCamera`], [`TileIndex`], and
//! [`PickableObject`] — plus the tile and feature-table data carried by
//! [`MapTile`]. Hosts implement these over whatever scene graph they use.

use std::any::Any;
use std::sync::Arc;

use glam::DVec3;

use crate::geo::TileKey;
use crate::geometry::{Aabb, OrientedBox, Ray};

use super::listener::PickListener;
use super::PickObjectType;

/// Opaque per-feature payload attached by the data source.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Kind of geometry a pickable object renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    Point,
    Text,
    TextPath,
    Line,
    SolidLine,
    ExtrudedLine,
    Polygon,
    ExtrudedPolygon,
    Object3D,
}

impl GeometryKind {
    /// Maps the internal geometry kind onto the caller-facing category.
    pub fn pick_object_type(self) -> PickObjectType {
        match self {
            GeometryKind::Point | GeometryKind::Text => PickObjectType::Point,
            GeometryKind::TextPath
            | GeometryKind::Line
            | GeometryKind::SolidLine
            | GeometryKind::ExtrudedLine => PickObjectType::Line,
            GeometryKind::Polygon | GeometryKind::ExtrudedPolygon => PickObjectType::Area,
            GeometryKind::Object3D => PickObjectType::Object3D,
        }
    }
}

/// One feature's slice of a batched geometry buffer.
///
/// Batched objects pack many features into a single buffer; each span records
/// where a feature's elements start. A span runs until the next span's
/// `start_index`.
#[derive(Clone)]
pub struct FeatureSpan {
    /// First element index belonging to this feature.
    pub start_index: u32,
    /// Feature id, when the source data carries one.
    pub feature_id: Option<u64>,
    /// Opaque per-feature user data.
    pub user_data: Option<UserData>,
}

/// Lookup table from element index to owning feature.
pub struct FeatureTable {
    spans: Vec<FeatureSpan>,
}

impl FeatureTable {
    /// Builds a table, sorting spans by start index.
    pub fn new(mut spans: Vec<FeatureSpan>) -> Self {
        spans.sort_by_key(|span| span.start_index);
        Self { spans }
    }

    /// Returns the span owning `element_index`: the last span whose start is
    /// at or before the index. `None` if the index precedes every span.
    pub fn span_for_index(&self, element_index: u32) -> Option<&FeatureSpan> {
        let pos = self
            .spans
            .partition_point(|span| span.start_index <= element_index);
        pos.checked_sub(1).map(|i| &self.spans[i])
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

/// Pick-relevant metadata of one renderable object.
#[derive(Clone, Default)]
pub struct ObjectData {
    /// Geometry kind; objects without one are not attributable and are
    /// skipped during picking.
    pub geometry_kind: Option<GeometryKind>,
    /// Render order within the producing data source.
    pub render_order: Option<f64>,
    /// Feature table for batched geometry.
    pub features: Option<Arc<FeatureTable>>,
}

/// A raw geometric intersection, before feature attribution.
#[derive(Debug, Clone)]
pub struct RawIntersection {
    /// Distance from the ray origin.
    pub distance: f64,
    /// World-space hit point.
    pub point: DVec3,
    /// Element index within the object's geometry buffer, for feature
    /// lookup in batched objects.
    pub element_index: Option<u32>,
}

/// An object the pick engine can raycast.
pub trait PickableObject: Send + Sync {
    /// Pick metadata for this object.
    fn data(&self) -> &ObjectData;

    /// Intersects `ray` with this object's geometry, appending hits to `out`.
    fn raycast(&self, ray: &Ray, out: &mut Vec<RawIntersection>);
}

/// A tile as the pick engine sees it.
pub struct MapTile {
    /// Quadtree address of this tile.
    pub key: TileKey,
    /// Name of the data source that produced the tile.
    pub data_source: String,
    /// Stacking order of that data source.
    pub data_source_order: i32,
    /// Oriented bounding box in unshifted world space.
    pub bounding_box: OrientedBox,
    /// Horizontal world-wrap offset applied at render time.
    pub world_offset_x: f64,
    /// Renderable objects owned by this tile.
    pub objects: Vec<Arc<dyn PickableObject>>,
    /// Morton codes of tiles whose geometry this tile borrows.
    pub dependencies: Vec<u64>,
}

impl MapTile {
    /// Bounding box shifted by the tile's world-wrap offset. Intersection
    /// tests must use this, not the stored box, or picks fail on wrapped
    /// copies of the world.
    pub fn offset_bounding_box(&self) -> OrientedBox {
        self.bounding_box
            .translated(DVec3::new(self.world_offset_x, 0.0, 0.0))
    }

    /// Axis-aligned bounds of the offset box, for frustum pre-filtering.
    pub fn world_aabb(&self) -> Aabb {
        self.offset_bounding_box().world_aabb()
    }
}

/// Access to the currently rendered tile set.
pub trait TileIndex: Send + Sync {
    /// Tiles currently part of the rendered scene.
    fn visible_tiles(&self) -> Vec<Arc<MapTile>>;

    /// Looks up a resident tile by Morton code, visible or not. Dependency
    /// resolution uses this so borrowed geometry is found even when its
    /// owning tile is cached rather than displayed.
    fn tile_by_code(&self, morton_code: u64) -> Option<Arc<MapTile>>;
}

/// Camera view of the host renderer.
pub trait PickCamera: Send + Sync {
    /// Viewport size in CSS pixels, (width, height).
    fn viewport(&self) -> (f64, f64);

    /// World-space ray through the given normalized device coordinate.
    fn ray_from_ndc(&self, ndc_x: f64, ndc_y: f64) -> Ray;

    /// World-space frustum corners (4 near, 4 far), if the camera can
    /// provide them. Returning `None` disables frustum pre-filtering.
    fn frustum_corners(&self) -> Option<[DVec3; 8]> {
        None
    }
}

/// Screen-space label picker.
///
/// Labels are placed in screen space and never intersect a world ray, so
/// they get their own pick path. Implementations report hits with a
/// distance of zero.
pub trait ScreenLabelPicker: Send + Sync {
    /// Collects label hits at the given CSS-pixel position.
    fn pick_labels(&self, x: f64, y: f64, results: &mut PickListener);
}
