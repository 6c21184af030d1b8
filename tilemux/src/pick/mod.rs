//! Spatial pick engine.
//!
//! Translates a screen coordinate into an ordered list of map-object
//! intersections, bridging several independent geometry sources: rendered
//! tiles, their cross-tile dependencies, user-added anchors, and
//! screen-space labels.
//!
//! ```text
//! (x, y) ──► PickHandler ──► tile OBB candidates ──► object raycasts
//!                │                                        │
//!                └── screen labels ──► PickListener ◄─────┘
//!                                      (dedup, sort, truncate)
//! ```

pub mod culling;
pub mod handler;
pub mod listener;
pub mod scene;

pub use culling::FrustumCuller;
pub use handler::{IntersectParams, PickHandler};
pub use listener::{PickListener, DISTANCE_EPSILON};
pub use scene::{
    FeatureSpan, FeatureTable, GeometryKind, MapTile, ObjectData, PickCamera, PickableObject,
    RawIntersection, ScreenLabelPicker, TileIndex, UserData,
};

use std::fmt;

use glam::DVec3;

use crate::geo::TileKey;

/// Category of a picked object, as exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PickObjectType {
    /// Geometry kind unknown or unmapped.
    #[default]
    Unspecified,
    Point,
    Line,
    Area,
    Text,
    Icon,
    Object3D,
}

/// One intersection attributed to a logical map feature.
#[derive(Clone, Default)]
pub struct PickResult {
    /// Category of the picked object.
    pub object_type: PickObjectType,

    /// World-space hit point.
    pub point: DVec3,

    /// Distance from the ray origin. Zero for screen-space (label) hits.
    pub distance: f64,

    /// Tile the object belongs to, if tile-bound.
    pub tile_key: Option<TileKey>,

    /// Name of the producing data source.
    pub data_source: Option<String>,

    /// Stacking order of the producing data source.
    pub data_source_order: Option<i32>,

    /// Render order of the picked object within its source.
    pub render_order: Option<f64>,

    /// Feature id, when the source data carries one.
    pub feature_id: Option<u64>,

    /// Opaque per-feature user data.
    pub user_data: Option<UserData>,
}

impl fmt::Debug for PickResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PickResult")
            .field("object_type", &self.object_type)
            .field("point", &self.point)
            .field("distance", &self.distance)
            .field("tile_key", &self.tile_key)
            .field("data_source", &self.data_source)
            .field("data_source_order", &self.data_source_order)
            .field("render_order", &self.render_order)
            .field("feature_id", &self.feature_id)
            .field("has_user_data", &self.user_data.is_some())
            .finish()
    }
}
