//! Pick orchestration.
//!
//! [`PickHandler`] owns the full pick sequence for one screen coordinate:
//! screen-space labels first, then visible tiles in near-to-far order with
//! cross-tile dependencies resolved once per query, then free-floating
//! anchors, and finally the listener's ordering pass.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use super::culling::FrustumCuller;
use super::listener::PickListener;
use super::scene::{
    MapTile, PickCamera, PickableObject, RawIntersection, ScreenLabelPicker, TileIndex,
};
use super::PickResult;
use crate::geometry::Ray;

/// Parameters of one pick query.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntersectParams {
    /// Maximum number of results to return; zero means unlimited.
    pub max_result_count: usize,
}

struct TileCandidate {
    tile: Arc<MapTile>,
    distance: f64,
}

/// Entry point of the pick engine.
pub struct PickHandler {
    camera: Arc<dyn PickCamera>,
    tiles: Arc<dyn TileIndex>,
    label_picker: Option<Arc<dyn ScreenLabelPicker>>,
    anchors: Vec<Arc<dyn PickableObject>>,
}

impl PickHandler {
    pub fn new(camera: Arc<dyn PickCamera>, tiles: Arc<dyn TileIndex>) -> Self {
        Self {
            camera,
            tiles,
            label_picker: None,
            anchors: Vec::new(),
        }
    }

    /// Attaches a screen-space label picker.
    pub fn with_label_picker(mut self, picker: Arc<dyn ScreenLabelPicker>) -> Self {
        self.label_picker = Some(picker);
        self
    }

    /// Adds a free-floating object picked on every query, independent of any
    /// tile. Anchors are not subject to early exit: they have no tile bounds
    /// to order against.
    pub fn add_anchor(&mut self, object: Arc<dyn PickableObject>) {
        self.anchors.push(object);
    }

    /// Picks at a CSS-pixel position, returning results ordered per the
    /// listener policy.
    pub fn intersect_map_objects(
        &self,
        x: f64,
        y: f64,
        params: &IntersectParams,
    ) -> Vec<PickResult> {
        let mut listener = PickListener::new(params.max_result_count);

        if let Some(picker) = &self.label_picker {
            picker.pick_labels(x, y, &mut listener);
        }

        let (width, height) = self.camera.viewport();
        let ndc_x = (x / width) * 2.0 - 1.0;
        let ndc_y = -((y / height) * 2.0 - 1.0);
        let ray = self.camera.ray_from_ndc(ndc_x, ndc_y);

        let mut candidates = self.tile_candidates(&ray);
        candidates.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
        });

        // Morton codes of dependency tiles already raycast in this query.
        // Sibling tiles often depend on the same neighbor; without this set
        // its objects would produce duplicate work per query.
        let mut visited_dependencies: HashSet<u64> = HashSet::new();
        let mut scratch: Vec<RawIntersection> = Vec::new();

        for candidate in &candidates {
            // Candidates are near-to-far, so once the cap is filled with
            // results nearer than the next tile's entry point, no later tile
            // can displace anything.
            if listener.done() {
                if let Some(furthest) = listener.furthest_distance() {
                    if furthest < candidate.distance {
                        break;
                    }
                }
            }

            self.raycast_tile(&candidate.tile, &ray, &mut scratch, &mut listener);

            for &code in &candidate.tile.dependencies {
                if !visited_dependencies.insert(code) {
                    continue;
                }
                match self.tiles.tile_by_code(code) {
                    Some(dependency) => {
                        self.raycast_tile(&dependency, &ray, &mut scratch, &mut listener)
                    }
                    None => debug!(morton_code = code, "dependency tile not resident"),
                }
            }
        }

        for anchor in &self.anchors {
            self.collect_object_hits(anchor.as_ref(), None, &ray, &mut scratch, &mut listener);
        }

        listener.finish();
        listener.into_results()
    }

    fn tile_candidates(&self, ray: &Ray) -> Vec<TileCandidate> {
        let culler = self
            .camera
            .frustum_corners()
            .map(|corners| FrustumCuller::from_corners(&corners));

        let mut candidates = Vec::new();
        for tile in self.tiles.visible_tiles() {
            if let Some(culler) = &culler {
                if !culler.intersects(&tile.world_aabb()) {
                    continue;
                }
            }
            if let Some(distance) = tile.offset_bounding_box().intersects_ray(ray) {
                candidates.push(TileCandidate { tile, distance });
            }
        }
        candidates
    }

    fn raycast_tile(
        &self,
        tile: &Arc<MapTile>,
        ray: &Ray,
        scratch: &mut Vec<RawIntersection>,
        listener: &mut PickListener,
    ) {
        for object in &tile.objects {
            self.collect_object_hits(object.as_ref(), Some(tile), ray, scratch, listener);
        }
    }

    fn collect_object_hits(
        &self,
        object: &dyn PickableObject,
        tile: Option<&Arc<MapTile>>,
        ray: &Ray,
        scratch: &mut Vec<RawIntersection>,
        listener: &mut PickListener,
    ) {
        scratch.clear();
        object.raycast(ray, scratch);
        if scratch.is_empty() {
            return;
        }

        let data = object.data();
        let Some(kind) = data.geometry_kind else {
            warn!("pickable object without geometry kind, skipping hits");
            scratch.clear();
            return;
        };

        for hit in scratch.drain(..) {
            let mut result = PickResult {
                object_type: kind.pick_object_type(),
                point: hit.point,
                distance: hit.distance,
                tile_key: tile.map(|t| t.key),
                data_source: tile.map(|t| t.data_source.clone()),
                data_source_order: tile.map(|t| t.data_source_order),
                render_order: data.render_order,
                feature_id: None,
                user_data: None,
            };
            if let (Some(features), Some(index)) = (&data.features, hit.element_index) {
                if let Some(span) = features.span_for_index(index) {
                    result.feature_id = span.feature_id;
                    result.user_data = span.user_data.clone();
                }
            }
            listener.add_result(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::TileKey;
    use crate::geometry::OrientedBox;
    use crate::pick::scene::{FeatureSpan, FeatureTable, GeometryKind, ObjectData, UserData};
    use crate::pick::PickObjectType;
    use glam::DVec3;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    // Orthographic camera looking down -Z from z=100 over a 100x100 viewport
    // mapped to world [-50, 50] in X/Y.
    struct TestCamera {
        corners: Option<[DVec3; 8]>,
    }

    impl TestCamera {
        fn new() -> Self {
            Self { corners: None }
        }

        fn with_frustum() -> Self {
            Self {
                corners: Some([
                    DVec3::new(-50.0, -50.0, 100.0),
                    DVec3::new(50.0, -50.0, 100.0),
                    DVec3::new(50.0, 50.0, 100.0),
                    DVec3::new(-50.0, 50.0, 100.0),
                    DVec3::new(-50.0, -50.0, -100.0),
                    DVec3::new(50.0, -50.0, -100.0),
                    DVec3::new(50.0, 50.0, -100.0),
                    DVec3::new(-50.0, 50.0, -100.0),
                ]),
            }
        }
    }

    impl PickCamera for TestCamera {
        fn viewport(&self) -> (f64, f64) {
            (100.0, 100.0)
        }

        fn ray_from_ndc(&self, ndc_x: f64, ndc_y: f64) -> Ray {
            Ray::new(
                DVec3::new(ndc_x * 50.0, ndc_y * 50.0, 100.0),
                DVec3::new(0.0, 0.0, -1.0),
            )
        }

        fn frustum_corners(&self) -> Option<[DVec3; 8]> {
            self.corners
        }
    }

    /// Counts raycast calls and reports fixed hits.
    struct SpyObject {
        data: ObjectData,
        hits: Vec<RawIntersection>,
        raycasts: AtomicUsize,
    }

    impl SpyObject {
        fn new(kind: Option<GeometryKind>, hits: Vec<RawIntersection>) -> Arc<Self> {
            Arc::new(Self {
                data: ObjectData {
                    geometry_kind: kind,
                    render_order: None,
                    features: None,
                },
                hits,
                raycasts: AtomicUsize::new(0),
            })
        }

        fn with_data(data: ObjectData, hits: Vec<RawIntersection>) -> Arc<Self> {
            Arc::new(Self {
                data,
                hits,
                raycasts: AtomicUsize::new(0),
            })
        }

        fn raycast_count(&self) -> usize {
            self.raycasts.load(AtomicOrdering::SeqCst)
        }
    }

    impl PickableObject for SpyObject {
        fn data(&self) -> &ObjectData {
            &self.data
        }

        fn raycast(&self, _ray: &Ray, out: &mut Vec<RawIntersection>) {
            self.raycasts.fetch_add(1, AtomicOrdering::SeqCst);
            out.extend(self.hits.iter().cloned());
        }
    }

    struct TestTileIndex {
        visible: Vec<Arc<MapTile>>,
        by_code: HashMap<u64, Arc<MapTile>>,
    }

    impl TestTileIndex {
        fn new(visible: Vec<Arc<MapTile>>, resident: Vec<Arc<MapTile>>) -> Arc<Self> {
            let mut by_code = HashMap::new();
            for tile in visible.iter().chain(resident.iter()) {
                by_code.insert(tile.key.morton_code(), Arc::clone(tile));
            }
            Arc::new(Self { visible, by_code })
        }
    }

    impl TileIndex for TestTileIndex {
        fn visible_tiles(&self) -> Vec<Arc<MapTile>> {
            self.visible.clone()
        }

        fn tile_by_code(&self, morton_code: u64) -> Option<Arc<MapTile>> {
            self.by_code.get(&morton_code).cloned()
        }
    }

    fn hit(distance: f64) -> RawIntersection {
        RawIntersection {
            distance,
            point: DVec3::new(0.0, 0.0, 100.0 - distance),
            element_index: None,
        }
    }

    fn tile(
        key: TileKey,
        center_z: f64,
        objects: Vec<Arc<dyn PickableObject>>,
        dependencies: Vec<u64>,
    ) -> Arc<MapTile> {
        Arc::new(MapTile {
            key,
            data_source: "test-source".to_owned(),
            data_source_order: 0,
            bounding_box: OrientedBox::axis_aligned(
                DVec3::new(0.0, 0.0, center_z),
                DVec3::new(10.0, 10.0, 1.0),
            ),
            world_offset_x: 0.0,
            objects,
            dependencies,
        })
    }

    fn key(level: u8, row: u32, col: u32) -> TileKey {
        TileKey::new(level, row, col).unwrap()
    }

    #[test]
    fn test_pick_hits_tile_object() {
        let object = SpyObject::new(Some(GeometryKind::Polygon), vec![hit(20.0)]);
        let tiles = TestTileIndex::new(
            vec![tile(key(3, 1, 2), 80.0, vec![object.clone()], vec![])],
            vec![],
        );
        let handler = PickHandler::new(Arc::new(TestCamera::new()), tiles);

        let results =
            handler.intersect_map_objects(50.0, 50.0, &IntersectParams::default());

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].object_type, PickObjectType::Area);
        assert_eq!(results[0].distance, 20.0);
        assert_eq!(results[0].tile_key, Some(key(3, 1, 2)));
        assert_eq!(results[0].data_source.as_deref(), Some("test-source"));
    }

    #[test]
    fn test_shared_dependency_raycast_once() {
        let dep_object = SpyObject::new(Some(GeometryKind::Line), vec![hit(30.0)]);
        let dep_tile = tile(key(3, 0, 0), 60.0, vec![dep_object.clone()], vec![]);
        let dep_code = dep_tile.key.morton_code();

        // Two visible siblings both borrow geometry from the same neighbor.
        let a = tile(key(3, 1, 1), 80.0, vec![], vec![dep_code]);
        let b = tile(key(3, 1, 2), 70.0, vec![], vec![dep_code]);

        let tiles = TestTileIndex::new(vec![a, b], vec![dep_tile]);
        let handler = PickHandler::new(Arc::new(TestCamera::new()), tiles);

        let results =
            handler.intersect_map_objects(50.0, 50.0, &IntersectParams::default());

        assert_eq!(dep_object.raycast_count(), 1);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_missing_dependency_is_skipped() {
        let object = SpyObject::new(Some(GeometryKind::Polygon), vec![hit(20.0)]);
        let visible = tile(key(3, 1, 1), 80.0, vec![object], vec![0xdead]);
        let tiles = TestTileIndex::new(vec![visible], vec![]);
        let handler = PickHandler::new(Arc::new(TestCamera::new()), tiles);

        let results =
            handler.intersect_map_objects(50.0, 50.0, &IntersectParams::default());
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_early_exit_skips_far_tiles() {
        let near_object = SpyObject::new(Some(GeometryKind::Polygon), vec![hit(15.0)]);
        let far_object = SpyObject::new(Some(GeometryKind::Polygon), vec![hit(80.0)]);

        // Near tile entered at z=90 (distance 9), far tile at z=30 (distance 69).
        let near = tile(key(3, 0, 0), 89.0, vec![near_object.clone()], vec![]);
        let far = tile(key(3, 0, 1), 29.0, vec![far_object.clone()], vec![]);

        let tiles = TestTileIndex::new(vec![far, near], vec![]);
        let handler = PickHandler::new(Arc::new(TestCamera::new()), tiles);

        let params = IntersectParams {
            max_result_count: 1,
        };
        let results = handler.intersect_map_objects(50.0, 50.0, &params);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].distance, 15.0);
        assert_eq!(near_object.raycast_count(), 1);
        assert_eq!(far_object.raycast_count(), 0);
    }

    #[test]
    fn test_anchors_picked_even_after_early_exit() {
        let near_object = SpyObject::new(Some(GeometryKind::Polygon), vec![hit(15.0)]);
        let near = tile(key(3, 0, 0), 89.0, vec![near_object], vec![]);
        let tiles = TestTileIndex::new(vec![near], vec![]);

        let anchor = SpyObject::new(Some(GeometryKind::Object3D), vec![hit(5.0)]);
        let mut handler = PickHandler::new(Arc::new(TestCamera::new()), tiles);
        handler.add_anchor(anchor.clone());

        let params = IntersectParams {
            max_result_count: 1,
        };
        let results = handler.intersect_map_objects(50.0, 50.0, &params);

        assert_eq!(anchor.raycast_count(), 1);
        // The nearer anchor displaces the tile hit under the cap.
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].object_type, PickObjectType::Object3D);
        assert_eq!(results[0].distance, 5.0);
    }

    #[test]
    fn test_object_without_geometry_kind_is_skipped() {
        let object = SpyObject::new(None, vec![hit(20.0)]);
        let tiles = TestTileIndex::new(
            vec![tile(key(3, 0, 0), 80.0, vec![object], vec![])],
            vec![],
        );
        let handler = PickHandler::new(Arc::new(TestCamera::new()), tiles);

        let results =
            handler.intersect_map_objects(50.0, 50.0, &IntersectParams::default());
        assert!(results.is_empty());
    }

    #[test]
    fn test_feature_attribution_from_element_index() {
        let user_data: UserData = Arc::new("bridge");
        let features = Arc::new(FeatureTable::new(vec![
            FeatureSpan {
                start_index: 0,
                feature_id: Some(100),
                user_data: None,
            },
            FeatureSpan {
                start_index: 12,
                feature_id: Some(200),
                user_data: Some(Arc::clone(&user_data)),
            },
        ]));
        let object = SpyObject::with_data(
            ObjectData {
                geometry_kind: Some(GeometryKind::SolidLine),
                render_order: Some(3.0),
                features: Some(features),
            },
            vec![RawIntersection {
                distance: 20.0,
                point: DVec3::new(0.0, 0.0, 80.0),
                element_index: Some(15),
            }],
        );
        let tiles = TestTileIndex::new(
            vec![tile(key(3, 0, 0), 80.0, vec![object], vec![])],
            vec![],
        );
        let handler = PickHandler::new(Arc::new(TestCamera::new()), tiles);

        let results =
            handler.intersect_map_objects(50.0, 50.0, &IntersectParams::default());

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].feature_id, Some(200));
        assert_eq!(results[0].render_order, Some(3.0));
        assert!(results[0].user_data.is_some());
    }

    #[test]
    fn test_frustum_culling_rejects_out_of_view_tile() {
        let object = SpyObject::new(Some(GeometryKind::Polygon), vec![hit(20.0)]);
        let mut out_of_view = MapTile {
            key: key(3, 0, 0),
            data_source: "test-source".to_owned(),
            data_source_order: 0,
            bounding_box: OrientedBox::axis_aligned(
                DVec3::new(500.0, 0.0, 80.0),
                DVec3::new(10.0, 10.0, 1.0),
            ),
            world_offset_x: 0.0,
            objects: vec![object.clone()],
            dependencies: vec![],
        };
        // World-wrap offset moves the box back into view.
        out_of_view.world_offset_x = -500.0;
        let tiles = TestTileIndex::new(vec![Arc::new(out_of_view)], vec![]);
        let handler = PickHandler::new(Arc::new(TestCamera::with_frustum()), tiles);

        let results =
            handler.intersect_map_objects(50.0, 50.0, &IntersectParams::default());
        // Offset box is in view, so the hit lands despite the stored box
        // being far outside the frustum.
        assert_eq!(results.len(), 1);

        let object2 = SpyObject::new(Some(GeometryKind::Polygon), vec![hit(20.0)]);
        let truly_out = Arc::new(MapTile {
            key: key(3, 0, 1),
            data_source: "test-source".to_owned(),
            data_source_order: 0,
            bounding_box: OrientedBox::axis_aligned(
                DVec3::new(500.0, 0.0, 80.0),
                DVec3::new(10.0, 10.0, 1.0),
            ),
            world_offset_x: 0.0,
            objects: vec![object2.clone()],
            dependencies: vec![],
        });
        let tiles = TestTileIndex::new(vec![truly_out], vec![]);
        let handler = PickHandler::new(Arc::new(TestCamera::with_frustum()), tiles);
        let results =
            handler.intersect_map_objects(50.0, 50.0, &IntersectParams::default());
        assert!(results.is_empty());
        assert_eq!(object2.raycast_count(), 0);
    }

    #[test]
    fn test_label_hits_come_first() {
        struct OneLabel;
        impl ScreenLabelPicker for OneLabel {
            fn pick_labels(&self, _x: f64, _y: f64, results: &mut PickListener) {
                results.add_result(PickResult {
                    object_type: PickObjectType::Text,
                    distance: 0.0,
                    data_source: Some("labels".to_owned()),
                    data_source_order: Some(0),
                    feature_id: Some(42),
                    ..Default::default()
                });
            }
        }

        let object = SpyObject::new(Some(GeometryKind::Polygon), vec![hit(20.0)]);
        let tiles = TestTileIndex::new(
            vec![tile(key(3, 0, 0), 80.0, vec![object], vec![])],
            vec![],
        );
        let handler = PickHandler::new(Arc::new(TestCamera::new()), tiles)
            .with_label_picker(Arc::new(OneLabel));

        let results =
            handler.intersect_map_objects(50.0, 50.0, &IntersectParams::default());

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].object_type, PickObjectType::Text);
        assert_eq!(results[0].feature_id, Some(42));
        assert_eq!(results[1].object_type, PickObjectType::Area);
    }

    #[test]
    fn test_css_pixel_to_ndc_mapping() {
        // Picking at the top-left pixel must produce a ray near (-50, 50).
        let object = SpyObject::new(Some(GeometryKind::Point), vec![]);
        struct RecordingCamera {
            seen: parking_lot::Mutex<Option<(f64, f64)>>,
        }
        impl PickCamera for RecordingCamera {
            fn viewport(&self) -> (f64, f64) {
                (200.0, 100.0)
            }
            fn ray_from_ndc(&self, ndc_x: f64, ndc_y: f64) -> Ray {
                *self.seen.lock() = Some((ndc_x, ndc_y));
                Ray::new(DVec3::ZERO, DVec3::new(0.0, 0.0, -1.0))
            }
        }

        let camera = Arc::new(RecordingCamera {
            seen: parking_lot::Mutex::new(None),
        });
        let tiles = TestTileIndex::new(
            vec![tile(key(3, 0, 0), 80.0, vec![object], vec![])],
            vec![],
        );
        let handler = PickHandler::new(camera.clone(), tiles);
        handler.intersect_map_objects(50.0, 25.0, &IntersectParams::default());

        let (ndc_x, ndc_y) = camera.seen.lock().unwrap();
        assert!((ndc_x - (-0.5)).abs() < 1e-12);
        assert!((ndc_y - 0.5).abs() < 1e-12);
    }
}
