//! Pick result collection, deduplication, and ordering.

use std::cmp::Ordering;
use std::sync::Arc;

use super::PickResult;

/// Distance tolerance below which two hits count as coincident and the
/// render-order tie-break applies.
pub const DISTANCE_EPSILON: f64 = 1e-4;

/// Accumulates pick results, deduplicating per feature and producing the
/// final ordered list.
///
/// Ordering policy: higher data-source order wins, then smaller distance.
/// When two hits are within [`DISTANCE_EPSILON`] of each other and both
/// carry a render order, the higher render order wins instead; this keeps
/// coplanar decals stable where raw distance is numeric noise.
/// Screen-space hits (distance zero) are regrouped to the front after the
/// sort, preserving their relative order.
pub struct PickListener {
    max_result_count: usize,
    results: Vec<PickResult>,
}

impl PickListener {
    /// Creates a listener. `max_result_count` of zero means unlimited.
    pub fn new(max_result_count: usize) -> Self {
        Self {
            max_result_count,
            results: Vec::new(),
        }
    }

    /// Adds one result, merging it with an existing result for the same
    /// feature: the better of the two (per the ordering policy) survives.
    pub fn add_result(&mut self, result: PickResult) {
        if let Some(existing) = self
            .results
            .iter_mut()
            .find(|r| same_feature(r, &result))
        {
            if compare(&result, existing) == Ordering::Less {
                *existing = result;
            }
            return;
        }
        self.results.push(result);
    }

    /// True once enough distinct features have been collected to satisfy the
    /// result cap. Used by the handler to stop raycasting early.
    pub fn done(&self) -> bool {
        self.max_result_count > 0 && self.results.len() >= self.max_result_count
    }

    /// Largest distance among collected results, if any.
    pub fn furthest_distance(&self) -> Option<f64> {
        self.results
            .iter()
            .map(|r| r.distance)
            .max_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))
    }

    /// Sorts, regroups screen-space hits to the front, and applies the
    /// result cap. Call once, after all sources have contributed.
    pub fn finish(&mut self) {
        self.results.sort_by(compare);

        // Stable partition: zero-distance (screen-space) hits first.
        let all = std::mem::take(&mut self.results);
        let (zeros, rest): (Vec<_>, Vec<_>) = all.into_iter().partition(|r| r.distance == 0.0);
        self.results = zeros;
        self.results.extend(rest);

        if self.max_result_count > 0 {
            self.results.truncate(self.max_result_count);
        }
    }

    /// Collected results. Ordered only after [`finish`](Self::finish).
    pub fn results(&self) -> &[PickResult] {
        &self.results
    }

    /// Consumes the listener, yielding the result list.
    pub fn into_results(self) -> Vec<PickResult> {
        self.results
    }
}

fn compare(a: &PickResult, b: &PickResult) -> Ordering {
    let source_a = a.data_source_order.unwrap_or(0);
    let source_b = b.data_source_order.unwrap_or(0);
    match source_b.cmp(&source_a) {
        Ordering::Equal => {}
        other => return other,
    }

    if (a.distance - b.distance).abs() < DISTANCE_EPSILON {
        if let (Some(render_a), Some(render_b)) = (a.render_order, b.render_order) {
            if render_a != render_b {
                return render_b.partial_cmp(&render_a).unwrap_or(Ordering::Equal);
            }
        }
    }

    a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal)
}

/// Two results describe the same logical feature if they agree on object
/// type, data source, and identity. Identity is the feature id when both
/// have one; with neither id set, identical user data (or none on either
/// side) still counts as the same feature.
fn same_feature(a: &PickResult, b: &PickResult) -> bool {
    if a.object_type != b.object_type || a.data_source != b.data_source {
        return false;
    }
    match (a.feature_id, b.feature_id) {
        (Some(id_a), Some(id_b)) => id_a == id_b,
        (None, None) => match (&a.user_data, &b.user_data) {
            (Some(ud_a), Some(ud_b)) => Arc::ptr_eq(ud_a, ud_b),
            (None, None) => true,
            _ => false,
        },
        _ => false,
    }
}
