//! Authoring-time collider merge: collapse fields of unit-cube colliders
//! into a few large boxes via rectangle decomposition.
#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strata_decomp::decompose;
use strata_geom::{Aabb, Vec3};

/// Names that mark an object as a merge output (or otherwise exempt); such
/// sources are skipped so the pass is idempotent and revertible.
pub const EXCEPTION_NAMES: [&str; 2] = ["Exclusions", "Colliders"];

const HALF_THICKNESS: f32 = 0.5;
const EPSILON: f32 = 1e-4;

/// One box collider collected from an authored subtree. `center` is in the
/// subtree's world space; `layer` is the host's physics-layer index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceBox {
    pub center: Vec3,
    pub size: Vec3,
    /// Euler rotation in degrees, carried through on passthrough. Rotated
    /// boxes are never merged.
    #[serde(default)]
    pub rotation: Vec3,
    #[serde(default)]
    pub layer: u32,
}

impl SourceBox {
    /// Mergeable boxes are unrotated unit cubes sitting at integer height.
    fn is_mergeable(&self) -> bool {
        self.size.approx_eq(Vec3::ONE, EPSILON)
            && self.rotation.approx_eq(Vec3::ZERO, EPSILON)
            && (self.center.y - self.center.y.round()).abs() < EPSILON
    }
}

/// An authored subtree handed in by the host: a name, the subtree's world
/// position, and every box collider found beneath it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergeSource {
    pub name: String,
    #[serde(default)]
    pub origin: Vec3,
    pub boxes: Vec<SourceBox>,
}

/// A merged collider: center + half-extent, in the source's local space.
pub type ColliderBox = Aabb;

/// Merged boxes for one (physics layer, height layer) group, in the
/// source's local space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerColliders {
    pub layer: u32,
    pub height: i32,
    pub boxes: Vec<ColliderBox>,
}

/// Output of one merge pass: the merged groups plus every collider that did
/// not qualify for merging, copied through unchanged.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergedColliders {
    /// `{source}_Colliders`; the suffix is what makes reruns skip it.
    pub name: String,
    pub origin: Vec3,
    pub merged: Vec<LayerColliders>,
    pub passthrough: Vec<SourceBox>,
}

/// Snap a world position to its occupancy cell. Cube centers may sit on the
/// integer lattice or half a unit off it; pulling back a quarter unit before
/// rounding lands both conventions on the same cell.
#[inline]
fn occupancy_cell(center: Vec3) -> (i32, i32) {
    (
        (center.x - 0.25).round() as i32,
        (center.z - 0.25).round() as i32,
    )
}

fn rect_to_box(rect: &strata_decomp::Rect, height: i32) -> Aabb {
    let (x0, z0) = rect.min;
    let (x1, z1) = rect.max;
    Aabb {
        center: Vec3::new(
            (x0 + x1) as f32 * 0.5,
            height as f32 - HALF_THICKNESS,
            (z0 + z1) as f32 * 0.5,
        ),
        half_extent: Vec3::new(
            rect.width() as f32 * 0.5,
            HALF_THICKNESS,
            rect.height() as f32 * 0.5,
        ),
    }
}

/// Merge one source subtree. Returns `None` when the source is itself a
/// merge output or carries an exception name.
pub fn merge_colliders(source: &MergeSource) -> Option<MergedColliders> {
    if EXCEPTION_NAMES.iter().any(|e| source.name.contains(e)) {
        return None;
    }

    // Work in the subtree's local space; the host re-anchors the result at
    // the same origin.
    let mut buckets: BTreeMap<(u32, i32), Vec<(i32, i32)>> = BTreeMap::new();
    let mut passthrough = Vec::new();
    for collider in &source.boxes {
        let local = SourceBox {
            center: collider.center - source.origin,
            ..collider.clone()
        };
        if !local.is_mergeable() {
            passthrough.push(local);
            continue;
        }
        let height = local.center.y.round() as i32;
        buckets
            .entry((local.layer, height))
            .or_default()
            .push(occupancy_cell(local.center));
    }

    let mut merged = Vec::new();
    for ((layer, height), cells) in &buckets {
        let boxes: Vec<Aabb> = decompose(cells)
            .iter()
            .map(|rect| rect_to_box(rect, *height))
            .collect();
        merged.push(LayerColliders {
            layer: *layer,
            height: *height,
            boxes,
        });
    }

    let box_count: usize = merged.iter().map(|g| g.boxes.len()).sum();
    log::debug!(
        "{}: {} colliders -> {} merged boxes, {} passthrough",
        source.name,
        source.boxes.len(),
        box_count,
        passthrough.len()
    );

    Some(MergedColliders {
        name: format!("{}_Colliders", source.name),
        origin: source.origin,
        merged,
        passthrough,
    })
}

/// Merge every source in a scene, skipping prior outputs.
pub fn merge_all(sources: &[MergeSource]) -> Vec<MergedColliders> {
    sources.iter().filter_map(merge_colliders).collect()
}
