//! Deterministic scene names for cells and layer sub-scenes.

use strata_grid::CellCoord;

/// Primary scene name for a cell, e.g. `world_(3,-2)`.
pub fn scene_name(world_key: &str, cell: CellCoord) -> String {
    format!("{world_key}_({},{})", cell.x, cell.y)
}

/// Layer sub-scene name, e.g. `world_(3,-2)_007`.
pub fn layer_scene_name(scene: &str, layer: u32) -> String {
    format!("{scene}_{layer:03}")
}

/// Reverse parse of the `(x,y)` pair embedded in a scene name.
pub fn cell_from_scene_name(name: &str) -> Option<CellCoord> {
    let open = name.find('(')?;
    let close = open + name[open..].find(')')?;
    let inner = &name[open + 1..close];
    let (xs, ys) = inner.split_once(',')?;
    Some(CellCoord::new(
        xs.trim().parse().ok()?,
        ys.trim().parse().ok()?,
    ))
}
