//! World-position to cell/quad mapping and neighbor enumeration.
#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use strata_geom::Vec3;

/// Integer coordinate of one streaming cell. Equality and hashing are by the
/// coordinate pair only; `x` runs along world x, `y` along world z.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellCoord {
    pub x: i32,
    pub y: i32,
}

impl CellCoord {
    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

impl From<(i32, i32)> for CellCoord {
    fn from(value: (i32, i32)) -> Self {
        Self::new(value.0, value.1)
    }
}

/// Authoring-time sub-tile coordinate. Quads tile the world at quad size with
/// a half-quad offset so their centers fall inside cells, not on cell edges.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuadCoord {
    pub x: i32,
    pub y: i32,
}

impl QuadCoord {
    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Fixed grid dimensions plus a global world offset. Pure math, no state.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub cell_size: f32,
    pub quad_size: f32,
    pub offset: Vec3,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cell_size: 100.0,
            quad_size: 50.0,
            offset: Vec3::ZERO,
        }
    }
}

impl GridConfig {
    /// Cell containing `pos`: snap to the nearest grid-aligned center after
    /// removing the global offset, then index by cell size.
    #[inline]
    pub fn cell_of(&self, pos: Vec3) -> CellCoord {
        CellCoord {
            x: ((pos.x - self.offset.x) / self.cell_size).round() as i32,
            y: ((pos.z - self.offset.z) / self.cell_size).round() as i32,
        }
    }

    /// World-space center of `cell` (y comes from the global offset).
    #[inline]
    pub fn cell_center(&self, cell: CellCoord) -> Vec3 {
        Vec3::new(
            self.offset.x + cell.x as f32 * self.cell_size,
            self.offset.y,
            self.offset.z + cell.y as f32 * self.cell_size,
        )
    }

    /// Quad containing `pos`. Quad centers sit half a quad off the cell
    /// lattice so quads tile seamlessly without straddling cell centers.
    #[inline]
    pub fn quad_of(&self, pos: Vec3) -> QuadCoord {
        let half = self.quad_size * 0.5;
        QuadCoord {
            x: ((pos.x - self.offset.x - half) / self.quad_size).round() as i32,
            y: ((pos.z - self.offset.z - half) / self.quad_size).round() as i32,
        }
    }

    /// World-space center of `quad`.
    #[inline]
    pub fn quad_center(&self, quad: QuadCoord) -> Vec3 {
        let half = self.quad_size * 0.5;
        Vec3::new(
            self.offset.x + half + quad.x as f32 * self.quad_size,
            self.offset.y,
            self.offset.z + half + quad.y as f32 * self.quad_size,
        )
    }
}

/// The Moore neighborhood of `cell`: all 8 surrounding cells, excluding
/// `cell` itself. No bounds clamping; callers bound the world externally.
pub fn neighbors(cell: CellCoord) -> [CellCoord; 8] {
    [
        cell.offset(-1, -1),
        cell.offset(-1, 0),
        cell.offset(-1, 1),
        cell.offset(0, -1),
        cell.offset(0, 1),
        cell.offset(1, -1),
        cell.offset(1, 0),
        cell.offset(1, 1),
    ]
}
