use strata_grid::CellCoord;

/// Priority for loading the cell the observer settled in.
pub const PRIORITY_CURRENT: i32 = 20;
/// Priority for loading the 8 surrounding cells.
pub const PRIORITY_NEIGHBOR: i32 = 5;
/// Priority for unloading cells that left the active ring.
pub const PRIORITY_UNLOAD: i32 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionKind {
    Load,
    Unload,
}

/// One pending unit of streaming work. At most one action exists per cell;
/// enqueuing a newer one supersedes the old (last-writer-wins).
#[derive(Clone, Copy, Debug)]
pub struct StreamAction {
    pub cell: CellCoord,
    pub kind: ActionKind,
    pub priority: i32,
    /// Enqueue order, used as the deterministic FIFO tie-break between
    /// equal-priority actions.
    pub(crate) seq: u64,
}

impl StreamAction {
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }
}
