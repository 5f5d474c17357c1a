//! The streaming scheduler: one managed world, one in-flight operation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use strata_geom::Vec3;
use strata_grid::{CellCoord, GridConfig, neighbors};

use crate::action::{
    ActionKind, PRIORITY_CURRENT, PRIORITY_NEIGHBOR, PRIORITY_UNLOAD, StreamAction,
};
use crate::naming;
use crate::source::{SceneError, SceneHandle, SceneLocation, SceneSource, Ticket, TicketPoll};

/// Externally owned boolean gate; the startup sequence waits until every
/// gate reads true before announcing world-ready.
pub type ReadyFlag = Arc<AtomicBool>;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Prefix for scene names, e.g. `world` -> `world_(x,y)`.
    pub world_key: String,
    /// Seconds the observer must dwell in a candidate cell before it becomes
    /// the current cell.
    pub dwell_delay: f32,
    /// Fixed pause after a primary scene load completes.
    pub settle_delay: f32,
    /// Skip the ready-gate wait during startup.
    pub quick_load: bool,
    /// Log cell transitions and queue activity at debug level.
    pub debug: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            world_key: "world".into(),
            dwell_delay: 2.0,
            settle_delay: 0.2,
            quick_load: false,
            debug: false,
        }
    }
}

/// Table entry for a fully loaded cell: the primary scene handle plus the
/// optional layer sub-scene currently attached to it.
#[derive(Debug)]
struct LoadedCell {
    primary: SceneHandle,
    layer: Option<(u32, SceneHandle)>,
}

/// Explicit load progression, replacing the original's goto-driven flow.
enum LoadPhase {
    ResolvePrimary(Ticket<Vec<SceneLocation>>),
    LoadPrimary(Ticket<Result<SceneHandle, SceneError>>),
    Settle { remaining: f32 },
    ResolveLayer { layer: u32, ticket: Ticket<Vec<SceneLocation>> },
    LoadLayer { layer: u32, ticket: Ticket<Result<SceneHandle, SceneError>> },
    Activate(Ticket<Result<(), SceneError>>),
}

enum OpPhase {
    Load(LoadPhase),
    /// Unload in progress; `rest` holds further handles of the same cell
    /// (layer sub-scene) unloaded one after another.
    Unload {
        ticket: Ticket<Result<(), SceneError>>,
        rest: Vec<SceneHandle>,
    },
}

/// The single-slot in-flight operation.
struct InFlight {
    cell: CellCoord,
    phase: OpPhase,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// Waiting for the first observer sample.
    Boot,
    /// Initial cell + neighbors loading; dwell tracking disabled.
    WarmUp,
    Ready,
}

/// Owns the loaded-cell table, the pending action queue, and the in-flight
/// slot for one streamed world. All state is instance-local; the scheduler
/// is driven by [`SceneScheduler::tick`] once per frame.
pub struct SceneScheduler {
    grid: GridConfig,
    cfg: StreamConfig,
    source: Arc<dyn SceneSource>,
    ready_gates: Vec<ReadyFlag>,
    phase: Phase,
    current_cell: Option<CellCoord>,
    next_cell: Option<CellCoord>,
    dwell: f32,
    layer: Option<u32>,
    actions: Vec<StreamAction>,
    next_seq: u64,
    loaded: HashMap<CellCoord, LoadedCell>,
    in_flight: Option<InFlight>,
    /// Handle-bearing tickets of cancelled loads; whatever they deliver is
    /// discarded and unloaded.
    cancelled: Vec<Ticket<Result<SceneHandle, SceneError>>>,
    /// Fire-and-forget unload tickets awaited only for logging.
    detached: Vec<Ticket<Result<(), SceneError>>>,
    world_ready: bool,
}

impl SceneScheduler {
    pub fn new(grid: GridConfig, cfg: StreamConfig, source: Arc<dyn SceneSource>) -> Self {
        Self {
            grid,
            cfg,
            source,
            ready_gates: Vec::new(),
            phase: Phase::Boot,
            current_cell: None,
            next_cell: None,
            dwell: 0.0,
            layer: None,
            actions: Vec::new(),
            next_seq: 0,
            loaded: HashMap::new(),
            in_flight: None,
            cancelled: Vec::new(),
            detached: Vec::new(),
            world_ready: false,
        }
    }

    pub fn with_ready_gates(mut self, gates: Vec<ReadyFlag>) -> Self {
        self.ready_gates = gates;
        self
    }

    /// Externally supplied layer index (e.g. time-of-day). Loaded cells are
    /// re-enqueued so their layer sub-scenes catch up; a replaced layer
    /// handle is unloaded when the new one lands.
    pub fn set_layer(&mut self, layer: u32) {
        if self.layer == Some(layer) {
            return;
        }
        self.layer = Some(layer);
        let cells: Vec<CellCoord> = self.loaded.keys().copied().collect();
        for cell in cells {
            self.enqueue(cell, ActionKind::Load, PRIORITY_NEIGHBOR);
        }
    }

    #[inline]
    pub fn layer(&self) -> Option<u32> {
        self.layer
    }

    #[inline]
    pub fn world_ready(&self) -> bool {
        self.world_ready
    }

    #[inline]
    pub fn current_cell(&self) -> Option<CellCoord> {
        self.current_cell
    }

    #[inline]
    pub fn is_loaded(&self, cell: CellCoord) -> bool {
        self.loaded.contains_key(&cell)
    }

    pub fn loaded_cells(&self) -> impl Iterator<Item = CellCoord> + '_ {
        self.loaded.keys().copied()
    }

    pub fn pending_actions(&self) -> &[StreamAction] {
        &self.actions
    }

    pub fn in_flight_cell(&self) -> Option<CellCoord> {
        self.in_flight.as_ref().map(|op| op.cell)
    }

    /// Advance the scheduler by one tick. `observer` may be absent
    /// transiently; streaming pauses until it returns.
    pub fn tick(&mut self, observer: Option<Vec3>, dt: f32) {
        self.drain_side_channels();
        let Some(pos) = observer else {
            return;
        };
        match self.phase {
            Phase::Boot => {
                let cell = self.grid.cell_of(pos);
                self.current_cell = Some(cell);
                self.next_cell = Some(cell);
                self.dwell = self.cfg.dwell_delay;
                self.request_load(cell);
                self.phase = Phase::WarmUp;
                log::info!("streaming boot at cell ({}, {})", cell.x, cell.y);
            }
            Phase::WarmUp => {
                self.poll_in_flight(dt);
                self.dispatch();
                if self.in_flight.is_none()
                    && self.actions.is_empty()
                    && (self.cfg.quick_load || self.gates_open())
                {
                    self.world_ready = true;
                    self.phase = Phase::Ready;
                    log::info!("world ready: {} cells loaded", self.loaded.len());
                }
            }
            Phase::Ready => {
                self.track_observer(pos, dt);
                self.poll_in_flight(dt);
                self.dispatch();
            }
        }
    }

    /// Ensure `cell` and its neighborhood are scheduled: load `cell` at high
    /// priority if missing, load absent neighbors at medium priority, and
    /// unload loaded cells outside `{cell} ∪ neighbors(cell) ∪ {current}`.
    pub fn request_load(&mut self, cell: CellCoord) {
        if !self.loaded.contains_key(&cell) {
            self.enqueue(cell, ActionKind::Load, PRIORITY_CURRENT);
        }
        let ring = neighbors(cell);
        for n in ring {
            if !self.loaded.contains_key(&n) {
                self.enqueue(n, ActionKind::Load, PRIORITY_NEIGHBOR);
            }
        }
        let current = self.current_cell;
        let to_unload: Vec<CellCoord> = self
            .loaded
            .keys()
            .copied()
            .filter(|c| *c != cell && !ring.contains(c) && Some(*c) != current)
            .collect();
        for c in to_unload {
            self.enqueue(c, ActionKind::Unload, PRIORITY_UNLOAD);
        }
    }

    fn gates_open(&self) -> bool {
        self.ready_gates.iter().all(|g| g.load(Ordering::Relaxed))
    }

    fn track_observer(&mut self, pos: Vec3, dt: f32) {
        let cell = self.grid.cell_of(pos);
        if Some(cell) == self.current_cell {
            self.dwell = self.cfg.dwell_delay;
        }
        if Some(cell) == self.next_cell {
            self.dwell -= dt;
        } else {
            self.next_cell = Some(cell);
            self.dwell = self.cfg.dwell_delay;
        }
        if self.dwell < 0.0 {
            self.dwell = self.cfg.dwell_delay;
            self.current_cell = Some(cell);
            if self.cfg.debug {
                log::debug!("observer settled in cell ({}, {})", cell.x, cell.y);
            }
            self.request_load(cell);
        }
    }

    /// Last-writer-wins: drop any pending action for the cell and cancel an
    /// in-flight operation targeting it before queuing the new intent.
    fn enqueue(&mut self, cell: CellCoord, kind: ActionKind, priority: i32) {
        if self.in_flight.as_ref().is_some_and(|op| op.cell == cell) {
            self.cancel_in_flight();
        }
        self.actions.retain(|a| a.cell != cell);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.actions.push(StreamAction {
            cell,
            kind,
            priority,
            seq,
        });
    }

    fn cancel_in_flight(&mut self) {
        let Some(op) = self.in_flight.take() else {
            return;
        };
        if self.cfg.debug {
            log::debug!("cancelling in-flight op for cell ({}, {})", op.cell.x, op.cell.y);
        }
        match op.phase {
            // A load already issued may still complete externally; park the
            // ticket and unload whatever it delivers.
            OpPhase::Load(LoadPhase::LoadPrimary(ticket))
            | OpPhase::Load(LoadPhase::LoadLayer { ticket, .. }) => {
                self.cancelled.push(ticket);
            }
            // The unload is committed; let it finish detached, along with
            // the cell's remaining handles.
            OpPhase::Unload { ticket, rest } => {
                self.detached.push(ticket);
                for handle in rest {
                    self.detached.push(self.source.unload(handle));
                }
            }
            // Resolution, settling, activation: no handle at stake.
            OpPhase::Load(_) => {}
        }
    }

    fn drain_side_channels(&mut self) {
        let mut i = 0;
        while i < self.cancelled.len() {
            match self.cancelled[i].poll() {
                TicketPoll::Ready(Ok(handle)) => {
                    // Discard-and-unload: the cancelled load completed anyway.
                    self.detached.push(self.source.unload(handle));
                    self.cancelled.swap_remove(i);
                }
                TicketPoll::Ready(Err(_)) | TicketPoll::Closed => {
                    self.cancelled.swap_remove(i);
                }
                TicketPoll::Pending => i += 1,
            }
        }
        let mut i = 0;
        while i < self.detached.len() {
            match self.detached[i].poll() {
                TicketPoll::Ready(Err(e)) => {
                    log::warn!("detached unload failed: {e}");
                    self.detached.swap_remove(i);
                }
                TicketPoll::Ready(Ok(())) | TicketPoll::Closed => {
                    self.detached.swap_remove(i);
                }
                TicketPoll::Pending => i += 1,
            }
        }
    }

    /// Pick the highest-priority pending action (FIFO on ties) and start it.
    fn dispatch(&mut self) {
        if self.in_flight.is_some() || self.actions.is_empty() {
            return;
        }
        let mut best = 0;
        for i in 1..self.actions.len() {
            let (a, b) = (&self.actions[i], &self.actions[best]);
            if a.priority > b.priority || (a.priority == b.priority && a.seq < b.seq) {
                best = i;
            }
        }
        let action = self.actions.swap_remove(best);
        match action.kind {
            ActionKind::Load => self.begin_load(action.cell),
            ActionKind::Unload => self.begin_unload(action.cell),
        }
    }

    fn begin_load(&mut self, cell: CellCoord) {
        let name = naming::scene_name(&self.cfg.world_key, cell);
        match self.loaded.get(&cell) {
            // Primary already loaded; only a missing or outdated layer
            // sub-scene can still need work.
            Some(entry) => {
                let entry_layer = entry.layer.as_ref().map(|(i, _)| *i);
                if let Some(layer) = self.layer
                    && entry_layer != Some(layer)
                {
                    let layer_name = naming::layer_scene_name(&name, layer);
                    self.in_flight = Some(InFlight {
                        cell,
                        phase: OpPhase::Load(LoadPhase::ResolveLayer {
                            layer,
                            ticket: self.source.resolve(&layer_name),
                        }),
                    });
                }
            }
            None => {
                self.in_flight = Some(InFlight {
                    cell,
                    phase: OpPhase::Load(LoadPhase::ResolvePrimary(self.source.resolve(&name))),
                });
            }
        }
    }

    fn begin_unload(&mut self, cell: CellCoord) {
        // Absent cells are a no-op; the slot stays free.
        let Some(entry) = self.loaded.remove(&cell) else {
            return;
        };
        let mut rest = Vec::new();
        if let Some((_, handle)) = entry.layer {
            rest.push(handle);
        }
        self.in_flight = Some(InFlight {
            cell,
            phase: OpPhase::Unload {
                ticket: self.source.unload(entry.primary),
                rest,
            },
        });
    }

    fn poll_in_flight(&mut self, dt: f32) {
        let Some(op) = self.in_flight.take() else {
            return;
        };
        let cell = op.cell;
        let next = match op.phase {
            OpPhase::Load(phase) => self.poll_load(cell, phase, dt),
            OpPhase::Unload { ticket, rest } => self.poll_unload(cell, ticket, rest),
        };
        if let Some(phase) = next {
            self.in_flight = Some(InFlight { cell, phase });
        }
    }

    fn poll_load(&mut self, cell: CellCoord, phase: LoadPhase, dt: f32) -> Option<OpPhase> {
        let name = naming::scene_name(&self.cfg.world_key, cell);
        match phase {
            LoadPhase::ResolvePrimary(mut ticket) => match ticket.poll() {
                TicketPoll::Pending => Some(OpPhase::Load(LoadPhase::ResolvePrimary(ticket))),
                TicketPoll::Closed => {
                    log::warn!("scene source dropped resolve for {name}");
                    None
                }
                TicketPoll::Ready(locations) => {
                    if locations.is_empty() {
                        // Content-absent: this region has no scene.
                        if self.cfg.debug {
                            log::debug!("no content for {name}");
                        }
                        None
                    } else {
                        Some(OpPhase::Load(LoadPhase::LoadPrimary(
                            self.source.load_additive(&name),
                        )))
                    }
                }
            },
            LoadPhase::LoadPrimary(mut ticket) => match ticket.poll() {
                TicketPoll::Pending => Some(OpPhase::Load(LoadPhase::LoadPrimary(ticket))),
                TicketPoll::Closed => {
                    log::warn!("scene source dropped load for {name}");
                    None
                }
                TicketPoll::Ready(Ok(handle)) => {
                    self.loaded.insert(
                        cell,
                        LoadedCell {
                            primary: handle,
                            layer: None,
                        },
                    );
                    Some(OpPhase::Load(LoadPhase::Settle {
                        remaining: self.cfg.settle_delay,
                    }))
                }
                TicketPoll::Ready(Err(e)) => {
                    // Invalid handle: log and treat the cell as unloaded.
                    log::warn!("load failed for {name}: {e}");
                    None
                }
            },
            LoadPhase::Settle { remaining } => {
                let remaining = remaining - dt;
                if remaining > 0.0 {
                    Some(OpPhase::Load(LoadPhase::Settle { remaining }))
                } else {
                    self.after_settle(cell, &name)
                }
            }
            LoadPhase::ResolveLayer { layer, mut ticket } => match ticket.poll() {
                TicketPoll::Pending => {
                    Some(OpPhase::Load(LoadPhase::ResolveLayer { layer, ticket }))
                }
                TicketPoll::Closed => {
                    log::warn!("scene source dropped layer resolve for {name}");
                    self.begin_activate(cell)
                }
                TicketPoll::Ready(locations) => {
                    if locations.is_empty() {
                        // No layer content for this cell; not an error.
                        self.begin_activate(cell)
                    } else {
                        let layer_name = naming::layer_scene_name(&name, layer);
                        Some(OpPhase::Load(LoadPhase::LoadLayer {
                            layer,
                            ticket: self.source.load_additive(&layer_name),
                        }))
                    }
                }
            },
            LoadPhase::LoadLayer { layer, mut ticket } => match ticket.poll() {
                TicketPoll::Pending => Some(OpPhase::Load(LoadPhase::LoadLayer { layer, ticket })),
                TicketPoll::Closed => {
                    log::warn!("scene source dropped layer load for {name}");
                    self.begin_activate(cell)
                }
                TicketPoll::Ready(Ok(handle)) => {
                    if let Some(entry) = self.loaded.get_mut(&cell) {
                        if let Some((_, old)) = entry.layer.replace((layer, handle)) {
                            self.detached.push(self.source.unload(old));
                        }
                        self.begin_activate(cell)
                    } else {
                        // Cell left the table mid-load; don't leak the scene.
                        self.detached.push(self.source.unload(handle));
                        None
                    }
                }
                TicketPoll::Ready(Err(e)) => {
                    log::warn!("layer load failed for {name}: {e}");
                    self.begin_activate(cell)
                }
            },
            LoadPhase::Activate(mut ticket) => match ticket.poll() {
                TicketPoll::Pending => Some(OpPhase::Load(LoadPhase::Activate(ticket))),
                TicketPoll::Closed => {
                    log::warn!("scene source dropped activation for {name}");
                    None
                }
                TicketPoll::Ready(Ok(())) => None,
                TicketPoll::Ready(Err(e)) => {
                    // Fatal to this cell only: unload whatever was registered.
                    log::error!("activation failed for {name}: {e}");
                    if let Some(entry) = self.loaded.remove(&cell) {
                        self.detached.push(self.source.unload(entry.primary));
                        if let Some((_, handle)) = entry.layer {
                            self.detached.push(self.source.unload(handle));
                        }
                    }
                    None
                }
            },
        }
    }

    fn after_settle(&mut self, cell: CellCoord, name: &str) -> Option<OpPhase> {
        let entry_layer = self
            .loaded
            .get(&cell)
            .and_then(|e| e.layer.as_ref().map(|(i, _)| *i));
        match self.layer {
            Some(layer) if entry_layer != Some(layer) => {
                let layer_name = naming::layer_scene_name(name, layer);
                Some(OpPhase::Load(LoadPhase::ResolveLayer {
                    layer,
                    ticket: self.source.resolve(&layer_name),
                }))
            }
            _ => self.begin_activate(cell),
        }
    }

    fn begin_activate(&mut self, cell: CellCoord) -> Option<OpPhase> {
        let Some(entry) = self.loaded.get(&cell) else {
            return None;
        };
        Some(OpPhase::Load(LoadPhase::Activate(
            self.source.activate(&entry.primary),
        )))
    }

    fn poll_unload(
        &mut self,
        cell: CellCoord,
        mut ticket: Ticket<Result<(), SceneError>>,
        mut rest: Vec<SceneHandle>,
    ) -> Option<OpPhase> {
        match ticket.poll() {
            TicketPoll::Pending => Some(OpPhase::Unload { ticket, rest }),
            TicketPoll::Closed => {
                log::warn!(
                    "scene source dropped unload for cell ({}, {})",
                    cell.x,
                    cell.y
                );
                None
            }
            TicketPoll::Ready(result) => {
                if let Err(e) = result {
                    log::warn!("unload failed for cell ({}, {}): {e}", cell.x, cell.y);
                }
                match rest.pop() {
                    Some(handle) => Some(OpPhase::Unload {
                        ticket: self.source.unload(handle),
                        rest,
                    }),
                    None => None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU64;

    use crossbeam_channel::Sender;

    use super::*;
    use crate::memory::MemorySceneSource;

    fn manifest(lo: i32, hi: i32) -> Vec<String> {
        let mut names = Vec::new();
        for x in lo..=hi {
            for y in lo..=hi {
                names.push(naming::scene_name("world", CellCoord::new(x, y)));
            }
        }
        names
    }

    fn quick(scenes: Vec<String>) -> (SceneScheduler, Arc<MemorySceneSource>) {
        let src = Arc::new(MemorySceneSource::new(scenes));
        let cfg = StreamConfig {
            dwell_delay: 1.0,
            quick_load: true,
            ..StreamConfig::default()
        };
        let sched = SceneScheduler::new(GridConfig::default(), cfg, src.clone());
        (sched, src)
    }

    fn run(s: &mut SceneScheduler, pos: Vec3, ticks: usize, dt: f32) {
        for _ in 0..ticks {
            s.tick(Some(pos), dt);
        }
    }

    /// Scene source whose resolve/load tickets are completed by hand, so
    /// tests control exactly when and how each operation finishes.
    #[derive(Default)]
    struct ManualSource {
        resolves: Mutex<Vec<(String, Sender<Vec<SceneLocation>>)>>,
        loads: Mutex<Vec<(String, Sender<Result<SceneHandle, SceneError>>)>>,
        next_id: AtomicU64,
        live: Mutex<Vec<u64>>,
        fail_activate: Mutex<Vec<String>>,
    }

    impl ManualSource {
        fn fulfill_resolve(&self, name: &str, found: bool) {
            let mut pending = self.resolves.lock().unwrap();
            let i = pending
                .iter()
                .position(|(n, _)| n == name)
                .expect("no pending resolve");
            let (n, tx) = pending.swap_remove(i);
            let locations = if found {
                vec![SceneLocation { key: n }]
            } else {
                Vec::new()
            };
            tx.send(locations).unwrap();
        }

        /// Complete the oldest pending resolve, if any.
        fn fulfill_next_resolve(&self, found: bool) -> Option<String> {
            let mut pending = self.resolves.lock().unwrap();
            if pending.is_empty() {
                return None;
            }
            let (n, tx) = pending.remove(0);
            let locations = if found {
                vec![SceneLocation { key: n.clone() }]
            } else {
                Vec::new()
            };
            let _ = tx.send(locations);
            Some(n)
        }

        fn fulfill_load(&self, name: &str) {
            let mut pending = self.loads.lock().unwrap();
            let i = pending
                .iter()
                .position(|(n, _)| n == name)
                .expect("no pending load");
            let (n, tx) = pending.swap_remove(i);
            let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            self.live.lock().unwrap().push(id);
            tx.send(Ok(SceneHandle::new(id, n))).unwrap();
        }

        fn fulfill_load_err(&self, name: &str) {
            let mut pending = self.loads.lock().unwrap();
            let i = pending
                .iter()
                .position(|(n, _)| n == name)
                .expect("no pending load");
            let (n, tx) = pending.swap_remove(i);
            tx.send(Err(SceneError::Loader {
                name: n,
                reason: "loader backend rejected the scene".into(),
            }))
            .unwrap();
        }

        /// Complete every pending load with a fresh live handle.
        fn fulfill_pending_loads(&self) {
            let names: Vec<String> = self
                .loads
                .lock()
                .unwrap()
                .iter()
                .map(|(n, _)| n.clone())
                .collect();
            for n in names {
                self.fulfill_load(&n);
            }
        }

        fn fail_activation(&self, name: &str) {
            self.fail_activate.lock().unwrap().push(name.into());
        }

        fn live_count(&self) -> usize {
            self.live.lock().unwrap().len()
        }
    }

    impl SceneSource for ManualSource {
        fn resolve(&self, name: &str) -> Ticket<Vec<SceneLocation>> {
            let (tx, ticket) = Ticket::channel();
            self.resolves.lock().unwrap().push((name.into(), tx));
            ticket
        }

        fn load_additive(&self, name: &str) -> Ticket<Result<SceneHandle, SceneError>> {
            let (tx, ticket) = Ticket::channel();
            self.loads.lock().unwrap().push((name.into(), tx));
            ticket
        }

        fn activate(&self, handle: &SceneHandle) -> Ticket<Result<(), SceneError>> {
            let fail = self
                .fail_activate
                .lock()
                .unwrap()
                .iter()
                .any(|n| n == handle.name());
            if fail {
                Ticket::ready(Err(SceneError::InvalidHandle(handle.name().into())))
            } else {
                Ticket::ready(Ok(()))
            }
        }

        fn unload(&self, handle: SceneHandle) -> Ticket<Result<(), SceneError>> {
            self.live.lock().unwrap().retain(|id| *id != handle.id());
            Ticket::ready(Ok(()))
        }
    }

    fn manual() -> (SceneScheduler, Arc<ManualSource>) {
        let src = Arc::new(ManualSource::default());
        let cfg = StreamConfig {
            dwell_delay: 1.0,
            quick_load: true,
            ..StreamConfig::default()
        };
        let sched = SceneScheduler::new(GridConfig::default(), cfg, src.clone());
        (sched, src)
    }

    #[test]
    fn warm_up_loads_initial_ring() {
        let (mut s, src) = quick(manifest(-2, 2));
        run(&mut s, Vec3::ZERO, 200, 1.0);
        assert!(s.world_ready());
        assert_eq!(s.current_cell(), Some(CellCoord::new(0, 0)));
        assert_eq!(s.loaded.len(), 9);
        assert_eq!(src.live_count(), 9);
        for n in neighbors(CellCoord::new(0, 0)) {
            assert!(s.is_loaded(n));
        }
    }

    #[test]
    fn ready_gates_hold_world_ready() {
        let gate: ReadyFlag = Arc::new(AtomicBool::new(false));
        let src = Arc::new(MemorySceneSource::new(manifest(-2, 2)));
        let cfg = StreamConfig {
            quick_load: false,
            ..StreamConfig::default()
        };
        let mut s = SceneScheduler::new(GridConfig::default(), cfg, src)
            .with_ready_gates(vec![gate.clone()]);
        run(&mut s, Vec3::ZERO, 200, 1.0);
        assert_eq!(s.loaded.len(), 9);
        assert!(!s.world_ready());
        gate.store(true, Ordering::Relaxed);
        s.tick(Some(Vec3::ZERO), 1.0);
        assert!(s.world_ready());
    }

    #[test]
    fn pending_actions_collapse_per_cell() {
        let (mut s, _src) = quick(Vec::new());
        let cell = CellCoord::new(3, 3);
        s.enqueue(cell, ActionKind::Load, PRIORITY_NEIGHBOR);
        s.enqueue(cell, ActionKind::Load, PRIORITY_CURRENT);
        assert_eq!(s.actions.len(), 1);
        assert_eq!(s.actions[0].priority, PRIORITY_CURRENT);
    }

    #[test]
    fn request_load_targets_active_ring() {
        let (mut s, _src) = quick(Vec::new());
        let origin = CellCoord::new(0, 0);
        s.request_load(origin);
        let mut loads: Vec<CellCoord> = s
            .actions
            .iter()
            .filter(|a| a.kind == ActionKind::Load)
            .map(|a| a.cell)
            .collect();
        let mut expected: Vec<CellCoord> = neighbors(origin).to_vec();
        expected.push(origin);
        loads.sort_by_key(|c| (c.x, c.y));
        expected.sort_by_key(|c| (c.x, c.y));
        assert_eq!(loads, expected);
        assert!(s.actions.iter().all(|a| a.kind == ActionKind::Load));

        // Populate a loaded ring around the origin, then jump far away.
        s.actions.clear();
        s.current_cell = Some(CellCoord::new(0, 0));
        for x in -1..=1 {
            for y in -1..=1 {
                s.loaded.insert(
                    CellCoord::new(x, y),
                    LoadedCell {
                        primary: SceneHandle::new(1, "stub"),
                        layer: None,
                    },
                );
            }
        }
        s.request_load(CellCoord::new(5, 5));
        let unloads: Vec<CellCoord> = s
            .actions
            .iter()
            .filter(|a| a.kind == ActionKind::Unload)
            .map(|a| a.cell)
            .collect();
        // The previous current cell is kept; the rest of the old ring goes.
        assert_eq!(unloads.len(), 8);
        assert!(!unloads.contains(&CellCoord::new(0, 0)));
        let loads = s
            .actions
            .iter()
            .filter(|a| a.kind == ActionKind::Load)
            .count();
        assert_eq!(loads, 9);
    }

    #[test]
    fn dispatch_prefers_priority_then_fifo() {
        let (mut s, src) = manual();
        let a = CellCoord::new(1, 0);
        let b = CellCoord::new(2, 0);
        let c = CellCoord::new(3, 0);
        s.enqueue(a, ActionKind::Load, PRIORITY_NEIGHBOR);
        s.enqueue(b, ActionKind::Load, PRIORITY_CURRENT);
        s.enqueue(c, ActionKind::Load, PRIORITY_NEIGHBOR);
        s.dispatch();
        assert_eq!(s.in_flight_cell(), Some(b));
        src.fulfill_resolve(&naming::scene_name("world", b), false);
        s.poll_in_flight(1.0);
        s.dispatch();
        // FIFO among equal priorities: `a` was enqueued before `c`.
        assert_eq!(s.in_flight_cell(), Some(a));
    }

    #[test]
    fn enqueue_same_cell_cancels_in_flight() {
        let (mut s, _src) = manual();
        let cell = CellCoord::new(4, 4);
        s.enqueue(cell, ActionKind::Load, PRIORITY_CURRENT);
        s.dispatch();
        assert_eq!(s.in_flight_cell(), Some(cell));
        s.enqueue(cell, ActionKind::Unload, PRIORITY_UNLOAD);
        assert_eq!(s.in_flight_cell(), None);
        assert_eq!(s.actions.len(), 1);
        assert_eq!(s.actions[0].kind, ActionKind::Unload);
    }

    #[test]
    fn cancelled_load_is_discarded_and_unloaded() {
        let (mut s, src) = manual();
        let cell = CellCoord::new(4, 4);
        let name = naming::scene_name("world", cell);
        s.enqueue(cell, ActionKind::Load, PRIORITY_CURRENT);
        s.dispatch();
        src.fulfill_resolve(&name, true);
        s.poll_in_flight(1.0);
        // Now waiting on the load ticket; cancel it.
        s.enqueue(cell, ActionKind::Unload, PRIORITY_UNLOAD);
        assert_eq!(s.cancelled.len(), 1);
        // The cancelled load completes anyway; the scene it delivered must
        // be unloaded, not leaked.
        src.fulfill_load(&name);
        assert_eq!(src.live_count(), 1);
        s.drain_side_channels();
        assert!(s.cancelled.is_empty());
        assert_eq!(src.live_count(), 0);
    }

    #[test]
    fn failed_load_leaves_cell_unloaded() {
        let (mut s, src) = manual();
        let origin = CellCoord::new(0, 0);
        let name = naming::scene_name("world", origin);
        s.tick(Some(Vec3::ZERO), 1.0); // boot: whole ring queued
        s.tick(Some(Vec3::ZERO), 1.0); // dispatch the origin resolve
        src.fulfill_resolve(&name, true);
        s.tick(Some(Vec3::ZERO), 1.0); // resolve lands, load begins
        src.fulfill_load_err(&name);
        s.tick(Some(Vec3::ZERO), 1.0); // load fails
        assert!(!s.is_loaded(origin));
        assert_eq!(src.live_count(), 0);
        // The failure must not wedge the queue: the neighbor actions keep
        // draining and warm-up still completes.
        for _ in 0..40 {
            src.fulfill_next_resolve(false);
            s.tick(Some(Vec3::ZERO), 1.0);
            if s.world_ready() {
                break;
            }
        }
        assert!(s.world_ready());
        assert!(!s.is_loaded(origin));
        assert!(s.actions.is_empty());
    }

    #[test]
    fn failed_activation_unloads_that_cell_only() {
        let (mut s, src) = manual();
        let origin = CellCoord::new(0, 0);
        let name = naming::scene_name("world", origin);
        src.fail_activation(&name);
        s.tick(Some(Vec3::ZERO), 1.0); // boot
        s.tick(Some(Vec3::ZERO), 1.0); // dispatch the origin resolve
        src.fulfill_resolve(&name, true);
        s.tick(Some(Vec3::ZERO), 1.0); // load begins
        src.fulfill_load(&name);
        s.tick(Some(Vec3::ZERO), 1.0); // handle registered, settling
        assert!(s.is_loaded(origin));
        assert_eq!(src.live_count(), 1);
        s.tick(Some(Vec3::ZERO), 1.0); // settle elapses, activation starts
        s.tick(Some(Vec3::ZERO), 1.0); // activation fails
        assert!(!s.is_loaded(origin));
        assert_eq!(src.live_count(), 0);
        // Every neighbor still loads normally.
        for _ in 0..80 {
            if src.fulfill_next_resolve(true).is_none() {
                src.fulfill_pending_loads();
            }
            s.tick(Some(Vec3::ZERO), 1.0);
            if s.world_ready() {
                break;
            }
        }
        assert!(s.world_ready());
        assert!(!s.is_loaded(origin));
        assert_eq!(s.loaded.len(), 8);
        assert_eq!(src.live_count(), 8);
    }

    #[test]
    fn unload_of_absent_cell_is_noop() {
        let (mut s, _src) = manual();
        s.enqueue(CellCoord::new(7, 7), ActionKind::Unload, PRIORITY_UNLOAD);
        s.dispatch();
        assert_eq!(s.in_flight_cell(), None);
    }

    #[test]
    fn dwell_promotes_after_delay() {
        let (mut s, _src) = quick(manifest(-3, 3));
        run(&mut s, Vec3::ZERO, 200, 1.0);
        assert!(s.world_ready());
        let east = Vec3::new(100.0, 0.0, 0.0);
        // dt 0.5 with a 1.0 dwell delay: candidate switch, two decrements,
        // then the promoting tick.
        run(&mut s, east, 4, 0.5);
        assert_eq!(s.current_cell(), Some(CellCoord::new(1, 0)));
    }

    #[test]
    fn boundary_oscillation_never_promotes() {
        let (mut s, _src) = quick(manifest(-3, 3));
        run(&mut s, Vec3::ZERO, 200, 1.0);
        assert!(s.world_ready());
        for i in 0..50 {
            let x = if i % 2 == 0 { 49.0 } else { 51.0 };
            s.tick(Some(Vec3::new(x, 0.0, 0.0)), 0.5);
        }
        assert_eq!(s.current_cell(), Some(CellCoord::new(0, 0)));
    }

    #[test]
    fn layer_scenes_load_and_swap() {
        let (mut s, src) = quick(vec![
            "world_(0,0)".into(),
            "world_(0,0)_003".into(),
            "world_(0,0)_004".into(),
        ]);
        s.set_layer(3);
        run(&mut s, Vec3::ZERO, 200, 1.0);
        assert!(s.world_ready());
        assert!(src.is_live("world_(0,0)"));
        assert!(src.is_live("world_(0,0)_003"));
        s.set_layer(4);
        run(&mut s, Vec3::ZERO, 50, 1.0);
        assert!(src.is_live("world_(0,0)_004"));
        assert!(!src.is_live("world_(0,0)_003"));
    }

    #[test]
    fn moving_away_reconciles_loaded_set() {
        let (mut s, src) = quick(manifest(-8, 8));
        run(&mut s, Vec3::ZERO, 200, 1.0);
        assert!(s.world_ready());
        let far = Vec3::new(500.0, 0.0, 500.0);
        run(&mut s, far, 400, 0.5);
        assert_eq!(s.current_cell(), Some(CellCoord::new(5, 5)));
        assert_eq!(s.loaded.len(), 9);
        assert!(s.is_loaded(CellCoord::new(5, 5)));
        assert!(!s.is_loaded(CellCoord::new(0, 0)));
        assert_eq!(src.live_count(), 9);
    }

    #[test]
    fn absent_observer_pauses_streaming() {
        let (mut s, _src) = quick(manifest(-2, 2));
        for _ in 0..10 {
            s.tick(None, 1.0);
        }
        assert_eq!(s.current_cell(), None);
        assert!(s.actions.is_empty());
        run(&mut s, Vec3::ZERO, 200, 1.0);
        assert!(s.world_ready());
        let before = s.loaded.len();
        for _ in 0..10 {
            s.tick(None, 1.0);
        }
        assert_eq!(s.loaded.len(), before);
        assert_eq!(s.current_cell(), Some(CellCoord::new(0, 0)));
    }
}
