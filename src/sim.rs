//! Headless streaming run driven by a scripted observer path.

use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use strata_geom::Vec3;
use strata_stream::{MemorySceneSource, SceneScheduler, naming};

use crate::config::{AppConfig, load_app_config};

/// Walks a fixed waypoint list at constant speed and parks at the end.
struct Observer {
    pos: Vec3,
    path: Vec<Vec3>,
    next: usize,
    speed: f32,
}

impl Observer {
    fn new(path: Vec<Vec3>, speed: f32) -> Self {
        let pos = path.first().copied().unwrap_or(Vec3::ZERO);
        Self {
            pos,
            path,
            next: 1,
            speed,
        }
    }

    fn advance(&mut self, dt: f32) -> Vec3 {
        let Some(&target) = self.path.get(self.next) else {
            return self.pos;
        };
        let delta = target - self.pos;
        let dist = delta.length();
        let step = self.speed * dt;
        if dist <= step {
            self.pos = target;
            self.next += 1;
        } else {
            self.pos += delta * (step / dist);
        }
        self.pos
    }
}

pub fn run(config_path: &Path) -> Result<(), Box<dyn Error>> {
    let cfg = load_app_config(config_path)?;
    run_with(&cfg);
    Ok(())
}

fn run_with(cfg: &AppConfig) {
    let names = cfg.manifest.scene_names(&cfg.stream.world_key);
    log::info!(
        "manifest: {} scenes over cells {:?}..={:?}",
        names.len(),
        cfg.manifest.min,
        cfg.manifest.max
    );
    let mut source = MemorySceneSource::new(names);
    if cfg.sim.latency_ms > 0 {
        source = source.with_latency(Duration::from_millis(cfg.sim.latency_ms));
    }
    let source = Arc::new(source);
    let mut scheduler = SceneScheduler::new(cfg.grid, cfg.stream.clone(), source.clone());
    if let Some(layer) = cfg.layer {
        scheduler.set_layer(layer);
    }

    let mut observer = Observer::new(cfg.sim.path.clone(), cfg.sim.speed);
    let mut last_cell = None;
    let mut ready_at = None;
    for tick in 0..cfg.sim.ticks {
        let pos = observer.advance(cfg.sim.dt);
        scheduler.tick(Some(pos), cfg.sim.dt);
        if ready_at.is_none() && scheduler.world_ready() {
            ready_at = Some(tick);
        }
        if scheduler.current_cell() != last_cell {
            last_cell = scheduler.current_cell();
            if let Some(cell) = last_cell {
                log::info!("tick {tick}: current cell ({}, {})", cell.x, cell.y);
            }
        }
    }

    let mut cells: Vec<_> = scheduler.loaded_cells().collect();
    cells.sort_by_key(|c| (c.x, c.y));
    match ready_at {
        Some(tick) => log::info!("world ready after {tick} ticks"),
        None => log::warn!("world never became ready"),
    }
    log::info!(
        "finished: {} cells loaded, {} live scenes, {} actions still pending",
        cells.len(),
        source.live_count(),
        scheduler.pending_actions().len()
    );
    // With the queue quiescent, the source's live scenes must map back onto
    // exactly the loaded cells. Layer sub-scenes parse to the same cell as
    // their primary, so the dedup folds them in.
    if scheduler.pending_actions().is_empty() && scheduler.in_flight_cell().is_none() {
        let mut live_cells: Vec<_> = source
            .live_names()
            .iter()
            .filter_map(|name| naming::cell_from_scene_name(name))
            .collect();
        live_cells.sort_by_key(|c| (c.x, c.y));
        live_cells.dedup();
        if live_cells != cells {
            log::warn!(
                "live scene set disagrees with the loaded-cell table: {} cells live vs {} loaded",
                live_cells.len(),
                cells.len()
            );
        }
    }
    for cell in cells {
        log::debug!("loaded: ({}, {})", cell.x, cell.y);
    }
}
