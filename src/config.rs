//! TOML-backed configuration for the strata binary.

use std::error::Error;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use strata_geom::Vec3;
use strata_grid::{CellCoord, GridConfig};
use strata_stream::{StreamConfig, naming};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub sim: SimConfig,
    #[serde(default)]
    pub manifest: ManifestConfig,
    /// Layer index applied before the run starts (e.g. time-of-day).
    #[serde(default)]
    pub layer: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimConfig {
    #[serde(default = "default_dt")]
    pub dt: f32,
    #[serde(default = "default_ticks")]
    pub ticks: u64,
    /// Simulated loader latency; zero keeps everything synchronous.
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default = "default_speed")]
    pub speed: f32,
    /// Waypoints the observer walks through at `speed`. Empty means the
    /// observer stands at the world origin.
    #[serde(default)]
    pub path: Vec<Vec3>,
}

fn default_dt() -> f32 {
    0.05
}

fn default_ticks() -> u64 {
    2000
}

fn default_speed() -> f32 {
    10.0
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            dt: default_dt(),
            ticks: default_ticks(),
            latency_ms: 0,
            speed: default_speed(),
            path: Vec::new(),
        }
    }
}

/// Rectangular range of authored cells; every cell in the range gets a
/// primary scene, and each listed layer gets a layer sub-scene per cell.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestConfig {
    #[serde(default = "default_min")]
    pub min: (i32, i32),
    #[serde(default = "default_max")]
    pub max: (i32, i32),
    #[serde(default)]
    pub layers: Vec<u32>,
}

fn default_min() -> (i32, i32) {
    (-4, -4)
}

fn default_max() -> (i32, i32) {
    (4, 4)
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            min: default_min(),
            max: default_max(),
            layers: Vec::new(),
        }
    }
}

impl ManifestConfig {
    pub fn scene_names(&self, world_key: &str) -> Vec<String> {
        let mut names = Vec::new();
        for x in self.min.0..=self.max.0 {
            for y in self.min.1..=self.max.1 {
                let name = naming::scene_name(world_key, CellCoord::new(x, y));
                for layer in &self.layers {
                    names.push(naming::layer_scene_name(&name, *layer));
                }
                names.push(name);
            }
        }
        names
    }
}

pub fn load_app_config(path: &Path) -> Result<AppConfig, Box<dyn Error>> {
    let text = fs::read_to_string(path)?;
    let cfg: AppConfig = toml::from_str(&text)?;
    Ok(cfg)
}
