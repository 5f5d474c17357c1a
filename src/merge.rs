//! File-driven front end for the collider merge pass.

use std::error::Error;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use strata_collider::{MergeSource, MergedColliders, merge_all};

#[derive(Debug, Deserialize)]
struct MergeFile {
    #[serde(default)]
    sources: Vec<MergeSource>,
}

#[derive(Debug, Serialize)]
struct MergeOutput {
    merged: Vec<MergedColliders>,
}

pub fn run(input: &Path, output: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let text = fs::read_to_string(input)?;
    let file: MergeFile = toml::from_str(&text)?;
    let merged = merge_all(&file.sources);
    let box_count: usize = merged
        .iter()
        .map(|m| m.merged.iter().map(|g| g.boxes.len()).sum::<usize>())
        .sum();
    log::info!(
        "merged {} of {} sources into {} boxes",
        merged.len(),
        file.sources.len(),
        box_count
    );
    let out = toml::to_string_pretty(&MergeOutput { merged })?;
    match output {
        Some(path) => fs::write(path, out)?,
        None => print!("{out}"),
    }
    Ok(())
}
