//! JSON configuration of the demo run.
//!
//! Every section falls back to its defaults, so `{}` is a valid file.
use crate::error::{Error, Result};
use crate::fusion::FusionParams;
use crate::registration::RegistrationParams;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub json_out: Option<PathBuf>,
    /// Directory for maximum-projection previews of the fused groups.
    pub preview_dir: Option<PathBuf>,
}

/// Synthetic bead acquisition used by the demo.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub dims: [usize; 3],
    pub beads: usize,
    /// Rotation about the y axis of each view, in degrees.
    pub angles: Vec<f64>,
    pub channels: u32,
    pub timepoints: u32,
    pub bead_sigma: f64,
    /// Gaussian jitter (px) added to the simulated bead detections.
    pub detection_noise: f64,
    pub seed: u64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            dims: [48, 48, 48],
            beads: 40,
            angles: vec![0.0, 45.0, 90.0],
            channels: 1,
            timepoints: 1,
            bead_sigma: 1.2,
            detection_noise: 0.0,
            seed: 7,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub scene: SceneConfig,
    pub registration: RegistrationParams,
    pub fusion: FusionParams,
    pub output: OutputConfig,
}

pub fn load_config(path: &Path) -> Result<RuntimeConfig> {
    let contents = fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| {
        Error::InvalidParameter(format!("failed to parse config {}: {e}", path.display()))
    })
}
