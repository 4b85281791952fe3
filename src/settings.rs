//! Site-specific tool configuration.
//!
//! Tool install locations and environment-activation commands differ per
//! cluster, so they are injected through a JSON file named by the
//! `RELION_EXTERNAL_JOBS_CONF` environment variable instead of being
//! compiled in. Every field has a neutral default: with no file configured
//! the tools are expected on `PATH` with no activation prefix.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming the settings file.
pub const SETTINGS_ENV: &str = "RELION_EXTERNAL_JOBS_CONF";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub topaz: TopazSettings,
    pub cryolo: CryoloSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopazSettings {
    /// Shell prefix that puts the tool on PATH, e.g.
    /// `. ~/rc/conda.rc && conda activate topaz-0.2.4`.
    pub activate: Option<String>,
    /// Tool executable name or path.
    pub bin: String,
}

impl Default for TopazSettings {
    fn default() -> Self {
        Self {
            activate: None,
            bin: "topaz".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CryoloSettings {
    /// Shell prefix for the crYOLO environment (conda activation, module
    /// loads for CUDA, and so on).
    pub activate: Option<String>,
    /// Training entry point.
    pub train_bin: String,
    /// Pretrained general model used when the job gives no `--model`.
    pub general_model: Option<PathBuf>,
}

impl Default for CryoloSettings {
    fn default() -> Self {
        Self {
            activate: None,
            train_bin: "cryolo_train.py".into(),
            general_model: None,
        }
    }
}

impl ToolSettings {
    /// Load from the file named by `RELION_EXTERNAL_JOBS_CONF`, or defaults
    /// when the variable is unset.
    pub fn load() -> Result<Self> {
        match env::var_os(SETTINGS_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read tool settings {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("invalid tool settings {}", path.display()))
    }
}
