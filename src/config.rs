//! Reader configuration file
//!
//! ```yaml
//! fixes:
//!   - fixes/ifs.yaml
//!   - fixes/icon.yaml
//! data_models: data_models/
//! dst_data_model: cf
//! apply_unit_fix: true
//! stream_step: 1
//! stream_unit: month
//! ```
//!
//! Relative paths are resolved against the directory of the configuration file.

use crate::errors::{ClimNormError, Result};
use crate::fixer::rules::FixConfig;
use crate::streaming::{StreamSpec, StreamUnit};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_true() -> bool {
    true
}

fn default_step() -> usize {
    1
}

fn default_unit() -> String {
    "steps".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Fix-rule files, merged in order
    #[serde(default)]
    pub fixes: Vec<PathBuf>,
    /// Directory holding `{src}2{dst}.json` data model files
    #[serde(default)]
    pub data_models: Option<PathBuf>,
    #[serde(default)]
    pub dst_data_model: Option<String>,
    #[serde(default = "default_true")]
    pub apply_unit_fix: bool,
    #[serde(default = "default_step")]
    pub stream_step: usize,
    #[serde(default = "default_unit")]
    pub stream_unit: String,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            fixes: Vec::new(),
            data_models: None,
            dst_data_model: None,
            apply_unit_fix: true,
            stream_step: default_step(),
            stream_unit: default_unit(),
        }
    }
}

impl ReaderConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Load a configuration file, resolving relative paths against its directory.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut cfg = Self::from_yaml_str(&text)?;
        if let Some(base) = path.parent() {
            for f in &mut cfg.fixes {
                if f.is_relative() {
                    *f = base.join(&*f);
                }
            }
            if let Some(dm) = cfg.data_models.as_mut().filter(|d| d.is_relative()) {
                *dm = base.join(&*dm);
            }
        }
        Ok(cfg)
    }

    /// Read and merge all fix-rule files
    pub fn load_fixes(&self) -> Result<FixConfig> {
        let mut merged = FixConfig::default();
        for path in &self.fixes {
            info!("loading fix rules from {}", path.display());
            merged.extend(FixConfig::from_path(path)?);
        }
        Ok(merged)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream_step == 0 {
            return Err(ClimNormError::Config("stream_step must be positive".to_string()));
        }
        StreamUnit::parse(&self.stream_unit)?;
        Ok(())
    }

    pub fn stream_spec(&self) -> Result<StreamSpec> {
        self.validate()?;
        Ok(StreamSpec {
            step: self.stream_step,
            unit: StreamUnit::parse(&self.stream_unit)?,
            startdate: None,
        })
    }
}
