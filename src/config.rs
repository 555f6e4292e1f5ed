use crate::audio::Source;
use crate::window::{secs_to_duration, OversizePolicy, WindowConfig};

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Splitting parameters, in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(alias = "min")]
    pub min_duration: f64,
    #[serde(alias = "max")]
    pub max_duration: f64,
    pub threshold: f64,
    pub source: Source,
    pub oversize: OversizePolicy,
    /// Captions shorter than this are ignored.
    #[serde(alias = "min_caption")]
    pub caption_floor: Option<f64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_duration: 6.0,
            max_duration: 16.0,
            threshold: 2.0,
            source: Source::Masc,
            oversize: OversizePolicy::Keep,
            caption_floor: None,
        }
    }
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {:?}", path))?;
        Self::from_json(&contents).with_context(|| format!("Invalid settings file {:?}", path))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads `path` if given, otherwise starts from the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn window_config(&self) -> Result<WindowConfig> {
        let mut config = WindowConfig::new(self.min_duration, self.max_duration, self.threshold)?
            .with_oversize(self.oversize);
        if let Some(floor) = self.caption_floor {
            config = config.with_caption_floor(secs_to_duration("caption_floor", floor)?);
        }
        Ok(config)
    }
}
