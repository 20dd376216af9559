//! TOML configuration for the data root, category set, and time window.

use std::path::Path;

use serde::Deserialize;

use scrub_core::{CategoryCode, DATASET_END, DATASET_START, STEP_MINUTES, TemporalCursor, Timestamp};

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScrubConfig {
    /// Local data directory or `http(s)://` base URL.
    pub data_root: String,
    /// Categories whose files make up each timestamp's batch.
    pub categories: Vec<CategoryCode>,
    /// Fail on cache misses instead of rendering them empty.
    pub strict_cache: bool,
    pub window: WindowConfig,
}

impl Default for ScrubConfig {
    fn default() -> Self {
        Self {
            data_root: "data".to_string(),
            categories: CategoryCode::ALL.to_vec(),
            strict_cache: cfg!(debug_assertions),
            window: WindowConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowConfig {
    pub start: Timestamp,
    /// Exclusive.
    pub end: Timestamp,
    pub step_minutes: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            start: Timestamp::from_minutes(DATASET_START),
            end: Timestamp::from_minutes(DATASET_END),
            step_minutes: STEP_MINUTES as u32,
        }
    }
}

impl ScrubConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ScrubConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.categories.is_empty() {
            return Err(StoreError::Config("categories must not be empty".into()));
        }
        if self.window.start >= self.window.end {
            return Err(StoreError::Config(format!(
                "window start {} must precede end {}",
                self.window.start, self.window.end
            )));
        }
        if self.window.step_minutes == 0 {
            return Err(StoreError::Config("step_minutes must be positive".into()));
        }
        Ok(())
    }

    /// A fresh cursor over the configured window.
    pub fn cursor(&self) -> TemporalCursor {
        TemporalCursor::new(&self.window.start, &self.window.end, self.window.step_minutes)
    }
}
