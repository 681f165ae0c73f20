use crate::pipeline::types::{DEFAULT_LOOP_SLEEP, DEFAULT_WAIT};
use crate::pipeline::{OverflowPolicy, StageOptions, WaitPolicy};
use crate::video::synthetic::SyntheticConfig;
use crate::workers::display::DisplayConfig;
use crate::workers::feed::FeedConfig;
use crate::workers::finder::FinderConfig;
use crate::workers::ocr::OcrConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Mailbox and loop settings of one stage, as written in the run config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Mailbox capacity; 0 is unbounded.
    pub capacity: usize,
    pub overflow: OverflowPolicy,
    /// How long `get` waits for a job; 0 polls.
    pub wait_ms: u64,
    pub loop_sleep_ms: u64,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            capacity: 0,
            overflow: OverflowPolicy::default(),
            wait_ms: DEFAULT_WAIT.as_millis() as u64,
            loop_sleep_ms: DEFAULT_LOOP_SLEEP.as_millis() as u64,
        }
    }
}

impl StageConfig {
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    pub fn to_options(&self) -> StageOptions {
        let wait = if self.wait_ms == 0 {
            WaitPolicy::Poll
        } else {
            WaitPolicy::Block(Duration::from_millis(self.wait_ms))
        };
        StageOptions::default()
            .with_capacity(self.capacity)
            .with_overflow(self.overflow)
            .with_wait(wait)
            .with_loop_sleep(Duration::from_millis(self.loop_sleep_ms))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StagesConfig {
    pub feed: StageConfig,
    pub finder: StageConfig,
    pub ocr: StageConfig,
    pub lookup: StageConfig,
    pub display: StageConfig,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            feed: StageConfig {
                wait_ms: 0,
                ..StageConfig::bounded(60)
            },
            finder: StageConfig::bounded(1),
            ocr: StageConfig::bounded(5),
            lookup: StageConfig::bounded(5),
            display: StageConfig::bounded(30),
        }
    }
}

/// Everything a run can be tuned with. Every field is optional in the file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub stages: StagesConfig,
    pub feed: FeedConfig,
    pub finder: FinderConfig,
    pub ocr: OcrConfig,
    pub display: DisplayConfig,
    pub synthetic: SyntheticConfig,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read run config {:?}", path))?;
        let config: RunConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse run config {:?}", path))?;
        config.finder.validate()?;
        Ok(config)
    }
}
