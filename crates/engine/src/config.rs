// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine configuration knobs.
//!
//! All sections and fields default, so `EngineConfig::default()` is a
//! working configuration (apart from picking a store path). Durations are
//! written as strings ("30s", "500ms") in the TOML surface.

use crate::error::EngineError;
use quaero_core::duration::serde_str;
use quaero_core::LogLevel;
use quaero_storage::QueueConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub dispatcher: DispatcherSection,
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub logs: LogsSection,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Validation(format!("read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| EngineError::Validation(format!("parse {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSection {
    /// Filesystem directory for the embedded store.
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self { path: PathBuf::from("quaero-data") }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueSection {
    /// How long a received message stays invisible.
    #[serde(with = "serde_str")]
    pub visibility_timeout: Duration,
    /// Dead-letter threshold.
    pub max_receives: u32,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self { visibility_timeout: Duration::from_secs(30), max_receives: 5 }
    }
}

impl QueueSection {
    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig {
            visibility_timeout: self.visibility_timeout,
            max_receives: self.max_receives,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherSection {
    /// Concurrent receive loops. Leaf parallelism usually comes from one
    /// dispatcher running many leaves, so the default stays at 1.
    pub worker_pool_size: usize,
    /// Grace period after a leaf's soft timeout cancels its context,
    /// before the leaf is failed with cause "timeout".
    #[serde(with = "serde_str")]
    pub timeout_grace: Duration,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self { worker_pool_size: 1, timeout_grace: Duration::from_secs(5) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorSection {
    /// Forced `step:progress` republish cadence for steps with activity.
    #[serde(with = "serde_str")]
    pub periodic_flush_interval: Duration,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self { periodic_flush_interval: Duration::from_secs(5) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogsSection {
    /// Logs per step that force a `logs:refresh` trigger.
    pub refresh_trigger_count: u32,
    /// Maximum age of unreported log activity before a trigger fires.
    #[serde(with = "serde_str")]
    pub refresh_trigger_interval: Duration,
    /// Minimum level published as `job:log` events. Storage is never
    /// filtered.
    pub ui_min_level: LogLevel,
    /// Bounded capacity of the producer channel, in batches.
    pub channel_capacity: usize,
}

impl Default for LogsSection {
    fn default() -> Self {
        Self {
            refresh_trigger_count: 10,
            refresh_trigger_interval: Duration::from_secs(1),
            ui_min_level: LogLevel::Info,
            channel_capacity: 1024,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
