//! Engine configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default nesting limit for call activities.
pub const DEFAULT_MAX_CALL_DEPTH: u32 = 16;

/// Configuration for one engine service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name the engine is registered under.
    pub name: String,
    /// Whether dispatches record runtime events into the audit trail.
    pub record_history: bool,
    /// Maximum call-activity nesting depth.
    pub max_call_depth: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            record_history: true,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl EngineConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Missing keys fall back to their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("invalid engine configuration")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading engine configuration {}", path.display()))?;
        Self::from_yaml_str(&raw)
    }
}
