//! Engine configuration.
//!
//! Loaded from a TOML file when one exists; every field has a default so a
//! missing or partial file still yields a working engine. A malformed file
//! is logged and replaced by defaults rather than aborting the session.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const DEFAULT_API_BASE_URL: &str = "https://api.waypoint.dev";
const DEFAULT_REFLECTION_MIN_CHARS: usize = 20;
const DEFAULT_REFLECTION_MAX_CHARS: usize = 2000;
const DEFAULT_FLUSH_DEBOUNCE_MS: u64 = 400;

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_reflection_min_chars() -> usize {
    DEFAULT_REFLECTION_MIN_CHARS
}

fn default_reflection_max_chars() -> usize {
    DEFAULT_REFLECTION_MAX_CHARS
}

fn default_flush_debounce_ms() -> u64 {
    DEFAULT_FLUSH_DEBOUNCE_MS
}

fn default_data_dir() -> PathBuf {
    dirs_fallback().join("waypoint")
}

fn dirs_fallback() -> PathBuf {
    std::env::var_os("HOME")
        .map(|h| PathBuf::from(h).join(".local/share"))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base URL of the remote project service. Opaque to the engine.
    pub api_base_url: String,
    /// Minimum length of a reflection answer, in characters.
    pub reflection_min_chars: usize,
    /// Maximum length of a reflection answer, in characters.
    pub reflection_max_chars: usize,
    /// Quiet window before a dirty state is flushed to the local cache.
    pub flush_debounce_ms: u64,
    /// Directory holding the local SQLite cache.
    pub data_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            reflection_min_chars: default_reflection_min_chars(),
            reflection_max_chars: default_reflection_max_chars(),
            flush_debounce_ms: default_flush_debounce_ms(),
            data_dir: default_data_dir(),
        }
    }
}

impl EngineConfig {
    /// Load from `path`; missing file yields defaults, malformed file warns
    /// and yields defaults.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => {
                info!(path = %path.display(), "no config file; using defaults");
                return Self::default();
            }
        };
        match toml::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), err = %e, "malformed config; using defaults");
                Self::default()
            }
        }
    }
}
