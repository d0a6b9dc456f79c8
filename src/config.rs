//! Persistence for user preferences (config).
//!
//! - **Config** (`config.json`): backend endpoints and bootstrap policy, saved
//!   to the platform config directory.
//!
//! On macOS this resolves to `~/Library/Application Support/triage-auth/`.

use crate::storage::atomic_write;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// User preferences (persisted to config.json).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the SMART/FHIR backend.
    pub backend_url: String,
    /// Page URL assumed when none is given on the command line.
    pub frontend_url: String,
    pub status_path: String,
    pub launch_path: String,
    pub reset_path: String,
    /// Query parameter carrying the session id on status requests.
    pub session_param: String,
    /// Deadline for the status probe.
    pub probe_timeout_ms: u64,
    /// Minimum gap between automatic launch attempts.
    pub cooldown_ms: u64,
    /// Cosmetic pause before the probe starts.
    pub probe_delay_ms: u64,
    /// Launch automatically even when the backend does not report sandbox mode.
    pub auto_launch: bool,
    /// Whether a user-initiated reauth stamps the same record the automatic
    /// policy throttles on.
    pub manual_reauth_arms_cooldown: bool,
    /// Honour `HTTP_PROXY`/`HTTPS_PROXY` for backend requests.
    pub use_system_proxy: bool,
}

/// Build-time default for `auto_launch`.
fn default_auto_launch() -> bool {
    matches!(option_env!("TRIAGE_AUTH_AUTO_LAUNCH"), Some("1" | "true"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8000".to_string(),
            frontend_url: "http://localhost:3000/".to_string(),
            status_path: "/api/auth/status".to_string(),
            launch_path: "/launch".to_string(),
            reset_path: "/api/auth/reset".to_string(),
            session_param: "session_id".to_string(),
            probe_timeout_ms: 2_000,
            cooldown_ms: 30_000,
            probe_delay_ms: 100,
            auto_launch: default_auto_launch(),
            manual_reauth_arms_cooldown: true,
            use_system_proxy: true,
        }
    }
}

impl Config {
    pub fn policy(&self) -> BootstrapPolicy {
        BootstrapPolicy {
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            cooldown: Duration::from_millis(self.cooldown_ms),
            probe_delay: Duration::from_millis(self.probe_delay_ms),
            auto_launch: self.auto_launch,
            manual_reauth_arms_cooldown: self.manual_reauth_arms_cooldown,
        }
    }
}

/// Policy constants consumed by the bootstrap core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapPolicy {
    pub probe_timeout: Duration,
    pub cooldown: Duration,
    pub probe_delay: Duration,
    pub auto_launch: bool,
    pub manual_reauth_arms_cooldown: bool,
}

impl Default for BootstrapPolicy {
    fn default() -> Self {
        Config::default().policy()
    }
}

// ---------------------------------------------------------------------------
// Directory helpers
// ---------------------------------------------------------------------------

/// Config directory (e.g. `~/Library/Application Support/triage-auth/`).
fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("triage-auth"))
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load config from disk, returning defaults if the file is missing or invalid.
pub fn load_config() -> Config {
    let Some(path) = config_dir().map(|d| d.join("config.json")) else {
        return Config::default();
    };
    load_config_from(&path)
}

/// Save config to disk.
pub fn save_config(config: &Config) -> Result<(), std::io::Error> {
    let dir = config_dir().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "config dir not found")
    })?;
    save_config_to(config, &dir.join("config.json"))
}

// ---------------------------------------------------------------------------
// Path-parameterised helpers (used by public API and tests)
// ---------------------------------------------------------------------------

fn load_config_from(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
        Err(_) => Config::default(),
    }
}

fn save_config_to(config: &Config, path: &Path) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
