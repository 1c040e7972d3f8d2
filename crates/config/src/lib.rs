//! Runtime settings (§6 EXTERNAL INTERFACES — "Config inputs").
//!
//! Layering follows the teacher's CLI: built-in defaults, overlaid by an
//! optional TOML file, overlaid by environment variables (so a deployment
//! can tweak a single knob without editing the file). `Settings` is loaded
//! once at startup and then held behind an `ArcSwap` so "reload level 1"
//! (§4.11) can swap in a freshly-read copy without restarting listeners —
//! the same pattern pgcat uses for its pool configuration.

use std::env;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// `§6` config inputs, one field per enumerated item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub version: String,
    /// Path to the SQLite database file.
    pub database: String,
    /// Pacing delay for busy inner loops, in seconds.
    pub microsleep_secs: f64,
    pub max_players: u32,
    /// Remote-server eviction horizon, in seconds.
    pub timeout_secs: i64,
    /// Per-IP cap on simultaneously listed local servers.
    pub max_servers: u32,

    pub cert_file: String,
    pub cert_chain: String,
    pub cert_key: String,
    pub client_cert: String,
    pub client_key: String,

    pub ticks_max: f64,
    pub ticks_decay: f64,
    pub ticks_max_age_secs: i64,

    pub webhook_slack: String,
    pub webhook_discord: String,

    /// Daemon's own address, once learned (§4.11); empty until discovered.
    #[serde(skip)]
    pub self_address: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: "listd.sqlite".to_string(),
            microsleep_secs: 0.2,
            max_players: 32,
            timeout_secs: 40,
            max_servers: 2,
            cert_file: String::new(),
            cert_chain: String::new(),
            cert_key: String::new(),
            client_cert: String::new(),
            client_key: String::new(),
            ticks_max: 10.0,
            ticks_decay: 2.0,
            ticks_max_age_secs: 86_400,
            webhook_slack: String::new(),
            webhook_discord: String::new(),
            self_address: String::new(),
        }
    }
}

impl Settings {
    /// True once all three TLS material paths are non-empty (§4.5: "listener
    /// is simply not started otherwise").
    pub fn admin_tls_configured(&self) -> bool {
        !self.cert_file.is_empty() && !self.cert_key.is_empty() && !self.cert_chain.is_empty()
    }

    /// Loads defaults, then overlays a TOML file if `path` is `Some` and
    /// exists, then overlays environment variables for every field.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Some(path) = path {
            if path.exists() {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                let file_settings: Settings =
                    toml::from_str(&text).map_err(|source| ConfigError::Parse {
                        path: path.display().to_string(),
                        source,
                    })?;
                settings = file_settings;
            }
        }

        settings.apply_env_overrides();
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("VERSION") {
            self.version = v;
        }
        if let Ok(v) = env::var("DATABASE") {
            self.database = v;
        }
        if let Some(v) = env_f64("MICROSLEEP") {
            self.microsleep_secs = v;
        }
        if let Some(v) = env_u32("MAXPLAYERS") {
            self.max_players = v;
        }
        if let Some(v) = env_i64("TIMEOUT") {
            self.timeout_secs = v;
        }
        if let Some(v) = env_u32("MAXSERVERS") {
            self.max_servers = v;
        }
        if let Ok(v) = env::var("CERTFILE") {
            self.cert_file = v;
        }
        if let Ok(v) = env::var("CERTCHAIN") {
            self.cert_chain = v;
        }
        if let Ok(v) = env::var("CERTKEY") {
            self.cert_key = v;
        }
        if let Ok(v) = env::var("CLIENTCERT") {
            self.client_cert = v;
        }
        if let Ok(v) = env::var("CLIENTKEY") {
            self.client_key = v;
        }
        if let Some(v) = env_f64("TICKSMAX") {
            self.ticks_max = v;
        }
        if let Some(v) = env_f64("TICKSDECAY") {
            self.ticks_decay = v;
        }
        if let Some(v) = env_i64("TICKSMAXAGE") {
            self.ticks_max_age_secs = v;
        }
        if let Ok(v) = env::var("WEBHOOK_SLACK") {
            self.webhook_slack = v;
        }
        if let Ok(v) = env::var("WEBHOOK_DISCORD") {
            self.webhook_discord = v;
        }
    }
}

fn env_f64(key: &str) -> Option<f64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Live, swappable handle to the current settings, shared across listeners.
#[derive(Clone)]
pub struct SharedSettings(Arc<ArcSwap<Settings>>);

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        Self(Arc::new(ArcSwap::from_pointee(settings)))
    }

    pub fn get(&self) -> Arc<Settings> {
        self.0.load_full()
    }

    /// "Reload level 1" (§4.11): re-read config and publish atomically.
    pub fn reload(&self, path: Option<&Path>) -> Result<(), ConfigError> {
        let fresh = Settings::load(path)?;
        self.0.store(Arc::new(fresh));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let s = Settings::default();
        assert_eq!(s.max_players, 32);
        assert_eq!(s.timeout_secs, 40);
        assert_eq!(s.max_servers, 2);
        assert_eq!(s.ticks_max, 10.0);
        assert_eq!(s.ticks_decay, 2.0);
        assert_eq!(s.ticks_max_age_secs, 86_400);
        assert!(!s.admin_tls_configured());
    }

    #[test]
    fn env_override_takes_effect() {
        std::env::set_var("MAXPLAYERS", "64");
        let s = Settings::load(None).unwrap();
        assert_eq!(s.max_players, 64);
        std::env::remove_var("MAXPLAYERS");
    }

    #[test]
    fn toml_overlay_then_shared_settings_swap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listd.toml");
        std::fs::write(&path, "max_players = 16\n").unwrap();
        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.max_players, 16);

        let shared = SharedSettings::new(s);
        assert_eq!(shared.get().max_players, 16);
        shared.reload(Some(&path)).unwrap();
        assert_eq!(shared.get().max_players, 16);
    }
}
