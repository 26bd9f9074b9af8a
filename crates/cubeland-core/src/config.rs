//! Server configuration.
//!
//! Resolution order: environment variables → config file → defaults.
//! The file is TOML; every key has a default so a missing file is a valid
//! (if not very secure) configuration. `CUBELAND_*` variables override
//! individual keys, section and key joined by a double underscore.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration handed to the server core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: ListenConfig,
    pub tls: TlsConfig,
    pub world: WorldConfig,
    pub proto: ProtoConfig,
    pub keys: KeysConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// TCP port to bind.
    pub port: u16,
    /// Accept queue depth.
    pub backlog: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Permitted protocol versions: "secure" (1.2+) or "tlsv1.3".
    pub protocols: String,
    /// Cipher policy. Only "secure" (library defaults) is recognised.
    pub ciphers: String,
    /// Server certificate chain, PEM.
    pub cert: PathBuf,
    /// Server private key, PEM.
    pub key: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Worker count for the chunk slice serializer pool.
    pub chunk_serializer_threads: usize,
    /// Worker count handed to the world storage backend.
    pub source_work_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtoConfig {
    /// Per-session position broadcast period, milliseconds.
    pub position_broadcast_interval_ms: u64,
    /// World clock broadcast period, seconds.
    pub time_update_interval_secs: u64,
    /// Real seconds per in-world day.
    pub secs_per_day: u32,
}

impl ProtoConfig {
    /// In-world days advanced per real second.
    pub fn tick_factor(&self) -> f64 {
        1.0 / f64::from(self.secs_per_day)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Base URL of the account service used for public key lookups.
    pub api_base: String,
    /// Directory holding the on-disk key cache database.
    pub cache_dir: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            tls: TlsConfig::default(),
            world: WorldConfig::default(),
            proto: ProtoConfig::default(),
            keys: KeysConfig::default(),
        }
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            port: 47420,
            backlog: 10,
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            protocols: "secure".into(),
            ciphers: "secure".into(),
            cert: PathBuf::new(),
            key: PathBuf::new(),
        }
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            chunk_serializer_threads: 4,
            source_work_threads: 4,
        }
    }
}

impl Default for ProtoConfig {
    fn default() -> Self {
        Self {
            position_broadcast_interval_ms: 74,
            time_update_interval_secs: 10,
            secs_per_day: 1440,
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            api_base: "http://cubeland-api.test".into(),
            cache_dir: cache_dir(),
        }
    }
}

fn cache_dir() -> PathBuf {
    std::env::var("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp"))
                .join(".cache")
        })
        .join("cubeland")
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ServerConfig {
    /// Load config from a TOML file, then apply env overrides.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let mut config: ServerConfig =
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults plus env overrides — used when no config file is given.
    pub fn from_env() -> Self {
        let mut config = ServerConfig::default();
        config.apply_env_overrides();
        config
    }

    /// Apply CUBELAND_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CUBELAND_LISTEN__PORT") {
            if let Ok(p) = v.parse() {
                self.listen.port = p;
            }
        }
        if let Ok(v) = std::env::var("CUBELAND_LISTEN__BACKLOG") {
            if let Ok(b) = v.parse() {
                self.listen.backlog = b;
            }
        }
        if let Ok(v) = std::env::var("CUBELAND_TLS__CERT") {
            self.tls.cert = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CUBELAND_TLS__KEY") {
            self.tls.key = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CUBELAND_KEYS__API_BASE") {
            self.keys.api_base = v;
        }
        if let Ok(v) = std::env::var("CUBELAND_KEYS__CACHE_DIR") {
            self.keys.cache_dir = PathBuf::from(v);
        }
    }
}
