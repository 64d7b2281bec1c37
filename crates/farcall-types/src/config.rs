//! Configuration loading from `~/.farcall/config.toml` with defaults.
//!
//! Both ends of a call read the same layout: the signing and auth sections
//! must match between caller and dispatcher, the `server` section is only
//! used by the dispatcher and the `connection` section only by callers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// Agent path segment used when none is configured.
pub const DEFAULT_AGENT_NAME: &str = "farcall-agent";

/// Environment variable overriding `signing.secret`.
pub const SECRET_ENV: &str = "FARCALL_SECRET";
/// Environment variable overriding `auth.token`.
pub const TOKEN_ENV: &str = "FARCALL_TOKEN";

/// Digest used inside the HMAC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAlgorithm::Sha256 => write!(f, "sha256"),
            DigestAlgorithm::Sha384 => write!(f, "sha384"),
            DigestAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

/// Envelope signing material, shared out-of-band by both ends.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    pub secret: String,
    pub algorithm: DigestAlgorithm,
}

impl fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningConfig")
            .field("secret", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

/// Transport-level authentication material.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Value expected in the `Auth` header.
    pub token: String,
    /// Valid Basic-auth user/password pairs (dispatcher side).
    pub users: BTreeMap<String, String>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token", &"<redacted>")
            .field("users", &self.users.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Dispatcher listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub agent_name: String,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            agent_name: DEFAULT_AGENT_NAME.to_string(),
            max_body_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Caller-side connection settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// `https` when true, `http` otherwise.
    pub secure: bool,
    pub agent_name: String,
    pub user: String,
    pub pass: String,
    pub connect_timeout_secs: u64,
    /// No request timeout when unset.
    pub request_timeout_secs: Option<u64>,
    /// Known source locations by type name, sent as location hints.
    pub locations: BTreeMap<String, String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 80,
            secure: true,
            agent_name: DEFAULT_AGENT_NAME.to_string(),
            user: String::new(),
            pass: String::new(),
            connect_timeout_secs: 10,
            request_timeout_secs: None,
            locations: BTreeMap::new(),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("agent_name", &self.agent_name)
            .field("user", &self.user)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("locations", &self.locations)
            .finish_non_exhaustive()
    }
}

/// Full process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub log_level: String,
    pub signing: SigningConfig,
    pub auth: AuthConfig,
    pub server: ServerConfig,
    pub connection: ConnectionConfig,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            signing: SigningConfig::default(),
            auth: AuthConfig::default(),
            server: ServerConfig::default(),
            connection: ConnectionConfig::default(),
        }
    }
}

impl RpcConfig {
    /// Replace secret and token with `FARCALL_SECRET` / `FARCALL_TOKEN` when set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides looked up by environment variable name.
    ///
    /// Unset and empty values leave the current setting alone.
    pub fn apply_overrides_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = get(SECRET_ENV).filter(|v| !v.is_empty()) {
            self.signing.secret = secret;
        }
        if let Some(token) = get(TOKEN_ENV).filter(|v| !v.is_empty()) {
            self.auth.token = token;
        }
    }
}

/// Load configuration from a TOML file, with defaults.
///
/// A missing, unreadable or invalid file is logged and replaced by defaults;
/// environment overrides are applied afterwards in every case.
pub fn load_config(path: Option<&Path>) -> RpcConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    let mut config = read_config_file(&config_path).unwrap_or_default();
    config.apply_env_overrides();
    config
}

fn read_config_file(config_path: &Path) -> Option<RpcConfig> {
    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return None;
    }

    let contents = match std::fs::read_to_string(config_path) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            return None;
        }
    };

    match toml::from_str::<RpcConfig>(&contents) {
        Ok(config) => {
            info!(path = %config_path.display(), "Loaded configuration");
            Some(config)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to parse config, using defaults"
            );
            None
        }
    }
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    farcall_home().join("config.toml")
}

/// Get the default Farcall home directory.
pub fn farcall_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".farcall")
}
