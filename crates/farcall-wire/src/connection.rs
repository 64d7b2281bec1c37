//! Connection descriptor: where a remote agent lives and how to authenticate.

use base64::Engine;
use farcall_types::config::{ConnectionConfig, RpcConfig, DEFAULT_AGENT_NAME};
use std::collections::BTreeMap;
use std::time::Duration;
use zeroize::Zeroizing;

/// Header carrying the shared static token.
pub const TOKEN_HEADER: &str = "Auth";

/// Endpoint composition rules plus the authentication material sent with
/// every call.
#[derive(Clone)]
pub struct ConnectionDescriptor {
    protocol: &'static str,
    host: String,
    port: u16,
    agent_name: String,
    user: String,
    pass: Zeroizing<String>,
    token: Zeroizing<String>,
    locations: BTreeMap<String, String>,
    connect_timeout: Duration,
    request_timeout: Option<Duration>,
}

impl std::fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("endpoint", &self.endpoint())
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl ConnectionDescriptor {
    /// Descriptor for `agent_name` on `https://localhost:80`, no credentials.
    pub fn make(agent_name: Option<&str>) -> Self {
        let agent_name = agent_name
            .filter(|a| !a.is_empty())
            .unwrap_or(DEFAULT_AGENT_NAME);
        Self {
            protocol: "https",
            host: "localhost".to_string(),
            port: 80,
            agent_name: agent_name.to_string(),
            user: String::new(),
            pass: Zeroizing::new(String::new()),
            token: Zeroizing::new(String::new()),
            locations: BTreeMap::new(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
        }
    }

    /// Build from the `[connection]` section plus the shared `[auth] token`.
    pub fn from_config(config: &RpcConfig) -> Self {
        let conn: &ConnectionConfig = &config.connection;
        let mut descriptor = Self::make(Some(&conn.agent_name))
            .set_host(&conn.host, conn.secure, Some(conn.port))
            .set_auth(&conn.user, &conn.pass)
            .set_token(&config.auth.token)
            .set_timeouts(
                Duration::from_secs(conn.connect_timeout_secs),
                conn.request_timeout_secs.map(Duration::from_secs),
            );
        descriptor.locations = conn.locations.clone();
        descriptor
    }

    /// Basic-auth credentials sent with every call.
    pub fn set_auth(mut self, user: &str, pass: &str) -> Self {
        self.user = user.to_string();
        self.pass = Zeroizing::new(pass.to_string());
        self
    }

    /// Set the host (spaces and slashes trimmed), scheme and optionally port.
    pub fn set_host(mut self, host: &str, secure: bool, port: Option<u16>) -> Self {
        self.host = host.trim_matches(|c| c == ' ' || c == '/').to_string();
        self.protocol = if secure { "https" } else { "http" };
        if let Some(port) = port {
            self.port = port;
        }
        self
    }

    /// Shared token sent in the token header.
    pub fn set_token(mut self, token: &str) -> Self {
        self.token = Zeroizing::new(token.to_string());
        self
    }

    pub fn set_timeouts(mut self, connect: Duration, request: Option<Duration>) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self
    }

    /// Record where a type's source lives, sent as the call's location hint.
    pub fn with_location(mut self, type_name: &str, path: &str) -> Self {
        self.locations.insert(type_name.to_string(), path.to_string());
        self
    }

    /// `{protocol}://{host}:{port}/{agentName}`
    pub fn endpoint(&self) -> String {
        format!(
            "{}://{}:{}/{}",
            self.protocol, self.host, self.port, self.agent_name
        )
    }

    /// Basic credentials plus the shared token header.
    pub fn auth_headers(&self) -> Vec<(&'static str, String)> {
        let credentials = format!("{}:{}", self.user, self.pass.as_str());
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        vec![
            ("Authorization", format!("Basic {encoded}")),
            (TOKEN_HEADER, self.token.to_string()),
        ]
    }

    /// Location recorded for `type_name` with [`Self::with_location`], if any.
    pub fn location_of(&self, type_name: &str) -> Option<&str> {
        self.locations.get(type_name).map(String::as_str)
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Timeout for establishing the TCP connection.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Whole-request timeout. `None` waits indefinitely.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }
}
