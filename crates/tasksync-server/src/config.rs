//! Server configuration.

use std::net::SocketAddr;

/// Header the default authenticator reads the caller's principal from.
pub const DEFAULT_PRINCIPAL_HEADER: &str = "x-principal-id";

/// Configuration for the sync server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address the HTTP boundary listens on.
    pub bind_addr: SocketAddr,
    /// Append every accepted client update to the audit log.
    pub log_updates: bool,
    /// Largest accepted request body, in bytes.
    pub max_body_bytes: usize,
    /// Header carrying the authenticated principal id.
    pub principal_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_updates: true,
            max_body_bytes: 16 * 1024 * 1024,
            principal_header: DEFAULT_PRINCIPAL_HEADER.to_string(),
        }
    }
}

/// Builder for server configuration.
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    pub fn log_updates(mut self, enabled: bool) -> Self {
        self.config.log_updates = enabled;
        self
    }

    pub fn max_body_bytes(mut self, bytes: usize) -> Self {
        self.config.max_body_bytes = bytes;
        self
    }

    pub fn principal_header(mut self, header: impl Into<String>) -> Self {
        self.config.principal_header = header.into();
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
