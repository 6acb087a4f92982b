//! Server configuration.

use fedql_runtime::TransportConfig;
use std::time::Duration;

/// Configuration for the query server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Deadline for queries that carry no `use timeout` of their own.
    pub global_query_timeout: Duration,
    /// When set, overrides the per-request `tenant` query argument.
    pub tenant_override: Option<String>,
    /// Outbound transport settings.
    pub transport: TransportConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            global_query_timeout: Duration::from_secs(30),
            tenant_override: None,
            transport: TransportConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Builds a configuration from the environment.
    ///
    /// `TENANT` pins every request to one tenant; `FEDQL_PORT` overrides
    /// the bind port.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(tenant) = std::env::var("TENANT") {
            if !tenant.is_empty() {
                config.tenant_override = Some(tenant);
            }
        }
        if let Some(port) = std::env::var("FEDQL_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
        {
            config.port = port;
        }
        config
    }

    /// Sets the bind port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the global query timeout.
    #[must_use]
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.global_query_timeout = timeout;
        self
    }

    /// Pins every request to one tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant_override = Some(tenant.into());
        self
    }
}
