use fifomsg_transport::WaitTimeout;

/// Default for every server and client wait bound.
pub const DEFAULT_TIMEOUT: WaitTimeout = WaitTimeout::from_millis(6000);

/// Server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listen name. `None` selects the platform default.
    pub name: Option<String>,
    /// Close a session that sends no request within this bound.
    pub client_timeout: WaitTimeout,
    /// Bound on each wait for a new connection, after which the
    /// continue-serving predicate is checked again.
    pub connect_timeout: WaitTimeout,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: None,
            client_timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_client_timeout(mut self, timeout: WaitTimeout) -> Self {
        self.client_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: WaitTimeout) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The configured name, or `default` when none was set.
    pub fn name_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(default)
    }
}

/// Client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server name. `None` selects the platform default.
    pub name: Option<String>,
    /// Bound on connecting and on each reply wait.
    pub wait_timeout: WaitTimeout,
    /// Rendezvous suffix for the FIFO backend. `None` derives a unique one
    /// from the process id. Ignored by the named-pipe backend.
    pub suffix: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: None,
            wait_timeout: DEFAULT_TIMEOUT,
            suffix: None,
        }
    }
}

impl ClientConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_wait_timeout(mut self, timeout: WaitTimeout) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    /// The configured name, or `default` when none was set.
    pub fn name_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let server = ServerConfig::default();
        assert_eq!(server.name, None);
        assert_eq!(server.client_timeout.as_millis(), 6000);
        assert_eq!(server.connect_timeout.as_millis(), 6000);

        let client = ClientConfig::default();
        assert_eq!(client.wait_timeout.as_millis(), 6000);
        assert!(client.suffix.is_none());
    }

    #[test]
    fn builders_and_name_fallback() {
        let server = ServerConfig::default()
            .with_name("/tmp/custom")
            .with_client_timeout(WaitTimeout::Infinite)
            .with_connect_timeout(WaitTimeout::from_millis(250));
        assert_eq!(server.name_or("/tmp/fallback"), "/tmp/custom");
        assert!(server.client_timeout.is_infinite());
        assert_eq!(server.connect_timeout.as_millis(), 250);

        let client = ClientConfig::default().with_suffix("abc");
        assert_eq!(client.name_or("/tmp/fallback"), "/tmp/fallback");
        assert_eq!(client.suffix.as_deref(), Some("abc"));
    }
}
