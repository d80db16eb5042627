use std::time::Duration;

/// Port the query server listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 11011;

/// Where and how to open a [`Connection`].
///
/// Use [`ConnectionConfig::builder`] to set timeouts.
///
/// [`Connection`]: crate::Connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Timeout for establishing the TCP connection (default: none).
    pub connect_timeout: Option<Duration>,
    /// Timeout for every read from the socket (default: none).
    pub read_timeout: Option<Duration>,
    /// Timeout for every write to the socket (default: none).
    pub write_timeout: Option<Duration>,
}

impl ConnectionConfig {
    /// Configuration without timeouts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
        }
    }

    /// Creates a builder for configuring timeouts.
    ///
    /// # Examples
    ///
    /// ```
    /// # use brackit::ConnectionConfig;
    /// # use std::time::Duration;
    /// let config = ConnectionConfig::builder("localhost", 11011)
    ///     .connect_timeout(Duration::from_secs(5))
    ///     .read_timeout(Duration::from_secs(30))
    ///     .build();
    /// assert_eq!(config.write_timeout, None);
    /// ```
    pub fn builder(host: impl Into<String>, port: u16) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            config: Self::new(host, port),
        }
    }

    /// The `host:port` pair this configuration points at.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

/// Builder for [`ConnectionConfig`].
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Set TCP connection timeout.
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.config.connect_timeout = Some(duration);
        self
    }

    /// Set socket read timeout. A query producing no output for longer fails and closes the
    /// connection.
    pub fn read_timeout(mut self, duration: Duration) -> Self {
        self.config.read_timeout = Some(duration);
        self
    }

    /// Set socket write timeout.
    pub fn write_timeout(mut self, duration: Duration) -> Self {
        self.config.write_timeout = Some(duration);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_points_at_local_server() {
        let config = ConnectionConfig::default();

        assert_eq!("localhost:11011", config.address());
        assert_eq!(None, config.connect_timeout);
    }

    #[test]
    fn test_builder_sets_timeouts() {
        let config = ConnectionConfig::builder("db.example.org", 4000)
            .connect_timeout(Duration::from_secs(1))
            .read_timeout(Duration::from_secs(2))
            .write_timeout(Duration::from_secs(3))
            .build();

        assert_eq!("db.example.org", config.host);
        assert_eq!(4000, config.port);
        assert_eq!(Some(Duration::from_secs(1)), config.connect_timeout);
        assert_eq!(Some(Duration::from_secs(2)), config.read_timeout);
        assert_eq!(Some(Duration::from_secs(3)), config.write_timeout);
    }
}
