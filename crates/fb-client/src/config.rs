//! Client configuration.

use std::time::Duration;

use fb_protocol::{Argument, Dialect};

use crate::error::Error;

pub use fb_codec::TimeoutConfig;

/// Default server port.
pub const DEFAULT_PORT: u16 = 3050;

/// Default number of rows requested per `op_fetch`.
pub const DEFAULT_FETCH_SIZE: u32 = 400;

/// Default connection character set.
pub const DEFAULT_ENCODING: &str = "UTF8";

/// Options sent in the database parameter buffer on attach.
///
/// Options left at their default are not sent, so the server applies its
/// own default. The encoding and dialect are always sent.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ConnectionOptions {
    /// Connection character set (default: `UTF8`).
    pub encoding: String,
    /// Page cache size in pages, `None` for the server default.
    pub page_cache_size: Option<u32>,
    /// User name.
    pub user: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// SQL role.
    pub role: Option<String>,
    /// Client SQL dialect (default: 3).
    pub dialect: Dialect,
    /// Server-side connect timeout, `None` for the server default.
    pub connect_timeout: Option<Duration>,
    /// Extra parameters appended verbatim, in order.
    pub extra_parameters: Vec<Argument>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            encoding: DEFAULT_ENCODING.to_string(),
            page_cache_size: None,
            user: None,
            password: None,
            role: None,
            dialect: Dialect::V3,
            connect_timeout: None,
            extra_parameters: Vec::new(),
        }
    }
}

impl ConnectionOptions {
    /// Create options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection character set.
    #[must_use]
    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }

    /// Set the page cache size.
    #[must_use]
    pub fn page_cache_size(mut self, pages: u32) -> Self {
        self.page_cache_size = Some(pages);
        self
    }

    /// Set user name and password.
    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Set the SQL role.
    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Set the client dialect.
    #[must_use]
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Set the server-side connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Append an extra parameter.
    #[must_use]
    pub fn extra_parameter(mut self, argument: Argument) -> Self {
        self.extra_parameters.push(argument);
        self
    }
}

/// Configuration for connecting to a server.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future releases without breaking semver. Use [`Config::default()`]
/// and the builder methods to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// Server hostname or IP address.
    pub host: String,

    /// Server port (default: 3050).
    pub port: u16,

    /// Database file name or alias.
    pub database: String,

    /// Host name reported in the connect request.
    pub client_host: String,

    /// Attach options.
    pub options: ConnectionOptions,

    /// Transport timeouts.
    pub timeouts: TimeoutConfig,

    /// Rows requested per fetch round trip.
    pub fetch_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            database: String::new(),
            client_host: "localhost".to_string(),
            options: ConnectionOptions::default(),
            timeouts: TimeoutConfig::default(),
            fetch_size: DEFAULT_FETCH_SIZE,
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the database file name or alias.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the host name reported to the server.
    #[must_use]
    pub fn client_host(mut self, host: impl Into<String>) -> Self {
        self.client_host = host.into();
        self
    }

    /// Set the attach options.
    #[must_use]
    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Set user name and password.
    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.options = self.options.credentials(user, password);
        self
    }

    /// Set the timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the fetch size.
    #[must_use]
    pub fn fetch_size(mut self, rows: u32) -> Self {
        self.fetch_size = rows;
        self
    }

    /// Check the configuration for values the protocol cannot carry.
    pub fn validate(&self) -> Result<(), Error> {
        if self.host.is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.database.is_empty() {
            return Err(Error::Config("database must not be empty".into()));
        }
        if self.fetch_size == 0 || i32::try_from(self.fetch_size).is_err() {
            return Err(Error::Config(format!(
                "fetch size {} is out of range",
                self.fetch_size
            )));
        }
        if let Some(pages) = self.options.page_cache_size {
            if i32::try_from(pages).is_err() {
                return Err(Error::Config(format!("page cache size {pages} is too large")));
            }
        }
        if let Some(timeout) = self.options.connect_timeout {
            if i32::try_from(timeout.as_secs()).is_err() {
                return Err(Error::Config(format!(
                    "connect timeout {timeout:?} is too large"
                )));
            }
        }
        if self.options.encoding.is_empty() {
            return Err(Error::Config("encoding must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 3050);
        assert_eq!(config.fetch_size, 400);
        assert_eq!(config.options.encoding, "UTF8");
        assert_eq!(config.options.dialect, Dialect::V3);
        assert!(config.options.page_cache_size.is_none());
        assert_eq!(config.timeouts.connect_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_builder() {
        let config = Config::new()
            .host("db.example.com")
            .port(3051)
            .database("employee")
            .credentials("SYSDBA", "masterkey")
            .fetch_size(50);

        assert_eq!(config.host, "db.example.com");
        assert_eq!(config.port, 3051);
        assert_eq!(config.database, "employee");
        assert_eq!(config.options.user.as_deref(), Some("SYSDBA"));
        assert_eq!(config.options.password.as_deref(), Some("masterkey"));
        assert_eq!(config.fetch_size, 50);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_missing_database() {
        assert!(matches!(Config::new().validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_fetch_size() {
        let config = Config::new().database("db").fetch_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_huge_page_cache() {
        let config = Config::new()
            .database("db")
            .options(ConnectionOptions::new().page_cache_size(u32::MAX));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeouts_builder() {
        let config = Config::new().timeouts(
            TimeoutConfig::new()
                .read_timeout(Duration::from_secs(5))
                .keepalive_interval(Duration::from_secs(1)),
        );
        assert_eq!(config.timeouts.read_timeout, Some(Duration::from_secs(5)));
        assert_eq!(
            config.timeouts.keepalive_interval,
            Some(Duration::from_secs(1))
        );
    }
}
