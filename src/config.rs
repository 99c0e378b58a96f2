//! Configuration.
//!
//! Read from TOML. Every key is optional:
//!
//! ```toml
//! database_url = "postgres://localhost/webstatus"
//! max_connections = 5
//! default_page_size = 100
//! max_page_size = 1000
//! query_timeout_secs = 30
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LagError, LagResult};

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LagConfig {
    /// Database connection URL
    pub database_url: Option<String>,

    /// Connection pool size
    pub max_connections: u32,

    /// Page size used when a request does not name one
    pub default_page_size: u32,

    /// Largest page size a request may ask for
    pub max_page_size: u32,

    /// Per-page query timeout; `None` waits indefinitely
    pub query_timeout_secs: Option<u64>,
}

impl Default for LagConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
            default_page_size: 100,
            max_page_size: 1000,
            query_timeout_secs: Some(30),
        }
    }
}

impl LagConfig {
    /// Create a new configuration builder
    pub fn builder() -> LagConfigBuilder {
        LagConfigBuilder::default()
    }

    /// Parse and validate TOML.
    pub fn from_toml(source: &str) -> LagResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| LagError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file.
    pub fn load(path: impl AsRef<Path>) -> LagResult<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&source)
    }

    /// Load `featurelag/config.toml` from the user config directory, or the
    /// defaults when there is none.
    pub fn load_default() -> LagResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::debug!(path = %path.display(), "loading config");
                Self::load(path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("featurelag").join("config.toml"))
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> LagResult<()> {
        if self.max_connections == 0 {
            return Err(LagError::Config("max_connections must be positive".into()));
        }
        if self.default_page_size == 0 {
            return Err(LagError::Config("default_page_size must be positive".into()));
        }
        if self.default_page_size > self.max_page_size {
            return Err(LagError::Config(format!(
                "default_page_size {} exceeds max_page_size {}",
                self.default_page_size, self.max_page_size
            )));
        }
        if self.query_timeout_secs == Some(0) {
            return Err(LagError::Config("query_timeout_secs must be positive".into()));
        }
        Ok(())
    }
}

/// Builder for LagConfig
#[derive(Debug, Default)]
pub struct LagConfigBuilder {
    config: LagConfig,
}

impl LagConfigBuilder {
    /// Set the database URL
    pub fn database(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = Some(url.into());
        self
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.config.max_connections = n;
        self
    }

    pub fn default_page_size(mut self, n: u32) -> Self {
        self.config.default_page_size = n;
        self
    }

    pub fn max_page_size(mut self, n: u32) -> Self {
        self.config.max_page_size = n;
        self
    }

    /// Set the per-page query timeout.
    ///
    /// The config keeps whole seconds, so a fractional timeout is rounded
    /// up: 200ms becomes 1s and 1.5s becomes 2s. `Duration::ZERO` stays zero
    /// and fails [`build`](Self::build).
    pub fn query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.query_timeout_secs =
            timeout.map(|t| t.as_secs() + u64::from(t.subsec_nanos() > 0));
        self
    }

    /// Build the configuration
    pub fn build(self) -> LagResult<LagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(LagConfig::from_toml("").unwrap(), LagConfig::default());
    }

    #[test]
    fn test_parse() {
        let config = LagConfig::from_toml(
            r#"
            database_url = "postgres://localhost/webstatus"
            max_page_size = 500
            query_timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/webstatus"));
        assert_eq!(config.max_page_size, 500);
        assert_eq!(config.default_page_size, 100);
        assert_eq!(config.query_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_rejects_unknown_keys_and_bad_values() {
        assert!(LagConfig::from_toml("page_size = 3").is_err());
        assert!(LagConfig::from_toml("max_page_size = 10").is_err());
        assert!(LagConfig::from_toml("max_connections = 0").is_err());
        assert!(LagConfig::from_toml("query_timeout_secs = 0").is_err());
    }

    #[test]
    fn test_builder() {
        let config = LagConfig::builder()
            .database("postgres://db")
            .default_page_size(10)
            .max_page_size(20)
            .query_timeout(None)
            .build()
            .unwrap();
        assert_eq!(config.max_page_size, 20);
        assert_eq!(config.query_timeout(), None);
        assert!(LagConfig::builder().default_page_size(0).build().is_err());
    }

    #[test]
    fn test_builder_rounds_timeout_up() {
        let timeout = |d: Duration| {
            LagConfig::builder()
                .query_timeout(Some(d))
                .build()
                .map(|c| c.query_timeout())
        };
        assert_eq!(timeout(Duration::from_millis(200)).unwrap(), Some(Duration::from_secs(1)));
        assert_eq!(timeout(Duration::from_millis(1500)).unwrap(), Some(Duration::from_secs(2)));
        assert_eq!(timeout(Duration::from_secs(3)).unwrap(), Some(Duration::from_secs(3)));
        assert!(timeout(Duration::ZERO).is_err());
    }
}
