//! Engine configuration
//!
//! Settings can be built in code with the `with_*` methods or loaded from a
//! TOML file:
//!
//! ```toml
//! debug = false
//! auto_reload = true
//! cache_ttl_secs = 300
//!
//! [[paths]]
//! path = "templates"
//!
//! [[paths]]
//! path = "themes/admin"
//! namespace = "admin"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when loading engine configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// A template directory, optionally bound to a namespace
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchPath {
    pub path: PathBuf,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Surface runtime errors instead of rendering the placeholder
    pub debug: bool,
    /// Reuse compiled artifacts between renders
    pub cache: bool,
    /// Recompile when a template's source is newer than its cached artifact
    pub auto_reload: bool,
    /// Collapse newline-bearing whitespace runs in the final output
    pub collapse_whitespace: bool,
    /// Returned in place of the output when a render fails outside debug mode
    pub placeholder: String,
    pub max_inheritance_depth: usize,
    pub max_include_depth: usize,
    /// Lifetime of cache entries in seconds, fractions allowed; `None` keeps them until flushed
    pub cache_ttl_secs: Option<f64>,
    pub paths: Vec<SearchPath>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debug: false,
            cache: true,
            auto_reload: false,
            collapse_whitespace: true,
            placeholder: "<!-- render error -->".to_string(),
            max_inheritance_depth: 20,
            max_include_depth: 32,
            cache_ttl_secs: None,
            paths: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_auto_reload(mut self, auto_reload: bool) -> Self {
        self.auto_reload = auto_reload;
        self
    }

    pub fn with_collapse_whitespace(mut self, collapse: bool) -> Self {
        self.collapse_whitespace = collapse;
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_secs = Some(ttl.as_secs_f64());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>, namespace: Option<&str>) -> Self {
        self.paths.push(SearchPath {
            path: path.into(),
            namespace: namespace.map(str::to_string),
        });
        self
    }

    /// Negative or non-finite values disable expiry.
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(!config.debug);
        assert!(config.cache);
        assert!(!config.auto_reload);
        assert_eq!(config.max_inheritance_depth, 20);
        assert_eq!(config.max_include_depth, 32);
        assert_eq!(config.cache_ttl(), None);
    }

    #[test]
    fn test_sub_second_ttl() {
        let config = EngineConfig::default().with_cache_ttl(Duration::from_millis(500));
        assert_eq!(config.cache_ttl(), Some(Duration::from_millis(500)));

        let config = EngineConfig::from_str("cache_ttl_secs = 0.25").unwrap();
        assert_eq!(config.cache_ttl(), Some(Duration::from_millis(250)));

        let config = EngineConfig::from_str("cache_ttl_secs = -1.0").unwrap();
        assert_eq!(config.cache_ttl(), None);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
debug = true
auto_reload = true
cache_ttl_secs = 60
placeholder = ""

[[paths]]
path = "templates"

[[paths]]
path = "themes/admin"
namespace = "admin"
"#;
        let config = EngineConfig::from_str(toml).unwrap();
        assert!(config.debug);
        assert!(config.auto_reload);
        assert!(config.cache, "unset keys keep their defaults");
        assert_eq!(config.placeholder, "");
        assert_eq!(config.cache_ttl(), Some(Duration::from_secs(60)));
        assert_eq!(
            config.paths,
            vec![
                SearchPath {
                    path: PathBuf::from("templates"),
                    namespace: None
                },
                SearchPath {
                    path: PathBuf::from("themes/admin"),
                    namespace: Some("admin".to_string())
                },
            ]
        );
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(matches!(
            EngineConfig::from_str("debgu = true"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = EngineConfig::from_file(Path::new("/nonexistent/vellum.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_debug(true)
            .with_cache(false)
            .with_path("views", Some("app"));
        assert!(config.debug);
        assert!(!config.cache);
        assert_eq!(config.paths[0].namespace.as_deref(), Some("app"));
    }
}
