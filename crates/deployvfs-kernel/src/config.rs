//! Runtime configuration.
//!
//! ```toml
//! temp_root = "~/.cache/deployvfs"
//! nested_archives = ["war", "sar", "rar", "jar"]
//! create_attempts = 16
//! delete_retry_ms = 1000
//! track_leaks = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::archive::NestedArchives;
use crate::temp::DEFAULT_CREATE_ATTEMPTS;
use crate::vfs::{VfsError, VfsResult};

/// Environment variable overriding the default temp root.
pub const TEMP_DIR_ENV: &str = "DEPLOYVFS_TEMP_DIR";

/// Library configuration. Every key is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VfsConfig {
    /// Process-wide temp root. `~` and `$VARS` are expanded.
    pub temp_root: String,
    /// Archive extensions flattened into directories during extraction.
    pub nested_archives: Vec<String>,
    /// Collision-retry bound for temp directory creation.
    pub create_attempts: u32,
    /// Delay between background deletion retries, in milliseconds.
    pub delete_retry_ms: u64,
    /// Record creation backtraces of open mount handles.
    pub track_leaks: bool,
}

impl Default for VfsConfig {
    fn default() -> Self {
        let temp_root = std::env::var(TEMP_DIR_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| std::env::temp_dir().join("vfs").to_string_lossy().into_owned());
        Self {
            temp_root,
            nested_archives: NestedArchives::default().extensions().map(str::to_owned).collect(),
            create_attempts: DEFAULT_CREATE_ATTEMPTS,
            delete_retry_ms: 1000,
            track_leaks: cfg!(debug_assertions),
        }
    }
}

impl VfsConfig {
    /// Read and parse a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> VfsResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| VfsError::invalid_argument(format!("{}: {}", path.display(), e)))
    }

    /// Parse TOML text.
    pub fn from_toml_str(text: &str) -> VfsResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| VfsError::invalid_argument(e.to_string()))?;
        if config.create_attempts == 0 {
            return Err(VfsError::invalid_argument("create_attempts must be at least 1"));
        }
        Ok(config)
    }

    /// Use `dir` as the temp root.
    pub fn with_temp_root(mut self, dir: impl AsRef<Path>) -> Self {
        self.temp_root = dir.as_ref().to_string_lossy().into_owned();
        self
    }

    /// Temp root with `~` and environment variables expanded.
    pub fn temp_root(&self) -> VfsResult<PathBuf> {
        let expanded = shellexpand::full(&self.temp_root)
            .map_err(|e| VfsError::invalid_argument(format!("temp_root: {}", e)))?;
        Ok(PathBuf::from(expanded.as_ref()))
    }

    /// Fixed delay between deletion retries.
    pub fn delete_retry_delay(&self) -> Duration {
        Duration::from_millis(self.delete_retry_ms)
    }

    /// Nested-archive extension set.
    pub fn nested(&self) -> NestedArchives {
        NestedArchives::new(self.nested_archives.iter().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VfsConfig::from_toml_str("").unwrap();
        assert_eq!(config.create_attempts, 16);
        assert_eq!(config.delete_retry_delay(), Duration::from_secs(1));
        assert!(config.nested().matches("inner.war"));
        assert!(!config.nested().matches("lib.jar"));
    }

    #[test]
    fn test_parse() {
        let config = VfsConfig::from_toml_str(
            r#"
            temp_root = "/var/tmp/deploy"
            nested_archives = ["jar", "ear"]
            delete_retry_ms = 50
            track_leaks = true
            "#,
        )
        .unwrap();
        assert_eq!(config.temp_root().unwrap(), PathBuf::from("/var/tmp/deploy"));
        assert!(config.nested().matches("lib/x.JAR"));
        assert!(!config.nested().matches("a.war"));
        assert_eq!(config.delete_retry_delay(), Duration::from_millis(50));
        assert!(config.track_leaks);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            VfsConfig::from_toml_str("create_attempts = \"many\""),
            Err(VfsError::InvalidArgument(_))
        ));
        assert!(matches!(
            VfsConfig::from_toml_str("create_attempts = 0"),
            Err(VfsError::InvalidArgument(_))
        ));
        assert!(matches!(
            VfsConfig::from_toml_str("tmp_root = \"/x\""),
            Err(VfsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("vfs.toml");
        std::fs::write(&path, "create_attempts = 4\n").unwrap();
        assert_eq!(VfsConfig::load(&path).unwrap().create_attempts, 4);
        assert!(VfsConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
