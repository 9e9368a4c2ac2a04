//! Configuration file loader.

use std::path::PathBuf;

use crate::config::DetectorConfig;

/// Configuration loader that searches multiple locations.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Search paths in order of priority.
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default search paths.
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = Vec::new();

        // 1. Current directory: line-detector.toml
        search_paths.push(PathBuf::from("line-detector.toml"));

        // 2. User config directory: ~/.config/line-detector/config.toml
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("line-detector").join("config.toml"));
        }

        Self { search_paths }
    }

    /// Create a config loader with a specific config file path.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            search_paths: vec![path],
        }
    }

    /// Load configuration from the first available file.
    ///
    /// Unlike a policy file there is no usable default here: without a binary
    /// and two pipe paths the supervisor has nothing to drive, so a missing
    /// file is an error rather than a fallback.
    ///
    /// # Errors
    ///
    /// Returns an error if no file exists in the search paths, or if one
    /// exists but cannot be read or parsed.
    pub fn load(&self) -> Result<DetectorConfig, ConfigError> {
        for path in &self.search_paths {
            if path.exists() {
                tracing::debug!(path = %path.display(), "Loading config file");
                return Self::load_from_path(path);
            }
        }

        Err(ConfigError::NotFound {
            searched: self.search_paths.clone(),
        })
    }

    /// Load configuration from a specific path.
    fn load_from_path(path: &PathBuf) -> Result<DetectorConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            source: e,
        })
    }

    /// Get the search paths for debugging.
    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Find the first config file that exists.
    #[must_use]
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths.iter().find(|p| p.exists()).cloned()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No config file found (searched {searched:?})")]
    NotFound { searched: Vec<PathBuf> },

    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            binary = "/opt/rover-cv/rover-cv"
            inbound_pipe = "/tmp/rover-cv.out"
            outbound_pipe = "/tmp/rover-cv.in"
            tolerance_factor = 1.5
            "#,
        )
        .unwrap();

        let config = ConfigLoader::with_path(path).load().unwrap();
        assert!((config.tolerance_factor - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::with_path(dir.path().join("absent.toml"));
        assert!(matches!(loader.load(), Err(ConfigError::NotFound { .. })));
        assert!(loader.find_config_file().is_none());
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "binary = [not toml").unwrap();

        let loader = ConfigLoader::with_path(path);
        assert!(matches!(loader.load(), Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn default_loader_searches_cwd_first() {
        let loader = ConfigLoader::new();
        assert_eq!(
            loader.search_paths().first(),
            Some(&PathBuf::from("line-detector.toml"))
        );
    }
}
