//! Texture cache configuration.
//!
//! The cache has one real knob, the resident memory budget. The search path
//! list tells the loader where to look for texture files given by a bare
//! name. Configuration can be built programmatically, read from environment
//! variables or loaded from a small `key = value` file.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Budget used when nothing else is configured
pub const DEFAULT_MAX_MEMORY_KB: usize = 16 * 1024;

const ENV_MAX_MEMORY: &str = "TEXCACHE_MAX_MEMORY_KB";
const ENV_SEARCH_PATH: &str = "TEXCACHE_SEARCH_PATH";

/// Configuration for a [`crate::TextureCache`] and [`crate::TextureLoader`]
#[derive(Debug, Clone, PartialEq)]
pub struct TextureCacheConfig {
    /// Resident memory budget in bytes
    pub max_memory: usize,
    /// Directories searched, in order, for relative texture names
    pub search_paths: Vec<PathBuf>,
}

impl Default for TextureCacheConfig {
    fn default() -> Self {
        Self {
            max_memory: DEFAULT_MAX_MEMORY_KB * 1024,
            search_paths: Vec::new(),
        }
    }
}

impl TextureCacheConfig {
    /// Configuration with a budget in kilobytes and no search paths
    pub fn new(max_memory_kb: usize) -> Self {
        Self {
            max_memory: max_memory_kb * 1024,
            search_paths: Vec::new(),
        }
    }

    /// Sets the budget in kilobytes.
    pub fn with_max_memory_kb(mut self, kb: usize) -> Self {
        self.max_memory = kb * 1024;
        self
    }

    /// Appends a search directory.
    pub fn with_search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Budget in kilobytes
    pub fn max_memory_kb(&self) -> usize {
        self.max_memory / 1024
    }

    /// Loads configuration from environment variables.
    ///
    /// - `TEXCACHE_MAX_MEMORY_KB`: budget in KB (default 16384)
    /// - `TEXCACHE_SEARCH_PATH`: search directories, separated like `PATH`
    ///
    /// # Errors
    /// Returns an error if the budget is not a number.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = env::var(ENV_MAX_MEMORY) {
            config.max_memory = parse_kb(ENV_MAX_MEMORY, &val)?;
        }

        if let Some(val) = env::var_os(ENV_SEARCH_PATH) {
            config.search_paths = env::split_paths(&val)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }

        Ok(config)
    }

    /// Loads configuration from a file.
    ///
    /// Expected format:
    /// ```toml
    /// max_memory_kb = 16384
    /// search_path = "/textures"
    /// search_path = "/more/textures"
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or a value is invalid.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for line in toml_str.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches('"');

                match key {
                    "max_memory_kb" => config.max_memory = parse_kb(key, value)?,
                    "search_path" => config.search_paths.push(PathBuf::from(value)),
                    _ => log::debug!("ignoring unknown texture cache option {key}"),
                }
            }
        }

        Ok(config)
    }

    /// Saves configuration to a file readable by [`Self::from_file`].
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml())?;
        Ok(())
    }

    fn to_toml(&self) -> String {
        let mut out = format!(
            "# Texture cache configuration\nmax_memory_kb = {}\n",
            self.max_memory_kb()
        );
        for path in &self.search_paths {
            out.push_str(&format!("search_path = \"{}\"\n", path.display()));
        }
        out
    }
}

fn parse_kb(key: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|kb| kb.checked_mul(1024))
        .ok_or_else(|| ConfigError::InvalidValue(key.to_string()))
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),
    /// I/O error reading or writing configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = TextureCacheConfig::default();
        assert_eq!(config.max_memory, 16384 * 1024);
        assert_eq!(config.max_memory_kb(), DEFAULT_MAX_MEMORY_KB);
        assert!(config.search_paths.is_empty());
    }

    #[test]
    fn test_builder_methods() {
        let config = TextureCacheConfig::new(64)
            .with_max_memory_kb(512)
            .with_search_path("/textures")
            .with_search_path("maps");

        assert_eq!(config.max_memory, 512 * 1024);
        assert_eq!(
            config.search_paths,
            vec![PathBuf::from("/textures"), PathBuf::from("maps")]
        );
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(&[ENV_MAX_MEMORY, ENV_SEARCH_PATH]);

        let paths = env::join_paths(["/a/textures", "/b/textures"]).unwrap();
        env::set_var(ENV_MAX_MEMORY, "2048");
        env::set_var(ENV_SEARCH_PATH, &paths);

        let config = TextureCacheConfig::from_env().unwrap();
        assert_eq!(config.max_memory, 2048 * 1024);
        assert_eq!(
            config.search_paths,
            vec![PathBuf::from("/a/textures"), PathBuf::from("/b/textures")]
        );
    }

    #[test]
    #[serial]
    fn test_from_env_unset_uses_defaults() {
        let _guard = EnvGuard::new(&[ENV_MAX_MEMORY, ENV_SEARCH_PATH]);

        env::remove_var(ENV_MAX_MEMORY);
        env::remove_var(ENV_SEARCH_PATH);

        let config = TextureCacheConfig::from_env().unwrap();
        assert_eq!(config, TextureCacheConfig::default());
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(&[ENV_MAX_MEMORY]);

        env::set_var(ENV_MAX_MEMORY, "lots");
        assert!(matches!(
            TextureCacheConfig::from_env(),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    // Saves and restores environment variables around a test
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), env::var(name).ok()))
                .collect();
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            # Render farm settings
            max_memory_kb = 4096
            search_path = "/show/textures"
            search_path = "/show/shadows"
            unknown = 3
        "#;

        let config = TextureCacheConfig::from_toml(toml).unwrap();
        assert_eq!(config.max_memory, 4096 * 1024);
        assert_eq!(config.search_paths.len(), 2);
    }

    #[test]
    fn test_from_toml_rejects_bad_budget() {
        assert!(TextureCacheConfig::from_toml("max_memory_kb = -1").is_err());
    }

    #[test]
    fn test_file_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("texcache.toml");

        let config = TextureCacheConfig::new(1024).with_search_path("/tmp/textures");
        config.save_to_file(&path).unwrap();

        let loaded = TextureCacheConfig::from_file(&path).unwrap();
        assert_eq!(config, loaded);
    }
}
