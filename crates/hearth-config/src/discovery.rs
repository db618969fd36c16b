//! Config file discovery and layered merging.
//!
//! Resolution order (later overrides earlier):
//! 1. `~/.config/hearth/config.toml` (XDG user config)
//! 2. `./hearth.toml` (project-local)

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{ConfigError, HearthConfig, Result};

/// Default config filename for project-local config.
const PROJECT_CONFIG_FILE: &str = "hearth.toml";

/// Default config filename within XDG config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Application name for XDG directory resolution.
const APP_NAME: &str = "hearth";

/// Environment variable to override the config directory.
const CONFIG_DIR_ENV: &str = "HEARTH_CONFIG_DIR";

/// Tracks where each config layer was loaded from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// Path to the config file.
    pub path: PathBuf,
    /// Whether the file was found and loaded.
    pub loaded: bool,
}

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The merged configuration.
    pub config: HearthConfig,
    /// Sources that were checked, lowest precedence first.
    pub sources: Vec<ConfigSource>,
    /// Layers that existed but could not be loaded.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Get paths of sources that were actually loaded.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Load configuration by discovering and merging all config layers.
///
/// The merged result is validated; a broken layer is skipped with a warning
/// but an invalid merged config is an error.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Load configuration with explicit control over the user config directory.
///
/// `config_dir` overrides both `HEARTH_CONFIG_DIR` and the platform default.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let mut config = HearthConfig::new();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    let user_config_path = match config_dir {
        Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
        None => xdg_config_path(),
    };
    if let Some(path) = user_config_path {
        sources.push(load_layer(&mut config, &path, &mut warnings));
    }

    let project_path = project_dir
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    sources.push(load_layer(&mut config, &project_path, &mut warnings));

    config.validate()?;

    Ok(LoadedConfig {
        config,
        sources,
        warnings,
    })
}

/// Load config from a specific file path (no discovery, no validation).
pub fn load_config_file(path: &Path) -> Result<HearthConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    HearthConfig::from_toml(&contents)
}

/// Save configuration to a file, creating parent directories.
pub fn save_config(config: &HearthConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
            path: parent.display().to_string(),
            source: e,
        })?;
    }

    let contents = config.to_toml()?;
    std::fs::write(path, contents).map_err(|e| ConfigError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })
}

/// Path of the user config file.
pub fn xdg_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// User config directory.
///
/// Checks `HEARTH_CONFIG_DIR` first, then falls back to the platform default.
pub fn xdg_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

fn load_layer(config: &mut HearthConfig, path: &Path, warnings: &mut Vec<String>) -> ConfigSource {
    if !path.is_file() {
        return ConfigSource {
            path: path.to_path_buf(),
            loaded: false,
        };
    }

    match load_config_file(path) {
        Ok(layer) => {
            config.merge(layer);
            debug!(path = %path.display(), "Loaded config layer");
            ConfigSource {
                path: path.to_path_buf(),
                loaded: true,
            }
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Skipping unreadable config layer");
            warnings.push(format!("Failed to load {}: {}", path.display(), e));
            ConfigSource {
                path: path.to_path_buf(),
                loaded: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_types::HasSessionConfig;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_xdg_config_path_shape() {
        if let Some(p) = xdg_config_path() {
            assert!(p.ends_with("config.toml"));
        }
    }

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[session]\nmax_sessions = 12\n").unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.max_sessions(), 12);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let err = load_config_file(Path::new("/nonexistent/hearth.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_config_no_files() {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        let loaded = load_config_with_options(Some(project.path()), Some(user.path())).unwrap();
        assert!(loaded.config.session.is_none());
        assert!(loaded.loaded_from().is_empty());
        assert_eq!(loaded.sources.len(), 2);
    }

    #[test]
    fn test_load_config_layered_merge() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        fs::write(
            user.path().join("config.toml"),
            r#"
[session]
max_sessions = 100

[cluster]
node_index = 1
node_count = 2
"#,
        )
        .unwrap();
        fs::write(
            project.path().join("hearth.toml"),
            r#"
[session]
max_sessions = 500
"#,
        )
        .unwrap();

        let loaded = load_config_with_options(Some(project.path()), Some(user.path())).unwrap();
        assert_eq!(loaded.loaded_from().len(), 2);
        assert_eq!(loaded.config.max_sessions(), 500);
        assert_eq!(loaded.config.cluster().node_count, 2);
    }

    #[test]
    fn test_broken_layer_is_skipped() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        fs::write(user.path().join("config.toml"), "[session\n").unwrap();

        let loaded = load_config_with_options(Some(project.path()), Some(user.path())).unwrap();
        assert!(loaded.loaded_from().is_empty());
        assert_eq!(loaded.warnings.len(), 1);
    }

    #[test]
    fn test_invalid_merged_config_rejected() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        fs::write(
            project.path().join("hearth.toml"),
            "[cluster]\nnode_index = 4\nnode_count = 2\n",
        )
        .unwrap();

        let err = load_config_with_options(Some(project.path()), Some(user.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("hearth.toml");
        let config = HearthConfig::from_toml("[session]\ntimeout_mins = 5\n").unwrap();

        save_config(&config, &path).unwrap();
        let reloaded = load_config_file(&path).unwrap();
        assert_eq!(reloaded, config);
    }
}
