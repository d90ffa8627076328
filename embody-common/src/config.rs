//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file name inside the root folder
pub const CONFIG_FILE_NAME: &str = "embody.toml";

/// Service configuration loaded from `embody.toml` with environment overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP listen port for the scan service
    pub port: u16,
    /// Base URL of the remote analysis service
    pub analysis_url: String,
    /// Base URL of the photo storage gateway
    pub storage_url: String,
    /// Optional tracing filter directive, overrides the built-in default
    pub log_filter: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 5731,
            analysis_url: "http://127.0.0.1:5811".to_string(),
            storage_url: "http://127.0.0.1:5812".to_string(),
            log_filter: None,
        }
    }
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable (EMBODY_ROOT_FOLDER)
/// 3. TOML config file in the OS config directory
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var("EMBODY_ROOT_FOLDER") {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    // Priority 3: TOML config file
    if let Ok(config_path) = locate_os_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(root_folder) = config.get("root_folder").and_then(|v| v.as_str()) {
                    return Ok(PathBuf::from(root_folder));
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    Ok(default_root_folder())
}

/// Get the platform config file path, if one exists
fn locate_os_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("embody").join("config.toml"));

    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/embody/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/embody
        dirs::data_local_dir()
            .map(|d| d.join("embody"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/embody"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/embody
        dirs::data_dir()
            .map(|d| d.join("embody"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/embody"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\embody
        dirs::data_local_dir()
            .map(|d| d.join("embody"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\embody"))
    } else {
        PathBuf::from("./embody_data")
    }
}

/// Load the service configuration for a root folder.
///
/// Resolution order per field, highest priority first:
/// 1. Environment (EMBODY_SCAN_PORT, EMBODY_ANALYSIS_URL, EMBODY_STORAGE_URL)
/// 2. `embody.toml` in the root folder
/// 3. Compiled defaults
///
/// A missing config file is not an error; a malformed one is.
pub fn load_service_config(root_folder: &Path) -> Result<ServiceConfig> {
    let config_path = root_folder.join(CONFIG_FILE_NAME);

    let mut config = if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        toml::from_str::<ServiceConfig>(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", config_path.display(), e)))?
    } else {
        ServiceConfig::default()
    };

    if let Ok(port) = std::env::var("EMBODY_SCAN_PORT") {
        config.port = port
            .parse()
            .map_err(|_| Error::Config(format!("Invalid EMBODY_SCAN_PORT: {}", port)))?;
    }
    if let Ok(url) = std::env::var("EMBODY_ANALYSIS_URL") {
        if !url.is_empty() {
            config.analysis_url = url;
        }
    }
    if let Ok(url) = std::env::var("EMBODY_STORAGE_URL") {
        if !url.is_empty() {
            config.storage_url = url;
        }
    }

    Ok(config)
}

/// Write the default config file on first run so operators have something
/// to edit. Does nothing if the file already exists.
pub fn write_default_config(root_folder: &Path) -> Result<PathBuf> {
    let config_path = root_folder.join(CONFIG_FILE_NAME);
    if config_path.exists() {
        return Ok(config_path);
    }

    std::fs::create_dir_all(root_folder)?;
    let content = toml::to_string_pretty(&ServiceConfig::default())
        .map_err(|e| Error::Config(format!("Failed to serialize default config: {}", e)))?;
    std::fs::write(&config_path, content)?;

    Ok(config_path)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    /// CLI argument wins over everything else
    #[test]
    #[serial]
    fn test_resolve_root_folder_cli_priority() {
        std::env::set_var("EMBODY_ROOT_FOLDER", "/tmp/from-env");
        let resolved = resolve_root_folder(Some("/tmp/from-cli")).unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/from-cli"));
        std::env::remove_var("EMBODY_ROOT_FOLDER");
    }

    /// Environment variable wins when no CLI argument is given
    #[test]
    #[serial]
    fn test_resolve_root_folder_env_priority() {
        std::env::set_var("EMBODY_ROOT_FOLDER", "/tmp/from-env");
        let resolved = resolve_root_folder(None).unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/from-env"));
        std::env::remove_var("EMBODY_ROOT_FOLDER");
    }

    /// Defaults apply when no config file exists
    #[test]
    #[serial]
    fn test_load_service_config_defaults() {
        std::env::remove_var("EMBODY_SCAN_PORT");
        std::env::remove_var("EMBODY_ANALYSIS_URL");
        std::env::remove_var("EMBODY_STORAGE_URL");

        let dir = tempfile::tempdir().unwrap();
        let config = load_service_config(dir.path()).unwrap();
        assert_eq!(config.port, 5731);
        assert!(config.analysis_url.starts_with("http://"));
    }

    /// TOML values load, environment overrides them
    #[test]
    #[serial]
    fn test_load_service_config_toml_and_env() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "port = 6000\nanalysis_url = \"http://analysis.test\"\n",
        )
        .unwrap();

        std::env::remove_var("EMBODY_SCAN_PORT");
        std::env::remove_var("EMBODY_STORAGE_URL");
        std::env::set_var("EMBODY_ANALYSIS_URL", "http://override.test");

        let config = load_service_config(dir.path()).unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.analysis_url, "http://override.test");
        // Unset fields keep their defaults
        assert_eq!(config.storage_url, "http://127.0.0.1:5812");

        std::env::remove_var("EMBODY_ANALYSIS_URL");
    }

    /// Malformed TOML is a config error, not a silent default
    #[test]
    #[serial]
    fn test_load_service_config_malformed() {
        std::env::remove_var("EMBODY_SCAN_PORT");
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "port = \"not a number\"").unwrap();

        let result = load_service_config(dir.path());
        assert!(result.is_err());
    }

    /// First-run write-back creates a parseable default file, second call is a no-op
    #[test]
    #[serial]
    fn test_write_default_config() {
        std::env::remove_var("EMBODY_SCAN_PORT");
        std::env::remove_var("EMBODY_ANALYSIS_URL");
        std::env::remove_var("EMBODY_STORAGE_URL");

        let dir = tempfile::tempdir().unwrap();
        let path = write_default_config(dir.path()).unwrap();
        assert!(path.exists());

        let loaded = load_service_config(dir.path()).unwrap();
        assert_eq!(loaded.port, ServiceConfig::default().port);

        // Editing then re-running write_default_config must not clobber
        std::fs::write(&path, "port = 7000\n").unwrap();
        write_default_config(dir.path()).unwrap();
        let reloaded = load_service_config(dir.path()).unwrap();
        assert_eq!(reloaded.port, 7000);
    }
}
