//! Configuration loading and root folder resolution
//!
//! The root folder holds the shared `mscan.db` database plus per-service
//! TOML config files. Resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`MSCAN_ROOT_FOLDER`)
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Compiled platform defaults used when no configuration is present.
///
/// Missing config files must never prevent startup; services degrade to
/// these defaults with a warning.
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let root_folder = if cfg!(target_os = "linux") {
            dirs::data_local_dir()
                .map(|d| d.join("musicscan"))
                .unwrap_or_else(|| PathBuf::from("/var/lib/musicscan"))
        } else if cfg!(target_os = "macos") {
            dirs::data_dir()
                .map(|d| d.join("musicscan"))
                .unwrap_or_else(|| PathBuf::from("/Library/Application Support/musicscan"))
        } else if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .map(|d| d.join("musicscan"))
                .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\musicscan"))
        } else {
            PathBuf::from("./musicscan_data")
        };

        Self {
            root_folder,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

/// Logging configuration section of the per-service TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Per-service TOML configuration file contents
///
/// All fields are optional; absence of the file or of any field falls back
/// to compiled defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder override
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// API key for the external story-generation service
    ///
    /// Durable backup of the database setting; survives database deletion.
    #[serde(default)]
    pub story_api_key: Option<String>,
}

impl TomlConfig {
    /// Load a TOML config file, degrading to defaults when missing or invalid
    pub fn load_or_default(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to parse TOML config, using defaults"
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}

/// Root folder resolver implementing the 4-tier priority order
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
        }
    }

    /// Set a command-line override (highest priority)
    pub fn with_cli_arg(mut self, arg: Option<PathBuf>) -> Self {
        self.cli_arg = arg;
        self
    }

    /// Resolve the root folder
    pub fn resolve(&self) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_arg {
            info!(module = %self.module_name, "Root folder from command line: {}", path.display());
            return path.clone();
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var("MSCAN_ROOT_FOLDER") {
            info!(module = %self.module_name, "Root folder from environment: {}", path);
            return PathBuf::from(path);
        }

        // Priority 3: TOML config file
        if let Some(config_path) = config_file_path(&self.module_name) {
            let config = TomlConfig::load_or_default(&config_path);
            if let Some(root_folder) = config.root_folder {
                info!(
                    module = %self.module_name,
                    "Root folder from {}: {}",
                    config_path.display(),
                    root_folder.display()
                );
                return root_folder;
            }
        }

        // Priority 4: OS-dependent compiled default
        let defaults = CompiledDefaults::for_current_platform();
        info!(
            module = %self.module_name,
            "Root folder from compiled default: {}",
            defaults.root_folder.display()
        );
        defaults.root_folder
    }
}

/// Per-service config file path (`~/.config/musicscan/<module>.toml`)
pub fn config_file_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("musicscan").join(format!("{}.toml", module_name)))
}

/// Root folder initializer: creates the directory tree on first run
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root folder directory if missing
    pub fn ensure_directory_exists(&self) -> crate::Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    /// Path of the shared database inside the root folder
    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join("mscan.db")
    }
}
