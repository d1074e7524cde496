//! Layered settings for the project model.
//!
//! Sources, later ones winning:
//! - built-in defaults
//! - `.qmaketree/settings.toml`, found by walking up from the current directory
//! - environment variables prefixed with `QMAKETREE_`
//!
//! Nested keys use a double underscore:
//! - `QMAKETREE_EVALUATION__WORKER_THREADS=2` sets `evaluation.worker_threads`
//! - `QMAKETREE_WATCH__DEBOUNCE_MS=250` sets `watch.debounce_ms`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const CONFIG_DIR: &str = ".qmaketree";
pub const ENV_PREFIX: &str = "QMAKETREE_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory holding `.qmaketree`, detected when not set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    #[serde(default)]
    pub evaluation: EvaluationConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub plugins: PluginConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EvaluationConfig {
    /// Threads in the background evaluation pool
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Major Qt version the projects target. Below 5, DEPLOYMENT items
    /// list their files under `.sources` instead of `.files`.
    #[serde(default = "default_qt_major_version")]
    pub qt_major_version: u32,

    /// Shadow build root. Each project builds into the same relative
    /// location below it; in-source builds when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_root: Option<PathBuf>,

    /// Scope names that evaluate true (`unix`, `win32`, ...)
    #[serde(default = "default_platform_scopes")]
    pub platform_scopes: Vec<String>,

    /// Values preloaded into `CONFIG` before each evaluation
    #[serde(default = "default_config_values")]
    pub config: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PluginConfig {
    /// Helper that dumps type info for QML plugins without a qmltypes file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qmldump_path: Option<PathBuf>,

    #[serde(default)]
    pub try_qml_dump: bool,

    /// Pass `-relocatable` to the helper
    #[serde(default)]
    pub relocatable: bool,

    /// Seconds a helper may run before it is killed
    #[serde(default = "default_dump_timeout_secs")]
    pub dump_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Level for every target without an override
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `"qmaketree::watcher" = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_worker_threads() -> usize {
    num_cpus::get().clamp(1, 8)
}
fn default_qt_major_version() -> u32 {
    5
}
fn default_platform_scopes() -> Vec<String> {
    if cfg!(windows) {
        vec!["win32".to_string()]
    } else if cfg!(target_os = "macos") {
        vec!["unix".to_string(), "macx".to_string(), "mac".to_string()]
    } else {
        vec!["unix".to_string(), "linux".to_string()]
    }
}
fn default_config_values() -> Vec<String> {
    vec!["debug".to_string()]
}
fn default_true() -> bool {
    true
}
fn default_debounce_ms() -> u64 {
    200
}
fn default_dump_timeout_secs() -> u64 {
    30
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            workspace_root: None,
            evaluation: EvaluationConfig::default(),
            watch: WatchConfig::default(),
            plugins: PluginConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            qt_major_version: default_qt_major_version(),
            build_root: None,
            platform_scopes: default_platform_scopes(),
            config: default_config_values(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            qmldump_path: None,
            try_qml_dump: false,
            relocatable: false,
            dump_timeout_secs: default_dump_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl EvaluationConfig {
    /// Suffix holding the file list of a DEPLOYMENT item.
    pub fn deployment_files_suffix(&self) -> &'static str {
        if self.qt_major_version < 5 {
            ".sources"
        } else {
            ".files"
        }
    }
}

impl Settings {
    /// Load from defaults, the workspace settings file and the environment.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));

        Self::figment(&config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    /// Load with an explicit settings file instead of the discovered one.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref()).extract().map_err(Box::new)
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join("settings.toml"))
    }

    /// Nearest ancestor of the current directory containing `.qmaketree`.
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Validate the discovered settings file without loading the layers.
    pub fn check_init() -> Result<(), String> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));

        if !config_path.exists() {
            return Err("No configuration file found".to_string());
        }

        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| format!("Cannot read configuration file: {e}"))?;
        toml::from_str::<Settings>(&content).map_err(|e| {
            format!(
                "Configuration file is corrupted: {e}\nRun 'qmaketree init --force' to regenerate."
            )
        })?;
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Write a default settings file below the current directory.
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join("settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        let mut settings = Settings::default();
        if let Ok(current_dir) = std::env::current_dir() {
            settings.workspace_root = Some(current_dir);
        }

        settings.save(&config_path)?;
        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert!(settings.evaluation.worker_threads > 0);
        assert_eq!(settings.evaluation.qt_major_version, 5);
        assert!(settings.watch.enabled);
        assert_eq!(settings.logging.default, "warn");
    }

    #[test]
    fn test_deployment_suffix_follows_qt_version() {
        let mut evaluation = EvaluationConfig::default();
        assert_eq!(evaluation.deployment_files_suffix(), ".files");

        evaluation.qt_major_version = 4;
        assert_eq!(evaluation.deployment_files_suffix(), ".sources");
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
[evaluation]
worker_threads = 3
qt_major_version = 4
build_root = "/tmp/shadow"
platform_scopes = ["win32"]

[watch]
debounce_ms = 50

[logging.modules]
"qmaketree::project" = "trace"
"#;
        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.evaluation.worker_threads, 3);
        assert_eq!(settings.evaluation.qt_major_version, 4);
        assert_eq!(settings.evaluation.build_root, Some(PathBuf::from("/tmp/shadow")));
        assert_eq!(settings.evaluation.platform_scopes, vec!["win32"]);
        assert_eq!(settings.watch.debounce_ms, 50);
        assert!(settings.watch.enabled);
        assert_eq!(settings.logging.modules["qmaketree::project"], "trace");
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.evaluation.worker_threads = 2;
        settings.plugins.try_qml_dump = true;
        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.evaluation.worker_threads, 2);
        assert!(loaded.plugins.try_qml_dump);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[plugins]\nrelocatable = true\n").unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert!(settings.plugins.relocatable);
        assert_eq!(settings.plugins.dump_timeout_secs, 30);
        assert_eq!(settings.watch.debounce_ms, 200);
        assert_eq!(settings.evaluation.config, vec!["debug"]);
    }
}
