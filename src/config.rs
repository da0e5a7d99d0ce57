use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::system::OutputMode;
use crate::system::path::normalize;

pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 2048;

/// Name of the optional per-project defaults file, looked up next to the
/// TypeScript configuration file.
pub const DEFAULTS_FILE_NAME: &str = "typecheck-worker.toml";

/// Which diagnostic categories are collected. Option diagnostics are always
/// collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticOptions {
    pub syntactic: bool,
    pub semantic: bool,
    pub declaration: bool,
    pub global: bool,
}

impl Default for DiagnosticOptions {
    fn default() -> Self {
        Self {
            syntactic: false,
            semantic: true,
            declaration: false,
            global: false,
        }
    }
}

fn default_memory_limit() -> u64 {
    DEFAULT_MEMORY_LIMIT_MB
}

/// Static configuration of one worker process, passed as JSON on its command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    pub config_file: PathBuf,
    /// Directory `config_file` is relative to; the working directory when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<PathBuf>,
    /// Merged into the top-level keys and `compilerOptions` of the parsed configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_overwrite: Option<serde_json::Value>,
    #[serde(default)]
    pub build: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<OutputMode>,
    #[serde(default)]
    pub diagnostic_options: DiagnosticOptions,
    /// Megabytes.
    #[serde(default = "default_memory_limit")]
    pub memory_limit: u64,
    #[serde(default)]
    pub profile: bool,
}

impl WorkerConfig {
    pub fn new(config_file: impl Into<PathBuf>) -> Self {
        Self {
            config_file: config_file.into(),
            context: None,
            config_overwrite: None,
            build: false,
            mode: None,
            diagnostic_options: DiagnosticOptions::default(),
            memory_limit: DEFAULT_MEMORY_LIMIT_MB,
            profile: false,
        }
    }

    /// `write-tsbuildinfo` for solution builds, `readonly` otherwise, unless set.
    pub fn output_mode(&self) -> OutputMode {
        self.mode.unwrap_or_else(|| OutputMode::default_for(self.build))
    }

    pub fn config_path(&self) -> PathBuf {
        match &self.context {
            Some(context) => normalize(&context.join(&self.config_file)),
            None => normalize(&self.config_file),
        }
    }

    /// Overwrite the fields the project defaults file sets. Command-line flags
    /// are applied after this.
    pub fn apply_defaults(&mut self, defaults: &ProjectDefaults) {
        if let Some(build) = defaults.build {
            self.build = build;
        }
        if defaults.mode.is_some() {
            self.mode = defaults.mode;
        }
        if let Some(limit) = defaults.memory_limit {
            self.memory_limit = limit;
        }
        if let Some(profile) = defaults.profile {
            self.profile = profile;
        }
        if let Some(toggles) = &defaults.diagnostics {
            let options = &mut self.diagnostic_options;
            options.syntactic = toggles.syntactic.unwrap_or(options.syntactic);
            options.semantic = toggles.semantic.unwrap_or(options.semantic);
            options.declaration = toggles.declaration.unwrap_or(options.declaration);
            options.global = toggles.global.unwrap_or(options.global);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DiagnosticToggles {
    pub syntactic: Option<bool>,
    pub semantic: Option<bool>,
    pub declaration: Option<bool>,
    pub global: Option<bool>,
}

/// Configuration loaded from `typecheck-worker.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProjectDefaults {
    pub mode: Option<OutputMode>,
    pub build: Option<bool>,
    /// Megabytes.
    pub memory_limit: Option<u64>,
    pub profile: Option<bool>,
    pub diagnostics: Option<DiagnosticToggles>,
}

impl ProjectDefaults {
    /// Load `typecheck-worker.toml` from `dir`.
    ///
    /// Returns the defaults if the file does not exist or cannot be parsed.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(DEFAULTS_FILE_NAME);

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(defaults) => defaults,
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "failed to parse project defaults, using built-in defaults");
                    Self::default()
                }
            },
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "failed to read project defaults, using built-in defaults");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_defaults_from_minimal_json() {
        let config: WorkerConfig =
            serde_json::from_str(r#"{ "configFile": "tsconfig.json" }"#).unwrap();
        assert_eq!(config.memory_limit, 2048);
        assert_eq!(config.diagnostic_options, DiagnosticOptions::default());
        assert!(config.diagnostic_options.semantic);
        assert!(!config.diagnostic_options.syntactic);
        assert_eq!(config.output_mode(), OutputMode::Readonly);
    }

    #[test]
    fn test_build_defaults_to_write_tsbuildinfo() {
        let config: WorkerConfig =
            serde_json::from_str(r#"{ "configFile": "tsconfig.json", "build": true }"#).unwrap();
        assert_eq!(config.output_mode(), OutputMode::WriteTsbuildinfo);

        let config: WorkerConfig = serde_json::from_str(
            r#"{ "configFile": "tsconfig.json", "build": true, "mode": "readonly" }"#,
        )
        .unwrap();
        assert_eq!(config.output_mode(), OutputMode::Readonly);
    }

    #[test]
    fn test_config_path_joins_context() {
        let mut config = WorkerConfig::new("tsconfig.json");
        config.context = Some(PathBuf::from("/p/app"));
        assert_eq!(config.config_path(), PathBuf::from("/p/app/tsconfig.json"));
    }

    #[test]
    fn test_load_missing_defaults_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ProjectDefaults::load(dir.path()), ProjectDefaults::default());
    }

    #[test]
    fn test_load_defaults_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEFAULTS_FILE_NAME),
            "mode = \"write-dts\"\nmemory-limit = 4096\n\n[diagnostics]\nsyntactic = true\n",
        )
        .unwrap();

        let defaults = ProjectDefaults::load(dir.path());
        let mut config = WorkerConfig::new("tsconfig.json");
        config.apply_defaults(&defaults);
        assert_eq!(config.output_mode(), OutputMode::WriteDts);
        assert_eq!(config.memory_limit, 4096);
        assert!(config.diagnostic_options.syntactic);
        assert!(config.diagnostic_options.semantic);
    }

    #[test]
    fn test_invalid_defaults_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DEFAULTS_FILE_NAME), "mode = 42").unwrap();
        assert_eq!(ProjectDefaults::load(dir.path()), ProjectDefaults::default());
    }
}
