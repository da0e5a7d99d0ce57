use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use crate::compiler::tsconfig::{ParsedConfig, parse_config};
use crate::files::FilesChange;
use crate::system::System;

/// Parses and memoizes the project configuration.
///
/// Each parse replaces the cached [`ParsedConfig`] wholesale; nothing hands
/// out a mutable reference to it.
pub struct ConfigResolver {
    system: Arc<dyn System>,
    config_path: PathBuf,
    overrides: Option<Value>,
    parsed: Option<Arc<ParsedConfig>>,
    parse_count: usize,
}

impl ConfigResolver {
    pub fn new(system: Arc<dyn System>, config_path: PathBuf, overrides: Option<Value>) -> Self {
        Self {
            system,
            config_path,
            overrides,
            parsed: None,
            parse_count: 0,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn overrides(&self) -> Option<&Value> {
        self.overrides.as_ref()
    }

    /// Number of parses so far.
    pub fn parse_count(&self) -> usize {
        self.parse_count
    }

    pub fn get_parsed_config(&mut self, force: bool) -> Arc<ParsedConfig> {
        if !force && let Some(parsed) = &self.parsed {
            return Arc::clone(parsed);
        }
        let parsed = Arc::new(parse_config(
            self.system.as_ref(),
            &self.config_path,
            self.overrides.as_ref(),
        ));
        self.parse_count += 1;
        tracing::debug!(
            config = %self.config_path.display(),
            files = parsed.file_names.len(),
            errors = parsed.errors.len(),
            parses = self.parse_count,
            "config.parsed"
        );
        self.parsed = Some(Arc::clone(&parsed));
        parsed
    }

    pub fn invalidate(&mut self) {
        self.parsed = None;
    }

    /// The configuration file itself was changed or deleted. Content is not
    /// compared: touching the file is enough.
    pub fn did_config_file_changed(&self, change: &FilesChange) -> bool {
        change.touches(&self.config_path)
    }

    /// Reparse and compare the root file names with the previous parse.
    ///
    /// Without a previous parse there is nothing to compare against and the
    /// answer is false.
    pub fn did_root_files_changed(&mut self) -> bool {
        let Some(previous) = self.parsed.as_ref().map(|c| c.root_names_key()) else {
            return false;
        };
        let current = self.get_parsed_config(true);
        previous != current.root_names_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::path::normalize;
    use crate::system::{ControlledSystem, OutputMode};
    use std::fs;

    fn resolver(root: &Path) -> (Arc<ControlledSystem>, ConfigResolver) {
        let system = ControlledSystem::new(OutputMode::Readonly);
        let resolver = ConfigResolver::new(system.clone(), root.join("tsconfig.json"), None);
        (system, resolver)
    }

    #[test]
    fn test_parse_is_memoized_until_forced_or_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        fs::write(root.join("tsconfig.json"), "{}").unwrap();
        fs::write(root.join("a.ts"), "export {};\n").unwrap();
        let (_system, mut resolver) = resolver(&root);

        let first = resolver.get_parsed_config(false);
        let second = resolver.get_parsed_config(false);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.parse_count(), 1);

        resolver.get_parsed_config(true);
        assert_eq!(resolver.parse_count(), 2);
        resolver.invalidate();
        resolver.get_parsed_config(false);
        assert_eq!(resolver.parse_count(), 3);
    }

    #[test]
    fn test_config_change_detection_normalizes_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        let (_system, resolver) = resolver(&root);
        assert!(resolver.did_config_file_changed(&FilesChange::changed([root.join("src/../tsconfig.json")])));
        assert!(resolver.did_config_file_changed(&FilesChange::deleted([root.join("tsconfig.json")])));
        assert!(!resolver.did_config_file_changed(&FilesChange::changed([root.join("a.ts")])));
    }

    #[test]
    fn test_root_file_changes_are_detected_by_reparse() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        fs::write(root.join("tsconfig.json"), r#"{ "include": ["src"] }"#).unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/a.ts"), "export {};\n").unwrap();
        let (system, mut resolver) = resolver(&root);

        assert!(!resolver.did_root_files_changed(), "nothing parsed yet");
        resolver.get_parsed_config(false);
        assert!(!resolver.did_root_files_changed());

        fs::write(root.join("src/b.ts"), "export {};\n").unwrap();
        system.invalidate_cache();
        assert!(resolver.did_root_files_changed());
        assert!(!resolver.did_root_files_changed());
    }
}
