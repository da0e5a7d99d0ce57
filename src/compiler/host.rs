use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::diagnostic::{DiagnosticFile, LineMap};
use crate::parser::{self, FileAnalysis, is_declaration_file};
use crate::system::System;
use crate::system::path::normalize;

/// A parsed input file. Immutable; a new version is a new `SourceFile`.
#[derive(Debug)]
pub struct SourceFile {
    pub path: PathBuf,
    pub text: Arc<str>,
    pub version: u64,
    pub line_map: Arc<LineMap>,
    pub analysis: FileAnalysis,
    pub is_declaration: bool,
}

impl SourceFile {
    pub fn new(path: PathBuf, text: &str) -> Self {
        let analysis = match parser::analyze(&path, text) {
            Ok(analysis) => analysis,
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "parse failed");
                FileAnalysis::default()
            }
        };
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        Self {
            is_declaration: is_declaration_file(&path),
            version: hasher.finish(),
            line_map: Arc::new(LineMap::new(text)),
            text: Arc::from(text),
            analysis,
            path,
        }
    }

    pub fn diagnostic_file(&self) -> DiagnosticFile {
        DiagnosticFile {
            path: self.path.clone(),
            line_map: Arc::clone(&self.line_map),
        }
    }

    pub fn is_external(&self) -> bool {
        self.path.components().any(|c| c.as_os_str() == "node_modules")
    }
}

/// Compiler view of the system plus a cache of parsed source files.
///
/// Cached files stay valid until evicted; watchers evict on change.
pub struct CompilerHost {
    system: Arc<dyn System>,
    sources: Mutex<HashMap<PathBuf, Arc<SourceFile>>>,
}

impl CompilerHost {
    pub fn new(system: Arc<dyn System>) -> Self {
        Self {
            system,
            sources: Mutex::new(HashMap::new()),
        }
    }

    pub fn system(&self) -> &Arc<dyn System> {
        &self.system
    }

    pub fn get_source_file(&self, path: &Path) -> Option<Arc<SourceFile>> {
        let path = normalize(path);
        if let Some(cached) = self.sources.lock().get(&path) {
            return Some(Arc::clone(cached));
        }
        let text = self.system.read_file(&path)?;
        let source = Arc::new(SourceFile::new(path.clone(), &text));
        self.sources.lock().insert(path, Arc::clone(&source));
        Some(source)
    }

    pub fn evict(&self, path: &Path) -> bool {
        self.sources.lock().remove(&normalize(path)).is_some()
    }

    pub fn clear(&self) {
        self.sources.lock().clear();
    }

    pub fn cached_len(&self) -> usize {
        self.sources.lock().len()
    }

    pub fn file_exists(&self, path: &Path) -> bool {
        self.system.file_exists(path)
    }

    pub fn directory_exists(&self, path: &Path) -> bool {
        self.system.directory_exists(path)
    }

    pub fn read_file(&self, path: &Path) -> Option<String> {
        self.system.read_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{ControlledSystem, OutputMode};

    #[test]
    fn test_sources_are_cached_until_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let file = normalize(&dir.path().join("a.ts"));
        std::fs::write(&file, "export const a = 1;").unwrap();

        let system = ControlledSystem::new(OutputMode::Readonly);
        let host = CompilerHost::new(system.clone());
        let first = host.get_source_file(&file).unwrap();

        std::fs::write(&file, "export const a = 2;").unwrap();
        system.invalidate_cache();
        assert!(Arc::ptr_eq(&first, &host.get_source_file(&file).unwrap()));

        assert!(host.evict(&file));
        let second = host.get_source_file(&file).unwrap();
        assert_ne!(first.version, second.version);
        assert_eq!(&*second.text, "export const a = 2;");
    }

    #[test]
    fn test_missing_file_is_none() {
        let system = ControlledSystem::new(OutputMode::Readonly);
        let host = CompilerHost::new(system);
        assert!(host.get_source_file(Path::new("/nonexistent/a.ts")).is_none());
        assert_eq!(host.cached_len(), 0);
    }
}
