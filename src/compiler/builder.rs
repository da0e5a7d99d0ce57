use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use super::diagnostic::Diagnostic;
use super::host::SourceFile;
use super::program::Program;
use crate::config::DiagnosticOptions;

/// Incremental state carried from one program to the next: semantic
/// diagnostics are cached per file and recomputed only for files that changed
/// and the files importing them directly.
#[derive(Default)]
pub struct Builder {
    versions: HashMap<PathBuf, u64>,
    resolution_keys: HashMap<PathBuf, Vec<Option<PathBuf>>>,
    semantic: HashMap<PathBuf, Vec<Diagnostic>>,
    checked: usize,
}

fn resolution_key(program: &Program, file: &SourceFile) -> Vec<Option<PathBuf>> {
    program
        .resolutions(&file.path)
        .iter()
        .map(|r| r.resolved.target().map(PathBuf::from))
        .collect()
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt `program` as the current program. Returns the affected files.
    pub fn update(&mut self, program: &Program) -> Vec<PathBuf> {
        let mut changed: Vec<PathBuf> = Vec::new();
        let mut current = HashSet::new();

        for file in program.source_files() {
            current.insert(file.path.clone());
            let key = resolution_key(program, file);
            let same_version = self.versions.get(&file.path) == Some(&file.version);
            let same_resolutions = self.resolution_keys.get(&file.path) == Some(&key);
            if !(same_version && same_resolutions) {
                changed.push(file.path.clone());
            }
            self.versions.insert(file.path.clone(), file.version);
            self.resolution_keys.insert(file.path.clone(), key);
        }

        let removed: Vec<PathBuf> = self
            .versions
            .keys()
            .filter(|p| !current.contains(*p))
            .cloned()
            .collect();
        for path in &removed {
            self.versions.remove(path);
            self.resolution_keys.remove(path);
            self.semantic.remove(path);
        }

        let mut affected: Vec<PathBuf> = Vec::new();
        let mut seen = HashSet::new();
        for path in &changed {
            let importers = program.graph().importers_of(path);
            for candidate in std::iter::once(path.clone()).chain(importers) {
                if seen.insert(candidate.clone()) {
                    affected.push(candidate);
                }
            }
        }
        for path in &affected {
            self.semantic.remove(path);
        }
        tracing::debug!(
            changed = changed.len(),
            removed = removed.len(),
            affected = affected.len(),
            "builder.update"
        );
        affected
    }

    pub fn semantic_diagnostics(&mut self, program: &Program, file: &SourceFile) -> Vec<Diagnostic> {
        if let Some(cached) = self.semantic.get(&file.path) {
            return cached.clone();
        }
        let diagnostics = program.semantic_diagnostics(file);
        self.checked += 1;
        self.semantic.insert(file.path.clone(), diagnostics.clone());
        diagnostics
    }

    /// Number of semantic checks actually performed (cache misses).
    pub fn checked_count(&self) -> usize {
        self.checked
    }

    /// Option diagnostics plus every enabled category, for all checked files.
    pub fn collect(&mut self, program: &Program, kinds: DiagnosticOptions) -> Vec<Diagnostic> {
        let mut out = program.options_diagnostics();
        if kinds.global {
            out.extend(program.global_diagnostics());
        }
        for file in program.checked_files() {
            if kinds.syntactic {
                out.extend(program.syntactic_diagnostics(file));
            }
            if kinds.semantic {
                out.extend(self.semantic_diagnostics(program, file));
            }
            if kinds.declaration {
                out.extend(program.declaration_diagnostics(file));
            }
        }
        out
    }
}
