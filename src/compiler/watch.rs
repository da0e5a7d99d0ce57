//! Watch program: rebuilds whenever a watched input changes, debounced
//! through the system's timers, keeping builder state between builds.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::builder::Builder;
use super::diagnostic::Diagnostic;
use super::host::CompilerHost;
use super::program::Program;
use super::tsconfig::{ParsedConfig, expand_file_names};
use crate::config::DiagnosticOptions;
use crate::system::{FileWatcherEventKind, TimerId, WatcherHandle};
use crate::walker::matches_specs;

/// Called after every build with the configuration path and the diagnostics
/// of that build.
pub type ProgramReporter = Arc<dyn Fn(&Path, Vec<Diagnostic>) + Send + Sync>;

struct WatchState {
    config: Arc<ParsedConfig>,
    root_names: Vec<PathBuf>,
    references: Vec<Arc<ParsedConfig>>,
    builder: Builder,
    program: Option<Arc<Program>>,
    pending: Option<TimerId>,
    /// Root names must be re-expanded from the file specs before the next build.
    rematch: bool,
    file_watchers: HashMap<PathBuf, WatcherHandle>,
    lookup_watchers: HashMap<PathBuf, WatcherHandle>,
    directory_watchers: Vec<WatcherHandle>,
    builds: usize,
    closed: bool,
}

struct WatchShared {
    host: Arc<CompilerHost>,
    kinds: DiagnosticOptions,
    reporter: ProgramReporter,
    state: Mutex<WatchState>,
}

/// Handle to a running watch program. Dropping it closes every watcher and
/// cancels a pending rebuild.
pub struct WatchProgram {
    shared: Arc<WatchShared>,
}

impl WatchProgram {
    /// Build once and start watching.
    pub fn create(
        host: Arc<CompilerHost>,
        config: Arc<ParsedConfig>,
        references: Vec<Arc<ParsedConfig>>,
        kinds: DiagnosticOptions,
        reporter: ProgramReporter,
    ) -> Self {
        let root_names = config.file_names.clone();
        let shared = Arc::new(WatchShared {
            host,
            kinds,
            reporter,
            state: Mutex::new(WatchState {
                config,
                root_names,
                references,
                builder: Builder::new(),
                program: None,
                pending: None,
                rematch: false,
                file_watchers: HashMap::new(),
                lookup_watchers: HashMap::new(),
                directory_watchers: Vec::new(),
                builds: 0,
                closed: false,
            }),
        });
        shared.watch_wildcard_directories();
        shared.build();
        Self { shared }
    }

    pub fn config(&self) -> Arc<ParsedConfig> {
        Arc::clone(&self.shared.state.lock().config)
    }

    pub fn program(&self) -> Option<Arc<Program>> {
        self.shared.state.lock().program.clone()
    }

    /// Number of builds run so far, the initial one included.
    pub fn build_count(&self) -> usize {
        self.shared.state.lock().builds
    }

    pub fn checked_count(&self) -> usize {
        self.shared.state.lock().builder.checked_count()
    }

    pub fn has_pending_build(&self) -> bool {
        self.shared.state.lock().pending.is_some()
    }

    /// Replace the root file set and schedule a rebuild.
    pub fn update_root_file_names(&self, root_names: Vec<PathBuf>) {
        {
            let mut state = self.shared.state.lock();
            if state.root_names == root_names {
                return;
            }
            state.root_names = root_names;
        }
        self.shared.schedule();
    }

    /// Swap in a re-parsed configuration of the same project.
    pub fn update_config(&self, config: Arc<ParsedConfig>, references: Vec<Arc<ParsedConfig>>) {
        {
            let mut state = self.shared.state.lock();
            state.root_names = config.file_names.clone();
            state.config = config;
            state.references = references;
        }
        self.shared.watch_wildcard_directories();
        self.shared.schedule();
    }

    pub fn close(&self) {
        self.shared.close();
    }
}

impl Drop for WatchProgram {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl WatchShared {
    fn close(&self) {
        let (pending, watchers) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.closed = true;
            let watchers: Vec<WatcherHandle> = state
                .file_watchers
                .drain()
                .chain(state.lookup_watchers.drain())
                .map(|(_, handle)| handle)
                .chain(state.directory_watchers.drain(..))
                .collect();
            (state.pending.take(), watchers)
        };
        if let Some(id) = pending {
            self.host.system().clear_timeout(id);
        }
        drop(watchers);
    }

    fn schedule(self: &Arc<Self>) {
        let system = Arc::clone(self.host.system());
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        if let Some(id) = state.pending.take() {
            system.clear_timeout(id);
        }
        let this: Weak<WatchShared> = Arc::downgrade(self);
        state.pending = Some(system.set_timeout(Box::new(move || {
            if let Some(shared) = this.upgrade() {
                shared.build();
            }
        })));
    }

    fn build(self: &Arc<Self>) {
        let (config_path, diagnostics) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.pending = None;
            if std::mem::take(&mut state.rematch) {
                let names = expand_file_names(self.host.system().as_ref(), &state.config);
                state.root_names = names;
            }
            let program = Arc::new(Program::create(
                Arc::clone(&self.host),
                Arc::clone(&state.config),
                state.root_names.clone(),
                &state.references,
            ));
            let affected = state.builder.update(&program);
            let mut diagnostics = state.builder.collect(&program, self.kinds);
            let emitted = program.emit(&diagnostics);
            diagnostics.extend(emitted.diagnostics);
            tracing::debug!(
                config = %state.config.config_path.display(),
                files = program.source_files().len(),
                affected = affected.len(),
                written = emitted.written.len(),
                "watch.build"
            );

            self.sync_watchers(&mut state, &program);
            state.program = Some(program);
            state.builds += 1;
            (state.config.config_path.clone(), diagnostics)
        };
        (self.reporter)(&config_path, diagnostics);
    }

    /// Watch exactly the current program files, plus the directories of
    /// failed lookups outside the wildcard directories.
    fn sync_watchers(self: &Arc<Self>, state: &mut WatchState, program: &Program) {
        let system = Arc::clone(self.host.system());

        state.file_watchers.retain(|path, _| program.contains(path));
        for file in program.source_files() {
            if state.file_watchers.contains_key(&file.path) {
                continue;
            }
            let this = Arc::downgrade(self);
            let handle = system.watch_file(
                &file.path,
                Arc::new(move |path: &Path, kind: FileWatcherEventKind| {
                    if let Some(shared) = this.upgrade() {
                        shared.on_file_event(path, kind);
                    }
                }),
            );
            state.file_watchers.insert(file.path.clone(), handle);
        }

        let covered = |dir: &Path| {
            state.config.wildcard_directories.iter().any(|w| {
                dir == w.path || (w.recursive && dir.starts_with(&w.path))
            })
        };
        let mut lookup_dirs: Vec<PathBuf> = program
            .failed_lookups()
            .iter()
            .filter_map(|p| p.parent().map(Path::to_path_buf))
            .filter(|d| !covered(d))
            .collect();
        lookup_dirs.sort();
        lookup_dirs.dedup();

        state.lookup_watchers.retain(|dir, _| lookup_dirs.contains(dir));
        for dir in lookup_dirs {
            if state.lookup_watchers.contains_key(&dir) {
                continue;
            }
            let this = Arc::downgrade(self);
            let handle = system.watch_directory(
                &dir,
                Arc::new(move |path: &Path| {
                    if let Some(shared) = this.upgrade() {
                        shared.on_directory_event(path);
                    }
                }),
                false,
            );
            state.lookup_watchers.insert(dir, handle);
        }
    }

    fn watch_wildcard_directories(self: &Arc<Self>) {
        let system = Arc::clone(self.host.system());
        let mut state = self.state.lock();
        let directories = state.config.wildcard_directories.clone();
        state.directory_watchers = directories
            .into_iter()
            .map(|dir| {
                let this = Arc::downgrade(self);
                system.watch_directory(
                    &dir.path,
                    Arc::new(move |path: &Path| {
                        if let Some(shared) = this.upgrade() {
                            shared.on_directory_event(path);
                        }
                    }),
                    dir.recursive,
                )
            })
            .collect();
    }

    fn on_file_event(self: &Arc<Self>, path: &Path, kind: FileWatcherEventKind) {
        tracing::trace!(path = %path.display(), ?kind, "watch.file_event");
        if kind == FileWatcherEventKind::Deleted {
            self.state.lock().rematch = true;
        }
        self.host.evict(path);
        self.schedule();
    }

    /// Rebuild only for entries that can affect the program: program files,
    /// root file candidates and previously failed lookups. Generated outputs
    /// landing in a watched directory are ignored.
    fn on_directory_event(self: &Arc<Self>, path: &Path) {
        let relevant = {
            let mut state = self.state.lock();
            let is_program_file = state
                .program
                .as_ref()
                .is_some_and(|p| p.contains(path) || p.failed_lookups().contains(path));
            let is_root_candidate = matches_specs(&state.config.file_specs, path);
            if is_root_candidate && !state.root_names.iter().any(|r| r == path) {
                state.rematch = true;
            }
            is_program_file || is_root_candidate
        };
        if relevant {
            tracing::trace!(path = %path.display(), "watch.directory_event");
            self.host.evict(path);
            self.schedule();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::tsconfig::parse_config;
    use crate::system::path::normalize;
    use crate::system::{ControlledSystem, OutputMode};
    use std::fs;

    type Reports = Arc<Mutex<Vec<(PathBuf, Vec<u32>)>>>;

    fn recording_reporter() -> (Reports, ProgramReporter) {
        let reports: Reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let reporter: ProgramReporter = Arc::new(move |path: &Path, diagnostics: Vec<Diagnostic>| {
            sink.lock()
                .push((path.to_path_buf(), diagnostics.iter().map(|d| d.code).collect()));
        });
        (reports, reporter)
    }

    fn setup(files: &[(&str, &str)]) -> (tempfile::TempDir, PathBuf, Arc<ControlledSystem>) {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        for (rel, content) in files {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        (dir, root, ControlledSystem::new(OutputMode::Readonly))
    }

    fn start(root: &Path, system: &Arc<ControlledSystem>, reporter: ProgramReporter) -> WatchProgram {
        let config = Arc::new(parse_config(system.as_ref(), &root.join("tsconfig.json"), None));
        let host = Arc::new(CompilerHost::new(system.clone()));
        WatchProgram::create(host, config, Vec::new(), DiagnosticOptions::default(), reporter)
    }

    #[test]
    fn test_initial_build_reports_immediately() {
        let (_dir, root, system) = setup(&[
            ("tsconfig.json", "{}"),
            ("a.ts", "const a: number = 'x';\n"),
        ]);
        let (reports, reporter) = recording_reporter();
        let watch = start(&root, &system, reporter);
        assert_eq!(watch.build_count(), 1);
        assert_eq!(reports.lock().clone(), vec![(root.join("tsconfig.json"), vec![2322])]);
    }

    #[test]
    fn test_change_rebuilds_once_after_drain() {
        let (_dir, root, system) = setup(&[
            ("tsconfig.json", "{}"),
            ("a.ts", "const a: number = 'x';\n"),
        ]);
        let (reports, reporter) = recording_reporter();
        let watch = start(&root, &system, reporter);

        fs::write(root.join("a.ts"), "const a: number = 1;\n").unwrap();
        system.invalidate_cache();
        system.invoke_file_changed(&root.join("a.ts"));
        system.invoke_file_changed(&root.join("a.ts"));
        assert!(watch.has_pending_build());
        system.wait_for_queued();

        assert_eq!(watch.build_count(), 2, "debounced into one rebuild");
        assert_eq!(reports.lock().last().unwrap().1, Vec::<u32>::new());
    }

    #[test]
    fn test_new_file_fixes_failed_import() {
        let (_dir, root, system) = setup(&[
            ("tsconfig.json", r#"{ "files": ["src/main.ts"] }"#),
            ("src/main.ts", "import { x } from './later';\n"),
        ]);
        let (reports, reporter) = recording_reporter();
        let watch = start(&root, &system, reporter);
        assert_eq!(reports.lock().last().unwrap().1, vec![2307]);

        fs::write(root.join("src/later.ts"), "export const x = 1;\n").unwrap();
        system.invalidate_cache();
        system.invoke_file_created(&root.join("src/later.ts"));
        system.wait_for_queued();

        assert_eq!(watch.build_count(), 2);
        assert!(reports.lock().last().unwrap().1.is_empty());
    }

    #[test]
    fn test_unrelated_directory_entries_are_ignored() {
        let (_dir, root, system) = setup(&[("tsconfig.json", "{}"), ("a.ts", "export {};\n")]);
        let (_reports, reporter) = recording_reporter();
        let watch = start(&root, &system, reporter);

        system.invoke_file_created(&root.join("notes.md"));
        system.invoke_file_created(&root.join("node_modules/x/index.ts"));
        system.wait_for_queued();
        assert_eq!(watch.build_count(), 1);
    }

    #[test]
    fn test_update_root_file_names() {
        let (_dir, root, system) = setup(&[
            ("tsconfig.json", "{}"),
            ("a.ts", "export {};\n"),
            ("b.ts", "const b: string = 1;\n"),
        ]);
        let (reports, reporter) = recording_reporter();
        let watch = start(&root, &system, reporter);
        assert_eq!(reports.lock().last().unwrap().1, vec![2322]);

        watch.update_root_file_names(vec![root.join("a.ts")]);
        system.wait_for_queued();
        assert!(reports.lock().last().unwrap().1.is_empty());
    }

    #[test]
    fn test_drop_closes_watchers_and_pending_build() {
        let (_dir, root, system) = setup(&[("tsconfig.json", "{}"), ("a.ts", "export {};\n")]);
        let (_reports, reporter) = recording_reporter();
        let watch = start(&root, &system, reporter);
        assert!(system.watcher_count() > 0);

        system.invoke_file_changed(&root.join("a.ts"));
        assert_eq!(system.pending_timers(), 1);
        drop(watch);
        assert_eq!(system.watcher_count(), 0);
        assert_eq!(system.pending_timers(), 0);
    }
}
