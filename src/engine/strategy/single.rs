use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{Invalidation, RunContext};
use crate::compiler::builder::Builder;
use crate::compiler::host::CompilerHost;
use crate::compiler::program::Program;
use crate::compiler::tsconfig::ParsedConfig;
use crate::config::DiagnosticOptions;
use crate::engine::diagnostics::DiagnosticsStore;
use crate::system::{FileWatcherEventKind, System, TimerId, WatcherHandle};

/// One program per invalidation, reused otherwise. Diagnostics are always
/// recomputed from scratch.
#[derive(Default)]
pub struct SingleBuild {
    inner: Option<Arc<SingleInner>>,
}

struct SingleInner {
    host: Arc<CompilerHost>,
    kinds: DiagnosticOptions,
    diagnostics: Arc<Mutex<DiagnosticsStore>>,
    state: Mutex<SingleState>,
}

struct SingleState {
    config: Arc<ParsedConfig>,
    references: Vec<Arc<ParsedConfig>>,
    program: Option<Arc<Program>>,
    watchers: Vec<WatcherHandle>,
    pending: Option<TimerId>,
    programs_created: usize,
}

impl SingleBuild {
    pub fn run(&mut self, ctx: &RunContext<'_>) {
        let inner = self.inner.get_or_insert_with(|| {
            Arc::new(SingleInner {
                host: Arc::new(CompilerHost::new(ctx.system.clone())),
                kinds: ctx.kinds,
                diagnostics: Arc::clone(ctx.diagnostics),
                state: Mutex::new(SingleState {
                    config: Arc::clone(ctx.config),
                    references: ctx.references.to_vec(),
                    program: None,
                    watchers: Vec::new(),
                    pending: None,
                    programs_created: 0,
                }),
            })
        });
        {
            let mut state = inner.state.lock();
            if state.program.is_none() {
                state.config = Arc::clone(ctx.config);
                state.references = ctx.references.to_vec();
            }
        }
        inner.run();
    }

    pub fn invalidate(&mut self, level: Invalidation) {
        match level {
            Invalidation::HostAndProgram => self.inner = None,
            Invalidation::Program => {
                if let Some(inner) = &self.inner {
                    inner.drop_program();
                }
            }
        }
    }

    pub fn program(&self) -> Option<Arc<Program>> {
        self.inner
            .as_ref()
            .and_then(|inner| inner.state.lock().program.clone())
    }

    /// How many programs were created since the host was.
    pub fn programs_created(&self) -> usize {
        self.inner
            .as_ref()
            .map_or(0, |inner| inner.state.lock().programs_created)
    }
}

impl SingleInner {
    fn run(self: &Arc<Self>) {
        let (config_path, diagnostics) = {
            let mut state = self.state.lock();
            state.pending = None;
            let program = match &state.program {
                Some(program) => Arc::clone(program),
                None => {
                    let program = Arc::new(Program::create(
                        Arc::clone(&self.host),
                        Arc::clone(&state.config),
                        state.config.file_names.clone(),
                        &state.references,
                    ));
                    state.programs_created += 1;
                    state.watchers = self.watch_program_files(&program);
                    state.program = Some(Arc::clone(&program));
                    program
                }
            };

            let mut diagnostics = Builder::new().collect(&program, self.kinds);
            let emitted = program.emit(&diagnostics);
            diagnostics.extend(emitted.diagnostics);
            tracing::debug!(
                files = program.source_files().len(),
                diagnostics = diagnostics.len(),
                "strategy.single.run"
            );
            (state.config.config_path.clone(), diagnostics)
        };
        self.diagnostics
            .lock()
            .update_diagnostics(&config_path, diagnostics);
    }

    fn drop_program(&self) {
        let (pending, watchers) = {
            let mut state = self.state.lock();
            state.program = None;
            (state.pending.take(), std::mem::take(&mut state.watchers))
        };
        if let Some(id) = pending {
            self.host.system().clear_timeout(id);
        }
        drop(watchers);
    }

    /// Program files, plus the directories of failed lookups so a module
    /// that appears later gets picked up.
    fn watch_program_files(self: &Arc<Self>, program: &Program) -> Vec<WatcherHandle> {
        let system = Arc::clone(self.host.system());
        let mut watchers: Vec<WatcherHandle> = program
            .source_files()
            .iter()
            .map(|file| {
                let this: Weak<SingleInner> = Arc::downgrade(self);
                system.watch_file(
                    &file.path,
                    Arc::new(move |path: &Path, _kind: FileWatcherEventKind| {
                        if let Some(inner) = this.upgrade() {
                            inner.on_file_event(path);
                        }
                    }),
                )
            })
            .collect();

        let mut lookup_dirs: Vec<PathBuf> = program
            .failed_lookups()
            .iter()
            .filter_map(|p| p.parent().map(Path::to_path_buf))
            .collect();
        lookup_dirs.sort();
        lookup_dirs.dedup();
        watchers.extend(lookup_dirs.into_iter().map(|dir| {
            let this: Weak<SingleInner> = Arc::downgrade(self);
            system.watch_directory(
                &dir,
                Arc::new(move |path: &Path| {
                    if let Some(inner) = this.upgrade() {
                        inner.on_lookup_event(path);
                    }
                }),
                false,
            )
        }));
        watchers
    }

    fn on_lookup_event(self: &Arc<Self>, path: &Path) {
        let failed = self
            .state
            .lock()
            .program
            .as_ref()
            .is_some_and(|p| p.failed_lookups().contains(path));
        if failed {
            self.on_file_event(path);
        }
    }

    /// A program file changed: forget its source, drop the program and run
    /// again before the barrier completes.
    fn on_file_event(self: &Arc<Self>, path: &Path) {
        tracing::trace!(path = %path.display(), "strategy.single.file_event");
        self.host.evict(path);
        let system: Arc<dyn System> = Arc::clone(self.host.system());
        let mut state = self.state.lock();
        state.program = None;
        if let Some(id) = state.pending.take() {
            system.clear_timeout(id);
        }
        let this = Arc::downgrade(self);
        state.pending = Some(system.set_timeout(Box::new(move || {
            if let Some(inner) = this.upgrade() {
                inner.run();
            }
        })));
    }
}
