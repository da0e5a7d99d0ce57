//! Solution builder: one watch program per project of a reference graph,
//! created dependencies first.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use super::diagnostic::Diagnostic;
use super::host::CompilerHost;
use super::tsconfig::{ParsedConfig, parse_config};
use super::watch::{ProgramReporter, WatchProgram};
use crate::config::DiagnosticOptions;
use crate::system::{FileWatcherEventKind, System, TimerId, WatcherHandle};

/// Projects in the order they must be built, plus problems found while
/// walking the reference graph.
#[derive(Debug, Default)]
pub struct BuildOrder {
    pub projects: Vec<Arc<ParsedConfig>>,
    pub errors: Vec<Diagnostic>,
}

impl BuildOrder {
    /// Walk references depth first from `root`. Overrides apply to the root
    /// configuration only.
    pub fn compute(system: &dyn System, root: &Path, overrides: Option<&Value>) -> Self {
        Self::from_root(system, Arc::new(parse_config(system, root, overrides)))
    }

    /// Same walk, starting from an already parsed root configuration.
    pub fn from_root(system: &dyn System, root: Arc<ParsedConfig>) -> Self {
        let mut walk = OrderWalk {
            system,
            visited: HashSet::new(),
            stack: Vec::new(),
            order: BuildOrder::default(),
        };
        walk.visit_config(root);
        walk.order
    }

    pub fn get(&self, config_path: &Path) -> Option<&Arc<ParsedConfig>> {
        self.projects.iter().find(|p| p.config_path == config_path)
    }

    /// Parsed configurations of the projects `config` references.
    pub fn references_of(&self, config: &ParsedConfig) -> Vec<Arc<ParsedConfig>> {
        config
            .references
            .iter()
            .filter_map(|r| self.get(&r.path).cloned())
            .collect()
    }
}

struct OrderWalk<'a> {
    system: &'a dyn System,
    visited: HashSet<PathBuf>,
    stack: Vec<PathBuf>,
    order: BuildOrder,
}

impl OrderWalk<'_> {
    fn visit(&mut self, path: &Path) {
        if let Some(at) = self.stack.iter().position(|p| p == path) {
            let cycle: Vec<String> = self.stack[at..]
                .iter()
                .map(|p| p.display().to_string())
                .chain(std::iter::once(path.display().to_string()))
                .collect();
            self.order.errors.push(Diagnostic::global(
                6202,
                format!(
                    "Project references may not form a circular graph. Cycle detected: {}",
                    cycle.join("\n")
                ),
            ));
            return;
        }
        if self.visited.contains(path) {
            return;
        }
        let config = parse_config(self.system, path, None);
        self.visit_config(Arc::new(config));
    }

    fn visit_config(&mut self, config: Arc<ParsedConfig>) {
        self.visited.insert(config.config_path.clone());
        self.stack.push(config.config_path.clone());
        for reference in &config.references {
            // Missing reference configs are reported by the referencing program.
            if self.system.file_exists(&reference.path) {
                self.visit(&reference.path);
            }
        }
        self.stack.pop();
        self.order.projects.push(config);
    }
}

struct Project {
    config: Arc<ParsedConfig>,
    /// `None` for projects without inputs, such as solution-style roots.
    watch: Option<WatchProgram>,
}

struct SolutionState {
    projects: Vec<Project>,
    config_watchers: HashMap<PathBuf, WatcherHandle>,
    changed_configs: HashSet<PathBuf>,
    pending: Option<TimerId>,
    closed: bool,
}

struct SolutionShared {
    host: Arc<CompilerHost>,
    root: PathBuf,
    overrides: Option<Value>,
    kinds: DiagnosticOptions,
    reporter: ProgramReporter,
    /// Errors of the reference graph itself, reported with the root project.
    solution_errors: Arc<Mutex<Vec<Diagnostic>>>,
    state: Mutex<SolutionState>,
}

pub struct SolutionBuilder {
    shared: Arc<SolutionShared>,
}

impl SolutionBuilder {
    pub fn create(
        host: Arc<CompilerHost>,
        root: &Path,
        overrides: Option<Value>,
        kinds: DiagnosticOptions,
        reporter: ProgramReporter,
    ) -> Self {
        let shared = Arc::new(SolutionShared {
            host,
            root: root.to_path_buf(),
            overrides,
            kinds,
            reporter,
            solution_errors: Arc::new(Mutex::new(Vec::new())),
            state: Mutex::new(SolutionState {
                projects: Vec::new(),
                config_watchers: HashMap::new(),
                changed_configs: HashSet::new(),
                pending: None,
                closed: false,
            }),
        });
        shared.reload();
        Self { shared }
    }

    /// Configuration paths in build order.
    pub fn project_paths(&self) -> Vec<PathBuf> {
        self.shared
            .state
            .lock()
            .projects
            .iter()
            .map(|p| p.config.config_path.clone())
            .collect()
    }

    /// Total builds run across all projects.
    pub fn build_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .projects
            .iter()
            .filter_map(|p| p.watch.as_ref())
            .map(WatchProgram::build_count)
            .sum()
    }

    pub fn program_of(&self, config_path: &Path) -> Option<Arc<super::program::Program>> {
        let state = self.shared.state.lock();
        state
            .projects
            .iter()
            .find(|p| p.config.config_path == config_path)
            .and_then(|p| p.watch.as_ref())
            .and_then(WatchProgram::program)
    }

    /// Push new root names into the root project.
    pub fn update_root_file_names(&self, root_names: Vec<PathBuf>) {
        let state = self.shared.state.lock();
        if let Some(watch) = state
            .projects
            .iter()
            .find(|p| p.config.config_path == self.shared.root)
            .and_then(|p| p.watch.as_ref())
        {
            watch.update_root_file_names(root_names);
        }
    }

    pub fn close(&self) {
        self.shared.close();
    }
}

impl Drop for SolutionBuilder {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl SolutionShared {
    fn close(&self) {
        let (pending, projects, watchers) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.closed = true;
            let watchers: Vec<WatcherHandle> =
                state.config_watchers.drain().map(|(_, h)| h).collect();
            (
                state.pending.take(),
                std::mem::take(&mut state.projects),
                watchers,
            )
        };
        if let Some(id) = pending {
            self.host.system().clear_timeout(id);
        }
        drop(watchers);
        drop(projects);
    }

    fn root_reporter(&self) -> ProgramReporter {
        let root = self.root.clone();
        let errors = Arc::clone(&self.solution_errors);
        let inner = Arc::clone(&self.reporter);
        Arc::new(move |path: &Path, mut diagnostics: Vec<Diagnostic>| {
            if path == root {
                diagnostics.extend(errors.lock().iter().cloned());
            }
            inner(path, diagnostics);
        })
    }

    /// Recompute the build order and bring every project up to date with it.
    /// Runs inline on creation and from a debounced timer afterwards.
    fn reload(self: &Arc<Self>) {
        let system = Arc::clone(self.host.system());
        let order = BuildOrder::compute(system.as_ref(), &self.root, self.overrides.as_ref());
        *self.solution_errors.lock() = order.errors.clone();

        let mut direct_reports = Vec::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.closed {
                return;
            }
            state.pending = None;
            let changed = std::mem::take(&mut state.changed_configs);
            let mut previous: HashMap<PathBuf, Project> = state
                .projects
                .drain(..)
                .map(|p| (p.config.config_path.clone(), p))
                .collect();

            let mut projects = Vec::with_capacity(order.projects.len());
            for config in &order.projects {
                let references = order.references_of(config);
                let project = match previous.remove(&config.config_path) {
                    Some(mut project) => {
                        let config_changed = changed.contains(&config.config_path)
                            || config.extended_paths.iter().any(|e| changed.contains(e))
                            || config.references.iter().any(|r| changed.contains(&r.path));
                        if config_changed {
                            project.watch = self.update_project(project.watch, config, references);
                            project.config = Arc::clone(config);
                        }
                        project
                    }
                    None => Project {
                        watch: self.create_project(config, references),
                        config: Arc::clone(config),
                    },
                };
                if project.watch.is_none() {
                    direct_reports.push(Arc::clone(config));
                }
                projects.push(project);
            }
            tracing::debug!(
                root = %self.root.display(),
                projects = projects.len(),
                dropped = previous.len(),
                "solution.reload"
            );
            state.projects = projects;
            self.sync_config_watchers(state, &order);
        }

        let reporter = self.root_reporter();
        for config in direct_reports {
            reporter(&config.config_path, config.errors.clone());
        }
    }

    fn create_project(
        self: &Arc<Self>,
        config: &Arc<ParsedConfig>,
        references: Vec<Arc<ParsedConfig>>,
    ) -> Option<WatchProgram> {
        if config.file_names.is_empty() {
            return None;
        }
        Some(WatchProgram::create(
            Arc::clone(&self.host),
            Arc::clone(config),
            references,
            self.kinds,
            self.root_reporter(),
        ))
    }

    fn update_project(
        self: &Arc<Self>,
        watch: Option<WatchProgram>,
        config: &Arc<ParsedConfig>,
        references: Vec<Arc<ParsedConfig>>,
    ) -> Option<WatchProgram> {
        match watch {
            Some(watch) if !config.file_names.is_empty() => {
                watch.update_config(Arc::clone(config), references);
                Some(watch)
            }
            _ => self.create_project(config, references),
        }
    }

    /// Watch every project configuration and everything it extends, except
    /// the root configuration itself, whose changes the caller handles.
    fn sync_config_watchers(self: &Arc<Self>, state: &mut SolutionState, order: &BuildOrder) {
        let system = Arc::clone(self.host.system());
        let mut wanted: HashSet<PathBuf> = HashSet::new();
        for config in &order.projects {
            if config.config_path != self.root {
                wanted.insert(config.config_path.clone());
            }
            wanted.extend(config.extended_paths.iter().cloned());
        }

        state.config_watchers.retain(|path, _| wanted.contains(path));
        for path in wanted {
            if state.config_watchers.contains_key(&path) {
                continue;
            }
            let this: Weak<SolutionShared> = Arc::downgrade(self);
            let handle = system.watch_file(
                &path,
                Arc::new(move |path: &Path, _kind: FileWatcherEventKind| {
                    if let Some(shared) = this.upgrade() {
                        shared.on_config_event(path);
                    }
                }),
            );
            state.config_watchers.insert(path, handle);
        }
    }

    fn on_config_event(self: &Arc<Self>, path: &Path) {
        tracing::debug!(path = %path.display(), "solution.config_changed");
        let system = Arc::clone(self.host.system());
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.changed_configs.insert(path.to_path_buf());
        if let Some(id) = state.pending.take() {
            system.clear_timeout(id);
        }
        let this = Arc::downgrade(self);
        state.pending = Some(system.set_timeout(Box::new(move || {
            if let Some(shared) = this.upgrade() {
                shared.reload();
            }
        })));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::path::normalize;
    use crate::system::{ControlledSystem, OutputMode};
    use std::fs;

    type Reports = Arc<Mutex<HashMap<PathBuf, Vec<u32>>>>;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn recording_reporter() -> (Reports, ProgramReporter) {
        let reports: Reports = Arc::new(Mutex::new(HashMap::new()));
        let sink = Arc::clone(&reports);
        let reporter: ProgramReporter = Arc::new(move |path: &Path, diagnostics: Vec<Diagnostic>| {
            sink.lock()
                .insert(path.to_path_buf(), diagnostics.iter().map(|d| d.code).collect());
        });
        (reports, reporter)
    }

    fn solution_fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        write(
            &root,
            "tsconfig.json",
            r#"{ "files": [], "references": [{ "path": "./app" }, { "path": "./lib" }] }"#,
        );
        write(
            &root,
            "lib/tsconfig.json",
            r#"{ "compilerOptions": { "composite": true, "declaration": true, "outDir": "dist" } }"#,
        );
        write(&root, "lib/index.ts", "export const one: number = 1;\n");
        write(
            &root,
            "app/tsconfig.json",
            r#"{ "compilerOptions": { "composite": true }, "references": [{ "path": "../lib" }] }"#,
        );
        write(&root, "app/main.ts", "import { one } from '../lib/index';\nconst s: string = 2;\n");
        (dir, root)
    }

    fn system_for(root: &Path) -> Arc<ControlledSystem> {
        let system = ControlledSystem::new(OutputMode::Readonly);
        system.set_artifacts(crate::files::FilesMatch {
            files: vec![root.join("app/tsconfig.tsbuildinfo")],
            dirs: vec![root.join("lib/dist")],
            excluded: Vec::new(),
            extensions: vec![".d.ts".into(), ".tsbuildinfo".into()],
        });
        system
    }

    #[test]
    fn test_build_order_puts_dependencies_first() {
        let (_dir, root) = solution_fixture();
        let system = system_for(&root);
        let order = BuildOrder::compute(system.as_ref(), &root.join("tsconfig.json"), None);
        let paths: Vec<PathBuf> = order.projects.iter().map(|p| p.config_path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                root.join("lib/tsconfig.json"),
                root.join("app/tsconfig.json"),
                root.join("tsconfig.json"),
            ]
        );
        assert!(order.errors.is_empty());
    }

    #[test]
    fn test_circular_references_are_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        write(&root, "a/tsconfig.json", r#"{ "references": [{ "path": "../b" }] }"#);
        write(&root, "a/a.ts", "export {};\n");
        write(&root, "b/tsconfig.json", r#"{ "references": [{ "path": "../a" }] }"#);
        write(&root, "b/b.ts", "export {};\n");
        let system = ControlledSystem::new(OutputMode::Readonly);

        let order = BuildOrder::compute(system.as_ref(), &root.join("a/tsconfig.json"), None);
        assert_eq!(order.projects.len(), 2);
        assert_eq!(order.errors.len(), 1);
        assert_eq!(order.errors[0].code, 6202);
    }

    #[test]
    fn test_solution_reports_each_project() {
        let (_dir, root) = solution_fixture();
        let system = system_for(&root);
        let host = Arc::new(CompilerHost::new(system.clone()));
        let (reports, reporter) = recording_reporter();

        let solution = SolutionBuilder::create(
            host,
            &root.join("tsconfig.json"),
            None,
            DiagnosticOptions::default(),
            reporter,
        );
        system.wait_for_queued();

        let reports = reports.lock();
        assert_eq!(reports[&root.join("lib/tsconfig.json")], Vec::<u32>::new());
        assert_eq!(reports[&root.join("app/tsconfig.json")], vec![2322]);
        assert_eq!(reports[&root.join("tsconfig.json")], Vec::<u32>::new());
        assert!(solution.program_of(&root.join("tsconfig.json")).is_none());
        assert!(system.file_exists(&root.join("lib/dist/index.d.ts")));
    }

    #[test]
    fn test_sub_project_config_change_rebuilds_that_project() {
        let (_dir, root) = solution_fixture();
        let system = system_for(&root);
        let host = Arc::new(CompilerHost::new(system.clone()));
        let (reports, reporter) = recording_reporter();
        let solution = SolutionBuilder::create(
            host,
            &root.join("tsconfig.json"),
            None,
            DiagnosticOptions::default(),
            reporter,
        );
        system.wait_for_queued();

        write(
            &root,
            "app/tsconfig.json",
            r#"{ "compilerOptions": { "composite": true, "bogus": 1 }, "references": [{ "path": "../lib" }] }"#,
        );
        system.invalidate_cache();
        system.invoke_file_changed(&root.join("app/tsconfig.json"));
        system.wait_for_queued();

        let codes = reports.lock()[&root.join("app/tsconfig.json")].clone();
        assert!(codes.contains(&5023), "{codes:?}");
        assert_eq!(solution.project_paths().len(), 3);
    }
}
