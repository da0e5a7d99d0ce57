//! The worker-side engine. One [`Session`] per worker process owns the
//! controlled system, the configuration, the diagnostics store and the three
//! program strategies, and turns each host request into one cycle.

pub mod artifacts;
pub mod config;
pub mod diagnostics;
pub mod strategy;

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::compiler::solution::BuildOrder;
use crate::compiler::tsconfig::ParsedConfig;
use crate::config::WorkerConfig;
use crate::files::{FilesChange, FilesMatch};
use crate::issue::Issue;
use crate::system::path::file_name;
use crate::system::{ControlledSystem, System};
use config::ConfigResolver;
use diagnostics::{DiagnosticsStore, config_issues};
use strategy::{Invalidation, RunContext, SingleBuild, SolutionBuild, StrategyKind, WatchBuild};

pub struct Session {
    config: WorkerConfig,
    system: Arc<ControlledSystem>,
    resolver: ConfigResolver,
    diagnostics: Arc<Mutex<DiagnosticsStore>>,
    artifacts: Option<FilesMatch>,
    dependencies: Option<FilesMatch>,
    single: SingleBuild,
    watch: WatchBuild,
    solution: SolutionBuild,
}

impl Session {
    pub fn new(config: WorkerConfig) -> Self {
        let system = ControlledSystem::new(config.output_mode());
        let resolver = ConfigResolver::new(
            system.clone(),
            config.config_path(),
            config.config_overwrite.clone(),
        );
        tracing::info!(
            config = %resolver.config_path().display(),
            mode = %config.output_mode(),
            build = config.build,
            "session.created"
        );
        Self {
            config,
            system,
            resolver,
            diagnostics: Arc::new(Mutex::new(DiagnosticsStore::new())),
            artifacts: None,
            dependencies: None,
            single: SingleBuild::default(),
            watch: WatchBuild::default(),
            solution: SolutionBuild::default(),
        }
    }

    pub fn system(&self) -> &Arc<ControlledSystem> {
        &self.system
    }

    pub fn parse_count(&self) -> usize {
        self.resolver.parse_count()
    }

    /// One check cycle: invalidate what the change makes stale, run the
    /// selected strategy, replay the change and wait for the compiler to
    /// settle.
    pub fn check_for_issues(&mut self, change: &FilesChange, watching: bool) -> Vec<Issue> {
        let mut timer = PhaseTimer::new(self.config.profile);

        self.system.invalidate_cache();
        self.dependencies = None;
        timer.mark("invalidate_caches");

        if self.resolver.did_config_file_changed(change) {
            self.invalidate_config();
        } else if self.resolver.did_root_files_changed() {
            tracing::debug!("session.root_files_changed");
            self.artifacts = None;
            let root_names = self.resolver.get_parsed_config(false).file_names.clone();
            self.watch.update_root_file_names(root_names.clone());
            self.solution.update_root_file_names(root_names);
            self.single.invalidate(Invalidation::Program);
        }
        timer.mark("invalidate_state");

        let config = self.resolver.get_parsed_config(false);
        let order = BuildOrder::from_root(self.system.as_ref(), Arc::clone(&config));
        let artifacts = self
            .artifacts
            .get_or_insert_with(|| artifacts::artifacts(&order.projects))
            .clone();
        self.system.set_artifacts(artifacts);
        timer.mark("artifacts");

        if !config.errors.is_empty() {
            tracing::debug!(errors = config.errors.len(), "session.config_errors");
            return config_issues(&config.errors);
        }

        let references = order.references_of(&config);
        let ctx = RunContext {
            system: &self.system,
            config: &config,
            references: &references,
            overrides: self.resolver.overrides(),
            kinds: self.config.diagnostic_options,
            diagnostics: &self.diagnostics,
        };
        let kind = StrategyKind::select(self.config.build, watching);
        match kind {
            StrategyKind::Single => self.single.run(&ctx),
            StrategyKind::Watch => self.watch.run(&ctx),
            StrategyKind::Solution => self.solution.run(&ctx),
        }
        timer.mark("strategy");

        for path in &change.changed_files {
            self.system.invoke_file_changed(path);
        }
        for path in &change.deleted_files {
            self.system.invoke_file_deleted(path);
        }
        timer.mark("replay");

        let ran = self.system.wait_for_queued();
        timer.mark("drain");

        let issues = self.diagnostics.lock().get_issues();
        tracing::debug!(
            ?kind,
            changed = change.changed_files.len(),
            deleted = change.deleted_files.len(),
            drained = ran,
            issues = issues.len(),
            "session.check"
        );
        issues
    }

    /// Inputs the host has to watch for this project.
    pub fn get_dependencies(&mut self, change: &FilesChange) -> FilesMatch {
        self.system.invalidate_cache();
        if self.resolver.did_config_file_changed(change) {
            self.resolver.invalidate();
            self.dependencies = None;
        } else if self.resolver.did_root_files_changed() {
            self.dependencies = None;
        }

        if let Some(dependencies) = &self.dependencies {
            return dependencies.clone();
        }
        let config = self.resolver.get_parsed_config(false);
        let dependencies = artifacts::dependencies(&self.projects(config));
        self.dependencies = Some(dependencies.clone());
        dependencies
    }

    fn projects(&self, root: Arc<ParsedConfig>) -> Vec<Arc<ParsedConfig>> {
        BuildOrder::from_root(self.system.as_ref(), root).projects
    }

    /// The configuration file changed: nothing derived from it survives.
    fn invalidate_config(&mut self) {
        tracing::info!(
            config = %self.resolver.config_path().display(),
            watch_active = self.watch.is_active(),
            solution_active = self.solution.is_active(),
            "session.config_changed"
        );
        self.delete_stale_build_info();
        self.resolver.invalidate();
        self.artifacts = None;
        self.dependencies = None;
        self.diagnostics.lock().invalidate_diagnostics();
        self.single.invalidate(Invalidation::HostAndProgram);
        self.watch.invalidate(Invalidation::HostAndProgram);
        self.solution.invalidate(Invalidation::HostAndProgram);
    }

    fn delete_stale_build_info(&self) {
        let Some(artifacts) = &self.artifacts else {
            return;
        };
        for path in artifacts
            .files
            .iter()
            .filter(|p| file_name(p).ends_with(".tsbuildinfo"))
        {
            if let Err(err) = self.system.delete_file(path) {
                tracing::warn!(path = %path.display(), %err, "failed to delete stale build info");
            }
        }
    }
}

/// Logs the time spent in each phase of a cycle when profiling is enabled.
struct PhaseTimer {
    enabled: bool,
    started: Instant,
    last: Instant,
}

impl PhaseTimer {
    fn new(enabled: bool) -> Self {
        let now = Instant::now();
        Self {
            enabled,
            started: now,
            last: now,
        }
    }

    fn mark(&mut self, phase: &'static str) {
        if !self.enabled {
            return;
        }
        let now = Instant::now();
        tracing::info!(
            phase,
            elapsed_ms = (now - self.last).as_secs_f64() * 1000.0,
            total_ms = (now - self.started).as_secs_f64() * 1000.0,
            "profile"
        );
        self.last = now;
    }
}
