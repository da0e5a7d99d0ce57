//! The three ways of obtaining a program and its diagnostics. Exactly one is
//! used per cycle, chosen by [`StrategyKind::select`].

mod single;
mod solution;
mod watch;

pub use single::SingleBuild;
pub use solution::SolutionBuild;
pub use watch::WatchBuild;

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::diagnostics::DiagnosticsStore;
use crate::compiler::diagnostic::Diagnostic;
use crate::compiler::tsconfig::ParsedConfig;
use crate::compiler::watch::ProgramReporter;
use crate::config::DiagnosticOptions;
use crate::system::ControlledSystem;

/// How much of a strategy's state survives an invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Invalidation {
    /// Drop the program, keep the compiler host and its source cache.
    Program,
    /// Drop both.
    HostAndProgram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Single,
    Watch,
    Solution,
}

impl StrategyKind {
    pub fn select(build: bool, watching: bool) -> Self {
        if build {
            StrategyKind::Solution
        } else if watching {
            StrategyKind::Watch
        } else {
            StrategyKind::Single
        }
    }
}

/// Everything a strategy needs for one run.
pub struct RunContext<'a> {
    pub system: &'a Arc<ControlledSystem>,
    pub config: &'a Arc<ParsedConfig>,
    /// Parsed configurations of the projects `config` references directly.
    pub references: &'a [Arc<ParsedConfig>],
    pub overrides: Option<&'a Value>,
    pub kinds: DiagnosticOptions,
    pub diagnostics: &'a Arc<Mutex<DiagnosticsStore>>,
}

/// Reporter writing straight into the diagnostics store.
fn store_reporter(diagnostics: &Arc<Mutex<DiagnosticsStore>>) -> ProgramReporter {
    let store = Arc::clone(diagnostics);
    Arc::new(move |config_path: &Path, diagnostics: Vec<Diagnostic>| {
        store.lock().update_diagnostics(config_path, diagnostics);
    })
}
