use std::path::PathBuf;
use std::sync::Arc;

use super::{Invalidation, RunContext, store_reporter};
use crate::compiler::host::CompilerHost;
use crate::compiler::watch::WatchProgram;

/// A persistent watch program bound to the controlled system. It rebuilds on
/// its own when replayed events reach its watchers.
#[derive(Default)]
pub struct WatchBuild {
    host: Option<Arc<CompilerHost>>,
    watch: Option<WatchProgram>,
}

impl WatchBuild {
    pub fn run(&mut self, ctx: &RunContext<'_>) {
        if self.watch.is_some() {
            return;
        }
        let host = self
            .host
            .get_or_insert_with(|| Arc::new(CompilerHost::new(ctx.system.clone())));
        tracing::debug!(config = %ctx.config.config_path.display(), "strategy.watch.create");
        self.watch = Some(WatchProgram::create(
            Arc::clone(host),
            Arc::clone(ctx.config),
            ctx.references.to_vec(),
            ctx.kinds,
            store_reporter(ctx.diagnostics),
        ));
    }

    pub fn update_root_file_names(&self, root_names: Vec<PathBuf>) {
        if let Some(watch) = &self.watch {
            watch.update_root_file_names(root_names);
        }
    }

    pub fn invalidate(&mut self, level: Invalidation) {
        self.watch = None;
        if level == Invalidation::HostAndProgram {
            self.host = None;
        }
    }

    pub fn is_active(&self) -> bool {
        self.watch.is_some()
    }

    pub fn build_count(&self) -> usize {
        self.watch.as_ref().map_or(0, WatchProgram::build_count)
    }
}
