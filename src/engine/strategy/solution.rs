use std::path::PathBuf;
use std::sync::Arc;

use super::{Invalidation, RunContext, store_reporter};
use crate::compiler::host::CompilerHost;
use crate::compiler::solution::SolutionBuilder;

/// Watch programs for every project of the reference graph.
#[derive(Default)]
pub struct SolutionBuild {
    host: Option<Arc<CompilerHost>>,
    builder: Option<SolutionBuilder>,
}

impl SolutionBuild {
    pub fn run(&mut self, ctx: &RunContext<'_>) {
        if self.builder.is_some() {
            return;
        }
        let host = self
            .host
            .get_or_insert_with(|| Arc::new(CompilerHost::new(ctx.system.clone())));
        tracing::debug!(config = %ctx.config.config_path.display(), "strategy.solution.create");
        self.builder = Some(SolutionBuilder::create(
            Arc::clone(host),
            &ctx.config.config_path,
            ctx.overrides.cloned(),
            ctx.kinds,
            store_reporter(ctx.diagnostics),
        ));
    }

    pub fn update_root_file_names(&self, root_names: Vec<PathBuf>) {
        if let Some(builder) = &self.builder {
            builder.update_root_file_names(root_names);
        }
    }

    pub fn invalidate(&mut self, level: Invalidation) {
        self.builder = None;
        if level == Invalidation::HostAndProgram {
            self.host = None;
        }
    }

    pub fn is_active(&self) -> bool {
        self.builder.is_some()
    }
}
