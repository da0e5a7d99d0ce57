use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use typecheck_worker::system::OutputMode;

/// Incremental TypeScript type-checking worker.
///
/// A build host runs `typecheck-worker worker` as a child process and sends it
/// the file changes it observed; `check` and `deps` drive such a worker once
/// for a single project.
#[derive(Parser, Debug)]
#[command(
    name = "typecheck-worker",
    version,
    about,
    long_about = None,
    propagate_version = true,
)]
pub struct Cli {
    /// Log debug output to stderr (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for issues and dependency snapshots.
#[derive(Clone, Copy, Debug, ValueEnum, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// One line per issue, `file:line:col severity code: message` (default).
    #[default]
    Compact,
    /// Pretty-printed JSON as returned by the worker.
    Json,
}

/// Which compiler outputs may reach the disk.
#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum ModeArg {
    Readonly,
    WriteTsbuildinfo,
    WriteDts,
    WriteReferences,
}

impl From<ModeArg> for OutputMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Readonly => OutputMode::Readonly,
            ModeArg::WriteTsbuildinfo => OutputMode::WriteTsbuildinfo,
            ModeArg::WriteDts => OutputMode::WriteDts,
            ModeArg::WriteReferences => OutputMode::WriteReferences,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve check and dependency calls on stdin/stdout.
    ///
    /// Not meant to be run by hand: the host spawns it and speaks
    /// newline-delimited JSON over its standard streams.
    Worker {
        /// Worker configuration as a JSON object.
        #[arg(long)]
        config: String,
    },

    /// Type-check a project once through a freshly spawned worker.
    ///
    /// Exits with status 1 when any error is reported.
    Check {
        /// Path to the project's tsconfig.json.
        tsconfig: PathBuf,

        /// Build the project and its references as a solution.
        #[arg(long)]
        build: bool,

        /// Which outputs may be written to disk (defaults depend on --build).
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Use the watch strategy, as a host in watch mode would.
        #[arg(long)]
        watch_mode: bool,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Compact)]
        format: OutputFormat,
    },

    /// Print the files and directories a host must watch for a project.
    Deps {
        /// Path to the project's tsconfig.json.
        tsconfig: PathBuf,

        /// Resolve dependencies of the whole solution.
        #[arg(long)]
        build: bool,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Compact)]
        format: OutputFormat,
    },
}
