//! A compact TypeScript compiler: configuration parsing, programs built from
//! tree-sitter analyses, an incremental builder, watch programs and a
//! solution builder across project references.

pub mod builder;
pub mod diagnostic;
pub mod emit;
pub mod host;
pub mod program;
pub mod resolve;
pub mod solution;
pub mod tsconfig;
pub mod watch;

pub use diagnostic::{Diagnostic, DiagnosticCategory, MessageText};
pub use host::CompilerHost;
pub use program::Program;
pub use solution::SolutionBuilder;
pub use tsconfig::{ParsedConfig, parse_config};
pub use watch::{ProgramReporter, WatchProgram};
