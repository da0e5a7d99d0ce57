//! Incremental TypeScript type-checking worker.
//!
//! A build host drives one [`engine::Session`] per worker process through the
//! [`rpc`] bridge, handing it the file changes it observed since the previous
//! call. The worker never watches the disk itself.

pub mod compiler;
pub mod config;
pub mod engine;
pub mod files;
pub mod graph;
pub mod issue;
pub mod parser;
pub mod rpc;
pub mod system;
pub mod walker;
