//! Cross-process call bridge between a host and its type-checking workers.

pub mod client;
pub mod error;
pub mod host;
pub mod pool;
pub mod protocol;
pub mod server;

pub use client::RpcClient;
pub use error::{Aborted, CallError, WorkerExit};
pub use host::WorkerHost;
pub use pool::Pool;
pub use server::{Handler, serve};
