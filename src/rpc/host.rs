use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use super::client::RpcClient;
use super::error::{Aborted, CallError};
use super::pool::Pool;
use super::protocol::{CHECK_FOR_ISSUES, CheckParams, DependenciesParams, GET_DEPENDENCIES};
use crate::files::{FilesChange, FilesMatch};
use crate::issue::Issue;

#[derive(Default)]
struct Iterations {
    current: u64,
    token: CancellationToken,
    /// Changes not yet delivered to the worker.
    accumulated: FilesChange,
}

/// Host-side driver of one worker process.
///
/// Every call starts a new iteration and cancels the previous one. Calls are
/// chained so at most one is in flight; a call cancelled before it starts
/// leaves its change for the next one, and a result that arrives after a newer
/// iteration began is reported as [`Aborted`].
pub struct WorkerHost {
    client: Arc<RpcClient>,
    pool: Pool,
    chain: tokio::sync::Mutex<()>,
    iterations: Mutex<Iterations>,
}

impl WorkerHost {
    pub fn new(client: RpcClient, pool: Pool) -> Self {
        Self {
            client: Arc::new(client),
            pool,
            chain: tokio::sync::Mutex::new(()),
            iterations: Mutex::new(Iterations::default()),
        }
    }

    pub fn spawn(program: &Path, args: &[String], pool: Pool) -> anyhow::Result<Self> {
        Ok(Self::new(RpcClient::spawn(program, args)?, pool))
    }

    pub fn client(&self) -> &Arc<RpcClient> {
        &self.client
    }

    pub fn iteration(&self) -> u64 {
        self.iterations.lock().current
    }

    pub async fn check_for_issues(
        &self,
        change: FilesChange,
        watching: bool,
    ) -> Result<Vec<Issue>, CallError> {
        self.run(CHECK_FOR_ISSUES, change, |change| CheckParams { change, watching })
            .await
    }

    pub async fn get_dependencies(&self, change: FilesChange) -> Result<FilesMatch, CallError> {
        self.run(GET_DEPENDENCIES, change, |change| DependenciesParams { change })
            .await
    }

    pub fn kill(&self) {
        self.client.kill();
    }

    async fn run<P, T>(
        &self,
        method: &str,
        change: FilesChange,
        params: impl FnOnce(FilesChange) -> P,
    ) -> Result<T, CallError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let (iteration, token) = {
            let mut iterations = self.iterations.lock();
            iterations.token.cancel();
            iterations.token = CancellationToken::new();
            iterations.current += 1;
            iterations.accumulated.merge(change);
            (iterations.current, iterations.token.clone())
        };
        tracing::debug!(iteration, method, "host.iteration_started");

        let _chained = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(iteration, "host.iteration_superseded_while_queued");
                return Err(Aborted.into());
            }
            guard = self.chain.lock() => guard,
        };

        let task = move || async move {
            let change = std::mem::take(&mut self.iterations.lock().accumulated);
            self.client.call::<P, T>(method, &params(change)).await
        };
        let result = self.pool.submit(task, &token).await??;

        if self.iteration() != iteration {
            tracing::debug!(iteration, "host.result_superseded");
            return Err(Aborted.into());
        }
        Ok(result)
    }
}
