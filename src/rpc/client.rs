//! Host side of the call bridge.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use super::error::{CallError, WorkerExit};
use super::protocol::{Message, read_message, write_message};

type Reply = oneshot::Sender<Result<Value, CallError>>;

#[derive(Default)]
struct Pending {
    calls: HashMap<u64, Reply>,
    /// Set once the worker is gone; no call is registered after that.
    exit: Option<WorkerExit>,
}

/// Correlation-id call proxy over one worker channel.
pub struct RpcClient {
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Arc<Mutex<Pending>>,
    next_id: AtomicU64,
    kill: Mutex<Option<oneshot::Sender<()>>>,
}

impl RpcClient {
    /// Spawn `program args...` with piped stdio and talk to it.
    pub fn spawn(program: &Path, args: &[String]) -> anyhow::Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| anyhow::anyhow!("failed to spawn worker {}: {err}", program.display()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("worker stdin is not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("worker stdout is not piped"))?;
        tracing::debug!(pid = ?child.id(), "rpc.worker_spawned");

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let exit = async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            match status {
                Ok(status) => WorkerExit::from_status(status),
                Err(err) => {
                    tracing::warn!(%err, "failed to wait for worker");
                    WorkerExit::default()
                }
            }
        };

        let client = Self::connect(stdout, stdin, exit);
        *client.kill.lock() = Some(kill_tx);
        Ok(client)
    }

    /// Talk over arbitrary halves. `exit` resolves once the peer is gone and
    /// is awaited after the reader reaches end of stream.
    pub fn connect<R, W, E>(reader: R, writer: W, exit: E) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        E: Future<Output = WorkerExit> + Send + 'static,
    {
        let (outgoing, mut queue) = mpsc::unbounded_channel::<Message>();
        let pending = Arc::new(Mutex::new(Pending::default()));

        tokio::spawn(async move {
            let mut writer = writer;
            while let Some(message) = queue.recv().await {
                if let Err(err) = write_message(&mut writer, &message).await {
                    tracing::debug!(%err, "rpc.write_failed");
                    break;
                }
            }
        });

        let reader_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            loop {
                match read_message(&mut reader).await {
                    Ok(Some(message)) => settle(&reader_pending, message),
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(%err, "rpc.read_failed");
                        break;
                    }
                }
            }
            let exit = exit.await;
            let outstanding = {
                let mut pending = reader_pending.lock();
                pending.exit = Some(exit);
                std::mem::take(&mut pending.calls)
            };
            tracing::debug!(%exit, outstanding = outstanding.len(), "rpc.worker_exited");
            for (_, reply) in outstanding {
                let _ = reply.send(Err(CallError::WorkerExited(exit)));
            }
        });

        Self {
            outgoing,
            pending,
            next_id: AtomicU64::new(1),
            kill: Mutex::new(None),
        }
    }

    pub async fn call<P, T>(&self, method: &str, params: &P) -> Result<T, CallError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let params =
            serde_json::to_value(params).map_err(|err| CallError::Remote(err.to_string()))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, response) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if let Some(exit) = pending.exit {
                return Err(CallError::Channel(format!("{exit}")));
            }
            pending.calls.insert(id, reply);
        }

        let message = Message::Call {
            id,
            method: method.to_string(),
            params,
        };
        if self.outgoing.send(message).is_err() {
            self.pending.lock().calls.remove(&id);
            return Err(CallError::Channel("writer closed".into()));
        }
        tracing::trace!(id, method, "rpc.call");

        let value = response
            .await
            .map_err(|_| CallError::Channel("response dropped".into()))??;
        serde_json::from_value(value).map_err(|err| CallError::Remote(err.to_string()))
    }

    /// Forcefully terminate a spawned worker. Outstanding calls are rejected
    /// with the resulting exit.
    pub fn kill(&self) {
        if let Some(kill) = self.kill.lock().take() {
            let _ = kill.send(());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.pending.lock().exit.is_some()
    }

    pub fn outstanding(&self) -> usize {
        self.pending.lock().calls.len()
    }
}

fn settle(pending: &Mutex<Pending>, message: Message) {
    let (id, result) = match message {
        Message::Resolve { id, value } => (id, Ok(value)),
        Message::Reject { id, error } => (id, Err(CallError::Remote(error.message))),
        Message::Call { id, method, .. } => {
            tracing::warn!(id, %method, "rpc.unexpected_call_from_worker");
            return;
        }
    };
    match pending.lock().calls.remove(&id) {
        Some(reply) => {
            let _ = reply.send(result);
        }
        None => tracing::warn!(id, "rpc.unknown_response"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::protocol::RemoteError;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf, duplex};

    type PeerReader = BufReader<ReadHalf<DuplexStream>>;

    /// Client wired to an in-memory peer; returns the peer's halves and a
    /// sender that ends the peer with the given exit.
    fn wired() -> (
        RpcClient,
        PeerReader,
        WriteHalf<DuplexStream>,
        oneshot::Sender<WorkerExit>,
    ) {
        let (client_side, worker_side) = duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_side);
        let (worker_read, worker_write) = tokio::io::split(worker_side);
        let (exit_tx, exit_rx) = oneshot::channel::<WorkerExit>();
        let exit = async move { exit_rx.await.unwrap_or_default() };
        let client = RpcClient::connect(client_read, client_write, exit);
        (client, BufReader::new(worker_read), worker_write, exit_tx)
    }

    async fn next_call(reader: &mut PeerReader) -> (u64, String) {
        match read_message(reader).await.unwrap().unwrap() {
            Message::Call { id, method, .. } => (id, method),
            other => panic!("expected a call, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_out_of_order_responses_resolve_their_own_calls() {
        let (client, mut worker_in, mut worker_out, _exit) = wired();
        let client = Arc::new(client);

        let a = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.call::<_, String>("a", &()).await }
        });
        let (id_a, method_a) = next_call(&mut worker_in).await;
        let b = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.call::<_, String>("b", &()).await }
        });
        let (id_b, method_b) = next_call(&mut worker_in).await;
        assert_eq!((method_a.as_str(), method_b.as_str()), ("a", "b"));
        assert!(id_b > id_a);

        write_message(&mut worker_out, &Message::Resolve { id: id_b, value: "B".into() })
            .await
            .unwrap();
        assert_eq!(b.await.unwrap().unwrap(), "B");
        write_message(&mut worker_out, &Message::Resolve { id: id_a, value: "A".into() })
            .await
            .unwrap();
        assert_eq!(a.await.unwrap().unwrap(), "A");
    }

    #[tokio::test]
    async fn test_reject_maps_to_remote_error() {
        let (client, mut worker_in, mut worker_out, _exit) = wired();
        let call = tokio::spawn(async move { client.call::<_, Value>("x", &()).await });
        let (id, _) = next_call(&mut worker_in).await;
        write_message(
            &mut worker_out,
            &Message::Reject {
                id,
                error: RemoteError {
                    message: "boom".into(),
                },
            },
        )
        .await
        .unwrap();
        assert_eq!(call.await.unwrap(), Err(CallError::Remote("boom".into())));
    }

    #[tokio::test]
    async fn test_worker_exit_rejects_outstanding_calls_then_closes() {
        let (client, mut worker_in, worker_out, exit) = wired();
        let client = Arc::new(client);
        let call = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.call::<_, Value>("x", &()).await }
        });
        next_call(&mut worker_in).await;

        let crashed = WorkerExit {
            code: None,
            signal: Some(9),
        };
        exit.send(crashed).unwrap();
        drop(worker_out);
        drop(worker_in);

        assert_eq!(call.await.unwrap(), Err(CallError::WorkerExited(crashed)));
        assert!(client.is_closed());
        let late = client.call::<_, Value>("y", &()).await;
        assert!(matches!(late, Err(CallError::Channel(_))), "{late:?}");
    }
}
