//! Worker side of the call bridge: one call at a time, in arrival order.

use std::panic::{AssertUnwindSafe, catch_unwind};

use anyhow::Context;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

use super::protocol::{
    CHECK_FOR_ISSUES, CheckParams, DependenciesParams, GET_DEPENDENCIES, Message, RemoteError,
    read_message, write_message,
};
use crate::engine::Session;

/// Dispatch target of the server loop. Runs on a blocking thread.
pub trait Handler: Send + 'static {
    fn handle(&mut self, method: &str, params: Value) -> anyhow::Result<Value>;
}

impl Handler for Session {
    fn handle(&mut self, method: &str, params: Value) -> anyhow::Result<Value> {
        match method {
            CHECK_FOR_ISSUES => {
                let params: CheckParams =
                    serde_json::from_value(params).context("invalid checkForIssues params")?;
                let issues = self.check_for_issues(&params.change, params.watching);
                Ok(serde_json::to_value(issues)?)
            }
            GET_DEPENDENCIES => {
                let params: DependenciesParams =
                    serde_json::from_value(params).context("invalid getDependencies params")?;
                let dependencies = self.get_dependencies(&params.change);
                Ok(serde_json::to_value(dependencies)?)
            }
            other => anyhow::bail!("unknown method `{other}`"),
        }
    }
}

/// Serve calls until the reader reaches end of stream.
pub async fn serve<R, W, H>(reader: R, mut writer: W, handler: H) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    H: Handler,
{
    let mut reader = BufReader::new(reader);
    let mut handler = handler;
    tracing::info!("worker.ready");

    while let Some(message) = read_message(&mut reader).await.context("reading call")? {
        let (id, method, params) = match message {
            Message::Call { id, method, params } => (id, method, params),
            other => {
                tracing::warn!(message = ?other, "worker.unexpected_message");
                continue;
            }
        };
        tracing::debug!(id, %method, "worker.call");

        let (returned, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(&method, params)));
            (handler, outcome)
        })
        .await
        .context("handler thread failed")?;
        handler = returned;

        let reply = match outcome {
            Ok(Ok(value)) => Message::Resolve { id, value },
            Ok(Err(err)) => {
                tracing::warn!(id, error = %format!("{err:#}"), "worker.call_failed");
                reject(id, format!("{err:#}"))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(id, %message, "worker.call_panicked");
                reject(id, format!("worker panicked: {message}"))
            }
        };
        write_message(&mut writer, &reply)
            .await
            .context("writing reply")?;
    }

    tracing::info!("worker.stdin_closed");
    Ok(())
}

fn reject(id: u64, message: String) -> Message {
    Message::Reject {
        id,
        error: RemoteError { message },
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::client::RpcClient;
    use crate::rpc::error::{CallError, WorkerExit};
    use tokio::io::duplex;

    #[derive(Default)]
    struct Counter {
        calls: u64,
    }

    impl Handler for Counter {
        fn handle(&mut self, method: &str, params: Value) -> anyhow::Result<Value> {
            self.calls += 1;
            match method {
                "count" => Ok(Value::from(self.calls)),
                "echo" => Ok(params),
                "fail" => anyhow::bail!("refused"),
                "panic" => panic!("handler exploded"),
                other => anyhow::bail!("unknown method `{other}`"),
            }
        }
    }

    fn connected() -> RpcClient {
        let (client_side, worker_side) = duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_side);
        let (worker_read, worker_write) = tokio::io::split(worker_side);
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = serve(worker_read, worker_write, Counter::default()).await;
            let _ = done_tx.send(());
        });
        let exit = async move {
            let _ = done_rx.await;
            WorkerExit {
                code: Some(0),
                signal: None,
            }
        };
        RpcClient::connect(client_read, client_write, exit)
    }

    #[tokio::test]
    async fn test_handler_state_persists_across_calls() {
        let client = connected();
        assert_eq!(client.call::<_, u64>("count", &()).await, Ok(1));
        assert_eq!(client.call::<_, u64>("count", &()).await, Ok(2));
        let echoed: Vec<String> = client.call("echo", &vec!["a", "b"]).await.unwrap();
        assert_eq!(echoed, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_errors_and_panics_become_rejections() {
        let client = connected();
        assert_eq!(
            client.call::<_, Value>("fail", &()).await,
            Err(CallError::Remote("refused".into()))
        );
        let panicked = client.call::<_, Value>("panic", &()).await;
        assert!(
            matches!(&panicked, Err(CallError::Remote(m)) if m.contains("handler exploded")),
            "{panicked:?}"
        );
        // The worker keeps serving after a panic.
        assert_eq!(client.call::<_, u64>("count", &()).await, Ok(3));
    }

    #[tokio::test]
    async fn test_session_handles_check_for_issues() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("tsconfig.json"),
            r#"{ "compilerOptions": { "strict": true }, "include": ["src"] }"#,
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/index.ts"),
            "const count: number = 'three';\n",
        )
        .unwrap();

        let mut session = Session::new(crate::config::WorkerConfig::new(
            dir.path().join("tsconfig.json"),
        ));
        let params = serde_json::to_value(CheckParams::default()).unwrap();
        let issues = session.handle(CHECK_FOR_ISSUES, params).unwrap();
        let issues = issues.as_array().unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0]["code"], "TS2322");

        let err = session.handle("nope", Value::Null).unwrap_err();
        assert!(err.to_string().contains("unknown method"));
    }
}
