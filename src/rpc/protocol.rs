//! Newline-delimited JSON messages exchanged between host and worker.

use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::files::FilesChange;

pub const CHECK_FOR_ISSUES: &str = "checkForIssues";
pub const GET_DEPENDENCIES: &str = "getDependencies";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Call {
        id: u64,
        method: String,
        #[serde(default)]
        params: Value,
    },
    Resolve {
        id: u64,
        #[serde(default)]
        value: Value,
    },
    Reject {
        id: u64,
        error: RemoteError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckParams {
    #[serde(default)]
    pub change: FilesChange,
    #[serde(default)]
    pub watching: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependenciesParams {
    #[serde(default)]
    pub change: FilesChange,
}

pub async fn write_message<W>(writer: &mut W, message: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}

/// Next message, or `None` at end of stream. Blank lines are skipped.
pub async fn read_message<R>(reader: &mut R) -> io::Result<Option<Message>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        if line.trim().is_empty() {
            continue;
        }
        let message = serde_json::from_str(&line)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        return Ok(Some(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shapes() {
        let call = Message::Call {
            id: 1,
            method: CHECK_FOR_ISSUES.into(),
            params: json!({ "change": { "changedFiles": ["/p/a.ts"] }, "watching": true }),
        };
        assert_eq!(
            serde_json::to_value(&call).unwrap(),
            json!({
                "type": "call",
                "id": 1,
                "method": "checkForIssues",
                "params": { "change": { "changedFiles": ["/p/a.ts"] }, "watching": true }
            })
        );

        let reject: Message =
            serde_json::from_str(r#"{"type":"reject","id":2,"error":{"message":"boom"}}"#).unwrap();
        assert_eq!(
            reject,
            Message::Reject {
                id: 2,
                error: RemoteError {
                    message: "boom".into()
                }
            }
        );
    }

    #[test]
    fn test_check_params_defaults() {
        let params: CheckParams = serde_json::from_value(json!({})).unwrap();
        assert!(params.change.is_empty());
        assert!(!params.watching);
    }

    #[tokio::test]
    async fn test_read_skips_blank_lines_and_stops_at_eof() {
        let input = b"\n{\"type\":\"resolve\",\"id\":3,\"value\":[]}\n\n" as &[u8];
        let mut reader = tokio::io::BufReader::new(input);
        let first = read_message(&mut reader).await.unwrap();
        assert_eq!(
            first,
            Some(Message::Resolve {
                id: 3,
                value: json!([])
            })
        );
        assert_eq!(read_message(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_appends_newline() {
        let mut out = Vec::new();
        write_message(&mut out, &Message::Resolve { id: 1, value: Value::Null })
            .await
            .unwrap();
        assert!(out.ends_with(b"\n"));
        assert_eq!(out.iter().filter(|b| **b == b'\n').count(), 1);
    }
}
