//! Stdio transport: a subprocess speaking newline-delimited JSON-RPC over its
//! stdin/stdout, framed one request/response object per line.

use super::{Transport, TransportError};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// A spawned child-process MCP server. The reader task lives as long as this
/// struct; dropping it kills the child.
pub struct StdioTransport {
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<tokio::process::ChildStdin>>,
    pending: PendingMap,
    reader_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl StdioTransport {
    pub fn new(command: impl Into<String>, args: Vec<String>, env: HashMap<String, String>) -> Self {
        Self {
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            reader_task: Mutex::new(None),
            command: command.into(),
            args,
            env,
        }
    }

    async fn ensure_spawned(&self) -> Result<(), TransportError> {
        if self.child.lock().await.is_some() {
            return Ok(());
        }

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| TransportError::Connect(format!("spawn failed: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Connect("child has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Connect("child has no stdout".into()))?;

        let pending = self.pending.clone();
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(response) = serde_json::from_str::<JsonRpcResponse>(&line) else {
                    continue;
                };
                let id = response
                    .id
                    .as_ref()
                    .and_then(|v| v.as_u64())
                    .unwrap_or_default();
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let _ = tx.send(response);
                }
            }
        });

        *self.child.lock().await = Some(child);
        *self.stdin.lock().await = Some(stdin);
        *self.reader_task.lock().await = Some(reader_task);
        Ok(())
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        self.ensure_spawned().await?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request.id, tx);

        let mut line = serde_json::to_vec(&request)
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        line.push(b'\n');

        {
            let mut guard = self.stdin.lock().await;
            let stdin = guard
                .as_mut()
                .ok_or_else(|| TransportError::Connect("stdio transport not connected".into()))?;
            stdin
                .write_all(&line)
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            stdin
                .flush()
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
        }

        match tokio::time::timeout(std::time::Duration::from_secs(120), rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TransportError::Connect("reader task dropped".into())),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn reset(&self) {
        self.pending.lock().await.clear();
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
        *self.stdin.lock().await = None;
    }
}
