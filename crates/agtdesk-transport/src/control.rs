//! JSON-RPC 2.0 control plane over a Unix socket.
//!
//! One request per connection: write a newline-terminated request, shut down
//! the write half, read one response line.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use agtdesk_core::{AgentSession, display_name};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::error::TransportError;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Session lifecycle requests the multiplexer delegates to the server.
pub trait ControlPlane {
    fn create_agent(
        &self,
        working_dir: &str,
        name: Option<&str>,
    ) -> impl Future<Output = Result<AgentSession, TransportError>> + Send;

    fn list_agents(&self) -> impl Future<Output = Result<Vec<AgentSession>, TransportError>> + Send;

    fn destroy_agent(&self, id: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn send_agent_message(
        &self,
        agent_id: &str,
        text: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the new terminal id.
    fn create_terminal(
        &self,
        working_dir: &str,
        name: Option<&str>,
        agent_id: Option<&str>,
    ) -> impl Future<Output = Result<String, TransportError>> + Send;

    fn destroy_terminal(&self, id: &str) -> impl Future<Output = Result<(), TransportError>> + Send;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Agent record as the server reports it; missing names are derived.
#[derive(Debug, Deserialize)]
struct AgentRecord {
    id: String,
    #[serde(default)]
    working_dir: String,
    #[serde(default)]
    display_name: Option<String>,
}

impl AgentRecord {
    fn into_session(self) -> AgentSession {
        let display_name = display_name(&self.working_dir, self.display_name.as_deref());
        AgentSession {
            id: self.id,
            working_dir: self.working_dir,
            display_name,
        }
    }
}

#[derive(Debug)]
pub struct ControlClient {
    socket_path: PathBuf,
    timeout: Duration,
    next_id: AtomicU64,
}

impl ControlClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Issue one request and return its `result`, bounded by the request timeout.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(method, id, "control: request");
        match tokio::time::timeout(self.timeout, self.roundtrip(id, method, params)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                method: method.to_owned(),
                millis: self.timeout.as_millis(),
            }),
        }
    }

    async fn roundtrip(&self, id: u64, method: &str, params: Value) -> Result<Value, TransportError> {
        let io_err = |source| TransportError::Io {
            path: self.socket_path.display().to_string(),
            source,
        };

        let stream = UnixStream::connect(&self.socket_path).await.map_err(io_err)?;
        let (reader, mut writer) = stream.into_split();

        let request = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });
        let mut req = serde_json::to_string(&request)?;
        req.push('\n');
        writer.write_all(req.as_bytes()).await.map_err(io_err)?;
        writer.shutdown().await.map_err(io_err)?;

        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        reader.read_line(&mut line).await.map_err(io_err)?;
        if line.trim().is_empty() {
            return Err(TransportError::BadResponse(format!(
                "empty response to `{method}`"
            )));
        }

        let response: RpcResponse = serde_json::from_str(line.trim())
            .map_err(|e| TransportError::BadResponse(e.to_string()))?;
        if let Some(error) = response.error {
            tracing::debug!(method, code = error.code, message = %error.message, "control: error response");
            return Err(TransportError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }
}

fn required_str(result: &Value, field: &str) -> Result<String, TransportError> {
    result
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| TransportError::BadResponse(format!("result has no `{field}`")))
}

impl ControlPlane for ControlClient {
    async fn create_agent(
        &self,
        working_dir: &str,
        name: Option<&str>,
    ) -> Result<AgentSession, TransportError> {
        let result = self
            .call(
                "create_agent",
                json!({ "working_dir": working_dir, "name": name }),
            )
            .await?;
        let id = required_str(&result, "id")?;
        let display = result
            .get("display_name")
            .and_then(Value::as_str)
            .or(name);
        Ok(AgentSession {
            id,
            working_dir: working_dir.to_owned(),
            display_name: display_name(working_dir, display),
        })
    }

    async fn list_agents(&self) -> Result<Vec<AgentSession>, TransportError> {
        let result = self.call("list_agents", json!({})).await?;
        let agents = result.get("agents").cloned().unwrap_or(Value::Array(Vec::new()));
        let records: Vec<AgentRecord> = serde_json::from_value(agents)
            .map_err(|e| TransportError::BadResponse(e.to_string()))?;
        Ok(records.into_iter().map(AgentRecord::into_session).collect())
    }

    async fn destroy_agent(&self, id: &str) -> Result<(), TransportError> {
        self.call("destroy_agent", json!({ "id": id })).await?;
        Ok(())
    }

    async fn send_agent_message(&self, agent_id: &str, text: &str) -> Result<(), TransportError> {
        self.call(
            "send_agent_message",
            json!({ "agent_id": agent_id, "text": text }),
        )
        .await?;
        Ok(())
    }

    async fn create_terminal(
        &self,
        working_dir: &str,
        name: Option<&str>,
        agent_id: Option<&str>,
    ) -> Result<String, TransportError> {
        let result = self
            .call(
                "create_terminal",
                json!({ "working_dir": working_dir, "name": name, "agent_id": agent_id }),
            )
            .await?;
        required_str(&result, "id")
    }

    async fn destroy_terminal(&self, id: &str) -> Result<(), TransportError> {
        self.call("destroy_terminal", json!({ "id": id })).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    /// Serve exactly one connection: capture the request, answer with `response`.
    fn serve_once(listener: UnixListener, response: Value) -> tokio::task::JoinHandle<Value> {
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let request: Value = serde_json::from_str(line.trim()).unwrap();
            let mut body = serde_json::to_string(&response).unwrap();
            body.push('\n');
            writer.write_all(body.as_bytes()).await.unwrap();
            request
        })
    }

    fn bind(dir: &tempfile::TempDir) -> (PathBuf, UnixListener) {
        let path = dir.path().join("control.sock");
        let listener = UnixListener::bind(&path).unwrap();
        (path, listener)
    }

    #[tokio::test]
    async fn create_terminal_sends_params_and_returns_id() {
        let dir = tempfile::tempdir().unwrap();
        let (path, listener) = bind(&dir);
        let server = serve_once(listener, json!({"jsonrpc": "2.0", "id": 1, "result": {"id": "t7"}}));

        let client = ControlClient::new(&path);
        let id = client
            .create_terminal("/work/api", None, Some("a1"))
            .await
            .unwrap();
        assert_eq!(id, "t7");

        let request = server.await.unwrap();
        assert_eq!(request["jsonrpc"], "2.0");
        assert_eq!(request["method"], "create_terminal");
        assert_eq!(request["params"]["working_dir"], "/work/api");
        assert_eq!(request["params"]["agent_id"], "a1");
        assert!(request["params"]["name"].is_null());
    }

    #[tokio::test]
    async fn create_agent_derives_display_name() {
        let dir = tempfile::tempdir().unwrap();
        let (path, listener) = bind(&dir);
        let _server = serve_once(listener, json!({"jsonrpc": "2.0", "id": 1, "result": {"id": "a1"}}));

        let agent = ControlClient::new(&path)
            .create_agent("/work/api", None)
            .await
            .unwrap();
        assert_eq!(agent.id, "a1");
        assert_eq!(agent.working_dir, "/work/api");
        assert_eq!(agent.display_name, "api");
    }

    #[tokio::test]
    async fn list_agents_parses_records() {
        let dir = tempfile::tempdir().unwrap();
        let (path, listener) = bind(&dir);
        let _server = serve_once(
            listener,
            json!({"jsonrpc": "2.0", "id": 1, "result": {"agents": [
                {"id": "a1", "working_dir": "/w/one", "display_name": "first"},
                {"id": "a2", "working_dir": "/w/two"},
            ]}}),
        );

        let agents = ControlClient::new(&path).list_agents().await.unwrap();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].display_name, "first");
        assert_eq!(agents[1].display_name, "two");
    }

    #[tokio::test]
    async fn error_response_maps_to_rpc_error() {
        let dir = tempfile::tempdir().unwrap();
        let (path, listener) = bind(&dir);
        let _server = serve_once(
            listener,
            json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "no such agent"}}),
        );

        let err = ControlClient::new(&path).destroy_agent("ghost").await.unwrap_err();
        match err {
            TransportError::Rpc { code, message } => {
                assert_eq!(code, -32000);
                assert_eq!(message, "no such agent");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let (path, listener) = bind(&dir);
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let client = ControlClient::new(&path).with_timeout(Duration::from_millis(100));
        let err = client.destroy_terminal("t1").await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout { ref method, .. } if method == "destroy_terminal"));
    }

    #[tokio::test]
    async fn missing_socket_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = ControlClient::new(dir.path().join("absent.sock"));
        let err = client.list_agents().await.unwrap_err();
        assert!(matches!(err, TransportError::Io { .. }));
    }
}
