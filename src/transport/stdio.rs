//! Subprocess transport: line-delimited JSON-RPC over the child's stdin/stdout.
//!
//! One reader task owns stdout and routes each response to the caller waiting
//! on that id. When stdout hits EOF every pending caller fails with
//! `TransportClosed` and the transport stays unusable until reopened. A call
//! that times out tears the subprocess down.

use crate::tools::config::{ToolConfig, TransportKind};
use crate::transport::codec::{
    decode_line, encode_line, initialize_params, parse_handshake, HandshakeInfo, RpcRequest,
    RpcResponse, METHOD_INITIALIZE, METHOD_INITIALIZED,
};
use crate::transport::Transport;
use crate::types::{Error, Result, SchemaError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// In-flight requests: id → waiting caller.
#[derive(Debug, Default)]
struct PendingMap(Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>);

impl PendingMap {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<RpcResponse>>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, id: u64, tx: oneshot::Sender<RpcResponse>) {
        self.lock().insert(id, tx);
    }

    fn take(&self, id: u64) -> Option<oneshot::Sender<RpcResponse>> {
        self.lock().remove(&id)
    }

    /// Drop every sender; waiting callers observe a closed channel.
    fn drain(&self) -> usize {
        let mut map = self.lock();
        let n = map.len();
        map.clear();
        n
    }
}

/// Removes a pending entry when the waiting call ends for any reason.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.take(self.id);
    }
}

/// State owned by one spawned process and shared with its reader task.
#[derive(Debug)]
struct Link {
    /// Pipes are up (cleared by the reader on EOF).
    alive: AtomicBool,
    pending: PendingMap,
}

impl Link {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Mark the pipes down and fail every waiting caller.
    fn shut(&self) -> usize {
        self.alive.store(false, Ordering::SeqCst);
        self.pending.drain()
    }
}

/// A spawned child and its background tasks.
#[derive(Debug)]
struct Session {
    child: Child,
    link: Arc<Link>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Debug)]
pub struct StdioTransport {
    tool: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    handshake_timeout: Duration,
    next_id: AtomicU64,
    /// Handshake completed for the current session.
    ready: AtomicBool,
    /// Link of the current session, readable without the session lock.
    link: Mutex<Option<Arc<Link>>>,
    writer: tokio::sync::Mutex<Option<ChildStdin>>,
    session: tokio::sync::Mutex<Option<Session>>,
    handshake: Mutex<Option<HandshakeInfo>>,
}

impl StdioTransport {
    pub fn new(
        tool: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        env: HashMap<String, String>,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            tool: tool.into(),
            command: command.into(),
            args,
            env,
            handshake_timeout,
            next_id: AtomicU64::new(1),
            ready: AtomicBool::new(false),
            link: Mutex::new(None),
            writer: tokio::sync::Mutex::new(None),
            session: tokio::sync::Mutex::new(None),
            handshake: Mutex::new(None),
        }
    }

    pub fn from_config(config: &ToolConfig) -> Result<Self> {
        let command = config
            .command
            .clone()
            .ok_or_else(|| SchemaError::new("command", "required when transport is stdio"))?;
        Ok(Self::new(
            config.name.clone(),
            command,
            config.args.clone(),
            config.env.clone(),
            config.timeout,
        ))
    }

    fn handshake_slot(&self) -> MutexGuard<'_, Option<HandshakeInfo>> {
        self.handshake.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn link_slot(&self) -> MutexGuard<'_, Option<Arc<Link>>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current session's link, if its pipes are still up.
    fn live_link(&self) -> Option<Arc<Link>> {
        self.link_slot().clone().filter(|link| link.is_alive())
    }

    fn spawn(&self) -> Result<(Session, ChildStdin)> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                tool: self.tool.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::internal("child stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::internal("child stdout was not piped"))?;
        let stderr = child.stderr.take();

        let link = Arc::new(Link {
            alive: AtomicBool::new(true),
            pending: PendingMap::default(),
        });
        *self.link_slot() = Some(link.clone());
        let cancel = CancellationToken::new();
        let mut tasks = vec![tokio::spawn(read_loop(
            self.tool.clone(),
            stdout,
            link.clone(),
            cancel.clone(),
        ))];
        if let Some(stderr) = stderr {
            tasks.push(tokio::spawn(forward_stderr(
                self.tool.clone(),
                stderr,
                cancel.clone(),
            )));
        }

        tracing::debug!(tool = %self.tool, pid = ?child.id(), "spawned tool process");
        Ok((
            Session {
                child,
                link,
                cancel,
                tasks,
            },
            stdin,
        ))
    }

    async fn teardown(&self, mut session: Session) {
        self.ready.store(false, Ordering::SeqCst);
        session.link.alive.store(false, Ordering::SeqCst);
        {
            let mut current = self.link_slot();
            if current.as_ref().is_some_and(|l| Arc::ptr_eq(l, &session.link)) {
                current.take();
            }
        }
        session.cancel.cancel();
        self.writer.lock().await.take();
        if let Err(e) = session.child.kill().await {
            tracing::debug!(tool = %self.tool, "kill failed (already exited?): {}", e);
        }
        for task in session.tasks {
            task.abort();
        }
        let dropped = session.link.shut();
        if dropped > 0 {
            tracing::warn!(tool = %self.tool, dropped, "tool process torn down with calls in flight");
        }
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let stdin = writer
            .as_mut()
            .ok_or_else(|| Error::closed(&self.tool, "process stdin is closed"))?;
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        written.map_err(|e| Error::closed(&self.tool, format!("write failed: {}", e)))
    }

    /// Send one request and wait for its response. Does not tear down on timeout.
    async fn exchange(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let link = self
            .live_link()
            .ok_or_else(|| Error::closed(&self.tool, "process is not running"))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = encode_line(&RpcRequest::call(id, method, params))?;
        let (tx, rx) = oneshot::channel();
        link.pending.insert(id, tx);
        let _guard = PendingGuard {
            pending: &link.pending,
            id,
        };
        // The reader clears `alive` before draining, so a process that died
        // before the insert is caught here.
        if !link.is_alive() {
            return Err(Error::closed(&self.tool, "process exited"));
        }

        self.write_line(&line).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response.into_result(&self.tool),
            Ok(Err(_)) => Err(Error::closed(
                &self.tool,
                "process exited before responding",
            )),
            Err(_) => Err(Error::timeout(&self.tool, timeout)),
        }
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let line = encode_line(&RpcRequest::notification(method))?;
        self.write_line(&line).await
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn open(&self) -> Result<HandshakeInfo> {
        let mut session = self.session.lock().await;
        if self.is_open() {
            if let Some(info) = self.handshake_slot().clone() {
                return Ok(info);
            }
        }
        if let Some(stale) = session.take() {
            self.teardown(stale).await;
        }

        let (fresh, stdin) = self.spawn()?;
        *self.writer.lock().await = Some(stdin);
        *session = Some(fresh);

        let handshake = async {
            let result = self
                .exchange(METHOD_INITIALIZE, initialize_params(), self.handshake_timeout)
                .await?;
            let info = parse_handshake(&self.tool, &result)?;
            self.notify(METHOD_INITIALIZED).await?;
            Ok::<_, Error>(info)
        }
        .await;

        match handshake {
            Ok(info) => {
                *self.handshake_slot() = Some(info.clone());
                self.ready.store(true, Ordering::SeqCst);
                tracing::info!(
                    tool = %self.tool,
                    protocol = %info.protocol_version,
                    "stdio handshake complete"
                );
                Ok(info)
            }
            Err(e) => {
                tracing::warn!(tool = %self.tool, "stdio handshake failed: {}", e);
                if let Some(failed) = session.take() {
                    self.teardown(failed).await;
                }
                Err(e)
            }
        }
    }

    async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        if !self.is_open() {
            return Err(Error::closed(&self.tool, "transport is not open"));
        }
        let result = self.exchange(method, params, timeout).await;
        if matches!(result, Err(Error::Timeout { .. })) {
            tracing::warn!(tool = %self.tool, method, "call timed out, tearing down process");
            self.close().await;
        }
        result
    }

    async fn close(&self) {
        let mut session = self.session.lock().await;
        if let Some(active) = session.take() {
            self.teardown(active).await;
            tracing::debug!(tool = %self.tool, "stdio transport closed");
        }
        self.ready.store(false, Ordering::SeqCst);
        self.handshake_slot().take();
    }

    fn is_open(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && self.live_link().is_some()
    }
}

async fn read_loop(
    tool: String,
    stdout: ChildStdout,
    link: Arc<Link>,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = lines.next_line() => match next {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match decode_line(&line) {
                        Ok(response) if response.method.is_some() => {
                            tracing::debug!(tool = %tool, "ignoring server-initiated message");
                        }
                        Ok(response) => match response.request_id() {
                            Some(id) => match link.pending.take(id) {
                                Some(tx) => {
                                    let _ = tx.send(response);
                                }
                                None => tracing::debug!(tool = %tool, id, "response for unknown or abandoned request"),
                            },
                            None => tracing::debug!(tool = %tool, "ignoring message without id"),
                        },
                        Err(e) => tracing::warn!(tool = %tool, "malformed line from tool: {}", e),
                    }
                }
                Ok(None) => {
                    tracing::debug!(tool = %tool, "tool stdout closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(tool = %tool, "error reading tool stdout: {}", e);
                    break;
                }
            }
        }
    }
    link.shut();
}

async fn forward_stderr(tool: String, stderr: ChildStderr, cancel: CancellationToken) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = lines.next_line() => match next {
                Ok(Some(line)) => tracing::debug!(tool = %tool, "stderr: {}", line),
                _ => break,
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn transport(command: &str, args: &[&str]) -> StdioTransport {
        StdioTransport::new(
            "fixture",
            command,
            args.iter().map(|s| s.to_string()).collect(),
            HashMap::new(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_call_before_open_is_closed() {
        let t = transport("cat", &[]);
        let err = t
            .call("read:list", Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransportClosed { .. }));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let t = transport("/nonexistent/definitely-not-a-tool", &[]);
        let err = t.open().await.unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
        assert!(!t.is_open());
    }

    #[tokio::test]
    async fn test_exiting_process_fails_handshake() {
        let t = transport("sh", &["-c", "exit 0"]);
        let err = t.open().await.unwrap_err();
        assert!(
            matches!(err, Error::TransportClosed { .. }),
            "unexpected error: {}",
            err
        );
        assert!(!t.is_open());
    }

    #[tokio::test]
    async fn test_silent_process_times_out_handshake() {
        let t = StdioTransport::new(
            "fixture",
            "sleep",
            vec!["5".to_string()],
            HashMap::new(),
            Duration::from_millis(100),
        );
        let err = t.open().await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(!t.is_open());
    }

    #[tokio::test]
    async fn test_stale_reader_cannot_touch_new_session() {
        let t = transport("sed", &["-u", r#"s/,"method".*$/,"result":{"protocolVersion":"2024-11-05"}}/"#]);
        t.open().await.unwrap();
        let stale = t.link_slot().clone().unwrap();
        t.close().await;
        t.open().await.unwrap();

        // A reader from the old process finishing late only shuts its own link.
        stale.shut();
        assert!(t.is_open());
        t.call("read:list", Value::Null, Duration::from_secs(5))
            .await
            .unwrap();
        t.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let t = transport("cat", &[]);
        t.close().await;
        t.close().await;
        assert!(!t.is_open());
    }
}
