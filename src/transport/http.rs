//! HTTP transport: one JSON-RPC envelope per POST.
//!
//! Each call owns its own request/response pair, so concurrent callers can
//! never receive each other's results; the echoed id is still checked.

use crate::tools::config::{ToolConfig, TransportKind};
use crate::transport::codec::{
    initialize_params, parse_handshake, HandshakeInfo, RpcRequest, RpcResponse, METHOD_INITIALIZE,
};
use crate::transport::Transport;
use crate::types::{Error, Result, SchemaError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug)]
pub struct HttpTransport {
    tool: String,
    url: String,
    client: reqwest::Client,
    handshake_timeout: Duration,
    next_id: AtomicU64,
    ready: AtomicBool,
    handshake: Mutex<Option<HandshakeInfo>>,
}

impl HttpTransport {
    pub fn new(
        tool: impl Into<String>,
        url: impl Into<String>,
        client: reqwest::Client,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            tool: tool.into(),
            url: url.into(),
            client,
            handshake_timeout,
            next_id: AtomicU64::new(1),
            ready: AtomicBool::new(false),
            handshake: Mutex::new(None),
        }
    }

    pub fn from_config(config: &ToolConfig, client: reqwest::Client) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| SchemaError::new("url", "required when transport is http"))?;
        Ok(Self::new(config.name.clone(), url, client, config.timeout))
    }

    async fn post(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::call(id, method, params);

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.map_send_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::protocol(
                &self.tool,
                format!("HTTP {} from {}", status.as_u16(), self.url),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_send_error(e, timeout))?;
        let envelope: RpcResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::protocol(&self.tool, format!("malformed JSON-RPC body: {}", e)))?;

        if envelope.request_id() != Some(id) {
            return Err(Error::protocol(
                &self.tool,
                format!("response id {:?} does not match request id {}", envelope.id, id),
            ));
        }
        envelope.into_result(&self.tool)
    }

    fn map_send_error(&self, err: reqwest::Error, timeout: Duration) -> Error {
        if err.is_timeout() {
            Error::timeout(&self.tool, timeout)
        } else if err.is_connect() {
            Error::closed(&self.tool, format!("connection failed: {}", err))
        } else {
            Error::protocol(&self.tool, err.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn open(&self) -> Result<HandshakeInfo> {
        if self.is_open() {
            let cached = self
                .handshake
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(info) = cached {
                return Ok(info);
            }
        }

        let result = self
            .post(METHOD_INITIALIZE, initialize_params(), self.handshake_timeout)
            .await?;
        let info = parse_handshake(&self.tool, &result)?;
        *self.handshake.lock().unwrap_or_else(PoisonError::into_inner) = Some(info.clone());
        self.ready.store(true, Ordering::SeqCst);
        tracing::info!(
            tool = %self.tool,
            url = %self.url,
            protocol = %info.protocol_version,
            "http handshake complete"
        );
        Ok(info)
    }

    async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        if !self.is_open() {
            return Err(Error::closed(&self.tool, "transport is not open"));
        }
        self.post(method, params, timeout).await
    }

    async fn close(&self) {
        self.ready.store(false, Ordering::SeqCst);
        self.handshake
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn is_open(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
