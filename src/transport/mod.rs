//! Request/response exchange with a tool.
//!
//! Two kinds: [`StdioTransport`] (subprocess, line-delimited JSON-RPC) and
//! [`HttpTransport`] (JSON-RPC over POST). Both are safe to share between
//! concurrent callers; responses are routed back by request id.

pub mod codec;
pub mod http;
pub mod stdio;

use crate::tools::config::{ToolConfig, TransportKind};
use crate::types::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use codec::HandshakeInfo;
pub use http::HttpTransport;
pub use stdio::StdioTransport;

/// A live channel to one tool.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    fn kind(&self) -> TransportKind;

    /// Establish the channel and complete the handshake. Idempotent while open.
    async fn open(&self) -> Result<HandshakeInfo>;

    /// One request/response exchange bounded by `timeout`.
    ///
    /// Fails with `TransportClosed` if the transport is not open.
    async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value>;

    /// Release the channel. Safe to call repeatedly.
    async fn close(&self);

    /// Whether a handshake has succeeded and the channel is still usable.
    fn is_open(&self) -> bool;
}

/// Builds the transport for a tool configuration.
pub trait TransportFactory: Send + Sync + fmt::Debug {
    fn create(&self, config: &ToolConfig) -> Result<Arc<dyn Transport>>;
}

/// Stdio for `stdio` configs, HTTP for `http` configs.
#[derive(Debug, Default, Clone)]
pub struct DefaultTransportFactory {
    http_client: reqwest::Client,
}

impl DefaultTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, config: &ToolConfig) -> Result<Arc<dyn Transport>> {
        match config.transport {
            TransportKind::Stdio => Ok(Arc::new(StdioTransport::from_config(config)?)),
            TransportKind::Http => Ok(Arc::new(HttpTransport::from_config(
                config,
                self.http_client.clone(),
            )?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::schema::parse_document;
    use serde_json::json;

    #[test]
    fn test_factory_picks_transport_kind() {
        let factory = DefaultTransportFactory::new();

        let stdio = parse_document(&json!({
            "schemaVersion": "1.0",
            "name": "local",
            "command": "cat",
            "transport": "stdio",
            "capabilities": [],
            "timeout": "5s"
        }))
        .unwrap();
        assert_eq!(factory.create(&stdio).unwrap().kind(), TransportKind::Stdio);

        let http = parse_document(&json!({
            "schemaVersion": "1.0",
            "name": "remote",
            "transport": "http",
            "url": "http://127.0.0.1:9/rpc",
            "capabilities": [],
            "timeout": "5s"
        }))
        .unwrap();
        let transport = factory.create(&http).unwrap();
        assert_eq!(transport.kind(), TransportKind::Http);
        assert!(!transport.is_open());
    }
}
