//! Framed protocol client
//!
//! Thin connection wrapper used by followers to forward writes to the
//! leader, by the admin CLI, and by data nodes. Every operation is bounded
//! by the configured timeout; a timed-out or failed connection is dropped
//! by the caller and reopened on the next attempt.

use std::time::Duration;
use tokio::net::TcpStream;

use crate::coordinator::protocol::{read_frame, write_frame, MetaRequest, MetaResponse};

pub struct MetaClient {
    stream: TcpStream,
    timeout: Duration,
}

impl MetaClient {
    pub async fn connect(addr: &str, timeout: Duration) -> crate::Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| crate::Error::Unavailable(format!("connect to {} timed out", addr)))?
            .map_err(|e| crate::Error::Unavailable(format!("connect to {} failed: {}", addr, e)))?;
        Ok(Self { stream, timeout })
    }

    /// Send one request and wait for its response.
    pub async fn call(&mut self, request: &MetaRequest) -> crate::Result<MetaResponse> {
        tokio::time::timeout(self.timeout, write_frame(&mut self.stream, request))
            .await
            .map_err(|_| crate::Error::Unavailable("send to leader timed out".into()))??;

        tokio::time::timeout(self.timeout, read_frame(&mut self.stream))
            .await
            .map_err(|_| crate::Error::Unavailable("recv from leader timed out".into()))?
    }
}
