//! Minimal RPC client for the line-framed protocol.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use crate::rpc::protocol::{ErrorObject, RpcRequest, RpcResponse, MAX_FRAME_BYTES};
use crate::rpc::service::{ItemRequest, ServiceResponse};

/// Error type for client calls.
#[derive(Debug, thiserror::Error)]
pub enum RpcClientError {
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing error: {0}")]
    Codec(#[from] LinesCodecError),
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("server closed the connection")]
    Closed,
    #[error("server returned error {}: {}", .0.code, .0.message)]
    Remote(ErrorObject),
    #[error("response id {found} does not match request id {expected}")]
    IdMismatch { expected: u64, found: Value },
}

/// A single persistent connection. Calls are issued one at a time.
pub struct RpcClient {
    framed: Framed<TcpStream, LinesCodec>,
    next_id: u64,
}

impl RpcClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self, RpcClientError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            framed: Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_BYTES)),
            next_id: 1,
        })
    }

    /// Issue a call and wait for its result.
    pub async fn call(&mut self, method: &str, params: Option<Value>) -> Result<Value, RpcClientError> {
        let id = self.next_id;
        self.next_id += 1;

        let request = RpcRequest::new(id, method, params);
        self.framed.send(serde_json::to_string(&request)?).await?;

        let line = self.framed.next().await.ok_or(RpcClientError::Closed)??;
        let response: RpcResponse = serde_json::from_str(&line)?;

        if response.id != Value::from(id) {
            return Err(RpcClientError::IdMismatch {
                expected: id,
                found: response.id,
            });
        }
        if let Some(error) = response.error {
            return Err(RpcClientError::Remote(error));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    pub async fn get(&mut self, id: &str) -> Result<ServiceResponse, RpcClientError> {
        self.item_call("get", id).await
    }

    pub async fn put(&mut self, id: &str) -> Result<ServiceResponse, RpcClientError> {
        self.item_call("put", id).await
    }

    async fn item_call(&mut self, method: &str, id: &str) -> Result<ServiceResponse, RpcClientError> {
        let params = serde_json::to_value(ItemRequest { id: id.to_string() })?;
        let result = self.call(method, Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }
}
