//! RPC server: line-framed JSON-RPC over TCP.
//!
//! # Responsibilities
//! - Run the accept loop on an owned [`Listener`]
//! - Read one request at a time per connection and write its response
//! - Close idle connections on stop; drop everything on force

use std::io::ErrorKind;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::lifecycle::shutdown::{ServerHandle, Shutdown};
use crate::net::connection::ConnectionGuard;
use crate::net::listener::{Listener, Protocol};
use crate::observability::metrics;
use crate::rpc::protocol::{RpcRequest, RpcResponse, MAX_FRAME_BYTES};
use crate::rpc::service::RpcService;
use crate::rpc::RpcError;

/// RPC server bound to one listener.
pub struct RpcServer {
    listener: Listener,
    service: Arc<dyn RpcService>,
    shutdown: Shutdown,
}

impl RpcServer {
    pub fn new(listener: Listener, service: impl RpcService) -> Self {
        Self {
            listener,
            service: Arc::new(service),
            shutdown: Shutdown::new(Protocol::Rpc),
        }
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.listener.local_addr()
    }

    /// Control handle for drain/stop and reload.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle::new(self.shutdown.clone(), self.listener.handle())
    }

    /// Accept and serve connections until stopped.
    pub async fn serve(self) {
        let Self {
            listener,
            service,
            shutdown,
        } = self;

        shutdown
            .accept_until_stopped(listener, |stream, peer, guard| {
                let span = tracing::debug_span!("connection", id = %guard.id(), peer = %peer);
                tokio::spawn(
                    serve_connection(
                        stream,
                        Arc::clone(&service),
                        shutdown.stop_token(),
                        shutdown.force_token(),
                        guard,
                    )
                    .instrument(span),
                );
            })
            .await;
    }
}

async fn serve_connection(
    stream: TcpStream,
    service: Arc<dyn RpcService>,
    stop: CancellationToken,
    force: CancellationToken,
    guard: ConnectionGuard,
) {
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));

    loop {
        let frame = tokio::select! {
            biased;
            _ = force.cancelled() => {
                tracing::warn!("Connection force-closed at drain deadline");
                break;
            }
            _ = stop.cancelled() => {
                tracing::debug!("Idle connection closed for drain");
                break;
            }
            frame = framed.next() => frame,
        };

        let line = match frame {
            None => break,
            Some(Ok(line)) => line,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                let error = RpcError::Parse(format!("frame exceeds {} bytes", MAX_FRAME_BYTES));
                metrics::record_request(Protocol::Rpc, "error");
                // The codec cannot resync after an oversized frame.
                if let Err(e) = send(&mut framed, &RpcResponse::failure(Value::Null, &error)).await {
                    tracing::debug!(error = %e, "Write failed");
                }
                break;
            }
            // The codec has already consumed the offending line.
            Some(Err(LinesCodecError::Io(e))) if e.kind() == ErrorKind::InvalidData => {
                tracing::debug!(error = %e, "Rejected frame");
                metrics::record_request(Protocol::Rpc, "error");
                let error = RpcError::Parse("frame is not valid UTF-8".to_string());
                if let Err(e) = send(&mut framed, &RpcResponse::failure(Value::Null, &error)).await {
                    tracing::debug!(error = %e, "Write failed");
                    break;
                }
                continue;
            }
            Some(Err(LinesCodecError::Io(e))) => {
                tracing::debug!(error = %e, "Read failed");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        // Stop does not interrupt a request in progress; only force does.
        let response = tokio::select! {
            biased;
            _ = force.cancelled() => {
                tracing::warn!("Request abandoned, connection force-closed at drain deadline");
                break;
            }
            response = dispatch(service.as_ref(), &line) => response,
        };

        if let Some(response) = response {
            let sent = tokio::select! {
                biased;
                _ = force.cancelled() => break,
                sent = send(&mut framed, &response) => sent,
            };
            if let Err(e) = sent {
                tracing::debug!(error = %e, "Write failed");
                break;
            }
        }
    }

    drop(guard);
}

/// Handle one frame. Returns `None` for notifications.
async fn dispatch(service: &dyn RpcService, line: &str) -> Option<RpcResponse> {
    let request = match RpcRequest::parse(line) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected frame");
            metrics::record_request(Protocol::Rpc, "error");
            return Some(RpcResponse::failure(Value::Null, &e));
        }
    };

    tracing::debug!(method = %request.method, "RPC call");
    let result = service.call(&request.method, request.params).await;
    metrics::record_request(Protocol::Rpc, if result.is_ok() { "ok" } else { "error" });

    let id = request.id?;
    Some(match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(e) => RpcResponse::failure(id, &e),
    })
}

async fn send(framed: &mut Framed<TcpStream, LinesCodec>, response: &RpcResponse) -> Result<(), LinesCodecError> {
    let text = serde_json::to_string(response)
        .map_err(|e| LinesCodecError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    framed.send(text).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use crate::config::DemoConfig;
    use crate::lifecycle::shutdown::{DrainOutcome, ServerState};
    use crate::rpc::protocol::{METHOD_NOT_FOUND, PARSE_ERROR};
    use crate::rpc::service::DemoService;

    async fn start(slow_ms: u64) -> (ServerHandle, std::net::SocketAddr) {
        let listener = Listener::bind(Protocol::Rpc, "127.0.0.1:0").await.unwrap();
        let server = RpcServer::new(listener, DemoService::new(&DemoConfig { slow_handler_ms: slow_ms }));
        let handle = server.handle();
        let addr = server.local_addr();
        tokio::spawn(server.serve());
        handle
            .subscribe()
            .wait_for(|state| *state == ServerState::Serving)
            .await
            .unwrap();
        (handle, addr)
    }

    async fn roundtrip(addr: std::net::SocketAddr, frame: &str) -> RpcResponse {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(frame.as_bytes()).await.unwrap();
        stream.write_all(b"\n").await.unwrap();
        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn answers_get() {
        let (_handle, addr) = start(0).await;
        let response = roundtrip(addr, r#"{"jsonrpc":"2.0","id":1,"method":"get","params":{"id":"x"}}"#).await;
        assert_eq!(response.id, json!(1));
        assert_eq!(response.result.unwrap()["data"], "get option success: x");
    }

    #[tokio::test]
    async fn maps_errors_to_codes() {
        let (_handle, addr) = start(0).await;

        let response = roundtrip(addr, "garbage").await;
        assert_eq!(response.id, Value::Null);
        assert_eq!(response.error.unwrap().code, PARSE_ERROR);

        let response = roundtrip(addr, r#"{"jsonrpc":"2.0","id":"a","method":"nope"}"#).await;
        assert_eq!(response.id, json!("a"));
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_utf8_gets_parse_error_and_connection_survives() {
        let (_handle, addr) = start(0).await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut reader = BufReader::new(stream);

        reader
            .get_mut()
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"g\xff\"}\n")
            .await
            .unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let response: RpcResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(response.id, Value::Null);
        assert_eq!(response.error.unwrap().code, PARSE_ERROR);

        reader
            .get_mut()
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"get\",\"params\":{\"id\":\"y\"}}\n")
            .await
            .unwrap();
        line.clear();
        reader.read_line(&mut line).await.unwrap();
        let response: RpcResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(response.id, json!(2));
        assert_eq!(response.result.unwrap()["data"], "get option success: y");
    }

    #[tokio::test]
    async fn oversized_frame_gets_parse_error_then_closes() {
        let (handle, addr) = start(0).await;
        // Exactly one byte over the limit, so the server has read all of it
        // when it gives up on the frame.
        let frame = "x".repeat(MAX_FRAME_BYTES + 1);
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(frame.as_bytes()).await.unwrap();

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let response: RpcResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(response.error.unwrap().code, PARSE_ERROR);

        line.clear();
        assert_eq!(reader.read_line(&mut line).await.unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.active_connections(), 0);
    }

    #[tokio::test]
    async fn drain_closes_idle_connections() {
        let (handle, addr) = start(0).await;
        let mut idle = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.active_connections(), 1);

        assert_eq!(handle.drain(Duration::from_secs(2)).await, DrainOutcome::Drained);

        let mut buf = [0u8; 1];
        assert_eq!(tokio::io::AsyncReadExt::read(&mut idle, &mut buf).await.unwrap(), 0);
    }
}
