//! HTTP server setup and connection serving.
//!
//! # Responsibilities
//! - Wrap the route table in tower-http middleware (trace, timeout, ids)
//! - Run the accept loop on an owned [`Listener`]
//! - Serve each connection with hyper (HTTP/1.1 and HTTP/2)
//! - Honour stop (graceful connection shutdown) and force (drop) requests
//!
//! # Design Decisions
//! - Connections are served individually rather than through `axum::serve`
//!   so a drain deadline can actually close sockets
//! - Every response carries `x-server-pid` so clients can see which
//!   generation answered

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    Router,
};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
    service::TowerToHyperService,
};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::Instrument;

use crate::config::GracefulConfig;
use crate::http::handlers;
use crate::lifecycle::shutdown::{ServerHandle, Shutdown};
use crate::net::connection::ConnectionGuard;
use crate::net::listener::{Listener, Protocol};
use crate::observability::metrics;

/// Response header carrying the serving process id.
pub const X_SERVER_PID: &str = "x-server-pid";

/// HTTP server bound to one listener.
pub struct HttpServer {
    listener: Listener,
    router: Router,
    shutdown: Shutdown,
}

impl HttpServer {
    /// Create a server for the demo routes.
    pub fn new(listener: Listener, config: &GracefulConfig) -> Self {
        Self::with_routes(listener, handlers::routes(&config.demo), config.http.request_timeout())
    }

    /// Create a server for arbitrary routes.
    pub fn with_routes(listener: Listener, routes: Router, request_timeout: Duration) -> Self {
        Self {
            listener,
            router: Self::build_router(routes, request_timeout),
            shutdown: Shutdown::new(Protocol::Http),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(routes: Router, request_timeout: Duration) -> Router {
        let pid = HeaderValue::from(std::process::id());

        routes
            .layer(middleware::from_fn(count_requests))
            .layer(TimeoutLayer::new(request_timeout))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(SetResponseHeaderLayer::overriding(
                        HeaderName::from_static(X_SERVER_PID),
                        pid,
                    )),
            )
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Control handle for drain/stop and reload.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle::new(self.shutdown.clone(), self.listener.handle())
    }

    /// Accept and serve connections until stopped.
    ///
    /// The listener is dropped before this returns.
    pub async fn serve(self) {
        let Self {
            listener,
            router,
            shutdown,
        } = self;

        shutdown
            .accept_until_stopped(listener, |stream, peer, guard| {
                let span = tracing::debug_span!("connection", id = %guard.id(), peer = %peer);
                tokio::spawn(
                    serve_connection(
                        stream,
                        router.clone(),
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
    router: Router,
    stop: CancellationToken,
    force: CancellationToken,
    guard: ConnectionGuard,
) {
    let builder = auto::Builder::new(TokioExecutor::new());
    let connection = builder.serve_connection(TokioIo::new(stream), TowerToHyperService::new(router));
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => Some(result),
        _ = stop.cancelled() => {
            connection.as_mut().graceful_shutdown();
            tokio::select! {
                result = connection.as_mut() => Some(result),
                _ = force.cancelled() => None,
            }
        }
    };

    match result {
        Some(Ok(())) => tracing::trace!("Connection finished"),
        Some(Err(e)) => tracing::debug!(error = %e, "Connection ended with error"),
        None => tracing::warn!("Connection force-closed at drain deadline"),
    }
    drop(guard);
}

async fn count_requests(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    let outcome = if response.status().is_server_error() {
        "error"
    } else {
        "ok"
    };
    metrics::record_request(Protocol::Http, outcome);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DemoConfig;
    use crate::lifecycle::shutdown::{DrainOutcome, ServerState};

    async fn start(slow_ms: u64) -> (ServerHandle, SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = Listener::bind(Protocol::Http, "127.0.0.1:0").await.unwrap();
        let routes = handlers::routes(&DemoConfig { slow_handler_ms: slow_ms });
        let server = HttpServer::with_routes(listener, routes, Duration::from_secs(30));
        let handle = server.handle();
        let addr = server.local_addr();
        let task = tokio::spawn(server.serve());
        handle
            .subscribe()
            .wait_for(|state| *state == ServerState::Serving)
            .await
            .unwrap();
        (handle, addr, task)
    }

    #[tokio::test]
    async fn responses_carry_pid_and_request_id() {
        let (handle, addr, task) = start(10).await;

        let response = reqwest::get(format!("http://{}/ping", addr)).await.unwrap();
        assert_eq!(
            response.headers().get(X_SERVER_PID).unwrap().to_str().unwrap(),
            std::process::id().to_string()
        );
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(response.text().await.unwrap(), "pong\n");

        assert_eq!(handle.drain(Duration::from_secs(1)).await, DrainOutcome::Drained);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn stop_before_serve_closes_listener() {
        let listener = Listener::bind(Protocol::Http, "127.0.0.1:0").await.unwrap();
        let server = HttpServer::with_routes(listener, Router::new(), Duration::from_secs(1));
        let handle = server.handle();

        handle.stop();
        server.serve().await;
        assert_eq!(handle.state(), ServerState::Draining);
        assert!(!handle.listener().is_open());
    }

    #[tokio::test]
    async fn drain_closes_listener_and_refuses_new_connections() {
        let (handle, addr, task) = start(10).await;
        assert_eq!(handle.state(), ServerState::Serving);

        assert_eq!(handle.drain(Duration::from_secs(1)).await, DrainOutcome::Drained);
        task.await.unwrap();

        assert!(!handle.listener().is_open());
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
