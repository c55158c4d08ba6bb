//! Demo HTTP handlers.
//!
//! `GET /` is deliberately slow so drain behaviour can be observed with a
//! plain `curl`. Anything unmatched still answers 200.

use std::time::Duration;

use axum::{extract::State, routing::get, Router};

use crate::config::DemoConfig;

#[derive(Debug, Clone)]
struct DemoState {
    slow_delay: Duration,
}

/// Routes served on the HTTP listener.
pub fn routes(demo: &DemoConfig) -> Router {
    let state = DemoState {
        slow_delay: demo.slow_handler_delay(),
    };

    Router::new()
        .route("/", get(slow_hello))
        .route("/ping", get(ping))
        .fallback(no_route)
        .with_state(state)
}

async fn slow_hello(State(state): State<DemoState>) -> &'static str {
    tracing::debug!(delay_ms = state.slow_delay.as_millis() as u64, "Slow handler started");
    tokio::time::sleep(state.slow_delay).await;
    "hello graceful\n"
}

async fn ping() -> &'static str {
    "pong\n"
}

async fn no_route() -> &'static str {
    "no route\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn call(router: Router, path: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn fast() -> DemoConfig {
        DemoConfig { slow_handler_ms: 10 }
    }

    #[tokio::test]
    async fn index_answers_after_delay() {
        let started = std::time::Instant::now();
        let (status, body) = call(routes(&fast()), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "hello graceful\n");
        assert!(started.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn ping_and_fallback() {
        assert_eq!(call(routes(&fast()), "/ping").await, (StatusCode::OK, "pong\n".to_string()));
        assert_eq!(
            call(routes(&fast()), "/nowhere").await,
            (StatusCode::OK, "no route\n".to_string())
        );
    }
}
