//! RPC method dispatch.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::DemoConfig;
use crate::rpc::RpcError;

/// Handles decoded RPC calls.
pub trait RpcService: Send + Sync + 'static {
    fn call(&self, method: &str, params: Option<Value>) -> BoxFuture<'static, Result<Value, RpcError>>;
}

impl<S: RpcService + ?Sized> RpcService for Arc<S> {
    fn call(&self, method: &str, params: Option<Value>) -> BoxFuture<'static, Result<Value, RpcError>> {
        (**self).call(method, params)
    }
}

/// Parameters of `get` and `put`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRequest {
    pub id: String,
}

/// Result of `get` and `put`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub success: bool,
    pub code: i32,
    pub data: String,
    pub err: String,
}

impl ServiceResponse {
    fn ok(data: String) -> Self {
        Self {
            success: true,
            code: 1,
            data,
            err: String::new(),
        }
    }
}

/// `get` answers at once, `put` after the configured delay.
#[derive(Debug, Clone)]
pub struct DemoService {
    slow_delay: Duration,
}

impl DemoService {
    pub fn new(config: &DemoConfig) -> Self {
        Self {
            slow_delay: config.slow_handler_delay(),
        }
    }
}

fn item(params: Option<Value>) -> Result<ItemRequest, RpcError> {
    let params = params.ok_or_else(|| RpcError::InvalidParams("missing params".to_string()))?;
    serde_json::from_value(params).map_err(|e| RpcError::InvalidParams(e.to_string()))
}

fn to_value(response: ServiceResponse) -> Result<Value, RpcError> {
    serde_json::to_value(response).map_err(|e| RpcError::Internal(e.to_string()))
}

impl RpcService for DemoService {
    fn call(&self, method: &str, params: Option<Value>) -> BoxFuture<'static, Result<Value, RpcError>> {
        let delay = self.slow_delay;
        let method = method.to_string();

        Box::pin(async move {
            match method.as_str() {
                "get" => {
                    let request = item(params)?;
                    to_value(ServiceResponse::ok(format!("get option success: {}", request.id)))
                }
                "put" => {
                    let request = item(params)?;
                    tracing::debug!(id = %request.id, delay_ms = delay.as_millis() as u64, "Slow put started");
                    tokio::time::sleep(delay).await;
                    to_value(ServiceResponse::ok(format!("put option success: {}", request.id)))
                }
                other => Err(RpcError::MethodNotFound(other.to_string())),
            }
        })
    }
}
