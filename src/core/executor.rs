use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::infra::hasura::GraphqlTransport;

pub const EMPTY_QUERY: &str = "empty query";

/// 执行结果信封：传输错误与 GraphQL 错误都折叠进 `error`，部分 data 保留
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub data: Option<Map<String, Value>>,
    pub error: Option<String>,
}

impl ExecutionResult {
    fn failed(error: impl Into<String>) -> Self {
        Self { data: None, error: Some(error.into()) }
    }
}

pub struct Executor {
    transport: Arc<dyn GraphqlTransport>,
}

impl Executor {
    pub fn new(transport: Arc<dyn GraphqlTransport>) -> Self {
        Self { transport }
    }

    #[instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn execute(&self, query: &str) -> ExecutionResult {
        if query.trim().is_empty() {
            return ExecutionResult::failed(EMPTY_QUERY);
        }

        match self.transport.post(query, None).await {
            Ok(resp) => {
                let error = resp
                    .errors
                    .filter(|errs| !errs.is_empty())
                    .map(|errs| errs.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join("; "));
                if let Some(e) = &error {
                    warn!("GraphQL 返回错误: {}", e);
                } else {
                    info!("查询执行成功");
                }
                ExecutionResult { data: resp.data, error }
            }
            Err(e) => {
                warn!("GraphQL 传输失败: {}", e);
                ExecutionResult::failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::hasura::{GraphqlError, GraphqlResponse, TransportError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Stub {
        calls: AtomicUsize,
        reply: fn() -> Result<GraphqlResponse, TransportError>,
    }

    #[async_trait]
    impl GraphqlTransport for Stub {
        async fn post(&self, _: &str, _: Option<&Value>) -> Result<GraphqlResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.reply)()
        }
    }

    fn executor(reply: fn() -> Result<GraphqlResponse, TransportError>) -> (Executor, Arc<Stub>) {
        let stub = Arc::new(Stub { calls: AtomicUsize::new(0), reply });
        (Executor::new(stub.clone()), stub)
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected_locally() {
        let (exec, stub) = executor(|| Ok(GraphqlResponse::default()));
        let res = exec.execute("   \n").await;
        assert_eq!(res.error.as_deref(), Some(EMPTY_QUERY));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_partial_data_is_preserved_with_errors() {
        let (exec, _) = executor(|| {
            Ok(GraphqlResponse {
                data: json!({"distric_stats": [{"id": 1}]}).as_object().cloned(),
                errors: Some(vec![
                    GraphqlError { message: "a".into(), extensions: None },
                    GraphqlError { message: "b".into(), extensions: None },
                ]),
            })
        });
        let res = exec.execute("query { distric_stats { id } }").await;
        assert_eq!(res.error.as_deref(), Some("a; b"));
        assert!(res.data.unwrap().contains_key("distric_stats"));
    }

    #[tokio::test]
    async fn test_transport_error_is_captured() {
        let (exec, _) = executor(|| Err(TransportError::Status { status: 500, body: "boom".into() }));
        let res = exec.execute("query { x { id } }").await;
        assert!(res.data.is_none());
        assert!(res.error.unwrap().contains("500"));
    }
}
