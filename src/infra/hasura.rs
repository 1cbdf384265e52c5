use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

const ADMIN_SECRET_HEADER: &str = "x-hasura-admin-secret";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("graphql request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("graphql endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphqlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

/// GraphQL 响应：data 与 errors 可同时存在 (部分结果)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphqlResponse {
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    #[serde(default)]
    pub errors: Option<Vec<GraphqlError>>,
}

#[derive(Serialize)]
struct GraphqlRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<&'a Value>,
}

/// GraphQL 传输层端口
#[async_trait]
pub trait GraphqlTransport: Send + Sync {
    async fn post(&self, query: &str, variables: Option<&Value>) -> Result<GraphqlResponse, TransportError>;
}

pub struct HasuraClient {
    http: reqwest::Client,
    endpoint: String,
    admin_secret: String,
}

impl HasuraClient {
    pub fn new(
        endpoint: impl Into<String>,
        admin_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            admin_secret: admin_secret.into(),
        })
    }
}

#[async_trait]
impl GraphqlTransport for HasuraClient {
    #[instrument(skip(self, query, variables), fields(endpoint = %self.endpoint))]
    async fn post(&self, query: &str, variables: Option<&Value>) -> Result<GraphqlResponse, TransportError> {
        let mut req = self
            .http
            .post(&self.endpoint)
            .json(&GraphqlRequest { query, variables });
        if !self.admin_secret.is_empty() {
            req = req.header(ADMIN_SECRET_HEADER, &self.admin_secret);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status { status: status.as_u16(), body });
        }

        let parsed: GraphqlResponse = resp.json().await?;
        debug!(
            "GraphQL 响应: data={} errors={}",
            parsed.data.is_some(),
            parsed.errors.as_ref().map_or(0, Vec::len)
        );
        Ok(parsed)
    }
}
