use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("llm returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("llm returned an empty completion")]
    EmptyCompletion,

    #[error("completion does not match schema `{schema}`: {reason}")]
    SchemaMismatch { schema: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// 结构化输出的目标 JSON Schema
#[derive(Debug, Clone)]
pub struct OutputSchema {
    pub name: String,
    pub schema: Value,
    pub strict: bool,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self { name: name.into(), schema, strict: true }
    }

    pub fn lenient(mut self) -> Self {
        self.strict = false;
        self
    }
}

/// 结构化补全能力：给定对话与目标 schema，返回符合 schema 的 JSON 值
#[async_trait]
pub trait StructuredCompletion: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], schema: &OutputSchema) -> Result<Value, LlmError>;
}

/// 调用补全并反序列化为具体类型，类型不符视为 schema 不匹配
pub async fn complete_as<T: DeserializeOwned>(
    llm: &dyn StructuredCompletion,
    messages: &[ChatMessage],
    schema: &OutputSchema,
) -> Result<T, LlmError> {
    let value = llm.complete(messages, schema).await?;
    serde_json::from_value(value).map_err(|e| LlmError::SchemaMismatch {
        schema: schema.name.clone(),
        reason: e.to_string(),
    })
}

/// OpenAI 兼容的 chat/completions 客户端
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl StructuredCompletion for OpenAiClient {
    #[instrument(skip(self, messages, schema), fields(schema = %schema.name, model = %self.model))]
    async fn complete(&self, messages: &[ChatMessage], schema: &OutputSchema) -> Result<Value, LlmError> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                    "strict": schema.strict,
                }
            }
        });

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body });
        }

        let parsed: CompletionResponse = resp.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyCompletion)?;
        debug!("LLM 原始输出长度: {}", content.len());

        serde_json::from_str(&content).map_err(|e| LlmError::SchemaMismatch {
            schema: schema.name.clone(),
            reason: e.to_string(),
        })
    }
}
