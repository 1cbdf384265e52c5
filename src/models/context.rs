use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String, // 用户提问内容
}

/// `/api/ask` 的响应体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    pub data: Map<String, Value>,
    pub graphql_queries: Vec<String>,
    pub errors: Vec<String>,
    pub request_id: String,
}

#[derive(Debug, Serialize)]
pub struct TableInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub fields: Vec<&'static str>,
}
