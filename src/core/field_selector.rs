use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::core::prompts::{self, truncate_chars};
use crate::infra::llm::{ChatMessage, OutputSchema, StructuredCompletion};
use crate::models::schema::{ensure_identifier, FieldSelection, SchemaRegistry};

/// 字段选择器：让 LLM 按表结构返回布尔选择对象，再展开为扁平路径列表
pub struct FieldSelector {
    llm: Arc<dyn StructuredCompletion>,
    schemas: Arc<SchemaRegistry>,
    context_limit: usize,
}

impl FieldSelector {
    pub fn new(llm: Arc<dyn StructuredCompletion>, schemas: Arc<SchemaRegistry>, context_limit: usize) -> Self {
        Self { llm, schemas, context_limit }
    }

    /// 任何失败 (未知表、LLM 出错、输出不是对象) 都返回 None，不向上抛
    #[instrument(skip(self, question, description), fields(table = %table_name))]
    pub async fn select(&self, question: &str, description: &str, table_name: &str) -> Option<Vec<FieldSelection>> {
        let Some(schema) = self.schemas.selection_schema(table_name) else {
            warn!("未注册的表: {}", table_name);
            return None;
        };

        // 1. 组装提示词
        let schema_text = serde_json::to_string_pretty(&schema).unwrap_or_default();
        let messages = [
            ChatMessage::system(prompts::FIELD_SELECTION_SYSTEM),
            ChatMessage::user(prompts::field_selection_user(
                question,
                description,
                truncate_chars(&schema_text, self.context_limit),
            )),
        ];

        // 2. 结构化补全
        let target = OutputSchema::new(format!("{table_name}_fields"), schema);
        let value = match self.llm.complete(&messages, &target).await {
            Ok(v) => v,
            Err(e) => {
                warn!("字段选择失败: {}", e);
                return None;
            }
        };

        // 3. 按 schema 展开并补齐 id
        let Some(mut fields) = self.schemas.flatten(table_name, &value) else {
            warn!("字段选择输出不是对象: {}", value);
            return None;
        };
        ensure_identifier(&mut fields);

        let selected: Vec<&str> = fields.iter().filter(|f| f.selected).map(|f| f.path.as_str()).collect();
        info!("已选字段: {:?}", selected);
        debug!("候选字段总数: {}", fields.len());
        Some(fields)
    }
}
