use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{instrument, warn};

use crate::core::prompts::{self, truncate_chars};
use crate::infra::llm::{complete_as, ChatMessage, OutputSchema, StructuredCompletion};

pub const NO_DATA_ANSWER: &str = "Tôi không tìm thấy dữ liệu để trả lời câu hỏi của bạn.";
pub const UNFORMATTABLE_ANSWER: &str = "Tôi tìm thấy dữ liệu nhưng không thể định dạng được.";
pub const DEGRADED_NOTE: &str = "(Lưu ý: một phần truy vấn dữ liệu bị lỗi nên câu trả lời có thể chưa đầy đủ.)";

/// 每张表在兜底回答里最多列出的行数
const FALLBACK_ROWS: usize = 5;

#[derive(Deserialize)]
struct GeneratedAnswer {
    answer: String,
}

/// 自然语言回答生成；LLM 失败时退回确定性的格式化输出
pub struct AnswerGenerator {
    llm: Arc<dyn StructuredCompletion>,
    context_limit: usize,
}

impl AnswerGenerator {
    pub fn new(llm: Arc<dyn StructuredCompletion>, context_limit: usize) -> Self {
        Self { llm, context_limit }
    }

    #[instrument(skip_all, fields(tables = data.len(), failures = failures.len()))]
    pub async fn generate(
        &self,
        question: &str,
        data: &Map<String, Value>,
        queries: &[String],
        failures: &[String],
    ) -> String {
        let data_text = serde_json::to_string_pretty(data).unwrap_or_default();
        let failures_text = if failures.is_empty() { "none".to_string() } else { failures.join("\n") };
        let messages = [
            ChatMessage::system(prompts::NLG_SYSTEM),
            ChatMessage::user(prompts::nlg_user(
                question,
                truncate_chars(&data_text, self.context_limit),
                &queries.join("\n\n"),
                &failures_text,
            )),
        ];
        let target = OutputSchema::new(
            "answer",
            json!({
                "type": "object",
                "properties": {"answer": {"type": "string"}},
                "required": ["answer"],
                "additionalProperties": false
            }),
        );

        let answer = match complete_as::<GeneratedAnswer>(self.llm.as_ref(), &messages, &target).await {
            Ok(g) if !g.answer.trim().is_empty() => g.answer,
            Ok(_) => {
                warn!("LLM 返回空回答，使用兜底格式化");
                fallback_answer(data)
            }
            Err(e) => {
                warn!("回答生成失败，使用兜底格式化: {}", e);
                fallback_answer(data)
            }
        };

        with_degraded_note(answer, !failures.is_empty())
    }
}

pub fn with_degraded_note(answer: String, degraded: bool) -> String {
    if degraded {
        format!("{answer}\n\n{DEGRADED_NOTE}")
    } else {
        answer
    }
}

/// 兜底回答：每张表列出前几行
pub fn fallback_answer(data: &Map<String, Value>) -> String {
    let has_rows = data.values().any(|v| match v {
        Value::Array(rows) => !rows.is_empty(),
        Value::Object(m) => !m.is_empty(),
        Value::Null => false,
        _ => true,
    });
    if !has_rows {
        return NO_DATA_ANSWER.to_string();
    }

    let mut parts = Vec::new();
    for (table, records) in data {
        let Some(rows) = records.as_array().filter(|rows| !rows.is_empty()) else {
            continue;
        };
        parts.push(format!("Dữ liệu từ {table}: tìm thấy {} kết quả", rows.len()));
        for row in rows.iter().take(FALLBACK_ROWS) {
            parts.push(format!("  - {}", format_row(row)));
        }
        if rows.len() > FALLBACK_ROWS {
            parts.push(format!("  ... và {} kết quả khác", rows.len() - FALLBACK_ROWS));
        }
    }

    if parts.is_empty() {
        return UNFORMATTABLE_ANSWER.to_string();
    }
    parts.join("\n")
}

fn format_row(row: &Value) -> String {
    let Some(obj) = row.as_object() else {
        return plain(row);
    };

    if let Some(aqi) = obj.get("aqi_value") {
        let district = obj
            .get("district")
            .and_then(|d| d.get("name"))
            .map(plain)
            .unwrap_or_else(|| format!("ID {}", obj.get("district_id").map(plain).unwrap_or_else(|| "N/A".into())));
        let date = obj.get("date").map(plain).unwrap_or_else(|| "N/A".into());
        let hour = obj.get("hour").map(plain).unwrap_or_else(|| "N/A".into());
        return format!("{district}: AQI {} ({date} {hour}h)", plain(aqi));
    }

    if let (Some(name), Some(id)) = (obj.get("name"), obj.get("id")) {
        return format!("{} (ID: {})", plain(name), plain(id));
    }

    let pollutants: Vec<String> = [("pm25_value", "PM2.5"), ("pm10_value", "PM10")]
        .iter()
        .filter_map(|(key, label)| obj.get(*key).map(|v| format!("{label}: {}µg/m³", plain(v))))
        .collect();
    if !pollutants.is_empty() {
        return pollutants.join(", ");
    }

    obj.iter()
        .map(|(k, v)| format!("{k}: {}", plain(v)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
