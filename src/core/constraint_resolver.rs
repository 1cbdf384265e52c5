use chrono::{Local, NaiveDate};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, instrument, warn};

use crate::core::entity_index::EntityIndex;
use crate::core::prompts::{self, truncate_chars};
use crate::infra::llm::{complete_as, ChatMessage, OutputSchema, StructuredCompletion};
use crate::models::constraints::{OrderItem, QueryConstraints, SortDirection};
use crate::models::filter::{BoolExpr, Condition, Operator};
use crate::models::schema::{split_index, FieldSelection};

const LATEST_CUES: &[&str] = &["current", "latest", "now", "hiện tại", "mới nhất", "bây giờ", "hiện nay"];
const OLDEST_CUES: &[&str] = &["oldest", "earliest", "cũ nhất"];
const TODAY_CUES: &[&str] = &["today", "hôm nay"];

// 独立出现的整数 (排除日期、PM2.5 之类)
static EXPLICIT_LIMIT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)(\d{1,4})(?:[\s,!?;:]|$)").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolverMode {
    #[default]
    Llm,
    Heuristic,
}

impl FromStr for ResolverMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "llm" => Ok(ResolverMode::Llm),
            "heuristic" => Ok(ResolverMode::Heuristic),
            other => Err(anyhow::anyhow!("未知的约束推断模式: {other}")),
        }
    }
}

/// 约束推断：根据问题与候选字段生成 where / order_by / limit / offset
pub struct ConstraintResolver {
    mode: ResolverMode,
    llm: Arc<dyn StructuredCompletion>,
    entities: Arc<EntityIndex>,
    context_limit: usize,
}

impl ConstraintResolver {
    pub fn new(
        mode: ResolverMode,
        llm: Arc<dyn StructuredCompletion>,
        entities: Arc<EntityIndex>,
        context_limit: usize,
    ) -> Self {
        Self { mode, llm, entities, context_limit }
    }

    pub async fn resolve(&self, question: &str, description: &str, fields: &[FieldSelection]) -> Option<QueryConstraints> {
        self.resolve_with_context(question, description, fields, &Map::new()).await
    }

    /// `prior` 为之前阶段累积的查询结果 (按表名)，第一阶段为空
    #[instrument(skip(self, question, description, candidates, prior), fields(mode = ?self.mode, candidates = candidates.len()))]
    pub async fn resolve_with_context(
        &self,
        question: &str,
        description: &str,
        candidates: &[FieldSelection],
        prior: &Map<String, Value>,
    ) -> Option<QueryConstraints> {
        if candidates.is_empty() {
            debug!("候选字段为空，跳过约束推断");
            return None;
        }

        let today = Local::now().date_naive();
        let constraints = match self.mode {
            ResolverMode::Heuristic => infer_constraints(question, candidates, prior, &self.entities, today),
            ResolverMode::Llm => self.resolve_by_llm(question, description, candidates, prior, today).await,
        };

        match &constraints {
            Some(c) => info!("推断约束: {}", serde_json::to_string(c).unwrap_or_default()),
            None => info!("未推断出约束，执行无约束查询"),
        }
        constraints
    }

    async fn resolve_by_llm(
        &self,
        question: &str,
        description: &str,
        fields: &[FieldSelection],
        prior: &Map<String, Value>,
        today: NaiveDate,
    ) -> Option<QueryConstraints> {
        let fields_text = serde_json::to_string(fields).unwrap_or_default();
        let prior_text = (!prior.is_empty()).then(|| serde_json::to_string(prior).unwrap_or_default());

        let messages = [
            ChatMessage::system(prompts::CONSTRAINT_SYSTEM),
            ChatMessage::user(prompts::constraint_user(
                question,
                description,
                truncate_chars(&fields_text, self.context_limit),
                &today.format("%Y-%m-%d").to_string(),
                prior_text.as_deref().map(|p| truncate_chars(p, self.context_limit)),
            )),
        ];

        let target = OutputSchema::new("query_constraints", constraints_schema()).lenient();
        match complete_as::<QueryConstraints>(self.llm.as_ref(), &messages, &target).await {
            Ok(c) if c.is_empty() => None,
            Ok(c) => Some(c),
            Err(e) => {
                warn!("约束推断失败: {}", e);
                None
            }
        }
    }
}

/// QueryConstraints 的结构化输出 schema (递归 where 表达式通过 $defs 引用)
pub fn constraints_schema() -> Value {
    let ops: Vec<&str> = Operator::ALL.iter().map(Operator::as_str).collect();
    json!({
        "type": "object",
        "properties": {
            "where": {"anyOf": [{"$ref": "#/$defs/bool_expr"}, {"type": "null"}]},
            "order_by": {
                "anyOf": [{"type": "array", "items": {"$ref": "#/$defs/order_item"}}, {"type": "null"}]
            },
            "limit": {"type": ["integer", "null"], "minimum": 1},
            "offset": {"type": ["integer", "null"], "minimum": 0}
        },
        "required": ["where", "order_by", "limit", "offset"],
        "additionalProperties": false,
        "$defs": {
            "condition": {
                "type": "object",
                "properties": {
                    "field": {"type": "string"},
                    "op": {"type": ["string", "null"], "enum": ops.iter().map(|o| Value::from(*o)).chain([Value::Null]).collect::<Vec<_>>()},
                    "value": {},
                    "nested": {"anyOf": [{"$ref": "#/$defs/condition"}, {"type": "null"}]}
                },
                "required": ["field"]
            },
            "bool_expr": {
                "anyOf": [
                    {"$ref": "#/$defs/condition"},
                    {"type": "object", "properties": {"_and": {"type": "array", "items": {"$ref": "#/$defs/bool_expr"}}}, "required": ["_and"]},
                    {"type": "object", "properties": {"_or": {"type": "array", "items": {"$ref": "#/$defs/bool_expr"}}}, "required": ["_or"]},
                    {"type": "object", "properties": {"_not": {"$ref": "#/$defs/bool_expr"}}, "required": ["_not"]}
                ]
            },
            "order_item": {
                "type": "object",
                "properties": {
                    "field": {"type": "string"},
                    "direction": {"type": "string", "enum": ["asc", "desc"]},
                    "nulls": {"type": ["string", "null"], "enum": ["first", "last", null]}
                },
                "required": ["field", "direction"]
            }
        }
    })
}

/// 不依赖 LLM 的确定性推断。
///
/// - "hiện tại / latest" 等：按 date、hour 倒序并 limit 1 (oldest 则正序)
/// - 问题中独立出现的整数：limit N，优先于上面的 limit 1
/// - "hôm nay / today"：date 等于当天
/// - 上一阶段结果中带 id 的行：`X_id` 的 `_in` / `_eq` 过滤，优先于名称过滤
/// - 命中已知实体名称：对 name / normalized_name 做 `_ilike '%名称%'`，必要时经由关系字段
pub fn infer_constraints(
    question: &str,
    fields: &[FieldSelection],
    prior: &Map<String, Value>,
    entities: &EntityIndex,
    today: NaiveDate,
) -> Option<QueryConstraints> {
    let lower = question.to_lowercase();
    let paths: HashSet<String> = fields.iter().map(|f| plain_path(&f.path)).collect();
    let has = |p: &str| paths.contains(p);

    let latest = LATEST_CUES.iter().any(|c| contains_cue(&lower, c));
    let oldest = !latest && OLDEST_CUES.iter().any(|c| contains_cue(&lower, c));

    // A. 排序
    let mut order_by = Vec::new();
    if (latest || oldest) && has("date") {
        let direction = if latest { SortDirection::Desc } else { SortDirection::Asc };
        for field in ["date", "hour"].into_iter().filter(|f| has(*f)) {
            if let Ok(item) = OrderItem::new(field, direction) {
                order_by.push(item);
            }
        }
    }

    // B. 条数
    let limit = explicit_limit(question).or(if latest || oldest { Some(1) } else { None });

    // C. 过滤条件
    let mut filters: Vec<BoolExpr> = Vec::new();
    let threaded = threaded_filters(prior, &paths);
    if threaded.is_empty() {
        if let Some(entity) = entities.find_in(question) {
            if let Some(expr) = name_filter(&entity, &paths) {
                debug!("名称过滤: {}", entity);
                filters.push(expr);
            }
        }
    } else {
        filters.extend(threaded);
    }

    if TODAY_CUES.iter().any(|c| contains_cue(&lower, c)) && has("date") {
        if let Ok(cond) = Condition::new("date", Operator::Eq, today.format("%Y-%m-%d").to_string()) {
            filters.push(cond.into());
        }
    }

    let filter = match filters.len() {
        0 => None,
        1 => filters.pop(),
        _ => Some(BoolExpr::and(filters)),
    };

    if filter.is_none() && order_by.is_empty() && limit.is_none() {
        return None;
    }
    match QueryConstraints::new(filter, Some(order_by), limit, None) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!("启发式约束无效: {}", e);
            None
        }
    }
}

fn plain_path(path: &str) -> String {
    path.split('.')
        .map(|seg| split_index(seg).0)
        .collect::<Vec<_>>()
        .join(".")
}

/// 以非字母数字为边界的子串匹配，避免 "now" 命中 "known"
fn contains_cue(text: &str, cue: &str) -> bool {
    text.match_indices(cue).any(|(idx, _)| {
        let before = text[..idx].chars().next_back();
        let after = text[idx + cue.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn explicit_limit(question: &str) -> Option<i64> {
    let re = EXPLICIT_LIMIT.as_ref()?;
    re.captures_iter(question)
        .filter_map(|cap| cap.get(1)?.as_str().parse::<i64>().ok())
        .find(|n| *n > 0)
}

fn name_filter(entity: &str, paths: &HashSet<String>) -> Option<BoolExpr> {
    let display = format!("%{entity}%");
    let normalized = format!("%{}%", entity.to_lowercase());

    // 1. 本表有 name 字段
    if paths.contains("name") {
        let mut items = vec![BoolExpr::from(Condition::new("name", Operator::Ilike, display).ok()?)];
        if paths.contains("normalized_name") {
            items.push(Condition::new("normalized_name", Operator::Ilike, normalized).ok()?.into());
        }
        return Some(or_if_many(items));
    }

    // 2. 经由关系字段 X.name (按路径排序，保证结果确定)
    let mut relations: Vec<&str> = paths
        .iter()
        .filter_map(|p| p.strip_suffix(".name"))
        .filter(|rel| !rel.contains('.'))
        .collect();
    relations.sort_unstable();
    let relation = *relations.first()?;

    let mut items = vec![BoolExpr::from(
        Condition::nested(relation, Condition::new("name", Operator::Ilike, display).ok()?).ok()?,
    )];
    if paths.contains(&format!("{relation}.normalized_name")) {
        items.push(
            Condition::nested(relation, Condition::new("normalized_name", Operator::Ilike, normalized).ok()?)
                .ok()?
                .into(),
        );
    }
    Some(or_if_many(items))
}

fn or_if_many(mut items: Vec<BoolExpr>) -> BoolExpr {
    if items.len() == 1 {
        items.remove(0)
    } else {
        BoolExpr::or(items)
    }
}

/// 把上一阶段 `X` / `Xs` 表结果中的 id 转成当前表 `X_id` 上的过滤
fn threaded_filters(prior: &Map<String, Value>, paths: &HashSet<String>) -> Vec<BoolExpr> {
    let mut out = Vec::new();
    for (table, rows) in prior {
        let singular = table.strip_suffix('s').unwrap_or(table);
        let fk = format!("{singular}_id");
        if !paths.contains(&fk) {
            continue;
        }

        let mut ids: Vec<Value> = Vec::new();
        let rows = match rows {
            Value::Array(items) => items.iter().collect::<Vec<_>>(),
            obj @ Value::Object(_) => vec![obj],
            _ => continue,
        };
        for row in rows {
            if let Some(id) = row.get("id").filter(|v| matches!(v, Value::String(_) | Value::Number(_))) {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
        }

        let cond = match ids.len() {
            0 => continue,
            1 => Condition::new(fk.as_str(), Operator::Eq, ids.remove(0)),
            _ => Condition::new(fk.as_str(), Operator::In, Value::Array(ids)),
        };
        match cond {
            Ok(c) => {
                info!("沿用上一阶段结果: {} -> {}", table, fk);
                out.push(c.into());
            }
            Err(e) => warn!("无法沿用 {} 的结果: {}", table, e),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::llm::LlmError;
    use crate::models::schema::SchemaRegistry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn stats_fields() -> Vec<FieldSelection> {
        SchemaRegistry::aqi()
            .flatten("distric_stats", &json!({"id": true, "aqi_value": true, "district": {"name": true}}))
            .unwrap()
    }

    fn entities() -> EntityIndex {
        EntityIndex::build(&["Ba Đình", "Hoàn Kiếm", "Hà Nội"]).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 16).unwrap()
    }

    fn infer(question: &str, fields: &[FieldSelection]) -> Option<QueryConstraints> {
        infer_constraints(question, fields, &Map::new(), &entities(), today())
    }

    #[test]
    fn test_latest_orders_by_date_and_hour_with_limit_one() {
        let c = infer("current AQI in Ba Đình", &stats_fields()).unwrap();
        let order: Vec<_> = c.order_by().unwrap().iter().map(|o| (o.field(), o.direction())).collect();
        assert_eq!(order, vec![("date", SortDirection::Desc), ("hour", SortDirection::Desc)]);
        assert_eq!(c.limit(), Some(1));

        let filter = serde_json::to_value(c.filter().unwrap()).unwrap();
        assert_eq!(
            filter,
            json!({"_or": [
                {"field": "district", "nested": {"field": "name", "op": "_ilike", "value": "%Ba Đình%"}},
                {"field": "district", "nested": {"field": "normalized_name", "op": "_ilike", "value": "%ba đình%"}}
            ]})
        );
    }

    #[test]
    fn test_explicit_number_sets_limit() {
        let c = infer("top 5 quận ô nhiễm nhất hiện nay", &stats_fields()).unwrap();
        assert_eq!(c.limit(), Some(5));
        assert!(infer("AQI ngày 2024-01-15", &stats_fields()).is_none());
        assert!(infer("PM2.5 levels", &stats_fields()).is_none());
    }

    #[test]
    fn test_oldest_orders_ascending() {
        let c = infer("oldest record", &stats_fields()).unwrap();
        assert_eq!(c.order_by().unwrap()[0].direction(), SortDirection::Asc);
    }

    #[test]
    fn test_cue_words_need_word_boundaries() {
        assert!(infer("known districts", &stats_fields()).is_none());
    }

    #[test]
    fn test_today_adds_date_filter() {
        let c = infer("AQI hôm nay", &stats_fields()).unwrap();
        let filter = serde_json::to_value(c.filter().unwrap()).unwrap();
        assert_eq!(filter, json!({"field": "date", "op": "_eq", "value": "2026-01-16"}));
    }

    #[test]
    fn test_name_filter_on_own_table() {
        let fields = SchemaRegistry::aqi().flatten("districts", &json!({"id": true, "name": true})).unwrap();
        let c = infer("thông tin quận Hoàn Kiếm", &fields).unwrap();
        let filter = serde_json::to_value(c.filter().unwrap()).unwrap();
        assert_eq!(filter["_or"][0], json!({"field": "name", "op": "_ilike", "value": "%Hoàn Kiếm%"}));
        assert!(c.order_by().is_none());
    }

    #[test]
    fn test_prior_ids_take_precedence_over_name_filter() {
        let prior = json!({"districts": [{"id": "001", "name": "Ba Đình"}, {"id": "002"}]});
        let prior = prior.as_object().unwrap();
        let fields = SchemaRegistry::aqi()
            .flatten("distric_stats", &json!({"id": true, "district_id": true, "aqi_value": true}))
            .unwrap();
        let c = infer_constraints("AQI hiện tại ở Ba Đình", &fields, prior, &entities(), today()).unwrap();
        let filter = serde_json::to_value(c.filter().unwrap()).unwrap();
        assert_eq!(filter, json!({"field": "district_id", "op": "_in", "value": ["001", "002"]}));
    }

    #[test]
    fn test_single_prior_id_uses_eq() {
        let prior = json!({"districts": [{"id": "001"}]});
        let fields = stats_fields();
        let c = infer_constraints("AQI", &fields, prior.as_object().unwrap(), &entities(), today()).unwrap();
        let filter = serde_json::to_value(c.filter().unwrap()).unwrap();
        assert_eq!(filter, json!({"field": "district_id", "op": "_eq", "value": "001"}));
    }

    #[test]
    fn test_constraints_schema_lists_all_operators() {
        let schema = constraints_schema();
        let ops = schema["$defs"]["condition"]["properties"]["op"]["enum"].as_array().unwrap();
        assert_eq!(ops.len(), Operator::ALL.len() + 1);
    }

    #[test]
    fn test_resolver_mode_from_str() {
        assert_eq!("Heuristic".parse::<ResolverMode>().unwrap(), ResolverMode::Heuristic);
        assert!("magic".parse::<ResolverMode>().is_err());
    }

    struct Counting {
        calls: AtomicUsize,
        reply: Result<Value, ()>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StructuredCompletion for Counting {
        async fn complete(&self, messages: &[ChatMessage], _: &OutputSchema) -> Result<Value, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().extend(messages.iter().map(|m| m.content.clone()));
            self.reply.clone().map_err(|_| LlmError::EmptyCompletion)
        }
    }

    fn resolver(reply: Result<Value, ()>) -> (ConstraintResolver, Arc<Counting>) {
        let llm = Arc::new(Counting { calls: AtomicUsize::new(0), reply, prompts: Mutex::new(Vec::new()) });
        let r = ConstraintResolver::new(ResolverMode::Llm, llm.clone(), Arc::new(entities()), 4000);
        (r, llm)
    }

    #[tokio::test]
    async fn test_empty_fields_skip_llm() {
        let (r, llm) = resolver(Ok(json!({"limit": 1})));
        assert!(r.resolve("q", "d", &[]).await.is_none());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_llm_output_is_parsed() {
        let (r, llm) = resolver(Ok(json!({
            "where": {"field": "aqi_value", "op": "_gt", "value": 100},
            "order_by": [{"field": "aqi_value", "direction": "desc"}],
            "limit": 10,
            "offset": null
        })));
        let c = r.resolve("AQI trên 100", "", &stats_fields()).await.unwrap();
        assert_eq!(c.limit(), Some(10));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_llm_output_yields_none() {
        let (r, _) = resolver(Ok(json!({"where": {"field": "aqi_value", "op": "_between", "value": 5}})));
        assert!(r.resolve("q", "d", &stats_fields()).await.is_none());

        let (r, _) = resolver(Err(()));
        assert!(r.resolve("q", "d", &stats_fields()).await.is_none());
    }

    #[tokio::test]
    async fn test_llm_prompt_carries_todays_date() {
        let (r, llm) = resolver(Ok(json!({"limit": 1})));
        let before = Local::now().date_naive().format("%Y-%m-%d").to_string();
        r.resolve_with_context("AQI hôm nay ở Ba Đình", "", &stats_fields(), &Map::new()).await;
        let after = Local::now().date_naive().format("%Y-%m-%d").to_string();

        let prompts = llm.prompts.lock().unwrap();
        let user = prompts.last().unwrap();
        assert!(user.contains(&format!("Today's date: {before}")) || user.contains(&format!("Today's date: {after}")));
    }
}
