use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// 默认标识字段，任何字段被选中时都会带上
pub const IDENTIFIER_FIELD: &str = "id";

/// 关系展开的最大深度，防止 schema 出现环时无限递归
const MAX_RELATION_DEPTH: usize = 3;
/// `unflatten` 接受的列表下标上限 (不含)
pub const MAX_LIST_INDEX: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar,
    /// 对象关系 (多对一)，值为目标表名
    Object(&'static str),
    /// 数组关系 (一对多)，值为目标表名
    List(&'static str),
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn scalar(name: &'static str, description: &'static str) -> Self {
        Self { name, description, kind: FieldKind::Scalar }
    }

    pub const fn object(name: &'static str, target: &'static str, description: &'static str) -> Self {
        Self { name, description, kind: FieldKind::Object(target) }
    }

    pub const fn list(name: &'static str, target: &'static str, description: &'static str) -> Self {
        Self { name, description, kind: FieldKind::List(target) }
    }
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub fields: Vec<FieldSpec>,
}

/// 扁平化后的字段选择项：`path` 以点号表示嵌套，`[n]` 表示数组下标
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelection {
    pub path: String,
    pub selected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldSelection {
    pub fn new(path: impl Into<String>, selected: bool) -> Self {
        Self { path: path.into(), selected, description: None }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// 已注册表结构的只读目录
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: BTreeMap<&'static str, TableSchema>,
}

impl SchemaRegistry {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self {
            tables: tables.into_iter().map(|t| (t.name, t)).collect(),
        }
    }

    pub fn get(&self, table_name: &str) -> Option<&TableSchema> {
        self.tables.get(table_name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// 供 Planner 使用的 `表名 -> 描述` 列表
    pub fn descriptions(&self) -> Vec<(&'static str, &'static str)> {
        self.tables.values().map(|t| (t.name, t.description)).collect()
    }

    /// 生成字段选择的 JSON Schema (所有字段必填、禁止额外属性)，作为结构化输出目标
    pub fn selection_schema(&self, table_name: &str) -> Option<Value> {
        self.get(table_name).map(|t| self.object_schema(t, 0))
    }

    fn object_schema(&self, table: &TableSchema, depth: usize) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &table.fields {
            let prop = match field.kind {
                FieldKind::Scalar => json!({"type": "boolean", "description": field.description}),
                FieldKind::Object(target) => match self.relation_schema(target, depth) {
                    Some(inner) => json!({"description": field.description, "anyOf": [inner, {"type": "null"}]}),
                    None => continue,
                },
                FieldKind::List(target) => match self.relation_schema(target, depth) {
                    Some(inner) => json!({"description": field.description, "type": "array", "items": inner}),
                    None => continue,
                },
            };
            required.push(Value::from(field.name));
            properties.insert(field.name.to_string(), prop);
        }
        json!({
            "type": "object",
            "description": table.description,
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    fn relation_schema(&self, target: &str, depth: usize) -> Option<Value> {
        if depth + 1 >= MAX_RELATION_DEPTH {
            return None;
        }
        self.get(target).map(|t| self.object_schema(t, depth + 1))
    }

    /// 按 schema 遍历 LLM 返回的布尔选择对象，展开为扁平列表。
    ///
    /// - 布尔叶子字段：`{path, selected}`，缺失或非布尔视为 false
    /// - 对象关系：路径追加 `.<name>` 递归；值为 null 时子字段全部记为 false
    /// - 数组关系：每个元素追加 `[i]` 递归；空数组记为单条 `{path, false}`
    ///
    /// 未知表或顶层不是对象时返回 None。
    pub fn flatten(&self, table_name: &str, value: &Value) -> Option<Vec<FieldSelection>> {
        let table = self.get(table_name)?;
        let object = value.as_object()?;
        let mut out = Vec::new();
        self.flatten_into(table, Some(object), "", 0, &mut out);
        Some(out)
    }

    fn flatten_into(
        &self,
        table: &TableSchema,
        value: Option<&Map<String, Value>>,
        prefix: &str,
        depth: usize,
        out: &mut Vec<FieldSelection>,
    ) {
        for field in &table.fields {
            let path = if prefix.is_empty() {
                field.name.to_string()
            } else {
                format!("{prefix}.{}", field.name)
            };
            let raw = value.and_then(|m| m.get(field.name));

            match field.kind {
                FieldKind::Scalar => {
                    let selected = raw.and_then(Value::as_bool).unwrap_or(false);
                    out.push(FieldSelection::new(path, selected).with_description(field.description));
                }
                FieldKind::Object(target) => match self.get(target) {
                    Some(t) if depth + 1 < MAX_RELATION_DEPTH => {
                        self.flatten_into(t, raw.and_then(Value::as_object), &path, depth + 1, out);
                    }
                    _ => out.push(FieldSelection::new(path, false)),
                },
                FieldKind::List(target) => match raw.and_then(Value::as_array) {
                    Some(items) if !items.is_empty() => {
                        for (idx, item) in items.iter().enumerate() {
                            let item_path = format!("{path}[{idx}]");
                            match (item, self.get(target)) {
                                (Value::Object(m), Some(t)) if depth + 1 < MAX_RELATION_DEPTH => {
                                    self.flatten_into(t, Some(m), &item_path, depth + 1, out);
                                }
                                (other, _) => {
                                    out.push(FieldSelection::new(item_path, other.as_bool().unwrap_or(false)));
                                }
                            }
                        }
                    }
                    _ => out.push(FieldSelection::new(path, false)),
                },
            }
        }
    }

    /// 内置的 AQI 数据表结构
    pub fn aqi() -> Self {
        Self::new(vec![
            TableSchema {
                name: "provinces",
                description: "Province-level administrative data (id, name, normalized_name, administrative_id).",
                fields: vec![
                    FieldSpec::scalar("id", "Unique identifier (text) of the province"),
                    FieldSpec::scalar("name", "Vietnamese name of the province, e.g. \"Hà Nội\""),
                    FieldSpec::scalar("normalized_name", "Lower-cased name of the province for searching"),
                    FieldSpec::scalar("administrative_id", "Administrative code of the province"),
                    FieldSpec::scalar("created_at", "Timestamp when the record was created"),
                    FieldSpec::list("districts", "districts", "Districts belonging to this province"),
                ],
            },
            TableSchema {
                name: "districts",
                description: "District metadata only (id, name, province_id, normalized_name). Does NOT contain AQI values.",
                fields: vec![
                    FieldSpec::scalar("id", "Unique identifier (text) of the district, joins with distric_stats.district_id"),
                    FieldSpec::scalar("name", "Vietnamese name of the district, e.g. \"Ba Đình\", \"Hoàn Kiếm\""),
                    FieldSpec::scalar("normalized_name", "Lower-cased name of the district for searching"),
                    FieldSpec::scalar("administrative_id", "Administrative code of the district"),
                    FieldSpec::scalar("province_id", "Foreign key (text) to provinces"),
                    FieldSpec::scalar("created_at", "Timestamp when the record was created"),
                ],
            },
            TableSchema {
                name: "distric_stats",
                description: "PRIMARY table for AQI queries: current and historical AQI per district, date and hour.",
                fields: vec![
                    FieldSpec::scalar("id", "Unique identifier (integer) of the statistics record"),
                    FieldSpec::scalar("district_id", "Foreign key (text) to districts"),
                    FieldSpec::scalar("date", "Measurement date (YYYY-MM-DD); latest data: order by date desc, hour desc"),
                    FieldSpec::scalar("hour", "Measurement hour of day (0-23)"),
                    FieldSpec::scalar("component_id", "Foreign key (integer) to air_component"),
                    FieldSpec::scalar("aqi_value", "Air Quality Index (0-500); higher is worse"),
                    FieldSpec::scalar("pm25_value", "PM2.5 concentration (µg/m³)"),
                    FieldSpec::scalar("created_at", "Timestamp when the record was created"),
                    FieldSpec::object("district", "districts", "Related district; select name to include the district name"),
                ],
            },
            TableSchema {
                name: "air_component",
                description: "Detailed pollutant measurements (PM2.5, PM10, O3, NO2, SO2, CO) per date and hour.",
                fields: vec![
                    FieldSpec::scalar("id", "Unique identifier (integer) of the component record"),
                    FieldSpec::scalar("date", "Measurement date (YYYY-MM-DD)"),
                    FieldSpec::scalar("hour", "Measurement hour of day (0-23)"),
                    FieldSpec::scalar("pm25_value", "PM2.5 concentration (µg/m³)"),
                    FieldSpec::scalar("pm10_value", "PM10 concentration (µg/m³)"),
                    FieldSpec::scalar("o3_value", "Ozone concentration (µg/m³)"),
                    FieldSpec::scalar("no2_value", "Nitrogen dioxide concentration (µg/m³)"),
                    FieldSpec::scalar("so2_value", "Sulfur dioxide concentration (µg/m³)"),
                    FieldSpec::scalar("co_value", "Carbon monoxide concentration (mg/m³)"),
                    FieldSpec::scalar("created_at", "Timestamp when the record was created"),
                ],
            },
        ])
    }
}

/// 有字段被选中时，保证顶层 `id` 也被选中
pub fn ensure_identifier(fields: &mut Vec<FieldSelection>) {
    if !fields.iter().any(|f| f.selected) {
        return;
    }
    match fields.iter_mut().find(|f| f.path == IDENTIFIER_FIELD) {
        Some(id) => id.selected = true,
        None => fields.insert(0, FieldSelection::new(IDENTIFIER_FIELD, true)),
    }
}

/// `flatten` 的逆过程：把扁平路径还原成布尔选择对象
pub fn unflatten(fields: &[FieldSelection]) -> Value {
    let mut root = Value::Object(Map::new());
    for field in fields {
        let segments: Vec<&str> = field.path.split('.').collect();
        insert_path(&mut root, &segments, field.selected);
    }
    root
}

/// 拆分 `name[3]` 形式的路径片段
pub fn split_index(segment: &str) -> (&str, Option<usize>) {
    if let Some(open) = segment.find('[') {
        if let Some(idx) = segment[open + 1..]
            .strip_suffix(']')
            .and_then(|s| s.parse::<usize>().ok())
        {
            return (&segment[..open], Some(idx));
        }
    }
    (segment, None)
}

fn insert_path(node: &mut Value, segments: &[&str], selected: bool) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };
    let (name, index) = split_index(head);
    let leaf = rest.is_empty();

    match index {
        None if leaf => {
            map.insert(name.to_string(), Value::Bool(selected));
        }
        None => {
            let child = map
                .entry(name.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            insert_path(child, rest, selected);
        }
        // 超出上限的下标直接忽略
        Some(idx) if idx >= MAX_LIST_INDEX => {}
        Some(idx) => {
            let slot = map
                .entry(name.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !slot.is_array() {
                *slot = Value::Array(Vec::new());
            }
            let Value::Array(items) = slot else {
                return;
            };
            if items.len() <= idx {
                items.resize(idx + 1, Value::Null);
            }
            if leaf {
                items[idx] = Value::Bool(selected);
            } else {
                insert_path(&mut items[idx], rest, selected);
            }
        }
    }
}
