//! 查询编译器：`(表名, 字段选择, 约束) -> GraphQL 查询字符串`。
//!
//! 纯函数，无 I/O，对任意输入都会产出语法合法的查询：
//! 非法路径被丢弃，什么都没选时退回到标识字段 `id`。

use serde_json::Value;
use std::fmt::Write;

use crate::models::constraints::{NullsPosition, OrderItem, QueryConstraints};
use crate::models::filter::{is_graphql_name, BoolExpr, Condition, Operator, Predicate};
use crate::models::schema::{split_index, FieldSelection, IDENTIFIER_FIELD};

pub fn compile(table_name: &str, fields: &[FieldSelection], constraints: Option<&QueryConstraints>) -> String {
    let tree = FieldTree::from_selection(fields);
    let selection = if tree.is_empty() {
        IDENTIFIER_FIELD.to_string()
    } else {
        tree.render()
    };

    let args = constraints.map(render_arguments).unwrap_or_default();
    let head = if args.is_empty() {
        table_name.to_string()
    } else {
        format!("{table_name}({})", args.join(", "))
    };

    format!("query {{\n  {head} {{\n    {selection}\n  }}\n}}")
}

fn render_arguments(c: &QueryConstraints) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(expr) = c.filter() {
        args.push(format!("where: {{{}}}", render_expr(expr)));
    }
    if let Some(items) = c.order_by().filter(|items| !items.is_empty()) {
        let rendered: Vec<String> = items.iter().map(render_order_item).collect();
        args.push(format!("order_by: [{}]", rendered.join(", ")));
    }
    if let Some(limit) = c.limit() {
        args.push(format!("limit: {limit}"));
    }
    if let Some(offset) = c.offset() {
        args.push(format!("offset: {offset}"));
    }
    args
}

// ---------------------------------------------------------------------------
// 字段树
// ---------------------------------------------------------------------------

/// 按首次出现顺序保存的字段树；有子节点的即为关系字段
#[derive(Debug, Default)]
struct FieldTree {
    children: Vec<(String, FieldTree)>,
}

impl FieldTree {
    fn from_selection(fields: &[FieldSelection]) -> Self {
        let mut root = FieldTree::default();
        for field in fields.iter().filter(|f| f.selected) {
            if let Some(segments) = normalize_path(&field.path) {
                root.insert(&segments);
            }
        }
        root
    }

    fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    fn insert(&mut self, segments: &[&str]) {
        let Some((head, rest)) = segments.split_first() else {
            return;
        };
        let pos = match self.children.iter().position(|(name, _)| name == head) {
            Some(pos) => pos,
            None => {
                self.children.push((head.to_string(), FieldTree::default()));
                self.children.len() - 1
            }
        };
        self.children[pos].1.insert(rest);
    }

    /// 简单字段在前，关系字段 `name { ... }` 在后
    fn render(&self) -> String {
        let simple = self
            .children
            .iter()
            .filter(|(_, node)| node.is_empty())
            .map(|(name, _)| name.clone());
        let nested = self
            .children
            .iter()
            .filter(|(_, node)| !node.is_empty())
            .map(|(name, node)| format!("{name} {{ {} }}", node.render()));
        simple.chain(nested).collect::<Vec<_>>().join(" ")
    }
}

/// 去掉 `[n]` 下标并校验每一段，任何一段非法则整条路径丢弃
fn normalize_path(path: &str) -> Option<Vec<&str>> {
    let segments: Vec<&str> = path.split('.').map(|seg| split_index(seg.trim()).0).collect();
    segments.iter().all(|seg| is_graphql_name(seg)).then_some(segments)
}

// ---------------------------------------------------------------------------
// where 子句
// ---------------------------------------------------------------------------

fn render_expr(expr: &BoolExpr) -> String {
    match expr {
        BoolExpr::Condition(cond) => render_condition(cond),
        BoolExpr::And { items } => format!("_and: [{}]", render_items(items)),
        BoolExpr::Or { items } => format!("_or: [{}]", render_items(items)),
        BoolExpr::Not { item } => format!("_not: {{{}}}", render_expr(item)),
    }
}

fn render_items(items: &[BoolExpr]) -> String {
    items
        .iter()
        .map(|item| format!("{{{}}}", render_expr(item)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_condition(cond: &Condition) -> String {
    match cond.predicate() {
        Predicate::Nested(inner) => format!("{}: {{{}}}", cond.field(), render_condition(inner)),
        Predicate::Compare { op, value } => format!("{}: {{{}}}", cond.field(), render_comparison(*op, value)),
    }
}

fn render_comparison(op: Operator, value: &Value) -> String {
    match (op, value) {
        // Hasura 没有 _between，展开为闭区间
        (Operator::Between, Value::Array(pair)) if pair.len() == 2 => {
            format!("_gte: {}, _lte: {}", format_value(&pair[0]), format_value(&pair[1]))
        }
        (Operator::IsNotNull, Value::Bool(flag)) => format!("_is_null: {}", !flag),
        (Operator::IsNotNull, _) => "_is_null: false".to_string(),
        (op, value) => format!("{}: {}", op.as_str(), format_value(value)),
    }
}

/// GraphQL 字面量
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .filter(|(k, _)| is_graphql_name(k))
                .map(|(k, v)| format!("{k}: {}", format_value(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

// ---------------------------------------------------------------------------
// order_by
// ---------------------------------------------------------------------------

fn render_order_item(item: &OrderItem) -> String {
    let direction = match item.nulls() {
        None => item.direction().as_str().to_string(),
        Some(NullsPosition::First) => format!("{}_nulls_first", item.direction().as_str()),
        Some(NullsPosition::Last) => format!("{}_nulls_last", item.direction().as_str()),
    };
    // district.name -> {district: {name: asc}}
    item.field()
        .rsplit('.')
        .fold(direction, |acc, segment| format!("{{{segment}: {acc}}}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::constraints::SortDirection;
    use serde_json::json;

    fn sel(paths: &[&str]) -> Vec<FieldSelection> {
        paths.iter().map(|p| FieldSelection::new(*p, true)).collect()
    }

    fn cond(field: &str, op: Operator, value: Value) -> BoolExpr {
        Condition::new(field, op, value).unwrap().into()
    }

    fn where_only(expr: BoolExpr) -> QueryConstraints {
        QueryConstraints::new(Some(expr), None, None, None).unwrap()
    }

    fn balanced(s: &str) -> bool {
        let mut stack = Vec::new();
        let mut in_string = false;
        let mut escaped = false;
        for c in s.chars() {
            if in_string {
                match (escaped, c) {
                    (true, _) => escaped = false,
                    (false, '\\') => escaped = true,
                    (false, '"') => in_string = false,
                    _ => {}
                }
                continue;
            }
            match c {
                '"' => in_string = true,
                '{' | '[' | '(' => stack.push(c),
                '}' => {
                    if stack.pop() != Some('{') {
                        return false;
                    }
                }
                ']' => {
                    if stack.pop() != Some('[') {
                        return false;
                    }
                }
                ')' => {
                    if stack.pop() != Some('(') {
                        return false;
                    }
                }
                _ => {}
            }
        }
        stack.is_empty() && !in_string
    }

    #[test]
    fn test_compile_without_arguments() {
        let q = compile("districts", &sel(&["id", "name"]), None);
        assert_eq!(q, "query {\n  districts {\n    id name\n  }\n}");
    }

    #[test]
    fn test_compile_falls_back_to_identifier() {
        let unselected = vec![FieldSelection::new("name", false)];
        for fields in [vec![], unselected] {
            let q = compile("districts", &fields, None);
            assert!(q.contains("districts {\n    id\n  }"), "{q}");
            assert!(balanced(&q));
        }
    }

    #[test]
    fn test_compile_is_deterministic() {
        let c = QueryConstraints::new(
            Some(cond("aqi_value", Operator::Gt, json!(100))),
            Some(vec![OrderItem::desc("date").unwrap()]),
            Some(3),
            Some(1),
        )
        .unwrap();
        let fields = sel(&["aqi_value", "district.name", "date"]);
        assert_eq!(
            compile("distric_stats", &fields, Some(&c)),
            compile("distric_stats", &fields, Some(&c))
        );
    }

    #[test]
    fn test_simple_comparison() {
        let q = compile("distric_stats", &sel(&["aqi_value"]), Some(&where_only(cond("aqi_value", Operator::Gt, json!(100)))));
        assert!(q.contains("where: {aqi_value: {_gt: 100}}"), "{q}");
    }

    #[test]
    fn test_nested_relationship_filter() {
        let inner = Condition::new("name", Operator::Ilike, "%Ba Đình%").unwrap();
        let expr = Condition::nested("district", inner).unwrap().into();
        let q = compile("distric_stats", &sel(&["aqi_value"]), Some(&where_only(expr)));
        assert!(q.contains(r#"district: {name: {_ilike: "%Ba Đình%"}}"#), "{q}");
    }

    #[test]
    fn test_and_composition() {
        let expr = BoolExpr::and(vec![
            cond("aqi_value", Operator::Gt, json!(100)),
            cond("hour", Operator::Lte, json!(12)),
        ]);
        let q = compile("distric_stats", &[], Some(&where_only(expr)));
        assert!(q.contains("_and: [{aqi_value: {_gt: 100}}, {hour: {_lte: 12}}]"), "{q}");
    }

    #[test]
    fn test_deep_not_or_stays_balanced() {
        let expr = BoolExpr::not(BoolExpr::or(vec![
            BoolExpr::and(vec![
                cond("aqi_value", Operator::Gt, json!(100)),
                BoolExpr::not(cond("district_id", Operator::In, json!(["001", "002"]))),
            ]),
            cond("date", Operator::Eq, json!("2024-01-01")),
        ]));
        let q = compile("distric_stats", &sel(&["id"]), Some(&where_only(expr)));
        assert!(q.contains("_not: {_or: [{_and: [{aqi_value: {_gt: 100}}, {_not: {district_id: {_in: [\"001\", \"002\"]}}}]}, {date: {_eq: \"2024-01-01\"}}]}"), "{q}");
        assert!(balanced(&q));
    }

    #[test]
    fn test_between_and_null_checks_render_hasura_operators() {
        let expr = BoolExpr::and(vec![
            cond("aqi_value", Operator::Between, json!([50, 150])),
            Condition::with_optional_value("pm25_value", Operator::IsNotNull, None).unwrap().into(),
            cond("co_value", Operator::IsNotNull, json!(false)),
            cond("o3_value", Operator::IsNull, json!(true)),
        ]);
        let q = compile("air_component", &[], Some(&where_only(expr)));
        assert!(q.contains("aqi_value: {_gte: 50, _lte: 150}"), "{q}");
        assert!(q.contains("pm25_value: {_is_null: false}"), "{q}");
        assert!(q.contains("co_value: {_is_null: true}"), "{q}");
        assert!(q.contains("o3_value: {_is_null: true}"), "{q}");
        assert!(!q.contains("_between"));
    }

    #[test]
    fn test_string_values_are_escaped() {
        let expr = cond("name", Operator::Eq, json!("a\"} } mutation { x \\ \n"));
        let q = compile("districts", &[], Some(&where_only(expr)));
        assert!(q.contains(r#"name: {_eq: "a\"} } mutation { x \\ \n"}"#), "{q}");
        assert!(balanced(&q));
    }

    #[test]
    fn test_format_value_variants() {
        assert_eq!(format_value(&Value::Null), "null");
        assert_eq!(format_value(&json!(true)), "true");
        assert_eq!(format_value(&json!(2.5)), "2.5");
        assert_eq!(format_value(&json!(["a", 1, null])), r#"["a", 1, null]"#);
        assert_eq!(format_value(&json!("\u{1}")), r#""\u0001""#);
    }

    #[test]
    fn test_order_by_limit_offset() {
        let c = QueryConstraints::new(
            None,
            Some(vec![
                OrderItem::desc("date").unwrap(),
                OrderItem::new("hour", SortDirection::Desc).unwrap().with_nulls(Some(NullsPosition::Last)),
                OrderItem::asc("district.name").unwrap(),
            ]),
            Some(1),
            Some(0),
        )
        .unwrap();
        let q = compile("distric_stats", &sel(&["aqi_value"]), Some(&c));
        assert!(
            q.contains("distric_stats(order_by: [{date: desc}, {hour: desc_nulls_last}, {district: {name: asc}}], limit: 1, offset: 0)"),
            "{q}"
        );
    }

    #[test]
    fn test_empty_constraints_omit_parentheses() {
        let c = QueryConstraints::default();
        let q = compile("provinces", &sel(&["name"]), Some(&c));
        assert!(q.contains("  provinces {\n"));
        assert!(!q.contains('('));
    }

    #[test]
    fn test_nested_field_tree() {
        let fields = vec![
            FieldSelection::new("id", true),
            FieldSelection::new("district.name", true),
            FieldSelection::new("aqi_value", true),
            FieldSelection::new("district.province.name", true),
            FieldSelection::new("district.id", true),
            FieldSelection::new("date", false),
        ];
        let q = compile("distric_stats", &fields, None);
        assert!(q.contains("    id aqi_value district { name id province { name } }\n"), "{q}");
    }

    #[test]
    fn test_invalid_paths_are_dropped_and_indexes_stripped() {
        let fields = vec![
            FieldSelection::new("name } secret {", true),
            FieldSelection::new("districts[0].name", true),
            FieldSelection::new("districts[1].name", true),
            FieldSelection::new("", true),
            FieldSelection::new("name", true),
        ];
        let q = compile("provinces", &fields, None);
        assert!(q.contains("    name districts { name }\n"), "{q}");
        assert!(!q.contains("secret"));
    }

    #[test]
    fn test_unknown_table_compiles_verbatim() {
        let q = compile("not_a_table", &sel(&["foo"]), None);
        assert!(q.starts_with("query {\n  not_a_table {"));
    }
}
