use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// 过滤条件构造阶段的校验错误。
/// 这类错误代表上游组件的契约违规，构造时立即抛出，不做吞没。
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FilterError {
    #[error("invalid argument for {op}: {reason}")]
    InvalidArgument { op: Operator, reason: String },

    #[error("invalid field name: {0:?}")]
    InvalidField(String),

    #[error("condition on `{0}` needs an operator or a nested condition")]
    MissingOperator(String),

    #[error("limit must be positive, got {0}")]
    InvalidLimit(i64),

    #[error("offset must be non-negative, got {0}")]
    InvalidOffset(i64),

    #[error("malformed constraint: {0}")]
    Malformed(String),
}

/// 比较运算符 (封闭集合)，序列化为 Hasura 的后缀形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "_eq", alias = "eq")]
    Eq,
    #[serde(rename = "_neq", alias = "neq")]
    Neq,
    #[serde(rename = "_gt", alias = "gt")]
    Gt,
    #[serde(rename = "_gte", alias = "gte")]
    Gte,
    #[serde(rename = "_lt", alias = "lt")]
    Lt,
    #[serde(rename = "_lte", alias = "lte")]
    Lte,
    #[serde(rename = "_in", alias = "in")]
    In,
    #[serde(rename = "_nin", alias = "nin", alias = "not_in")]
    NotIn,
    #[serde(rename = "_between", alias = "between")]
    Between,
    #[serde(rename = "_like", alias = "like")]
    Like,
    #[serde(rename = "_ilike", alias = "ilike")]
    Ilike,
    #[serde(rename = "_is_null", alias = "is_null")]
    IsNull,
    #[serde(rename = "_is_not_null", alias = "is_not_null", alias = "not_null")]
    IsNotNull,
}

impl Operator {
    pub const ALL: [Operator; 13] = [
        Operator::Eq,
        Operator::Neq,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::In,
        Operator::NotIn,
        Operator::Between,
        Operator::Like,
        Operator::Ilike,
        Operator::IsNull,
        Operator::IsNotNull,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "_eq",
            Operator::Neq => "_neq",
            Operator::Gt => "_gt",
            Operator::Gte => "_gte",
            Operator::Lt => "_lt",
            Operator::Lte => "_lte",
            Operator::In => "_in",
            Operator::NotIn => "_nin",
            Operator::Between => "_between",
            Operator::Like => "_like",
            Operator::Ilike => "_ilike",
            Operator::IsNull => "_is_null",
            Operator::IsNotNull => "_is_not_null",
        }
    }

    pub fn is_null_check(&self) -> bool {
        matches!(self, Operator::IsNull | Operator::IsNotNull)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 条件谓词：要么是直接比较，要么是沿关系字段下钻的嵌套条件
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare { op: Operator, value: Value },
    Nested(Box<Condition>),
}

/// 叶子条件或关系过滤节点。
///
/// 只能通过 [`Condition::new`] / [`Condition::nested`] 或反序列化构造，
/// 因此字段名与 op/value 的组合在任何时候都已经过校验。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCondition", into = "RawCondition")]
pub struct Condition {
    field: String,
    predicate: Predicate,
}

/// LLM 结构化输出与 JSON 之间的线上形态 `{field, op?, value?, nested?}`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawCondition {
    field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    op: Option<Operator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nested: Option<Box<Condition>>,
}

impl TryFrom<RawCondition> for Condition {
    type Error = FilterError;

    fn try_from(raw: RawCondition) -> Result<Self, Self::Error> {
        // nested 存在时忽略 op/value
        if let Some(inner) = raw.nested {
            return Condition::nested(raw.field, *inner);
        }
        match raw.op {
            Some(op) => Condition::with_optional_value(raw.field, op, raw.value),
            None => Err(FilterError::MissingOperator(raw.field)),
        }
    }
}

impl From<Condition> for RawCondition {
    fn from(cond: Condition) -> Self {
        match cond.predicate {
            Predicate::Compare { op, value } => RawCondition {
                field: cond.field,
                op: Some(op),
                value: Some(value),
                nested: None,
            },
            Predicate::Nested(inner) => RawCondition {
                field: cond.field,
                op: None,
                value: None,
                nested: Some(inner),
            },
        }
    }
}

impl Condition {
    /// 直接比较条件，例如 `aqi_value > 100`
    pub fn new(
        field: impl Into<String>,
        op: Operator,
        value: impl Into<Value>,
    ) -> Result<Self, FilterError> {
        Self::with_optional_value(field, op, Some(value.into()))
    }

    /// 空值判断运算符允许省略 value，省略即视为 `true`
    pub fn with_optional_value(
        field: impl Into<String>,
        op: Operator,
        value: Option<Value>,
    ) -> Result<Self, FilterError> {
        let field = checked_name(field.into())?;
        let value = check_value(op, value)?;
        Ok(Self {
            field,
            predicate: Predicate::Compare { op, value },
        })
    }

    /// 关系过滤：`field` 为关系名，`inner` 作用于关联实体的字段
    pub fn nested(field: impl Into<String>, inner: Condition) -> Result<Self, FilterError> {
        let field = checked_name(field.into())?;
        Ok(Self {
            field,
            predicate: Predicate::Nested(Box::new(inner)),
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn op(&self) -> Option<Operator> {
        match &self.predicate {
            Predicate::Compare { op, .. } => Some(*op),
            Predicate::Nested(_) => None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.predicate {
            Predicate::Compare { value, .. } => Some(value),
            Predicate::Nested(_) => None,
        }
    }

    pub fn nested_condition(&self) -> Option<&Condition> {
        match &self.predicate {
            Predicate::Nested(inner) => Some(inner),
            Predicate::Compare { .. } => None,
        }
    }
}

fn invalid(op: Operator, reason: impl Into<String>) -> FilterError {
    FilterError::InvalidArgument {
        op,
        reason: reason.into(),
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::Bool(_) | Value::Number(_) | Value::String(_))
}

fn describe(value: &Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => "nothing".to_string(),
        Some(v) => v.to_string(),
    }
}

fn check_value(op: Operator, value: Option<Value>) -> Result<Value, FilterError> {
    // JSON 的 null 与缺省等价
    let value = value.filter(|v| !v.is_null());
    match op {
        Operator::Between => match value {
            Some(Value::Array(pair)) if pair.len() == 2 => {
                if !pair.iter().all(is_scalar) {
                    return Err(invalid(op, "bounds must be scalars"));
                }
                if let (Some(low), Some(high)) = (pair[0].as_f64(), pair[1].as_f64()) {
                    if low > high {
                        return Err(invalid(op, format!("low bound {low} exceeds high bound {high}")));
                    }
                }
                Ok(Value::Array(pair))
            }
            other => Err(invalid(op, format!("expected [low, high], got {}", describe(&other)))),
        },
        Operator::In | Operator::NotIn => match value {
            Some(Value::Array(items)) => {
                if !items.iter().all(is_scalar) {
                    return Err(invalid(op, "sequence items must be scalars"));
                }
                Ok(Value::Array(items))
            }
            other => Err(invalid(op, format!("expected a sequence, got {}", describe(&other)))),
        },
        Operator::IsNull | Operator::IsNotNull => match value {
            None => Ok(Value::Bool(true)),
            Some(Value::Bool(flag)) => Ok(Value::Bool(flag)),
            other => Err(invalid(op, format!("expected a boolean or nothing, got {}", describe(&other)))),
        },
        _ => match value {
            Some(v) if is_scalar(&v) => Ok(v),
            other => Err(invalid(op, format!("expected a scalar or string, got {}", describe(&other)))),
        },
    }
}

/// GraphQL Name: `[_A-Za-z][_0-9A-Za-z]*`
pub fn is_graphql_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {
            chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        }
        _ => false,
    }
}

pub(crate) fn checked_name(name: String) -> Result<String, FilterError> {
    if is_graphql_name(&name) {
        Ok(name)
    } else {
        Err(FilterError::InvalidField(name))
    }
}

/// 递归布尔表达式 (Condition / And / Or / Not)，深度不限
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BoolExpr {
    And {
        #[serde(rename = "_and", alias = "and")]
        items: Vec<BoolExpr>,
    },
    Or {
        #[serde(rename = "_or", alias = "or")]
        items: Vec<BoolExpr>,
    },
    Not {
        #[serde(rename = "_not", alias = "not")]
        item: Box<BoolExpr>,
    },
    Condition(Condition),
}

impl BoolExpr {
    pub fn and(items: Vec<BoolExpr>) -> Self {
        BoolExpr::And { items }
    }

    pub fn or(items: Vec<BoolExpr>) -> Self {
        BoolExpr::Or { items }
    }

    pub fn not(item: BoolExpr) -> Self {
        BoolExpr::Not {
            item: Box::new(item),
        }
    }

    /// 空的 And/Or 归一化为“不存在”，递归作用于子表达式
    pub fn normalize(self) -> Option<BoolExpr> {
        match self {
            BoolExpr::And { items } => {
                let items: Vec<_> = items.into_iter().filter_map(BoolExpr::normalize).collect();
                (!items.is_empty()).then_some(BoolExpr::And { items })
            }
            BoolExpr::Or { items } => {
                let items: Vec<_> = items.into_iter().filter_map(BoolExpr::normalize).collect();
                (!items.is_empty()).then_some(BoolExpr::Or { items })
            }
            BoolExpr::Not { item } => item.normalize().map(BoolExpr::not),
            BoolExpr::Condition(cond) => Some(BoolExpr::Condition(cond)),
        }
    }
}

impl From<Condition> for BoolExpr {
    fn from(cond: Condition) -> Self {
        BoolExpr::Condition(cond)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_between_requires_pair() {
        let err = Condition::new("aqi_value", Operator::Between, 100).unwrap_err();
        assert!(matches!(err, FilterError::InvalidArgument { op: Operator::Between, .. }));
        assert!(Condition::new("aqi_value", Operator::Between, json!([10, 100])).is_ok());
        assert!(Condition::new("aqi_value", Operator::Between, json!([10, 20, 30])).is_err());
    }

    #[test]
    fn test_between_rejects_reversed_bounds() {
        let err = Condition::new("hour", Operator::Between, json!([20, 3])).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn test_in_requires_sequence() {
        assert!(Condition::new("district_id", Operator::In, "001").is_err());
        assert!(Condition::new("district_id", Operator::NotIn, json!(["001", "002"])).is_ok());
        assert!(Condition::new("district_id", Operator::In, json!([{"a": 1}])).is_err());
    }

    #[test]
    fn test_null_checks_accept_absent_or_bool() {
        let cond = Condition::with_optional_value("pm25_value", Operator::IsNull, None).unwrap();
        assert_eq!(cond.value(), Some(&Value::Bool(true)));
        assert!(Condition::new("pm25_value", Operator::IsNotNull, false).is_ok());
        assert!(Condition::new("pm25_value", Operator::IsNull, "yes").is_err());
    }

    #[test]
    fn test_scalar_operators_reject_missing_or_compound_values() {
        assert!(Condition::with_optional_value("aqi_value", Operator::Gt, None).is_err());
        assert!(Condition::new("aqi_value", Operator::Eq, json!([1, 2])).is_err());
        assert!(Condition::new("aqi_value", Operator::Eq, Value::Null).is_err());
        assert!(Condition::new("name", Operator::Ilike, "%Ba%").is_ok());
    }

    #[test]
    fn test_field_names_must_be_graphql_names() {
        let err = Condition::new("aqi_value} }", Operator::Eq, 1).unwrap_err();
        assert_eq!(err, FilterError::InvalidField("aqi_value} }".to_string()));
        assert!(Condition::new("1abc", Operator::Eq, 1).is_err());
        assert!(Condition::new("_private", Operator::Eq, 1).is_ok());
    }

    #[test]
    fn test_deserialize_nested_condition_ignores_op() {
        let cond: Condition = serde_json::from_value(json!({
            "field": "district",
            "op": "_eq",
            "nested": {"field": "name", "op": "_ilike", "value": "%Ba Đình%"}
        }))
        .unwrap();
        assert_eq!(cond.op(), None);
        let inner = cond.nested_condition().unwrap();
        assert_eq!(inner.field(), "name");
        assert_eq!(inner.op(), Some(Operator::Ilike));
    }

    #[test]
    fn test_deserialize_condition_without_op_fails() {
        let res: Result<Condition, _> = serde_json::from_value(json!({"field": "aqi_value", "value": 3}));
        assert!(res.is_err());
    }

    #[test]
    fn test_deserialize_bool_expr_variants() {
        let expr: BoolExpr = serde_json::from_value(json!({
            "_and": [
                {"field": "aqi_value", "op": "_gt", "value": 100},
                {"_not": {"_or": [
                    {"field": "hour", "op": "_lt", "value": 6},
                    {"field": "hour", "op": "gte", "value": 22}
                ]}}
            ]
        }))
        .unwrap();
        let BoolExpr::And { items } = &expr else {
            panic!("expected And, got {expr:?}");
        };
        assert_eq!(items.len(), 2);
        let BoolExpr::Not { item } = &items[1] else {
            panic!("expected Not, got {:?}", items[1]);
        };
        assert!(matches!(item.as_ref(), BoolExpr::Or { items } if items.len() == 2));
    }

    #[test]
    fn test_invalid_leaf_inside_expression_fails_whole_expression() {
        let res: Result<BoolExpr, _> = serde_json::from_value(json!({
            "_or": [{"field": "aqi_value", "op": "_between", "value": 7}]
        }));
        assert!(res.is_err());
    }

    #[test]
    fn test_normalize_drops_empty_groups() {
        let leaf = BoolExpr::from(Condition::new("aqi_value", Operator::Gt, 1).unwrap());
        assert_eq!(BoolExpr::and(vec![]).normalize(), None);
        assert_eq!(BoolExpr::not(BoolExpr::or(vec![])).normalize(), None);

        let expr = BoolExpr::and(vec![BoolExpr::or(vec![]), leaf.clone()]).normalize();
        assert_eq!(expr, Some(BoolExpr::and(vec![leaf])));
    }

    #[test]
    fn test_condition_serializes_to_wire_shape() {
        let cond = Condition::nested(
            "district",
            Condition::new("name", Operator::Ilike, "%Ba Đình%").unwrap(),
        )
        .unwrap();
        let value = serde_json::to_value(&cond).unwrap();
        assert_eq!(
            value,
            json!({"field": "district", "nested": {"field": "name", "op": "_ilike", "value": "%Ba Đình%"}})
        );
    }

    #[test]
    fn test_operator_wire_names_are_unique() {
        let mut names: Vec<_> = Operator::ALL.iter().map(Operator::as_str).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Operator::ALL.len());
    }
}
