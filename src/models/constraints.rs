use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::filter::{is_graphql_name, BoolExpr, FilterError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullsPosition {
    First,
    Last,
}

/// 排序项，`field` 支持点号路径 (如 `district.name`) 表示按关联字段排序
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawOrderItem", into = "RawOrderItem")]
pub struct OrderItem {
    field: String,
    direction: SortDirection,
    nulls: Option<NullsPosition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawOrderItem {
    field: String,
    #[serde(default, alias = "dir")]
    direction: SortDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nulls: Option<NullsPosition>,
}

impl TryFrom<RawOrderItem> for OrderItem {
    type Error = FilterError;

    fn try_from(raw: RawOrderItem) -> Result<Self, Self::Error> {
        Ok(OrderItem::new(raw.field, raw.direction)?.with_nulls(raw.nulls))
    }
}

impl From<OrderItem> for RawOrderItem {
    fn from(item: OrderItem) -> Self {
        RawOrderItem {
            field: item.field,
            direction: item.direction,
            nulls: item.nulls,
        }
    }
}

impl OrderItem {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Result<Self, FilterError> {
        let field = field.into();
        if field.is_empty() || !field.split('.').all(is_graphql_name) {
            return Err(FilterError::InvalidField(field));
        }
        Ok(Self {
            field,
            direction,
            nulls: None,
        })
    }

    pub fn asc(field: impl Into<String>) -> Result<Self, FilterError> {
        Self::new(field, SortDirection::Asc)
    }

    pub fn desc(field: impl Into<String>) -> Result<Self, FilterError> {
        Self::new(field, SortDirection::Desc)
    }

    pub fn with_nulls(mut self, nulls: Option<NullsPosition>) -> Self {
        self.nulls = nulls;
        self
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn direction(&self) -> SortDirection {
        self.direction
    }

    pub fn nulls(&self) -> Option<NullsPosition> {
        self.nulls
    }
}

/// 查询约束：where / order_by / limit / offset。
/// 空集合一律归一化为 None，limit > 0，offset >= 0。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawQueryConstraints", into = "RawQueryConstraints")]
pub struct QueryConstraints {
    filter: Option<BoolExpr>,
    order_by: Option<Vec<OrderItem>>,
    limit: Option<u32>,
    offset: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawQueryConstraints {
    // 先以 Value 接收，便于把 LLM 常给出的 `{}` 视为缺省
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    order_by: Option<Vec<OrderItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
}

impl TryFrom<RawQueryConstraints> for QueryConstraints {
    type Error = FilterError;

    fn try_from(raw: RawQueryConstraints) -> Result<Self, Self::Error> {
        let filter = match raw.filter {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) if map.is_empty() => None,
            Some(value) => Some(
                serde_json::from_value::<BoolExpr>(value)
                    .map_err(|e| FilterError::Malformed(format!("where: {e}")))?,
            ),
        };
        QueryConstraints::new(filter, raw.order_by, raw.limit, raw.offset)
    }
}

impl From<QueryConstraints> for RawQueryConstraints {
    fn from(c: QueryConstraints) -> Self {
        RawQueryConstraints {
            filter: c
                .filter
                .and_then(|expr| serde_json::to_value(expr).ok()),
            order_by: c.order_by,
            limit: c.limit.map(i64::from),
            offset: c.offset.map(i64::from),
        }
    }
}

impl QueryConstraints {
    pub fn new(
        filter: Option<BoolExpr>,
        order_by: Option<Vec<OrderItem>>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Self, FilterError> {
        let limit = match limit {
            Some(n) if n <= 0 => return Err(FilterError::InvalidLimit(n)),
            Some(n) => Some(u32::try_from(n).map_err(|_| FilterError::InvalidLimit(n))?),
            None => None,
        };
        let offset = match offset {
            Some(n) if n < 0 => return Err(FilterError::InvalidOffset(n)),
            Some(n) => Some(u32::try_from(n).map_err(|_| FilterError::InvalidOffset(n))?),
            None => None,
        };
        Ok(Self {
            filter: filter.and_then(BoolExpr::normalize),
            order_by: order_by.filter(|items| !items.is_empty()),
            limit,
            offset,
        })
    }

    pub fn filter(&self) -> Option<&BoolExpr> {
        self.filter.as_ref()
    }

    pub fn order_by(&self) -> Option<&[OrderItem]> {
        self.order_by.as_deref()
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn offset(&self) -> Option<u32> {
        self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.filter.is_none() && self.order_by.is_none() && self.limit.is_none() && self.offset.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::filter::{Condition, Operator};
    use serde_json::json;

    #[test]
    fn test_limit_and_offset_bounds() {
        assert_eq!(
            QueryConstraints::new(None, None, Some(0), None).unwrap_err(),
            FilterError::InvalidLimit(0)
        );
        assert_eq!(
            QueryConstraints::new(None, None, None, Some(-1)).unwrap_err(),
            FilterError::InvalidOffset(-1)
        );
        let ok = QueryConstraints::new(None, None, Some(1), Some(0)).unwrap();
        assert_eq!(ok.limit(), Some(1));
        assert_eq!(ok.offset(), Some(0));
    }

    #[test]
    fn test_empty_collections_normalize_to_none() {
        let c = QueryConstraints::new(Some(BoolExpr::and(vec![])), Some(vec![]), None, None).unwrap();
        assert!(c.filter().is_none());
        assert!(c.order_by().is_none());
        assert!(c.is_empty());
    }

    #[test]
    fn test_deserialize_llm_output() {
        let c: QueryConstraints = serde_json::from_value(json!({
            "where": {"field": "aqi_value", "op": "_gt", "value": 100},
            "order_by": [{"field": "date", "dir": "desc"}, {"field": "hour", "direction": "desc", "nulls": "last"}],
            "limit": 5
        }))
        .unwrap();
        assert_eq!(c.limit(), Some(5));
        let order = c.order_by().unwrap();
        assert_eq!(order[0].direction(), SortDirection::Desc);
        assert_eq!(order[1].nulls(), Some(NullsPosition::Last));
        assert!(matches!(c.filter(), Some(BoolExpr::Condition(_))));
    }

    #[test]
    fn test_deserialize_empty_where_object() {
        let c: QueryConstraints = serde_json::from_value(json!({"where": {}, "order_by": []})).unwrap();
        assert!(c.is_empty());
    }

    #[test]
    fn test_deserialize_rejects_non_positive_limit() {
        let res: Result<QueryConstraints, _> = serde_json::from_value(json!({"limit": 0}));
        assert!(res.is_err());
    }

    #[test]
    fn test_order_item_validates_path_segments() {
        assert!(OrderItem::desc("district.name").is_ok());
        assert!(OrderItem::desc("district..name").is_err());
        assert!(OrderItem::asc("date desc").is_err());
    }

    #[test]
    fn test_serialize_uses_where_key() {
        let cond = Condition::new("aqi_value", Operator::Gt, 100).unwrap();
        let c = QueryConstraints::new(Some(cond.into()), None, Some(1), None).unwrap();
        let value = serde_json::to_value(&c).unwrap();
        assert_eq!(value["where"]["field"], "aqi_value");
        assert_eq!(value["limit"], 1);
        assert!(value.get("offset").is_none());
    }
}
