use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::registry::FieldKind;

/// Comparison operators accepted as filter-key suffixes, e.g. `status.contains`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    Eq,
    Ne,
    Contains,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// A value already coerced to the referenced column's type, ready to bind.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Text(String),
    Uuid(Uuid),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Cmp {
        column: String,
        op: QueryOp,
        value: SqlParam,
    },
    In {
        column: String,
        values: Vec<SqlParam>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderInfo {
    pub column: String,
    pub sort: SortDirection,
}

/// Full-text-like search combined OR-wise across the entity's search keys.
#[derive(Debug, Clone, PartialEq)]
pub struct Search {
    pub keys: Vec<String>,
    pub term: String,
}

/// Structured output of the query translator: what to match, how to sort and
/// page, and which relations to eagerly embed.
#[derive(Debug, Clone)]
pub struct EntityQuery {
    pub conditions: Vec<Condition>,
    pub search: Option<Search>,
    pub order: Vec<OrderInfo>,
    pub limit: i64,
    pub offset: i64,
    pub relations: Vec<String>,
}

/// Coerce a raw string to the column's parameter type. Returns a
/// client-facing message on failure.
pub fn coerce(kind: FieldKind, raw: &str) -> Result<SqlParam, String> {
    match kind {
        FieldKind::Text => Ok(SqlParam::Text(raw.to_string())),
        FieldKind::Uuid => Uuid::parse_str(raw)
            .map(SqlParam::Uuid)
            .map_err(|_| format!("invalid UUID: {raw}")),
        FieldKind::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(SqlParam::Date)
            .or_else(|_| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|dt| SqlParam::Date(dt.date_naive()))
                    .map_err(|_| format!("invalid date: {raw}"))
            }),
        FieldKind::Timestamp => DateTime::parse_from_rfc3339(raw)
            .map(|dt| SqlParam::Timestamp(dt.with_timezone(&Utc)))
            .map_err(|_| format!("invalid timestamp: {raw}")),
    }
}

/// Coerce a JSON payload value. Strings go through [`coerce`]; explicit null
/// becomes a NULL parameter.
pub fn coerce_json(kind: FieldKind, value: &Value) -> Result<SqlParam, String> {
    match value {
        Value::Null => Ok(SqlParam::Null),
        Value::String(s) => coerce(kind, s),
        other => Err(format!("expected string, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_by_kind() {
        assert_eq!(
            coerce(FieldKind::Text, "booked").unwrap(),
            SqlParam::Text("booked".to_string())
        );
        assert!(matches!(coerce(FieldKind::Uuid, "not-a-uuid"), Err(_)));
        assert!(matches!(
            coerce(FieldKind::Date, "2024-03-01").unwrap(),
            SqlParam::Date(_)
        ));
        // A full timestamp is accepted for a date column and truncated
        assert!(matches!(
            coerce(FieldKind::Date, "2024-03-01T09:30:00Z").unwrap(),
            SqlParam::Date(_)
        ));
        assert!(matches!(
            coerce(FieldKind::Timestamp, "2024-03-01T09:30:00Z").unwrap(),
            SqlParam::Timestamp(_)
        ));
    }

    #[test]
    fn coerce_json_handles_null_and_non_strings() {
        assert_eq!(coerce_json(FieldKind::Text, &Value::Null).unwrap(), SqlParam::Null);
        assert!(coerce_json(FieldKind::Text, &serde_json::json!(42)).is_err());
    }
}
