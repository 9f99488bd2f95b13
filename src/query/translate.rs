//! Query-string translation.
//!
//! Turns the flat filter map from a list request into an [`EntityQuery`]:
//! suffix operators on known columns, `searchTerm` across the entity's search
//! keys, pagination with configured defaults, ordering, and the relation
//! include list. Keys that do not resolve to a column or relation are ignored.

use std::collections::HashMap;

use serde_json::Value;

use crate::config;
use crate::registry::{EntityDef, FieldKind};

use super::error::QueryError;
use super::types::{coerce, Condition, EntityQuery, OrderInfo, QueryOp, Search, SortDirection};

const RESERVED_KEYS: &[&str] = &["limit", "offset", "order", "searchTerm", "relations"];

pub fn translate(
    def: &'static EntityDef,
    params: &HashMap<String, String>,
) -> Result<EntityQuery, QueryError> {
    let cfg = &config::CONFIG.query;

    let mut conditions = Vec::new();
    for (key, raw) in params {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        let Some((column, op)) = split_operator(key) else {
            continue;
        };
        let Some(kind) = def.column_kind(column) else {
            if cfg.debug_logging {
                tracing::debug!("ignoring unknown filter key '{}' on {}", key, def.name);
            }
            continue;
        };
        conditions.push(build_condition(column, op, kind, raw)?);
    }

    let search = params
        .get("searchTerm")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|term| Search {
            keys: def.search_keys.iter().map(|k| k.to_string()).collect(),
            term: term.to_string(),
        });

    let order = match params.get("order") {
        Some(raw) => parse_order(def, raw),
        None => Vec::new(),
    };
    let order = if order.is_empty() {
        vec![OrderInfo { column: "created_at".to_string(), sort: SortDirection::Desc }]
    } else {
        order
    };

    let limit = params
        .get("limit")
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|l| *l >= 0)
        .unwrap_or(cfg.default_limit)
        .min(cfg.max_limit);
    let offset = params
        .get("offset")
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|o| *o >= 0)
        .unwrap_or(0);

    Ok(EntityQuery {
        conditions,
        search,
        order,
        limit,
        offset,
        relations: parse_relations(def, params),
    })
}

/// Parse the `relations` parameter into an ordered, deduplicated list of
/// relation names known to the registry.
pub fn parse_relations(def: &'static EntityDef, params: &HashMap<String, String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    if let Some(raw) = params.get("relations") {
        for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if def.relation(name).is_some() && !out.iter().any(|n| n == name) {
                out.push(name.to_string());
            }
        }
    }
    out
}

enum ParsedOp {
    Cmp(QueryOp),
    In,
}

/// Split `status.contains` into column and operator. A key without a suffix
/// is an equality match. Returns None for suffixes we do not understand so
/// the whole key is ignored.
fn split_operator(key: &str) -> Option<(&str, ParsedOp)> {
    match key.rsplit_once('.') {
        None => Some((key, ParsedOp::Cmp(QueryOp::Eq))),
        Some((column, suffix)) => {
            let op = match suffix {
                "eq" => ParsedOp::Cmp(QueryOp::Eq),
                "ne" | "not" => ParsedOp::Cmp(QueryOp::Ne),
                "contains" | "like" => ParsedOp::Cmp(QueryOp::Contains),
                "gt" => ParsedOp::Cmp(QueryOp::Gt),
                "gte" => ParsedOp::Cmp(QueryOp::Gte),
                "lt" => ParsedOp::Cmp(QueryOp::Lt),
                "lte" => ParsedOp::Cmp(QueryOp::Lte),
                "in" => ParsedOp::In,
                _ => return None,
            };
            Some((column, op))
        }
    }
}

fn build_condition(
    column: &str,
    op: ParsedOp,
    kind: FieldKind,
    raw: &str,
) -> Result<Condition, QueryError> {
    let invalid = |message: String| QueryError::InvalidValue { field: column.to_string(), message };

    match op {
        ParsedOp::In => {
            let values = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|part| coerce(kind, part).map_err(&invalid))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Condition::In { column: column.to_string(), values })
        }
        ParsedOp::Cmp(QueryOp::Contains) => {
            if kind != FieldKind::Text {
                return Err(invalid("contains matching is only valid on text columns".to_string()));
            }
            Ok(Condition::Cmp {
                column: column.to_string(),
                op: QueryOp::Contains,
                value: coerce(kind, raw).map_err(&invalid)?,
            })
        }
        ParsedOp::Cmp(op) => Ok(Condition::Cmp {
            column: column.to_string(),
            op,
            value: coerce(kind, raw).map_err(&invalid)?,
        }),
    }
}

/// Ordering arrives either as the table-UI JSON form
/// `[{"id":"created_at","desc":true}]` or as plain `"created_at desc"`
/// strings. Columns unknown to the entity are skipped.
fn parse_order(def: &'static EntityDef, raw: &str) -> Vec<OrderInfo> {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        if let Value::Array(items) = value {
            let mut out = Vec::new();
            for item in items {
                match item {
                    Value::Object(obj) => {
                        let Some(column) = obj.get("id").and_then(|v| v.as_str()) else {
                            continue;
                        };
                        if def.column_kind(column).is_none() {
                            continue;
                        }
                        let sort = if obj.get("desc").and_then(|v| v.as_bool()).unwrap_or(false) {
                            SortDirection::Desc
                        } else {
                            SortDirection::Asc
                        };
                        out.push(OrderInfo { column: column.to_string(), sort });
                    }
                    Value::String(s) => out.extend(parse_order_string(def, &s)),
                    _ => {}
                }
            }
            return out;
        }
    }
    parse_order_string(def, raw)
}

fn parse_order_string(def: &'static EntityDef, s: &str) -> Vec<OrderInfo> {
    let mut out = Vec::new();
    for part in s.split(',') {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut it = trimmed.split_whitespace();
        if let Some(column) = it.next() {
            if def.column_kind(column).is_none() {
                continue;
            }
            let dir = it.next().unwrap_or("asc");
            let sort = if dir.eq_ignore_ascii_case("desc") {
                SortDirection::Desc
            } else {
                SortDirection::Asc
            };
            out.push(OrderInfo { column: column.to_string(), sort });
        }
    }
    out
}
