//! Parameterized SQL assembly for a translated entity query.
//!
//! Conditions are joined with AND; the search clause groups its keys with OR.
//! Every identifier is validated and double-quoted, every value becomes a
//! numbered parameter.

use super::error::QueryError;
use super::types::{Condition, EntityQuery, OrderInfo, QueryOp, Search, SqlParam};

pub struct QueryBuilder {
    table: String,
    conditions: Vec<String>,
    params: Vec<SqlParam>,
    param_index: usize,
    order: Vec<OrderInfo>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl QueryBuilder {
    pub fn new(table: impl Into<String>) -> Result<Self, QueryError> {
        Self::new_at(table, 0)
    }

    /// Start parameter numbering at `starting_param_index`, for callers that
    /// bind their own parameters ahead of the WHERE clause.
    pub fn new_at(table: impl Into<String>, starting_param_index: usize) -> Result<Self, QueryError> {
        let table = table.into();
        validate_identifier(&table)?;
        Ok(Self {
            table,
            conditions: vec![],
            params: vec![],
            param_index: starting_param_index,
            order: vec![],
            limit: None,
            offset: None,
        })
    }

    /// Register a bind parameter and return its `$n` placeholder.
    pub fn push_param(&mut self, value: SqlParam) -> String {
        self.params.push(value);
        self.param_index += 1;
        format!("${}", self.param_index)
    }

    /// Append a pre-rendered predicate. Used by the authorization scoper for
    /// its tenant subqueries.
    pub fn push_raw(&mut self, sql: String) {
        self.conditions.push(sql);
    }

    pub fn condition(&mut self, condition: &Condition) -> Result<(), QueryError> {
        match condition {
            Condition::Cmp { column, op, value } => {
                validate_identifier(column)?;
                let quoted = format!("\"{column}\"");
                let sql = match (op, value) {
                    (QueryOp::Eq, SqlParam::Null) => format!("{quoted} IS NULL"),
                    (QueryOp::Ne, SqlParam::Null) => format!("{quoted} IS NOT NULL"),
                    (QueryOp::Contains, SqlParam::Text(term)) => {
                        let p = self.push_param(SqlParam::Text(format!("%{term}%")));
                        format!("{quoted} ILIKE {p}")
                    }
                    (QueryOp::Contains, _) => {
                        return Err(QueryError::InvalidValue {
                            field: column.clone(),
                            message: "contains matching requires a text value".to_string(),
                        })
                    }
                    (op, value) => {
                        let p = self.push_param(value.clone());
                        format!("{quoted} {} {p}", cmp_sql(*op))
                    }
                };
                self.conditions.push(sql);
            }
            Condition::In { column, values } => {
                validate_identifier(column)?;
                if values.is_empty() {
                    self.conditions.push("1=0".to_string());
                } else {
                    let placeholders: Vec<String> =
                        values.iter().map(|v| self.push_param(v.clone())).collect();
                    self.conditions
                        .push(format!("\"{column}\" IN ({})", placeholders.join(", ")));
                }
            }
        }
        Ok(())
    }

    pub fn search(&mut self, search: &Search) -> Result<(), QueryError> {
        if search.keys.is_empty() {
            return Ok(());
        }
        let pattern = format!("%{}%", search.term);
        let mut parts = Vec::with_capacity(search.keys.len());
        for key in &search.keys {
            validate_identifier(key)?;
            let p = self.push_param(SqlParam::Text(pattern.clone()));
            parts.push(format!("\"{key}\" ILIKE {p}"));
        }
        self.conditions.push(format!("({})", parts.join(" OR ")));
        Ok(())
    }

    pub fn order(&mut self, order: &[OrderInfo]) -> Result<(), QueryError> {
        for info in order {
            validate_identifier(&info.column)?;
        }
        self.order = order.to_vec();
        Ok(())
    }

    pub fn page(&mut self, limit: i64, offset: i64) {
        self.limit = Some(limit);
        self.offset = Some(offset);
    }

    /// Apply a whole translated query: conditions, search, order, paging.
    /// The relation include list is the repository's concern.
    pub fn apply(&mut self, query: &EntityQuery) -> Result<(), QueryError> {
        for condition in &query.conditions {
            self.condition(condition)?;
        }
        if let Some(search) = &query.search {
            self.search(search)?;
        }
        self.order(&query.order)?;
        self.page(query.limit, query.offset);
        Ok(())
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    pub fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            "1=1".to_string()
        } else {
            self.conditions.join(" AND ")
        }
    }

    /// Rows come back as a single `row` json column so the repository never
    /// needs a static row type per entity.
    pub fn to_select_sql(&self) -> String {
        let inner = [
            format!("SELECT * FROM \"{}\"", self.table),
            format!("WHERE {}", self.where_clause()),
            self.order_clause(),
            self.limit_clause(),
        ]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

        format!("SELECT row_to_json(t) AS row FROM ({inner}) t")
    }

    /// Count over the same predicate, independent of order and paging.
    pub fn to_count_sql(&self) -> String {
        format!(
            "SELECT COUNT(*) AS count FROM \"{}\" WHERE {}",
            self.table,
            self.where_clause()
        )
    }

    /// Existence probe used for in-tenant foreign-key checks.
    pub fn to_exists_sql(&self) -> String {
        format!(
            "SELECT 1 AS one FROM \"{}\" WHERE {} LIMIT 1",
            self.table,
            self.where_clause()
        )
    }

    fn order_clause(&self) -> String {
        if self.order.is_empty() {
            return String::new();
        }
        let parts: Vec<String> = self
            .order
            .iter()
            .map(|i| format!("\"{}\" {}", i.column, i.sort.to_sql()))
            .collect();
        format!("ORDER BY {}", parts.join(", "))
    }

    fn limit_clause(&self) -> String {
        match (self.limit, self.offset) {
            (Some(l), Some(o)) => format!("LIMIT {l} OFFSET {o}"),
            (Some(l), None) => format!("LIMIT {l}"),
            _ => String::new(),
        }
    }
}

fn cmp_sql(op: QueryOp) -> &'static str {
    match op {
        QueryOp::Eq => "=",
        QueryOp::Ne => "<>",
        QueryOp::Gt => ">",
        QueryOp::Gte => ">=",
        QueryOp::Lt => "<",
        QueryOp::Lte => "<=",
        // Contains is rendered as ILIKE before reaching here
        QueryOp::Contains => "ILIKE",
    }
}

pub fn validate_identifier(name: &str) -> Result<(), QueryError> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(QueryError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::types::SortDirection;
    use uuid::Uuid;

    #[test]
    fn rejects_bad_identifiers() {
        assert!(QueryBuilder::new("appointment").is_ok());
        assert!(QueryBuilder::new("1nope").is_err());
        assert!(QueryBuilder::new("drop table;--").is_err());
        assert!(validate_identifier("status").is_ok());
        assert!(validate_identifier("\"quoted\"").is_err());
    }

    #[test]
    fn renders_conditions_with_numbered_params() {
        let mut qb = QueryBuilder::new("appointment").unwrap();
        qb.condition(&Condition::Cmp {
            column: "status".to_string(),
            op: QueryOp::Eq,
            value: SqlParam::Text("booked".to_string()),
        })
        .unwrap();
        qb.condition(&Condition::Cmp {
            column: "patient_id".to_string(),
            op: QueryOp::Eq,
            value: SqlParam::Uuid(Uuid::nil()),
        })
        .unwrap();

        assert_eq!(qb.where_clause(), "\"status\" = $1 AND \"patient_id\" = $2");
        assert_eq!(qb.params().len(), 2);
    }

    #[test]
    fn contains_becomes_ilike_pattern() {
        let mut qb = QueryBuilder::new("appointment").unwrap();
        qb.condition(&Condition::Cmp {
            column: "status".to_string(),
            op: QueryOp::Contains,
            value: SqlParam::Text("book".to_string()),
        })
        .unwrap();
        assert_eq!(qb.where_clause(), "\"status\" ILIKE $1");
        assert_eq!(qb.params()[0], SqlParam::Text("%book%".to_string()));
    }

    #[test]
    fn null_equality_uses_is_null() {
        let mut qb = QueryBuilder::new("organization").unwrap();
        qb.condition(&Condition::Cmp {
            column: "description".to_string(),
            op: QueryOp::Eq,
            value: SqlParam::Null,
        })
        .unwrap();
        assert_eq!(qb.where_clause(), "\"description\" IS NULL");
        assert!(qb.params().is_empty());
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let mut qb = QueryBuilder::new("appointment").unwrap();
        qb.condition(&Condition::In { column: "status".to_string(), values: vec![] })
            .unwrap();
        assert_eq!(qb.where_clause(), "1=0");
    }

    #[test]
    fn search_groups_keys_with_or() {
        let mut qb = QueryBuilder::new("guest").unwrap();
        qb.condition(&Condition::Cmp {
            column: "gender".to_string(),
            op: QueryOp::Eq,
            value: SqlParam::Text("f".to_string()),
        })
        .unwrap();
        qb.search(&Search {
            keys: vec!["phone_number".to_string(), "city".to_string()],
            term: "berlin".to_string(),
        })
        .unwrap();

        assert_eq!(
            qb.where_clause(),
            "\"gender\" = $1 AND (\"phone_number\" ILIKE $2 OR \"city\" ILIKE $3)"
        );
        assert_eq!(qb.params()[1], SqlParam::Text("%berlin%".to_string()));
    }

    #[test]
    fn select_sql_wraps_rows_as_json() {
        let mut qb = QueryBuilder::new("appointment").unwrap();
        qb.order(&[OrderInfo { column: "created_at".to_string(), sort: SortDirection::Desc }])
            .unwrap();
        qb.page(20, 0);
        assert_eq!(
            qb.to_select_sql(),
            "SELECT row_to_json(t) AS row FROM (SELECT * FROM \"appointment\" WHERE 1=1 ORDER BY \"created_at\" DESC LIMIT 20 OFFSET 0) t"
        );
    }

    #[test]
    fn count_sql_ignores_order_and_paging() {
        let mut qb = QueryBuilder::new("appointment").unwrap();
        qb.condition(&Condition::Cmp {
            column: "status".to_string(),
            op: QueryOp::Eq,
            value: SqlParam::Text("booked".to_string()),
        })
        .unwrap();
        qb.order(&[OrderInfo { column: "created_at".to_string(), sort: SortDirection::Desc }])
            .unwrap();
        qb.page(5, 10);
        assert_eq!(
            qb.to_count_sql(),
            "SELECT COUNT(*) AS count FROM \"appointment\" WHERE \"status\" = $1"
        );
    }

    #[test]
    fn param_offset_for_prebound_statements() {
        let mut qb = QueryBuilder::new_at("appointment", 3).unwrap();
        let p = qb.push_param(SqlParam::Text("x".to_string()));
        assert_eq!(p, "$4");
    }
}
