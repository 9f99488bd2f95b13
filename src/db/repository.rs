//! Dynamic, scoped data access for one entity.
//!
//! All statements are generated from the entity definition and executed with
//! rows serialized as JSON, so a single repository serves every entity. The
//! tenant predicate from the authorization scoper is baked into every
//! statement here, which is what makes read, update and delete uniformly
//! scoped rather than just the list path.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;
use sqlx::{postgres::PgArguments, PgPool, Row};
use uuid::Uuid;

use crate::db::manager::DatabaseError;
use crate::db::record::InsertPlan;
use crate::query::types::{EntityQuery, SqlParam};
use crate::query::{QueryBuilder, QueryError};
use crate::registry::{self, BelongsTo, EntityDef, FieldDef, HasMany, Relation, TenantPath};
use crate::scope::{self, CallerContext};

pub struct Repository {
    def: &'static EntityDef,
    pool: PgPool,
}

impl Repository {
    pub fn new(def: &'static EntityDef, pool: PgPool) -> Self {
        Self { def, pool }
    }

    /// List with total count. The count runs over the same scoped predicate
    /// and is independent of limit/offset.
    pub async fn list(
        &self,
        ctx: &CallerContext,
        query: &EntityQuery,
    ) -> Result<(Vec<Value>, i64), DatabaseError> {
        let mut qb = self.scoped_builder(ctx)?;
        qb.apply(query).map_err(qerr)?;

        let mut rows = self.fetch_rows(&qb.to_select_sql(), qb.params()).await?;

        let count_sql = qb.to_count_sql();
        let mut count_query = sqlx::query(&count_sql);
        for p in qb.params() {
            count_query = bind(count_query, p);
        }
        let count: i64 = count_query.fetch_one(&self.pool).await?.try_get("count")?;

        self.attach_relations(ctx, &mut rows, &query.relations).await?;
        Ok((rows, count))
    }

    pub async fn fetch(
        &self,
        ctx: &CallerContext,
        id: Uuid,
        relations: &[String],
    ) -> Result<Value, DatabaseError> {
        let mut qb = self.scoped_builder(ctx)?;
        let p = qb.push_param(SqlParam::Uuid(id));
        qb.push_raw(format!("\"id\" = {p}"));

        let mut rows = self.fetch_rows(&qb.to_select_sql(), qb.params()).await?;
        if rows.is_empty() {
            return Err(DatabaseError::NotFound(format!("{} {} not found", self.def.name, id)));
        }
        self.attach_relations(ctx, &mut rows, relations).await?;
        Ok(rows.remove(0))
    }

    /// Create the parent row plus any nested child rows from the plan. Every
    /// foreign key, on parent and children alike, must resolve inside the
    /// caller's tenant.
    pub async fn insert(
        &self,
        ctx: &CallerContext,
        plan: InsertPlan,
    ) -> Result<Value, DatabaseError> {
        let mut child_rows = Vec::new();
        for (rel, children) in &plan.children {
            let child_def = registry::by_name(rel.entity).ok_or_else(|| {
                DatabaseError::QueryError(format!("unknown child entity: {}", rel.entity))
            })?;
            for child in children {
                child_rows.push((*rel, child_def, child));
            }
        }

        self.verify_references(ctx, self.def, &plan.columns).await?;
        for &(_, child_def, child) in &child_rows {
            self.verify_references(ctx, child_def, &child.columns).await?;
        }

        let id = self.insert_row(ctx, self.def, &plan.columns, &[]).await?;
        for &(rel, child_def, child) in &child_rows {
            self.insert_row(ctx, child_def, &child.columns, &[(rel.fk, SqlParam::Uuid(id))])
                .await?;
        }

        self.fetch(ctx, id, &[]).await
    }

    pub async fn update(
        &self,
        ctx: &CallerContext,
        id: Uuid,
        changes: Vec<(&'static FieldDef, SqlParam)>,
    ) -> Result<Value, DatabaseError> {
        self.verify_references(ctx, self.def, &changes).await?;

        let mut params: Vec<SqlParam> = Vec::with_capacity(changes.len() + 2);
        let mut sets: Vec<String> = Vec::with_capacity(changes.len() + 1);
        for (field, value) in &changes {
            params.push(value.clone());
            sets.push(format!("\"{}\" = ${}", field.name, params.len()));
        }
        params.push(SqlParam::Timestamp(Utc::now()));
        sets.push(format!("\"updated_at\" = ${}", params.len()));

        let mut qb =
            QueryBuilder::new_at(self.def.table, params.len()).map_err(qerr)?;
        scope::apply_tenant_scope(&mut qb, self.def, ctx);
        let p = qb.push_param(SqlParam::Uuid(id));
        qb.push_raw(format!("\"id\" = {p}"));

        let sql = format!(
            "UPDATE \"{}\" SET {} WHERE {}",
            self.def.table,
            sets.join(", "),
            qb.where_clause()
        );
        let mut q = sqlx::query(&sql);
        for param in &params {
            q = bind(q, param);
        }
        for param in qb.params() {
            q = bind(q, param);
        }
        let result = q.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("{} {} not found", self.def.name, id)));
        }

        self.fetch(ctx, id, &[]).await
    }

    pub async fn delete(&self, ctx: &CallerContext, id: Uuid) -> Result<(), DatabaseError> {
        let mut qb = self.scoped_builder(ctx)?;
        let p = qb.push_param(SqlParam::Uuid(id));
        qb.push_raw(format!("\"id\" = {p}"));

        let sql = format!("DELETE FROM \"{}\" WHERE {}", self.def.table, qb.where_clause());
        let mut q = sqlx::query(&sql);
        for param in qb.params() {
            q = bind(q, param);
        }
        let result = match q.execute(&self.pool).await {
            Ok(result) => result,
            // 23503: foreign_key_violation, the row still has children
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some("23503") => {
                return Err(DatabaseError::DependentRows(format!(
                    "{} {} has dependent records",
                    self.def.name, id
                )));
            }
            Err(e) => return Err(e.into()),
        };
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("{} {} not found", self.def.name, id)));
        }
        Ok(())
    }

    fn scoped_builder(&self, ctx: &CallerContext) -> Result<QueryBuilder, DatabaseError> {
        let mut qb = QueryBuilder::new(self.def.table).map_err(qerr)?;
        scope::apply_tenant_scope(&mut qb, self.def, ctx);
        Ok(qb)
    }

    async fn fetch_rows(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Value>, DatabaseError> {
        let mut q = sqlx::query(sql);
        for param in params {
            q = bind(q, param);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| r.try_get::<Value, _>("row").map_err(DatabaseError::from))
            .collect()
    }

    /// Insert one row with server-assigned id and timestamps. `extra` holds
    /// caller-supplied columns such as the parent fk on nested creates.
    async fn insert_row(
        &self,
        ctx: &CallerContext,
        def: &'static EntityDef,
        columns: &[(&'static FieldDef, SqlParam)],
        extra: &[(&str, SqlParam)],
    ) -> Result<Uuid, DatabaseError> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let mut names: Vec<String> =
            vec!["id".to_string(), "created_at".to_string(), "updated_at".to_string()];
        let mut params: Vec<SqlParam> = vec![
            SqlParam::Uuid(id),
            SqlParam::Timestamp(now),
            SqlParam::Timestamp(now),
        ];
        if def.tenant_path == TenantPath::Direct {
            names.push("tenant_id".to_string());
            params.push(SqlParam::Text(ctx.tenant_id.clone()));
        }
        for (name, value) in extra {
            names.push((*name).to_string());
            params.push(value.clone());
        }
        for (field, value) in columns {
            names.push(field.name.to_string());
            params.push(value.clone());
        }

        let column_list =
            names.iter().map(|n| format!("\"{n}\"")).collect::<Vec<_>>().join(", ");
        let placeholders =
            (1..=params.len()).map(|i| format!("${i}")).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "INSERT INTO \"{}\" ({column_list}) VALUES ({placeholders})",
            def.table
        );

        let mut q = sqlx::query(&sql);
        for param in &params {
            q = bind(q, param);
        }
        q.execute(&self.pool).await?;
        Ok(id)
    }

    /// Every foreign key must reference a row visible in the caller's tenant.
    async fn verify_references(
        &self,
        ctx: &CallerContext,
        def: &'static EntityDef,
        columns: &[(&'static FieldDef, SqlParam)],
    ) -> Result<(), DatabaseError> {
        for (field, value) in columns {
            let SqlParam::Uuid(fk_id) = value else { continue };
            let Some(bt) = def.belongs_to_for_fk(field.name) else { continue };
            let Some(parent) = registry::by_name(bt.entity) else { continue };

            let mut qb = QueryBuilder::new(parent.table).map_err(qerr)?;
            scope::apply_tenant_scope(&mut qb, parent, ctx);
            let p = qb.push_param(SqlParam::Uuid(*fk_id));
            qb.push_raw(format!("\"id\" = {p}"));

            let sql = qb.to_exists_sql();
            let mut q = sqlx::query(&sql);
            for param in qb.params() {
                q = bind(q, param);
            }
            if q.fetch_optional(&self.pool).await?.is_none() {
                return Err(DatabaseError::ForeignKeyOutOfScope {
                    field: field.name.to_string(),
                    entity: parent.name,
                });
            }
        }
        Ok(())
    }

    /// Embed requested relations into the fetched rows, one batched query per
    /// relation. The batched queries carry the same tenant predicate as every
    /// other statement.
    async fn attach_relations(
        &self,
        ctx: &CallerContext,
        rows: &mut [Value],
        relations: &[String],
    ) -> Result<(), DatabaseError> {
        if rows.is_empty() {
            return Ok(());
        }
        for name in relations {
            match self.def.relation(name) {
                Some(Relation::Parent(bt)) => self.attach_parent(ctx, rows, bt).await?,
                Some(Relation::Children(hm)) => self.attach_children(ctx, rows, hm).await?,
                None => {}
            }
        }
        Ok(())
    }

    async fn attach_parent(
        &self,
        ctx: &CallerContext,
        rows: &mut [Value],
        bt: &'static BelongsTo,
    ) -> Result<(), DatabaseError> {
        let Some(parent) = registry::by_name(bt.entity) else { return Ok(()) };

        let mut ids: Vec<Uuid> = rows
            .iter()
            .filter_map(|r| r.get(bt.fk).and_then(|v| v.as_str()))
            .filter_map(|s| Uuid::parse_str(s).ok())
            .collect();
        ids.sort_unstable();
        ids.dedup();

        let mut by_id: HashMap<String, Value> = HashMap::new();
        if !ids.is_empty() {
            let (sql, params) = relation_select_sql(parent, "id", ctx)?;
            let mut q = sqlx::query(&sql).bind(&ids);
            for param in &params {
                q = bind(q, param);
            }
            let fetched = q.fetch_all(&self.pool).await?;
            for r in fetched {
                let v: Value = r.try_get("row")?;
                if let Some(id) = v.get("id").and_then(|x| x.as_str()) {
                    by_id.insert(id.to_string(), v.clone());
                }
            }
        }

        for row in rows.iter_mut() {
            let linked = row
                .get(bt.fk)
                .and_then(|v| v.as_str())
                .and_then(|s| by_id.get(s))
                .cloned()
                .unwrap_or(Value::Null);
            if let Some(obj) = row.as_object_mut() {
                obj.insert(bt.name.to_string(), linked);
            }
        }
        Ok(())
    }

    async fn attach_children(
        &self,
        ctx: &CallerContext,
        rows: &mut [Value],
        hm: &'static HasMany,
    ) -> Result<(), DatabaseError> {
        let Some(child) = registry::by_name(hm.entity) else { return Ok(()) };

        let ids: Vec<Uuid> = rows
            .iter()
            .filter_map(|r| r.get("id").and_then(|v| v.as_str()))
            .filter_map(|s| Uuid::parse_str(s).ok())
            .collect();

        let mut grouped: HashMap<String, Vec<Value>> = HashMap::new();
        if !ids.is_empty() {
            let (sql, params) = relation_select_sql(child, hm.fk, ctx)?;
            let mut q = sqlx::query(&sql).bind(&ids);
            for param in &params {
                q = bind(q, param);
            }
            let fetched = q.fetch_all(&self.pool).await?;
            for r in fetched {
                let v: Value = r.try_get("row")?;
                if let Some(fk) = v.get(hm.fk).and_then(|x| x.as_str()) {
                    grouped.entry(fk.to_string()).or_default().push(v.clone());
                }
            }
        }

        for row in rows.iter_mut() {
            let children = row
                .get("id")
                .and_then(|v| v.as_str())
                .and_then(|id| grouped.remove(id))
                .unwrap_or_default();
            if let Some(obj) = row.as_object_mut() {
                obj.insert(hm.name.to_string(), Value::Array(children));
            }
        }
        Ok(())
    }
}

/// SQL for one batched relation fetch: keyed on `$1` (the id array, bound by
/// the caller) with the target entity's tenant predicate appended after it.
fn relation_select_sql(
    def: &'static EntityDef,
    key_column: &str,
    ctx: &CallerContext,
) -> Result<(String, Vec<SqlParam>), DatabaseError> {
    crate::query::builder::validate_identifier(key_column).map_err(qerr)?;
    let mut qb = QueryBuilder::new_at(def.table, 1).map_err(qerr)?;
    qb.push_raw(format!("\"{key_column}\" = ANY($1)"));
    scope::apply_tenant_scope(&mut qb, def, ctx);
    let sql = format!(
        "SELECT row_to_json(t) AS row FROM (SELECT * FROM \"{}\" WHERE {}) t",
        def.table,
        qb.where_clause()
    );
    Ok((sql, qb.params().to_vec()))
}

fn qerr(e: QueryError) -> DatabaseError {
    DatabaseError::QueryError(e.to_string())
}

fn bind<'q>(
    q: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
    param: &'q SqlParam,
) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
    match param {
        SqlParam::Null => q.bind(Option::<String>::None),
        SqlParam::Text(s) => q.bind(s.as_str()),
        SqlParam::Uuid(u) => q.bind(*u),
        SqlParam::Date(d) => q.bind(*d),
        SqlParam::Timestamp(t) => q.bind(*t),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller() -> CallerContext {
        CallerContext {
            user_id: Uuid::new_v4(),
            tenant_id: "tenant_a".to_string(),
            roles: vec!["admin".to_string()],
        }
    }

    #[test]
    fn embedded_parent_fetch_carries_the_tenant_predicate() {
        let org = registry::by_name("organization").unwrap();
        let (sql, params) = relation_select_sql(org, "id", &caller()).unwrap();
        assert!(sql.contains("\"id\" = ANY($1)"));
        assert!(sql.contains("\"tenant_id\" = $2"));
        assert_eq!(params, vec![SqlParam::Text("tenant_a".to_string())]);
    }

    #[test]
    fn embedded_child_fetch_is_scoped_through_its_own_path() {
        let appointment = registry::by_name("appointment").unwrap();
        let (sql, _) = relation_select_sql(appointment, "organization_id", &caller()).unwrap();
        assert!(sql.contains("\"organization_id\" = ANY($1)"));
        assert!(sql.contains("\"organization_id\" IN (SELECT \"id\" FROM \"organization\" WHERE \"tenant_id\" = $2)"));
    }

    #[test]
    fn embedded_fetch_without_tenant_matches_nothing() {
        let mut ctx = caller();
        ctx.tenant_id.clear();
        let user = registry::by_name("user").unwrap();
        let (sql, params) = relation_select_sql(user, "id", &ctx).unwrap();
        assert!(sql.contains("1=0"));
        assert!(params.is_empty());
    }
}
