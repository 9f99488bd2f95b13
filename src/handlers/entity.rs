//! Entity request dispatch.
//!
//! One collection handler and one item handler cover every entity: the route
//! segment is resolved against the registry, the method selects the
//! operation, and the role grant is checked before any data access. Method
//! checks come before anything that could touch the database so a 405 never
//! depends on backend availability.

use std::collections::HashMap;

use axum::extract::{Path, Query};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db::{record, DatabaseManager, Repository};
use crate::error::ApiError;
use crate::notify;
use crate::query::{self, translate};
use crate::registry::{self, EntityDef};
use crate::scope::{self, Action, CallerContext};

/// `GET /api/:entity` lists, `POST /api/:entity` creates.
pub async fn collection(
    method: Method,
    Path(entity): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    Extension(caller): Extension<CallerContext>,
    payload: Option<Json<Value>>,
) -> Result<Response, ApiError> {
    let def = resolve(&entity)?;

    match method {
        Method::GET => {
            scope::ensure_granted(&caller, def, Action::Read)?;
            let q = translate(def, &params)?;
            let repo = Repository::new(def, DatabaseManager::pool().await?);
            let (data, total_count) = repo.list(&caller, &q).await?;
            Ok(Json(json!({ "data": data, "totalCount": total_count })).into_response())
        }
        Method::POST => {
            scope::ensure_granted(&caller, def, Action::Create)?;
            let Json(body) = payload
                .ok_or_else(|| ApiError::invalid_json("Request body must be a JSON object"))?;
            let plan = record::prepare_insert(def, body)?;
            let repo = Repository::new(def, DatabaseManager::pool().await?);
            let created = repo.insert(&caller, plan).await?;
            if let Some(id) = row_id(&created) {
                notify::notify_created(def.name, id);
            }
            Ok(Json(created).into_response())
        }
        other => Err(ApiError::method_not_allowed(format!("Method {other} not allowed"))),
    }
}

/// `GET`/`PUT`/`DELETE /api/:entity/:id`.
pub async fn item(
    method: Method,
    Path((entity, id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    Extension(caller): Extension<CallerContext>,
    payload: Option<Json<Value>>,
) -> Result<Response, ApiError> {
    let def = resolve(&entity)?;
    if !matches!(method, Method::GET | Method::PUT | Method::DELETE) {
        return Err(ApiError::method_not_allowed(format!("Method {method} not allowed")));
    }
    let id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::bad_request(format!("Invalid id: {id}")))?;

    match method {
        Method::GET => {
            scope::ensure_granted(&caller, def, Action::Read)?;
            let relations = query::parse_relations(def, &params);
            let repo = Repository::new(def, DatabaseManager::pool().await?);
            let row = repo.fetch(&caller, id, &relations).await?;
            Ok(Json(row).into_response())
        }
        Method::PUT => {
            scope::ensure_granted(&caller, def, Action::Update)?;
            let Json(body) = payload
                .ok_or_else(|| ApiError::invalid_json("Request body must be a JSON object"))?;
            let changes = record::prepare_update(def, body)?;
            if changes.is_empty() {
                return Err(ApiError::bad_request("No recognized fields in payload"));
            }
            let repo = Repository::new(def, DatabaseManager::pool().await?);
            let row = repo.update(&caller, id, changes).await?;
            Ok(Json(row).into_response())
        }
        Method::DELETE => {
            scope::ensure_granted(&caller, def, Action::Delete)?;
            let repo = Repository::new(def, DatabaseManager::pool().await?);
            repo.delete(&caller, id).await?;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        other => Err(ApiError::method_not_allowed(format!("Method {other} not allowed"))),
    }
}

fn resolve(entity: &str) -> Result<&'static EntityDef, ApiError> {
    registry::by_route(entity)
        .ok_or_else(|| ApiError::not_found(format!("Unknown resource: {entity}")))
}

fn row_id(row: &Value) -> Option<Uuid> {
    row.get("id").and_then(|v| v.as_str()).and_then(|s| Uuid::parse_str(s).ok())
}
