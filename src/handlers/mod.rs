pub mod entity;

use axum::{
    middleware,
    routing::{any, get},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config;
use crate::db::DatabaseManager;
use crate::error::ApiError;
use crate::middleware::jwt_auth_middleware;

/// Build the application router. Everything under `/api` requires a valid
/// bearer token; `/` and `/health` are open.
pub fn app() -> Router {
    let mut router = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/api", entity_routes());

    if config::CONFIG.security.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }
    router.layer(TraceLayer::new_for_http())
}

/// All entity traffic funnels through two wildcard routes; the dispatcher
/// resolves the entity from the path and switches on the method itself so
/// unsupported methods get a 405 with the method named.
fn entity_routes() -> Router {
    Router::new()
        .route("/:entity", any(entity::collection))
        .route("/:entity/:id", any(entity::item))
        .layer(middleware::from_fn(jwt_auth_middleware))
}

async fn root() -> Json<Value> {
    Json(json!({
        "name": "clinic-api",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/health",
            "entities": "/api/:entity",
        },
    }))
}

async fn health() -> Result<Json<Value>, ApiError> {
    DatabaseManager::health_check().await.map_err(|e| {
        tracing::error!("Health check failed: {}", e);
        ApiError::service_unavailable("Database unreachable")
    })?;
    Ok(Json(json!({ "status": "ok" })))
}
