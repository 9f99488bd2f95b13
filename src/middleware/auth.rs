//! Identity middleware: Bearer token to [`CallerContext`].

use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::auth;
use crate::error::ApiError;
use crate::scope::CallerContext;

/// Validates the `Authorization: Bearer` token and stashes the resolved
/// [`CallerContext`] as a request extension for the handlers. A token without
/// a tenant claim is rejected outright rather than falling through to an
/// unscoped query.
pub async fn jwt_auth_middleware(
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

    let token = header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?;

    let claims = auth::verify_jwt(token).map_err(|e| {
        debug!("JWT verification failed: {}", e);
        ApiError::unauthorized("Invalid or expired token")
    })?;

    if claims.tenant.is_empty() {
        return Err(ApiError::unauthorized("Token has no tenant"));
    }

    request.extensions_mut().insert(CallerContext {
        user_id: claims.sub,
        tenant_id: claims.tenant,
        roles: claims.roles,
    });

    Ok(next.run(request).await)
}
