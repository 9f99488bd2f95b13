//! Dispatcher behavior that needs no database: authentication, routing,
//! method handling and role grants.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use clinic_api::auth::{generate_jwt, Claims};
use clinic_api::handlers;

fn token(roles: &[&str]) -> String {
    let claims = Claims::new(
        Uuid::new_v4(),
        "tenant_a",
        roles.iter().map(|r| r.to_string()).collect(),
    );
    generate_jwt(&claims).unwrap()
}

fn request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let app = handlers::app();
    let response = app
        .oneshot(request("GET", "/api/appointments", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = body_json(response).await;
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn garbled_token_is_unauthorized() {
    let app = handlers::app();
    let response = app
        .oneshot(request("GET", "/api/appointments", Some("not.a.jwt")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unsupported_collection_method_names_the_method() {
    let app = handlers::app();
    let token = token(&["admin"]);
    let response = app
        .oneshot(request("PATCH", "/api/appointments", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let body = body_json(response).await;
    assert_eq!(body["code"], "METHOD_NOT_ALLOWED");
    assert!(body["message"].as_str().unwrap().contains("PATCH"));
}

#[tokio::test]
async fn delete_on_collection_is_not_allowed() {
    let app = handlers::app();
    let token = token(&["admin"]);
    let response = app
        .oneshot(request("DELETE", "/api/appointments", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let body = body_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("DELETE"));
}

#[tokio::test]
async fn unsupported_item_method_is_rejected_before_id_parsing() {
    let app = handlers::app();
    let token = token(&["admin"]);
    let response = app
        .oneshot(request("PATCH", "/api/appointments/not-a-uuid", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn unknown_entity_is_not_found() {
    let app = handlers::app();
    let token = token(&["admin"]);
    let response = app
        .oneshot(request("GET", "/api/invoices", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = body_json(response).await;
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn malformed_item_id_is_bad_request() {
    let app = handlers::app();
    let token = token(&["admin"]);
    let response = app
        .oneshot(request("GET", "/api/appointments/not-a-uuid", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn role_without_grant_is_forbidden() {
    let app = handlers::app();
    let token = token(&["guest"]);
    let response = app
        .oneshot(request("GET", "/api/organizations", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = body_json(response).await;
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn root_is_open_and_describes_the_service() {
    let app = handlers::app();
    let response = app.oneshot(request("GET", "/", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["name"], "clinic-api");
}
