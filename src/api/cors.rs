//! Cross-origin access control for the embedded widget.
//!
//! The allowlist comes from config, loaded once at startup — handlers never
//! read the environment. An empty allowlist means permissive (any origin may
//! embed the widget). Preflight responses mirror the exact allow/deny
//! decision of the main request: an origin that would be rejected on POST is
//! rejected on OPTIONS too.

use super::state::ApiState;

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

/// Whether a request origin is acceptable under the allowlist. Requests
/// without an `Origin` header (same-origin, server-to-server) are always
/// allowed.
pub fn origin_allowed(allowed_origins: &[String], origin: Option<&str>) -> bool {
    match origin {
        None => true,
        Some(origin) => {
            allowed_origins.is_empty() || allowed_origins.iter().any(|allowed| allowed == origin)
        }
    }
}

pub async fn cors_middleware(
    State(state): State<Arc<ApiState>>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let allowed = origin_allowed(&state.config.allowed_origins, origin.as_deref());

    if !allowed {
        // Same decision for preflight and main request.
        let body = serde_json::json!({ "error": { "code": "origin_forbidden" } });
        return (StatusCode::FORBIDDEN, axum::Json(body)).into_response();
    }

    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(response.headers_mut(), origin.as_deref());
        response.headers_mut().insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, OPTIONS"),
        );
        response.headers_mut().insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("content-type"),
        );
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut(), origin.as_deref());
    response
}

fn apply_cors_headers(headers: &mut axum::http::HeaderMap, origin: Option<&str>) {
    let value = match origin {
        Some(origin) => match HeaderValue::from_str(origin) {
            Ok(value) => value,
            Err(_) => return,
        },
        None => HeaderValue::from_static("*"),
    };
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::Db;
    use axum::body::{to_bytes, Body};
    use axum::routing::post;
    use axum::Router;
    use tower::ServiceExt as _;

    #[test]
    fn empty_allowlist_is_permissive() {
        assert!(origin_allowed(&[], Some("https://anywhere.example")));
        assert!(origin_allowed(&[], None));
    }

    #[test]
    fn allowlist_admits_only_listed_origins() {
        let allowed = vec!["https://app.example.com".to_string()];

        assert!(origin_allowed(&allowed, Some("https://app.example.com")));
        assert!(!origin_allowed(&allowed, Some("https://evil.example")));
    }

    #[test]
    fn absent_origin_is_always_allowed() {
        let allowed = vec!["https://app.example.com".to_string()];

        assert!(origin_allowed(&allowed, None));
    }

    /// One-route router with the middleware installed, the way the API
    /// wires it up.
    async fn widget_router(origins: Vec<String>) -> (Db, Router) {
        let db = Db::connect_in_memory().await.unwrap();
        let mut config = Config::default();
        config.allowed_origins = origins;
        let state = Arc::new(ApiState::new(config, db.pool.clone()));

        let app = Router::new()
            .route("/ping", post(|| async { "pong" }))
            .layer(axum::middleware::from_fn_with_state(state, cors_middleware));
        (db, app)
    }

    async fn send(app: Router, method: &str, origin: &str) -> Response {
        app.oneshot(
            axum::http::Request::builder()
                .method(method)
                .uri("/ping")
                .header(header::ORIGIN, origin)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn preflight_and_main_request_share_the_decision() {
        let (_db, app) = widget_router(vec!["https://app.example.com".to_string()]).await;

        // A disallowed origin is rejected identically on both paths.
        for method in ["OPTIONS", "POST"] {
            let response = send(app.clone(), method, "https://evil.example").await;
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{method}");

            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(body["error"]["code"], "origin_forbidden", "{method}");
        }
    }

    #[tokio::test]
    async fn allowed_origin_is_echoed_on_preflight_and_main_request() {
        let (_db, app) = widget_router(vec!["https://app.example.com".to_string()]).await;

        let preflight = send(app.clone(), "OPTIONS", "https://app.example.com").await;
        assert_eq!(preflight.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            preflight
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|value| value.to_str().ok()),
            Some("https://app.example.com")
        );

        let main = send(app, "POST", "https://app.example.com").await;
        assert_eq!(main.status(), StatusCode::OK);
        assert_eq!(
            main.headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|value| value.to_str().ok()),
            Some("https://app.example.com")
        );
    }
}
