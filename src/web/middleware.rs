use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use std::sync::Arc;

use crate::{
    auth::handlers::{authorization_redirect, login_error_response},
    auth::AuthorizationMode,
    navigation::{decide, NavigationDecision},
    AppState,
};

pub const ACCESS_DENIED_PATH: &str = "/access-denied";

/// Seconds a client should wait before retrying while initialization is pending
const INIT_RETRY_AFTER_SECS: &str = "2";

/// Navigation guard applied to every page route
///
/// Requirements are looked up by the matched route pattern; the requested
/// path and query are what the user returns to after login.
pub async fn navigation_guard(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if !state.readiness.is_settled() {
        tracing::debug!(path = %request.uri().path(), "Navigation deferred, initialization pending");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, INIT_RETRY_AFTER_SECS)],
            Json(serde_json::json!({"error": "Session initialization in progress"})),
        )
            .into_response();
    }

    let route_path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let full_path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let requirement = state.routes.requirement(&route_path);
    let session = state.session.session();

    match decide(&requirement, &session, &full_path) {
        NavigationDecision::Proceed => next.run(request).await,
        NavigationDecision::RedirectToLogin { return_path } => {
            tracing::info!(
                event = "navigation_login_required",
                path = %route_path,
                "Unauthenticated navigation, redirecting to login"
            );
            match state.session.login(&return_path).await {
                Ok(redirect) => {
                    authorization_redirect(&state, &redirect, AuthorizationMode::Interactive)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to start login from guard");
                    login_error_response(&e)
                }
            }
        }
        NavigationDecision::RedirectToDenied => {
            tracing::info!(
                event = "navigation_denied",
                path = %route_path,
                subject = ?session.subject(),
                "Navigation denied, missing role"
            );
            Redirect::to(ACCESS_DENIED_PATH).into_response()
        }
    }
}
