use super::templates::{AccessDeniedTemplate, AdminTemplate, DashboardTemplate, LandingTemplate};
use crate::{readiness::InitState, AppState};
use askama::Template;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use std::sync::Arc;
use std::time::SystemTime;

fn render(template: impl Template) -> Response {
    match template.render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Template rendering failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
        }
    }
}

/// Liveness probe - always returns OK if the process is running
pub async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness probe - reports whether session initialization has settled
///
/// Returns 200 OK once the silent check finished. Returns 503 while it is
/// still running, or when the provider could not be reached at startup.
pub async fn readyz_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.readiness.state() {
        InitState::Ready { .. } => (StatusCode::OK, "ready".to_string()),
        InitState::Pending => (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready: session initialization pending".to_string(),
        ),
        InitState::Degraded { reason } => {
            tracing::warn!(reason = %reason, "Readiness check failed: initialization degraded");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("not ready: {}", reason),
            )
        }
    }
}

pub async fn landing_handler(State(state): State<Arc<AppState>>) -> Response {
    let session = state.session.session();
    // A degraded provider would only fail again inside the iframe
    let silent_check = !session.is_authenticated()
        && matches!(state.readiness.state(), InitState::Ready { .. });

    render(LandingTemplate {
        display_name: session.display_name().map(str::to_string),
        silent_check,
    })
}

pub async fn dashboard_handler(State(state): State<Arc<AppState>>) -> Response {
    let session = state.session.session();

    tracing::debug!(
        subject = ?session.subject(),
        roles = ?session.roles().collect::<Vec<_>>(),
        "Rendering dashboard"
    );

    render(DashboardTemplate {
        username: session.display_name().unwrap_or_default().to_string(),
        email: session.email().map(str::to_string),
        roles: session.roles().map(str::to_string).collect(),
        is_admin: session.has_role("app_admin"),
    })
}

pub async fn admin_handler(State(state): State<Arc<AppState>>) -> Response {
    let session = state.session.session();

    render(AdminTemplate {
        username: session.display_name().unwrap_or_default().to_string(),
        expires_in_secs: session
            .remaining_validity_secs(SystemTime::now())
            .unwrap_or(0),
    })
}

pub async fn access_denied_handler(State(state): State<Arc<AppState>>) -> Response {
    let session = state.session.session();

    render(AccessDeniedTemplate {
        username: session.display_name().map(str::to_string),
        roles: session.roles().map(str::to_string).collect(),
    })
}
