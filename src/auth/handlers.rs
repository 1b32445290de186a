//! Authentication handlers for login, callback, silent check, and logout flows
//!
//! - `login_handler`: starts an interactive authorization-code flow
//! - `silent_check_handler`: starts a `prompt=none` flow inside the hidden iframe
//! - `callback_handler`: completes either flow and establishes the session
//! - `logout_handler`: clears the session and hands off to Keycloak end-session
//!
//! Every started login sets a short-lived HttpOnly cookie holding its OAuth
//! `state`; a callback is only accepted from the browser carrying it.

use axum::{
    extract::{Query, State},
    http::{header, header::InvalidHeaderValue, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::session::LoginRedirect;
use super::{AuthorizationMode, LoginError, ProviderError};
use crate::AppState;

/// Cookie binding an interactive login to the browser that started it
pub const LOGIN_STATE_COOKIE: &str = "oauth_state";
/// Same for the hidden silent check, so both can be in flight at once
pub const SILENT_STATE_COOKIE: &str = "oauth_silent_state";

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    #[serde(rename = "returnPath")]
    pub return_path: Option<String>,
}

#[derive(Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

// =============================================================================
// Internal Helpers
// =============================================================================

fn json_error(status: StatusCode, error: &str) -> Response {
    (status, Json(serde_json::json!({ "error": error }))).into_response()
}

/// Create a HeaderValue from a string, returning an error response if invalid
fn header_value(s: &str) -> Result<HeaderValue, Box<Response>> {
    HeaderValue::from_str(s).map_err(|e: InvalidHeaderValue| {
        tracing::error!(
            error = %e,
            value_len = s.len(),
            "Failed to create header value"
        );
        Box::new(json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal error setting response headers",
        ))
    })
}

/// Extract a cookie value from the request headers
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);

    // Proxies may send several Cookie headers
    for header_value in headers.get_all(header::COOKIE) {
        if let Ok(cookie_str) = header_value.to_str() {
            if let Some(value) = cookie_str
                .split(';')
                .map(|c| c.trim())
                .find_map(|c| c.strip_prefix(&prefix))
            {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn state_cookie_name(mode: AuthorizationMode) -> &'static str {
    match mode {
        AuthorizationMode::Interactive => LOGIN_STATE_COOKIE,
        AuthorizationMode::Silent => SILENT_STATE_COOKIE,
    }
}

/// Redirect to the provider and remember the login's `state` in this browser
pub(crate) fn authorization_redirect(
    state: &AppState,
    redirect: &LoginRedirect,
    mode: AuthorizationMode,
) -> Response {
    // Starting a login reached the provider (discovery included)
    state
        .readiness
        .provider_reachable(state.session.session().is_authenticated());

    let cookie = format!(
        "{}={}; HttpOnly; Path=/auth; Max-Age=600; SameSite=Lax{}",
        state_cookie_name(mode),
        redirect.state,
        state.config.cookie_secure_flag()
    );
    let cookie = match header_value(&cookie) {
        Ok(h) => h,
        Err(e) => return *e,
    };

    let mut response = Redirect::to(redirect.url.as_str()).into_response();
    response.headers_mut().append(header::SET_COOKIE, cookie);
    response
}

fn clear_state_cookie(state: &AppState, mode: AuthorizationMode) -> String {
    format!(
        "{}=; HttpOnly; Path=/auth; Max-Age=0; SameSite=Lax{}",
        state_cookie_name(mode),
        state.config.cookie_secure_flag()
    )
}

pub(crate) fn login_error_response(err: &LoginError) -> Response {
    match err {
        LoginError::UnknownState => json_error(
            StatusCode::BAD_REQUEST,
            "Login state unknown or expired, please sign in again",
        ),
        LoginError::Authorization { error, description } => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": error,
                "error_description": description
            })),
        )
            .into_response(),
        LoginError::Provider(ProviderError::Rejected(_)) => {
            json_error(StatusCode::UNAUTHORIZED, "Token exchange failed")
        }
        LoginError::Provider(_) => {
            json_error(StatusCode::BAD_GATEWAY, "Identity provider unavailable")
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Login handler - redirects to Keycloak and returns to `returnPath` afterwards
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LoginQuery>,
) -> Response {
    tracing::info!("Login requested");

    let return_path = query.return_path.as_deref().unwrap_or("/");
    match state.session.login(return_path).await {
        Ok(redirect) => authorization_redirect(&state, &redirect, AuthorizationMode::Interactive),
        Err(e) => {
            tracing::error!(error = %e, "Failed to start login");
            login_error_response(&e)
        }
    }
}

/// Silent check handler - loaded in a hidden iframe by the landing page
pub async fn silent_check_handler(State(state): State<Arc<AppState>>) -> Response {
    if state.session.session().is_authenticated() {
        return StatusCode::NO_CONTENT.into_response();
    }

    match state.session.silent_login().await {
        Ok(redirect) => authorization_redirect(&state, &redirect, AuthorizationMode::Silent),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to start silent check");
            login_error_response(&e)
        }
    }
}

/// Callback handler - validates state, exchanges the code, establishes the session
///
/// Interactive logins redirect to the stored return path. Silent checks answer
/// `204 No Content` to the landing page script that forwarded the callback.
pub async fn callback_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
) -> Response {
    tracing::info!("OAuth callback received");

    let Some(login_state) = params.state else {
        tracing::warn!("CSRF validation failed: No state parameter in callback");
        return json_error(StatusCode::BAD_REQUEST, "Missing state parameter");
    };

    // The pending login stays untouched when this browser did not start it
    let started_here = [LOGIN_STATE_COOKIE, SILENT_STATE_COOKIE]
        .iter()
        .any(|name| extract_cookie(&headers, name).as_deref() == Some(login_state.as_str()));
    if !started_here {
        tracing::warn!(
            has_cookie_header = headers.contains_key(header::COOKIE),
            "CSRF validation failed: state does not match this browser's login cookie"
        );
        return json_error(
            StatusCode::UNAUTHORIZED,
            "CSRF validation failed: state mismatch",
        );
    }

    if let Some(error) = params.error {
        let err = state
            .session
            .abandon_login(
                Some(login_state.as_str()),
                &error,
                params.error_description.as_deref(),
            )
            .await;
        return login_error_response(&err);
    }

    let Some(code) = params.code else {
        tracing::warn!("No authorization code received");
        return json_error(StatusCode::BAD_REQUEST, "Missing authorization code");
    };

    tracing::debug!(code_length = code.len(), "Authorization code received");

    let completed = match state.session.complete_login(&code, &login_state).await {
        Ok(completed) => completed,
        Err(e) => return login_error_response(&e),
    };
    state.readiness.provider_reachable(true);

    let mut response = match completed.mode {
        AuthorizationMode::Silent => StatusCode::NO_CONTENT.into_response(),
        AuthorizationMode::Interactive => {
            tracing::info!(
                return_path = %completed.return_path,
                "Authentication successful, redirecting"
            );
            Redirect::to(&completed.return_path).into_response()
        }
    };
    if let Ok(h) = header_value(&clear_state_cookie(&state, completed.mode)) {
        response.headers_mut().append(header::SET_COOKIE, h);
    }
    response
}

/// Logout handler - clears the session, then redirects to Keycloak end-session
pub async fn logout_handler(State(state): State<Arc<AppState>>) -> Response {
    tracing::info!(event = "logout_start", "Logout requested");

    let redirect = state.session.logout().await;

    // Do not log the target: it may carry id_token_hint
    tracing::info!(
        event = "keycloak_logout_redirect",
        was_authenticated = redirect.was_authenticated,
        "Redirecting to Keycloak end-session"
    );

    Redirect::to(&redirect.target).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_cookie_finds_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("foo=bar; oauth_state=abc123; baz=qux"),
        );
        assert_eq!(
            extract_cookie(&headers, LOGIN_STATE_COOKIE),
            Some("abc123".to_string())
        );
        assert_eq!(extract_cookie(&headers, SILENT_STATE_COOKIE), None);
    }

    #[test]
    fn test_extract_cookie_multiple_headers() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("foo=bar"));
        headers.append(
            header::COOKIE,
            HeaderValue::from_static("oauth_silent_state=s1; baz=qux"),
        );
        assert_eq!(
            extract_cookie(&headers, SILENT_STATE_COOKIE),
            Some("s1".to_string())
        );
    }

    #[test]
    fn test_extract_cookie_no_cookie_header() {
        assert_eq!(extract_cookie(&HeaderMap::new(), LOGIN_STATE_COOKIE), None);
    }
}
