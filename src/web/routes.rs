use super::handlers::{
    access_denied_handler, admin_handler, dashboard_handler, healthz_handler, landing_handler,
    readyz_handler,
};
use super::middleware::{navigation_guard, ACCESS_DENIED_PATH};
use crate::{
    auth::{callback_handler, login_handler, logout_handler, silent_check_handler},
    navigation::{RouteRequirement, RouteTable},
    AppState,
};
use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::{services::ServeFile, trace::TraceLayer};

pub const SILENT_CHECK_PAGE: &str = "/silent-check-sso.html";

/// Access requirements for every page route
pub fn route_table() -> RouteTable {
    RouteTable::new()
        .declare("/", RouteRequirement::public())
        .declare(ACCESS_DENIED_PATH, RouteRequirement::public())
        .declare(
            "/dashboard",
            RouteRequirement::with_roles(["team_member", "project_manager", "app_admin"]),
        )
        .declare("/admin", RouteRequirement::with_roles(["app_admin"]))
}

pub fn create_router(state: Arc<AppState>) -> Router {
    // Pages go through the navigation guard; auth endpoints and probes do not
    let pages = Router::new()
        .route("/", get(landing_handler))
        .route("/dashboard", get(dashboard_handler))
        .route("/admin", get(admin_handler))
        .route(ACCESS_DENIED_PATH, get(access_denied_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            navigation_guard,
        ));

    Router::new()
        .merge(pages)
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/auth/login", get(login_handler))
        .route("/auth/callback", get(callback_handler))
        .route("/auth/silent-check", get(silent_check_handler))
        .route("/auth/logout", get(logout_handler).post(logout_handler))
        .route_service(
            SILENT_CHECK_PAGE,
            ServeFile::new("static/silent-check-sso.html"),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
