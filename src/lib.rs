//! Taskboard portal library
//!
//! Keycloak session management and role-based navigation for the taskboard web client.

#![deny(dead_code)]

pub mod auth;
pub mod config;
pub mod navigation;
pub mod readiness;
pub mod web;

use auth::SessionManager;
use config::Config;
use navigation::RouteTable;
use readiness::Readiness;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<SessionManager>,
    /// Settled once the startup silent check finishes
    pub readiness: Readiness,
    pub routes: Arc<RouteTable>,
    pub config: Arc<Config>,
}
