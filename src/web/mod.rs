//! Web layer: page routes behind the navigation guard, auth endpoints, probes

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod templates;

pub use routes::{create_router, route_table};
