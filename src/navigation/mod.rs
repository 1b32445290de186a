//! Navigation gating
//!
//! - `guard`: route requirements and the pure navigation decision
//! - `table`: requirements attached to route paths at startup

pub mod guard;
pub mod table;

pub use guard::{decide, NavigationDecision, RouteRequirement};
pub use table::RouteTable;
