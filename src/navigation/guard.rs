//! Route-gating decision
//!
//! Given a route's declared requirement and the current session, decide
//! whether a navigation may proceed. The decision is pure and total: it reads
//! already-resolved session state and never waits on the identity provider.

use std::collections::BTreeSet;

use crate::auth::Session;

/// What a route declares about who may view it
///
/// A route with allowed roles always requires authentication; the
/// constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouteRequirement {
    requires_auth: bool,
    allowed_roles: BTreeSet<String>,
}

impl RouteRequirement {
    /// Anyone may view the route
    pub fn public() -> Self {
        Self::default()
    }

    /// Any authenticated user may view the route
    pub fn authenticated() -> Self {
        Self {
            requires_auth: true,
            allowed_roles: BTreeSet::new(),
        }
    }

    /// Authenticated users holding at least one of `roles`
    pub fn with_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            requires_auth: true,
            allowed_roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }

    pub fn allowed_roles(&self) -> impl Iterator<Item = &str> {
        self.allowed_roles.iter().map(String::as_str)
    }
}

/// Outcome of a navigation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationDecision {
    Proceed,
    /// Send the user to the provider's login, then back to `return_path`
    RedirectToLogin { return_path: String },
    RedirectToDenied,
}

/// Decide a single navigation attempt
pub fn decide(
    route: &RouteRequirement,
    session: &Session,
    target_full_path: &str,
) -> NavigationDecision {
    if !route.requires_auth {
        return NavigationDecision::Proceed;
    }

    if !session.is_authenticated() {
        return NavigationDecision::RedirectToLogin {
            return_path: target_full_path.to_string(),
        };
    }

    if !route.allowed_roles.is_empty()
        && !route.allowed_roles.iter().any(|role| session.has_role(role))
    {
        return NavigationDecision::RedirectToDenied;
    }

    NavigationDecision::Proceed
}
