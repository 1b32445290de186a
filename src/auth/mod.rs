//! Authentication module
//!
//! This module owns the client's session with the identity provider.
//!
//! ## Structure
//!
//! - `provider`: the [`IdentityProvider`] boundary
//! - `keycloak`: Keycloak implementation (discovery, PKCE, token exchange, end-session)
//! - `jwt`: JWT validation and JWKS caching
//! - `session`: [`Session`] and the [`SessionManager`] lifecycle (refresh loop included)
//! - `handlers`: HTTP handlers for login, callback, silent check and logout
//! - `error`: error types
//!
//! ## Authentication Flow
//!
//! 1. Startup runs the silent check (`SessionManager::initialize`)
//! 2. A guarded navigation without a session redirects to Keycloak, carrying the return path
//! 3. Keycloak authenticates → redirect to `/auth/callback` → code exchange → session established
//! 4. The refresh loop keeps the token fresh; a failed refresh logs out
//! 5. `/auth/logout` clears the session → Keycloak end-session → back to `/`

pub mod error;
pub mod handlers;
pub mod jwt;
pub mod keycloak;
pub mod provider;
pub mod session;

pub use error::{InitError, LoginError, ProviderError, RefreshError};
pub use handlers::{
    callback_handler, login_handler, logout_handler, silent_check_handler, CallbackParams,
    LoginQuery,
};
pub use keycloak::KeycloakProvider;
pub use provider::{AuthorizationMode, IdentityProvider, TokenSet};
pub use session::{RefreshSettings, Session, SessionManager};
