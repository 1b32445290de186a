//! Identity provider boundary
//!
//! The session manager only talks to the provider through [`IdentityProvider`],
//! so the Keycloak client can be swapped for a scripted fake in tests.

use async_trait::async_trait;
use url::Url;

use super::error::ProviderError;
use super::jwt::Claims;

/// Tokens issued by the provider together with the verified access token claims
#[derive(Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub claims: Claims,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print token material
        f.debug_struct("TokenSet")
            .field("sub", &self.claims.sub)
            .field("exp", &self.claims.exp)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("has_id_token", &self.id_token.is_some())
            .finish()
    }
}

/// How the authorization request is presented to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationMode {
    /// Full-page redirect to the provider's login page
    Interactive,
    /// Hidden `prompt=none` negotiation answered on the silent check page
    Silent,
}

/// A prepared authorization-code request (PKCE S256 + CSRF state)
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: Url,
    /// CSRF state echoed back on the callback
    pub state: String,
    pub pkce_verifier: String,
    /// Redirect URI the provider was told to use; the code exchange must repeat it
    pub redirect_uri: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Non-interactive probe of the provider.
    ///
    /// `Ok(None)` means the provider is healthy but no session is bound to this
    /// client yet.
    async fn check_sso(&self) -> Result<Option<TokenSet>, ProviderError>;

    async fn authorization_request(
        &self,
        mode: AuthorizationMode,
    ) -> Result<AuthorizationRequest, ProviderError>;

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, ProviderError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ProviderError>;

    /// End-session URL; `id_token_hint` is only used while it is still valid
    async fn logout_url(&self, id_token_hint: Option<&str>) -> Result<Url, ProviderError>;
}
