//! Keycloak implementation of [`IdentityProvider`]
//!
//! Endpoints come from the realm's OIDC discovery document. Login uses the
//! authorization-code flow with PKCE (S256); the client is public unless a
//! client secret is configured.

use async_trait::async_trait;
use oauth2::{
    basic::{BasicErrorResponseType, BasicTokenType},
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    ExtraTokenFields, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken,
    RequestTokenError, Scope, StandardErrorResponse, StandardRevocableToken,
    StandardTokenIntrospectionResponse, StandardTokenResponse, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;

use super::error::ProviderError;
use super::jwt::JwtValidator;
use super::provider::{AuthorizationMode, AuthorizationRequest, IdentityProvider, TokenSet};
use crate::config::Config;

// =============================================================================
// Types
// =============================================================================

/// Custom extra fields to capture id_token from OIDC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcTokenFields {
    pub id_token: Option<String>,
}

impl ExtraTokenFields for OidcTokenFields {}

type OidcTokenResponse = StandardTokenResponse<OidcTokenFields, BasicTokenType>;

/// Type alias for our configured OAuth client with OIDC support
type ConfiguredOAuthClient = oauth2::Client<
    StandardErrorResponse<BasicErrorResponseType>,
    OidcTokenResponse,
    StandardTokenIntrospectionResponse<OidcTokenFields, BasicTokenType>,
    StandardRevocableToken,
    StandardErrorResponse<oauth2::RevocationErrorResponseType>,
    EndpointSet,    // HasAuthUrl
    EndpointNotSet, // HasDeviceAuthUrl
    EndpointNotSet, // HasIntrospectionUrl
    EndpointNotSet, // HasRevocationUrl
    EndpointSet,    // HasTokenUrl
>;

/// Subset of the OIDC discovery document we rely on
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

/// Static client settings, fixed at startup
#[derive(Debug, Clone)]
pub struct KeycloakSettings {
    pub keycloak_url: String,
    pub realm: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub expected_audience: Option<String>,
    pub redirect_uri: String,
    pub silent_check_uri: String,
    pub post_logout_redirect_uri: String,
    pub jwks_cache_ttl_secs: u64,
}

impl KeycloakSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            keycloak_url: config.keycloak_url.clone(),
            realm: config.keycloak_realm.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            expected_audience: config.expected_audience.clone(),
            redirect_uri: config.redirect_uri(),
            silent_check_uri: config.silent_check_uri(),
            post_logout_redirect_uri: config.post_logout_redirect_uri(),
            jwks_cache_ttl_secs: config.jwks_cache_ttl_secs,
        }
    }

    /// `{url}/realms/{realm}/.well-known/openid-configuration`
    pub fn discovery_url(&self) -> String {
        format!(
            "{}/realms/{}/.well-known/openid-configuration",
            self.keycloak_url, self.realm
        )
    }

    /// Fallback when the discovery document omits `end_session_endpoint`
    fn default_logout_endpoint(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/logout",
            self.keycloak_url, self.realm
        )
    }
}

/// Everything derived from a successful discovery
struct Discovered {
    metadata: ProviderMetadata,
    oauth: ConfiguredOAuthClient,
    validator: JwtValidator,
}

pub struct KeycloakProvider {
    settings: KeycloakSettings,
    http: reqwest::Client,
    discovered: RwLock<Option<Arc<Discovered>>>,
}

// =============================================================================
// Construction & discovery
// =============================================================================

/// Create a reqwest client for provider requests using config timeouts
pub fn create_http_client(
    connect_timeout_secs: u64,
    request_timeout_secs: u64,
) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none()) // Security: prevent SSRF
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .timeout(Duration::from_secs(request_timeout_secs))
        .build()
}

/// Build the OAuth2 client from discovered endpoints
fn create_oauth_client(
    settings: &KeycloakSettings,
    metadata: &ProviderMetadata,
) -> Result<ConfiguredOAuthClient, ProviderError> {
    let auth_url = AuthUrl::new(metadata.authorization_endpoint.clone())
        .map_err(|e| ProviderError::Malformed(format!("Invalid authorization endpoint: {}", e)))?;
    let token_url = TokenUrl::new(metadata.token_endpoint.clone())
        .map_err(|e| ProviderError::Malformed(format!("Invalid token endpoint: {}", e)))?;
    let redirect_url = RedirectUrl::new(settings.redirect_uri.clone())
        .map_err(|e| ProviderError::Malformed(format!("Invalid redirect URL: {}", e)))?;

    let mut client = oauth2::Client::new(ClientId::new(settings.client_id.clone()))
        .set_auth_uri(auth_url)
        .set_token_uri(token_url)
        .set_redirect_uri(redirect_url);

    if let Some(secret) = &settings.client_secret {
        client = client.set_client_secret(ClientSecret::new(secret.clone()));
    }

    Ok(client)
}

impl KeycloakProvider {
    pub fn new(settings: KeycloakSettings, http: reqwest::Client) -> Self {
        Self {
            settings,
            http,
            discovered: RwLock::new(None),
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let http = create_http_client(
            config.http_connect_timeout_secs,
            config.http_request_timeout_secs,
        )
        .map_err(|e| anyhow::anyhow!("Failed to build HTTP client for Keycloak: {}", e))?;
        Ok(Self::new(KeycloakSettings::from_config(config), http))
    }

    /// Fetch discovery + JWKS and cache the result
    async fn discover(&self) -> Result<Arc<Discovered>, ProviderError> {
        let url = self.settings.discovery_url();
        tracing::info!(url = %url, "Fetching OIDC discovery document");

        let metadata: ProviderMetadata = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(format!("discovery request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| ProviderError::Unreachable(format!("discovery request failed: {}", e)))?
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("invalid discovery document: {}", e)))?;

        if metadata.issuer.trim().is_empty() {
            return Err(ProviderError::Malformed(
                "discovery document has an empty issuer".to_string(),
            ));
        }

        let oauth = create_oauth_client(&self.settings, &metadata)?;
        let validator = JwtValidator::new(
            metadata.jwks_uri.clone(),
            metadata.issuer.clone(),
            self.http.clone(),
            self.settings.jwks_cache_ttl_secs,
        );
        validator
            .prefetch_jwks()
            .await
            .map_err(|e| ProviderError::Malformed(format!("{:#}", e)))?;

        tracing::info!(
            issuer = %metadata.issuer,
            has_end_session_endpoint = metadata.end_session_endpoint.is_some(),
            "Identity provider discovered"
        );

        let discovered = Arc::new(Discovered {
            metadata,
            oauth,
            validator,
        });
        *self.discovered.write().await = Some(discovered.clone());
        Ok(discovered)
    }

    /// Cached discovery, performing it lazily (e.g. after a degraded start)
    async fn discovered(&self) -> Result<Arc<Discovered>, ProviderError> {
        if let Some(found) = self.discovered.read().await.as_ref() {
            return Ok(found.clone());
        }
        self.discover().await
    }

    async fn token_set(
        &self,
        discovered: &Discovered,
        response: OidcTokenResponse,
    ) -> Result<TokenSet, ProviderError> {
        let access_token = response.access_token().secret().clone();
        let claims = discovered
            .validator
            .validate_async(&access_token, self.settings.expected_audience.as_deref())
            .await
            .map_err(|e| ProviderError::Malformed(format!("{:#}", e)))?;

        Ok(TokenSet {
            access_token,
            refresh_token: response.refresh_token().map(|t| t.secret().clone()),
            id_token: response.extra_fields().id_token.clone(),
            claims,
        })
    }
}

fn map_token_error<RE>(
    err: RequestTokenError<RE, StandardErrorResponse<BasicErrorResponseType>>,
) -> ProviderError
where
    RE: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response) => {
            ProviderError::Rejected(response.to_string())
        }
        RequestTokenError::Request(e) => ProviderError::Unreachable(e.to_string()),
        RequestTokenError::Parse(e, _) => ProviderError::Malformed(e.to_string()),
        RequestTokenError::Other(msg) => ProviderError::Unreachable(msg),
    }
}

// =============================================================================
// IdentityProvider
// =============================================================================

#[async_trait]
impl IdentityProvider for KeycloakProvider {
    async fn check_sso(&self) -> Result<Option<TokenSet>, ProviderError> {
        // Always rediscover: this is the startup health probe
        self.discover().await?;

        // Provider session cookies live in the browser; the hidden negotiation
        // on the silent check page is what can attach one to this process.
        tracing::info!(
            realm = %self.settings.realm,
            "Provider reachable, no session bound to this client yet"
        );
        Ok(None)
    }

    async fn authorization_request(
        &self,
        mode: AuthorizationMode,
    ) -> Result<AuthorizationRequest, ProviderError> {
        let discovered = self.discovered().await?;
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let redirect_uri = match mode {
            AuthorizationMode::Interactive => self.settings.redirect_uri.clone(),
            AuthorizationMode::Silent => self.settings.silent_check_uri.clone(),
        };
        let redirect_url = RedirectUrl::new(redirect_uri.clone())
            .map_err(|e| ProviderError::Malformed(format!("Invalid redirect URL: {}", e)))?;

        let mut request = discovered
            .oauth
            .authorize_url(CsrfToken::new_random)
            .add_scope(Scope::new("openid".to_string()))
            .add_scope(Scope::new("profile".to_string()))
            .add_scope(Scope::new("email".to_string()))
            .set_pkce_challenge(pkce_challenge)
            .set_redirect_uri(Cow::Owned(redirect_url));
        if mode == AuthorizationMode::Silent {
            request = request.add_extra_param("prompt", "none");
        }
        let (url, csrf_token) = request.url();

        tracing::debug!(mode = ?mode, "Authorization request prepared");

        Ok(AuthorizationRequest {
            url,
            state: csrf_token.secret().clone(),
            pkce_verifier: pkce_verifier.secret().clone(),
            redirect_uri,
        })
    }

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, ProviderError> {
        let discovered = self.discovered().await?;
        let redirect_url = RedirectUrl::new(redirect_uri.to_string())
            .map_err(|e| ProviderError::Malformed(format!("Invalid redirect URL: {}", e)))?;

        tracing::info!("Exchanging authorization code for tokens");
        let response = discovered
            .oauth
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_string()))
            .set_redirect_uri(Cow::Owned(redirect_url))
            .request_async(&self.http)
            .await
            .map_err(map_token_error)?;

        self.token_set(&discovered, response).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ProviderError> {
        let discovered = self.discovered().await?;
        let token = RefreshToken::new(refresh_token.to_string());

        let response = discovered
            .oauth
            .exchange_refresh_token(&token)
            .request_async(&self.http)
            .await
            .map_err(map_token_error)?;

        self.token_set(&discovered, response).await
    }

    async fn logout_url(&self, id_token_hint: Option<&str>) -> Result<Url, ProviderError> {
        let discovered = self.discovered().await?;
        let endpoint = discovered
            .metadata
            .end_session_endpoint
            .clone()
            .unwrap_or_else(|| self.settings.default_logout_endpoint());

        // Keycloak logs "expired_code" for stale hints; fall back to client_id
        let mut valid_hint = None;
        if let Some(hint) = id_token_hint.filter(|t| !t.trim().is_empty()) {
            match discovered
                .validator
                .validate_id_token(hint, &self.settings.client_id)
                .await
            {
                Ok(_) => valid_hint = Some(hint),
                Err(e) => {
                    tracing::info!(error = %e, "id_token unusable, using client_id for logout")
                }
            }
        }

        build_logout_url(
            &endpoint,
            &self.settings.client_id,
            &self.settings.post_logout_redirect_uri,
            valid_hint,
        )
    }
}

/// Build the end-session URL
///
/// Keycloak requires either `client_id` or `id_token_hint` when using
/// `post_logout_redirect_uri`. The hint is preferred when available.
pub fn build_logout_url(
    end_session_endpoint: &str,
    client_id: &str,
    post_logout_redirect_uri: &str,
    id_token_hint: Option<&str>,
) -> Result<Url, ProviderError> {
    let mut url = Url::parse(end_session_endpoint)
        .map_err(|e| ProviderError::Malformed(format!("Invalid end-session endpoint: {}", e)))?;
    {
        let mut query = url.query_pairs_mut();
        match id_token_hint {
            Some(hint) => query.append_pair("id_token_hint", hint),
            None => query.append_pair("client_id", client_id),
        };
        query.append_pair("post_logout_redirect_uri", post_logout_redirect_uri);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> KeycloakSettings {
        KeycloakSettings {
            keycloak_url: "http://localhost:8080/auth".to_string(),
            realm: "task-app-realm".to_string(),
            client_id: "taskboard-web".to_string(),
            client_secret: None,
            expected_audience: None,
            redirect_uri: "http://localhost:3000/auth/callback".to_string(),
            silent_check_uri: "http://localhost:3000/silent-check-sso.html".to_string(),
            post_logout_redirect_uri: "http://localhost:3000/".to_string(),
            jwks_cache_ttl_secs: 3600,
        }
    }

    fn metadata() -> ProviderMetadata {
        serde_json::from_value(serde_json::json!({
            "issuer": "http://localhost:8080/auth/realms/task-app-realm",
            "authorization_endpoint": "http://localhost:8080/auth/realms/task-app-realm/protocol/openid-connect/auth",
            "token_endpoint": "http://localhost:8080/auth/realms/task-app-realm/protocol/openid-connect/token",
            "jwks_uri": "http://localhost:8080/auth/realms/task-app-realm/protocol/openid-connect/certs",
            "response_types_supported": ["code"]
        }))
        .unwrap()
    }

    #[test]
    fn test_discovery_url() {
        assert_eq!(
            settings().discovery_url(),
            "http://localhost:8080/auth/realms/task-app-realm/.well-known/openid-configuration"
        );
    }

    #[test]
    fn test_metadata_without_end_session_endpoint() {
        let metadata = metadata();
        assert!(metadata.end_session_endpoint.is_none());
        assert_eq!(
            settings().default_logout_endpoint(),
            "http://localhost:8080/auth/realms/task-app-realm/protocol/openid-connect/logout"
        );
    }

    #[test]
    fn test_oauth_client_authorize_url_uses_pkce_s256() {
        let client = create_oauth_client(&settings(), &metadata()).unwrap();
        let (challenge, _verifier) = PkceCodeChallenge::new_random_sha256();
        let (url, csrf) = client
            .authorize_url(CsrfToken::new_random)
            .add_scope(Scope::new("openid".to_string()))
            .set_pkce_challenge(challenge)
            .url();

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |k: &str| {
            pairs
                .iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(get("code_challenge_method").as_deref(), Some("S256"));
        assert_eq!(get("client_id").as_deref(), Some("taskboard-web"));
        assert_eq!(get("response_type").as_deref(), Some("code"));
        assert_eq!(get("state").as_deref(), Some(csrf.secret().as_str()));
        assert_eq!(
            get("redirect_uri").as_deref(),
            Some("http://localhost:3000/auth/callback")
        );
    }

    #[test]
    fn test_invalid_token_endpoint_is_malformed() {
        let mut metadata = metadata();
        metadata.token_endpoint = "not a url".to_string();
        let result = create_oauth_client(&settings(), &metadata);
        assert!(matches!(result, Err(ProviderError::Malformed(_))));
    }

    #[test]
    fn test_build_logout_url_with_hint() {
        let url = build_logout_url(
            "http://keycloak.localhost/realms/dev/protocol/openid-connect/logout",
            "taskboard-web",
            "http://localhost:3000/",
            Some("header.payload.sig"),
        )
        .unwrap();

        let query = url.query().unwrap();
        assert!(query.contains("id_token_hint=header.payload.sig"));
        assert!(!query.contains("client_id="));
        assert!(query.contains("post_logout_redirect_uri=http%3A%2F%2Flocalhost%3A3000%2F"));
    }

    #[test]
    fn test_build_logout_url_falls_back_to_client_id() {
        let url = build_logout_url(
            "http://keycloak.localhost/realms/dev/protocol/openid-connect/logout",
            "taskboard-web",
            "http://localhost:3000/",
            None,
        )
        .unwrap();

        let query = url.query().unwrap();
        assert!(query.contains("client_id=taskboard-web"));
        assert!(!query.contains("id_token_hint"));
    }

    #[test]
    fn test_build_logout_url_rejects_bad_endpoint() {
        let result = build_logout_url("::not-a-url", "taskboard-web", "http://localhost/", None);
        assert!(matches!(result, Err(ProviderError::Malformed(_))));
    }
}
