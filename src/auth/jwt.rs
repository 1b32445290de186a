use anyhow::{Context, Result};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

// Helper struct for deserializing Keycloak's realm_access structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct RealmAccess {
    pub(crate) roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub(crate) realm_access: Option<RealmAccess>,
}

impl Claims {
    /// Realm roles carried by the token (`realm_access.roles`)
    pub fn roles(&self) -> Vec<String> {
        self.realm_access
            .as_ref()
            .map(|ra| ra.roles.clone())
            .unwrap_or_default()
    }

    /// Check if the token has realm_access claim at all
    /// Used for diagnostic logging when roles are empty
    pub fn has_realm_access(&self) -> bool {
        self.realm_access.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

// Keycloak publishes encryption keys next to signing keys; only RSA
// signing keys carry n/e and are usable here
#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    #[serde(rename = "use", default)]
    key_use: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

/// Which token is being validated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Access,
    IdToken,
}

impl TokenKind {
    /// Keycloak maps realm roles into access tokens only
    fn carries_realm_roles(self) -> bool {
        matches!(self, TokenKind::Access)
    }
}

struct JwksCache {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Instant,
}

/// Verifies provider-issued tokens (RS256) against the realm JWKS
pub struct JwtValidator {
    jwks_uri: String,
    expected_issuer: String,
    client: reqwest::Client,
    jwks_cache: RwLock<Option<JwksCache>>,
    cache_ttl: Duration,
}

impl JwtValidator {
    /// # Arguments
    /// * `jwks_uri` - JWKS endpoint taken from the discovery document
    /// * `expected_issuer` - Issuer from the discovery document
    /// * `client` - Shared HTTP client (timeouts already configured)
    /// * `jwks_cache_ttl_secs` - JWKS cache TTL
    pub fn new(
        jwks_uri: String,
        expected_issuer: String,
        client: reqwest::Client,
        jwks_cache_ttl_secs: u64,
    ) -> Self {
        tracing::info!(
            jwks_uri = %jwks_uri,
            expected_issuer = %expected_issuer,
            jwks_cache_ttl_secs = jwks_cache_ttl_secs,
            "JWT validator initialized"
        );

        Self {
            jwks_uri,
            expected_issuer,
            client,
            jwks_cache: RwLock::new(None),
            cache_ttl: Duration::from_secs(jwks_cache_ttl_secs),
        }
    }

    /// Validate an access token, fetching JWKS if not cached or expired.
    ///
    /// `audience` of `None` skips the audience check (Keycloak access tokens
    /// for public clients usually carry `account` rather than the client id).
    pub async fn validate_async(&self, token: &str, audience: Option<&str>) -> Result<Claims> {
        self.validate(token, audience, TokenKind::Access).await
    }

    /// Validate an id_token (audience is the client id)
    pub async fn validate_id_token(&self, token: &str, client_id: &str) -> Result<Claims> {
        self.validate(token, Some(client_id), TokenKind::IdToken).await
    }

    async fn validate(
        &self,
        token: &str,
        audience: Option<&str>,
        kind: TokenKind,
    ) -> Result<Claims> {
        tracing::debug!(token_len = token.len(), kind = ?kind, "Validating JWT token (async)");

        let header = decode_header(token).context("Invalid token header")?;
        let kid = header.kid.context("Token missing kid")?;

        let decoding_key = match self.get_cached_key(&kid).await? {
            Some(key) => key,
            None => {
                // Key not found in cache - the realm may have rotated keys
                tracing::warn!(kid = %kid, "Key ID not found in cache, forcing JWKS refresh");
                self.refresh_jwks().await?;

                match self.get_cached_key(&kid).await? {
                    Some(key) => key,
                    None => {
                        tracing::error!(
                            kid = %kid,
                            "Unknown key ID - kid not found in JWKS even after refresh"
                        );
                        anyhow::bail!("Unknown key ID: {}", kid);
                    }
                }
            }
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;
        validation.set_issuer(&[&self.expected_issuer]);
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        let token_data = match decode::<Claims>(token, &decoding_key, &validation) {
            Ok(data) => data,
            Err(e) => {
                // Audit logging without the token itself
                let token_hash = format!("{:x}", md5::compute(token));
                tracing::error!(
                    error = ?e,
                    kid = %kid,
                    alg = ?header.alg,
                    token_hash = %token_hash,
                    token_len = token.len(),
                    "JWT decode/validation failed"
                );
                anyhow::bail!("Token validation failed: {}", e);
            }
        };

        let claims = token_data.claims;
        if kind.carries_realm_roles() && claims.roles().is_empty() {
            tracing::warn!(
                sub = %claims.sub,
                has_realm_access = claims.has_realm_access(),
                "Token has no realm roles - role-gated views will be denied. \
                 Check the client scope configuration for the realm_access.roles mapper."
            );
        } else {
            tracing::debug!(
                sub = %claims.sub,
                username = ?claims.preferred_username,
                roles = ?claims.roles(),
                "Token validated successfully"
            );
        }

        Ok(claims)
    }

    /// Prefetch JWKS so the first token validation does not pay for it
    pub async fn prefetch_jwks(&self) -> Result<()> {
        tracing::info!("Prefetching JWKS");
        self.refresh_jwks().await
    }

    /// Get cached key if available, refreshing an expired or empty cache first
    async fn get_cached_key(&self, kid: &str) -> Result<Option<DecodingKey>> {
        {
            let cache = self.jwks_cache.read().await;
            if let Some(jwks_cache) = cache.as_ref() {
                if jwks_cache.fetched_at.elapsed() < self.cache_ttl {
                    return Ok(jwks_cache.keys.get(kid).cloned());
                }
                tracing::info!(
                    elapsed_secs = jwks_cache.fetched_at.elapsed().as_secs(),
                    ttl_secs = self.cache_ttl.as_secs(),
                    "JWKS cache expired, will refresh"
                );
            }
        } // Lock is dropped here

        self.refresh_jwks().await?;

        let cache = self.jwks_cache.read().await;
        Ok(cache.as_ref().and_then(|c| c.keys.get(kid).cloned()))
    }

    async fn refresh_jwks(&self) -> Result<()> {
        tracing::info!(url = %self.jwks_uri, "Fetching JWKS");

        let response: JwksResponse = self
            .client
            .get(&self.jwks_uri)
            .send()
            .await
            .context("Failed to fetch JWKS")?
            .error_for_status()
            .context("JWKS endpoint returned an error status")?
            .json()
            .await
            .context("Failed to parse JWKS")?;

        let keys = decoding_keys(response)?;
        tracing::info!(key_count = keys.len(), "JWKS fetched successfully");

        let mut cache = self.jwks_cache.write().await;
        *cache = Some(JwksCache {
            keys,
            fetched_at: Instant::now(),
        });

        Ok(())
    }
}

fn decoding_keys(response: JwksResponse) -> Result<HashMap<String, DecodingKey>> {
    let mut keys = HashMap::new();
    for jwk in response.keys {
        if jwk.key_use.as_deref() == Some("enc") {
            continue;
        }
        let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
            tracing::debug!(kid = %jwk.kid, "Skipping non-RSA key");
            continue;
        };
        let key = DecodingKey::from_rsa_components(n, e)
            .with_context(|| format!("Failed to create decoding key for kid {}", jwk.kid))?;
        tracing::debug!(kid = %jwk.kid, "Added key to cache");
        keys.insert(jwk.kid, key);
    }
    if keys.is_empty() {
        anyhow::bail!("JWKS contains no RSA signing keys");
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_roles_from_realm_access() {
        let claims: Claims = serde_json::from_value(serde_json::json!({
            "sub": "user-1",
            "exp": 4102444800u64,
            "preferred_username": "alice",
            "realm_access": { "roles": ["team_member", "offline_access"] }
        }))
        .unwrap();

        assert_eq!(claims.roles(), vec!["team_member", "offline_access"]);
        assert!(claims.has_realm_access());
    }

    #[test]
    fn test_claims_without_realm_access() {
        let claims: Claims = serde_json::from_value(serde_json::json!({
            "sub": "user-1",
            "exp": 4102444800u64
        }))
        .unwrap();

        assert!(claims.roles().is_empty());
        assert!(!claims.has_realm_access());
        assert_eq!(claims.preferred_username, None);
    }

    #[test]
    fn test_decoding_keys_skips_encryption_and_non_rsa_keys() {
        let response: JwksResponse = serde_json::from_value(serde_json::json!({
            "keys": [
                { "kid": "sig-1", "kty": "RSA", "use": "sig", "n": "sXchDaQebHnPiGvyDOAT4saGEUetSyo9MKLOoWFsueri23bOdgWp4Dy1WlUzewbgBHod5pcM9H95GQRV3JDXboIRROSBigeC5yjU1hGzHHyXss8UDprecbAYxknTcQkhslANGRUZmdTOQ5qTRsLAt6BTYuyvVRdhS8exSZEy_c4gs_7svlJJQ4H9_NxsiIoLwAEk7-Q3UXERGYw_75IDrGA84-lA_-Ct4eTlXHBIY2EaV7t7LjJaynVJCpkv4LKjTTAumiGUIuQhrNhZLuF_RJLqHpM2kgWFLU7-VTdL1VbC2tejvcI2BlMkEpk1BzBZI0KQB0GaDWFLN-aEAw3vRw", "e": "AQAB" },
                { "kid": "enc-1", "kty": "RSA", "use": "enc", "n": "abc", "e": "AQAB" },
                { "kid": "hmac-1", "kty": "oct" }
            ]
        }))
        .unwrap();

        let keys = decoding_keys(response).unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys.contains_key("sig-1"));
    }

    #[test]
    fn test_only_access_tokens_expected_to_carry_roles() {
        assert!(TokenKind::Access.carries_realm_roles());
        assert!(!TokenKind::IdToken.carries_realm_roles());
    }

    #[test]
    fn test_decoding_keys_rejects_empty_set() {
        let response: JwksResponse =
            serde_json::from_value(serde_json::json!({ "keys": [] })).unwrap();
        assert!(decoding_keys(response).is_err());
    }
}
