use std::env;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct Config {
    // Environment configuration
    pub environment: Environment,

    // Server configuration
    pub server_host: String,
    pub server_port: u16,

    // Portal public URL (callback, silent check and post-logout redirects)
    pub portal_public_url: String,

    // Keycloak configuration
    pub keycloak_url: String,
    pub keycloak_realm: String,
    pub client_id: String,
    // None = public client (PKCE only)
    pub client_secret: Option<String>,
    // None = audience claim is not checked
    pub expected_audience: Option<String>,

    // HTTP client timeout configuration (in seconds)
    pub http_connect_timeout_secs: u64,
    pub http_request_timeout_secs: u64,

    // JWKS cache configuration (in seconds)
    pub jwks_cache_ttl_secs: u64,

    // Background token refresh
    pub token_refresh_interval_secs: u64,
    pub token_min_validity_secs: u64,
}

impl Config {
    /// Load configuration from environment variables using std::env::var
    pub fn load() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    ///
    /// `load` passes the process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| anyhow::anyhow!("{} environment variable is required", key))
        };
        let optional = |key: &str| lookup(key).filter(|s| !s.is_empty());
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(default)
        };

        // Parse environment type
        let environment = match lookup("ENVIRONMENT")
            .unwrap_or_else(|| "development".to_string())
            .to_lowercase()
            .as_str()
        {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        };

        // Normalize URLs by trimming trailing slashes to prevent double-slash issues
        let keycloak_url = required("KEYCLOAK_URL")?.trim_end_matches('/').to_string();
        let keycloak_realm = required("KEYCLOAK_REALM")?;
        let client_id = required("CLIENT_ID")?;
        let client_secret = optional("CLIENT_SECRET");
        let expected_audience = optional("EXPECTED_AUDIENCE");

        let portal_public_url = optional("PORTAL_PUBLIC_URL")
            .unwrap_or_else(|| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string();
        let public_url = url::Url::parse(&portal_public_url)
            .map_err(|e| anyhow::anyhow!("PORTAL_PUBLIC_URL is not a valid URL: {}", e))?;
        // Login state cookies are Secure in production and would never come back over http
        if environment == Environment::Production && public_url.scheme() != "https" {
            anyhow::bail!("PORTAL_PUBLIC_URL must use https in production");
        }
        url::Url::parse(&keycloak_url)
            .map_err(|e| anyhow::anyhow!("KEYCLOAK_URL is not a valid URL: {}", e))?;

        // One process holds one operator's session: loopback unless told otherwise
        let server_host = optional("SERVER_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let server_port = lookup("SERVER_PORT")
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(3000);

        let token_refresh_interval_secs = number("TOKEN_REFRESH_INTERVAL_SECS", 60);
        if token_refresh_interval_secs == 0 {
            anyhow::bail!("TOKEN_REFRESH_INTERVAL_SECS must be greater than zero");
        }

        Ok(Config {
            environment,
            server_host,
            server_port,
            portal_public_url,
            keycloak_url,
            keycloak_realm,
            client_id,
            client_secret,
            expected_audience,
            http_connect_timeout_secs: number("HTTP_CONNECT_TIMEOUT_SECS", 10),
            http_request_timeout_secs: number("HTTP_REQUEST_TIMEOUT_SECS", 30),
            jwks_cache_ttl_secs: number("JWKS_CACHE_TTL_SECS", 3600),
            token_refresh_interval_secs,
            token_min_validity_secs: number("TOKEN_MIN_VALIDITY_SECS", 70),
        })
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// OAuth2 redirect URI handled by `/auth/callback`
    pub fn redirect_uri(&self) -> String {
        format!("{}/auth/callback", self.portal_public_url)
    }

    /// Page used by the provider for the hidden silent-check negotiation
    pub fn silent_check_uri(&self) -> String {
        format!("{}/silent-check-sso.html", self.portal_public_url)
    }

    /// Where the provider sends the browser after end-session
    pub fn post_logout_redirect_uri(&self) -> String {
        format!("{}/", self.portal_public_url)
    }

    /// Refresh loop timing derived from the token settings
    pub fn refresh_settings(&self) -> crate::auth::session::RefreshSettings {
        crate::auth::session::RefreshSettings {
            interval: Duration::from_secs(self.token_refresh_interval_secs),
            min_validity_secs: self.token_min_validity_secs,
        }
    }

    /// Get cookie secure flag string
    pub fn cookie_secure_flag(&self) -> &str {
        if self.is_production() {
            "; Secure"
        } else {
            ""
        }
    }

    /// Get bind address for server
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![
            ("KEYCLOAK_URL", "http://localhost:8080/auth/"),
            ("KEYCLOAK_REALM", "task-app-realm"),
            ("CLIENT_ID", "taskboard-web"),
        ]
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_lookup(lookup_from(&minimal())).unwrap();

        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.keycloak_url, "http://localhost:8080/auth");
        assert_eq!(config.portal_public_url, "http://localhost:3000");
        assert_eq!(config.client_secret, None);
        assert_eq!(config.token_refresh_interval_secs, 60);
        assert_eq!(config.token_min_validity_secs, 70);
        assert_eq!(config.bind_address(), "127.0.0.1:3000");
        assert_eq!(config.cookie_secure_flag(), "");
    }

    #[test]
    fn test_missing_required_variable() {
        let pairs = vec![
            ("KEYCLOAK_URL", "http://localhost:8080"),
            ("CLIENT_ID", "taskboard-web"),
        ];
        let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("KEYCLOAK_REALM"));
    }

    #[test]
    fn test_empty_client_secret_means_public_client() {
        let mut pairs = minimal();
        pairs.push(("CLIENT_SECRET", ""));
        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.client_secret, None);
    }

    #[test]
    fn test_derived_uris() {
        let mut pairs = minimal();
        pairs.push(("PORTAL_PUBLIC_URL", "https://tasks.example.com/"));
        pairs.push(("ENVIRONMENT", "prod"));
        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();

        assert!(config.is_production());
        assert_eq!(config.cookie_secure_flag(), "; Secure");
        assert_eq!(config.redirect_uri(), "https://tasks.example.com/auth/callback");
        assert_eq!(
            config.silent_check_uri(),
            "https://tasks.example.com/silent-check-sso.html"
        );
        assert_eq!(config.post_logout_redirect_uri(), "https://tasks.example.com/");
    }

    #[test]
    fn test_production_requires_https_public_url() {
        let mut pairs = minimal();
        pairs.push(("ENVIRONMENT", "production"));
        pairs.push(("PORTAL_PUBLIC_URL", "http://tasks.example.com"));
        let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("https"));
    }

    #[test]
    fn test_server_host_override() {
        let mut pairs = minimal();
        pairs.push(("SERVER_HOST", "0.0.0.0"));
        pairs.push(("SERVER_PORT", "8081"));
        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:8081");
    }

    #[test]
    fn test_zero_refresh_interval_rejected() {
        let mut pairs = minimal();
        pairs.push(("TOKEN_REFRESH_INTERVAL_SECS", "0"));
        assert!(Config::from_lookup(lookup_from(&pairs)).is_err());
    }

    #[test]
    fn test_invalid_portal_url_rejected() {
        let mut pairs = minimal();
        pairs.push(("PORTAL_PUBLIC_URL", "not a url"));
        assert!(Config::from_lookup(lookup_from(&pairs)).is_err());
    }
}
