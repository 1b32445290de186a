//! Session lifecycle
//!
//! [`SessionManager`] is the single writer of the current [`Session`]. It owns
//! the credential material (refresh token, id token), the pending
//! authorization requests, and the background refresh task. Readers (the
//! navigation guard, views) take cheap snapshots through a watch channel.
//!
//! ## Lifecycle
//!
//! 1. `initialize` runs the silent check; an authenticated result starts the
//!    refresh loop
//! 2. `login` / `complete_login` run the authorization-code flow
//! 3. the refresh loop calls `refresh(min_validity)` every interval and logs
//!    out on the first failure
//! 4. `logout` cancels the loop, clears the session and yields the
//!    provider's end-session URL

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::error::{InitError, LoginError, RefreshError};
use super::provider::{AuthorizationMode, IdentityProvider, TokenSet};

/// Pending logins older than this are dropped
const PENDING_LOGIN_TTL: Duration = Duration::from_secs(600);

/// Above this many pending logins the oldest is evicted
const MAX_PENDING_LOGINS: usize = 256;

// =============================================================================
// Session
// =============================================================================

/// Client-side record of the current authentication state
///
/// An unauthenticated session never carries a token or claims; the only
/// constructors are [`Session::unauthenticated`] and [`Session::from_tokens`].
#[derive(Clone, Default, PartialEq)]
pub struct Session {
    authenticated: bool,
    access_token: Option<String>,
    roles: BTreeSet<String>,
    expires_at: Option<u64>,
    subject: Option<String>,
    username: Option<String>,
    email: Option<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("authenticated", &self.authenticated)
            .field("has_access_token", &self.access_token.is_some())
            .field("roles", &self.roles)
            .field("expires_at", &self.expires_at)
            .field("subject", &self.subject)
            .finish()
    }
}

impl Session {
    pub fn unauthenticated() -> Self {
        Self::default()
    }

    pub fn from_tokens(tokens: &TokenSet) -> Self {
        Self {
            authenticated: true,
            access_token: Some(tokens.access_token.clone()),
            roles: tokens.claims.roles().into_iter().collect(),
            expires_at: Some(tokens.claims.exp),
            subject: Some(tokens.claims.sub.clone()),
            username: tokens.claims.preferred_username.clone(),
            email: tokens.claims.email.clone(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Realm role check; always false when unauthenticated
    pub fn has_role(&self, role: &str) -> bool {
        self.authenticated && self.roles.contains(role)
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(String::as_str)
    }

    /// Access token expiry (unix seconds)
    pub fn expires_at(&self) -> Option<u64> {
        self.expires_at
    }

    /// Seconds the access token stays valid after `now` (negative once expired)
    pub fn remaining_validity_secs(&self, now: SystemTime) -> Option<i64> {
        let now = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        self.expires_at.map(|exp| exp as i64 - now)
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Preferred username, falling back to the subject
    pub fn display_name(&self) -> Option<&str> {
        self.username.as_deref().or(self.subject.as_deref())
    }
}

// =============================================================================
// Manager types
// =============================================================================

/// Background refresh timing
#[derive(Debug, Clone, Copy)]
pub struct RefreshSettings {
    pub interval: Duration,
    pub min_validity_secs: u64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            min_validity_secs: 70,
        }
    }
}

/// Where to send the browser to start a login
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    pub url: url::Url,
    /// OAuth `state` the callback must carry
    pub state: String,
}

/// Result of a successful authorization-code callback
#[derive(Debug, Clone)]
pub struct CompletedLogin {
    pub session: Session,
    pub return_path: String,
    pub mode: AuthorizationMode,
}

/// Where to send the browser after logout
#[derive(Debug, Clone)]
pub struct LogoutRedirect {
    /// Provider end-session URL, or `/` when the provider could not be reached
    pub target: String,
    pub was_authenticated: bool,
}

#[derive(Clone)]
struct Credentials {
    refresh_token: Option<String>,
    id_token: Option<String>,
    /// Bumped on every established login; refresh keeps it
    generation: u64,
}

impl Credentials {
    fn from_tokens(tokens: &TokenSet, generation: u64) -> Self {
        Self {
            refresh_token: tokens.refresh_token.clone(),
            id_token: tokens.id_token.clone(),
            generation,
        }
    }

    /// Providers may omit tokens on refresh; keep the previous ones then
    fn renewed(&self, tokens: &TokenSet) -> Self {
        Self {
            refresh_token: tokens
                .refresh_token
                .clone()
                .or_else(|| self.refresh_token.clone()),
            id_token: tokens.id_token.clone().or_else(|| self.id_token.clone()),
            generation: self.generation,
        }
    }
}

struct PendingLogin {
    return_path: String,
    pkce_verifier: String,
    redirect_uri: String,
    mode: AuthorizationMode,
    created_at: Instant,
}

/// Only same-origin absolute paths are accepted as post-login targets
pub fn sanitize_return_path(path: &str) -> String {
    let acceptable = path.starts_with('/')
        && !path.starts_with("//")
        && !path.contains('\\')
        && !path.chars().any(char::is_control);
    if acceptable {
        path.to_string()
    } else {
        tracing::warn!(return_path = %path, "Rejected return path, using /");
        "/".to_string()
    }
}

// =============================================================================
// SessionManager
// =============================================================================

pub struct SessionManager {
    provider: Arc<dyn IdentityProvider>,
    settings: RefreshSettings,
    session: watch::Sender<Session>,
    // Serializes refresh / login completion / logout
    credentials: Mutex<Option<Credentials>>,
    pending: Mutex<HashMap<String, PendingLogin>>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
    generations: AtomicU64,
}

impl SessionManager {
    pub fn new(provider: Arc<dyn IdentityProvider>, settings: RefreshSettings) -> Arc<Self> {
        let (session, _) = watch::channel(Session::unauthenticated());
        Arc::new(Self {
            provider,
            settings,
            session,
            credentials: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            refresh_task: Mutex::new(None),
            generations: AtomicU64::new(0),
        })
    }

    /// Snapshot of the current session
    pub fn session(&self) -> Session {
        self.session.borrow().clone()
    }

    /// Receiver notified on every session change
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.session.borrow().has_role(role)
    }

    /// Silent session check against the provider
    ///
    /// Never redirects. On failure the session stays unauthenticated.
    pub async fn initialize(self: &Arc<Self>) -> Result<Session, InitError> {
        tracing::info!(event = "session_init_start", "Checking for an existing session");

        match self.provider.check_sso().await {
            Ok(Some(tokens)) => {
                let session = self.establish(tokens).await;
                tracing::info!(
                    event = "session_init_authenticated",
                    subject = ?session.subject(),
                    "User is authenticated"
                );
                Ok(session)
            }
            Ok(None) => {
                tracing::info!(event = "session_init_anonymous", "User is not authenticated");
                Ok(self.session())
            }
            Err(e) => {
                tracing::error!(
                    event = "session_init_failed",
                    error = %e,
                    "Session initialization failed, continuing unauthenticated"
                );
                Err(e.into())
            }
        }
    }

    /// Start an interactive login that returns to `return_path` afterwards
    pub async fn login(&self, return_path: &str) -> Result<LoginRedirect, LoginError> {
        self.begin_authorization(AuthorizationMode::Interactive, return_path)
            .await
    }

    /// Start a hidden `prompt=none` negotiation answered on the silent check page
    pub async fn silent_login(&self) -> Result<LoginRedirect, LoginError> {
        self.begin_authorization(AuthorizationMode::Silent, "/")
            .await
    }

    async fn begin_authorization(
        &self,
        mode: AuthorizationMode,
        return_path: &str,
    ) -> Result<LoginRedirect, LoginError> {
        let return_path = sanitize_return_path(return_path);
        let request = self.provider.authorization_request(mode).await?;

        let mut pending = self.pending.lock().await;
        pending.retain(|_, p| p.created_at.elapsed() < PENDING_LOGIN_TTL);
        while pending.len() >= MAX_PENDING_LOGINS {
            let Some(oldest) = pending
                .iter()
                .min_by_key(|(_, p)| p.created_at)
                .map(|(state, _)| state.clone())
            else {
                break;
            };
            pending.remove(&oldest);
            tracing::warn!(
                event = "login_pending_evicted",
                limit = MAX_PENDING_LOGINS,
                "Too many pending logins, dropped the oldest"
            );
        }
        pending.insert(
            request.state.clone(),
            PendingLogin {
                return_path: return_path.clone(),
                pkce_verifier: request.pkce_verifier,
                redirect_uri: request.redirect_uri,
                mode,
                created_at: Instant::now(),
            },
        );

        tracing::info!(
            event = "login_redirect",
            mode = ?mode,
            return_path = %return_path,
            pending_logins = pending.len(),
            "Redirecting to identity provider"
        );

        Ok(LoginRedirect {
            url: request.url,
            state: request.state,
        })
    }

    async fn take_pending(&self, state: &str) -> Option<PendingLogin> {
        let mut pending = self.pending.lock().await;
        pending
            .remove(state)
            .filter(|p| p.created_at.elapsed() < PENDING_LOGIN_TTL)
    }

    /// Finish the authorization-code flow started by `login`/`silent_login`
    pub async fn complete_login(
        self: &Arc<Self>,
        code: &str,
        state: &str,
    ) -> Result<CompletedLogin, LoginError> {
        let Some(pending) = self.take_pending(state).await else {
            tracing::warn!(event = "login_unknown_state", "Callback state matches no pending login");
            return Err(LoginError::UnknownState);
        };

        let tokens = self
            .provider
            .exchange_code(code, &pending.pkce_verifier, &pending.redirect_uri)
            .await
            .map_err(|e| {
                tracing::error!(event = "login_exchange_failed", error = %e, "Code exchange failed");
                LoginError::from(e)
            })?;

        let session = self.establish(tokens).await;
        tracing::info!(
            event = "login_complete",
            mode = ?pending.mode,
            subject = ?session.subject(),
            "Authentication successful"
        );

        Ok(CompletedLogin {
            session,
            return_path: pending.return_path,
            mode: pending.mode,
        })
    }

    /// Drop the pending login for a callback that carried an OAuth error
    pub async fn abandon_login(
        &self,
        state: Option<&str>,
        error: &str,
        description: Option<&str>,
    ) -> LoginError {
        let mode = match state {
            Some(state) => self.take_pending(state).await.map(|p| p.mode),
            None => None,
        };
        // login_required is the normal answer to a silent check without a provider session
        if mode == Some(AuthorizationMode::Silent) && error == "login_required" {
            tracing::info!(event = "silent_check_no_session", "No provider session");
        } else {
            tracing::warn!(
                event = "login_failed",
                error = %error,
                description = ?description,
                "OAuth authorization failed"
            );
        }
        LoginError::Authorization {
            error: error.to_string(),
            description: description.map(str::to_string),
        }
    }

    /// Renew the access token if it expires within `min_validity_secs`
    ///
    /// Returns the unchanged session when the token is still valid long enough.
    /// Concurrent calls queue; a queued call sees the renewed token and is a no-op.
    pub async fn refresh(&self, min_validity_secs: u64) -> Result<Session, RefreshError> {
        let mut credentials = self.credentials.lock().await;
        let Some(current) = credentials.clone() else {
            return Err(RefreshError::NotAuthenticated);
        };

        let session = self.session();
        let remaining = session
            .remaining_validity_secs(SystemTime::now())
            .unwrap_or(i64::MIN);
        if remaining > min_validity_secs as i64 {
            tracing::debug!(remaining_secs = remaining, "Token still valid, not refreshed");
            return Ok(session);
        }

        let Some(refresh_token) = current.refresh_token.as_deref() else {
            return Err(RefreshError::Rejected("no refresh token held".to_string()));
        };

        let tokens = self.provider.refresh(refresh_token).await.map_err(|e| {
            tracing::warn!(event = "token_refresh_failed", error = %e, "Failed to refresh token");
            RefreshError::from(e)
        })?;

        let refreshed = Session::from_tokens(&tokens);
        *credentials = Some(current.renewed(&tokens));
        self.session.send_replace(refreshed.clone());

        tracing::info!(
            event = "token_refreshed",
            expires_at = ?refreshed.expires_at(),
            "Token refreshed"
        );
        Ok(refreshed)
    }

    /// Clear the session and return the provider's end-session URL
    pub async fn logout(&self) -> LogoutRedirect {
        self.teardown().await
    }

    /// Whether a refresh loop is currently scheduled
    pub async fn is_refresh_scheduled(&self) -> bool {
        self.refresh_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    async fn establish(self: &Arc<Self>, tokens: TokenSet) -> Session {
        let session = Session::from_tokens(&tokens);
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut credentials = self.credentials.lock().await;
            *credentials = Some(Credentials::from_tokens(&tokens, generation));
            self.session.send_replace(session.clone());
        }
        self.schedule_refresh(generation).await;
        session
    }

    /// Logout requested by the user: cancel the refresh loop and clear everything
    async fn teardown(&self) -> LogoutRedirect {
        if let Some(task) = self.refresh_task.lock().await.take() {
            task.abort();
        }

        let credentials = {
            let mut credentials = self.credentials.lock().await;
            let taken = credentials.take();
            self.session.send_replace(Session::unauthenticated());
            taken
        };
        self.end_session(credentials).await
    }

    /// Logout forced by the refresh loop of login `generation`
    ///
    /// Does nothing when a newer login replaced that session in the meantime.
    async fn expire(&self, generation: u64) -> Option<LogoutRedirect> {
        let credentials = {
            let mut credentials = self.credentials.lock().await;
            if credentials.as_ref().map(|c| c.generation) != Some(generation) {
                tracing::debug!(
                    generation = generation,
                    "Session replaced before expiry, keeping it"
                );
                return None;
            }
            let taken = credentials.take();
            self.session.send_replace(Session::unauthenticated());
            taken
        };

        // Only release the handle if it is still this loop's own
        let mut refresh_task = self.refresh_task.lock().await;
        let own_task = match (refresh_task.as_ref(), tokio::task::try_id()) {
            (Some(task), Some(current)) => task.id() == current,
            _ => false,
        };
        if own_task {
            refresh_task.take();
        }
        drop(refresh_task);

        Some(self.end_session(credentials).await)
    }

    async fn end_session(&self, credentials: Option<Credentials>) -> LogoutRedirect {
        let was_authenticated = credentials.is_some();
        let id_token = credentials.and_then(|c| c.id_token);

        let target = match self.provider.logout_url(id_token.as_deref()).await {
            Ok(url) => url.to_string(),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Could not build end-session URL, returning to landing page"
                );
                "/".to_string()
            }
        };

        tracing::info!(
            event = "session_cleared",
            was_authenticated = was_authenticated,
            has_id_token = id_token.is_some(),
            "Session cleared"
        );

        LogoutRedirect {
            target,
            was_authenticated,
        }
    }

    async fn schedule_refresh(self: &Arc<Self>, generation: u64) {
        let manager = Arc::downgrade(self);
        let RefreshSettings {
            interval,
            min_validity_secs,
        } = self.settings;

        let task = tokio::spawn(async move {
            // First check one full interval after login
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if !manager.session().is_authenticated() {
                    break;
                }
                if let Err(e) = manager.refresh(min_validity_secs).await {
                    tracing::error!(
                        event = "refresh_loop_logout",
                        error = %e,
                        "Session no longer renewable, logging out"
                    );
                    manager.expire(generation).await;
                    break;
                }
            }
        });

        if let Some(previous) = self.refresh_task.lock().await.replace(task) {
            previous.abort();
        }
        tracing::debug!(
            interval_secs = interval.as_secs(),
            min_validity_secs = min_validity_secs,
            generation = generation,
            "Token refresh scheduled"
        );
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(task) = self.refresh_task.get_mut().take() {
            task.abort();
        }
    }
}
