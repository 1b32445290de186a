//! "Initialization settled" flag for the UI layer
//!
//! Navigation must not be decided while the startup silent check is still
//! running. This flag is the only readiness signal; it is not inferred from
//! the session.

use std::sync::Arc;

use tokio::sync::watch;

use crate::auth::SessionManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitState {
    /// Silent check still running
    Pending,
    /// Silent check finished
    Ready { authenticated: bool },
    /// Provider unreachable or misconfigured; serving unauthenticated
    Degraded { reason: String },
}

impl InitState {
    pub fn is_settled(&self) -> bool {
        !matches!(self, InitState::Pending)
    }
}

#[derive(Clone)]
pub struct Readiness {
    state: Arc<watch::Sender<InitState>>,
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

impl Readiness {
    pub fn new() -> Self {
        let (state, _) = watch::channel(InitState::Pending);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> InitState {
        self.state.borrow().clone()
    }

    pub fn is_settled(&self) -> bool {
        self.state.borrow().is_settled()
    }

    pub fn subscribe(&self) -> watch::Receiver<InitState> {
        self.state.subscribe()
    }

    fn settle(&self, state: InitState) {
        self.state.send_replace(state);
    }

    /// A later provider call succeeded: leave `Degraded` for `Ready`
    ///
    /// Pending and Ready are left alone. Returns whether the state changed.
    pub fn provider_reachable(&self, authenticated: bool) -> bool {
        let recovered = self.state.send_if_modified(|state| {
            if matches!(state, InitState::Degraded { .. }) {
                *state = InitState::Ready { authenticated };
                true
            } else {
                false
            }
        });
        if recovered {
            tracing::info!(
                event = "init_recovered",
                authenticated = authenticated,
                "Identity provider reachable again"
            );
        }
        recovered
    }
}

/// Run the startup silent check and settle `readiness` with its outcome
pub async fn initialize_session(manager: &Arc<SessionManager>, readiness: &Readiness) -> InitState {
    let state = match manager.initialize().await {
        Ok(session) => InitState::Ready {
            authenticated: session.is_authenticated(),
        },
        Err(e) => InitState::Degraded {
            reason: e.to_string(),
        },
    };

    tracing::info!(event = "init_settled", state = ?state, "Session initialization settled");
    readiness.settle(state.clone());
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::error::ProviderError;
    use crate::auth::provider::fake::{token_set, FakeProvider};
    use crate::auth::RefreshSettings;

    #[test]
    fn test_starts_pending() {
        let readiness = Readiness::new();
        assert_eq!(readiness.state(), InitState::Pending);
        assert!(!readiness.is_settled());
    }

    #[tokio::test]
    async fn test_settles_ready_after_silent_check() {
        let provider = Arc::new(
            FakeProvider::new().with_sso(Ok(Some(token_set(&["team_member"], 300)))),
        );
        let manager = SessionManager::new(provider, RefreshSettings::default());
        let readiness = Readiness::new();

        let state = initialize_session(&manager, &readiness).await;

        assert_eq!(state, InitState::Ready { authenticated: true });
        assert!(readiness.is_settled());
    }

    #[tokio::test]
    async fn test_settles_degraded_when_provider_down() {
        let provider = Arc::new(
            FakeProvider::new().with_sso(Err(ProviderError::Unreachable("timeout".into()))),
        );
        let manager = SessionManager::new(provider, RefreshSettings::default());
        let readiness = Readiness::new();
        let mut rx = readiness.subscribe();

        initialize_session(&manager, &readiness).await;

        rx.changed().await.unwrap();
        assert!(matches!(&*rx.borrow(), InitState::Degraded { .. }));
        assert!(readiness.is_settled());
        assert!(!manager.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_degraded_recovers_once_provider_answers() {
        let provider = Arc::new(
            FakeProvider::new().with_sso(Err(ProviderError::Unreachable("timeout".into()))),
        );
        let manager = SessionManager::new(provider, RefreshSettings::default());
        let readiness = Readiness::new();
        initialize_session(&manager, &readiness).await;

        assert!(readiness.provider_reachable(true));
        assert_eq!(readiness.state(), InitState::Ready { authenticated: true });

        // Already ready: nothing to do
        assert!(!readiness.provider_reachable(false));
        assert_eq!(readiness.state(), InitState::Ready { authenticated: true });
    }

    #[test]
    fn test_pending_not_settled_by_provider_call() {
        let readiness = Readiness::new();
        assert!(!readiness.provider_reachable(false));
        assert_eq!(readiness.state(), InitState::Pending);
    }
}
