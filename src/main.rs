use anyhow::Result;
use std::sync::Arc;
use taskboard_portal::{
    auth::{KeycloakProvider, SessionManager},
    readiness::{self, Readiness},
    web, AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting taskboard portal");

    // Load configuration from environment
    let config = taskboard_portal::config::Config::load()?;
    tracing::info!(
        environment = ?config.environment,
        keycloak_realm = %config.keycloak_realm,
        client_id = %config.client_id,
        public_client = config.client_secret.is_none(),
        "Configuration loaded"
    );

    let provider = Arc::new(KeycloakProvider::from_config(&config)?);
    let session = SessionManager::new(provider, config.refresh_settings());
    let readiness = Readiness::new();

    // Serve immediately; page navigation waits on the silent check via the readiness flag
    tokio::spawn({
        let session = session.clone();
        let readiness = readiness.clone();
        async move {
            readiness::initialize_session(&session, &readiness).await;
        }
    });

    let bind_address = config.bind_address();
    let state = Arc::new(AppState {
        session,
        readiness,
        routes: Arc::new(web::route_table()),
        config: Arc::new(config),
    });

    let app = web::create_router(state);

    // Bind and serve
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("Portal listening on {}", bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
