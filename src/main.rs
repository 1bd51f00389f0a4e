use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tripwire::broker::{Broker, MockBroker, RestBroker};
use tripwire::config::{BrokerMode, Config};
use tripwire::services::SessionManager;
use tripwire::store::ConfigStore;
use tripwire::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tripwire=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env());
    info!("Starting Tripwire on {}:{}", config.host, config.port);

    let store = Arc::new(ConfigStore::new(
        &config.accounts_file,
        &config.credentials_file,
    ));

    let broker: Arc<dyn Broker> = match config.broker_mode {
        BrokerMode::Rest => {
            info!("Using REST broker at {}", config.broker_base_url);
            Arc::new(RestBroker::new(&config.broker_base_url))
        }
        BrokerMode::Mock => {
            info!("Using mock broker (dry run)");
            Arc::new(MockBroker::new())
        }
    };

    // Build the per-account controllers and bring up active accounts.
    let sessions = Arc::new(SessionManager::build(&config, store, broker)?);
    info!("Registered {} account(s)", sessions.account_count());
    sessions.auto_start().await;

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = AppState {
        config: config.clone(),
        sessions: sessions.clone(),
    };

    // Build the router
    let app = tripwire::api::router()
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start the server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Tripwire operator API listening on {}", addr);

    // Serve until interrupted, then stop sessions cleanly.
    let shutdown_sessions = sessions.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received; stopping sessions");
            shutdown_sessions.stop_all().await;
        })
        .await?;

    Ok(())
}
