use axum::Router;
use boardsync::config::{self, Config};
use boardsync::docs::ApiDoc;
use boardsync::routes::api::create_api_routes;
use boardsync::services::auth_service;
use boardsync::store::{memory::MemoryStore, postgres::PgStore, DocumentStore};
use boardsync::AppState;
use std::panic;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "boardsync=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });
    config::init_config(config.clone());
    auth_service::init_identity_cache();

    // Pick the document store: Postgres when configured, in-memory otherwise
    let store: Arc<dyn DocumentStore> = match &config.db_url {
        Some(db_url) => match PgStore::connect(db_url).await {
            Ok(store) => {
                info!("Database store initialized successfully");
                Arc::new(store)
            }
            Err(e) => {
                error!("Failed to initialize database store: {}", e);
                warn!("Falling back to in-memory store; boards will not survive restarts");
                Arc::new(MemoryStore::new())
            }
        },
        None => {
            warn!("No database URL configured - using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let state = Arc::new(AppState::new(store, config.channel_capacity));

    // Sweep stale presence entries so crashed clients do not linger
    let presence_timeout = Duration::from_secs(config.presence_timeout_secs);
    let sweeper_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(presence_timeout / 2);
        loop {
            interval.tick().await;
            let evicted = sweeper_state.presence.evict_stale(presence_timeout).await;
            for (board_id, entry) in evicted {
                warn!(
                    "Evicted stale presence entry on board {}: user={}",
                    board_id, entry.user_id
                );
            }
        }
    });

    // Create API routes
    let api_routes = create_api_routes(state);

    // Combine all routes
    let app_routes = Router::new()
        // Mount API routes
        .nest("/api", api_routes)
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Add tracing layer
        .layer(TraceLayer::new_for_http());

    // Start the HTTP/API server
    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", config.server_address()));

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    axum::serve(listener, app_routes)
        .await
        .expect("Server failed to start");
}
