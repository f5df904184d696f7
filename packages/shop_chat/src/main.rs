use anyhow::{Context, Result};
use axum::{
    Router,
    extract::FromRef,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod auth;
mod chat;
mod config;
mod db;
mod error;
mod handlers;
mod metrics;
mod models;
mod notify;
mod onboarding;
mod repository;

#[cfg(test)]
mod end_to_end;
#[cfg(test)]
mod test_helpers;

use crate::chat::{ChatContext, DeliveryRouter, Hub};
use crate::config::{
    AuthConfig, ChatConfig, FileConfig, NotificationConfig, ShopChatConfig, load_config,
};
use crate::db::Database;
use crate::metrics::ServerMetrics;
use crate::repository::ChatRepository;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri().path(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "shop-chat")]
#[command(about = "Real-time support chat between shoppers and the store administrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.shopchat)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chat server in the foreground
    Server(ServerArgs),

    /// Print a bearer token for an existing user
    Token(TokenArgs),
}

#[derive(Parser)]
struct ServerArgs {
    /// Port for the web server (overrides config.toml)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides config.toml)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Parser)]
struct TokenArgs {
    /// Numeric user id
    user_id: i64,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub db: Arc<Database>,
    pub repository: Arc<ChatRepository>,
    /// Hub, router and pump settings shared by every chat connection
    pub chat: ChatContext,
    /// Authentication configuration
    pub auth_config: Arc<AuthConfig>,
    /// Server metrics for observability
    pub metrics: Arc<ServerMetrics>,
}

impl FromRef<AppState> for Arc<AuthConfig> {
    fn from_ref(state: &AppState) -> Self {
        state.auth_config.clone()
    }
}

/// Wire the chat core to its collaborators.
pub(crate) fn build_state(
    db: Arc<Database>,
    repository: Arc<ChatRepository>,
    notifier: Arc<dyn notify::Notifier>,
    chat_config: ChatConfig,
    auth_config: AuthConfig,
    title_prefix: &str,
) -> AppState {
    let metrics = Arc::new(ServerMetrics::new());
    let hub = Hub::spawn();
    let router = DeliveryRouter::new(
        repository.clone(),
        notifier,
        hub.clone(),
        title_prefix,
        metrics.clone(),
    );

    AppState {
        db,
        repository,
        chat: ChatContext {
            hub,
            router: Arc::new(router),
            config: Arc::new(chat_config),
            metrics: metrics.clone(),
        },
        auth_config: Arc::new(auth_config),
        metrics,
    }
}

pub(crate) fn build_app(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .chat
        .config
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring unparsable allowed origin: {}", o);
                None
            }
        })
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        // Chat routes
        .route("/api/v1/ws", get(handlers::websocket_handler))
        .route("/api/v1/chat/history", get(handlers::chat_history))
        .route("/api/v1/fcm/token", post(handlers::update_fcm_token))
        .route("/api/v1/admin-info", get(handlers::admin_info))
        // Health endpoints
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ShopChatConfig::new(cli.data_dir.clone())?;
    let file_config: FileConfig = load_config(&config.data_dir)
        .extract()
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Server(args) => run_server(args, config, file_config).await,
        Commands::Token(args) => print_token(args, config, file_config).await,
    }
}

async fn run_server(args: ServerArgs, config: ShopChatConfig, file_config: FileConfig) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "shop_chat=debug,tower_http=debug,info"
    } else {
        "shop_chat=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting shop chat server");
    info!("Data directory: {}", config.data_dir.display());

    // Initialize database
    let db = Arc::new(Database::new(&config).await?);
    let repository = Arc::new(ChatRepository::new(db.pool.clone()));

    // First-run onboarding
    onboarding::seed_admin(&repository, &file_config.admin).await?;

    let auth_config = AuthConfig::resolve(&file_config.auth, &config.data_dir)?;
    let chat_config = ChatConfig::from_file(&file_config.chat);
    let notification_config = NotificationConfig::resolve(&file_config.notifications)?;
    let notifier = notify::from_config(&notification_config)
        .context("Failed to initialize push notifications")?;

    info!(
        "Chat config: queue={} max_message={}B pong_wait={}s ping_period={}s write_wait={}s",
        chat_config.send_queue_capacity,
        chat_config.max_message_bytes,
        chat_config.pong_wait.as_secs(),
        chat_config.ping_period.as_secs(),
        chat_config.write_wait.as_secs()
    );
    info!("Allowed origins: {:?}", chat_config.allowed_origins);

    let app_state = build_state(
        db,
        repository,
        notifier,
        chat_config,
        auth_config,
        &notification_config.title_prefix,
    );
    let app = build_app(app_state);

    let host = args
        .host
        .or(file_config.server.host)
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let port = args.port.or(file_config.server.port).unwrap_or(8080);
    let addr = format!("{}:{}", host, port).parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("Shop chat listening on http://{}", actual_addr);
    info!("API endpoints:");
    info!("  GET    /api/v1/ws            - Chat WebSocket");
    info!("  GET    /api/v1/chat/history  - Conversation with the administrator");
    info!("  POST   /api/v1/fcm/token     - Register a push notification token");
    info!("  GET    /api/v1/admin-info    - Administrator id and name");

    // Create shutdown signal handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received shutdown signal, cleaning up...");
    };

    // Run server with graceful shutdown
    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    info!("Shutdown complete");
    server_result
}

async fn print_token(args: TokenArgs, config: ShopChatConfig, file_config: FileConfig) -> Result<()> {
    let db = Database::new(&config).await?;
    let repository = ChatRepository::new(db.pool.clone());
    let user = repository
        .get_user(args.user_id)
        .await?
        .with_context(|| format!("No user with id {}", args.user_id))?;

    let auth_config = AuthConfig::resolve(&file_config.auth, &config.data_dir)?;
    let token = auth::issue_token(&auth_config.jwt_secret, &user, auth_config.token_ttl_secs)
        .context("Failed to sign token")?;
    println!("{}", token);
    Ok(())
}
