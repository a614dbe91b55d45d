use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use dealroom_chat::config::{generate_config_template, Config};
use dealroom_chat::{auth, db, routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dealroom_chat=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    tracing::info!("Dealroom chat v{} starting", env!("CARGO_PKG_VERSION"));

    let db = db::init_db(&config.data_dir)?;

    // Shared with the identity collaborator that signs caller tokens
    let identity_secret = auth::jwt::load_or_generate_identity_secret(&config.data_dir)?;

    let settings = config.chat_settings();
    tracing::info!(
        typing_quiet_ms = settings.typing_quiet.as_millis() as u64,
        heartbeat_interval_secs = settings.heartbeat_interval.as_secs(),
        heartbeat_timeout_secs = settings.heartbeat_timeout.as_secs(),
        notify_token = settings.notify_token.is_some(),
        "Chat settings"
    );

    let app_state = state::AppState::new(db, identity_secret, settings);
    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
