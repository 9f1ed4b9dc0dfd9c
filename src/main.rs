use std::sync::Arc;

use clinic_reminders::{config::Config, db, models::AppState, routes, sms::SmsGateway};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url, cfg.db_max_connections).await?;

    if cfg.cron_secret_token.is_empty() {
        tracing::warn!("CRON_SECRET_TOKEN not set, reminder trigger endpoint is disabled");
    }
    if !cfg.sms.has_credentials() {
        tracing::warn!("Africa's Talking credentials not set, reminders will be logged as failed");
    }

    let state = AppState {
        db: pool,
        gateway: Arc::new(SmsGateway::new(cfg.sms.clone())),
        reminders: cfg.reminders.clone(),
        cron_secret_token: Arc::from(cfg.cron_secret_token.as_str()),
        run_guard: Arc::new(tokio::sync::Mutex::new(())),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
