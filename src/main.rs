mod app;
mod auth;
mod config;
mod db;
mod generate;
mod mailer;
mod outreach;
mod profile;
mod state;

use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "coldreach=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = AppState::init().await?;
    tracing::info!(
        invite_only = app_state.auth.invite_only(),
        invite_required_for_login = app_state.auth.invite_required_for_login(),
        "auth policy loaded"
    );

    let app = app::build_app(app_state);
    app::serve(app).await
}
