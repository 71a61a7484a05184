use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use ed_screening::config::{Config, Surface};
use ed_screening::service::ScreeningService;
use ed_screening::{terminal, web};

#[tokio::main]
async fn main() -> Result<()> {
    // stderr keeps the terminal surface's stdout clean
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Arc::new(Config::load());
    let service = Arc::new(ScreeningService::new(config.clone())?);

    match config.server.surface {
        Surface::Http => {
            let bind = config.bind_addr()?;
            let state = web::AppState::new(service)?;
            let router = web::router(state);

            let listener = tokio::net::TcpListener::bind(bind).await?;
            tracing::info!(
                %bind,
                model = %config.backend.model_id,
                "Starting screening form server"
            );

            axum::serve(listener, router).await?;
            Ok(())
        }
        Surface::Terminal => {
            tracing::info!("Starting screening on terminal");
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            terminal::run(&service, stdin, tokio::io::stdout()).await?;
            Ok(())
        }
    }
}
