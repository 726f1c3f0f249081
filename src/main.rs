mod config;
mod context;
mod entity;
mod generation;
mod session;
mod store;
mod ui;
mod utils;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = config::Config::load()?;

    let store = store::create_store(&config).await?;
    let generator = generation::create_generator(&config)?;
    let toasts = session::Toasts::default();
    let controller = session::SessionController::new(
        store,
        generator,
        toasts.clone(),
        config.context.history_limit,
    );

    if let Err(e) = controller.initialize().await {
        warn!("Failed to restore the last conversation: {}", e);
    }

    ui::Terminal::new(controller.clone(), toasts).run().await?;

    if controller.stop_generation().await {
        info!("Stopped pending generation on exit");
    }
    info!("Shutdown complete");

    Ok(())
}
