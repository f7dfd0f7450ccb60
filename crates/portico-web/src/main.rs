//! Portico gateway - binary entry point

use portico_core::GatewayConfig;
use portico_web::serve;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "portico_web=info,portico_adapters=info,portico_core=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::from_env();
    tracing::info!(
        "Starting portico gateway on http://localhost:{}",
        config.port
    );

    serve(config).await?;

    Ok(())
}
