mod setup;

use assetflow_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Load configuration
    let config = Config::from_env()?;

    // Wire stores, storage, services and workers
    let app = crate::setup::initialize_app(config).await?;

    crate::setup::shutdown::wait_for_signal().await;
    app.shutdown().await;

    Ok(())
}
