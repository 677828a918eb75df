use tracing_subscriber::EnvFilter;

use relaychat_server::config::ServerConfig;
use relaychat_server::server::RelayServer;
use relaychat_server::shutdown::shutdown_signal;
use relaychat_server::state::RelayState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = ServerConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    // The relay keypair lives for the process only; clients re-register after a restart.
    let keys = relaychat_crypto::generate_asymmetric_keypair();
    tracing::info!(public_key = %keys.public_key().to_base64(), "relay keypair generated");

    let state = RelayState::new(config, keys);
    let server = RelayServer::bind(state).await?;
    server.run(shutdown_signal()).await?;

    Ok(())
}
