//! Runs the Peril broker with the standard exchanges.
//!
//! Listens on the host and port of `PERIL_BROKER_URL` and accepts the
//! credentials it carries.

use anyhow::Context;
use peril::{BrokerUrl, PerilConfig, logging, topology};
use peril_broker::{BrokerServerBuilder, StaticCredentials};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init("info");
    let config = PerilConfig::from_env()?;
    let url = BrokerUrl::parse(&config.broker_url)?;

    let server = BrokerServerBuilder::new()
        .bind(url.socket_address())
        .config(topology::broker_config())
        .build(StaticCredentials::single(&url.username, &url.password))
        .await
        .with_context(|| format!("failed to bind {}", url.socket_address()))?;

    tracing::info!(addr = %server.local_addr()?, "peril broker listening");

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }
    Ok(())
}
