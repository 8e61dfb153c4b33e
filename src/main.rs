use anyhow::Context;
use tracing_subscriber::EnvFilter;
use wayfarer_agent::{AgentCore, ChannelConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter)
        .init();

    let config = ChannelConfig::from_env().context("loading channel configuration")?;
    let mut agent = AgentCore::new(config)?;

    let stop = agent.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            stop.stop();
        }
    });

    agent.run().await?;
    Ok(())
}
