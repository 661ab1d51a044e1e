use challenge_tracker_lib::config::ServerConfig;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    challenge_tracker_lib::run(config).await?;
    Ok(())
}
