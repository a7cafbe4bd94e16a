//! Gateway binary

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use idk_gateway::config::GatewayConfig;
use idk_gateway::server::AppState;
use idk_gateway::storage::MemoryStorage;

#[derive(Parser)]
#[command(name = "gateway", version, about = "AI provider gateway with adaptive optimization")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "IDK_GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = GatewayConfig::load(args.config.as_deref())?;
    idk_gateway::utils::logging::init(&config.logging.level, config.logging.json);

    let state = AppState::new(config, Arc::new(MemoryStorage::new()))?;
    idk_gateway::server::run(state).await?;
    Ok(())
}
