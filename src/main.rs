use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use smpplink::bootstrap::Server;
use smpplink::config::Config;
use smpplink::telemetry::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "smpplink")]
#[command(author, version, about = "SMPP session daemon")]
struct Args {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Validate config and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;

    init_tracing(&config.log)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "configuration loaded"
    );

    if args.validate {
        info!("configuration is valid");
        return Ok(());
    }

    let server = Server::new(config);
    server.run().await?;

    Ok(())
}
