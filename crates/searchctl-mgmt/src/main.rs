use std::process;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use searchctl_mgmt::cli::Cli;

/// sysexits EX_UNAVAILABLE: the cluster or its service manager did not
/// cooperate.
const EX_UNAVAILABLE: i32 = 69;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Err(e) = cli.run().await {
        tracing::error!("{:#}", e);
        process::exit(EX_UNAVAILABLE);
    }
}
