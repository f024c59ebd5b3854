use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use searchctl_client::ClusterClient;

use crate::config::MgmtConfig;
use crate::exclusion::{BanOutcome, BannedNodeSetManager, UnbanOutcome};
use crate::flatten::flatten_with;
use crate::replication::{ReplicationController, ReplicationMode};
use crate::restart::{RestartContext, RestartOrchestrator};
use crate::service::SystemdRestarter;

#[derive(Parser)]
#[command(name = "searchctl")]
#[command(about = "Search cluster maintenance CLI", long_about = None)]
pub struct Cli {
    #[arg(short, long, env = "SEARCHCTL_SERVER")]
    pub server: Option<String>,

    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    BanNode {
        node: String,
    },
    UnbanNode {
        node: String,
    },
    Health,
    Status,
    RestartFast,
    StartReplication,
    StopReplication,
    Metrics {
        #[arg(long, default_value = "/")]
        separator: String,
    },
    MetricsLocal {
        #[arg(long, default_value = "/")]
        separator: String,
    },
    ClusterStats {
        #[arg(long, default_value = "/")]
        separator: String,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let Cli {
            server,
            config,
            command,
        } = self;

        let mut config = match config {
            Some(ref path) => MgmtConfig::from_file(path)?,
            None => MgmtConfig::default(),
        };
        if let Some(server) = server {
            config.server = server;
        }

        let client = Arc::new(ClusterClient::new(
            config.server.as_str(),
            config.request_timeout(),
        ));

        match command {
            Command::BanNode { ref node } => ban_node(client, node).await,
            Command::UnbanNode { ref node } => unban_node(client, node).await,
            Command::Health => health(client).await,
            Command::Status => status(client).await,
            Command::RestartFast => restart_fast(client, &config).await,
            Command::StartReplication => set_replication(client, ReplicationMode::All).await,
            Command::StopReplication => set_replication(client, ReplicationMode::Primaries).await,
            Command::Metrics { ref separator } => {
                let stats = client.node_stats(None).await?;
                print_flattened(&stats, separator)
            }
            Command::MetricsLocal { ref separator } => {
                let stats = client.node_stats(Some("_local")).await?;
                print_flattened(&stats, separator)
            }
            Command::ClusterStats { ref separator } => {
                let stats = client.cluster_stats(None).await?;
                print_flattened(&stats, separator)
            }
        }
    }
}

async fn ban_node(client: Arc<ClusterClient>, node: &str) -> Result<()> {
    let manager = BannedNodeSetManager::new(client);
    match manager.ban(node).await? {
        BanOutcome::Banned => println!("{} is now banned from allocation", node),
        BanOutcome::AlreadyBanned => println!("{} is already banned", node),
    }
    Ok(())
}

async fn unban_node(client: Arc<ClusterClient>, node: &str) -> Result<()> {
    let manager = BannedNodeSetManager::new(client);
    match manager.unban(node).await? {
        UnbanOutcome::Unbanned => println!("{} is no longer banned from allocation", node),
        UnbanOutcome::NotBanned => println!("{} is not banned", node),
    }
    Ok(())
}

async fn health(client: Arc<ClusterClient>) -> Result<()> {
    use searchctl_client::HealthApi;
    let health = client.health().await?;
    println!("{}", health.summary_all());
    Ok(())
}

async fn status(client: Arc<ClusterClient>) -> Result<()> {
    use searchctl_client::HealthApi;
    let health = client.health().await?;
    println!("{}", health.status);
    Ok(())
}

async fn set_replication(client: Arc<ClusterClient>, mode: ReplicationMode) -> Result<()> {
    let controller = ReplicationController::new(client);
    controller.require_mode(mode).await?;
    println!("allocation mode set to {}", mode);
    Ok(())
}

async fn restart_fast(client: Arc<ClusterClient>, config: &MgmtConfig) -> Result<()> {
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, winding down");
            interrupt.cancel();
        }
    });

    let replication = ReplicationController::new(client.clone());
    let restarter = Arc::new(SystemdRestarter::new(config.service_unit.as_str()));
    let mut orchestrator =
        RestartOrchestrator::new(client, replication, restarter, config.restart_policy());

    let ctx = RestartContext::detect(&config.server);
    let report = orchestrator.run(ctx, &cancel).await?;

    if report.convergence_confirmed {
        println!("cluster is green; restart complete");
    } else {
        println!("restart complete; cluster still converging and replication is enabled");
    }
    Ok(())
}

fn print_flattened(value: &Value, separator: &str) -> Result<()> {
    let separator = parse_separator(separator)?;
    for line in flatten_with(value, separator) {
        println!("{}", line?.render());
    }
    Ok(())
}

fn parse_separator(raw: &str) -> Result<char> {
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => anyhow::bail!("separator must be a single character, got {:?}", raw),
    }
}
