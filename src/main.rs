use axum::{Extension, Router, routing::get};
use pserver::config::NodeConfig;
use pserver::node::{RuntimeNode, handle_status};
use pserver::program::{Program, StateBuilder};
use pserver::sync::DataManager;

use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: {} --config <file> [--node <index>] [--status <addr:port>]", args[0]);
        eprintln!("Example: {} --config cluster.json --node 1", args[0]);
        std::process::exit(1);
    }

    let mut config_path: Option<String> = None;
    let mut node_index: Option<usize> = None;
    let mut status_addr: Option<SocketAddr> = None;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--config", Some(value)) => {
                config_path = Some(value.clone());
                i += 2;
            }
            ("--node", Some(value)) => {
                node_index = Some(value.parse()?);
                i += 2;
            }
            ("--status", Some(value)) => {
                status_addr = Some(value.parse()?);
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let config_path = config_path.ok_or_else(|| anyhow::anyhow!("--config is required"))?;
    let mut config = NodeConfig::from_file(&config_path)?;
    if let Some(index) = node_index {
        config.node_index = index;
        config.validate()?;
    }

    // 1. Node (transport, directory, synchronization core):
    let node = RuntimeNode::start(config).await?;
    tracing::info!("Node {} starting", node.node_id());

    // 2. Bootstrap handshake with every peer:
    node.connect().await?;

    // 3. Status endpoint:
    if let Some(addr) = status_addr {
        let app = Router::new()
            .route("/status", get(handle_status))
            .layer(Extension(node.clone()));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Status endpoint listening on {}", addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Status endpoint stopped: {}", e);
            }
        });
    }

    // 4. Smoke program: every node contributes its id, all nodes agree on the sum
    let program = smoke_program(node.data().clone(), node.config().parallelism)?;
    let job_uid = node.run(&program).await?;
    tracing::info!("Smoke program finished as job {}", job_uid);

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;
    node.shutdown();

    Ok(())
}

fn smoke_program(data: Arc<DataManager>, parallelism: usize) -> pserver::Result<Program> {
    let model = StateBuilder::new("smoke_model", 1, 4).build()?;
    let aggregator = Arc::new(data.aggregator::<u64>("smoke_sum"));

    let program = Program::new("smoke", move |ctx| {
        let data = data.clone();
        let aggregator = aggregator.clone();
        async move {
            for superstep in 0..3u64 {
                if ctx.is_leader() {
                    let partial = data.node_id().0 as u64 + superstep;
                    let total = aggregator
                        .apply(partial, |partials| Ok(partials.iter().sum::<u64>()))
                        .await?;
                    tracing::info!("Superstep {}: cluster sum {}", superstep, total);
                }
                data.global_sync(&ctx, 0).await?;
            }
            Ok(())
        }
    })
    .parallelism(parallelism)
    .state(model);

    Ok(program)
}
