//! Machine lifecycle controller entry point.
//!
//! Starts both reconcilers (MHC, MDB) behind a single leader-election lease,
//! plus the `/metrics` HTTP endpoint when the `metrics` feature is enabled.

use std::sync::Arc;

use clap::Parser;
use machine_lifecycle_operator::config::{Config, LogFormat};
use machine_lifecycle_operator::controller::{run_mdb_controller, run_mhc_controller, KubeObjectStore, NodeIndex};
use machine_lifecycle_operator::leader_election;
use machine_lifecycle_operator::Error;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::parse();
    init_tracing(config.log_format);

    info!(
        "starting machine-lifecycle-controller v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = kube::Client::try_default().await.map_err(Error::from_kube)?;
    info!("connected to kubernetes cluster");

    let identity = format!(
        "{}-{}",
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string()),
        std::process::id()
    );
    let _lease = leader_election::acquire(
        client.clone(),
        &config.leader_election_namespace,
        "machine-lifecycle-controller",
        &identity,
    )
    .await?;

    let store = Arc::new(KubeObjectStore::new(client.clone()));
    let index = Arc::new(NodeIndex::default());

    #[cfg(feature = "metrics")]
    {
        let metrics_addr = config.metrics_addr;
        tokio::spawn(async move {
            if let Err(err) = machine_lifecycle_operator::controller::run_metrics_server(metrics_addr).await {
                tracing::error!(error = %err, "metrics server exited");
            }
        });
    }

    let mhc_task = tokio::spawn(run_mhc_controller(
        client.clone(),
        store.clone(),
        index,
        config.node_appear_timeout,
        config.namespace.clone(),
        config.worker_count,
    ));

    let disruption_window =
        chrono::Duration::from_std(config.disruption_window).unwrap_or(chrono::Duration::minutes(2));
    let mdb_task = tokio::spawn(run_mdb_controller(
        client,
        store,
        disruption_window,
        config.namespace,
        config.worker_count,
    ));

    tokio::select! {
        _ = mhc_task => info!("mhc controller task exited"),
        _ = mdb_task => info!("mdb controller task exited"),
        _ = tokio::signal::ctrl_c() => info!("received shutdown signal"),
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(env_filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true))
                .with(env_filter)
                .init();
        }
    }
}
