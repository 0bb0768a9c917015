use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use url::Url;

use benchmark_engine::cleanup::CleanupEngine;
use benchmark_engine::cluster::{ClusterOps, JobBackend, LocalJobBackend, live_cluster};
use benchmark_engine::config::Settings;
use benchmark_engine::reuse::ReuseCache;
use benchmark_engine::scheduler::Scheduler;
use benchmark_engine::services::kube_client::KubeClient;
use benchmark_engine::store::CampaignStore;
use benchmark_engine::store::memory::MemoryStore;
use benchmark_engine::submission::peer::DeployerClient;
use benchmark_engine::submission::server::{QueueState, queue_router};

/// Campaign queue owner: runs the scheduler loop and serves the queue
/// surface.
#[derive(Parser, Debug)]
#[command(name = "queue-server")]
struct Args {
    #[arg(long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "SERVER_PORT", default_value_t = 8005)]
    port: u16,

    /// Submit benchmark jobs through the peer deployer instead of directly.
    #[arg(long, env = "DEPLOYER_SERVICE_URL")]
    deployer_url: Option<Url>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let settings = Settings::from_env();

    let kube = KubeClient::new(settings.kubeconfig_path.as_deref())
        .await
        .context("cannot connect to the Kubernetes cluster")?;
    let cluster: Arc<dyn ClusterOps> =
        Arc::new(live_cluster(settings.kubeconfig_path.clone(), kube));

    let jobs: Arc<dyn JobBackend> = match &args.deployer_url {
        Some(url) => Arc::new(DeployerClient::new(url.clone())),
        None => Arc::new(LocalJobBackend::new(cluster.clone())),
    };

    let store: Arc<dyn CampaignStore> = Arc::new(MemoryStore::new());
    let cleanup = Arc::new(CleanupEngine::new(cluster.clone(), jobs.clone(), store.clone()));
    let reuse = Arc::new(ReuseCache::new(store.clone(), cluster.clone()));

    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        cluster,
        jobs,
        cleanup.clone(),
        reuse,
        settings.executor_config(),
        settings.poll_interval,
        settings.scheduler_auto_start,
    ));

    let scheduler_loop = tokio::spawn(scheduler.clone().run());

    let state = QueueState {
        store,
        scheduler: scheduler.clone(),
        cleanup,
    };
    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    tracing::info!("queue server listening on {addr}");

    axum::serve(listener, queue_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    scheduler.shutdown();
    let _ = scheduler_loop.await;
    Ok(())
}
