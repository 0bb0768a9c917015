use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use url::Url;

use benchmark_engine::cluster::{ClusterOps, live_cluster};
use benchmark_engine::config::Settings;
use benchmark_engine::services::kube_client::KubeClient;
use benchmark_engine::submission::deploy_server::{DeployState, deploy_router};
use benchmark_engine::submission::peer::QueueClient;

/// Job-deploy surface: applies benchmark manifests, reports job status, and
/// forwards campaign submissions to the queue-owner process.
#[derive(Parser, Debug)]
#[command(name = "deploy-server")]
struct Args {
    #[arg(long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "SERVER_PORT", default_value_t = 8002)]
    port: u16,

    #[arg(long, env = "NAMESPACE", default_value = "default")]
    namespace: String,

    /// Queue-owner base URL campaigns are forwarded to.
    #[arg(long, env = "QUEUE_SERVICE_URL")]
    queue_url: Option<Url>,
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

    let state = DeployState {
        cluster,
        default_namespace: args.namespace.clone(),
        queue: args.queue_url.map(|url| Arc::new(QueueClient::new(url))),
    };

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    tracing::info!("deploy server listening on {addr}");

    axum::serve(listener, deploy_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    Ok(())
}
