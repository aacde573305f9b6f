use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use tracing::{error, info};

use pd_cert_assistant::config::{AppConfig, Args, Commands};
use pd_cert_assistant::controller::{
    self, build_client, metrics, CertificateReconciler, CiliumNodeInventory,
    KubeCertificateStore, NodeInventory, PeerAggregator, PeerClient, PeerDiscovery, Reconciler,
    SharedState,
};
use pd_cert_assistant::rest_api::{self, BearerToken};
use pd_cert_assistant::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("pd-cert-assistant v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Run(run_args) => {
            telemetry::init_tracing(run_args.log_format);
            let config = run_args
                .into_config()
                .context("invalid configuration")?;
            run(config).await
        }
    }
}

async fn kube_client(config: &AppConfig) -> anyhow::Result<kube::Client> {
    let mut kube_config = match &config.kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("failed to read kubeconfig {}", path.display()))?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .context("failed to load kubeconfig")?
        }
        None => kube::Config::infer()
            .await
            .context("failed to infer Kubernetes configuration")?,
    };
    kube_config.read_timeout = Some(config.http_request_timeout);
    kube::Client::try_from(kube_config).context("failed to create Kubernetes client")
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    info!("Starting pd-cert-assistant v{}", version);
    info!(
        "Managing certificate {} with peer source {:?}",
        config.certificate.key(),
        config.peer_source
    );
    metrics::init(version);

    let client = kube_client(&config).await?;
    info!("Connected to Kubernetes cluster");

    let http = build_client(config.http_request_timeout, &config.tls)
        .context("failed to build HTTP client")?;
    let peer_http = build_client(config.http_request_timeout, &config.peer_tls)
        .context("failed to build pd-assistant HTTP client")?;
    let state = Arc::new(SharedState::new());

    // Local inventory loop
    let inventory: Arc<dyn NodeInventory> = Arc::new(CiliumNodeInventory::new(client.clone()));
    tokio::spawn(controller::run_inventory_loop(
        inventory,
        Arc::clone(&state),
        config.k8s_poll_interval,
    ));

    // Reconciliation loop
    let reconciler = Reconciler::new(
        PeerDiscovery::new(
            config.peer_source.clone(),
            config.naming.clone(),
            http,
            config.tls.has_ca(),
        ),
        PeerAggregator::new(
            PeerClient::new(peer_http, config.bearer_token.clone()),
            config.peer_fetch_concurrency,
        ),
        CertificateReconciler::new(
            KubeCertificateStore::new(client),
            config.certificate.clone(),
            config.issuer.clone(),
        ),
        Arc::clone(&state),
        config.consensus,
    );
    let poll_interval = config.pd_assistant_poll_interval;
    tokio::spawn(async move { reconciler.run(poll_interval).await });

    let router = rest_api::build_router(state, BearerToken::new(config.bearer_token));
    rest_api::run_server(config.listen, router, shutdown_signal())
        .await
        .context("REST API server failed")?;

    info!("Shutting down");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
