//! Ark Kubernetes Operator
//!
//! Main entry point for the operator. Loads the server config, wires up
//! storage and plugins, and runs the controllers until asked to stop.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ark_operator::{
    backup::with_builtin_backup_actions,
    clock::SystemClock,
    cloudprovider::{
        BlockStoreSnapshotService, LocalObjectStore, ObjectStoreBackupService, SnapshotService,
        LOCAL_PROVIDER,
    },
    config::{backup_sync_period, load_server_config, OperatorConfig},
    controllers::{self, Context},
    crd::ConfigSpec,
    metrics,
    plugin::{InProcessManager, PluginManager},
};

/// A controller's name paired with how it exited
type ControllerFuture = BoxFuture<'static, (&'static str, ark_operator::Result<()>)>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    info!("Starting Ark Operator");

    let settings = OperatorConfig::from_env().context("invalid operator settings")?;

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let config = load_server_config(&client, &settings.namespace, &settings.config_name)
        .await
        .with_context(|| {
            format!(
                "unable to load server config {}/{}",
                settings.namespace, settings.config_name
            )
        })?;
    info!(
        object_storage = %config.backup_storage_provider.name,
        bucket = %config.backup_storage_provider.bucket,
        "Loaded server config"
    );

    let plugin_manager: Arc<dyn PluginManager> = Arc::new(build_plugin_manager(&settings, &config));

    let object_store = plugin_manager
        .get_object_store(&config.backup_storage_provider.name)
        .context("unable to initialize object storage")?;
    let backup_service = Arc::new(ObjectStoreBackupService::new(object_store));

    let snapshot_service: Option<Arc<dyn SnapshotService>> = match &config.persistent_volume_provider {
        Some(provider) => {
            let block_store = plugin_manager
                .get_block_store(&provider.name)
                .context("unable to initialize block storage")?;
            Some(Arc::new(BlockStoreSnapshotService::new(block_store)))
        }
        None => {
            info!("No persistent volume provider configured, volume snapshots are disabled");
            None
        }
    };

    let shutdown = CancellationToken::new();
    let context = Arc::new(Context {
        client,
        namespace: settings.namespace.clone(),
        bucket: config.backup_storage_provider.bucket.clone(),
        workers: settings.workers,
        backup_service,
        snapshot_service,
        plugin_manager,
        clock: Arc::new(SystemClock),
        shutdown: shutdown.clone(),
    });

    // Start metrics server
    let metrics_port = settings.metrics_port;
    let metrics_handle = tokio::spawn(metrics::serve(metrics_port, shutdown.clone()));
    info!("Metrics server starting on port {}", metrics_port);

    // Cancel everything on SIGTERM/SIGINT
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal, stopping operator");
        signal_token.cancel();
    });

    let mut running: FuturesUnordered<ControllerFuture> = FuturesUnordered::new();

    if config.restore_only_mode {
        info!("Restore only mode, not starting the backup controller");
    } else {
        metrics::controller_starting();
        let ctx = context.clone();
        running.push(
            async move { ("Backup", controllers::run_backup_controller(ctx).await) }.boxed(),
        );
    }

    metrics::controller_starting();
    let ctx = context.clone();
    running.push(async move { ("Restore", controllers::run_restore_controller(ctx).await) }.boxed());

    let ctx = context.clone();
    let period = backup_sync_period(&config);
    running.push(
        async move {
            controllers::run_backup_sync_controller(ctx, period).await;
            ("BackupSync", Ok(()))
        }
        .boxed(),
    );

    let mut failed = false;
    tokio::select! {
        _ = supervise(&mut running, &shutdown, &mut failed) => {}
        result = metrics_handle => {
            if !shutdown.is_cancelled() {
                error!("Metrics server exited unexpectedly: {:?}", result);
                failed = true;
                shutdown.cancel();
            }
        }
    }
    // The metrics server may stop first; let the controllers finish.
    supervise(&mut running, &shutdown, &mut failed).await;

    info!("Ark Operator stopped");
    if failed {
        anyhow::bail!("one or more controllers failed");
    }
    Ok(())
}

/// Wait for every controller to finish, stopping the rest when one fails
async fn supervise(
    controllers: &mut FuturesUnordered<ControllerFuture>,
    shutdown: &CancellationToken,
    failed: &mut bool,
) {
    while let Some((name, result)) = controllers.next().await {
        match result {
            Ok(()) => info!(controller = name, "Controller exited"),
            Err(e) => {
                error!(controller = name, error = %e, "Controller failed, stopping operator");
                *failed = true;
                shutdown.cancel();
            }
        }
        if !shutdown.is_cancelled() {
            warn!(controller = name, "Controller exited before shutdown was requested");
            shutdown.cancel();
        }
    }
}

/// Register the built-in providers and item actions
fn build_plugin_manager(settings: &OperatorConfig, config: &ConfigSpec) -> InProcessManager {
    let storage = &config.backup_storage_provider;
    let root = storage
        .config
        .get("root")
        .map(PathBuf::from)
        .unwrap_or_else(|| settings.local_storage_root.clone());

    if settings.scale_deployments_to_zero {
        info!("Deployments will be archived with zero replicas");
    }
    let manager = InProcessManager::new().with_object_store(LOCAL_PROVIDER, Arc::new(LocalObjectStore::new(root)));
    with_builtin_backup_actions(manager, settings.scale_deployments_to_zero)
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
