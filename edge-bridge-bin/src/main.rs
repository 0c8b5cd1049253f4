mod listener;

use clap::Parser;
use edge_bridge_common::{Logger, Settings, DEFAULT_CONFIG_PATH};
use edge_bridge_core::{
    default_converter_provider, registration_for, CloudProxy, ConnectionManager,
    SubscriptionCategory,
};
use edge_bridge_error::{EBError, EBResult};
use edge_bridge_sdk::Identity;
use edge_bridge_upstream::MqttCloudClientProvider;
use listener::LoggingListener;
use std::{path::PathBuf, sync::Arc};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

/// Edge Bridge - cloud-facing session bridge of an IoT edge gateway
///
/// Opens one upstream session per configured identity and keeps it alive
/// until interrupted.
#[derive(Parser)]
#[command(name = "edge-bridge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Edge Bridge", long_about = None)]
struct Cli {
    /// Sets a custom config file with full path
    ///
    /// If not specified, 'bridge.toml' in the current working directory is
    /// read when present.
    #[arg(short, long, env = "EB_CONFIG")]
    config: Option<PathBuf>,
}

/// Categories every startup session subscribes to
const STARTUP_SUBSCRIPTIONS: [SubscriptionCategory; 3] = [
    SubscriptionCategory::Methods,
    SubscriptionCategory::DesiredPropertyUpdates,
    SubscriptionCategory::C2D,
];

#[tokio::main(flavor = "multi_thread")]
async fn main() -> EBResult<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let settings = Settings::new(&config_path.to_string_lossy())?;

    let mut logger = Logger::new(settings.general.level(), &settings.general.log_dir);
    logger.initialize()?;
    info!(config = %config_path.display(), "Edge bridge starting");
    info!(
        qos = ?settings.link.qos,
        open_timeout_ms = settings.link.open_timeout_ms,
        "Link settings"
    );

    let provider = MqttCloudClientProvider::new(settings.upstream.clone()).with_credentials(
        settings
            .identities
            .iter()
            .filter_map(|entry| Some((entry.id.clone(), entry.sas_token.clone()?))),
    );
    let manager = ConnectionManager::new(Arc::new(provider), default_converter_provider())
        .with_receive_timeout(settings.upstream.receive_timeout());

    let mut status_rx = manager.subscribe_status();
    tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(event) => info!(
                    identity = %event.identity,
                    status = %event.status,
                    reason = %event.reason,
                    "Cloud connection status changed"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Status events dropped")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    if settings.identities.is_empty() {
        warn!("No identities configured, nothing to bridge");
    }
    for entry in settings.identities.iter() {
        if let Err(e) = open_session(&manager, entry.id.clone()).await {
            error!(identity = %entry.id, error = %e, "Failed to open cloud session");
        }
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| EBError::ShutdownError(e.to_string()))?;
    info!("Shutdown signal received");

    let closed = manager.close_all().await;
    info!(closed, "Edge bridge stopped");
    Ok(())
}

async fn open_session(manager: &ConnectionManager, identity: Identity) -> EBResult<()> {
    let proxy = manager.get_or_create(&identity).await?;
    let listener = Arc::new(LoggingListener::new(Arc::downgrade(&proxy)));
    proxy.bind_receiver(listener).await?;

    for category in STARTUP_SUBSCRIPTIONS {
        registration_for(category, true)
            .process_subscription(proxy.as_ref())
            .await?;
    }
    info!(identity = %identity, "Cloud session open");
    Ok(())
}
