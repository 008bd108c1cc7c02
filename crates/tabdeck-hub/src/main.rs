use anyhow::Context;
use std::sync::Arc;
use tabdeck_core::bridge_ipc::DEFAULT_MAX_FRAME_BYTES;
use tabdeck_hub::bridge::{self, BridgeConfig, RemoteHost};
use tabdeck_hub::config::{init_logging, load_config};
use tabdeck_hub::github::{GhCliPrLookup, ProcessCommandRunner};
use tabdeck_hub::host::FileSettingsStore;
use tabdeck_hub::registry::RegistryHandle;
use tabdeck_hub::router::{MessageRouter, RouterConfig, RouterDeps};
use tabdeck_hub::sources::FaviconRules;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config();
    let _log_guard = init_logging(&config);

    let pr_lookup = GhCliPrLookup::new(ProcessCommandRunner, config.gh_bin.as_str())
        .context("invalid GitHub CLI configuration")?;
    let remote = RemoteHost::new();
    let registry = RegistryHandle::spawn(config.closed_tab_capacity);
    let router = MessageRouter::new(
        RouterDeps {
            host: Arc::new(remote.clone()),
            bookmarks: Arc::new(remote.clone()),
            settings: Arc::new(FileSettingsStore::new(&config.settings_path)),
            pr_lookup: Arc::new(pr_lookup),
            registry: registry.clone(),
            favicons: Arc::new(FaviconRules::new(config.favicon_direct_hosts.clone())),
        },
        RouterConfig {
            extensions_url: config.extensions_url.clone(),
        },
    );

    info!(
        event = "hub_start",
        socket = %config.socket_path.display(),
        settings = %config.settings_path.display(),
        closed_tab_capacity = config.closed_tab_capacity
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!(event = "hub_shutdown_requested");
        let _ = shutdown_tx.send(true);
    });

    let bridge_config = BridgeConfig {
        socket_path: config.socket_path.clone(),
        write_timeout: config.write_timeout,
        queue_capacity: config.queue_capacity,
        max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
    };
    if let Err(err) = bridge::run(bridge_config, router, registry, remote, shutdown_rx).await {
        error!(event = "hub_error", error = %err);
        return Err(err).with_context(|| {
            format!("bridge failed on {}", config.socket_path.display())
        });
    }
    info!(event = "hub_stop");
    Ok(())
}
