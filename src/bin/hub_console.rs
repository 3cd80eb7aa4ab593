//! Hub console
//!
//! Connects to the configured hub endpoint, logs every push and, when given
//! arguments, invokes one hub method and prints the result.
//!
//! Usage:
//!   cargo run --bin hub_console
//!   cargo run --bin hub_console -- chat send '"hello"' 42
//!
//! Environment variables:
//!   CONFIG_PATH - Configuration file (default: config/hub_client.yaml)
//!   HUB_URL - Overrides the configured URL
//!   RUST_LOG - Overrides the configured log level

use anyhow::{Context, Result};
use hub_client::bin_common::{init_tracing, load_config_from_env, parse_args};
use hub_client::hubsockets::{
    self, ClientConfig, ConnectionListener, HubConnection, HubProxy, HubSocketError,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

const START_TIMEOUT: Duration = Duration::from_secs(30);
const INVOKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Logs lifecycle transitions
struct LifecycleLogger;

impl ConnectionListener for LifecycleLogger {
    fn on_connected(&self) {
        info!("Connected");
    }

    fn on_reconnecting(&self) {
        warn!("Reconnecting...");
    }

    fn on_reconnected(&self) {
        info!("Reconnected");
    }

    fn on_disconnected(&self) {
        info!("Disconnected");
    }

    fn on_error(&self, error: &HubSocketError) {
        warn!("Connection error: {}", error);
    }

    fn on_connection_slow(&self) {
        warn!("Connection is slow");
    }
}

/// `<hub> <method> [json-args...]`; arguments that are not JSON are sent as strings
fn parse_invocation(args: &[String]) -> Option<(String, String, Vec<Value>)> {
    let (hub, rest) = args.split_first()?;
    let (method, params) = rest.split_first()?;
    let params = params
        .iter()
        .map(|raw| serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone())))
        .collect();
    Some((hub.clone(), method.clone(), params))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenv::dotenv().ok();

    let config_path = load_config_from_env();
    let config = ClientConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    init_tracing(&config.log_level);

    info!("");
    info!("========================================");
    info!("Hub console");
    info!("========================================");
    config.log();

    let invocation = parse_invocation(&parse_args());

    let transport = hubsockets::transports::from_names(&config.transports)?;
    let hub: HubConnection = hubsockets::builder()
        .config(&config)
        .transport(transport)
        .listener(Arc::new(LifecycleLogger))
        .build_hub()?;

    let mut proxies: BTreeMap<String, HubProxy> = BTreeMap::new();
    for name in config
        .hubs
        .iter()
        .chain(invocation.as_ref().map(|(name, _, _)| name))
    {
        let proxy = hub.create_hub_proxy(name)?;
        proxies.insert(proxy.name().to_string(), proxy);
    }

    hub.on_received(|message| info!("Push: {}", message));

    tokio::time::timeout(START_TIMEOUT, hub.start().wait())
        .await
        .context("timed out starting connection")??;
    info!(
        "Connection {} established",
        hub.connection().connection_id().unwrap_or_default()
    );

    if let Some((hub_name, method, params)) = invocation {
        let proxy = proxies
            .get(&hub_name.to_lowercase())
            .context("hub proxy missing")?;
        info!("Invoking {}.{} with {} argument(s)", hub_name, method, params.len());
        match tokio::time::timeout(INVOKE_TIMEOUT, proxy.invoke(&method, params).wait()).await {
            Ok(Ok(result)) => println!("{}", serde_json::to_string_pretty(&result)?),
            Ok(Err(e)) => error!("Invocation failed: {}", e),
            Err(_) => error!("Invocation timed out after {:?}", INVOKE_TIMEOUT),
        }
    }

    info!("Press Ctrl+C to stop");
    if let Err(e) = signal::ctrl_c().await {
        error!("Unable to listen for shutdown signal: {}", e);
    }

    info!("");
    info!("Received shutdown signal (Ctrl+C)");
    if let Err(e) = hub.stop().wait().await {
        warn!("Stop failed: {}", e);
    }

    info!("========================================");
    info!("Hub console stopped gracefully");
    info!("========================================");
    Ok(())
}
