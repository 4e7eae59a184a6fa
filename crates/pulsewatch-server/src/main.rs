use anyhow::Result;
use pulsewatch_server::app;
use pulsewatch_server::config::{ServerConfig, SeedFile};
use pulsewatch_server::scheduler::{NotifyScheduler, RuleReloadScheduler};
use pulsewatch_server::seed;
use pulsewatch_server::state::AppState;
use pulsewatch_storage::AlertStore;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing_subscriber::EnvFilter;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  pulsewatch-server [config.toml]                                Start the server");
    eprintln!("  pulsewatch-server init-catalog <config.toml> <seed.json>       Import metric rules, rule templates and contacts");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pulsewatch=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("init-catalog") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-catalog requires <config.toml> and <seed.json> arguments")
            })?;
            let seed_path = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-catalog requires <seed.json> argument")
            })?;
            run_init_catalog(config_path, seed_path).await
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or("config/server.toml");
            run_server(config_path).await
        }
    }
}

fn init_ids(config: &ServerConfig) {
    pulsewatch_common::id::init(config.instance.machine_id, config.instance.node_id);
}

async fn open_store(config: &ServerConfig) -> Result<AlertStore> {
    tracing::info!(url = %config.database.redacted_url(), "Opening alert store");
    AlertStore::new(&config.database.url, Path::new(&config.database.data_dir)).await
}

/// Import the catalog from a JSON seed file. Existing names are left untouched.
async fn run_init_catalog(config_path: &str, seed_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    init_ids(&config);
    let store = open_store(&config).await?;

    let seed_content = std::fs::read_to_string(seed_path)
        .map_err(|e| anyhow::anyhow!("Failed to read seed file '{}': {}", seed_path, e))?;
    let seed_file: SeedFile = serde_json::from_str(&seed_content)
        .map_err(|e| anyhow::anyhow!("Failed to parse seed file '{}': {}", seed_path, e))?;

    let report = seed::apply_seed(&store, seed_file).await?;
    tracing::info!(
        metric_rules_created = report.metric_rules_created,
        metric_rules_skipped = report.metric_rules_skipped,
        templates_created = report.templates_created,
        templates_skipped = report.templates_skipped,
        contacts_created = report.contacts_created,
        contacts_skipped = report.contacts_skipped,
        "Catalog initialized"
    );
    Ok(())
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = if Path::new(config_path).exists() {
        ServerConfig::load(config_path)?
    } else {
        tracing::warn!(path = config_path, "Config file not found, using defaults");
        ServerConfig::default()
    };
    init_ids(&config);

    let store = Arc::new(open_store(&config).await?);
    let state = AppState::from_store(store, config.clone());

    let cached = state.engine.rebuild_cache().await?;
    tracing::info!(rules = cached, "Rule cache loaded");

    // HTTP/REST server
    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let app = app::build_http_app(state.clone());
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    let http_server = axum::serve(http_listener, app);

    // Notification scheduler
    let notify_handle = if config.notify.period_secs > 0 {
        let scheduler = NotifyScheduler::new(
            state.dispatcher.clone(),
            Duration::from_secs(config.notify.period_secs),
        );
        Some(tokio::spawn(async move {
            scheduler.run().await;
        }))
    } else {
        tracing::info!("Notification scheduler disabled");
        None
    };

    // Daily rule cache reload
    let reload_scheduler =
        RuleReloadScheduler::new(state.engine.clone(), config.alert.rule_reload_hour);
    let reload_handle = tokio::spawn(async move {
        reload_scheduler.run().await;
    });

    tracing::info!(http = %http_addr, "Server started");

    tokio::select! {
        result = http_server.with_graceful_shutdown(async { signal::ctrl_c().await.ok(); }) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server error");
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("Shutting down gracefully");
        }
    }

    state.pool.close();
    reload_handle.abort();
    if let Some(h) = notify_handle {
        h.abort();
    }
    tracing::info!("Server stopped");

    Ok(())
}
