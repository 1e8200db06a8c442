//! Scaling Engine binary - runs the objects of a manifest until interrupted

use anyhow::Context;
use auth_resolver::{
    ClusterSecretStore, FileSecretStore, InMemorySecretStore, ProviderEndpoints, Resolver,
    ResolverDeps,
};
use scaling_engine::{
    scalers, Config, EventSink, HttpEventSink, LogOnlyEventSink, Manifest, ScalerRegistry,
    ScalingEngine, TriggerEvaluator,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration
    let config = Config::parse_config();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting Scaling Engine");
    info!("Configuration:");
    info!("  Manifest: {}", config.manifest.display());
    info!("  Cluster name: {}", config.cluster_name);
    info!("  Trigger timeout: {:?}", config.trigger_timeout);
    info!("  Event queue capacity: {}", config.event_queue_capacity);
    info!("  Dry-run: {}", config.dry_run);

    let manifest = Manifest::load(&config.manifest)?;

    let store: Arc<dyn ClusterSecretStore> = match &config.secrets_file {
        Some(path) => {
            let store = FileSecretStore::new(path);
            store.check_permissions()?;
            info!("Using secrets file: {}", path.display());
            Arc::new(store)
        }
        None => {
            warn!("No secrets file configured, cluster secrets are empty");
            Arc::new(InMemorySecretStore::new())
        }
    };

    let http = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    let resolver = Resolver::with_defaults(ResolverDeps {
        store,
        http: http.clone(),
        endpoints: ProviderEndpoints::from_env(),
        token_refresh_margin: config.token_refresh_margin,
    });
    let mut registry = ScalerRegistry::new();
    scalers::register_defaults(&mut registry, http);
    let evaluator = Arc::new(TriggerEvaluator::new(Arc::new(resolver), registry));

    let sink: Arc<dyn EventSink> = if config.dry_run {
        info!("Using log-only event sink (dry-run mode)");
        Arc::new(LogOnlyEventSink)
    } else {
        Arc::new(HttpEventSink::new(config.event_delivery_timeout)?)
    };

    let engine = ScalingEngine::new(config.engine_settings(), evaluator, sink);
    let rejected = engine.apply_manifest(manifest);
    if rejected > 0 {
        warn!(rejected = rejected, "Some manifest resources were rejected");
    }
    info!(objects = engine.objects().len(), "Manifest applied");

    let mut ticker = tokio::time::interval(config.snapshot_interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                for snapshot in engine.snapshots() {
                    info!(
                        object = %snapshot.key,
                        phase = %snapshot.phase,
                        value = ?snapshot.value,
                        cycles = snapshot.cycles,
                        "Object snapshot"
                    );
                }
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}
