//! Configuration for the scaling engine service

use crate::engine::EngineSettings;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the scaling engine
#[derive(Debug, Clone, Parser)]
#[command(name = "scaling-engine")]
#[command(about = "Polls scaler triggers, drives scaling decisions and emits lifecycle events")]
pub struct Config {
    /// YAML manifest with scaled objects, authentications and event sources
    #[arg(long, env)]
    pub manifest: PathBuf,

    /// JSON file standing in for cluster secrets (`{namespace: {name: {key: value}}}`)
    #[arg(long, env)]
    pub secrets_file: Option<PathBuf>,

    /// Cluster name used in event sources and subjects
    #[arg(long, env, default_value = "kubernetes")]
    pub cluster_name: String,

    /// Namespace cluster-scoped authentications read their secrets from
    #[arg(long, env, default_value = "keda")]
    pub cluster_resources_namespace: String,

    /// Default timeout for one trigger evaluation
    #[arg(long, env, default_value = "3s", value_parser = parse_positive_duration)]
    pub trigger_timeout: Duration,

    /// Capacity of the event queue; events beyond it are dropped
    #[arg(long, env, default_value_t = 1024)]
    pub event_queue_capacity: usize,

    /// Refresh cached identity tokens this long before they expire
    #[arg(long, env, default_value = "5m", value_parser = humantime::parse_duration)]
    pub token_refresh_margin: Duration,

    /// Timeout for one event delivery
    #[arg(long, env, default_value = "10s", value_parser = parse_positive_duration)]
    pub event_delivery_timeout: Duration,

    /// How often object snapshots are logged
    #[arg(long, env, default_value = "30s", value_parser = parse_positive_duration)]
    pub snapshot_interval: Duration,

    /// Dry-run mode (log events instead of delivering them)
    #[arg(long, env)]
    pub dry_run: bool,

    /// Output logs in JSON format
    #[arg(long, env)]
    pub log_json: bool,
}

impl Config {
    /// Parse configuration from command-line args and environment variables
    pub fn parse_config() -> Self {
        Config::parse()
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            cluster_name: self.cluster_name.clone(),
            cluster_resources_namespace: self.cluster_resources_namespace.clone(),
            default_trigger_timeout: self.trigger_timeout,
            event_queue_capacity: self.event_queue_capacity,
        }
    }
}

/// Like `humantime::parse_duration`, but rejects zero.
fn parse_positive_duration(raw: &str) -> Result<Duration, String> {
    let duration = humantime::parse_duration(raw).map_err(|e| e.to_string())?;
    if duration.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(duration)
}
