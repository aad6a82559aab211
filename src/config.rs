//! Application-level configuration loading, including the scheduler tuning knobs.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{info, warn};

use crate::state::latency::{DEFAULT_RTT_WINDOW, LeadPolicy};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "BINGO_CALLER_CONFIG_PATH";
/// Environment variables overriding individual settings.
const PORT_ENV: &str = "PORT";
const PUSH_URL_ENV: &str = "AUTHORITY_PUSH_URL";
const FALLBACK_URL_ENV: &str = "AUTHORITY_FALLBACK_URL";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Endpoints of the call authority.
    pub authority: AuthorityConfig,
    /// Authority reachability probing.
    pub connectivity: ConnectivityConfig,
    /// Cadence scheduler tuning.
    pub scheduler: SchedulerTuning,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults,
    /// then apply environment overrides.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let mut config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<AppConfig>(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded configuration file");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        config.apply_env_overrides(|key| env::var(key).ok());
        config
    }

    /// Override individual settings from the environment.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup(PORT_ENV).and_then(|value| value.parse::<u16>().ok()) {
            self.server.port = port;
        }
        if let Some(url) = lookup(PUSH_URL_ENV).filter(|value| !value.is_empty()) {
            self.authority.push_url = url;
        }
        if let Some(url) = lookup(FALLBACK_URL_ENV).filter(|value| !value.is_empty()) {
            self.authority.fallback_url = url;
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// HTTP server settings.
pub struct ServerConfig {
    /// Port the REST/SSE server listens on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Where and how to reach the call authority.
pub struct AuthorityConfig {
    /// WebSocket URL of the push channel.
    pub push_url: String,
    /// Base URL of the request/response fallback channel.
    pub fallback_url: String,
    /// Upper bound on a fallback request.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub fallback_timeout: Duration,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            push_url: "ws://localhost:9000/calls".into(),
            fallback_url: "http://localhost:9000".into(),
            fallback_timeout: Duration::from_millis(3_000),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Cadence of the authority reachability probes.
pub struct ConnectivityConfig {
    /// Probe period while the authority is reachable.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub healthy_poll: Duration,
    /// First retry delay once the authority is unreachable.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub initial_backoff: Duration,
    /// Upper bound of the retry delay.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_backoff: Duration,
    /// Upper bound on a single fallback health probe.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub probe_timeout: Duration,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            healthy_poll: Duration::from_secs(2),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            probe_timeout: Duration::from_millis(1_500),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Timing constants of the cadence scheduler. Durations are milliseconds on disk.
pub struct SchedulerTuning {
    /// Re-check delay when an attempt is unexpectedly still pending.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub in_flight_poll: Duration,
    /// Connectivity poll while suspended.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub offline_poll: Duration,
    /// Distance before a deadline where the coarse timer hands over to fine stepping.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub spin_margin: Duration,
    /// Step of the fine phase of a precise wait.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub spin_step: Duration,
    /// Shortest retry delay after a transient failure.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub backoff_min: Duration,
    /// Longest retry delay after a transient failure.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub backoff_max: Duration,
    /// Lateness beyond which an acknowledgement plays "now" instead of at its target.
    pub late_ack_threshold_ms: u64,
    /// Smallest spacing between two push dispatches for the same game.
    pub push_rate_floor_ms: u64,
    /// Smallest interval an operator may configure.
    pub min_interval_ms: u64,
    /// Largest interval an operator may configure.
    pub max_interval_ms: u64,
    /// Lead time floor.
    pub lead_floor_ms: u64,
    /// Margin added to the 95th percentile round trip.
    pub lead_headroom_ms: u64,
    /// Amount subtracted from the interval to cap the lead time.
    pub lead_ceiling_slack_ms: u64,
    /// Lowest lead ceiling.
    pub lead_ceiling_floor_ms: u64,
    /// Round-trip samples kept by the latency estimator.
    pub rtt_window: usize,
    /// Failures in a row before a `retrying` diagnostic is raised.
    pub retry_alert_after: u32,
}

impl SchedulerTuning {
    /// Lead-time bounds for the latency estimator.
    pub fn lead_policy(&self) -> LeadPolicy {
        LeadPolicy {
            floor_ms: self.lead_floor_ms,
            headroom_ms: self.lead_headroom_ms,
            ceiling_slack_ms: self.lead_ceiling_slack_ms,
            ceiling_floor_ms: self.lead_ceiling_floor_ms,
        }
    }
}

impl Default for SchedulerTuning {
    fn default() -> Self {
        let lead = LeadPolicy::default();
        Self {
            in_flight_poll: Duration::from_millis(100),
            offline_poll: Duration::from_millis(500),
            spin_margin: Duration::from_millis(30),
            spin_step: Duration::from_millis(1),
            backoff_min: Duration::from_millis(800),
            backoff_max: Duration::from_millis(1_500),
            late_ack_threshold_ms: 100,
            push_rate_floor_ms: 600,
            min_interval_ms: 500,
            max_interval_ms: 120_000,
            lead_floor_ms: lead.floor_ms,
            lead_headroom_ms: lead.headroom_ms,
            lead_ceiling_slack_ms: lead.ceiling_slack_ms,
            lead_ceiling_floor_ms: lead.ceiling_floor_ms,
            rtt_window: DEFAULT_RTT_WINDOW,
            retry_alert_after: 3,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let raw = r#"{
            "authority": { "fallback_timeout": 1200 },
            "scheduler": { "late_ack_threshold_ms": 150, "backoff_max": 2000 }
        }"#;
        let config: AppConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.authority.fallback_timeout, Duration::from_millis(1_200));
        assert_eq!(config.authority.push_url, "ws://localhost:9000/calls");
        assert_eq!(config.scheduler.late_ack_threshold_ms, 150);
        assert_eq!(config.scheduler.backoff_max, Duration::from_millis(2_000));
        assert_eq!(config.scheduler.backoff_min, Duration::from_millis(800));
        assert_eq!(config.scheduler.rtt_window, 10);
        assert_eq!(config.connectivity.max_backoff, Duration::from_secs(10));
    }

    #[test]
    fn lead_policy_mirrors_tuning() {
        let tuning = SchedulerTuning {
            lead_floor_ms: 1_500,
            ..SchedulerTuning::default()
        };
        let policy = tuning.lead_policy();
        assert_eq!(policy.floor_ms, 1_500);
        assert_eq!(policy.headroom_ms, 500);
    }

    #[test]
    fn environment_overrides_apply() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| match key {
            PORT_ENV => Some("9191".into()),
            PUSH_URL_ENV => Some("ws://authority/push".into()),
            FALLBACK_URL_ENV => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.server.port, 9191);
        assert_eq!(config.authority.push_url, "ws://authority/push");
        assert_eq!(config.authority.fallback_url, "http://localhost:9000");
    }
}
