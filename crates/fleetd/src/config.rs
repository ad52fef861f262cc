//! fleetd.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use fleetgrid_controller::DriverConfig;
use fleetgrid_disruption::OccupancyPolicy;
use fleetgrid_state::{NodePool, parse_duration};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetdConfig {
    pub server: ServerConfig,
    pub controller: ControllerConfig,
    pub disruption: DisruptionConfig,
    /// Fleet policies applied on startup.
    pub node_pools: Vec<NodePool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            data_dir: PathBuf::from("/var/lib/fleetgrid"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub workers: usize,
    pub resync_interval: String,
    pub timer_tick: String,
    pub backoff_base: String,
    pub backoff_max: String,
    pub persistent_failure_threshold: u32,
    pub event_queue_capacity: usize,
    pub conflict_retries: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            resync_interval: "5m".to_string(),
            timer_tick: "1s".to_string(),
            backoff_base: "500ms".to_string(),
            backoff_max: "5m".to_string(),
            persistent_failure_threshold: 5,
            event_queue_capacity: 1024,
            conflict_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisruptionConfig {
    #[serde(flatten)]
    pub occupancy: OccupancyPolicy,
    pub drift_interval: String,
}

impl Default for DisruptionConfig {
    fn default() -> Self {
        Self {
            occupancy: OccupancyPolicy::default(),
            drift_interval: "5m".to_string(),
        }
    }
}

/// Upper bound for every configured interval and delay.
pub const MAX_CONFIG_DURATION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

fn duration(field: &str, value: &str) -> anyhow::Result<Duration> {
    let parsed =
        parse_duration(value).with_context(|| format!("invalid duration for {field}: {value:?}"))?;
    if parsed > MAX_CONFIG_DURATION {
        bail!("{field} is {value:?}; at most 30 days is allowed");
    }
    Ok(parsed)
}

impl FleetdConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: FleetdConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that is stored as text.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.controller.workers == 0 {
            bail!("controller.workers must be at least 1");
        }
        self.driver_config()?;
        self.resync_interval()?;
        self.drift_interval()?;
        let mut names = std::collections::HashSet::new();
        for pool in &self.node_pools {
            if !names.insert(pool.name.as_str()) {
                bail!("node pool {:?} defined twice", pool.name);
            }
            if let Some(delay) = pool.disruption.consolidate_after.delay()
                && delay > MAX_CONFIG_DURATION
            {
                bail!("node pool {:?}: consolidate_after exceeds 30 days", pool.name);
            }
        }
        Ok(())
    }

    pub fn driver_config(&self) -> anyhow::Result<DriverConfig> {
        let c = &self.controller;
        Ok(DriverConfig {
            workers: c.workers,
            timer_tick: duration("controller.timer_tick", &c.timer_tick)?,
            backoff_base: duration("controller.backoff_base", &c.backoff_base)?,
            backoff_max: duration("controller.backoff_max", &c.backoff_max)?,
            conflict_retries: c.conflict_retries,
        })
    }

    pub fn resync_interval(&self) -> anyhow::Result<Duration> {
        duration("controller.resync_interval", &self.controller.resync_interval)
    }

    pub fn drift_interval(&self) -> anyhow::Result<Duration> {
        duration("disruption.drift_interval", &self.disruption.drift_interval)
    }
}
