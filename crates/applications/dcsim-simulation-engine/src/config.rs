//! Datacenter descriptor
//!
//! The descriptor is the validated, in-memory description of a datacenter:
//! nodes, their containers, the internal workloads of each container, and the
//! optional external load balancer. It is deserialized from JSON and must pass
//! [`DatacenterConfig::validate`] before a simulator is built from it.

use std::collections::HashSet;
use std::path::Path;

use dcsim_core::{
    ConfigError, EntityKind, FallbackStrategy, PlacementStrategy, ResourceVector, Result, Tick,
};
use serde::{Deserialize, Serialize};

/// Finest tick derived automatically from decimal time values (0.001)
const MAX_DERIVED_DECIMALS: i32 = 3;

/// Capacity or demand as written in the descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub ram: f64,
    #[serde(default)]
    pub disk: f64,
    #[serde(default)]
    pub bw: f64,
}

impl ResourceSpec {
    pub fn new(cpu: f64, ram: f64, disk: f64, bw: f64) -> Self {
        ResourceSpec { cpu, ram, disk, bw }
    }

    pub fn to_vector(&self) -> ResourceVector {
        ResourceVector::new(self.cpu, self.ram, self.disk, self.bw)
    }
}

/// Per-resource fluctuation percents (0 to 100)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FluctuationSpec {
    #[serde(default)]
    pub cpu_fluctuation_percent: f64,
    #[serde(default)]
    pub ram_fluctuation_percent: f64,
    #[serde(default)]
    pub disk_fluctuation_percent: f64,
    #[serde(default)]
    pub bw_fluctuation_percent: f64,
}

impl FluctuationSpec {
    pub fn to_vector(&self) -> ResourceVector {
        ResourceVector::new(
            self.cpu_fluctuation_percent,
            self.ram_fluctuation_percent,
            self.disk_fluctuation_percent,
            self.bw_fluctuation_percent,
        )
    }
}

/// Simulation clock settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Total simulated time, in simulation time units
    pub duration: f64,

    /// Length of one tick; derived from the descriptor when absent
    #[serde(default)]
    pub tick: Option<f64>,

    /// Seed for the fluctuation generator
    #[serde(default)]
    pub seed: Option<u64>,
}

/// A workload, internal to a container or submitted to the load balancer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkloadConfig {
    #[serde(flatten)]
    pub resources: ResourceSpec,

    #[serde(flatten)]
    pub fluctuation: FluctuationSpec,

    /// Offset before the workload starts: from the container's activation for
    /// internal workloads, from the start of the run for external ones
    #[serde(default)]
    pub delay: f64,

    /// Active lifespan
    pub duration: f64,

    /// Lower value is processed first; absent sorts last
    #[serde(default)]
    pub priority: Option<i64>,

    /// Free-text label, carried through to reports
    #[serde(default, rename = "type")]
    pub workload_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub name: String,

    #[serde(flatten)]
    pub resources: ResourceSpec,

    #[serde(flatten)]
    pub fluctuation: FluctuationSpec,

    #[serde(default)]
    pub start_up_delay: f64,

    #[serde(default)]
    pub workloads: Vec<WorkloadConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,

    #[serde(flatten)]
    pub resources: ResourceSpec,

    #[serde(flatten)]
    pub fluctuation: FluctuationSpec,

    #[serde(default)]
    pub start_up_delay: f64,

    /// `true` halts the node when demand cannot be satisfied, `false` throttles
    #[serde(default)]
    pub stop_lack_of_resource: bool,

    #[serde(default)]
    pub containers: Vec<ContainerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyParameters {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub fallback_strategy: FallbackStrategy,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for StrategyParameters {
    fn default() -> Self {
        StrategyParameters {
            max_attempts: default_max_attempts(),
            fallback_strategy: FallbackStrategy::default(),
        }
    }
}

/// External load balancer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default, rename = "type")]
    pub strategy: PlacementStrategy,

    #[serde(default)]
    pub reservation_enabled: bool,

    #[serde(default)]
    pub strategy_parameters: StrategyParameters,

    /// Container names, in scan order
    #[serde(default)]
    pub target_containers: Vec<String>,

    #[serde(default)]
    pub workloads: Vec<WorkloadConfig>,
}

fn default_enabled() -> bool {
    true
}

fn default_datacenter_name() -> String {
    "datacenter".to_string()
}

/// Root of the descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatacenterConfig {
    #[serde(default = "default_datacenter_name")]
    pub name: String,

    pub simulation: SimulationConfig,

    pub nodes: Vec<NodeConfig>,

    #[serde(default)]
    pub load_balancer: Option<LoadBalancerConfig>,
}

/// Name given to the n-th internal workload of a container
pub fn internal_workload_name(container: &str, index: usize) -> String {
    format!("{}/workload-{}", container, index)
}

/// Name given to the n-th external workload of the load balancer
pub fn external_workload_name(index: usize) -> String {
    format!("load-balancer/workload-{}", index)
}

impl DatacenterConfig {
    /// Parse and validate a JSON descriptor
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: DatacenterConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate an already decoded JSON value
    pub fn from_json_value(value: serde_json::Value) -> Result<Self> {
        let config: DatacenterConfig =
            serde_json::from_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON descriptor file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Check every constraint the engine relies on
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::EmptyDatacenter(self.name.clone()));
        }

        let duration = self.simulation.duration;
        if !(duration.is_finite() && duration > 0.0) {
            return Err(ConfigError::NonPositiveDuration(duration));
        }
        if let Some(tick) = self.simulation.tick {
            if !(tick.is_finite() && tick > 0.0) {
                return Err(ConfigError::NonPositiveTick(tick));
            }
        }

        let mut node_names = HashSet::new();
        let mut container_names = HashSet::new();

        for node in &self.nodes {
            if !node_names.insert(node.name.as_str()) {
                return Err(ConfigError::DuplicateName {
                    kind: EntityKind::Node,
                    name: node.name.clone(),
                });
            }
            check_resources(&node.name, &node.resources)?;
            check_fluctuation(&node.name, &node.fluctuation)?;
            check_time(&node.name, "start_up_delay", node.start_up_delay)?;

            for container in &node.containers {
                if !container_names.insert(container.name.as_str()) {
                    return Err(ConfigError::DuplicateName {
                        kind: EntityKind::Container,
                        name: container.name.clone(),
                    });
                }
                check_resources(&container.name, &container.resources)?;
                check_fluctuation(&container.name, &container.fluctuation)?;
                check_time(&container.name, "start_up_delay", container.start_up_delay)?;

                for (index, workload) in container.workloads.iter().enumerate() {
                    check_workload(&internal_workload_name(&container.name, index), workload)?;
                }
            }
        }

        if let Some(lb) = &self.load_balancer {
            if lb.strategy_parameters.max_attempts < 1 {
                return Err(ConfigError::InvalidMaxAttempts(lb.strategy_parameters.max_attempts));
            }
            for target in &lb.target_containers {
                if !container_names.contains(target.as_str()) {
                    return Err(ConfigError::UnresolvedTarget(target.clone()));
                }
            }
            for (index, workload) in lb.workloads.iter().enumerate() {
                check_workload(&external_workload_name(index), workload)?;
            }
        }

        Ok(())
    }

    /// Every time value in the descriptor, used to derive the tick size
    fn time_values(&self) -> Vec<f64> {
        let mut values = vec![self.simulation.duration];
        for node in &self.nodes {
            values.push(node.start_up_delay);
            for container in &node.containers {
                values.push(container.start_up_delay);
                for workload in &container.workloads {
                    values.push(workload.delay);
                    values.push(workload.duration);
                }
            }
        }
        if let Some(lb) = &self.load_balancer {
            for workload in &lb.workloads {
                values.push(workload.delay);
                values.push(workload.duration);
            }
        }
        values
    }

    /// Length of one tick in simulation time units.
    ///
    /// Uses `simulation.tick` when set, otherwise the finest decimal
    /// resolution among all time values (1.0 for integral descriptors).
    pub fn tick_size(&self) -> f64 {
        if let Some(tick) = self.simulation.tick {
            return tick;
        }
        let decimals = self
            .time_values()
            .into_iter()
            .map(decimal_places)
            .max()
            .unwrap_or(0);
        10f64.powi(-decimals)
    }

    /// Number of ticks the run lasts
    pub fn total_ticks(&self) -> Tick {
        let ticks = self.simulation.duration / self.tick_size();
        (ticks - 1e-9).ceil().max(1.0) as Tick
    }

    /// Convert a time value into a whole number of ticks
    pub fn to_ticks(&self, value: f64) -> Tick {
        (value / self.tick_size()).round().max(0.0) as Tick
    }

    pub fn seed(&self) -> Option<u64> {
        self.simulation.seed
    }
}

fn decimal_places(value: f64) -> i32 {
    (0..MAX_DERIVED_DECIMALS)
        .find(|&d| {
            let scaled = value * 10f64.powi(d);
            (scaled - scaled.round()).abs() < 1e-6
        })
        .unwrap_or(MAX_DERIVED_DECIMALS)
}

fn check_resources(entity: &str, spec: &ResourceSpec) -> std::result::Result<(), ConfigError> {
    for (field, value) in [("cpu", spec.cpu), ("ram", spec.ram), ("disk", spec.disk), ("bw", spec.bw)] {
        if !(value.is_finite() && value >= 0.0) {
            return Err(ConfigError::NegativeValue {
                entity: entity.to_string(),
                field,
                value,
            });
        }
    }
    Ok(())
}

fn check_fluctuation(entity: &str, spec: &FluctuationSpec) -> std::result::Result<(), ConfigError> {
    for (field, value) in [
        ("cpu_fluctuation_percent", spec.cpu_fluctuation_percent),
        ("ram_fluctuation_percent", spec.ram_fluctuation_percent),
        ("disk_fluctuation_percent", spec.disk_fluctuation_percent),
        ("bw_fluctuation_percent", spec.bw_fluctuation_percent),
    ] {
        if !(0.0..=100.0).contains(&value) {
            return Err(ConfigError::FluctuationOutOfRange {
                entity: entity.to_string(),
                field,
                value,
            });
        }
    }
    Ok(())
}

fn check_time(entity: &str, field: &'static str, value: f64) -> std::result::Result<(), ConfigError> {
    if !(value.is_finite() && value >= 0.0) {
        return Err(ConfigError::NegativeValue {
            entity: entity.to_string(),
            field,
            value,
        });
    }
    Ok(())
}

fn check_workload(entity: &str, workload: &WorkloadConfig) -> std::result::Result<(), ConfigError> {
    check_resources(entity, &workload.resources)?;
    check_fluctuation(entity, &workload.fluctuation)?;
    check_time(entity, "delay", workload.delay)?;
    check_time(entity, "duration", workload.duration)
}
