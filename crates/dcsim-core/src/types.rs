//! Core types shared across dcsim components

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Simulation time, in whole ticks since the start of the run
pub type Tick = u64;

/// Tolerance used when comparing accumulated floating point demand
pub const CAPACITY_EPSILON: f64 = 1e-9;

/// One resource dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Cpu,
    Ram,
    Disk,
    Bandwidth,
}

impl Resource {
    /// All dimensions, in the fixed order used for random draws and reports
    pub const ALL: [Resource; 4] = [Resource::Cpu, Resource::Ram, Resource::Disk, Resource::Bandwidth];

    pub fn name(&self) -> &'static str {
        match self {
            Resource::Cpu => "cpu",
            Resource::Ram => "ram",
            Resource::Disk => "disk",
            Resource::Bandwidth => "bw",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value per resource dimension.
///
/// Used for capacities, nominal demand, reported usage, reservations and
/// fluctuation percents alike. Units: cpu in cores, ram and disk in MB,
/// bandwidth in Mbps.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceVector {
    pub cpu: f64,
    pub ram: f64,
    pub disk: f64,
    pub bandwidth: f64,
}

impl ResourceVector {
    pub const ZERO: ResourceVector = ResourceVector { cpu: 0.0, ram: 0.0, disk: 0.0, bandwidth: 0.0 };

    pub fn new(cpu: f64, ram: f64, disk: f64, bandwidth: f64) -> Self {
        ResourceVector { cpu, ram, disk, bandwidth }
    }

    /// Same value on every dimension
    pub fn splat(value: f64) -> Self {
        ResourceVector::new(value, value, value, value)
    }

    pub fn get(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Cpu => self.cpu,
            Resource::Ram => self.ram,
            Resource::Disk => self.disk,
            Resource::Bandwidth => self.bandwidth,
        }
    }

    pub fn get_mut(&mut self, resource: Resource) -> &mut f64 {
        match resource {
            Resource::Cpu => &mut self.cpu,
            Resource::Ram => &mut self.ram,
            Resource::Disk => &mut self.disk,
            Resource::Bandwidth => &mut self.bandwidth,
        }
    }

    /// Apply `f` to every dimension
    pub fn map(&self, mut f: impl FnMut(Resource, f64) -> f64) -> Self {
        let mut out = *self;
        for resource in Resource::ALL {
            *out.get_mut(resource) = f(resource, self.get(resource));
        }
        out
    }

    /// Combine two vectors dimension by dimension
    pub fn zip_with(&self, other: &ResourceVector, mut f: impl FnMut(f64, f64) -> f64) -> Self {
        self.map(|resource, value| f(value, other.get(resource)))
    }

    /// Per-dimension minimum
    pub fn min(&self, other: &ResourceVector) -> Self {
        self.zip_with(other, f64::min)
    }

    /// Per-dimension maximum
    pub fn max(&self, other: &ResourceVector) -> Self {
        self.zip_with(other, f64::max)
    }

    /// Clamp every dimension into `[0, upper]`
    pub fn clamp_to(&self, upper: &ResourceVector) -> Self {
        self.zip_with(upper, |value, cap| value.max(0.0).min(cap.max(0.0)))
    }

    /// Subtract, flooring each dimension at zero
    pub fn saturating_sub(&self, other: &ResourceVector) -> Self {
        self.zip_with(other, |a, b| (a - b).max(0.0))
    }

    /// Multiply each dimension by `1 + factor` for the matching factor
    pub fn perturb(&self, factors: &ResourceVector) -> Self {
        self.zip_with(factors, |value, factor| value * (1.0 + factor))
    }

    pub fn scale(&self, by: f64) -> Self {
        self.map(|_, value| value * by)
    }

    /// True when every dimension is `<=` the matching dimension of `capacity`
    pub fn fits_within(&self, capacity: &ResourceVector) -> bool {
        Resource::ALL
            .iter()
            .all(|&r| self.get(r) <= capacity.get(r) + CAPACITY_EPSILON)
    }

    /// Dimensions on which `self` is above `capacity`
    pub fn exceeded_dimensions(&self, capacity: &ResourceVector) -> Vec<Resource> {
        Resource::ALL
            .into_iter()
            .filter(|&r| self.get(r) > capacity.get(r) + CAPACITY_EPSILON)
            .collect()
    }

    pub fn is_finite(&self) -> bool {
        Resource::ALL.iter().all(|&r| self.get(r).is_finite())
    }

    pub fn is_non_negative(&self) -> bool {
        Resource::ALL.iter().all(|&r| self.get(r) >= 0.0)
    }
}

impl Add for ResourceVector {
    type Output = ResourceVector;

    fn add(self, rhs: ResourceVector) -> ResourceVector {
        self.zip_with(&rhs, |a, b| a + b)
    }
}

impl AddAssign for ResourceVector {
    fn add_assign(&mut self, rhs: ResourceVector) {
        *self = *self + rhs;
    }
}

impl Sub for ResourceVector {
    type Output = ResourceVector;

    fn sub(self, rhs: ResourceVector) -> ResourceVector {
        self.zip_with(&rhs, |a, b| a - b)
    }
}

impl std::iter::Sum for ResourceVector {
    fn sum<I: Iterator<Item = ResourceVector>>(iter: I) -> Self {
        iter.fold(ResourceVector::ZERO, |acc, v| acc + v)
    }
}

impl fmt::Display for ResourceVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu={:.2} ram={:.2} disk={:.2} bw={:.2}",
            self.cpu, self.ram, self.disk, self.bandwidth
        )
    }
}

/// Unique identifier of an entity inside one simulation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl EntityId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Level of an entity in the node → container → workload hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Node,
    Container,
    Workload,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Node => write!(f, "node"),
            EntityKind::Container => write!(f, "container"),
            EntityKind::Workload => write!(f, "workload"),
        }
    }
}

/// Lifecycle state of any entity
///
/// Transitions only move forward:
/// `Pending → Starting → Active → {Completed | Failed}`.
/// `Rejected` is reachable from `Pending` only (external workloads the load
/// balancer could not place) and `Failed` from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    Pending,
    Starting,
    Active,
    Completed,
    Failed,
    Rejected,
}

impl LifecycleState {
    fn rank(&self) -> u8 {
        match self {
            LifecycleState::Pending => 0,
            LifecycleState::Starting => 1,
            LifecycleState::Active => 2,
            LifecycleState::Completed | LifecycleState::Failed | LifecycleState::Rejected => 3,
        }
    }

    /// Live entities emit one utilization sample per tick
    pub fn is_live(&self) -> bool {
        matches!(self, LifecycleState::Starting | LifecycleState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 3
    }

    /// Whether moving from `self` to `next` respects monotonic ordering
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            LifecycleState::Rejected => *self == LifecycleState::Pending,
            LifecycleState::Completed => *self == LifecycleState::Active,
            LifecycleState::Failed => true,
            _ => next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// What a host does when its children demand more than its capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverloadPolicy {
    /// The host fails and takes all descendants down with it
    Halt,
    /// Demand is capped at capacity and an overload event is recorded
    Throttle,
}

impl OverloadPolicy {
    /// `stop_lack_of_resource = true` halts, `false` throttles
    pub fn from_stop_lack_of_resource(stop: bool) -> Self {
        if stop {
            OverloadPolicy::Halt
        } else {
            OverloadPolicy::Throttle
        }
    }
}

/// Where a workload came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadOrigin {
    /// Declared inside a container's configuration
    Internal,
    /// Declared on the load balancer and placed at runtime
    External,
}

/// Primary placement strategy of the load balancer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementStrategy {
    /// First target whose free capacity covers the demand; no bookkeeping
    ClassicFirstFit,

    /// First target whose free capacity minus open reservations covers the
    /// demand; the demand is reserved until the workload activates
    #[default]
    FirstFitWithReservations,
}

impl fmt::Display for PlacementStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementStrategy::ClassicFirstFit => write!(f, "classic-first-fit"),
            PlacementStrategy::FirstFitWithReservations => write!(f, "first-fit-with-reservations"),
        }
    }
}

/// Strategy used once the primary strategy ran out of attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackStrategy {
    #[default]
    RoundRobin,
}

impl fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackStrategy::RoundRobin => write!(f, "round-robin"),
        }
    }
}

/// Outcome of one admission attempt for an external workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementDecision {
    /// The primary strategy found a qualifying container
    Admitted { container: EntityId, attempt: u32 },
    /// No container qualified; the workload will be retried next tick
    Deferred { attempt: u32 },
    /// Attempts exhausted; placed by the fallback strategy without a capacity check
    Fallback { container: EntityId, attempts: u32 },
    /// Attempts exhausted and no fallback target was usable
    Rejected { attempts: u32 },
}

impl PlacementDecision {
    /// Container that received the workload, if any
    pub fn container(&self) -> Option<EntityId> {
        match self {
            PlacementDecision::Admitted { container, .. }
            | PlacementDecision::Fallback { container, .. } => Some(*container),
            _ => None,
        }
    }

    /// Whether this decision ends the admission process
    pub fn is_final(&self) -> bool {
        !matches!(self, PlacementDecision::Deferred { .. })
    }
}
