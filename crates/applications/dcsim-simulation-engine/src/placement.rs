//! Load balancer placement
//!
//! External workloads are admitted onto target containers by a first-fit
//! scan. Two fit strategies are available:
//! - Classic first fit: free capacity is `capacity - active demand`
//! - First fit with reservations: open reservations and the demand of every
//!   committed workload that has not activated yet are subtracted as well,
//!   and every admission reserves the workload's full demand until it
//!   activates
//!
//! A workload gets one attempt per tick. Once `max_attempts` attempts found
//! nothing, the fallback strategy places it without a capacity check, or the
//! workload is rejected when no target is usable.

use std::collections::BTreeMap;

use dcsim_core::{
    ConfigError, EntityId, FallbackStrategy, LifecycleState, PlacementDecision, PlacementStrategy,
    ResourceVector, Result, Tick,
};
use tracing::{debug, info, warn};

use crate::config::LoadBalancerConfig;
use crate::entity::{Entity, EntityRegistry};
use crate::simulator::SimContext;
use crate::types::SimEvent;

/// Demand held on a container for an admitted, not yet active workload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reservation {
    pub container: EntityId,
    pub workload: EntityId,
    pub amount: ResourceVector,
    pub reserved_at: Tick,
}

/// Open reservations, grouped per container
#[derive(Debug, Clone, Default)]
pub struct ReservationTable {
    by_container: BTreeMap<EntityId, Vec<Reservation>>,
}

impl ReservationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reservation: Reservation) {
        self.by_container
            .entry(reservation.container)
            .or_default()
            .push(reservation);
    }

    /// Total amount currently reserved on `container`
    pub fn reserved_on(&self, container: EntityId) -> ResourceVector {
        self.by_container
            .get(&container)
            .map(|list| list.iter().map(|r| r.amount).sum())
            .unwrap_or(ResourceVector::ZERO)
    }

    /// Remove and return the reservation held for `workload`
    pub fn take(&mut self, workload: EntityId) -> Option<Reservation> {
        let mut found = None;
        for list in self.by_container.values_mut() {
            if let Some(pos) = list.iter().position(|r| r.workload == workload) {
                found = Some(list.remove(pos));
                break;
            }
        }
        self.by_container.retain(|_, list| !list.is_empty());
        found
    }

    pub fn contains(&self, workload: EntityId) -> bool {
        self.iter().any(|r| r.workload == workload)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reservation> {
        self.by_container.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.by_container.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_container.is_empty()
    }

    /// Remove every open reservation
    pub fn drain(&mut self) -> Vec<Reservation> {
        std::mem::take(&mut self.by_container)
            .into_values()
            .flatten()
            .collect()
    }
}

/// Shared rotation over the target list.
///
/// The cursor rests on the first target; every pick hands out the next
/// usable target after it and moves onto that one.
#[derive(Debug, Clone, Default)]
pub struct RoundRobinCursor {
    current: usize,
}

impl RoundRobinCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pick(&mut self, targets: &[EntityId], usable: impl Fn(EntityId) -> bool) -> Option<EntityId> {
        let len = targets.len();
        for offset in 1..=len {
            let index = (self.current + offset) % len;
            if usable(targets[index]) {
                self.current = index;
                return Some(targets[index]);
            }
        }
        None
    }

    /// Index of the target handed out last
    pub fn position(&self) -> usize {
        self.current
    }
}

/// How a strategy judges free capacity on a container
pub trait FitStrategy: Send {
    /// Capacity left for new admissions on `container`
    fn remaining(&self, container: &Entity, registry: &EntityRegistry, reservations: &ReservationTable) -> ResourceVector;

    /// Whether admissions made by this strategy hold a reservation
    fn reserves(&self) -> bool;

    /// Get strategy name
    fn name(&self) -> &str;
}

/// First target whose unused capacity covers the demand
pub struct ClassicFirstFit;

impl FitStrategy for ClassicFirstFit {
    fn remaining(&self, container: &Entity, registry: &EntityRegistry, _reservations: &ReservationTable) -> ResourceVector {
        container.capacity.saturating_sub(&registry.active_demand(container.id))
    }

    fn reserves(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "classic-first-fit"
    }
}

/// First target whose uncommitted capacity covers the demand.
///
/// Committed means active, reserved, or attached and still waiting to
/// activate (internal workloads inside their delay, fallback placements).
pub struct ReservationFirstFit;

impl FitStrategy for ReservationFirstFit {
    fn remaining(&self, container: &Entity, registry: &EntityRegistry, reservations: &ReservationTable) -> ResourceVector {
        let waiting = registry.committed_demand(container.id, |w| reservations.contains(w));
        container
            .capacity
            .saturating_sub(&registry.active_demand(container.id))
            .saturating_sub(&reservations.reserved_on(container.id))
            .saturating_sub(&waiting)
    }

    fn reserves(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "first-fit-with-reservations"
    }
}

/// Pick the fit strategy for a load balancer configuration
pub fn fit_strategy(strategy: PlacementStrategy, reservation_enabled: bool) -> Box<dyn FitStrategy> {
    match (strategy, reservation_enabled) {
        (PlacementStrategy::FirstFitWithReservations, true) => Box::new(ReservationFirstFit),
        (PlacementStrategy::FirstFitWithReservations, false) => Box::new(ClassicFirstFit),
        (PlacementStrategy::ClassicFirstFit, reserve) => {
            if reserve {
                warn!("reservation_enabled has no effect with classic-first-fit");
            }
            Box::new(ClassicFirstFit)
        }
    }
}

/// An external workload waiting for a decision
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionRequest {
    pub workload: EntityId,
    pub arrival: Tick,
    pub priority: Option<i64>,
    pub declaration: usize,
    pub attempts: u32,
}

impl AdmissionRequest {
    /// Ascending priority, absent last, then declaration order
    fn order_key(&self) -> (bool, i64, usize) {
        (self.priority.is_none(), self.priority.unwrap_or(i64::MAX), self.declaration)
    }
}

/// Admits external workloads onto target containers
pub struct LoadBalancer {
    enabled: bool,
    strategy: Box<dyn FitStrategy>,
    fallback: FallbackStrategy,
    max_attempts: u32,
    targets: Vec<EntityId>,
    queue: Vec<AdmissionRequest>,
}

impl LoadBalancer {
    /// Resolve targets and queue every external workload of the registry
    pub fn from_config(config: &LoadBalancerConfig, registry: &EntityRegistry) -> Result<Self> {
        let targets = config
            .target_containers
            .iter()
            .map(|name| {
                registry
                    .id_of(name)
                    .ok_or_else(|| ConfigError::UnresolvedTarget(name.clone()))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let queue = registry
            .external_workloads()
            .iter()
            .filter_map(|&id| registry.get(id))
            .filter_map(|entity| {
                entity.workload.as_ref().map(|meta| AdmissionRequest {
                    workload: entity.id,
                    arrival: meta.delay,
                    priority: meta.priority,
                    declaration: meta.declaration,
                    attempts: 0,
                })
            })
            .collect();

        let strategy = fit_strategy(config.strategy, config.reservation_enabled);
        info!(
            strategy = strategy.name(),
            fallback = %config.strategy_parameters.fallback_strategy,
            max_attempts = config.strategy_parameters.max_attempts,
            targets = targets.len(),
            enabled = config.enabled,
            "load balancer configured"
        );

        Ok(LoadBalancer {
            enabled: config.enabled,
            strategy,
            fallback: config.strategy_parameters.fallback_strategy,
            max_attempts: config.strategy_parameters.max_attempts,
            targets,
            queue,
        })
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Requests still waiting for a final decision
    pub fn pending(&self) -> &[AdmissionRequest] {
        &self.queue
    }

    /// Run one placement pass: every due request gets exactly one attempt
    pub fn admit(&mut self, ctx: &mut SimContext, registry: &mut EntityRegistry) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let tick = ctx.clock.tick();
        let mut due: Vec<AdmissionRequest> = Vec::new();
        self.queue.retain(|request| {
            if request.arrival <= tick {
                due.push(request.clone());
                false
            } else {
                true
            }
        });
        due.sort_by_key(AdmissionRequest::order_key);

        for mut request in due {
            request.attempts += 1;
            let decision = self.attempt(&request, tick, ctx, registry)?;
            ctx.log.record(SimEvent::Placement {
                tick,
                workload: request.workload,
                decision,
            });
            if !decision.is_final() {
                self.queue.push(request);
            }
        }

        self.queue.sort_by_key(AdmissionRequest::order_key);
        Ok(())
    }

    fn attempt(
        &mut self,
        request: &AdmissionRequest,
        tick: Tick,
        ctx: &mut SimContext,
        registry: &mut EntityRegistry,
    ) -> Result<PlacementDecision> {
        let workload = request.workload;
        let demand = registry.require(workload)?.nominal;
        let name = registry.require(workload)?.name.clone();

        if let Some(container) = self.first_fit(demand, registry, ctx) {
            registry.attach(workload, container)?;
            registry.transition(workload, LifecycleState::Starting, tick, &mut ctx.log)?;
            if self.strategy.reserves() {
                ctx.reservations.insert(Reservation {
                    container,
                    workload,
                    amount: demand,
                    reserved_at: tick,
                });
                ctx.log.record(SimEvent::ReservationCreated {
                    tick,
                    container,
                    workload,
                    amount: demand,
                });
            }
            let container_name = registry.require(container)?.name.clone();
            info!(
                tick,
                workload = %name,
                container = %container_name,
                attempt = request.attempts,
                strategy = self.strategy.name(),
                "workload admitted"
            );
            return Ok(PlacementDecision::Admitted {
                container,
                attempt: request.attempts,
            });
        }

        if request.attempts < self.max_attempts {
            debug!(tick, workload = %name, attempt = request.attempts, "no container fits, retrying");
            return Ok(PlacementDecision::Deferred {
                attempt: request.attempts,
            });
        }

        let fallback = match self.fallback {
            FallbackStrategy::RoundRobin => ctx
                .cursor
                .pick(&self.targets, |id| registry.state(id) != LifecycleState::Failed),
        };

        match fallback {
            Some(container) => {
                registry.attach(workload, container)?;
                registry.transition(workload, LifecycleState::Starting, tick, &mut ctx.log)?;
                let container_name = registry.require(container)?.name.clone();
                warn!(
                    tick,
                    workload = %name,
                    container = %container_name,
                    attempts = request.attempts,
                    fallback = %self.fallback,
                    "attempts exhausted, placed by fallback"
                );
                Ok(PlacementDecision::Fallback {
                    container,
                    attempts: request.attempts,
                })
            }
            None => {
                registry.transition(workload, LifecycleState::Rejected, tick, &mut ctx.log)?;
                warn!(tick, workload = %name, attempts = request.attempts, "no usable target, workload rejected");
                Ok(PlacementDecision::Rejected {
                    attempts: request.attempts,
                })
            }
        }
    }

    /// First non-failed target, in configured order, with room for `demand`
    fn first_fit(&self, demand: ResourceVector, registry: &EntityRegistry, ctx: &SimContext) -> Option<EntityId> {
        self.targets.iter().copied().find(|&id| {
            let Some(container) = registry.get(id) else {
                return false;
            };
            if container.state == LifecycleState::Failed {
                return false;
            }
            let remaining = self.strategy.remaining(container, registry, &ctx.reservations);
            demand.fits_within(&remaining)
        })
    }
}
