//! Tick-driven datacenter simulator
//!
//! Each tick runs, strictly in this order:
//! 1. lifecycle advance (nodes, containers, workloads)
//! 2. fluctuation resample for Active entities
//! 3. load balancer placement pass
//! 4. bottom-up aggregation and overload resolution
//! 5. one utilization sample per live entity
//!
//! All run state sits in one [`SimContext`] owned by the [`Simulator`], so
//! independent simulators can run on separate threads.

use dcsim_core::{
    EntityId, EntityKind, FluctuationSource, LifecycleState, OverloadPolicy, PlacementDecision,
    ResourceVector, Result, SimError, Tick,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DatacenterConfig;
use crate::entity::{Entity, EntityRegistry};
use crate::fluctuation::{perturb, FluctuationModel};
use crate::placement::{LoadBalancer, ReservationTable, RoundRobinCursor};
use crate::types::{EventLog, SimEvent, UtilizationSample};

/// Discrete simulation clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimClock {
    tick: Tick,
    total_ticks: Tick,
    tick_size: f64,
}

impl SimClock {
    pub fn new(total_ticks: Tick, tick_size: f64) -> Self {
        SimClock {
            tick: 0,
            total_ticks,
            tick_size,
        }
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn set(&mut self, tick: Tick) {
        self.tick = tick;
    }

    pub fn total_ticks(&self) -> Tick {
        self.total_ticks
    }

    pub fn tick_size(&self) -> f64 {
        self.tick_size
    }

    /// Simulation time at the current tick
    pub fn now(&self) -> f64 {
        self.tick as f64 * self.tick_size
    }
}

/// Mutable state of one run
pub struct SimContext {
    pub clock: SimClock,
    pub fluctuation: FluctuationModel,
    pub reservations: ReservationTable,
    pub cursor: RoundRobinCursor,
    pub log: EventLog,
}

impl SimContext {
    pub fn new(total_ticks: Tick, tick_size: f64, fluctuation: FluctuationModel) -> Self {
        SimContext {
            clock: SimClock::new(total_ticks, tick_size),
            fluctuation,
            reservations: ReservationTable::new(),
            cursor: RoundRobinCursor::new(),
            log: EventLog::new(),
        }
    }
}

/// Counts describing a finished run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub datacenter: String,
    pub seed: u64,
    pub strategy: Option<String>,
    pub total_ticks: Tick,
    pub tick_size: f64,
    pub entities: usize,
    pub samples: usize,
    pub overloads: usize,
    pub failures: usize,
    pub admitted: usize,
    pub deferred: usize,
    pub fallbacks: usize,
    pub rejected: usize,
    pub reservations_created: usize,
    pub reservations_consumed: usize,
    pub reservations_discarded: usize,
    pub completed_workloads: usize,
    pub never_placed: usize,
}

impl SimulationSummary {
    fn collect(header: SimulationSummary, registry: &EntityRegistry, log: &EventLog) -> Self {
        let mut summary = SimulationSummary {
            entities: registry.len(),
            samples: log.samples().len(),
            ..header
        };

        for event in log.events() {
            match event {
                SimEvent::Overload { .. } => summary.overloads += 1,
                SimEvent::EntityFailed { .. } => summary.failures += 1,
                SimEvent::Placement { decision, .. } => match decision {
                    PlacementDecision::Admitted { .. } => summary.admitted += 1,
                    PlacementDecision::Deferred { .. } => summary.deferred += 1,
                    PlacementDecision::Fallback { .. } => summary.fallbacks += 1,
                    PlacementDecision::Rejected { .. } => summary.rejected += 1,
                },
                SimEvent::ReservationCreated { .. } => summary.reservations_created += 1,
                SimEvent::ReservationConsumed { .. } => summary.reservations_consumed += 1,
                SimEvent::ReservationDiscarded { .. } => summary.reservations_discarded += 1,
                SimEvent::StateChanged { .. } => {}
            }
        }

        for entity in registry.iter().filter(|e| e.kind == EntityKind::Workload) {
            match entity.state {
                LifecycleState::Completed => summary.completed_workloads += 1,
                LifecycleState::Pending if entity.is_external() => summary.never_placed += 1,
                _ => {}
            }
        }

        summary
    }
}

/// Placement history of one external workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementRecord {
    pub workload: String,
    pub attempts: Vec<(Tick, PlacementDecision)>,
    /// Final decision, if one was reached
    pub outcome: Option<PlacementDecision>,
}

/// Immutable result of a finished simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationRun {
    pub registry: EntityRegistry,
    pub log: EventLog,
    pub summary: SimulationSummary,
}

impl SimulationRun {
    pub fn total_ticks(&self) -> Tick {
        self.summary.total_ticks
    }

    pub fn tick_size(&self) -> f64 {
        self.summary.tick_size
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.registry.by_name(name)
    }

    /// Samples of one entity, ordered by tick
    pub fn samples_of(&self, name: &str) -> Result<Vec<&UtilizationSample>> {
        let id = self
            .registry
            .id_of(name)
            .ok_or_else(|| SimError::unknown_entity(name))?;
        Ok(self.log.samples_for(id).collect())
    }

    /// Placement history of an external workload; `None` for other entities
    pub fn placement_record(&self, name: &str) -> Option<PlacementRecord> {
        let entity = self.registry.by_name(name)?;
        if !entity.is_external() {
            return None;
        }
        let attempts: Vec<_> = self.log.placements_for(entity.id).collect();
        let outcome = attempts
            .iter()
            .map(|(_, decision)| *decision)
            .find(PlacementDecision::is_final);
        Some(PlacementRecord {
            workload: entity.name.clone(),
            attempts,
            outcome,
        })
    }
}

/// Datacenter simulator
pub struct Simulator {
    name: String,
    seed: u64,
    registry: EntityRegistry,
    balancer: Option<LoadBalancer>,
    ctx: SimContext,
}

impl Simulator {
    /// Create a simulator whose fluctuation is driven by a seeded generator
    pub fn new(config: &DatacenterConfig, seed: u64) -> Result<Self> {
        Self::build(config, seed, FluctuationModel::seeded(seed))
    }

    /// Create a simulator with an injected fluctuation source
    pub fn with_source(config: &DatacenterConfig, source: Box<dyn FluctuationSource>) -> Result<Self> {
        Self::build(config, 0, FluctuationModel::new(source))
    }

    fn build(config: &DatacenterConfig, seed: u64, fluctuation: FluctuationModel) -> Result<Self> {
        config.validate()?;

        let registry = EntityRegistry::from_config(config);
        let balancer = config
            .load_balancer
            .as_ref()
            .map(|lb| LoadBalancer::from_config(lb, &registry))
            .transpose()?;
        let ctx = SimContext::new(config.total_ticks(), config.tick_size(), fluctuation);

        Ok(Simulator {
            name: config.name.clone(),
            seed,
            registry,
            balancer,
            ctx,
        })
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn clock(&self) -> &SimClock {
        &self.ctx.clock
    }

    /// Run every tick and hand back the finished run
    pub fn run(mut self) -> Result<SimulationRun> {
        let total_ticks = self.ctx.clock.total_ticks();
        info!(
            datacenter = %self.name,
            seed = self.seed,
            total_ticks,
            tick_size = self.ctx.clock.tick_size(),
            entities = self.registry.len(),
            fluctuation = self.ctx.fluctuation.source_name(),
            "simulation started"
        );

        for tick in 0..total_ticks {
            self.step(tick)?;
        }

        let last_tick = total_ticks.saturating_sub(1);
        for reservation in self.ctx.reservations.drain() {
            self.ctx.log.record(SimEvent::ReservationDiscarded {
                tick: last_tick,
                container: reservation.container,
                workload: reservation.workload,
            });
        }

        let header = SimulationSummary {
            datacenter: self.name.clone(),
            seed: self.seed,
            strategy: self.balancer.as_ref().map(|b| b.strategy_name().to_string()),
            total_ticks,
            tick_size: self.ctx.clock.tick_size(),
            ..SimulationSummary::default()
        };
        let summary = SimulationSummary::collect(header, &self.registry, &self.ctx.log);
        info!(
            samples = summary.samples,
            overloads = summary.overloads,
            failures = summary.failures,
            admitted = summary.admitted,
            fallbacks = summary.fallbacks,
            rejected = summary.rejected,
            "simulation finished"
        );

        Ok(SimulationRun {
            registry: self.registry,
            log: self.ctx.log,
            summary,
        })
    }

    /// Execute one tick
    pub fn step(&mut self, tick: Tick) -> Result<()> {
        self.ctx.clock.set(tick);

        // 1. lifecycle
        let activated = self.registry.advance_lifecycle(tick, &mut self.ctx.log)?;
        for workload in activated {
            if let Some(reservation) = self.ctx.reservations.take(workload) {
                self.ctx.log.record(SimEvent::ReservationConsumed {
                    tick,
                    container: reservation.container,
                    workload,
                });
            }
        }

        // 2. fluctuation
        self.resample();

        // 3. placement
        if let Some(balancer) = self.balancer.as_mut() {
            balancer.admit(&mut self.ctx, &mut self.registry)?;
        }

        // 4. aggregation and overload resolution
        self.aggregate(tick)?;
        self.check_invariants(tick)?;

        // 5. samples
        self.emit_samples(tick);
        Ok(())
    }

    fn resample(&mut self) {
        for id in self.registry.ids().collect::<Vec<_>>() {
            let Some(entity) = self.registry.get_mut(id) else {
                continue;
            };
            entity.factors = if entity.is_active() {
                self.ctx.fluctuation.sample_factors(&entity.fluctuation)
            } else {
                ResourceVector::ZERO
            };
        }
    }

    fn aggregate(&mut self, tick: Tick) -> Result<()> {
        for id in self.registry.ids().collect::<Vec<_>>() {
            if let Some(entity) = self.registry.get_mut(id) {
                if !entity.is_active() {
                    entity.reported = ResourceVector::ZERO;
                    entity.demand = ResourceVector::ZERO;
                }
            }
        }

        for node in self.registry.nodes().to_vec() {
            let containers = self.registry.require(node)?.children.clone();
            let mut node_raw = ResourceVector::ZERO;

            for container in containers {
                if !self.registry.require(container)?.is_active() {
                    continue;
                }

                let workloads = self.registry.require(container)?.children.clone();
                let mut container_raw = ResourceVector::ZERO;
                for workload in workloads {
                    let Some(entity) = self.registry.get_mut(workload) else {
                        continue;
                    };
                    if !entity.is_active() {
                        continue;
                    }
                    entity.reported = perturb(&entity.nominal, &entity.factors, &entity.capacity);
                    container_raw += entity.reported;
                }

                if let Some(reported) = self.resolve_host(container, container_raw, tick)? {
                    node_raw += reported;
                }
            }

            if self.registry.require(node)?.is_active() {
                self.resolve_host(node, node_raw, tick)?;
            }
        }

        Ok(())
    }

    /// Apply the overload policy to a host and compute its reported usage.
    ///
    /// Returns `None` when the host failed.
    fn resolve_host(&mut self, host: EntityId, raw: ResourceVector, tick: Tick) -> Result<Option<ResourceVector>> {
        let entity = self.registry.require(host)?;
        let (capacity, policy) = (entity.capacity, entity.policy);
        let exceeded = raw.exceeded_dimensions(&capacity);

        let demand = if exceeded.is_empty() {
            raw
        } else {
            match policy {
                OverloadPolicy::Throttle => {
                    warn!(tick, host = %entity.name, ?exceeded, "demand above capacity, throttled");
                    self.ctx.log.record(SimEvent::Overload {
                        tick,
                        entity: host,
                        raw,
                        capacity,
                        dimensions: exceeded,
                    });
                    raw.min(&capacity)
                }
                OverloadPolicy::Halt => {
                    warn!(tick, host = %entity.name, ?exceeded, "demand above capacity, halting");
                    self.fail(host, tick)?;
                    return Ok(None);
                }
            }
        };

        let entity = self.registry.require_mut(host)?;
        entity.demand = demand;
        entity.reported = perturb(&demand, &entity.factors, &capacity);
        Ok(Some(entity.reported))
    }

    /// Fail a host with its whole subtree and drop their reservations
    fn fail(&mut self, host: EntityId, tick: Tick) -> Result<()> {
        let failed = self.registry.fail_subtree(host, tick, &mut self.ctx.log)?;
        for id in failed {
            if let Some(reservation) = self.ctx.reservations.take(id) {
                self.ctx.log.record(SimEvent::ReservationDiscarded {
                    tick,
                    container: reservation.container,
                    workload: id,
                });
            }
        }
        Ok(())
    }

    fn check_invariants(&self, tick: Tick) -> Result<()> {
        for entity in self.registry.iter().filter(|e| e.state.is_live()) {
            let reported = &entity.reported;
            if !reported.is_finite() || !reported.is_non_negative() || !reported.fits_within(&entity.capacity) {
                return Err(SimError::invariant(
                    tick,
                    format!("{} reports {} against capacity {}", entity.name, reported, entity.capacity),
                ));
            }
            if entity.kind != EntityKind::Workload && !entity.demand.fits_within(&entity.capacity) {
                return Err(SimError::invariant(
                    tick,
                    format!("{} demand {} exceeds capacity {}", entity.name, entity.demand, entity.capacity),
                ));
            }
        }
        Ok(())
    }

    fn emit_samples(&mut self, tick: Tick) {
        for entity in self.registry.iter().filter(|e| e.state.is_live()) {
            self.ctx.log.push_sample(UtilizationSample {
                tick,
                entity: entity.id,
                name: entity.name.clone(),
                kind: entity.kind,
                usage: entity.reported,
                capacity: entity.capacity,
                state: entity.state,
            });
        }
        debug!(tick, time = self.ctx.clock.now(), samples = self.ctx.log.samples().len(), "tick done");
    }
}
