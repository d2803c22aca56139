//! Windowed utilization analysis
//!
//! Splits the tick axis into windows of `W` ticks, `[k*W, min((k+1)*W, T))`,
//! and summarizes every selected entity in every window. Analysis never
//! mutates the run, so it can be repeated with other windows or selections.

use dcsim_core::{EntityId, EntityKind, PlacementDecision, Resource, ResourceVector, Result, SimError, Tick};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::simulator::SimulationRun;
use crate::types::{SimEvent, UtilizationSample};

/// Which entities to analyze
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitySelector {
    All,
    Names(Vec<String>),
}

/// Min/max/mean per resource over a set of samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceStats {
    pub min: ResourceVector,
    pub max: ResourceVector,
    pub mean: ResourceVector,
}

impl ResourceStats {
    /// `None` for an empty sample set
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a UtilizationSample>) -> Option<Self> {
        let mut count = 0usize;
        let mut min = ResourceVector::splat(f64::INFINITY);
        let mut max = ResourceVector::splat(f64::NEG_INFINITY);
        let mut sum = ResourceVector::ZERO;

        for sample in samples {
            count += 1;
            min = min.min(&sample.usage);
            max = max.max(&sample.usage);
            sum += sample.usage;
        }

        if count == 0 {
            return None;
        }
        Some(ResourceStats {
            min,
            max,
            mean: sum.scale(1.0 / count as f64),
        })
    }
}

/// Admission outcomes decided inside a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementCounts {
    pub admitted: usize,
    pub rejected: usize,
    pub fallback: usize,
}

/// One (entity, window) record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub entity: String,
    pub kind: EntityKind,
    pub window: u64,
    pub start_tick: Tick,
    /// Exclusive
    pub end_tick: Tick,
    pub samples: usize,
    pub stats: Option<ResourceStats>,
    /// Overloaded ticks divided by window length
    pub overload_fraction: f64,
    /// External workloads only
    pub placements: Option<PlacementCounts>,
}

impl WindowSummary {
    pub fn len(&self) -> Tick {
        self.end_tick - self.start_tick
    }

    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }

    pub fn mean(&self, resource: Resource) -> Option<f64> {
        self.stats.map(|s| s.mean.get(resource))
    }
}

/// Whole-run means of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityOverview {
    pub entity: String,
    pub kind: EntityKind,
    pub samples: usize,
    /// Rounded to four decimals
    pub mean: Option<ResourceVector>,
    pub overloaded_ticks: usize,
}

/// Raw per-tick usage of one entity, one series per resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySeries {
    pub entity: String,
    pub kind: EntityKind,
    pub ticks: Vec<Tick>,
    pub cpu: Vec<f64>,
    pub ram: Vec<f64>,
    pub disk: Vec<f64>,
    pub bw: Vec<f64>,
}

/// Per-entity view of the run log, built in one pass.
///
/// The log is appended tick by tick, so every list here is ordered by tick.
struct LogIndex<'a> {
    samples: Vec<Vec<&'a UtilizationSample>>,
    overloads: Vec<Vec<Tick>>,
    placements: Vec<Vec<(Tick, PlacementDecision)>>,
}

impl<'a> LogIndex<'a> {
    fn build(run: &'a SimulationRun) -> Self {
        let entities = run.registry.len();
        let mut index = LogIndex {
            samples: vec![Vec::new(); entities],
            overloads: vec![Vec::new(); entities],
            placements: vec![Vec::new(); entities],
        };

        for sample in run.log.samples() {
            if let Some(list) = index.samples.get_mut(sample.entity.index()) {
                list.push(sample);
            }
        }
        for event in run.log.events() {
            match event {
                SimEvent::Overload { tick, entity, .. } => {
                    if let Some(list) = index.overloads.get_mut(entity.index()) {
                        list.push(*tick);
                    }
                }
                SimEvent::Placement { tick, workload, decision } => {
                    if let Some(list) = index.placements.get_mut(workload.index()) {
                        list.push((*tick, *decision));
                    }
                }
                _ => {}
            }
        }
        index
    }

    fn samples(&self, id: EntityId) -> &[&'a UtilizationSample] {
        self.samples.get(id.index()).map(Vec::as_slice).unwrap_or(&[])
    }

    fn overloads(&self, id: EntityId) -> &[Tick] {
        self.overloads.get(id.index()).map(Vec::as_slice).unwrap_or(&[])
    }

    fn placements(&self, id: EntityId) -> &[(Tick, PlacementDecision)] {
        self.placements.get(id.index()).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Split off the leading items of a tick-ordered slice that fall before `end`
fn take_before<'s, T>(items: &mut &'s [T], end: Tick, tick_of: impl Fn(&T) -> Tick) -> &'s [T] {
    let split = items.partition_point(|item| tick_of(item) < end);
    let (head, tail) = items.split_at(split);
    *items = tail;
    head
}

/// Read-only view over a finished run
pub struct Analyzer<'a> {
    run: &'a SimulationRun,
    index: LogIndex<'a>,
}

impl<'a> Analyzer<'a> {
    pub fn new(run: &'a SimulationRun) -> Self {
        Analyzer {
            run,
            index: LogIndex::build(run),
        }
    }

    /// Resolve a selector to entities, in registry order for `All` and
    /// in the given order otherwise
    pub fn select(&self, selector: &EntitySelector) -> Result<Vec<&'a Entity>> {
        match selector {
            EntitySelector::All => Ok(self.run.registry.iter().collect()),
            EntitySelector::Names(names) => names
                .iter()
                .map(|name| {
                    self.run
                        .registry
                        .by_name(name)
                        .ok_or_else(|| SimError::unknown_entity(name.as_str()))
                })
                .collect(),
        }
    }

    /// Number of windows of `window` ticks covering the run
    pub fn window_count(&self, window: Tick) -> Result<u64> {
        if window == 0 {
            return Err(SimError::ZeroWindow);
        }
        Ok(self.run.total_ticks().div_ceil(window))
    }

    /// One record per selected entity per window
    pub fn analyze(&self, selector: &EntitySelector, window: Tick) -> Result<Vec<WindowSummary>> {
        let windows = self.window_count(window)?;
        let total = self.run.total_ticks();
        let entities = self.select(selector)?;

        let mut records = Vec::with_capacity(entities.len() * windows as usize);
        for entity in entities {
            let mut samples = self.index.samples(entity.id);
            let mut overloads = self.index.overloads(entity.id);
            let mut placements = self.index.placements(entity.id);

            for index in 0..windows {
                let start = index * window;
                let end = ((index + 1) * window).min(total);

                let window_samples = take_before(&mut samples, end, |s| s.tick);
                let overloaded = take_before(&mut overloads, end, |t| *t).len();
                let window_placements = take_before(&mut placements, end, |(t, _)| *t);

                records.push(WindowSummary {
                    entity: entity.name.clone(),
                    kind: entity.kind,
                    window: index,
                    start_tick: start,
                    end_tick: end,
                    samples: window_samples.len(),
                    stats: ResourceStats::from_samples(window_samples.iter().copied()),
                    overload_fraction: overloaded as f64 / (end - start) as f64,
                    placements: entity.is_external().then(|| count_placements(window_placements)),
                });
            }
        }

        Ok(records)
    }

    /// Whole-run mean usage per selected entity
    pub fn overall(&self, selector: &EntitySelector) -> Result<Vec<EntityOverview>> {
        Ok(self
            .select(selector)?
            .into_iter()
            .map(|entity| {
                let samples = self.index.samples(entity.id);
                let stats = ResourceStats::from_samples(samples.iter().copied());
                EntityOverview {
                    entity: entity.name.clone(),
                    kind: entity.kind,
                    samples: samples.len(),
                    mean: stats.map(|s| s.mean.map(|_, v| round4(v))),
                    overloaded_ticks: self.index.overloads(entity.id).len(),
                }
            })
            .collect())
    }

    /// Raw reported usage per selected entity, tick by tick
    pub fn series(&self, selector: &EntitySelector) -> Result<Vec<EntitySeries>> {
        Ok(self
            .select(selector)?
            .into_iter()
            .map(|entity| {
                let samples = self.index.samples(entity.id);
                let column = |resource: Resource| -> Vec<f64> { samples.iter().map(|s| s.usage.get(resource)).collect() };
                EntitySeries {
                    entity: entity.name.clone(),
                    kind: entity.kind,
                    ticks: samples.iter().map(|s| s.tick).collect(),
                    cpu: column(Resource::Cpu),
                    ram: column(Resource::Ram),
                    disk: column(Resource::Disk),
                    bw: column(Resource::Bandwidth),
                }
            })
            .collect())
    }
}

fn count_placements(placements: &[(Tick, PlacementDecision)]) -> PlacementCounts {
    let mut counts = PlacementCounts::default();
    for (_, decision) in placements {
        match decision {
            PlacementDecision::Admitted { .. } => counts.admitted += 1,
            PlacementDecision::Fallback { .. } => counts.fallback += 1,
            PlacementDecision::Rejected { .. } => counts.rejected += 1,
            PlacementDecision::Deferred { .. } => {}
        }
    }
    counts
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
