//! Records produced by a simulation run

use dcsim_core::{
    EntityId, EntityKind, LifecycleState, PlacementDecision, Resource, ResourceVector, Tick,
};
use serde::{Deserialize, Serialize};

/// Reported usage of one live entity at one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSample {
    pub tick: Tick,
    pub entity: EntityId,
    pub name: String,
    pub kind: EntityKind,
    pub usage: ResourceVector,
    pub capacity: ResourceVector,
    pub state: LifecycleState,
}

/// Anything noteworthy that is not a utilization sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SimEvent {
    /// A throttled host was asked for more than its capacity
    Overload {
        tick: Tick,
        entity: EntityId,
        raw: ResourceVector,
        capacity: ResourceVector,
        dimensions: Vec<Resource>,
    },

    /// An entity failed; `origin` is the host whose overload caused it
    EntityFailed {
        tick: Tick,
        entity: EntityId,
        origin: EntityId,
    },

    StateChanged {
        tick: Tick,
        entity: EntityId,
        from: LifecycleState,
        to: LifecycleState,
    },

    /// One admission attempt for an external workload
    Placement {
        tick: Tick,
        workload: EntityId,
        decision: PlacementDecision,
    },

    ReservationCreated {
        tick: Tick,
        container: EntityId,
        workload: EntityId,
        amount: ResourceVector,
    },

    ReservationConsumed {
        tick: Tick,
        container: EntityId,
        workload: EntityId,
    },

    ReservationDiscarded {
        tick: Tick,
        container: EntityId,
        workload: EntityId,
    },
}

impl SimEvent {
    pub fn tick(&self) -> Tick {
        match self {
            SimEvent::Overload { tick, .. }
            | SimEvent::EntityFailed { tick, .. }
            | SimEvent::StateChanged { tick, .. }
            | SimEvent::Placement { tick, .. }
            | SimEvent::ReservationCreated { tick, .. }
            | SimEvent::ReservationConsumed { tick, .. }
            | SimEvent::ReservationDiscarded { tick, .. } => *tick,
        }
    }
}

/// Append-only log of everything a run produced
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    samples: Vec<UtilizationSample>,
    events: Vec<SimEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_sample(&mut self, sample: UtilizationSample) {
        self.samples.push(sample);
    }

    pub fn record(&mut self, event: SimEvent) {
        self.events.push(event);
    }

    /// All samples, ordered by tick
    pub fn samples(&self) -> &[UtilizationSample] {
        &self.samples
    }

    /// All events, in the order they happened
    pub fn events(&self) -> &[SimEvent] {
        &self.events
    }

    pub fn samples_for(&self, entity: EntityId) -> impl Iterator<Item = &UtilizationSample> {
        self.samples.iter().filter(move |s| s.entity == entity)
    }

    /// Ticks at which `entity` was reported as overloaded
    pub fn overload_ticks(&self, entity: EntityId) -> impl Iterator<Item = Tick> + '_ {
        self.events.iter().filter_map(move |e| match e {
            SimEvent::Overload { tick, entity: id, .. } if *id == entity => Some(*tick),
            _ => None,
        })
    }

    /// Every admission attempt made for `workload`, oldest first
    pub fn placements_for(&self, workload: EntityId) -> impl Iterator<Item = (Tick, PlacementDecision)> + '_ {
        self.events.iter().filter_map(move |e| match e {
            SimEvent::Placement { tick, workload: id, decision } if *id == workload => {
                Some((*tick, *decision))
            }
            _ => None,
        })
    }

    /// Fingerprint of the run used to compare two runs for equality
    pub fn placement_decisions(&self) -> Vec<(Tick, EntityId, PlacementDecision)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SimEvent::Placement { tick, workload, decision } => Some((*tick, *workload, *decision)),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(tick: Tick, entity: u32) -> UtilizationSample {
        UtilizationSample {
            tick,
            entity: EntityId(entity),
            name: format!("e{entity}"),
            kind: EntityKind::Container,
            usage: ResourceVector::splat(1.0),
            capacity: ResourceVector::splat(2.0),
            state: LifecycleState::Active,
        }
    }

    #[test]
    fn test_filters_by_entity() {
        let mut log = EventLog::new();
        log.push_sample(sample(0, 1));
        log.push_sample(sample(0, 2));
        log.push_sample(sample(1, 1));
        log.record(SimEvent::Overload {
            tick: 1,
            entity: EntityId(1),
            raw: ResourceVector::splat(3.0),
            capacity: ResourceVector::splat(2.0),
            dimensions: Resource::ALL.to_vec(),
        });
        log.record(SimEvent::Placement {
            tick: 2,
            workload: EntityId(5),
            decision: PlacementDecision::Deferred { attempt: 1 },
        });

        assert_eq!(log.samples_for(EntityId(1)).count(), 2);
        assert_eq!(log.overload_ticks(EntityId(1)).collect::<Vec<_>>(), vec![1]);
        assert_eq!(log.overload_ticks(EntityId(2)).count(), 0);
        assert_eq!(log.placements_for(EntityId(5)).count(), 1);
        assert_eq!(log.placement_decisions().len(), 1);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = SimEvent::EntityFailed {
            tick: 4,
            entity: EntityId(2),
            origin: EntityId(1),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "entity_failed");
        assert_eq!(json["tick"], 4);
        assert_eq!(event.tick(), 4);
    }
}
