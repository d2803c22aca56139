//! Entity registry and lifecycle
//!
//! Nodes, containers and workloads live in one flat `Vec` indexed by
//! [`EntityId`]. Parents are back-references by id and children are id lists,
//! so the hierarchy can be walked in both directions without shared
//! ownership.

use std::collections::HashMap;

use dcsim_core::{
    EntityId, EntityKind, LifecycleState, OverloadPolicy, ResourceVector, Result, SimError, Tick,
    WorkloadOrigin,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{external_workload_name, internal_workload_name, DatacenterConfig, WorkloadConfig};
use crate::types::{EventLog, SimEvent};

/// Workload-only attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadMeta {
    pub origin: WorkloadOrigin,
    /// Lower is more urgent; `None` sorts last
    pub priority: Option<i64>,
    pub label: Option<String>,
    /// Position in the list the workload was declared in
    pub declaration: usize,
    /// Internal: ticks after container activation. External: arrival tick.
    pub delay: Tick,
    /// Ticks spent Active before completing
    pub duration: Tick,
}

/// A node, container or workload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub kind: EntityKind,
    pub parent: Option<EntityId>,
    pub children: Vec<EntityId>,

    /// Own capacity for hosts; the hosting container's capacity for workloads
    pub capacity: ResourceVector,
    /// Configured demand of a workload; zero for hosts
    pub nominal: ResourceVector,
    /// Fluctuation percents per resource
    pub fluctuation: ResourceVector,
    /// Inherited from the node for containers
    pub policy: OverloadPolicy,
    pub start_up_delay: Tick,
    pub workload: Option<WorkloadMeta>,

    pub state: LifecycleState,
    /// Factors drawn for the current tick
    pub factors: ResourceVector,
    /// Aggregated demand after overload resolution (hosts only)
    pub demand: ResourceVector,
    /// Usage reported for the current tick
    pub reported: ResourceVector,

    pub started_at: Option<Tick>,
    pub activated_at: Option<Tick>,
    pub finished_at: Option<Tick>,
}

impl Entity {
    fn new(id: EntityId, name: String, kind: EntityKind, parent: Option<EntityId>) -> Self {
        Entity {
            id,
            name,
            kind,
            parent,
            children: Vec::new(),
            capacity: ResourceVector::ZERO,
            nominal: ResourceVector::ZERO,
            fluctuation: ResourceVector::ZERO,
            policy: OverloadPolicy::Throttle,
            start_up_delay: 0,
            workload: None,
            state: LifecycleState::Pending,
            factors: ResourceVector::ZERO,
            demand: ResourceVector::ZERO,
            reported: ResourceVector::ZERO,
            started_at: None,
            activated_at: None,
            finished_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == LifecycleState::Active
    }

    pub fn is_external(&self) -> bool {
        matches!(
            self.workload,
            Some(WorkloadMeta { origin: WorkloadOrigin::External, .. })
        )
    }
}

/// Flat storage of every entity of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRegistry {
    entities: Vec<Entity>,
    by_name: HashMap<String, EntityId>,
    nodes: Vec<EntityId>,
    external: Vec<EntityId>,
}

impl EntityRegistry {
    /// Build the registry from a validated descriptor.
    ///
    /// Ids are handed out depth-first in declaration order; external
    /// workloads come last and start without a parent.
    pub fn from_config(config: &DatacenterConfig) -> Self {
        let mut registry = EntityRegistry {
            entities: Vec::new(),
            by_name: HashMap::new(),
            nodes: Vec::new(),
            external: Vec::new(),
        };

        for node_config in &config.nodes {
            let policy = OverloadPolicy::from_stop_lack_of_resource(node_config.stop_lack_of_resource);
            let node = registry.push(node_config.name.clone(), EntityKind::Node, None);
            registry.nodes.push(node);
            {
                let entity = registry.entity_mut(node);
                entity.capacity = node_config.resources.to_vector();
                entity.fluctuation = node_config.fluctuation.to_vector();
                entity.policy = policy;
                entity.start_up_delay = config.to_ticks(node_config.start_up_delay);
            }

            for container_config in &node_config.containers {
                let capacity = container_config.resources.to_vector();
                let container = registry.push(container_config.name.clone(), EntityKind::Container, Some(node));
                {
                    let entity = registry.entity_mut(container);
                    entity.capacity = capacity;
                    entity.fluctuation = container_config.fluctuation.to_vector();
                    entity.policy = policy;
                    entity.start_up_delay = config.to_ticks(container_config.start_up_delay);
                }

                for (index, workload_config) in container_config.workloads.iter().enumerate() {
                    let name = internal_workload_name(&container_config.name, index);
                    let workload = registry.push(name, EntityKind::Workload, Some(container));
                    let entity = registry.entity_mut(workload);
                    entity.capacity = capacity;
                    entity.policy = policy;
                    fill_workload(entity, config, workload_config, WorkloadOrigin::Internal, index);
                }
            }
        }

        if let Some(lb) = &config.load_balancer {
            for (index, workload_config) in lb.workloads.iter().enumerate() {
                let workload = registry.push(external_workload_name(index), EntityKind::Workload, None);
                registry.external.push(workload);
                let entity = registry.entity_mut(workload);
                fill_workload(entity, config, workload_config, WorkloadOrigin::External, index);
            }
        }

        registry
    }

    fn push(&mut self, name: String, kind: EntityKind, parent: Option<EntityId>) -> EntityId {
        let id = EntityId(self.entities.len() as u32);
        self.by_name.insert(name.clone(), id);
        self.entities.push(Entity::new(id, name, kind, parent));
        if let Some(parent) = parent {
            self.entities[parent.index()].children.push(id);
        }
        id
    }

    /// Ids come from this registry, so indexing is always in range
    fn entity_mut(&mut self, id: EntityId) -> &mut Entity {
        &mut self.entities[id.index()]
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id.index())
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(id.index())
    }

    /// Lookup that fails with `UnknownEntity` on a dangling id
    pub fn require(&self, id: EntityId) -> Result<&Entity> {
        self.get(id)
            .ok_or_else(|| SimError::unknown_entity(id.to_string()))
    }

    pub fn require_mut(&mut self, id: EntityId) -> Result<&mut Entity> {
        self.get_mut(id)
            .ok_or_else(|| SimError::unknown_entity(id.to_string()))
    }

    pub fn id_of(&self, name: &str) -> Option<EntityId> {
        self.by_name.get(name).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<&Entity> {
        self.id_of(name).and_then(|id| self.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = EntityId> {
        (0..self.entities.len() as u32).map(EntityId)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn nodes(&self) -> &[EntityId] {
        &self.nodes
    }

    /// Workloads submitted to the load balancer, in declaration order
    pub fn external_workloads(&self) -> &[EntityId] {
        &self.external
    }

    pub fn state(&self, id: EntityId) -> LifecycleState {
        self.get(id).map(|e| e.state).unwrap_or(LifecycleState::Failed)
    }

    /// Ids of every entity of one kind, in id order
    pub fn ids_of_kind(&self, kind: EntityKind) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.id)
            .collect()
    }

    /// Sum of the nominal demand of the Active workloads of a container
    pub fn active_demand(&self, container: EntityId) -> ResourceVector {
        self.get(container)
            .map(|c| {
                c.children
                    .iter()
                    .filter_map(|&w| self.get(w))
                    .filter(|w| w.is_active())
                    .map(|w| w.nominal)
                    .sum()
            })
            .unwrap_or(ResourceVector::ZERO)
    }

    /// Sum of the nominal demand of workloads committed to a container that
    /// have not activated yet, skipping those for which `covered` holds
    pub fn committed_demand(&self, container: EntityId, covered: impl Fn(EntityId) -> bool) -> ResourceVector {
        self.get(container)
            .map(|c| {
                c.children
                    .iter()
                    .filter(|&&w| !covered(w))
                    .filter_map(|&w| self.get(w))
                    .filter(|w| matches!(w.state, LifecycleState::Pending | LifecycleState::Starting))
                    .map(|w| w.nominal)
                    .sum()
            })
            .unwrap_or(ResourceVector::ZERO)
    }

    /// Hand an external workload to a container
    pub fn attach(&mut self, workload: EntityId, container: EntityId) -> Result<()> {
        let capacity = self.require(container)?.capacity;
        let policy = self.require(container)?.policy;
        {
            let entity = self.require_mut(workload)?;
            entity.parent = Some(container);
            entity.capacity = capacity;
            entity.policy = policy;
        }
        self.require_mut(container)?.children.push(workload);
        Ok(())
    }

    /// Move an entity to `next`, refusing anything that is not a forward step
    pub fn transition(
        &mut self,
        id: EntityId,
        next: LifecycleState,
        tick: Tick,
        log: &mut EventLog,
    ) -> Result<()> {
        let entity = self.require_mut(id)?;
        let from = entity.state;
        if !from.can_transition_to(next) {
            return Err(SimError::invariant(
                tick,
                format!("{} cannot move from {} to {}", entity.name, from, next),
            ));
        }

        entity.state = next;
        match next {
            LifecycleState::Starting => entity.started_at = Some(tick),
            LifecycleState::Active => entity.activated_at = Some(tick),
            LifecycleState::Completed | LifecycleState::Failed | LifecycleState::Rejected => {
                entity.finished_at = Some(tick);
                entity.factors = ResourceVector::ZERO;
                entity.reported = ResourceVector::ZERO;
                entity.demand = ResourceVector::ZERO;
            }
            LifecycleState::Pending => {}
        }

        debug!(tick, entity = %entity.name, %from, to = %next, "state change");
        log.record(SimEvent::StateChanged { tick, entity: id, from, to: next });
        Ok(())
    }

    /// Fail `root` and every non-terminal descendant.
    ///
    /// Returns the ids that were failed, root first.
    pub fn fail_subtree(&mut self, root: EntityId, tick: Tick, log: &mut EventLog) -> Result<Vec<EntityId>> {
        let mut failed = Vec::new();
        let mut stack = vec![root];

        while let Some(id) = stack.pop() {
            let entity = self.require(id)?;
            stack.extend(entity.children.iter().rev().copied());
            if entity.state.is_terminal() {
                continue;
            }
            self.transition(id, LifecycleState::Failed, tick, log)?;
            log.record(SimEvent::EntityFailed { tick, entity: id, origin: root });
            failed.push(id);
        }

        Ok(failed)
    }

    /// Clock-driven transitions for one tick: nodes, then containers, then
    /// workloads.
    ///
    /// External workloads only move once placed. Returns the workloads that
    /// became Active at this tick.
    pub fn advance_lifecycle(&mut self, tick: Tick, log: &mut EventLog) -> Result<Vec<EntityId>> {
        for id in self.ids_of_kind(EntityKind::Node) {
            let node = self.require(id)?;
            let (state, delay) = (node.state, node.start_up_delay);
            if state == LifecycleState::Pending {
                self.transition(id, LifecycleState::Starting, tick, log)?;
            }
            if self.state(id) == LifecycleState::Starting && tick >= delay {
                self.transition(id, LifecycleState::Active, tick, log)?;
            }
        }

        for id in self.ids_of_kind(EntityKind::Container) {
            let container = self.require(id)?;
            let (state, delay, parent) = (container.state, container.start_up_delay, container.parent);
            let node_state = parent.map(|p| self.state(p)).unwrap_or(LifecycleState::Failed);
            if node_state.is_terminal() {
                continue;
            }
            if state == LifecycleState::Pending {
                self.transition(id, LifecycleState::Starting, tick, log)?;
            }
            if self.state(id) == LifecycleState::Starting
                && tick >= delay
                && node_state == LifecycleState::Active
            {
                self.transition(id, LifecycleState::Active, tick, log)?;
            }
        }

        let mut activated = Vec::new();
        for id in self.ids_of_kind(EntityKind::Workload) {
            let workload = self.require(id)?;
            let Some(meta) = workload.workload.clone() else {
                continue;
            };
            let Some(container) = workload.parent else {
                continue;
            };
            let container = self.require(container)?;
            let (container_state, container_active_at) = (container.state, container.activated_at);

            match meta.origin {
                WorkloadOrigin::Internal => {
                    let Some(host_active_at) = container_active_at else {
                        continue;
                    };
                    if self.state(id) == LifecycleState::Pending {
                        self.transition(id, LifecycleState::Starting, tick, log)?;
                    }
                    if self.state(id) == LifecycleState::Starting && tick >= host_active_at + meta.delay {
                        self.transition(id, LifecycleState::Active, tick, log)?;
                        activated.push(id);
                    }
                }
                WorkloadOrigin::External => {
                    let placed_at = self.require(id)?.started_at;
                    let ready = placed_at.map(|p| tick > p).unwrap_or(false);
                    if self.state(id) == LifecycleState::Starting
                        && ready
                        && container_state == LifecycleState::Active
                    {
                        self.transition(id, LifecycleState::Active, tick, log)?;
                        activated.push(id);
                    }
                }
            }

            let entity = self.require(id)?;
            if let (LifecycleState::Active, Some(active_at)) = (entity.state, entity.activated_at) {
                if tick >= active_at + meta.duration {
                    self.transition(id, LifecycleState::Completed, tick, log)?;
                }
            }
        }

        Ok(activated)
    }
}

fn fill_workload(
    entity: &mut Entity,
    config: &DatacenterConfig,
    workload: &WorkloadConfig,
    origin: WorkloadOrigin,
    declaration: usize,
) {
    entity.nominal = workload.resources.to_vector();
    entity.fluctuation = workload.fluctuation.to_vector();
    entity.workload = Some(WorkloadMeta {
        origin,
        priority: workload.priority,
        label: workload.workload_type.clone(),
        declaration,
        delay: config.to_ticks(workload.delay),
        duration: config.to_ticks(workload.duration),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> DatacenterConfig {
        DatacenterConfig::from_json_value(json!({
            "simulation": { "duration": 20 },
            "nodes": [{
                "name": "Node-1", "cpu": 8, "ram": 8192, "start_up_delay": 2,
                "stop_lack_of_resource": true,
                "containers": [{
                    "name": "Container-1", "cpu": 4, "ram": 4096, "start_up_delay": 1,
                    "workloads": [
                        { "cpu": 1, "ram": 256, "delay": 3, "duration": 6 },
                        { "cpu": 1, "ram": 256, "delay": 0, "duration": 0 }
                    ]
                }]
            }],
            "load_balancer": {
                "target_containers": ["Container-1"],
                "workloads": [{ "cpu": 1, "delay": 4, "duration": 2 }]
            }
        }))
        .unwrap()
    }

    fn run_lifecycle(registry: &mut EntityRegistry, ticks: Tick) -> EventLog {
        let mut log = EventLog::new();
        for tick in 0..ticks {
            registry.advance_lifecycle(tick, &mut log).unwrap();
        }
        log
    }

    #[test]
    fn test_require_reports_unknown_entity() {
        let registry = EntityRegistry::from_config(&config());

        assert!(registry.require(EntityId(0)).is_ok());
        let missing = EntityId(registry.len() as u32);
        assert!(matches!(registry.require(missing), Err(SimError::UnknownEntity(_))));
    }

    #[test]
    fn test_registry_layout() {
        let registry = EntityRegistry::from_config(&config());

        assert_eq!(registry.len(), 5);
        assert_eq!(registry.nodes(), &[EntityId(0)]);
        assert_eq!(registry.external_workloads(), &[EntityId(4)]);

        let container = registry.by_name("Container-1").unwrap();
        assert_eq!(container.parent, Some(EntityId(0)));
        assert_eq!(container.children, vec![EntityId(2), EntityId(3)]);
        assert_eq!(container.policy, OverloadPolicy::Halt);

        let internal = registry.by_name("Container-1/workload-0").unwrap();
        assert_eq!(internal.capacity, container.capacity);

        let external = registry.by_name("load-balancer/workload-0").unwrap();
        assert!(external.is_external());
        assert_eq!(external.parent, None);
    }

    #[test]
    fn test_activation_follows_start_up_delays() {
        let mut registry = EntityRegistry::from_config(&config());
        run_lifecycle(&mut registry, 12);

        let node = registry.by_name("Node-1").unwrap();
        assert_eq!(node.started_at, Some(0));
        assert_eq!(node.activated_at, Some(2));

        // Container delay is 1 but it waits for its node
        let container = registry.by_name("Container-1").unwrap();
        assert_eq!(container.activated_at, Some(2));

        let workload = registry.by_name("Container-1/workload-0").unwrap();
        assert_eq!(workload.started_at, Some(2));
        assert_eq!(workload.activated_at, Some(5));
        assert_eq!(workload.finished_at, Some(11));
        assert_eq!(workload.state, LifecycleState::Completed);
    }

    #[test]
    fn test_zero_delays_collapse_into_one_tick() {
        let mut registry = EntityRegistry::from_config(&config());
        run_lifecycle(&mut registry, 3);

        let workload = registry.by_name("Container-1/workload-1").unwrap();
        assert_eq!(workload.started_at, Some(2));
        assert_eq!(workload.activated_at, Some(2));
        assert_eq!(workload.finished_at, Some(2));
    }

    #[test]
    fn test_unplaced_external_stays_pending() {
        let mut registry = EntityRegistry::from_config(&config());
        run_lifecycle(&mut registry, 10);

        let external = registry.by_name("load-balancer/workload-0").unwrap();
        assert_eq!(external.state, LifecycleState::Pending);
    }

    #[test]
    fn test_external_activates_after_placement() {
        let mut registry = EntityRegistry::from_config(&config());
        let mut log = run_lifecycle(&mut registry, 4);

        let external = EntityId(4);
        let container = registry.id_of("Container-1").unwrap();
        registry.attach(external, container).unwrap();
        registry.transition(external, LifecycleState::Starting, 4, &mut log).unwrap();

        let activated = registry.advance_lifecycle(4, &mut log).unwrap();
        assert!(!activated.contains(&external));

        let activated = registry.advance_lifecycle(5, &mut log).unwrap();
        assert!(activated.contains(&external));
        assert_eq!(registry.get(external).unwrap().capacity.cpu, 4.0);
    }

    #[test]
    fn test_regression_is_an_invariant_violation() {
        let mut registry = EntityRegistry::from_config(&config());
        let mut log = run_lifecycle(&mut registry, 3);

        let err = registry
            .transition(EntityId(0), LifecycleState::Starting, 3, &mut log)
            .unwrap_err();
        assert!(matches!(err, SimError::InvariantViolation { tick: 3, .. }));
    }

    #[test]
    fn test_fail_subtree_cascades() {
        let mut registry = EntityRegistry::from_config(&config());
        let mut log = run_lifecycle(&mut registry, 6);

        let failed = registry.fail_subtree(EntityId(0), 6, &mut log).unwrap();

        // workload-1 already completed and is left alone
        assert_eq!(failed, vec![EntityId(0), EntityId(1), EntityId(2)]);
        assert!(registry.iter().take(3).all(|e| e.state == LifecycleState::Failed));
        assert_eq!(registry.state(EntityId(3)), LifecycleState::Completed);

        let failures = log
            .events()
            .iter()
            .filter(|e| matches!(e, SimEvent::EntityFailed { origin: EntityId(0), .. }))
            .count();
        assert_eq!(failures, 3);
    }
}
