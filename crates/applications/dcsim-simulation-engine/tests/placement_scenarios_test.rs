//! Load balancer behaviour over whole runs

mod common;

use std::collections::HashMap;

use dcsim_core::{EntityId, LifecycleState, PlacementDecision, ResourceVector, Tick, CAPACITY_EPSILON};
use dcsim_simulation_engine::types::SimEvent;
use dcsim_simulation_engine::{Analyzer, EntitySelector, SimulationRun};
use serde_json::{json, Value};

use common::{fluctuating_datacenter, run_exact, run_seeded};

/// Node-1 hosts Container-1 (cpu 4) and Container-2 (cpu 6); Node-2 hosts
/// Container-3 (cpu 2). `c1_busy` / `c3_busy` are internal workloads that
/// fill those containers completely for the given number of ticks.
fn scenario(c1_busy: Option<u64>, c3_busy: Option<u64>, workloads: Value) -> Value {
    let filler = |cpu: f64, duration: Option<u64>| match duration {
        Some(d) => json!([{ "cpu": cpu, "ram": 0, "duration": d }]),
        None => json!([]),
    };
    json!({
        "simulation": { "duration": 15 },
        "nodes": [
            {
                "name": "Node-1", "cpu": 16, "ram": 32768,
                "containers": [
                    { "name": "Container-1", "cpu": 4, "ram": 4096, "workloads": filler(4.0, c1_busy) },
                    { "name": "Container-2", "cpu": 6, "ram": 8192 }
                ]
            },
            {
                "name": "Node-2", "cpu": 8, "ram": 8192,
                "containers": [
                    { "name": "Container-3", "cpu": 2, "ram": 2048, "workloads": filler(2.0, c3_busy) }
                ]
            }
        ],
        "load_balancer": {
            "type": "classic-first-fit",
            "strategy_parameters": { "max_attempts": 3, "fallback_strategy": "round-robin" },
            "target_containers": ["Container-1", "Container-3"],
            "workloads": workloads
        }
    })
}

fn request() -> Value {
    json!([{ "cpu": 1, "ram": 256, "delay": 3, "duration": 4, "priority": 1 }])
}

fn decisions(run: &SimulationRun, name: &str) -> Vec<(Tick, PlacementDecision)> {
    run.placement_record(name).unwrap().attempts
}

fn id(run: &SimulationRun, name: &str) -> EntityId {
    run.registry.id_of(name).unwrap()
}

#[test]
fn test_placed_on_first_target_when_it_has_room() {
    let run = run_exact(scenario(None, None, request()));

    assert_eq!(
        decisions(&run, "load-balancer/workload-0"),
        vec![(3, PlacementDecision::Admitted { container: id(&run, "Container-1"), attempt: 1 })]
    );

    let workload = run.entity("load-balancer/workload-0").unwrap();
    assert_eq!(workload.parent, Some(id(&run, "Container-1")));
    assert_eq!(workload.started_at, Some(3));
    assert_eq!(workload.activated_at, Some(4));
    assert_eq!(workload.finished_at, Some(8));
}

#[test]
fn test_second_target_used_when_first_is_full() {
    let run = run_exact(scenario(Some(10), None, request()));

    assert_eq!(
        decisions(&run, "load-balancer/workload-0"),
        vec![(3, PlacementDecision::Admitted { container: id(&run, "Container-3"), attempt: 1 })]
    );
}

#[test]
fn test_retried_until_capacity_frees_up() {
    // Both targets are full until tick 4
    let run = run_exact(scenario(Some(4), Some(4), request()));

    assert_eq!(
        decisions(&run, "load-balancer/workload-0"),
        vec![
            (3, PlacementDecision::Deferred { attempt: 1 }),
            (4, PlacementDecision::Admitted { container: id(&run, "Container-1"), attempt: 2 }),
        ]
    );
}

#[test]
fn test_fallback_rotates_over_targets() {
    let workloads = json!([
        { "cpu": 1, "ram": 256, "delay": 3, "duration": 4, "priority": 1 },
        { "cpu": 1, "ram": 256, "delay": 3, "duration": 4, "priority": 2 }
    ]);
    let run = run_exact(scenario(Some(30), Some(30), workloads));

    assert_eq!(
        decisions(&run, "load-balancer/workload-0"),
        vec![
            (3, PlacementDecision::Deferred { attempt: 1 }),
            (4, PlacementDecision::Deferred { attempt: 2 }),
            (5, PlacementDecision::Fallback { container: id(&run, "Container-3"), attempts: 3 }),
        ]
    );
    assert_eq!(
        decisions(&run, "load-balancer/workload-1").last(),
        Some(&(5, PlacementDecision::Fallback { container: id(&run, "Container-1"), attempts: 3 }))
    );

    // Fallback skips the capacity check, so both hosts end up throttled
    assert!(run.log.overload_ticks(id(&run, "Container-1")).any(|t| t == 6));
    assert!(run.log.overload_ticks(id(&run, "Container-3")).any(|t| t == 6));
    assert_eq!(run.summary.fallbacks, 2);
    assert_eq!(run.summary.reservations_created, 0);
}

#[test]
fn test_fallback_only_after_attempts_are_exhausted() {
    for seed in [1, 2, 3, 4] {
        let run = run_seeded(fluctuating_datacenter(), seed);

        for &workload in run.registry.external_workloads() {
            let attempts: Vec<PlacementDecision> = run.log.placements_for(workload).map(|(_, d)| d).collect();
            let deferred = attempts.iter().filter(|d| matches!(d, PlacementDecision::Deferred { .. })).count();

            match attempts.last() {
                Some(PlacementDecision::Fallback { attempts: n, .. }) => {
                    assert_eq!(*n, 2);
                    assert_eq!(deferred, 1);
                }
                Some(PlacementDecision::Admitted { attempt, .. }) => {
                    assert!(*attempt <= 2);
                    assert_eq!(deferred as u32, attempt - 1);
                }
                Some(other) => panic!("unexpected final decision {other:?}"),
                None => panic!("workload never attempted"),
            }
            assert_eq!(attempts.iter().filter(|d| d.is_final()).count(), 1);
        }
    }
}

#[test]
fn test_rejected_when_every_target_failed() {
    let run = run_exact(json!({
        "simulation": { "duration": 10 },
        "nodes": [{
            "name": "Node-A", "cpu": 2, "ram": 1024, "stop_lack_of_resource": true,
            "containers": [
                { "name": "Container-A1", "cpu": 2, "ram": 512,
                  "workloads": [
                      { "cpu": 1.5, "ram": 0, "duration": 5 },
                      { "cpu": 1.5, "ram": 0, "duration": 5 }
                  ] }
            ]
        }],
        "load_balancer": {
            "strategy_parameters": { "max_attempts": 1 },
            "target_containers": ["Container-A1"],
            "workloads": [{ "cpu": 1, "delay": 4, "duration": 2 }]
        }
    }));

    let workload = run.entity("load-balancer/workload-0").unwrap();
    assert_eq!(workload.state, LifecycleState::Rejected);
    assert_eq!(workload.activated_at, None);
    assert!(run.samples_of("load-balancer/workload-0").unwrap().is_empty());
    assert_eq!(
        decisions(&run, "load-balancer/workload-0"),
        vec![(4, PlacementDecision::Rejected { attempts: 1 })]
    );

    let records = Analyzer::new(&run)
        .analyze(&EntitySelector::Names(vec!["load-balancer/workload-0".into()]), 5)
        .unwrap();
    assert_eq!(records[0].placements.unwrap().rejected, 1);
    assert!(records[0].stats.is_none());
}

#[test]
fn test_disabled_balancer_never_places() {
    let mut descriptor = scenario(None, None, request());
    descriptor["load_balancer"]["enabled"] = json!(false);
    let run = run_exact(descriptor);

    assert_eq!(run.entity("load-balancer/workload-0").unwrap().state, LifecycleState::Pending);
    assert!(run.log.placement_decisions().is_empty());
    assert_eq!(run.summary.never_placed, 1);
}

fn reservation_descriptor(strategy: &str) -> Value {
    let workload = |delay: u64| json!({ "cpu": 1.5, "ram": 1000, "delay": delay, "duration": 3 });
    json!({
        "simulation": { "duration": 30 },
        "nodes": [{
            "name": "Node-1", "cpu": 16, "ram": 16384,
            "containers": [{
                "name": "Container-1", "cpu": 4, "ram": 4096,
                "workloads": [{ "cpu": 1, "ram": 500, "delay": 4, "duration": 6 }]
            }]
        }],
        "load_balancer": {
            "type": strategy,
            "reservation_enabled": true,
            "strategy_parameters": { "max_attempts": 20 },
            "target_containers": ["Container-1"],
            "workloads": [workload(0), workload(0), workload(0), workload(1), workload(2), workload(3)]
        }
    })
}

#[test]
fn test_active_plus_reserved_never_exceeds_capacity() {
    let run = run_exact(reservation_descriptor("first-fit-with-reservations"));
    let container = run.entity("Container-1").unwrap();

    // (created, closed) per reserved workload
    let mut reservations: HashMap<EntityId, (Tick, Option<Tick>)> = HashMap::new();
    for event in run.log.events() {
        match event {
            SimEvent::ReservationCreated { tick, workload, .. } => {
                reservations.insert(*workload, (*tick, None));
            }
            SimEvent::ReservationConsumed { tick, workload, .. }
            | SimEvent::ReservationDiscarded { tick, workload, .. } => {
                if let Some(entry) = reservations.get_mut(workload) {
                    entry.1 = Some(*tick);
                }
            }
            _ => {}
        }
    }

    assert_eq!(run.summary.fallbacks, 0);
    assert_eq!(run.summary.admitted, 6);
    assert_eq!(run.summary.reservations_consumed, 6);
    assert_eq!(container.children.len(), 7);

    // Admission waits for the internal workload's delay to be accounted for
    assert_eq!(
        decisions(&run, "load-balancer/workload-2"),
        (0..4)
            .map(|t| (t, PlacementDecision::Deferred { attempt: t as u32 + 1 }))
            .chain([(4, PlacementDecision::Admitted { container: container.id, attempt: 5 })])
            .collect::<Vec<_>>()
    );

    for tick in 0..run.total_ticks() {
        let mut active_and_reserved = ResourceVector::ZERO;
        let mut committed = ResourceVector::ZERO;
        for &id in &container.children {
            let workload = run.registry.get(id).unwrap();
            let active = workload.activated_at.is_some_and(|a| a <= tick)
                && workload.finished_at.map_or(true, |f| f > tick);
            let reserved = reservations
                .get(&id)
                .is_some_and(|(created, closed)| *created <= tick && closed.map_or(true, |c| c > tick));
            if active || reserved {
                active_and_reserved += workload.nominal;
            }
            if workload.started_at.is_some_and(|s| s <= tick) && workload.finished_at.map_or(true, |f| f > tick) {
                committed += workload.nominal;
            }
        }
        assert!(
            active_and_reserved.fits_within(&container.capacity),
            "tick {tick}: active + reserved {active_and_reserved} over capacity"
        );
        assert!(
            committed.fits_within(&container.capacity),
            "tick {tick}: committed {committed} over capacity"
        );
        assert!(committed.cpu <= 4.0 + CAPACITY_EPSILON);
    }

    assert!(run.log.overload_ticks(container.id).next().is_none());
}

#[test]
fn test_classic_strategy_can_overcommit() {
    let run = run_exact(reservation_descriptor("classic-first-fit"));
    let container = run.registry.id_of("Container-1").unwrap();

    assert_eq!(run.summary.reservations_created, 0);
    assert!(run.log.overload_ticks(container).next().is_some());
}
