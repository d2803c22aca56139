//! Descriptor fixtures shared by the integration tests

#![allow(dead_code)]

use dcsim_simulation_engine::fluctuation::NoFluctuation;
use dcsim_simulation_engine::{DatacenterConfig, SimulationRun, Simulator};
use serde_json::{json, Value};

pub fn config(value: Value) -> DatacenterConfig {
    DatacenterConfig::from_json_value(value).expect("fixture descriptor is valid")
}

/// Run without any fluctuation
pub fn run_exact(value: Value) -> SimulationRun {
    Simulator::with_source(&config(value), Box::new(NoFluctuation))
        .expect("simulator builds")
        .run()
        .expect("run completes")
}

pub fn run_seeded(value: Value, seed: u64) -> SimulationRun {
    Simulator::new(&config(value), seed)
        .expect("simulator builds")
        .run()
        .expect("run completes")
}

/// Two nodes with fluctuation everywhere and a reservation-aware balancer
pub fn fluctuating_datacenter() -> Value {
    json!({
        "name": "dc-fluctuating",
        "simulation": { "duration": 40 },
        "nodes": [
            {
                "name": "Node-1", "cpu": 16, "ram": 32768, "disk": 512000, "bw": 10000,
                "cpu_fluctuation_percent": 10, "ram_fluctuation_percent": 5,
                "containers": [
                    {
                        "name": "Container-1", "cpu": 4, "ram": 4096, "disk": 10000, "bw": 1000,
                        "start_up_delay": 1, "cpu_fluctuation_percent": 15,
                        "workloads": [
                            { "cpu": 2, "ram": 1024, "disk": 100, "bw": 100, "delay": 1, "duration": 10,
                              "cpu_fluctuation_percent": 50, "ram_fluctuation_percent": 25,
                              "disk_fluctuation_percent": 1.5, "bw_fluctuation_percent": 0.5 },
                            { "cpu": 1.5, "ram": 2048, "delay": 4, "duration": 20,
                              "cpu_fluctuation_percent": 80 }
                        ]
                    },
                    {
                        "name": "Container-2", "cpu": 6, "ram": 8192, "disk": 10000, "bw": 1000,
                        "workloads": [
                            { "cpu": 5, "ram": 4096, "duration": 30, "cpu_fluctuation_percent": 40,
                              "bw_fluctuation_percent": 100, "bw": 200 }
                        ]
                    }
                ]
            },
            {
                "name": "Node-2", "cpu": 4, "ram": 8192, "start_up_delay": 2,
                "containers": [
                    { "name": "Container-3", "cpu": 2, "ram": 2048, "bw_fluctuation_percent": 30 }
                ]
            }
        ],
        "load_balancer": {
            "type": "first-fit-with-reservations",
            "reservation_enabled": true,
            "strategy_parameters": { "max_attempts": 2, "fallback_strategy": "round-robin" },
            "target_containers": ["Container-1", "Container-3"],
            "workloads": [
                { "cpu": 1, "ram": 256, "delay": 3, "duration": 4, "priority": 1, "type": "User Request",
                  "cpu_fluctuation_percent": 20 },
                { "cpu": 1.5, "ram": 512, "delay": 3, "duration": 6, "priority": 2 },
                { "cpu": 3, "ram": 1024, "delay": 5, "duration": 8, "ram_fluctuation_percent": 10 },
                { "cpu": 0.5, "ram": 128, "delay": 12, "duration": 10 }
            ]
        }
    })
}
