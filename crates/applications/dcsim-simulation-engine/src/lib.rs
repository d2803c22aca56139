//! dcsim Simulation Engine
//!
//! Tick-based simulator for a node → container → workload datacenter with an
//! external load balancer, plus the windowed analyzer for its output.

pub mod config;
pub mod fluctuation;
pub mod entity;
pub mod types;
pub mod placement;
pub mod simulator;
pub mod analyzer;
pub mod report;

pub use analyzer::{Analyzer, EntitySelector, WindowSummary};
pub use config::DatacenterConfig;
pub use simulator::{SimulationRun, SimulationSummary, Simulator};
