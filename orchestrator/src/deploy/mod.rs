//! Deployment engine

pub mod executor;
pub mod fsm;
pub mod node_runner;
pub mod paths;
pub mod progress;
pub mod recorder;

pub use executor::{Collaborators, EngineConfig, Orchestrator, RunOptions};
