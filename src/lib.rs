pub mod agents;
pub mod artifacts;
pub mod config;
pub mod errors;
pub mod events;
pub mod executor;
pub mod graph;
pub mod orchestrator;
pub mod planner;
pub mod retry;
pub mod runner;
pub mod state;
pub mod template;
