pub mod capability;
pub mod cli;
pub mod config;
pub mod context;
pub mod dedup;
pub mod doctor;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod manifest;
pub mod memory;
pub mod orchestrator;
pub mod planner;
pub mod profiles;
pub mod provider;
pub mod registry;
pub mod server;
pub mod telemetry;
pub mod workers;
