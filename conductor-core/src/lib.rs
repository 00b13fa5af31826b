pub mod access;
pub mod clock;
pub mod config;
pub mod constants;
pub mod cron;
pub mod db;
pub mod error;
pub mod events;
pub mod executor;
pub mod models;
pub mod orchestrator;
pub mod scheduler;
pub mod store;
pub mod strategy;

#[cfg(test)]
mod testing;

pub use error::{ConductorError, Result};
