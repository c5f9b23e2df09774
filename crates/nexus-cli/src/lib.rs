//! Nexus CLI - administration of mobile credentials and API tokens
//!
//! Thin wiring over `nexus-core` and `nexus-mobile`: configuration
//! loading, store and directory setup, and one command per provisioning
//! or token operation.

pub mod commands;
pub mod config;

pub use commands::{run, Cli, Commands};
pub use config::NexusConfig;
