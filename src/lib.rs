//! `ncp` — aggregates a fleet of downstream MCP tool servers behind a
//! single upstream surface exposing two synthetic tools, `find` and `run`,
//! backed by semantic discovery and a pooled connection layer.

pub mod auto_import;
pub mod catalog;
pub mod discovery;
pub mod env;
pub mod error;
pub mod gateway;
pub mod health;
pub mod logging;
pub mod orchestrator;
pub mod paths;
pub mod pool;
pub mod profile;
