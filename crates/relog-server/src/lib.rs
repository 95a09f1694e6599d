//! Relog Server - node lifecycle and process wiring
//!
//! A node composes a file-backed commit log, the gRPC log service, the
//! replicator and gossip membership, and tears them down in order on
//! shutdown.

pub mod config;
pub mod node;
pub mod startup;

pub use config::{Configuration, NodeConfig};
pub use node::{Node, NodeError};
pub use startup::{
    LoggingConfig, LoggingGuard, ShutdownSignal, init_logging, wait_for_shutdown_signal,
};
