//! Relog Common - Shared types and utilities
//!
//! This crate provides the foundational pieces used across all Relog components:
//! - Error types shared by the server and client crates
//! - Address helpers for building gRPC endpoints

pub mod error;
pub mod utils;

// Re-exports for convenience
pub use error::RelogError;
pub use utils::{grpc_endpoint, rpc_addr, split_host_port};

/// Scheme name used both to select the Relog resolver and the companion
/// load-balancing policy in the published service config.
pub const RESOLVER_SCHEME: &str = "relog";
