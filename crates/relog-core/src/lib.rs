//! Relog Core - log storage, log service, replication and membership
//!
//! This crate provides:
//! - The `CommitLog` storage abstraction with in-memory and file backends
//! - The `log.v1` gRPC service implementation
//! - Pull-based replication between cluster members
//! - Gossip membership with join/leave event dispatch

pub mod commit_log;
pub mod error;
pub mod membership;
pub mod service;

// Re-exports for convenience
pub use commit_log::{CommitLog, FileCommitLog, MemoryCommitLog};
pub use error::{HandlerError, LogError, MembershipError, ReplicationError};
pub use membership::{MemberEventHandler, Membership, MembershipConfig};
pub use service::log_service::{
    LogService, LogServiceConfig, ServerProvider, ServerProviderHolder,
};
pub use service::replicator::Replicator;
