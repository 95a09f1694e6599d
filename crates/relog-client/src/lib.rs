//! Relog Client - client-side discovery for Relog clusters
//!
//! This crate provides:
//! - A pluggable resolver extension point (`Resolver`, `ResolverBuilder`,
//!   `ClientConn`) with an explicit `ResolverRegistry`
//! - `LogResolver`, which turns a node's `GetServers` answer into a routable
//!   address list with leader attribution
//! - `RoutingTable`, a `ClientConn` that publishes resolved state to subscribers

pub mod error;
pub mod resolver;
pub mod routing;

pub use error::{ClientError, Result};
pub use resolver::{
    Address, BuildOptions, ClientConn, LogResolver, LogResolverBuilder, Resolver,
    ResolverBuilder, ResolverRegistry, ServiceConfig, State, Target,
};
pub use routing::RoutingTable;
