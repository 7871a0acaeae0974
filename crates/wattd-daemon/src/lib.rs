//! Per-node administrative daemon for cluster energy management.
//!
//! Each compute node runs one daemon. Operator tooling connects to any
//! of the propagation seeds and issues a command once; the daemons fan
//! it out across the whole node list through a coordinator-free tree
//! (see [`topology`]), each node applying the mutation locally before
//! forwarding. Status requests walk the same tree in reverse, merging
//! per-node records on the way back up.

#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod frequency;
pub mod monitor;
pub mod mutator;
pub mod propagate;
pub mod server;
pub mod state;
pub mod topology;

pub use config::ClusterConfig;
pub use error::{DaemonError, Result};
pub use monitor::{PowerMonitor, StaticMonitor};
pub use server::Daemon;
pub use topology::ClusterTopology;
