//! Fan-out propagation engine.
//!
//! Forwarding reaches every cluster node from one client connection:
//! each node sends the command to its derived children (see
//! [`crate::topology`]) and every child re-applies the same rule. The
//! collecting variant does the same walk but each hop is a blocking RPC
//! whose status block is merged into the caller's.
//!
//! When a fan-out target cannot be contacted, its subtree is not dropped
//! silently: the current node re-parents, deriving the dead target's
//! children itself and contacting them directly. Recursion is bounded by
//! `max_reparent_depth`; the dead node itself contributes no status
//! record.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use wattd_proto::{Command, StatusRecord};

use crate::client::RpcClient;
use crate::config::ClusterConfig;
use crate::topology::ClusterTopology;

type BoxedFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Forwards commands along the propagation tree and collects status.
#[derive(Debug, Clone)]
pub struct PropagationEngine {
    topology: Arc<ClusterTopology>,
    client: RpcClient,
    max_reparent_depth: u32,
    status_deadline: Duration,
}

impl PropagationEngine {
    /// Builds the engine from configuration and a shared topology.
    pub fn new(config: &ClusterConfig, topology: Arc<ClusterTopology>) -> Self {
        Self {
            topology,
            client: RpcClient::new(
                Duration::from_millis(config.connect_timeout_ms),
                Duration::from_millis(config.io_timeout_ms),
            ),
            max_reparent_depth: config.max_reparent_depth,
            status_deadline: Duration::from_millis(config.status_deadline_ms),
        }
    }

    /// Fire-and-forget forwarding from this node's position. Failures
    /// shrink the reach but never surface to the local command path.
    pub async fn forward(&self, command: &Command) {
        let Some(s) = self.topology.self_index() else {
            return;
        };
        self.forward_from(s, command.clone(), 0).await;
    }

    fn forward_from(&self, index: usize, command: Command, depth: u32) -> BoxedFuture<'_, ()> {
        Box::pin(async move {
            for target in self.topology.children_of(index) {
                let addr = self.topology.addr(target.index);
                let mut child_cmd = command.clone();
                child_cmd.node_dist = target.node_dist;
                debug!(addr = %addr, node_dist = target.node_dist, "forwarding");
                if let Err(e) = self.client.send_command(&addr, &child_cmd).await {
                    warn!(addr = %addr, error = %e, "forward failed, re-parenting subtree");
                    if depth < self.max_reparent_depth {
                        self.forward_from(target.index, command.clone(), depth + 1).await;
                    }
                }
            }
        })
    }

    /// Collecting walk from this node's position. Returns the children's
    /// record blocks in ascending fan-out-index order; the caller appends
    /// the local record last. The walk observes an end-to-end deadline.
    pub async fn collect(&self, command: &Command) -> Vec<StatusRecord> {
        let deadline = Instant::now() + self.status_deadline;
        match self.topology.self_index() {
            Some(s) => self.collect_from(s, command.clone(), 0, deadline).await,
            None => Vec::new(),
        }
    }

    fn collect_from(
        &self,
        index: usize,
        command: Command,
        depth: u32,
        deadline: Instant,
    ) -> BoxedFuture<'_, Vec<StatusRecord>> {
        Box::pin(async move {
            let mut records = Vec::new();
            for target in self.topology.children_of(index) {
                if Instant::now() >= deadline {
                    warn!(index = target.index, "status deadline reached, skipping branch");
                    break;
                }
                let addr = self.topology.addr(target.index);
                let mut child_cmd = command.clone();
                child_cmd.node_dist = target.node_dist;
                match self.client.collect_status(&addr, &child_cmd).await {
                    Ok(mut block) => {
                        debug!(addr = %addr, records = block.len(), "branch status merged");
                        records.append(&mut block);
                    }
                    Err(e) => {
                        warn!(addr = %addr, error = %e, "status branch failed, re-parenting");
                        if depth < self.max_reparent_depth {
                            let mut block = self
                                .collect_from(target.index, command.clone(), depth + 1, deadline)
                                .await;
                            records.append(&mut block);
                        }
                    }
                }
            }
            records
        })
    }
}
