//! Cluster topology and fan-out target derivation.
//!
//! Every node holds the same ordered address list and knows its own
//! index. The propagation tree is never stored anywhere: each node
//! re-derives its children from its index alone, which makes the scheme
//! self-similar and coordinator-free.
//!
//! The derivation rule partitions the cluster into `fanout` offset
//! classes (`index % fanout`). Within a class, positions form a complete
//! `fanout`-ary tree: a node at index `S` with offset `off = S % fanout`
//! forwards to `(S - off) * fanout + i * fanout + off` for
//! `i = 1..=fanout`, stopping at the end of the list. The distance
//! carried to a child is the child's index minus `off`, i.e. its absolute
//! distance from the seed of its class, so the child can re-apply the
//! rule without any global knowledge. Seeding indices `0..fanout` with
//! distance zero reaches every node exactly once.
//!
//! This flat-modulo scheme is the only propagation strategy supported;
//! the historical binary-halving variant computed targets by numeric IP
//! arithmetic and silently required densely allocated addresses.

use crate::config::ClusterConfig;
use crate::error::{DaemonError, Result};

/// One fan-out target: which node to contact, and the distance to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropTarget {
    /// Index into the node list.
    pub index: usize,
    /// `node_dist` value the forwarded command must carry.
    pub node_dist: u32,
}

/// Ordered node list plus this node's position in it.
#[derive(Debug, Clone)]
pub struct ClusterTopology {
    nodes: Vec<String>,
    port: u16,
    fanout: usize,
    /// `None` when the local host is not in the list; the daemon then
    /// acts as a propagation leaf and only serves local requests.
    self_index: Option<usize>,
}

impl ClusterTopology {
    /// Builds the topology from configuration, resolving the local node
    /// by name. A bare `node_name` matches a list entry with or without
    /// an explicit port or domain suffix.
    pub fn from_config(config: &ClusterConfig, node_name: &str) -> Self {
        let self_index = config.nodes.iter().position(|n| {
            let host = n.split(':').next().unwrap_or(n);
            let short = host.split('.').next().unwrap_or(host);
            host == node_name || short == node_name
        });
        Self {
            nodes: config.nodes.clone(),
            port: config.port,
            fanout: config.fanout.max(1),
            self_index,
        }
    }

    /// Builds a topology with an explicit self index (tests, overrides).
    pub fn with_self_index(
        config: &ClusterConfig,
        self_index: usize,
    ) -> Result<Self> {
        if self_index >= config.nodes.len() {
            return Err(DaemonError::Config(format!(
                "self index {} out of range ({} nodes)",
                self_index,
                config.nodes.len()
            )));
        }
        Ok(Self {
            nodes: config.nodes.clone(),
            port: config.port,
            fanout: config.fanout.max(1),
            self_index: Some(self_index),
        })
    }

    /// Number of nodes in the cluster.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True for a single-node or empty topology.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// This node's index, if it appears in the list.
    pub fn self_index(&self) -> Option<usize> {
        self.self_index
    }

    /// Configured fan-out width.
    pub fn fanout(&self) -> usize {
        self.fanout
    }

    /// Connectable address of a node: entries with an explicit port are
    /// used verbatim, bare hostnames get the cluster port appended.
    pub fn addr(&self, index: usize) -> String {
        let node = &self.nodes[index];
        if node.contains(':') {
            node.clone()
        } else {
            format!("{}:{}", node, self.port)
        }
    }

    /// Address of the local node, when known.
    pub fn self_addr(&self) -> Option<String> {
        self.self_index.map(|i| self.addr(i))
    }

    /// Fan-out targets of the local node. Empty when the node is a leaf
    /// or not part of the topology.
    pub fn children(&self) -> Vec<PropTarget> {
        match self.self_index {
            Some(s) => self.children_of(s),
            None => Vec::new(),
        }
    }

    /// Fan-out targets of an arbitrary index. Used both for this node's
    /// own forwarding and for re-parenting around a dead target.
    pub fn children_of(&self, s: usize) -> Vec<PropTarget> {
        let f = self.fanout;
        let off = s % f;
        let base = (s - off) * f;
        let mut targets = Vec::new();
        for i in 1..=f {
            let index = base + i * f + off;
            if index >= self.nodes.len() {
                break;
            }
            targets.push(PropTarget {
                index,
                node_dist: (base + i * f) as u32,
            });
        }
        targets
    }

    /// Indices an operator tool contacts with distance zero so the tree
    /// covers the whole cluster: one seed per offset class.
    pub fn seeds(&self) -> Vec<usize> {
        (0..self.fanout.min(self.nodes.len())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use std::collections::BTreeSet;

    fn topo(n: usize, fanout: usize, self_index: usize) -> ClusterTopology {
        let mut cfg = test_config((0..n).map(|i| format!("node{i}")).collect());
        cfg.fanout = fanout;
        ClusterTopology::with_self_index(&cfg, self_index).unwrap()
    }

    #[test]
    fn single_node_is_leaf() {
        let t = topo(1, 3, 0);
        assert!(t.children().is_empty());
        assert_eq!(t.seeds(), vec![0]);
    }

    #[test]
    fn children_follow_offset_class() {
        let t = topo(20, 3, 0);
        let c: Vec<usize> = t.children_of(0).iter().map(|p| p.index).collect();
        assert_eq!(c, vec![3, 6, 9]);
        let c: Vec<usize> = t.children_of(1).iter().map(|p| p.index).collect();
        assert_eq!(c, vec![4, 7, 10]);
        let c: Vec<usize> = t.children_of(3).iter().map(|p| p.index).collect();
        assert_eq!(c, vec![12, 15, 18]);
    }

    #[test]
    fn carried_distance_is_index_minus_offset() {
        let t = topo(20, 3, 0);
        for s in 0..20 {
            for child in t.children_of(s) {
                assert_eq!(
                    child.node_dist as usize,
                    child.index - child.index % 3,
                    "child {} of {}",
                    child.index,
                    s
                );
            }
        }
    }

    #[test]
    fn coverage_is_exhaustive_and_unique() {
        for &(n, f) in &[(1usize, 2usize), (2, 2), (7, 2), (16, 2), (5, 3), (27, 3), (40, 4)] {
            let t = topo(n, f, 0);
            let mut visited = Vec::new();
            let mut stack: Vec<usize> = t.seeds();
            while let Some(s) = stack.pop() {
                visited.push(s);
                for child in t.children_of(s) {
                    stack.push(child.index);
                }
            }
            let unique: BTreeSet<usize> = visited.iter().copied().collect();
            assert_eq!(unique.len(), visited.len(), "duplicate visit, n={n} f={f}");
            assert_eq!(unique, (0..n).collect(), "missing index, n={n} f={f}");
        }
    }

    #[test]
    fn fanout_two_matches_distance_formula() {
        // With fanout 2, targets equal S + D + i*fanout for the carried
        // distance D = S - S % 2 received by the node.
        let t = topo(32, 2, 0);
        for s in 0..32usize {
            let d = s - s % 2;
            let expected: Vec<usize> = (1..=2)
                .map(|i| s + d + i * 2)
                .filter(|&idx| idx < 32)
                .collect();
            let got: Vec<usize> = t.children_of(s).iter().map(|p| p.index).collect();
            assert_eq!(got, expected, "node {s}");
        }
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn coverage_holds_for_arbitrary_clusters(n in 1usize..256, f in 1usize..6) {
                let t = topo(n, f, 0);
                let mut visited = Vec::new();
                let mut stack: Vec<usize> = t.seeds();
                while let Some(s) = stack.pop() {
                    visited.push(s);
                    for child in t.children_of(s) {
                        prop_assert!(child.index > s);
                        stack.push(child.index);
                    }
                }
                let unique: BTreeSet<usize> = visited.iter().copied().collect();
                prop_assert_eq!(unique.len(), visited.len());
                prop_assert_eq!(unique, (0..n).collect::<BTreeSet<usize>>());
            }
        }
    }

    #[test]
    fn addresses_respect_explicit_ports() {
        let cfg = test_config(vec!["node1".to_string(), "127.0.0.1:9999".to_string()]);
        let t = ClusterTopology::with_self_index(&cfg, 0).unwrap();
        assert_eq!(t.addr(0), format!("node1:{}", cfg.port));
        assert_eq!(t.addr(1), "127.0.0.1:9999");
    }

    #[test]
    fn self_resolution_by_name() {
        let cfg = test_config(vec![
            "node1.cluster:7010".to_string(),
            "node2.cluster:7011".to_string(),
        ]);
        let t = ClusterTopology::from_config(&cfg, "node2");
        assert_eq!(t.self_index(), Some(1));
        let t = ClusterTopology::from_config(&cfg, "node9");
        assert_eq!(t.self_index(), None);
        assert!(t.children().is_empty());
    }
}
