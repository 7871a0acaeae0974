//! Cluster configuration.
//!
//! One configuration file is shared by every node of the cluster: it
//! fixes the ordered node list (and therefore the propagation tree), the
//! command port, the platform frequency table and the power policies.

use std::path::Path;

use serde::{Deserialize, Serialize};
use wattd_proto::command::MAX_POLICY_SETTINGS;

/// One power policy as configured cluster-wide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Policy name, unique within the cluster.
    pub name: String,
    /// Default p-state when the policy is active.
    pub pstate: u32,
    /// Tunable settings; index 0 is the efficiency threshold fraction.
    pub settings: [f64; MAX_POLICY_SETTINGS],
}

/// Cluster-wide daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Ordered node list. Entries may carry an explicit `host:port`;
    /// bare hostnames get `port` appended.
    pub nodes: Vec<String>,
    /// Remote-command TCP port.
    pub port: u16,
    /// Address the daemon binds; defaults to `0.0.0.0:{port}`.
    pub bind_addr: Option<String>,
    /// Fan-out width of the propagation tree.
    pub fanout: usize,
    /// Outbound connect timeout.
    pub connect_timeout_ms: u64,
    /// Per-operation read/write timeout.
    pub io_timeout_ms: u64,
    /// End-to-end deadline for status-collecting requests.
    pub status_deadline_ms: u64,
    /// Bound on re-parenting recursion when a fan-out target is down.
    pub max_reparent_depth: u32,
    /// Valid frequency table in kHz, highest first; index is the p-state.
    pub frequencies: Vec<u64>,
    /// Initial maximum p-state for the node.
    pub max_pstate: u32,
    /// Configured power policies.
    pub policies: Vec<PolicyConfig>,
    /// Index into `policies` of the policy active at startup.
    pub default_policy: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            port: 50_001,
            bind_addr: None,
            fanout: 3,
            connect_timeout_ms: 3_000,
            io_timeout_ms: 5_000,
            status_deadline_ms: 30_000,
            max_reparent_depth: 8,
            frequencies: Vec::new(),
            max_pstate: 0,
            policies: Vec::new(),
            default_policy: 0,
        }
    }
}

impl ClusterConfig {
    /// Loads a configuration file, dispatching on the extension.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: ClusterConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("unsupported config file extension: {}", ext),
        };
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    /// Structural validation beyond what serde enforces.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("node list must not be empty".to_string());
        }
        if self.fanout == 0 {
            return Err("fanout must be at least 1".to_string());
        }
        if self.frequencies.is_empty() {
            return Err("frequency table must not be empty".to_string());
        }
        if self.frequencies.windows(2).any(|w| w[0] <= w[1]) {
            return Err("frequency table must be strictly descending".to_string());
        }
        if self.policies.is_empty() {
            return Err("at least one policy must be configured".to_string());
        }
        if self.default_policy as usize >= self.policies.len() {
            return Err(format!(
                "default_policy {} out of range ({} policies)",
                self.default_policy,
                self.policies.len()
            ));
        }
        if self.max_pstate as usize >= self.frequencies.len() {
            return Err(format!(
                "max_pstate {} out of range ({} p-states)",
                self.max_pstate,
                self.frequencies.len()
            ));
        }
        for policy in &self.policies {
            if policy.pstate as usize >= self.frequencies.len() {
                return Err(format!(
                    "policy {} pstate {} out of range",
                    policy.name, policy.pstate
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    pub(crate) fn test_config(nodes: Vec<String>) -> ClusterConfig {
        ClusterConfig {
            nodes,
            fanout: 2,
            frequencies: vec![3_000_000, 2_800_000, 2_400_000, 2_000_000],
            max_pstate: 0,
            policies: vec![
                PolicyConfig {
                    name: "min_energy".to_string(),
                    pstate: 2,
                    settings: [0.75, 0.0, 0.0, 0.0],
                },
                PolicyConfig {
                    name: "min_time".to_string(),
                    pstate: 1,
                    settings: [0.85, 0.0, 0.0, 0.0],
                },
            ],
            default_policy: 0,
            ..Default::default()
        }
    }

    #[test]
    fn valid_config_passes() {
        let cfg = test_config(vec!["node1".to_string(), "node2".to_string()]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_nodes_rejected() {
        let cfg = test_config(vec![]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_default_policy_rejected() {
        let mut cfg = test_config(vec!["node1".to_string()]);
        cfg.default_policy = 5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn ascending_frequencies_rejected() {
        let mut cfg = test_config(vec!["node1".to_string()]);
        cfg.frequencies = vec![2_000_000, 2_400_000];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn policy_pstate_bounds_checked() {
        let mut cfg = test_config(vec!["node1".to_string()]);
        cfg.policies[0].pstate = 40;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = test_config(vec!["node1".to_string(), "node2".to_string()]);
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        file.write_all(toml::to_string(&cfg).unwrap().as_bytes())
            .unwrap();
        let loaded = ClusterConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded.nodes, cfg.nodes);
        assert_eq!(loaded.fanout, 2);
        assert_eq!(loaded.policies.len(), 2);
    }

    #[test]
    fn unknown_extension_rejected() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(b"nodes: []").unwrap();
        assert!(ClusterConfig::from_file(file.path()).is_err());
    }
}
