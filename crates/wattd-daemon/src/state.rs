//! Node-local mutable state.
//!
//! Everything a remote command may touch lives in one [`NodeState`]
//! context constructed at startup: the live dynamic configuration, the
//! cluster-wide policy table, the startup snapshot used by restore, the
//! reschedule flag and the single-slot dedup memo. The server wraps the
//! whole thing in one `tokio::sync::Mutex`, which is what guarantees the
//! at-most-one-in-flight-mutation invariant the mutators rely on.

use wattd_proto::command::{RequestCode, MAX_POLICY_SETTINGS};

use crate::config::ClusterConfig;
use crate::error::{DaemonError, Result};
use crate::frequency::FrequencyTable;

/// Live dynamic policy configuration, read by the node policy engine.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicConfig {
    /// Id of the policy currently in force.
    pub active_policy_id: u32,
    /// Node maximum frequency in kHz.
    pub max_freq: u64,
    /// Default frequency of the active policy in kHz.
    pub def_freq: u64,
    /// P-state equivalent of `def_freq`.
    pub def_pstate: u32,
    /// Active policy settings; index 0 is the efficiency threshold.
    pub settings: [f64; MAX_POLICY_SETTINGS],
}

/// One entry of the cluster-wide policy table.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyEntry {
    /// Policy name.
    pub name: String,
    /// Default p-state for the policy.
    pub pstate: u32,
    /// Policy settings.
    pub settings: [f64; MAX_POLICY_SETTINGS],
}

/// Single-slot memo of the last non-duplicate command, scoped to
/// non-job commands. One slot is enough because retries of interest are
/// immediate redeliveries of the most recent command.
#[derive(Debug, Clone, Default)]
pub struct DedupState {
    last: Option<(RequestCode, i64)>,
    /// Distance carried by the most recent delivery.
    pub last_dist: u32,
}

impl DedupState {
    /// Whether this `(req, time_code)` pair repeats the remembered one.
    pub fn is_duplicate(&self, req: RequestCode, time_code: i64) -> bool {
        self.last == Some((req, time_code))
    }

    /// Remembers a freshly accepted command.
    pub fn record(&mut self, req: RequestCode, time_code: i64, node_dist: u32) {
        self.last = Some((req, time_code));
        self.last_dist = node_dist;
    }
}

/// The daemon's whole mutable context.
#[derive(Debug)]
pub struct NodeState {
    /// Live configuration.
    pub dynamic: DynamicConfig,
    /// Cluster-wide per-policy table.
    pub policies: Vec<PolicyEntry>,
    /// Platform frequency table.
    pub freq_table: FrequencyTable,
    /// Mutation→scheduler signal; cleared by the external scheduler.
    pub needs_reschedule: bool,
    /// Duplicate-delivery memo.
    pub dedup: DedupState,
    snapshot_policies: Vec<PolicyEntry>,
    snapshot_max_pstate: u32,
}

impl NodeState {
    /// Builds the startup state from configuration.
    pub fn from_config(config: &ClusterConfig) -> Result<Self> {
        let freq_table = FrequencyTable::new(config.frequencies.clone())?;
        let policies: Vec<PolicyEntry> = config
            .policies
            .iter()
            .map(|p| PolicyEntry {
                name: p.name.clone(),
                pstate: p.pstate,
                settings: p.settings,
            })
            .collect();

        let active = policies
            .get(config.default_policy as usize)
            .ok_or_else(|| {
                DaemonError::Config(format!(
                    "default_policy {} out of range",
                    config.default_policy
                ))
            })?;
        let dynamic = DynamicConfig {
            active_policy_id: config.default_policy,
            max_freq: freq_table.pstate_to_freq(config.max_pstate)?,
            def_freq: freq_table.pstate_to_freq(active.pstate)?,
            def_pstate: active.pstate,
            settings: active.settings,
        };

        Ok(Self {
            dynamic,
            snapshot_policies: policies.clone(),
            snapshot_max_pstate: config.max_pstate,
            policies,
            freq_table,
            needs_reschedule: false,
            dedup: DedupState::default(),
        })
    }

    /// Resolves a policy name to its table id.
    pub fn policy_id(&self, name: &str) -> Option<u32> {
        self.policies.iter().position(|p| p.name == name).map(|i| i as u32)
    }

    /// Restores the policy table and, when the active policy still
    /// resolves, the live configuration, from the startup snapshot.
    /// Returns `false` if the active policy was gone (soft failure).
    pub fn restore_snapshot(&mut self) -> bool {
        self.policies = self.snapshot_policies.clone();
        let pid = self.dynamic.active_policy_id as usize;
        let Some(policy) = self.policies.get(pid).cloned() else {
            return false;
        };
        // Snapshot p-states were validated against the table at startup.
        if let (Ok(max_freq), Ok(def_freq)) = (
            self.freq_table.pstate_to_freq(self.snapshot_max_pstate),
            self.freq_table.pstate_to_freq(policy.pstate),
        ) {
            self.dynamic.max_freq = max_freq;
            self.dynamic.def_freq = def_freq;
            self.dynamic.def_pstate = policy.pstate;
            self.dynamic.settings = policy.settings;
        }
        self.needs_reschedule = true;
        true
    }
}
