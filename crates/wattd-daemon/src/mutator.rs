//! Validated state transitions on the node's dynamic configuration.
//!
//! Every operation here is synchronous, validates its arguments, mutates
//! [`NodeState`] only where noted, raises the reschedule flag on success
//! and notifies the power monitor. The caller must hold the state lock
//! for the whole call; nothing here takes its own locks.

use tracing::{debug, warn};

use crate::error::{DaemonError, Result};
use crate::monitor::PowerMonitor;
use crate::state::NodeState;
use wattd_proto::command::MAX_POLICY_SETTINGS;

fn check_policy_id(state: &NodeState, policy_id: u32) -> Result<()> {
    if (policy_id as usize) < state.policies.len() {
        Ok(())
    } else {
        Err(DaemonError::PolicyIdOutOfRange(policy_id))
    }
}

/// Pins both maximum and default frequency to `value`, snapping down to
/// the next valid table entry when the requested value is not a member.
pub fn set_freq(state: &mut NodeState, monitor: &dyn PowerMonitor, value: u64) -> Result<()> {
    let freq = state.freq_table.resolve(value)?;
    debug!(requested = value, effective = freq, "set_freq");
    state.dynamic.max_freq = freq;
    state.dynamic.def_freq = freq;
    state.dynamic.def_pstate = state.freq_table.closest_pstate(freq);
    state.needs_reschedule = true;
    monitor.set_freq(freq);
    Ok(())
}

/// Lowers (or raises) the node maximum frequency, with snap-down.
pub fn set_max_freq(state: &mut NodeState, monitor: &dyn PowerMonitor, value: u64) -> Result<()> {
    let freq = state.freq_table.resolve(value)?;
    debug!(requested = value, effective = freq, "set_max_freq");
    state.dynamic.max_freq = freq;
    state.needs_reschedule = true;
    monitor.new_max_freq(freq);
    Ok(())
}

/// Sets a policy's default frequency. Live state changes only when the
/// policy is the active one; the monitor is notified either way so the
/// per-policy default is remembered while the policy is inactive.
pub fn set_def_freq(
    state: &mut NodeState,
    monitor: &dyn PowerMonitor,
    policy_id: u32,
    value: u64,
) -> Result<()> {
    check_policy_id(state, policy_id)?;
    let freq = state.freq_table.resolve(value)?;
    debug!(policy_id, requested = value, effective = freq, "set_def_freq");
    let pstate = state.freq_table.closest_pstate(freq);
    state.policies[policy_id as usize].pstate = pstate;
    if state.dynamic.active_policy_id == policy_id {
        state.dynamic.def_freq = freq;
        state.dynamic.def_pstate = pstate;
        state.needs_reschedule = true;
    }
    monitor.new_def_freq(policy_id, freq);
    Ok(())
}

fn threshold_fraction(percent: u64) -> f64 {
    percent as f64 / 100.0
}

/// Replaces a policy's threshold. The resulting fraction must lie in
/// `(0, 1]`; out-of-range requests are rejected without touching state.
pub fn set_th(
    state: &mut NodeState,
    monitor: &dyn PowerMonitor,
    policy_id: u32,
    percent: u64,
) -> Result<()> {
    check_policy_id(state, policy_id)?;
    let th = threshold_fraction(percent);
    if th <= 0.0 || th > 1.0 {
        return Err(DaemonError::InvalidArgument(format!(
            "threshold {percent}% outside (0, 100]"
        )));
    }
    debug!(policy_id, th, "set_th");
    state.policies[policy_id as usize].settings[0] = th;
    if state.dynamic.active_policy_id == policy_id {
        state.dynamic.settings[0] = th;
        state.needs_reschedule = true;
    }
    monitor.set_th(policy_id, th);
    Ok(())
}

/// Adds `delta_percent` to a policy's threshold, rejecting the change
/// when the resulting fraction leaves `(0, 1]`.
pub fn inc_th(
    state: &mut NodeState,
    monitor: &dyn PowerMonitor,
    policy_id: u32,
    delta_percent: u64,
) -> Result<()> {
    check_policy_id(state, policy_id)?;
    let delta = threshold_fraction(delta_percent);
    let current = if state.dynamic.active_policy_id == policy_id {
        state.dynamic.settings[0]
    } else {
        state.policies[policy_id as usize].settings[0]
    };
    let th = current + delta;
    if th <= 0.0 || th > 1.0 {
        return Err(DaemonError::InvalidArgument(format!(
            "threshold {current} + {delta} outside (0, 1]"
        )));
    }
    debug!(policy_id, th, "inc_th");
    state.policies[policy_id as usize].settings[0] = th;
    if state.dynamic.active_policy_id == policy_id {
        state.dynamic.settings[0] = th;
        state.needs_reschedule = true;
    }
    monitor.inc_th(policy_id, delta);
    Ok(())
}

/// Shifts default and maximum p-state `n` steps toward lower performance
/// and applies the same shift to every policy table entry. Shifts past
/// the end of the table clamp to the lowest-performance p-state.
pub fn reduce_pstates(state: &mut NodeState, monitor: &dyn PowerMonitor, n: u32) -> Result<()> {
    // `n` comes off the wire; saturate so an absurd shift clamps instead
    // of wrapping to a high-performance p-state.
    let table = &state.freq_table;
    let def_pstate =
        table.clamp_pstate(table.closest_pstate(state.dynamic.def_freq).saturating_add(n));
    let max_pstate =
        table.clamp_pstate(table.closest_pstate(state.dynamic.max_freq).saturating_add(n));
    let new_def_freq = table.pstate_to_freq(def_pstate)?;
    let new_max_freq = table.pstate_to_freq(max_pstate)?;
    debug!(n, new_def_freq, new_max_freq, "reduce_pstates");

    state.dynamic.def_freq = new_def_freq;
    state.dynamic.def_pstate = def_pstate;
    state.dynamic.max_freq = new_max_freq;
    state.needs_reschedule = true;
    for policy in &mut state.policies {
        policy.pstate = state.freq_table.clamp_pstate(policy.pstate.saturating_add(n));
    }
    monitor.new_max_freq(new_max_freq);
    Ok(())
}

/// Sets a policy's default p-state directly, bounds-checked against the
/// platform table and the configured policy count.
pub fn set_def_pstate(
    state: &mut NodeState,
    monitor: &dyn PowerMonitor,
    policy_id: u32,
    pstate: u32,
) -> Result<()> {
    check_policy_id(state, policy_id)?;
    let freq = state.freq_table.pstate_to_freq(pstate)?;
    debug!(policy_id, pstate, "set_def_pstate");
    state.policies[policy_id as usize].pstate = pstate;
    if state.dynamic.active_policy_id == policy_id {
        state.dynamic.def_pstate = pstate;
        state.dynamic.def_freq = freq;
        state.needs_reschedule = true;
    }
    monitor.new_def_freq(policy_id, freq);
    Ok(())
}

/// Sets the node maximum p-state directly.
pub fn set_max_pstate(state: &mut NodeState, monitor: &dyn PowerMonitor, pstate: u32) -> Result<()> {
    let freq = state.freq_table.pstate_to_freq(pstate)?;
    debug!(pstate, freq, "set_max_pstate");
    state.dynamic.max_freq = freq;
    state.needs_reschedule = true;
    monitor.new_max_freq(freq);
    Ok(())
}

/// Resets the dynamic configuration to the startup snapshot. Restore
/// must never leave the daemon wedged: when the active policy no longer
/// resolves the failure is logged and reported as success.
pub fn restore_config(state: &mut NodeState) -> Result<()> {
    if !state.restore_snapshot() {
        warn!(
            policy_id = state.dynamic.active_policy_id,
            "restore: active policy not found, keeping live state"
        );
    }
    Ok(())
}

/// Overwrites the cluster-wide policy table entry for a named policy.
pub fn set_policy(
    state: &mut NodeState,
    monitor: &dyn PowerMonitor,
    name: &str,
    settings: [f64; MAX_POLICY_SETTINGS],
    default_freq: u64,
) -> Result<()> {
    let Some(policy_id) = state.policy_id(name) else {
        return Err(DaemonError::UnknownPolicy(name.to_string()));
    };
    if !state.freq_table.is_valid(default_freq) {
        return Err(DaemonError::InvalidArgument(format!(
            "invalid frequency {default_freq} for policy {name}"
        )));
    }
    debug!(name, policy_id, default_freq, "set_policy");
    let pstate = state.freq_table.closest_pstate(default_freq);
    let entry = &mut state.policies[policy_id as usize];
    entry.settings = settings;
    entry.pstate = pstate;
    state.needs_reschedule = true;
    monitor.new_def_freq(policy_id, default_freq);
    Ok(())
}
