//! Power-monitor seam.
//!
//! The monitor subsystem records live node metrics and is told about
//! every policy mutation so per-policy defaults survive policy switches.
//! The daemon core only depends on this trait; the real hardware-backed
//! monitor lives outside this repository.

use std::sync::Mutex;

use wattd_proto::command::JobInfo;
use wattd_proto::StatusRecord;

/// Notifications and live-metric queries the daemon issues.
pub trait PowerMonitor: Send + Sync {
    /// A job started on this node.
    fn new_job(&self, job: &JobInfo);

    /// A job (step) ended on this node.
    fn end_job(&self, job_id: u64, step_id: u64);

    /// The node maximum frequency changed.
    fn new_max_freq(&self, freq: u64);

    /// A policy's default frequency changed (active or not).
    fn new_def_freq(&self, policy_id: u32, freq: u64);

    /// Both maximum and default frequency were pinned to `freq`.
    fn set_freq(&self, freq: u64);

    /// A policy's threshold was replaced.
    fn set_th(&self, policy_id: u32, th: f64);

    /// A policy's threshold was incremented.
    fn inc_th(&self, policy_id: u32, delta: f64);

    /// Fills the live-metric fields of a status record.
    fn fill_status(&self, record: &mut StatusRecord);
}

/// Monitor implementation backed by fixed metrics and an in-memory job
/// slot. Stands in for the hardware monitor in tests and default builds.
#[derive(Debug)]
pub struct StaticMonitor {
    power: u64,
    avg_freq: u64,
    temp: u64,
    job: Mutex<Option<(u64, u64)>>,
}

impl StaticMonitor {
    /// Creates a monitor reporting the given metrics.
    pub fn new(power: u64, avg_freq: u64, temp: u64) -> Self {
        Self {
            power,
            avg_freq,
            temp,
            job: Mutex::new(None),
        }
    }

    /// Currently tracked job, if any.
    pub fn current_job(&self) -> Option<(u64, u64)> {
        *self.job.lock().unwrap()
    }
}

impl Default for StaticMonitor {
    fn default() -> Self {
        Self::new(250, 2_400_000, 55)
    }
}

impl PowerMonitor for StaticMonitor {
    fn new_job(&self, job: &JobInfo) {
        tracing::info!(job_id = job.job_id, step_id = job.step_id, user = %job.user, "new job");
        *self.job.lock().unwrap() = Some((job.job_id, job.step_id));
    }

    fn end_job(&self, job_id: u64, step_id: u64) {
        tracing::info!(job_id, step_id, "end job");
        let mut slot = self.job.lock().unwrap();
        if *slot == Some((job_id, step_id)) {
            *slot = None;
        }
    }

    fn new_max_freq(&self, freq: u64) {
        tracing::debug!(freq, "monitor: new max frequency");
    }

    fn new_def_freq(&self, policy_id: u32, freq: u64) {
        tracing::debug!(policy_id, freq, "monitor: new default frequency");
    }

    fn set_freq(&self, freq: u64) {
        tracing::debug!(freq, "monitor: frequency pinned");
    }

    fn set_th(&self, policy_id: u32, th: f64) {
        tracing::debug!(policy_id, th, "monitor: threshold set");
    }

    fn inc_th(&self, policy_id: u32, delta: f64) {
        tracing::debug!(policy_id, delta, "monitor: threshold incremented");
    }

    fn fill_status(&self, record: &mut StatusRecord) {
        record.power = self.power;
        record.avg_freq = self.avg_freq;
        record.temp = self.temp;
        if let Some((job_id, step_id)) = self.current_job() {
            record.job_id = job_id;
            record.step_id = step_id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: u64) -> JobInfo {
        JobInfo {
            job_id: id,
            step_id: 0,
            user: "ops".to_string(),
            app: "lmp".to_string(),
        }
    }

    #[test]
    fn tracks_job_lifecycle() {
        let m = StaticMonitor::default();
        assert_eq!(m.current_job(), None);
        m.new_job(&job(42));
        assert_eq!(m.current_job(), Some((42, 0)));
        m.end_job(42, 0);
        assert_eq!(m.current_job(), None);
    }

    #[test]
    fn end_of_unknown_job_is_ignored() {
        let m = StaticMonitor::default();
        m.new_job(&job(42));
        m.end_job(7, 7);
        assert_eq!(m.current_job(), Some((42, 0)));
    }

    #[test]
    fn fills_status_record() {
        let m = StaticMonitor::new(300, 2_000_000, 60);
        m.new_job(&job(9));
        let mut record = StatusRecord {
            address: "node1".to_string(),
            ok: true,
            power: 0,
            avg_freq: 0,
            temp: 0,
            job_id: 0,
            step_id: 0,
            policies: Vec::new(),
        };
        m.fill_status(&mut record);
        assert_eq!(record.power, 300);
        assert_eq!(record.avg_freq, 2_000_000);
        assert_eq!(record.temp, 60);
        assert_eq!(record.job_id, 9);
    }
}
