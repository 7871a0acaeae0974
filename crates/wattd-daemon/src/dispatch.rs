//! Command dispatch and duplicate suppression.
//!
//! The dispatcher decides duplicate-vs-new, routes the command to the
//! matching mutator or the status aggregator, and tells the caller
//! whether the command must be forwarded after the acknowledgement has
//! been written. Job lifecycle events are never deduplicated; a retried
//! delivery is acknowledged `Ignore` without re-invoking the mutator but
//! may still be forwarded when it carries a distance this node has not
//! serviced yet.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use wattd_proto::{Ack, Command, Payload, PolicyStatus, RequestCode, StatusRecord};

use crate::monitor::PowerMonitor;
use crate::mutator;
use crate::propagate::PropagationEngine;
use crate::state::NodeState;
use crate::topology::ClusterTopology;

/// What gets written back on the requesting connection.
#[derive(Debug)]
pub enum Response {
    /// The generic 8-byte acknowledgement.
    Ack(Ack),
    /// A status block; empty means local aggregation failed.
    Status(Vec<StatusRecord>),
}

/// Result of local execution plus the forwarding decision.
#[derive(Debug)]
pub struct Outcome {
    /// Response for the requesting connection.
    pub response: Response,
    /// Whether the command must be forwarded after the response.
    pub forward: bool,
}

/// Routes commands into the node state, the monitor and the aggregator.
pub struct Dispatcher {
    state: Arc<Mutex<NodeState>>,
    monitor: Arc<dyn PowerMonitor>,
    topology: Arc<ClusterTopology>,
    engine: PropagationEngine,
}

impl Dispatcher {
    /// Wires the dispatcher to its collaborators.
    pub fn new(
        state: Arc<Mutex<NodeState>>,
        monitor: Arc<dyn PowerMonitor>,
        topology: Arc<ClusterTopology>,
        engine: PropagationEngine,
    ) -> Self {
        Self {
            state,
            monitor,
            topology,
            engine,
        }
    }

    /// Executes one freshly read command locally.
    pub async fn execute(&self, command: &Command) -> Outcome {
        let req = command.req;

        // A failed read is not a command: always an error, never a
        // duplicate, and it must not evict the memo of the last real one.
        if req == RequestCode::NoCommand {
            error!("no command could be read from the connection");
            return Outcome {
                response: Response::Ack(Ack::Error),
                forward: false,
            };
        }

        if !req.is_job_event() && req != RequestCode::Status {
            let mut st = self.state.lock().await;
            if st.dedup.is_duplicate(req, command.time_code) {
                // A retry aimed at a distance this node has not serviced
                // yet may still need to reach an unserved subtree.
                let forward = command.node_dist > 0 && command.node_dist != st.dedup.last_dist;
                if forward {
                    st.dedup.last_dist = command.node_dist;
                }
                debug!(req = req.code(), time_code = command.time_code, forward, "duplicate command");
                return Outcome {
                    response: Response::Ack(Ack::Ignore),
                    forward,
                };
            }
        }

        if req == RequestCode::Status {
            self.state
                .lock()
                .await
                .dedup
                .record(req, command.time_code, command.node_dist);
            let records = self.aggregate_status(command).await;
            return Outcome {
                response: Response::Status(records),
                forward: false,
            };
        }

        let ack = {
            let mut st = self.state.lock().await;
            st.dedup.record(req, command.time_code, command.node_dist);
            self.apply(&mut st, command)
        };

        let forward = !matches!(
            req,
            RequestCode::Ping | RequestCode::NewJob | RequestCode::EndJob
        );
        Outcome {
            response: Response::Ack(ack),
            forward,
        }
    }

    /// Runs the mutator matching the command under the state lock.
    fn apply(&self, st: &mut NodeState, command: &Command) -> Ack {
        let monitor = self.monitor.as_ref();
        let result = match (command.req, &command.payload) {
            (RequestCode::NewJob, Payload::NewJob(job)) => {
                info!(job_id = job.job_id, "new job command");
                monitor.new_job(job);
                Ok(())
            }
            (RequestCode::EndJob, Payload::EndJob { job_id, step_id }) => {
                info!(job_id, "end job command");
                monitor.end_job(*job_id, *step_id);
                Ok(())
            }
            (RequestCode::MaxFreq, Payload::FreqConf { value, .. }) => {
                mutator::set_max_freq(st, monitor, *value)
            }
            (RequestCode::SetFreq, Payload::FreqConf { value, .. }) => {
                mutator::set_freq(st, monitor, *value)
            }
            (RequestCode::DefFreq, Payload::FreqConf { policy_id, value }) => {
                mutator::set_def_freq(st, monitor, *policy_id, *value)
            }
            (RequestCode::NewTh, Payload::ThConf { policy_id, percent }) => {
                mutator::set_th(st, monitor, *policy_id, *percent)
            }
            (RequestCode::IncTh, Payload::ThConf { policy_id, percent }) => {
                mutator::inc_th(st, monitor, *policy_id, *percent)
            }
            (RequestCode::RedPstate, Payload::PstateConf { pstates, .. }) => {
                mutator::reduce_pstates(st, monitor, *pstates)
            }
            (RequestCode::SetDefPstate, Payload::PstateConf { policy_id, pstates }) => {
                mutator::set_def_pstate(st, monitor, *policy_id, *pstates)
            }
            (RequestCode::SetMaxPstate, Payload::PstateConf { pstates, .. }) => {
                mutator::set_max_pstate(st, monitor, *pstates)
            }
            (RequestCode::RestConf, _) => mutator::restore_config(st),
            (RequestCode::SetPolicy, Payload::PolicyConf { name, settings, default_freq }) => {
                mutator::set_policy(st, monitor, name, *settings, *default_freq)
            }
            (RequestCode::Ping, _) => Ok(()),
            (req, payload) => {
                error!(req = req.code(), ?payload, "payload does not match request");
                return Ack::Error;
            }
        };
        match result {
            Ok(()) => Ack::Success,
            Err(e) => {
                error!(req = command.req.code(), error = %e, "command failed");
                e.ack()
            }
        }
    }

    /// Collects the subtree's records and appends this node's own last.
    async fn aggregate_status(&self, command: &Command) -> Vec<StatusRecord> {
        let mut records = self.engine.collect(command).await;
        if let Some(own) = self.local_status().await {
            records.push(own);
        }
        records
    }

    /// Builds this node's live status record. `None` when the node is
    /// not in the topology and cannot attribute a record to itself; the
    /// listener then answers with a zero-count block.
    pub async fn local_status(&self) -> Option<StatusRecord> {
        let mut record = StatusRecord {
            address: self.topology.self_addr()?,
            ok: true,
            power: 0,
            avg_freq: 0,
            temp: 0,
            job_id: 0,
            step_id: 0,
            policies: Vec::new(),
        };
        {
            let st = self.state.lock().await;
            record.policies = st
                .policies
                .iter()
                .map(|p| PolicyStatus {
                    freq: st.freq_table.pstate_to_freq(p.pstate).unwrap_or(0),
                    th: (p.settings[0] * 100.0).round() as u32,
                })
                .collect();
        }
        self.monitor.fill_status(&mut record);
        Some(record)
    }
}
