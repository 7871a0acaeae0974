//! Remote-command definitions.
//!
//! The command set is closed: every administrative operation the daemon
//! understands is listed in [`RequestCode`]. A [`Command`] is created per
//! inbound connection, consumed once and never persisted.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::frame::{Frame, FrameKind};

/// Number of tunable settings carried per policy.
pub const MAX_POLICY_SETTINGS: usize = 4;

/// Closed set of remote request codes.
///
/// `NoCommand` never travels on the wire from a well-behaved client; the
/// listener synthesizes it on a short or malformed read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestCode {
    /// A job started on the node.
    NewJob,
    /// A job step ended on the node.
    EndJob,
    /// Set the node maximum frequency.
    MaxFreq,
    /// Replace a policy threshold.
    NewTh,
    /// Increment a policy threshold.
    IncTh,
    /// Shift default and maximum p-states toward lower performance.
    RedPstate,
    /// Pin maximum and default frequency together.
    SetFreq,
    /// Set a policy's default frequency.
    DefFreq,
    /// Set a policy's default p-state directly.
    SetDefPstate,
    /// Set the node maximum p-state directly.
    SetMaxPstate,
    /// Restore the startup configuration snapshot.
    RestConf,
    /// Overwrite a named policy's table entry.
    SetPolicy,
    /// Liveness probe.
    Ping,
    /// Collect status records from the subtree.
    Status,
    /// Sentinel for a failed read; never sent by clients.
    NoCommand,
}

impl RequestCode {
    /// Numeric code, kept for log parity with the operator tooling.
    pub fn code(&self) -> u32 {
        match self {
            RequestCode::NewJob => 0,
            RequestCode::EndJob => 1,
            RequestCode::MaxFreq => 100,
            RequestCode::NewTh => 101,
            RequestCode::IncTh => 102,
            RequestCode::RedPstate => 103,
            RequestCode::SetFreq => 104,
            RequestCode::DefFreq => 105,
            RequestCode::RestConf => 106,
            RequestCode::SetPolicy => 108,
            RequestCode::SetDefPstate => 109,
            RequestCode::SetMaxPstate => 110,
            RequestCode::Ping => 500,
            RequestCode::Status => 600,
            RequestCode::NoCommand => 100_000,
        }
    }

    /// Job lifecycle events are never deduplicated.
    pub fn is_job_event(&self) -> bool {
        matches!(self, RequestCode::NewJob | RequestCode::EndJob)
    }
}

/// Description of a job starting on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    /// Batch job identifier.
    pub job_id: u64,
    /// Step within the job.
    pub step_id: u64,
    /// Submitting user.
    pub user: String,
    /// Application name, if the scheduler provides one.
    pub app: String,
}

/// Per-request payload variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// No arguments (Ping, RestConf, Status, NoCommand).
    None,
    /// Job start (NewJob).
    NewJob(JobInfo),
    /// Job end (EndJob).
    EndJob {
        job_id: u64,
        step_id: u64,
    },
    /// Frequency mutation (MaxFreq, SetFreq, DefFreq).
    FreqConf {
        policy_id: u32,
        value: u64,
    },
    /// Threshold mutation (NewTh, IncTh). `percent` is 0..=100.
    ThConf {
        policy_id: u32,
        percent: u64,
    },
    /// P-state mutation (RedPstate, SetDefPstate, SetMaxPstate).
    PstateConf {
        policy_id: u32,
        pstates: u32,
    },
    /// Whole-policy overwrite (SetPolicy).
    PolicyConf {
        name: String,
        settings: [f64; MAX_POLICY_SETTINGS],
        default_freq: u64,
    },
}

/// One administrative command as carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Request code; must agree with the payload variant.
    pub req: RequestCode,
    /// Issue timestamp from the operator tool; the dedup key together with `req`.
    pub time_code: i64,
    /// Nodes of distance already covered from the branch seed.
    pub node_dist: u32,
    /// Request arguments.
    pub payload: Payload,
}

impl Command {
    /// Creates a command with distance zero, as an operator tool sends it.
    pub fn new(req: RequestCode, time_code: i64, payload: Payload) -> Self {
        Self {
            req,
            time_code,
            node_dist: 0,
            payload,
        }
    }

    /// The internal sentinel for a failed or short read.
    pub fn no_command() -> Self {
        Self::new(RequestCode::NoCommand, 0, Payload::None)
    }

    /// Serializes into a command frame.
    pub fn to_frame(&self) -> Result<Frame> {
        let payload = bincode::serialize(self)?;
        Ok(Frame::new(FrameKind::Command, payload))
    }

    /// Deserializes from a command frame payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(payload)?)
    }
}

/// Acknowledgement written back for every command except `Status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Command executed (or soft-failed by design).
    Success,
    /// Command rejected or failed.
    Error,
    /// Recognized duplicate, not re-executed.
    Ignore,
}

impl Ack {
    /// Wire code. 8 bytes on the wire, little-endian.
    pub fn code(&self) -> i64 {
        match self {
            Ack::Success => 0,
            Ack::Error => -1,
            Ack::Ignore => -2,
        }
    }

    /// Parses a wire code; unknown codes map to `Error`.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Ack::Success,
            -2 => Ack::Ignore,
            _ => Ack::Error,
        }
    }

    /// Serializes into an ack frame.
    pub fn to_frame(&self) -> Frame {
        Frame::new(FrameKind::Ack, self.code().to_le_bytes().to_vec())
    }

    /// Deserializes from an ack frame payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() < 8 {
            return Err(crate::error::ProtoError::ShortFrame {
                need: 8,
                have: payload.len(),
            });
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&payload[..8]);
        Ok(Ack::from_code(i64::from_le_bytes(buf)))
    }
}
