//! Per-node status records and the status response block.
//!
//! A status response is the one message that is not a plain ack: an
//! 8-byte record count followed by the serialized records. A zero count
//! with no records is a valid response and signals a local aggregation
//! failure on the answering node.

use serde::{Deserialize, Serialize};

use crate::error::{ProtoError, Result};
use crate::frame::{Frame, FrameKind};

/// Per-policy slice of a status record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyStatus {
    /// Default frequency for the policy, in kHz.
    pub freq: u64,
    /// First policy setting scaled by 100 (threshold percent).
    pub th: u32,
}

/// Live status of one node, produced fresh per status request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Node address as listed in the cluster topology.
    pub address: String,
    /// Whether the node answered for itself.
    pub ok: bool,
    /// Instantaneous power draw in watts.
    pub power: u64,
    /// Average CPU frequency in kHz.
    pub avg_freq: u64,
    /// Package temperature in degrees Celsius.
    pub temp: u64,
    /// Running job id, zero when idle.
    pub job_id: u64,
    /// Running step id, zero when idle.
    pub step_id: u64,
    /// Per-policy configuration snapshot.
    pub policies: Vec<PolicyStatus>,
}

impl StatusRecord {
    /// A placeholder record for a node that could not be reached but is
    /// still reported by address.
    pub fn unreachable(address: String) -> Self {
        Self {
            address,
            ok: false,
            power: 0,
            avg_freq: 0,
            temp: 0,
            job_id: 0,
            step_id: 0,
            policies: Vec::new(),
        }
    }
}

/// Serializes a status block: count then records. A zero count carries
/// no record bytes so callers can distinguish it from a populated block.
pub fn encode_status_block(records: &[StatusRecord]) -> Result<Frame> {
    let mut payload = (records.len() as i64).to_le_bytes().to_vec();
    if !records.is_empty() {
        payload.extend_from_slice(&bincode::serialize(records)?);
    }
    Ok(Frame::new(FrameKind::Status, payload))
}

/// Deserializes a status block frame payload.
pub fn decode_status_block(payload: &[u8]) -> Result<Vec<StatusRecord>> {
    if payload.len() < 8 {
        return Err(ProtoError::ShortFrame {
            need: 8,
            have: payload.len(),
        });
    }
    let mut count_buf = [0u8; 8];
    count_buf.copy_from_slice(&payload[..8]);
    let count = i64::from_le_bytes(count_buf);
    if count <= 0 {
        return Ok(Vec::new());
    }
    let records: Vec<StatusRecord> = bincode::deserialize(&payload[8..])?;
    if records.len() as i64 != count {
        return Err(ProtoError::Codec(format!(
            "status block count mismatch: header says {count}, payload has {}",
            records.len()
        )));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(addr: &str) -> StatusRecord {
        StatusRecord {
            address: addr.to_string(),
            ok: true,
            power: 230,
            avg_freq: 2_401_000,
            temp: 54,
            job_id: 7,
            step_id: 0,
            policies: vec![PolicyStatus {
                freq: 2_400_000,
                th: 75,
            }],
        }
    }

    #[test]
    fn status_block_roundtrip() {
        let records = vec![record("node1"), record("node2")];
        let frame = encode_status_block(&records).unwrap();
        assert_eq!(frame.header.kind, FrameKind::Status);
        let decoded = decode_status_block(&frame.payload).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn empty_block_is_count_only() {
        let frame = encode_status_block(&[]).unwrap();
        assert_eq!(frame.payload.len(), 8);
        assert!(decode_status_block(&frame.payload).unwrap().is_empty());
    }

    #[test]
    fn count_mismatch_rejected() {
        let records = vec![record("node1")];
        let mut frame = encode_status_block(&records).unwrap();
        frame.payload[0] = 2;
        assert!(decode_status_block(&frame.payload).is_err());
    }

    #[test]
    fn unreachable_record_is_marked() {
        let r = StatusRecord::unreachable("node9".to_string());
        assert!(!r.ok);
        assert_eq!(r.address, "node9");
    }
}
