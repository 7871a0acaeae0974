//! Outbound RPC: one connection per command, framed, timeout-bounded.
//!
//! Used by the propagation engine to reach fan-out targets and by
//! operator tooling (and the integration tests) to drive a cluster.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use wattd_proto::{
    status, Ack, Command, Frame, FrameHeader, FrameKind, ProtoError, StatusRecord,
    FRAME_HEADER_SIZE,
};

use crate::error::{DaemonError, Result};
use crate::topology::ClusterTopology;

/// Framed RPC client with explicit connect and I/O timeouts.
#[derive(Debug, Clone)]
pub struct RpcClient {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl RpcClient {
    /// Creates a client with the given timeouts.
    pub fn new(connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            io_timeout,
        }
    }

    /// Per-operation read/write timeout.
    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    async fn connect(&self, addr: &str) -> Result<TcpStream> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| DaemonError::ConnectTimeout {
                addr: addr.to_string(),
                timeout_ms: self.connect_timeout.as_millis() as u64,
            })??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn write_frame(&self, stream: &mut TcpStream, addr: &str, frame: &Frame) -> Result<()> {
        let bytes = frame.encode();
        tokio::time::timeout(self.io_timeout, async {
            stream.write_all(&bytes).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| DaemonError::IoTimeout {
            addr: addr.to_string(),
        })??;
        Ok(())
    }

    async fn read_frame(&self, stream: &mut TcpStream, addr: &str) -> Result<Frame> {
        tokio::time::timeout(self.io_timeout, read_frame_raw(stream))
            .await
            .map_err(|_| DaemonError::IoTimeout {
                addr: addr.to_string(),
            })?
    }

    /// Sends one command and reads the 8-byte acknowledgement.
    pub async fn send_command(&self, addr: &str, command: &Command) -> Result<Ack> {
        let mut stream = self.connect(addr).await?;
        self.write_frame(&mut stream, addr, &command.to_frame()?).await?;
        let frame = self.read_frame(&mut stream, addr).await?;
        if frame.header.kind != FrameKind::Ack {
            return Err(ProtoError::UnknownKind(frame.header.kind as u8).into());
        }
        let ack = Ack::from_payload(&frame.payload)?;
        debug!(addr, req = command.req.code(), ?ack, "command acknowledged");
        Ok(ack)
    }

    /// Sends a status command and reads the status block it returns.
    pub async fn collect_status(&self, addr: &str, command: &Command) -> Result<Vec<StatusRecord>> {
        let mut stream = self.connect(addr).await?;
        self.write_frame(&mut stream, addr, &command.to_frame()?).await?;
        let frame = self.read_frame(&mut stream, addr).await?;
        if frame.header.kind != FrameKind::Status {
            return Err(ProtoError::UnknownKind(frame.header.kind as u8).into());
        }
        Ok(status::decode_status_block(&frame.payload)?)
    }
}

/// Reads one frame from a stream: fixed header, then payload.
pub(crate) async fn read_frame_raw(stream: &mut TcpStream) -> Result<Frame> {
    let mut header_buf = [0u8; FRAME_HEADER_SIZE];
    stream.read_exact(&mut header_buf).await?;
    let header = FrameHeader::decode(&header_buf)?;
    let mut payload = vec![0u8; header.payload_length as usize];
    if !payload.is_empty() {
        stream.read_exact(&mut payload).await?;
    }
    Ok(Frame { header, payload })
}

/// Sends a command to every propagation seed with distance zero, the way
/// an operator tool drives a whole cluster through one call. Returns the
/// per-seed outcome in seed order.
pub async fn send_to_all(
    client: &RpcClient,
    topology: &ClusterTopology,
    command: &Command,
) -> Vec<(String, Result<Ack>)> {
    let mut results = Vec::new();
    for seed in topology.seeds() {
        let addr = topology.addr(seed);
        let mut seeded = command.clone();
        seeded.node_dist = 0;
        let outcome = client.send_command(&addr, &seeded).await;
        results.push((addr, outcome));
    }
    results
}

/// Collects status from every seed's branch and concatenates the blocks
/// in seed order.
pub async fn cluster_status(
    client: &RpcClient,
    topology: &ClusterTopology,
    command: &Command,
) -> Vec<StatusRecord> {
    let mut records = Vec::new();
    for seed in topology.seeds() {
        let addr = topology.addr(seed);
        let mut seeded = command.clone();
        seeded.node_dist = 0;
        match client.collect_status(&addr, &seeded).await {
            Ok(mut block) => records.append(&mut block),
            Err(e) => debug!(addr, error = %e, "seed unreachable for status"),
        }
    }
    records
}
