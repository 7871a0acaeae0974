//! TCP listener and per-connection protocol driver.
//!
//! One connection carries one command: the listener reads a command
//! frame, executes it through the dispatcher, writes the response on the
//! same connection and only then forwards along the propagation tree.
//! A connection that yields no parseable command is dispatched as
//! `NoCommand`, which logs the failure and answers an error ack on a
//! best-effort basis.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use wattd_proto::{status, Command, Frame, FrameKind};

use crate::client::read_frame_raw;
use crate::config::ClusterConfig;
use crate::dispatch::{Dispatcher, Response};
use crate::error::Result;
use crate::monitor::PowerMonitor;
use crate::propagate::PropagationEngine;
use crate::state::NodeState;
use crate::topology::ClusterTopology;

/// The administrative daemon: listener, dispatcher and propagation.
pub struct Daemon {
    dispatcher: Dispatcher,
    engine: PropagationEngine,
    bind_addr: String,
    io_timeout: Duration,
}

impl Daemon {
    /// Builds the daemon, resolving the local node in the topology by
    /// `node_name`. A name missing from the node list is allowed; the
    /// daemon then serves local requests without forwarding.
    pub fn new(
        config: &ClusterConfig,
        node_name: &str,
        monitor: Arc<dyn PowerMonitor>,
    ) -> Result<Self> {
        let topology = Arc::new(ClusterTopology::from_config(config, node_name));
        if topology.self_index().is_none() {
            warn!(node_name, "local node not in topology, forwarding disabled");
        }
        Self::with_topology(config, topology, monitor)
    }

    /// Builds the daemon around an already-resolved topology.
    pub fn with_topology(
        config: &ClusterConfig,
        topology: Arc<ClusterTopology>,
        monitor: Arc<dyn PowerMonitor>,
    ) -> Result<Self> {
        let state = Arc::new(Mutex::new(NodeState::from_config(config)?));
        let engine = PropagationEngine::new(config, topology.clone());
        let dispatcher = Dispatcher::new(state, monitor, topology, engine.clone());
        let bind_addr = config
            .bind_addr
            .clone()
            .unwrap_or_else(|| format!("0.0.0.0:{}", config.port));
        Ok(Self {
            dispatcher,
            engine,
            bind_addr,
            io_timeout: Duration::from_millis(config.io_timeout_ms),
        })
    }

    /// Binds the listening socket. Split from [`Daemon::serve`] so the
    /// caller can learn the bound address before serving.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        Ok(listener)
    }

    /// Accept loop. Runs until the surrounding task is cancelled; a
    /// failed accept tears the socket down and rebinds it rather than
    /// taking the daemon down.
    pub async fn serve(self: Arc<Self>, mut listener: TcpListener) -> Result<()> {
        info!(addr = %listener.local_addr()?, "administrative listener up");
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let daemon = self.clone();
                    tokio::spawn(async move {
                        daemon.handle_connection(stream, peer).await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed, recreating listener");
                    listener = self.rebind(listener).await;
                }
            }
        }
    }

    /// Drops a wedged listener and binds a fresh one on the same
    /// address, retrying until it succeeds.
    async fn rebind(&self, listener: TcpListener) -> TcpListener {
        let addr = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| self.bind_addr.clone());
        drop(listener);
        loop {
            tokio::time::sleep(Duration::from_millis(100)).await;
            match TcpListener::bind(&addr).await {
                Ok(fresh) => return fresh,
                Err(e) => warn!(addr = %addr, error = %e, "rebind failed, retrying"),
            }
        }
    }

    /// Serves one connection: read, execute, respond, then forward.
    async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) {
        let command = self.read_command(&mut stream, peer).await;
        debug!(%peer, req = command.req.code(), node_dist = command.node_dist, "command received");

        let outcome = self.dispatcher.execute(&command).await;

        // The requester gets its answer before any forwarding happens.
        let frame = match &outcome.response {
            Response::Ack(ack) => Some(ack.to_frame()),
            Response::Status(records) => {
                if records.is_empty() {
                    error!(%peer, "status aggregation produced no records");
                }
                match status::encode_status_block(records) {
                    Ok(frame) => Some(frame),
                    Err(e) => {
                        error!(%peer, error = %e, "status block encode failed");
                        None
                    }
                }
            }
        };
        if let Some(frame) = frame {
            if let Err(e) = self.write_frame(&mut stream, &frame).await {
                // The requester is gone; the command still propagates.
                debug!(%peer, error = %e, "response write failed");
            }
        }

        if outcome.forward {
            self.engine.forward(&command).await;
        }
    }

    /// Reads one command frame, synthesizing `NoCommand` when the
    /// connection yields nothing usable.
    async fn read_command(&self, stream: &mut TcpStream, peer: SocketAddr) -> Command {
        match tokio::time::timeout(self.io_timeout, read_frame_raw(stream)).await {
            Ok(Ok(frame)) if frame.header.kind == FrameKind::Command => {
                match Command::from_payload(&frame.payload) {
                    Ok(cmd) => cmd,
                    Err(e) => {
                        warn!(%peer, error = %e, "undecodable command payload");
                        Command::no_command()
                    }
                }
            }
            Ok(Ok(frame)) => {
                warn!(%peer, kind = frame.header.kind as u8, "unexpected frame kind");
                Command::no_command()
            }
            Ok(Err(e)) => {
                warn!(%peer, error = %e, "command read failed");
                Command::no_command()
            }
            Err(_) => {
                warn!(%peer, "command read timed out");
                Command::no_command()
            }
        }
    }

    async fn write_frame(&self, stream: &mut TcpStream, frame: &Frame) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        let bytes = frame.encode();
        tokio::time::timeout(self.io_timeout, async {
            stream.write_all(&bytes).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| crate::error::DaemonError::IoTimeout {
            addr: "peer".to_string(),
        })??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RpcClient;
    use crate::config::tests::test_config;
    use crate::monitor::StaticMonitor;
    use wattd_proto::{Ack, Payload, RequestCode};

    /// Binds a single-node daemon on an ephemeral port and serves it.
    async fn spawn_daemon() -> (String, RpcClient) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let cfg = test_config(vec![addr.clone()]);
        let topology = Arc::new(ClusterTopology::with_self_index(&cfg, 0).unwrap());
        let daemon = Arc::new(
            Daemon::with_topology(&cfg, topology, Arc::new(StaticMonitor::default())).unwrap(),
        );
        tokio::spawn(daemon.serve(listener));
        let client = RpcClient::new(Duration::from_secs(1), Duration::from_secs(1));
        (addr, client)
    }

    #[tokio::test]
    async fn ping_round_trip() {
        let (addr, client) = spawn_daemon().await;
        let cmd = Command::new(RequestCode::Ping, 1, Payload::None);
        assert_eq!(client.send_command(&addr, &cmd).await.unwrap(), Ack::Success);
    }

    #[tokio::test]
    async fn mutation_then_duplicate() {
        let (addr, client) = spawn_daemon().await;
        let cmd = Command::new(
            RequestCode::MaxFreq,
            42,
            Payload::FreqConf {
                policy_id: 0,
                value: 2_800_000,
            },
        );
        assert_eq!(client.send_command(&addr, &cmd).await.unwrap(), Ack::Success);
        assert_eq!(client.send_command(&addr, &cmd).await.unwrap(), Ack::Ignore);
    }

    #[tokio::test]
    async fn status_returns_local_record() {
        let (addr, client) = spawn_daemon().await;
        let cmd = Command::new(RequestCode::Status, 7, Payload::None);
        let records = client.collect_status(&addr, &cmd).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].address, addr);
        assert!(records[0].ok);
        assert_eq!(records[0].policies.len(), 2);
    }

    #[tokio::test]
    async fn unlisted_node_answers_zero_count_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let cfg = test_config(vec!["node-a".to_string()]);
        let topology = Arc::new(ClusterTopology::from_config(&cfg, "ghost"));
        let daemon = Arc::new(
            Daemon::with_topology(&cfg, topology, Arc::new(StaticMonitor::default())).unwrap(),
        );
        tokio::spawn(daemon.serve(listener));

        let client = RpcClient::new(Duration::from_secs(1), Duration::from_secs(1));
        let cmd = Command::new(RequestCode::Status, 9, Payload::None);
        let records = client.collect_status(&addr, &cmd).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn garbage_gets_an_error_ack() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let (addr, _) = spawn_daemon().await;
        let mut stream = TcpStream::connect(&addr).await.unwrap();
        stream.write_all(b"not a frame at all....").await.unwrap();
        stream.shutdown().await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        let header = wattd_proto::FrameHeader::decode(&buf).unwrap();
        assert_eq!(header.kind, FrameKind::Ack);
        let ack = Ack::from_payload(&buf[wattd_proto::FRAME_HEADER_SIZE..]).unwrap();
        assert_eq!(ack, Ack::Error);
    }
}
