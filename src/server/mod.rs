//! # DSU Server
//!
//! Single-subscriber DSU server loop.
//!
//! ```text
//! UdpSocket ──► receive task ──[InboundDatagram]──┐
//!                                                 ├──► dispatch loop ──► UdpSocket (send_to)
//! Controller ─────────────[ControllerState]───────┘      owns BridgeContext
//! ```
//!
//! The loop is the only owner of [`BridgeContext`], so the session, timestamps and packet
//! counter need no locking. Sends are fire-and-forget: failures are logged and never retried.

pub mod dispatcher;
pub mod emitter;
pub mod registry;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServerSettings;
use crate::controller::ControllerState;
use crate::protocol::ProtocolError;

pub use dispatcher::{dispatch, RegistrationPolicy};
pub use emitter::emit_report;
pub use registry::{ClientRegistry, ClientSession};

/// Largest datagram accepted from clients. Requests are a few dozen bytes.
const MAX_DATAGRAM: usize = 2048;
const INBOUND_QUEUE: usize = 256;
/// Consecutive receive errors after which the receive task gives up.
const MAX_RECEIVE_FAILURES: u32 = 20;
const RECEIVE_BACKOFF_BASE: Duration = Duration::from_millis(10);
const RECEIVE_BACKOFF_MAX: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Datagram receiver stopped")]
    ReceiverClosed,
}

/// A finished packet and where it goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPacket {
    pub destination: SocketAddr,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
struct InboundDatagram {
    from: SocketAddr,
    bytes: Vec<u8>,
}

/// Mutable protocol state shared by request dispatch and report emission.
#[derive(Debug)]
pub struct BridgeContext {
    pub registry: ClientRegistry,
    /// Number the next pad data report will carry.
    pub packet_counter: u32,
    pub server_id: u32,
    pub client_timeout: Duration,
    pub policy: RegistrationPolicy,
}

impl BridgeContext {
    pub fn new(settings: &ServerSettings) -> Self {
        Self {
            registry: ClientRegistry::new(),
            packet_counter: 0,
            server_id: settings.server_id,
            client_timeout: Duration::from_millis(settings.client_timeout_ms),
            policy: settings.registration_policy,
        }
    }

    /// Hands out the current counter value and advances it, wrapping at `u32::MAX`.
    pub fn next_packet_number(&mut self) -> u32 {
        let current = self.packet_counter;
        self.packet_counter = self.packet_counter.wrapping_add(1);
        current
    }
}

impl Default for BridgeContext {
    fn default() -> Self {
        Self::new(&ServerSettings::default())
    }
}

pub struct DsuServer {
    socket: Arc<UdpSocket>,
    context: BridgeContext,
    cancel: CancellationToken,
}

impl DsuServer {
    pub async fn bind(
        settings: &ServerSettings,
        cancel: CancellationToken,
    ) -> Result<Self, ServerError> {
        let address = SocketAddr::new(settings.bind_address, settings.port);
        let socket = UdpSocket::bind(address)
            .await
            .map_err(|source| ServerError::Bind { address, source })?;
        info!(
            "DSU server listening on {} (server id {}, timeout {} ms, {:?} registration)",
            socket.local_addr()?,
            settings.server_id,
            settings.client_timeout_ms,
            settings.registration_policy
        );

        Ok(Self {
            socket: Arc::new(socket),
            context: BridgeContext::new(settings),
            cancel,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    /// Runs until cancelled. Controller states and datagrams are handled one at a time.
    pub async fn run(
        mut self,
        mut states: mpsc::Receiver<ControllerState>,
    ) -> Result<(), ServerError> {
        let (datagram_tx, mut datagram_rx) = mpsc::channel(INBOUND_QUEUE);
        let receiver = tokio::spawn(receive_loop(
            self.socket.clone(),
            datagram_tx,
            self.cancel.clone(),
        ));

        let mut controller_open = true;
        let result = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("DSU server shutting down");
                    break Ok(());
                }
                datagram = datagram_rx.recv() => match datagram {
                    Some(datagram) => self.on_datagram(datagram).await,
                    None => break Err(ServerError::ReceiverClosed),
                },
                state = states.recv(), if controller_open => match state {
                    Some(state) => self.on_controller_state(state).await,
                    None => {
                        warn!("Controller channel closed, serving requests without reports");
                        controller_open = false;
                    }
                },
            }
        };

        self.cancel.cancel();
        if let Err(e) = receiver.await {
            error!("Receive task failed: {}", e);
        }
        result
    }

    async fn on_datagram(&mut self, datagram: InboundDatagram) {
        match dispatch(
            &mut self.context,
            &datagram.bytes,
            datagram.from,
            Instant::now(),
        ) {
            Ok(replies) => {
                for reply in replies {
                    send(&self.socket, reply).await;
                }
            }
            Err(e @ ProtocolError::ChecksumMismatch { .. }) => {
                warn!("Dropping datagram from {}: {}", datagram.from, e)
            }
            Err(e) => debug!("Dropping datagram from {}: {}", datagram.from, e),
        }
    }

    async fn on_controller_state(&mut self, state: ControllerState) {
        match emit_report(&mut self.context, &state, Instant::now()) {
            Ok(Some(packet)) => send(&self.socket, packet).await,
            Ok(None) => {}
            Err(e) => error!("Failed to encode pad data: {}", e),
        }
    }
}

/// Delay schedule for consecutive socket receive errors.
#[derive(Debug, Default)]
struct ReceiveBackoff {
    failures: u32,
}

impl ReceiveBackoff {
    /// Records a failure. Returns how long to wait before the next receive, or `None` once
    /// the failure budget is spent.
    fn on_error(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= MAX_RECEIVE_FAILURES {
            return None;
        }
        let delay = RECEIVE_BACKOFF_BASE.saturating_mul(1 << (self.failures - 1).min(16));
        Some(delay.min(RECEIVE_BACKOFF_MAX))
    }

    fn reset(&mut self) {
        self.failures = 0;
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    sender: mpsc::Sender<InboundDatagram>,
    cancel: CancellationToken,
) {
    let mut buf = [0u8; MAX_DATAGRAM];
    let mut backoff = ReceiveBackoff::default();
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => received,
        };

        match received {
            Ok((len, from)) => {
                backoff.reset();
                let datagram = InboundDatagram {
                    from,
                    bytes: buf[..len].to_vec(),
                };
                if sender.send(datagram).await.is_err() {
                    debug!("Dispatch loop gone, stopping receiver");
                    break;
                }
            }
            // ICMP errors from earlier sends surface here on some platforms
            Err(e) => {
                let Some(delay) = backoff.on_error() else {
                    error!(
                        "Giving up after {} consecutive receive errors, last: {}",
                        backoff.failures, e
                    );
                    break;
                };
                warn!("Receive error: {} (retrying in {:?})", e, delay);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

async fn send(socket: &UdpSocket, packet: OutboundPacket) {
    match socket.send_to(&packet.bytes, packet.destination).await {
        Ok(sent) if sent != packet.bytes.len() => warn!(
            "Partial send to {}: {} of {} bytes",
            packet.destination,
            sent,
            packet.bytes.len()
        ),
        Ok(_) => {}
        Err(e) => warn!("Send to {} failed: {}", packet.destination, e),
    }
}
