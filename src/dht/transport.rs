use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::trace;

use super::message::DhtMessage;

/// Capacity of the decoded-inbound queue; datagrams beyond it are dropped.
pub const INBOUND_QUEUE_CAPACITY: usize = 1024;

/// Outbound half of the datagram transport.
///
/// Sends must not block: the message loop calls this from its tick.
/// Delivery is at most once.
pub trait Transport: Send + Sync + 'static {
    fn send_datagram(&self, data: &[u8], destination: SocketAddr) -> io::Result<()>;
}

impl Transport for UdpSocket {
    fn send_datagram(&self, data: &[u8], destination: SocketAddr) -> io::Result<()> {
        self.try_send_to(data, destination).map(|_| ())
    }
}

pub(crate) type InboundMessage = (SocketAddr, DhtMessage);

/// Inbound half: decodes raw datagrams and queues them for the message loop.
///
/// Undecodable datagrams are dropped here so the loop only ever sees
/// well-formed messages.
#[derive(Clone)]
pub struct Inbound {
    tx: mpsc::Sender<InboundMessage>,
}

impl Inbound {
    pub(crate) fn channel() -> (Self, mpsc::Receiver<InboundMessage>) {
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        (Self { tx }, rx)
    }

    /// Queues one datagram received from `source`.
    ///
    /// Returns false once the engine has stopped.
    pub fn deliver(&self, source: SocketAddr, data: &[u8]) -> bool {
        match DhtMessage::decode(data) {
            Ok(msg) => match self.tx.try_send((source, msg)) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    trace!("inbound queue full, dropping datagram from {}", source);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
            Err(e) => {
                trace!("dropping malformed datagram from {}: {}", source, e);
                !self.tx.is_closed()
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Reads datagrams from `socket` until the engine stops.
pub(crate) async fn read_socket(socket: std::sync::Arc<UdpSocket>, inbound: Inbound) {
    let mut buf = vec![0u8; 65535];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, source)) => {
                if !inbound.deliver(source, &buf[..n]) {
                    break;
                }
            }
            // ICMP port-unreachable and similar surface here; keep reading.
            Err(e) => trace!("DHT socket receive error: {}", e),
        }
    }
}
