//! The seam between the event loop and the concrete datagram channel.
//!
//! `UdpTransport` is the production implementation; `ChannelTransport`
//! (test-only) lets the end-to-end scenarios in the integration tests run
//! in-process without real sockets.

use std::collections::HashMap;
use std::net::UdpSocket;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;

use crate::message::{Envelope, BROADCAST};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind local UDP socket: {0}")]
    Bind(#[source] std::io::Error),

    #[error("failed to configure socket read timeout: {0}")]
    Configure(#[source] std::io::Error),
}

/// Anything the event loop needs from the network layer.
pub trait Transport {
    /// Fire-and-forget send; failures are logged, never propagated, since
    /// sends are best-effort over an unreliable transport.
    fn send(&self, envelope: &Envelope);

    /// Block for at most `timeout` waiting for one inbound envelope.
    /// Malformed or oversized datagrams are dropped and reported as `None`.
    fn recv_timeout(&self, timeout: Duration) -> Option<Envelope>;
}

/// Binds one ephemeral UDP socket and sends every outbound datagram to a
/// single fixed relay address, exactly mirroring the external contract: this
/// process never needs to know the real address of any peer, because the
/// relay on the other end fans datagrams out by the envelope's `dst` field.
pub struct UdpTransport {
    socket: UdpSocket,
    relay_addr: std::net::SocketAddr,
}

const MAX_DATAGRAM: usize = 65_535;

impl UdpTransport {
    pub fn bind(relay_addr: std::net::SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind("127.0.0.1:0").map_err(TransportError::Bind)?;
        socket
            .set_read_timeout(Some(Duration::from_millis(1)))
            .map_err(TransportError::Configure)?;
        Ok(UdpTransport { socket, relay_addr })
    }
}

impl Transport for UdpTransport {
    fn send(&self, envelope: &Envelope) {
        let json = match envelope.to_json() {
            Ok(j) => j,
            Err(e) => {
                warn!("failed to encode outgoing envelope: {}", e);
                return;
            }
        };
        if let Err(e) = self.socket.send_to(json.as_bytes(), self.relay_addr) {
            warn!("send to relay {} failed: {}", self.relay_addr, e);
        }
    }

    fn recv_timeout(&self, timeout: Duration) -> Option<Envelope> {
        // `set_read_timeout` caps a single `recv_from`; poll in short slices
        // up to the requested bound so the event loop's ~200ms cap holds even
        // though the socket's own timeout is set tighter for responsiveness.
        let deadline = std::time::Instant::now() + timeout;
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((n, _from)) => {
                    let data = match std::str::from_utf8(&buf[..n]) {
                        Ok(d) => d,
                        Err(e) => {
                            debug!("dropping non-utf8 datagram: {}", e);
                            return None;
                        }
                    };
                    return match Envelope::from_json(data) {
                        Ok(env) => Some(env),
                        Err(e) => {
                            debug!("dropping malformed datagram: {}", e);
                            None
                        }
                    };
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    if std::time::Instant::now() >= deadline {
                        return None;
                    }
                }
                Err(e) => {
                    debug!("recv error: {}", e);
                    return None;
                }
            }
        }
    }
}

/// In-memory relay + per-replica channel pair, used only by tests. Models
/// the external simulator's routing behavior, including the `"FFFF"`
/// broadcast id, without any real sockets.
pub struct ChannelTransport {
    id: String,
    inbox: Receiver<Envelope>,
    outbox: Sender<(String, Envelope)>,
}

impl ChannelTransport {
    /// Build one `ChannelTransport` per id in `ids`, all wired to a shared
    /// relay thread that forwards `dst` (or fans out `"FFFF"`) to the right
    /// inbox.
    pub fn cluster(ids: &[String]) -> HashMap<String, ChannelTransport> {
        let (relay_tx, relay_rx) = mpsc::channel::<(String, Envelope)>();
        let mut inboxes = HashMap::new();
        let mut senders: HashMap<String, Sender<Envelope>> = HashMap::new();
        for id in ids {
            let (tx, rx) = mpsc::channel::<Envelope>();
            senders.insert(id.clone(), tx);
            inboxes.insert(id.clone(), rx);
        }

        std::thread::spawn(move || {
            while let Ok((dst, env)) = relay_rx.recv() {
                if dst == BROADCAST {
                    for tx in senders.values() {
                        let _ = tx.send(env.clone());
                    }
                } else if let Some(tx) = senders.get(&dst) {
                    let _ = tx.send(env);
                }
            }
        });

        ids.iter()
            .map(|id| {
                (
                    id.clone(),
                    ChannelTransport {
                        id: id.clone(),
                        inbox: inboxes.remove(id).unwrap(),
                        outbox: relay_tx.clone(),
                    },
                )
            })
            .collect()
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Transport for ChannelTransport {
    fn send(&self, envelope: &Envelope) {
        let _ = self.outbox.send((envelope.dst.clone(), envelope.clone()));
    }

    fn recv_timeout(&self, timeout: Duration) -> Option<Envelope> {
        self.inbox.recv_timeout(timeout).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Body;

    #[test]
    fn channel_transport_delivers_direct_message() {
        let ids = vec!["A".to_string(), "B".to_string()];
        let mut cluster = ChannelTransport::cluster(&ids);
        let a = cluster.remove("A").unwrap();
        let b = cluster.remove("B").unwrap();

        a.send(&Envelope::new(
            "A".into(),
            "B".into(),
            "A".into(),
            Body::Hello,
        ));

        let got = b.recv_timeout(Duration::from_millis(200)).unwrap();
        assert_eq!(got.src, "A");
        assert_eq!(got.dst, "B");
    }

    #[test]
    fn channel_transport_fans_out_broadcast() {
        let ids = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let mut cluster = ChannelTransport::cluster(&ids);
        let a = cluster.remove("A").unwrap();
        let b = cluster.remove("B").unwrap();
        let c = cluster.remove("C").unwrap();

        a.send(&Envelope::new(
            "A".into(),
            BROADCAST.into(),
            "A".into(),
            Body::Hello,
        ));

        assert!(b.recv_timeout(Duration::from_millis(200)).is_some());
        assert!(c.recv_timeout(Duration::from_millis(200)).is_some());
    }

    #[test]
    fn recv_timeout_returns_none_when_idle() {
        let ids = vec!["A".to_string()];
        let mut cluster = ChannelTransport::cluster(&ids);
        let a = cluster.remove("A").unwrap();
        assert!(a.recv_timeout(Duration::from_millis(20)).is_none());
    }
}
