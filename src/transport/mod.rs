//! Transport factory - builds ready-to-poll message channels for either end
//! of the cluster.
//!
//! Three transports share the one [`Channel`] contract:
//! - `Stream`: TCP, wrapped in [`Framed`] with a fixed-size delimiter.
//! - `Datagram`: raw UDP, lossy, one datagram per message.
//! - `ReliableDatagram`: UDP wrapped in [`Reliable`] for sequencing and
//!   retransmission.
//!
//! Port layout follows the original deployment scheme: streams share the base
//! port through a listener, datagram sockets get a dedicated port per
//! participant at `base + participant_id`.

mod tcp;
mod udp;

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::str::FromStr;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::channel::{fixed_size_delimiter, BoxedChannel, Framed, Reliable, Role};
use crate::error::{Error, Result};

pub use tcp::TcpChannel;
pub use udp::UdpChannel;

/// Listener backlog for the stream transport.
const BACKLOG: i32 = 128;

/// Which wire transport carries the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// TCP byte stream with fixed-size framing.
    Stream,
    /// Raw UDP, no delivery guarantee.
    Datagram,
    /// UDP with sequence numbers and retransmission.
    ReliableDatagram,
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" | "stream" => Ok(TransportKind::Stream),
            "udp" | "datagram" => Ok(TransportKind::Datagram),
            "rudp" | "reliable" => Ok(TransportKind::ReliableDatagram),
            other => Err(Error::Config(format!(
                "unknown transport '{}', expected tcp, udp or rudp",
                other
            ))),
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TransportKind::Stream => "tcp",
            TransportKind::Datagram => "udp",
            TransportKind::ReliableDatagram => "rudp",
        })
    }
}

/// Channel factory configured for one cluster.
#[derive(Debug, Clone)]
pub struct Transport {
    kind: TransportKind,
    /// Effective on-wire message size, including padding.
    msg_size: usize,
    /// Retransmission timeout for the reliable datagram transport.
    rto: Duration,
}

impl Transport {
    pub fn new(kind: TransportKind, msg_size: usize, rto: Duration) -> Self {
        Self { kind, msg_size, rto }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Bind the coordinator side for `participants` peers.
    pub fn server(&self, bind: IpAddr, port: u16, participants: usize) -> Result<ServerTransport> {
        match self.kind {
            TransportKind::Stream => {
                let listener = bind_listener(SocketAddr::new(bind, port))?;
                tracing::info!(%bind, port, "stream transport listening");
                Ok(ServerTransport {
                    inner: ServerInner::Stream(listener),
                    msg_size: self.msg_size,
                })
            }
            TransportKind::Datagram | TransportKind::ReliableDatagram => {
                let mut ready = VecDeque::with_capacity(participants);
                for id in 1..=participants {
                    let addr = SocketAddr::new(bind, port + id as u16);
                    let socket = bind_datagram(addr)?;
                    let channel = UdpChannel::awaiting_peer(socket);
                    let boxed: BoxedChannel = match self.kind {
                        TransportKind::ReliableDatagram => {
                            Box::new(Reliable::new(channel, Role::Initiator, self.rto))
                        }
                        _ => Box::new(channel),
                    };
                    ready.push_back(boxed);
                }
                tracing::info!(
                    %bind,
                    first_port = port + 1,
                    last_port = port + participants as u16,
                    "datagram transport bound"
                );
                Ok(ServerTransport {
                    inner: ServerInner::Datagram(ready),
                    msg_size: self.msg_size,
                })
            }
        }
    }

    /// Connect the participant side.
    ///
    /// Stream connects can fail with `ConnectionRefused` while the
    /// coordinator is still coming up; callers retry.
    pub fn client(&self, server: IpAddr, port: u16, participant_id: i16) -> Result<BoxedChannel> {
        match self.kind {
            TransportKind::Stream => {
                let stream = TcpStream::connect(SocketAddr::new(server, port))?;
                stream.set_nodelay(true)?;
                stream.set_nonblocking(true)?;
                Ok(Box::new(Framed::new(
                    TcpChannel::new(stream),
                    fixed_size_delimiter(self.msg_size),
                )))
            }
            TransportKind::Datagram | TransportKind::ReliableDatagram => {
                if participant_id < 1 {
                    return Err(Error::Config(format!(
                        "datagram transports need a participant id >= 1, got {}",
                        participant_id
                    )));
                }
                let socket = UdpSocket::bind(("0.0.0.0", 0))?;
                socket.connect(SocketAddr::new(server, port + participant_id as u16))?;
                socket.set_nonblocking(true)?;
                let channel = UdpChannel::connected(socket);
                Ok(match self.kind {
                    TransportKind::ReliableDatagram => {
                        Box::new(Reliable::new(channel, Role::Responder, self.rto))
                    }
                    _ => Box::new(channel),
                })
            }
        }
    }
}

enum ServerInner {
    Stream(TcpListener),
    Datagram(VecDeque<BoxedChannel>),
}

/// Coordinator-side channel source. Polled until one channel per participant
/// has been handed out.
pub struct ServerTransport {
    inner: ServerInner,
    msg_size: usize,
}

impl ServerTransport {
    /// Non-blocking accept: `Ok(None)` means no new channel yet.
    pub fn poll_accept(&mut self) -> Result<Option<BoxedChannel>> {
        match &mut self.inner {
            ServerInner::Stream(listener) => match listener.accept() {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "stream peer connected");
                    stream.set_nodelay(true)?;
                    stream.set_nonblocking(true)?;
                    Ok(Some(Box::new(Framed::new(
                        TcpChannel::new(stream),
                        fixed_size_delimiter(self.msg_size),
                    ))))
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(None),
                Err(e) => Err(e.into()),
            },
            // Datagram channels exist as soon as their socket is bound.
            ServerInner::Datagram(ready) => Ok(ready.pop_front()),
        }
    }
}

fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

fn bind_datagram(addr: SocketAddr) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_parsing() {
        assert_eq!("tcp".parse::<TransportKind>().unwrap(), TransportKind::Stream);
        assert_eq!("stream".parse::<TransportKind>().unwrap(), TransportKind::Stream);
        assert_eq!("udp".parse::<TransportKind>().unwrap(), TransportKind::Datagram);
        assert_eq!(
            "rudp".parse::<TransportKind>().unwrap(),
            TransportKind::ReliableDatagram
        );
        assert!("sctp".parse::<TransportKind>().is_err());
    }

    #[test]
    fn test_transport_kind_display_roundtrip() {
        for kind in [
            TransportKind::Stream,
            TransportKind::Datagram,
            TransportKind::ReliableDatagram,
        ] {
            assert_eq!(kind.to_string().parse::<TransportKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_datagram_client_rejects_bad_id() {
        let t = Transport::new(TransportKind::Datagram, 16, Duration::from_millis(200));
        let err = t
            .client("127.0.0.1".parse().unwrap(), 7331, 0)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }
}
