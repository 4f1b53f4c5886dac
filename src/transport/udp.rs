//! Non-blocking UDP datagram channel.
//!
//! One datagram is one logical message, so no framing wrapper is needed. The
//! transport is lossy by nature; stacking [`Reliable`](crate::channel::Reliable)
//! on top turns it into a reliable message channel.
//!
//! Coordinator-side channels start unconnected: the socket is bound to its
//! participant's dedicated port and the first datagram to arrive reveals the
//! peer address, at which point the socket is connected to it. Until then
//! writes report `WouldBlock` and reads poll `recv_from`.

use std::io;
use std::net::UdpSocket;

use crate::channel::{Channel, ReadStatus, WriteStatus, BUF_SIZE};
use crate::error::Result;

pub struct UdpChannel {
    socket: UdpSocket,
    connected: bool,
    read_buf: Vec<u8>,
    read_len: usize,
    holding: bool,
    write_buf: Vec<u8>,
}

impl UdpChannel {
    /// Wrap a socket already connected to its peer. The socket must be
    /// non-blocking.
    pub fn connected(socket: UdpSocket) -> Self {
        Self::new(socket, true)
    }

    /// Wrap a bound but unconnected socket; the first inbound datagram
    /// determines the peer.
    pub fn awaiting_peer(socket: UdpSocket) -> Self {
        Self::new(socket, false)
    }

    fn new(socket: UdpSocket, connected: bool) -> Self {
        Self {
            socket,
            connected,
            read_buf: vec![0u8; BUF_SIZE],
            read_len: 0,
            holding: false,
            write_buf: vec![0u8; BUF_SIZE],
        }
    }

    fn poll_recv(&mut self) -> io::Result<usize> {
        if self.connected {
            self.socket.recv(&mut self.read_buf)
        } else {
            let (n, peer) = self.socket.recv_from(&mut self.read_buf)?;
            self.socket.connect(peer)?;
            self.connected = true;
            tracing::debug!(%peer, "datagram channel latched to peer");
            Ok(n)
        }
    }
}

impl Channel for UdpChannel {
    fn begin_read(&mut self) -> Result<ReadStatus<'_>> {
        if !self.holding {
            match self.poll_recv() {
                Ok(n) => {
                    self.read_len = n;
                    self.holding = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadStatus::WouldBlock)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    return Ok(ReadStatus::WouldBlock)
                }
                // ICMP port-unreachable bounces surface here on connected
                // sockets; the datagram is simply lost.
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    return Ok(ReadStatus::WouldBlock)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(ReadStatus::Ready(&self.read_buf[..self.read_len]))
    }

    fn end_read(&mut self) {
        self.holding = false;
        self.read_len = 0;
    }

    fn begin_write(&mut self) -> &mut [u8] {
        &mut self.write_buf
    }

    fn end_write(&mut self, len: usize) -> Result<WriteStatus> {
        assert!(len <= self.write_buf.len(), "write exceeds staging buffer");

        if !self.connected {
            // No peer yet; nothing to send to.
            return Ok(WriteStatus::WouldBlock);
        }

        match self.socket.send(&self.write_buf[..len]) {
            Ok(_) => Ok(WriteStatus::Committed),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(WriteStatus::WouldBlock),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(WriteStatus::WouldBlock),
            // A refused bounce means the datagram was dropped on the floor,
            // which is the normal fate of a datagram.
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => Ok(WriteStatus::Committed),
            Err(e) => Err(e.into()),
        }
    }
}
