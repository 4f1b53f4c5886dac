//! Non-blocking TCP byte-stream channel.
//!
//! Reads surface whatever chunk the kernel hands over; message delimiting is
//! the job of the [`Framed`](crate::channel::Framed) wrapper stacked on top.
//! Writes drive `write` to completion inside `end_write`, spinning through
//! transient `WouldBlock` so a committed write always means the whole message
//! reached the socket buffer.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use crate::channel::{Channel, ReadStatus, WriteStatus, BUF_SIZE};
use crate::error::Result;

pub struct TcpChannel {
    stream: TcpStream,
    read_buf: Vec<u8>,
    read_len: usize,
    holding: bool,
    write_buf: Vec<u8>,
}

impl TcpChannel {
    /// Wrap a connected stream. The socket must already be non-blocking.
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: vec![0u8; BUF_SIZE],
            read_len: 0,
            holding: false,
            write_buf: vec![0u8; BUF_SIZE],
        }
    }
}

/// Errors that mean the peer is gone rather than a local fault.
fn is_disconnect(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

impl Channel for TcpChannel {
    fn begin_read(&mut self) -> Result<ReadStatus<'_>> {
        if !self.holding {
            match self.stream.read(&mut self.read_buf) {
                Ok(0) => return Ok(ReadStatus::StreamEnded),
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
                Err(e) if is_disconnect(e.kind()) => return Ok(ReadStatus::StreamEnded),
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

        let mut written = 0;
        while written < len {
            match self.stream.write(&self.write_buf[written..len]) {
                Ok(0) => return Ok(WriteStatus::StreamEnded),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_disconnect(e.kind()) => return Ok(WriteStatus::StreamEnded),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(WriteStatus::Committed)
    }
}
