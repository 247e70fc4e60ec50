// ABOUTME: Non-blocking connection state machine (§4.3): queued outbound/inbound ARMB
// ABOUTME: messages, streamed header/command/payload transfer, per-message timeouts.

use crate::codec::{CodecError, FrameHeader, HEADER_LEN};
use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("message did not complete within the timeout")]
    Timeout,
    #[error("malformed header: {0}")]
    Format(#[from] CodecError),
}

/// One message in flight, either direction. `progress` counts bytes moved
/// across header ‖ command ‖ payload, in that order; `complete()` is the
/// sole predicate the queues are drained on.
#[derive(Debug)]
struct MessageData {
    header: Vec<u8>,
    command: Vec<u8>,
    payload: Vec<u8>,
    progress: usize,
    start: Instant,
    end: Option<Instant>,
}

impl MessageData {
    fn outgoing(command: Vec<u8>, payload: Vec<u8>) -> Result<Self, CodecError> {
        let header = FrameHeader::new(command.len(), payload.len() as u64)?.encode();
        Ok(MessageData {
            header: header.to_vec(),
            command,
            payload,
            progress: 0,
            start: Instant::now(),
            end: None,
        })
    }

    /// A fresh inbound slot: only the 16-byte header buffer is known yet.
    fn incoming_header() -> Self {
        MessageData {
            header: vec![0u8; HEADER_LEN],
            command: Vec::new(),
            payload: Vec::new(),
            progress: 0,
            start: Instant::now(),
            end: None,
        }
    }

    fn header_boundary(&self) -> usize {
        self.header.len()
    }

    fn command_boundary(&self) -> usize {
        self.header.len() + self.command.len()
    }

    fn total_len(&self) -> usize {
        self.header.len() + self.command.len() + self.payload.len()
    }

    fn complete(&self) -> bool {
        self.progress == self.total_len()
    }

    fn elapsed(&self) -> Option<Duration> {
        self.end.map(|e| e.duration_since(self.start))
    }
}

/// A fully received message, handed to `receive()` once its tail is complete.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub command: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Owns one non-blocking TCP socket plus the FIFO outbound/inbound message
/// queues described in §4.3. `update()` is the only suspension point — no
/// I/O happens outside of it, matching the "detail floor" in §4.3.
pub struct Connection {
    socket: TcpStream,
    msg_timeout: Duration,
    outgoing: VecDeque<MessageData>,
    incoming: VecDeque<MessageData>,
    error: Option<ConnectionError>,
    closed: bool,
}

impl Connection {
    pub fn new(socket: TcpStream, msg_timeout: Duration) -> Self {
        Connection {
            socket,
            msg_timeout,
            outgoing: VecDeque::new(),
            incoming: VecDeque::new(),
            error: None,
            closed: false,
        }
    }

    /// Enqueue a command (with optional payload) for sending. Never blocks,
    /// never fails synchronously — a malformed length is reported lazily,
    /// as a connection error, the next time `update` runs.
    pub fn send(&mut self, command: impl Into<Vec<u8>>, payload: Option<Vec<u8>>) {
        match MessageData::outgoing(command.into(), payload.unwrap_or_default()) {
            Ok(msg) => self.outgoing.push_back(msg),
            Err(e) => self.error = Some(ConnectionError::Format(e)),
        }
    }

    /// Pop the head of the inbound queue if it is complete.
    pub fn receive(&mut self) -> Option<IncomingMessage> {
        if self.incoming.front().is_some_and(MessageData::complete) {
            let msg = self.incoming.pop_front().unwrap();
            Some(IncomingMessage {
                command: msg.command,
                payload: msg.payload,
            })
        } else {
            None
        }
    }

    pub fn ok(&self) -> bool {
        self.error.is_none() && !self.closed
    }

    pub fn error(&self) -> Option<&ConnectionError> {
        self.error.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.socket.set_linger(Some(Duration::from_secs(0)));
        }
    }

    /// Advance in-flight transfers by at most one non-blocking read and one
    /// non-blocking write. Call this once per tick; it never awaits.
    pub fn update(&mut self) {
        if !self.ok() {
            return;
        }

        if let Err(e) = self.advance_outgoing() {
            self.fail(e);
            return;
        }
        if let Err(e) = self.advance_incoming() {
            self.fail(e);
        }
    }

    fn fail(&mut self, error: ConnectionError) {
        warn!(?error, "connection failing");
        self.error = Some(error);
    }

    fn advance_outgoing(&mut self) -> Result<(), ConnectionError> {
        let Some(msg) = self.outgoing.front_mut() else {
            return Ok(());
        };

        if msg.start.elapsed() > self.msg_timeout {
            return Err(ConnectionError::Timeout);
        }

        loop {
            let boundary_h = msg.header_boundary();
            let boundary_c = msg.command_boundary();
            let total = msg.total_len();

            let slice: &[u8] = if msg.progress < boundary_h {
                &msg.header[msg.progress..]
            } else if msg.progress < boundary_c {
                &msg.command[(msg.progress - boundary_h)..]
            } else if msg.progress < total {
                &msg.payload[(msg.progress - boundary_c)..]
            } else {
                break;
            };

            match self.socket.try_write(slice) {
                Ok(0) => break,
                Ok(n) => {
                    msg.progress += n;
                    trace!(n, progress = msg.progress, total, "wrote bytes");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if is_peer_gone(&e) => {
                    self.closed = true;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }

        if msg.complete() {
            msg.end = Some(Instant::now());
            let done = self.outgoing.pop_front().unwrap();
            debug!(
                command = %String::from_utf8_lossy(&done.command),
                elapsed_ms = done.elapsed().map(|d| d.as_millis()),
                "sent message"
            );
        }

        Ok(())
    }

    fn advance_incoming(&mut self) -> Result<(), ConnectionError> {
        if self.incoming.is_empty() {
            self.incoming.push_back(MessageData::incoming_header());
        }

        {
            let msg = self.incoming.back().unwrap();
            if msg.start.elapsed() > self.msg_timeout {
                return Err(ConnectionError::Timeout);
            }
            if msg.complete() {
                return Ok(());
            }
        }

        loop {
            let msg = self.incoming.back_mut().unwrap();
            let boundary_h = msg.header_boundary();

            if msg.progress < boundary_h {
                let mut buf = vec![0u8; boundary_h - msg.progress];
                match self.socket.try_read(&mut buf) {
                    Ok(0) => {
                        self.closed = true;
                        return Ok(());
                    }
                    Ok(n) => {
                        let start = msg.progress;
                        msg.header[start..start + n].copy_from_slice(&buf[..n]);
                        msg.progress += n;

                        if msg.progress == boundary_h {
                            let header = FrameHeader::parse(&msg.header)?;
                            let old = self.incoming.pop_back().unwrap();
                            self.incoming.push_back(MessageData {
                                header: old.header,
                                command: vec![0u8; header.command_len],
                                payload: vec![0u8; header.payload_len as usize],
                                progress: old.progress,
                                start: old.start,
                                end: None,
                            });
                        }
                        continue;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if is_peer_gone(&e) => {
                        self.closed = true;
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            let boundary_c = msg.command_boundary();
            let total = msg.total_len();

            let (dest_start, dest_len, into_command) = if msg.progress < boundary_c {
                (msg.progress - boundary_h, boundary_c - msg.progress, true)
            } else if msg.progress < total {
                (msg.progress - boundary_c, total - msg.progress, false)
            } else {
                break;
            };

            let mut buf = vec![0u8; dest_len];
            match self.socket.try_read(&mut buf) {
                Ok(0) => {
                    self.closed = true;
                    return Ok(());
                }
                Ok(n) => {
                    if into_command {
                        msg.command[dest_start..dest_start + n].copy_from_slice(&buf[..n]);
                    } else {
                        msg.payload[dest_start..dest_start + n].copy_from_slice(&buf[..n]);
                    }
                    msg.progress += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if is_peer_gone(&e) => {
                    self.closed = true;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }

        let msg = self.incoming.back_mut().unwrap();
        if msg.complete() {
            msg.end = Some(Instant::now());
            trace!(
                command = %String::from_utf8_lossy(&msg.command),
                "received message"
            );
        }

        Ok(())
    }
}

fn is_peer_gone(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionAborted
    )
}
