//! Outbound queue and inbound accumulator over a non-blocking byte stream.
//!
//! The buffer never blocks: every I/O call is a single `try_read` or
//! `try_write`, driven by readiness notifications from the event loop.
//! Write interest is only raised while there is something to send, so the
//! loop never spins on a writable socket with an empty queue.

use std::io;

use bytes::{Buf, BytesMut};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use spin_shared::constants::READ_CHUNK_SIZE;

use crate::error::TransportError;
use crate::framer::drain_frames;

/// A duplex stream that supports single non-blocking read and write attempts.
pub trait NonBlockingIo {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl NonBlockingIo for TcpStream {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }
}

#[derive(Debug, Default)]
pub struct TransportBuffer {
    outbound: BytesMut,
    inbound: BytesMut,
    write_interest: bool,
    failed: bool,
}

impl TransportBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes to the outbound queue and raise write interest.
    pub fn enqueue(&mut self, bytes: &[u8]) {
        if self.failed || bytes.is_empty() {
            return;
        }
        self.outbound.extend_from_slice(bytes);
        self.write_interest = true;
    }

    pub fn wants_write(&self) -> bool {
        self.write_interest && !self.failed
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Bytes queued but not yet accepted by the stream.
    pub fn pending_outbound(&self) -> &[u8] {
        &self.outbound
    }

    /// Bytes received but not yet terminated by a newline.
    pub fn pending_inbound(&self) -> &[u8] {
        &self.inbound
    }

    /// Attempt one write of the whole outbound queue.
    pub fn on_writable<S: NonBlockingIo>(&mut self, io: &mut S) -> Result<(), TransportError> {
        if self.failed {
            return Ok(());
        }
        if self.outbound.is_empty() {
            self.write_interest = false;
            return Ok(());
        }

        match io.try_write(&self.outbound) {
            Ok(0) => Err(self.fail(TransportError::WriteZero)),
            Ok(n) => {
                self.outbound.advance(n);
                if !self.outbound.is_empty() {
                    debug!(written = n, remaining = self.outbound.len(), "Short write");
                }
                Ok(())
            }
            Err(e) if is_transient(&e) => Ok(()),
            Err(e) => Err(self.fail(TransportError::Io(e))),
        }
    }

    /// Attempt one read and return every frame completed by it.
    pub fn on_readable<S: NonBlockingIo>(
        &mut self,
        io: &mut S,
    ) -> Result<Vec<Vec<u8>>, TransportError> {
        if self.failed {
            return Ok(Vec::new());
        }

        let mut scratch = [0u8; READ_CHUNK_SIZE];
        match io.try_read(&mut scratch) {
            Ok(0) => Err(self.fail(TransportError::PeerClosed)),
            Ok(n) => {
                self.inbound.extend_from_slice(&scratch[..n]);
                Ok(drain_frames(&mut self.inbound))
            }
            Err(e) if is_transient(&e) => Ok(Vec::new()),
            Err(e) => Err(self.fail(TransportError::Io(e))),
        }
    }

    /// Drop everything queued in both directions.
    pub fn discard(&mut self) {
        self.outbound.clear();
        self.inbound.clear();
        self.write_interest = false;
    }

    fn fail(&mut self, err: TransportError) -> TransportError {
        warn!(error = %err, "Transport failed");
        self.failed = true;
        self.write_interest = false;
        err
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
