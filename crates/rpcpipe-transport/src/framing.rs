//! Newline-delimited frame reader.

use std::io::{self, Read};
use std::mem;

use rpcpipe_protocol::{DecodeError, Message};
use tracing::debug;

use crate::error::TransportError;
use crate::gate::ReadinessGate;

const FRAMING_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::framing");
const CHUNK_BYTES: usize = 8 * 1024;

type IdleHook = Box<dyn FnMut() + Send>;

/// One decoded line.
#[derive(Debug)]
pub enum Inbound {
    /// A well-formed JSON-RPC message.
    Message(Message),
    /// A line that could not be decoded; only that line is lost.
    Malformed(DecodeError),
}

/// Reads `\n`-terminated JSON-RPC frames from a byte stream.
///
/// Partial reads are accumulated until a newline arrives. A trailing `\r` is
/// stripped and blank lines are skipped. Lines longer than the configured
/// limit are discarded up to their newline and surfaced as
/// [`Inbound::Malformed`].
///
/// Idle hooks registered with [`FramedLineReader::on_idle`] run, in
/// registration order, every time the reader has no complete frame buffered
/// and is about to call `read` on the underlying stream.
pub struct FramedLineReader<R> {
    source: R,
    pending: Vec<u8>,
    chunk: Box<[u8]>,
    max_message_bytes: usize,
    discarding: bool,
    discarded_bytes: usize,
    idle_hooks: Vec<IdleHook>,
}

impl<R: Read> FramedLineReader<R> {
    /// Wraps `source`, accepting frames of at most `max_message_bytes`.
    #[must_use]
    pub fn new(source: R, max_message_bytes: usize) -> Self {
        Self {
            source,
            pending: Vec::new(),
            chunk: vec![0_u8; CHUNK_BYTES].into_boxed_slice(),
            max_message_bytes,
            discarding: false,
            discarded_bytes: 0,
            idle_hooks: Vec::new(),
        }
    }

    /// Registers a callback for the moment before a potentially blocking read.
    pub fn on_idle(&mut self, hook: impl FnMut() + Send + 'static) {
        self.idle_hooks.push(Box::new(hook));
    }

    /// Signals `gate` the first time the reader waits for input.
    pub fn arm(&mut self, gate: ReadinessGate) {
        self.on_idle(move || gate.signal());
    }

    /// Returns the next frame, or `None` at a clean end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Truncated`] when the stream ends part-way
    /// through a frame and [`TransportError::Io`] when reading fails. Both are
    /// terminal for the stream.
    pub fn read_frame(&mut self) -> Result<Option<Inbound>, TransportError> {
        loop {
            while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
                let line: Vec<u8> = self.pending.drain(..=newline).collect();
                if let Some(inbound) = self.frame(&line) {
                    return Ok(Some(inbound));
                }
            }

            self.discard_oversized();
            self.run_idle_hooks();

            let read = read_chunk_with_retry(&mut self.source, &mut self.chunk)?;
            if read == 0 {
                return self.end_of_stream();
            }
            self.pending
                .extend_from_slice(self.chunk.get(..read).unwrap_or_default());
        }
    }

    fn frame(&mut self, line: &[u8]) -> Option<Inbound> {
        if mem::take(&mut self.discarding) {
            let dropped = mem::take(&mut self.discarded_bytes).saturating_add(line.len());
            debug!(
                target: FRAMING_TARGET,
                bytes = dropped,
                limit = self.max_message_bytes,
                "discarded oversized frame"
            );
            return Some(Inbound::Malformed(DecodeError::oversized(
                self.max_message_bytes,
            )));
        }

        let without_newline = line.strip_suffix(b"\n").unwrap_or(line);
        let payload = without_newline
            .strip_suffix(b"\r")
            .unwrap_or(without_newline);
        if payload.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        if payload.len() > self.max_message_bytes {
            return Some(Inbound::Malformed(DecodeError::oversized(
                self.max_message_bytes,
            )));
        }

        Some(match Message::decode(payload) {
            Ok(message) => Inbound::Message(message),
            Err(error) => Inbound::Malformed(error),
        })
    }

    fn discard_oversized(&mut self) {
        // One extra byte of slack for a trailing carriage return.
        if !self.discarding && self.pending.len() > self.max_message_bytes.saturating_add(1) {
            self.discarding = true;
        }
        if self.discarding {
            self.discarded_bytes = self.discarded_bytes.saturating_add(self.pending.len());
            self.pending.clear();
        }
    }

    fn run_idle_hooks(&mut self) {
        for hook in &mut self.idle_hooks {
            hook();
        }
    }

    fn end_of_stream(&mut self) -> Result<Option<Inbound>, TransportError> {
        let buffered = self.pending.iter().any(|byte| !byte.is_ascii_whitespace());
        if !buffered && !self.discarding {
            self.pending.clear();
            return Ok(None);
        }

        let bytes = mem::take(&mut self.discarded_bytes).saturating_add(self.pending.len());
        self.pending.clear();
        self.discarding = false;
        Err(TransportError::Truncated { bytes })
    }
}

fn read_chunk_with_retry(source: &mut impl Read, chunk: &mut [u8]) -> io::Result<usize> {
    loop {
        match source.read(chunk) {
            Ok(read) => return Ok(read),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
}
