//! Serialised writes of whole messages.

use std::fmt;
use std::io::{BufWriter, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use rpcpipe_protocol::Message;

use crate::error::TransportError;

type Sink = BufWriter<Box<dyn Write + Send>>;

/// Cloneable handle that writes one message per line.
///
/// Each [`WriteSerializer::send`] encodes the message, then writes it, the
/// terminating newline and a flush while holding a single lock, so lines from
/// concurrent senders never interleave. The underlying stream is never handed
/// out.
#[derive(Clone)]
pub struct WriteSerializer {
    sink: Arc<Mutex<Option<Sink>>>,
}

impl fmt::Debug for WriteSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteSerializer")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl WriteSerializer {
    /// Takes ownership of `output`.
    #[must_use]
    pub fn new(output: impl Write + Send + 'static) -> Self {
        let boxed: Box<dyn Write + Send> = Box::new(output);
        Self {
            sink: Arc::new(Mutex::new(Some(BufWriter::new(boxed)))),
        }
    }

    /// Writes `message` followed by `\n` and flushes.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Encode`] if the message cannot be serialised,
    /// [`TransportError::Closed`] after [`WriteSerializer::close`], and
    /// [`TransportError::Io`] if the stream rejects the write.
    pub fn send(&self, message: &Message) -> Result<(), TransportError> {
        let mut line = message.encode()?;
        line.push(b'\n');

        let mut guard = self.lock();
        let sink = guard.as_mut().ok_or(TransportError::Closed)?;
        sink.write_all(&line)?;
        sink.flush()?;
        Ok(())
    }

    /// Flushes and drops the stream, closing the pipe for the peer.
    ///
    /// Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the final flush fails; the stream is
    /// dropped either way.
    pub fn close(&self) -> Result<(), TransportError> {
        let taken = self.lock().take();
        match taken {
            Some(mut sink) => {
                sink.flush()?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Returns whether [`WriteSerializer::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Sink>> {
        self.sink
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}
