use std::{
    io,
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{Flusher, SEPARATOR};
use crate::{builder::BuildError, telemetry, transport::Transport, writer::Writer};

struct State {
    buf: Vec<u8>,
    line_count: usize,
    last_flush: Instant,
    closed: bool,
}

struct Shared {
    transport: Arc<Transport>,
    buffer_size: usize,
    flush_interval: Duration,
    state: Mutex<State>,
}

impl Shared {
    fn write(&self, line: &str) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        if !state.buf.is_empty() {
            state.buf.push(SEPARATOR);
        }
        state.buf.extend_from_slice(line.as_bytes());
        state.line_count += 1;

        if state.buf.len() >= self.buffer_size {
            self.flush(&mut state);
            telemetry::line_buffer_overflowed(&self.transport);
        }
    }

    fn flush_if_stale(&self) {
        let mut state = self.state.lock();
        if state.last_flush.elapsed() >= self.flush_interval {
            self.flush(&mut state);
        }
    }

    fn flush(&self, state: &mut State) {
        if state.buf.is_empty() {
            return;
        }

        debug!(lines = state.line_count, bytes = state.buf.len(), "Flushing line buffer.");
        self.transport.send(&state.buf);
        telemetry::line_buffer_flushed(&self.transport, state.buf.len());

        state.buf.clear();
        state.line_count = 0;
        state.last_flush = Instant::now();
    }

    fn run(&self, stop: &crossbeam_channel::Receiver<()>) {
        loop {
            match stop.recv_timeout(self.flush_interval) {
                Err(RecvTimeoutError::Timeout) => self.flush_if_stale(),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }
}

/// Coalesces protocol lines into larger payloads behind a single lock.
///
/// Lines are appended to one buffer, separated by newlines. The buffer is written to the transport as a single payload
/// as soon as it reaches the configured size, by whichever write pushed it over, or by a background thread once the
/// flush interval has passed since the last flush. Lines are delivered in the order they were written, and a line is
/// never split across payloads.
///
/// `LineBuffer` suits buffer sizes up to a single datagram. For larger buffers, or many concurrent writers, see
/// [`LowLatencyBuffer`][super::LowLatencyBuffer].
pub struct LineBuffer {
    shared: Arc<Shared>,
    flusher: Mutex<Option<Flusher>>,
}

impl LineBuffer {
    /// Creates a new `LineBuffer` that flushes to `transport`.
    ///
    /// # Errors
    ///
    /// If the background flush thread cannot be spawned, an error is returned.
    pub fn new(transport: Arc<Transport>, buffer_size: usize, flush_interval: Duration) -> Result<Self, BuildError> {
        info!(
            buffer_size,
            flush_interval_secs = flush_interval.as_secs_f64(),
            "Initializing line buffer."
        );

        let shared = Arc::new(Shared {
            transport,
            buffer_size,
            flush_interval,
            state: Mutex::new(State {
                buf: Vec::with_capacity(buffer_size),
                line_count: 0,
                last_flush: Instant::now(),
                closed: false,
            }),
        });

        let flusher = {
            let shared = Arc::clone(&shared);
            Flusher::spawn("spectatord-line-buffer", move |stop| shared.run(&stop))?
        };

        Ok(Self { shared, flusher: Mutex::new(Some(flusher)) })
    }

    /// Returns the configured buffer size, in bytes.
    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_size
    }

    /// Returns the configured flush interval.
    pub fn flush_interval(&self) -> Duration {
        self.shared.flush_interval
    }

    /// Returns the transport the buffer flushes to.
    pub fn transport(&self) -> &Transport {
        &self.shared.transport
    }

    /// Writes any buffered lines to the transport immediately.
    pub fn flush(&self) {
        let mut state = self.shared.state.lock();
        self.shared.flush(&mut state);
    }

    /// Stops the flush thread and performs a final flush, leaving the transport open.
    fn shutdown(&self) {
        // Held until the final flush is done, so a concurrent close waits for it.
        let mut flusher = self.flusher.lock();
        if let Some(flusher) = flusher.take() {
            flusher.stop();
        }

        let mut state = self.shared.state.lock();
        self.shared.flush(&mut state);
        state.closed = true;
    }
}

impl Writer for LineBuffer {
    fn write(&self, line: &str) {
        self.shared.write(line);
    }

    fn flush(&self) {
        LineBuffer::flush(self);
    }

    fn close(&self) -> io::Result<()> {
        self.shutdown();
        self.shared.transport.close()
    }
}

impl Drop for LineBuffer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
