use std::{io, sync::Arc};

use tracing::trace;

use crate::{
    buffer::{LineBuffer, LowLatencyBuffer},
    transport::Transport,
};

/// A destination for protocol lines.
///
/// Transports and buffers both implement `Writer`, so a buffer can stand in for the transport it wraps. Writing never
/// fails and never blocks on I/O for longer than a single send: lines that cannot be delivered are logged and dropped.
pub trait Writer: Send + Sync {
    /// Writes a single, already formatted protocol line.
    fn write(&self, line: &str);

    /// Sends any buffered lines immediately.
    fn flush(&self) {}

    /// Flushes any buffered lines and closes the underlying transport.
    ///
    /// Lines written after closing are dropped.
    ///
    /// # Errors
    ///
    /// If the underlying transport fails to close cleanly, an error is returned.
    fn close(&self) -> io::Result<()>;
}

impl Writer for Transport {
    fn write(&self, line: &str) {
        trace!(transport = self.transport_id(), line, "Writing line.");
        self.send(line.as_bytes());
    }

    fn close(&self) -> io::Result<()> {
        Transport::close(self)
    }
}

/// How an [`OutputWriter`] buffers lines before they reach its transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Buffering {
    /// Every line is sent as its own payload.
    None,

    /// Lines are coalesced by a [`LineBuffer`].
    Line,

    /// Lines are coalesced by a [`LowLatencyBuffer`].
    LowLatency,
}

enum Strategy {
    Direct,
    Line(LineBuffer),
    LowLatency(LowLatencyBuffer),
}

/// A writer built by [`WriterBuilder`][crate::WriterBuilder].
///
/// Combines a transport with the buffering strategy chosen for the configured buffer size.
pub struct OutputWriter {
    transport: Arc<Transport>,
    strategy: Strategy,
}

impl OutputWriter {
    /// Writes every line directly to `transport`.
    pub(crate) fn direct(transport: Arc<Transport>) -> Self {
        Self { transport, strategy: Strategy::Direct }
    }

    pub(crate) fn line_buffered(buffer: LineBuffer, transport: Arc<Transport>) -> Self {
        Self { transport, strategy: Strategy::Line(buffer) }
    }

    pub(crate) fn low_latency(buffer: LowLatencyBuffer, transport: Arc<Transport>) -> Self {
        Self { transport, strategy: Strategy::LowLatency(buffer) }
    }

    /// Returns the buffering strategy in use.
    pub fn buffering(&self) -> Buffering {
        match self.strategy {
            Strategy::Direct => Buffering::None,
            Strategy::Line(_) => Buffering::Line,
            Strategy::LowLatency(_) => Buffering::LowLatency,
        }
    }

    /// Returns the transport lines are ultimately sent to.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Returns the line buffer, if lines are buffered by one.
    pub fn line_buffer(&self) -> Option<&LineBuffer> {
        match &self.strategy {
            Strategy::Line(buffer) => Some(buffer),
            _ => None,
        }
    }

    /// Returns the low-latency buffer, if lines are buffered by one.
    pub fn low_latency_buffer(&self) -> Option<&LowLatencyBuffer> {
        match &self.strategy {
            Strategy::LowLatency(buffer) => Some(buffer),
            _ => None,
        }
    }
}

impl Writer for OutputWriter {
    fn write(&self, line: &str) {
        match &self.strategy {
            Strategy::Direct => self.transport.write(line),
            Strategy::Line(buffer) => buffer.write(line),
            Strategy::LowLatency(buffer) => buffer.write(line),
        }
    }

    fn flush(&self) {
        match &self.strategy {
            Strategy::Direct => {}
            Strategy::Line(buffer) => Writer::flush(buffer),
            Strategy::LowLatency(buffer) => buffer.flush(),
        }
    }

    fn close(&self) -> io::Result<()> {
        match &self.strategy {
            Strategy::Direct => Writer::close(&*self.transport),
            Strategy::Line(buffer) => buffer.close(),
            Strategy::LowLatency(buffer) => buffer.close(),
        }
    }
}
