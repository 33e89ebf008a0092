use std::{io, sync::Arc, time::Duration};

use thiserror::Error;
use tracing::debug;

use crate::{
    buffer::{LineBuffer, LowLatencyBuffer},
    transport::{Location, Transport, DEFAULT_UDP_ADDRESS},
    writer::OutputWriter,
};

const DEFAULT_BUFFER_SIZE: usize = 0;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Largest buffer size, in bytes, that is served by a [`LineBuffer`].
///
/// Larger buffer sizes are served by a [`LowLatencyBuffer`].
pub const LINE_BUFFER_MAX_SIZE: usize = 64 * 1024;

/// Errors that could occur while building a writer.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to parse the output location.
    #[error("invalid output location '{location}': {reason}")]
    InvalidLocation {
        /// The location as given.
        location: String,

        /// Details about the parsing failure.
        reason: String,
    },

    /// The flush interval cannot be used for buffering.
    #[error("flush interval must be greater than zero when buffering is enabled")]
    InvalidFlushInterval,

    /// Failed to resolve a UDP address.
    #[error("failed to resolve address '{address}': {source}")]
    Resolve {
        /// The address as given.
        address: String,

        /// The underlying resolution error.
        source: io::Error,
    },

    /// Failed to open or connect to the output location.
    #[error("failed to connect to '{location}': {source}")]
    Connect {
        /// The location being connected to.
        location: String,

        /// The underlying I/O error.
        source: io::Error,
    },

    /// Failed to spawn the background flush thread.
    #[error("failed to spawn background thread for buffer flushing")]
    Backend,
}

/// Builder for a spectatord writer.
///
/// The buffer size selects how lines are buffered before they are sent:
///
/// - `0`: no buffering, every line is sent as its own payload
/// - up to [`LINE_BUFFER_MAX_SIZE`]: lines are coalesced by a [`LineBuffer`]
/// - anything larger: lines are coalesced by a [`LowLatencyBuffer`]
///
/// Lines written to the `none` location are always discarded directly, regardless of the buffer size.
pub struct WriterBuilder {
    location: Location,
    buffer_size: usize,
    flush_interval: Duration,
}

impl WriterBuilder {
    /// Set the output location to write lines to.
    ///
    /// See [`Location`] for the supported formats.
    ///
    /// Defaults to sending to `127.0.0.1:1234` over UDP.
    ///
    /// # Errors
    ///
    /// If the given location is not able to be parsed, an error will be returned indicating the reason.
    pub fn with_location<A>(mut self, location: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        let location = location.as_ref();
        self.location = location
            .parse()
            .map_err(|reason| BuildError::InvalidLocation { location: location.to_string(), reason })?;
        Ok(self)
    }

    /// Set the buffer size, in bytes.
    ///
    /// For low-latency buffering, the size is raised if needed so that every shard holds at least one chunk.
    ///
    /// Defaults to 0, which disables buffering.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Set the flush interval of the buffer.
    ///
    /// Buffered lines are sent at least this often, even if the buffer never fills up. Has no effect when buffering is
    /// disabled.
    ///
    /// Defaults to 5 seconds.
    #[must_use]
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Returns the configured output location.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Builds the writer.
    ///
    /// The transport for the configured location is opened, and when buffering is enabled, the background flush thread
    /// is spawned.
    ///
    /// # Errors
    ///
    /// If the transport cannot be opened, the flush interval is zero while buffering is enabled, or the flush thread
    /// cannot be spawned, an error will be returned.
    pub fn build(self) -> Result<OutputWriter, BuildError> {
        let transport = Transport::open(&self.location)?;
        self.build_with_transport(transport)
    }

    /// Builds the writer on top of an already opened transport, ignoring the configured location.
    ///
    /// # Errors
    ///
    /// If the flush interval is zero while buffering is enabled, or the flush thread cannot be spawned, an error will be
    /// returned.
    pub fn build_with_transport(self, transport: Transport) -> Result<OutputWriter, BuildError> {
        let transport = Arc::new(transport);
        let buffered = self.buffer_size > 0 && !matches!(*transport, Transport::Noop);
        if buffered && self.flush_interval.is_zero() {
            return Err(BuildError::InvalidFlushInterval);
        }

        debug!(
            transport = transport.transport_id(),
            buffer_size = self.buffer_size,
            "Building spectatord writer."
        );

        let writer = if !buffered {
            OutputWriter::direct(transport)
        } else if self.buffer_size <= LINE_BUFFER_MAX_SIZE {
            let buffer = LineBuffer::new(Arc::clone(&transport), self.buffer_size, self.flush_interval)?;
            OutputWriter::line_buffered(buffer, transport)
        } else {
            let buffer = LowLatencyBuffer::new(Arc::clone(&transport), self.buffer_size, self.flush_interval)?;
            OutputWriter::low_latency(buffer, transport)
        };

        Ok(writer)
    }
}

impl Default for WriterBuilder {
    fn default() -> Self {
        WriterBuilder {
            location: Location::Udp(DEFAULT_UDP_ADDRESS.to_string()),
            buffer_size: DEFAULT_BUFFER_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{BuildError, WriterBuilder, LINE_BUFFER_MAX_SIZE};
    use crate::{
        buffer::CHUNK_SIZE,
        transport::{Location, MemoryTransport, Transport},
        writer::{Buffering, Writer},
    };

    fn memory_writer(buffer_size: usize) -> crate::OutputWriter {
        WriterBuilder::default()
            .with_buffer_size(buffer_size)
            .build_with_transport(Transport::Memory(MemoryTransport::default()))
            .unwrap()
    }

    #[test]
    fn defaults() {
        let builder = WriterBuilder::default();
        assert_eq!(builder.location(), &Location::Udp("127.0.0.1:1234".to_string()));
        assert_eq!(builder.buffer_size, 0);
        assert_eq!(builder.flush_interval, Duration::from_secs(5));
    }

    #[test]
    fn selects_buffering_by_size() {
        let cases = [
            (0, Buffering::None),
            (20, Buffering::Line),
            (LINE_BUFFER_MAX_SIZE, Buffering::Line),
            (LINE_BUFFER_MAX_SIZE + 1, Buffering::LowLatency),
        ];

        for (buffer_size, expected) in cases {
            let writer = memory_writer(buffer_size);
            assert_eq!(writer.buffering(), expected, "buffer size {}", buffer_size);
        }
    }

    #[test]
    fn small_low_latency_size_is_rounded_up() {
        let writer = memory_writer(LINE_BUFFER_MAX_SIZE + 1);
        let buffer = writer.low_latency_buffer().unwrap();
        assert_eq!(buffer.chunks_per_shard(), 1);
        assert_eq!(buffer.buffer_size(), 2 * buffer.shard_count() * CHUNK_SIZE);
    }

    #[test]
    fn none_location_never_buffers() {
        let writer = WriterBuilder::default().with_location("none").unwrap().with_buffer_size(20).build().unwrap();
        assert_eq!(writer.buffering(), Buffering::None);
        assert_eq!(writer.transport().transport_id(), "none");
        writer.write("c:server.requests:1");
        writer.close().unwrap();
    }

    #[test]
    fn line_buffered_scenario() {
        let writer = memory_writer(20);

        writer.write("short");
        assert!(writer.transport().as_memory().unwrap().is_empty());

        writer.write("this_is_a_longer_line");
        assert_eq!(writer.transport().as_memory().unwrap().lines()[0], "short\nthis_is_a_longer_line");
    }

    #[test]
    fn invalid_locations() {
        for location in ["", "invalid", "tcp://localhost:1234", "file://"] {
            let result = WriterBuilder::default().with_location(location);
            assert!(
                matches!(result, Err(BuildError::InvalidLocation { .. })),
                "location '{}' should be rejected",
                location
            );
        }
    }

    #[test]
    fn zero_flush_interval_requires_no_buffering() {
        let result = WriterBuilder::default()
            .with_buffer_size(20)
            .with_flush_interval(Duration::ZERO)
            .build_with_transport(Transport::Memory(MemoryTransport::default()));
        assert!(matches!(result, Err(BuildError::InvalidFlushInterval)));

        let writer = WriterBuilder::default()
            .with_flush_interval(Duration::ZERO)
            .build_with_transport(Transport::Memory(MemoryTransport::default()))
            .unwrap();
        assert_eq!(writer.buffering(), Buffering::None);
    }

    #[test]
    fn unreachable_unix_socket() {
        if cfg!(unix) {
            let result = WriterBuilder::default()
                .with_location("unix:///nonexistent/spectatord.unix")
                .unwrap()
                .build();
            assert!(matches!(result, Err(BuildError::Connect { .. })));
        }
    }

    #[test]
    fn error_messages() {
        let err = WriterBuilder::default().with_location("bogus").err().unwrap();
        assert!(err.to_string().starts_with("invalid output location 'bogus': "));
    }
}
