//! A buffered writer for sending metrics protocol lines to [spectatord][spectatord].
//!
//! [spectatord]: https://github.com/Netflix-Skunkworks/spectatord
//!
//! spectatord is a local daemon that aggregates metrics and publishes them on behalf of applications. Applications
//! send it one line of text per meter update, such as `c:server.numRequests,status=200:1`, over a UDP or Unix domain
//! datagram socket. This crate handles getting those lines to the daemon: lines are handed to a [`Writer`], which
//! optionally buffers them before sending, so that many updates share a single datagram.
//!
//! # Usage
//!
//! ```no_run
//! # use std::time::Duration;
//! # use metrics_exporter_spectatord::{Writer as _, WriterBuilder};
//! // Send to the default UDP address, coalescing lines into payloads of up to 60KiB, flushed at least every second.
//! let writer = WriterBuilder::default()
//!     .with_location("udp://127.0.0.1:1234")
//!     .expect("invalid location")
//!     .with_buffer_size(60 * 1024)
//!     .with_flush_interval(Duration::from_secs(1))
//!     .build()
//!     .expect("failed to build writer");
//!
//! writer.write("c:server.numRequests,status=200:1");
//! writer.write("t:server.requestLatency:0.012");
//!
//! // Closing flushes anything still buffered.
//! writer.close().expect("failed to close writer");
//! ```
//!
//! # Features
//!
//! ## Buffering
//!
//! The buffer size picks one of three strategies:
//!
//! - no buffering, where every line is its own datagram
//! - a [`LineBuffer`] for buffers up to 64KiB: a single lock around one buffer, sent whenever it fills up
//! - a [`LowLatencyBuffer`] for anything larger: writes are spread across one shard per CPU, and a background thread
//!   swaps between two sets of shards to send them, so that writers never wait on the network
//!
//! Buffered lines are also sent periodically, so that a quiet application still reports promptly. When a low-latency
//! buffer runs out of space, lines are dropped rather than blocking the writer.
//!
//! ## Locations
//!
//! Besides UDP and Unix domain sockets, lines can be discarded, kept in memory, printed, or appended to a file. See
//! [`Location`] for the supported formats.
//!
//! A Unix domain socket is reconnected lazily if spectatord restarts: the next write after a failure dials the socket
//! again.
//!
//! ## Telemetry
//!
//! Buffers report on their own operation by sending additional lines, under the `spectator-rs` namespace, straight to
//! the transport: bytes written per flush, how full each low-latency buffer set was, and how many lines were dropped.
//!
//! ## Percentile buckets
//!
//! The [`buckets`] module maps samples to a fixed set of 276 logarithmic buckets, and estimates percentiles from
//! per-bucket counts, for meters that report distributions as bucket counters.
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

pub mod atomics;
pub mod buckets;

mod buffer;
pub use self::buffer::{BufferSet, LineBuffer, LowLatencyBuffer, CHUNK_SIZE};

mod builder;
pub use self::builder::{BuildError, WriterBuilder, LINE_BUFFER_MAX_SIZE};

mod telemetry;

mod transport;
#[cfg(unix)]
pub use self::transport::UnixgramTransport;
pub use self::transport::{
    is_valid_location, FileTransport, Location, MemoryTransport, Transport, UdpTransport, DEFAULT_UDP_ADDRESS,
    DEFAULT_UNIX_PATH,
};

mod writer;
pub use self::writer::{Buffering, OutputWriter, Writer};
