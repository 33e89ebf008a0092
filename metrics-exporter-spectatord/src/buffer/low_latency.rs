use std::{
    io,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use crossbeam_channel::{select, tick, Receiver};
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{BufferSet, Flusher, SEPARATOR};
use crate::{builder::BuildError, telemetry, transport::Transport, writer::Writer};

/// Size of a single chunk, in bytes.
///
/// Each chunk is sent as one datagram, so it has to fit under the 64KiB datagram ceiling, with enough room left to
/// append one more protocol line of maximum length (about 3.8KiB).
pub const CHUNK_SIZE: usize = 60 * 1024;

/// The unit of buffering: a fixed number of pre-allocated chunks behind a single lock.
struct BufferShard {
    chunks: Vec<Vec<u8>>,
    chunk_index: usize,
    overflows: u64,
}

impl BufferShard {
    fn new(num_chunks: usize) -> Self {
        let chunks = (0..num_chunks).map(|_| Vec::with_capacity(CHUNK_SIZE)).collect();
        Self { chunks, chunk_index: 0, overflows: 0 }
    }

    /// Picks the chunk that `line_len` bytes should be written to, advancing to the next chunk when the current one
    /// cannot fit the line.
    ///
    /// Returns `None`, and counts an overflow, when the shard is out of space or the line can never fit in a chunk.
    fn chunk_for_line(&mut self, line_len: usize) -> Option<usize> {
        if self.chunk_index >= self.chunks.len() || line_len > CHUNK_SIZE {
            self.overflows += 1;
            return None;
        }

        let current_len = self.chunks[self.chunk_index].len();
        let separator_len = usize::from(current_len > 0);
        if current_len + separator_len + line_len > CHUNK_SIZE {
            self.chunk_index += 1;
        }

        if self.chunk_index == self.chunks.len() {
            self.overflows += 1;
            return None;
        }

        Some(self.chunk_index)
    }

    /// Appends a line, returning `false` if it was dropped.
    fn append(&mut self, line: &[u8]) -> bool {
        let Some(index) = self.chunk_for_line(line.len()) else {
            return false;
        };

        let chunk = &mut self.chunks[index];
        if !chunk.is_empty() {
            chunk.push(SEPARATOR);
        }
        chunk.extend_from_slice(line);
        true
    }

    /// Sends every non-empty chunk to the transport and resets the shard, returning the bytes sent and the overflows
    /// counted since the last drain.
    fn drain(&mut self, transport: &Transport) -> (usize, u64) {
        let mut bytes = 0;
        let last = self.chunk_index.min(self.chunks.len() - 1);
        for chunk in &mut self.chunks[..=last] {
            if !chunk.is_empty() {
                bytes += chunk.len();
                transport.send(chunk);
                chunk.clear();
            }
        }

        self.chunk_index = 0;
        (bytes, std::mem::take(&mut self.overflows))
    }
}

type ShardSet = Box<[CachePadded<Mutex<BufferShard>>]>;

fn shard_set(num_shards: usize, num_chunks: usize) -> ShardSet {
    (0..num_shards).map(|_| CachePadded::new(Mutex::new(BufferShard::new(num_chunks)))).collect()
}

struct Shared {
    transport: Arc<Transport>,
    front: ShardSet,
    back: ShardSet,
    use_front: AtomicBool,
    next_shard: AtomicUsize,
    buffer_size: usize,
    chunks_per_shard: usize,
    closed: AtomicBool,
    flush_lock: Mutex<()>,
}

impl Shared {
    /// Appends a line to the active set, returning `false` if it was dropped.
    fn write(&self, line: &str) -> bool {
        let shard_index = self.next_shard.fetch_add(1, Ordering::Relaxed) % self.front.len();
        let shards = if self.use_front.load(Ordering::Acquire) { &self.front } else { &self.back };
        let mut shard = shards[shard_index].lock();

        // Checked under the shard lock: the final drain either sees this line, or this write sees `closed`.
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        shard.append(line.as_bytes())
    }

    fn swap_and_flush(&self) {
        let _flushing = self.flush_lock.lock();

        // Redirect writers to the other set first, so the set being drained only sees writers that already picked it.
        let was_front = self.use_front.fetch_xor(true, Ordering::AcqRel);
        let (set, shards) = if was_front { (BufferSet::Front, &self.front) } else { (BufferSet::Back, &self.back) };

        let mut bytes = 0;
        let mut overflows = 0;
        for shard in shards.iter() {
            let (shard_bytes, shard_overflows) = shard.lock().drain(&self.transport);
            bytes += shard_bytes;
            overflows += shard_overflows;
        }

        debug!(buffer_set = %set, bytes, overflows, "Flushed buffer set.");
        telemetry::buffer_set_flushed(&self.transport, set, bytes, self.buffer_size / 2, overflows);
    }

    fn run(&self, flush_interval: Duration, stop: &Receiver<()>) {
        let ticker = tick(flush_interval);
        loop {
            select! {
                recv(ticker) -> _ => self.swap_and_flush(),
                recv(stop) -> _ => break,
            }
        }
    }
}

/// Buffers protocol lines across many writers with minimal contention.
///
/// Writes are spread round-robin across one shard per CPU, each behind its own lock. There are two full sets of shards,
/// front and back: writers only touch the active set, while a background thread periodically swaps the sets and drains
/// the one that just became inactive, sending each chunk as its own payload. Writers therefore never wait on I/O, and
/// at most contend on a single shard lock.
///
/// Memory is bounded and allocated up front. When a shard runs out of chunks, further lines written to it are dropped
/// and counted until the next flush; drops are reported as an `overflows` counter alongside the bytes written and the
/// usage of each drained set.
pub struct LowLatencyBuffer {
    shared: Arc<Shared>,
    flush_interval: Duration,
    flusher: Mutex<Option<Flusher>>,
}

impl LowLatencyBuffer {
    /// Creates a new `LowLatencyBuffer` with one shard per CPU, flushing to `transport`.
    ///
    /// `buffer_size` covers both shard sets. Each shard gets `buffer_size / (2 * shards * CHUNK_SIZE)` chunks, and if
    /// that is less than one, the buffer size is raised so that every shard gets a single chunk.
    ///
    /// # Errors
    ///
    /// If the background flush thread cannot be spawned, an error is returned.
    pub fn new(transport: Arc<Transport>, buffer_size: usize, flush_interval: Duration) -> Result<Self, BuildError> {
        Self::with_shards(transport, buffer_size, flush_interval, num_cpus::get())
    }

    pub(crate) fn with_shards(
        transport: Arc<Transport>,
        buffer_size: usize,
        flush_interval: Duration,
        num_shards: usize,
    ) -> Result<Self, BuildError> {
        let num_shards = num_shards.max(1);
        let (chunks_per_shard, buffer_size) = match buffer_size / (2 * num_shards * CHUNK_SIZE) {
            0 => (1, 2 * num_shards * CHUNK_SIZE),
            n => (n, buffer_size),
        };

        info!(
            buffer_size,
            num_shards,
            chunks_per_shard,
            flush_interval_secs = flush_interval.as_secs_f64(),
            "Initializing low-latency buffer."
        );

        let shared = Arc::new(Shared {
            transport,
            front: shard_set(num_shards, chunks_per_shard),
            back: shard_set(num_shards, chunks_per_shard),
            use_front: AtomicBool::new(true),
            next_shard: AtomicUsize::new(0),
            buffer_size,
            chunks_per_shard,
            closed: AtomicBool::new(false),
            flush_lock: Mutex::new(()),
        });

        let flusher = {
            let shared = Arc::clone(&shared);
            Flusher::spawn("spectatord-low-latency-buffer", move |stop| shared.run(flush_interval, &stop))?
        };

        Ok(Self { shared, flush_interval, flusher: Mutex::new(Some(flusher)) })
    }

    /// Returns the effective buffer size, in bytes, across both shard sets.
    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_size
    }

    /// Returns the number of shards in each set.
    pub fn shard_count(&self) -> usize {
        self.shared.front.len()
    }

    /// Returns the number of chunks in each shard.
    pub fn chunks_per_shard(&self) -> usize {
        self.shared.chunks_per_shard
    }

    /// Returns the configured flush interval.
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Returns the transport the buffer flushes to.
    pub fn transport(&self) -> &Transport {
        &self.shared.transport
    }

    /// Returns the shard set currently receiving writes.
    pub fn active_set(&self) -> BufferSet {
        if self.shared.use_front.load(Ordering::Acquire) {
            BufferSet::Front
        } else {
            BufferSet::Back
        }
    }

    /// Swaps the active shard set, and drains the set that was active to the transport.
    ///
    /// This is what the background thread does on every flush interval.
    pub fn swap_and_flush(&self) {
        self.shared.swap_and_flush();
    }

    /// Stops the flush thread and drains both sets one last time, leaving the transport open.
    fn shutdown(&self) {
        // Held until both drains are done, so a concurrent close waits for them before closing the transport.
        let mut flusher = self.flusher.lock();
        if let Some(flusher) = flusher.take() {
            flusher.stop();
            self.shared.closed.store(true, Ordering::Release);

            // A writer that raced the last swap may have landed in the inactive set.
            self.shared.swap_and_flush();
            self.shared.swap_and_flush();
        }
    }
}

impl Writer for LowLatencyBuffer {
    fn write(&self, line: &str) {
        let _ = self.shared.write(line);
    }

    fn flush(&self) {
        self.swap_and_flush();
    }

    fn close(&self) -> io::Result<()> {
        self.shutdown();
        self.shared.transport.close()
    }
}

impl Drop for LowLatencyBuffer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Barrier},
        thread,
        time::{Duration, Instant},
    };

    use super::{LowLatencyBuffer, CHUNK_SIZE};
    use crate::{
        buffer::BufferSet,
        transport::{MemoryTransport, Transport},
        writer::Writer,
    };

    const LONG_INTERVAL: Duration = Duration::from_secs(180);

    /// Creates a buffer with two chunks per shard, over an in-memory transport.
    fn memory_buffer(num_shards: usize, flush_interval: Duration) -> (LowLatencyBuffer, Arc<Transport>) {
        let transport = Arc::new(Transport::Memory(MemoryTransport::default()));
        let buffer_size = 2 * 2 * CHUNK_SIZE * num_shards;
        let buffer =
            LowLatencyBuffer::with_shards(Arc::clone(&transport), buffer_size, flush_interval, num_shards).unwrap();
        (buffer, transport)
    }

    /// Splits flushed payloads into protocol lines, without the buffer's own telemetry.
    fn protocol_lines(transport: &Transport) -> Vec<String> {
        transport
            .as_memory()
            .unwrap()
            .lines()
            .iter()
            .flat_map(|payload| payload.split('\n'))
            .filter(|line| !line.contains("spectator-rs.lowLatencyBuffer"))
            .map(str::to_string)
            .collect()
    }

    fn telemetry_lines(transport: &Transport) -> Vec<String> {
        transport
            .as_memory()
            .unwrap()
            .lines()
            .into_iter()
            .filter(|line| line.contains("spectator-rs.lowLatencyBuffer"))
            .collect()
    }

    #[test]
    fn sizing() {
        let transport = Arc::new(Transport::Noop);

        // Too small: rounded up to one chunk per shard.
        let buffer = LowLatencyBuffer::with_shards(Arc::clone(&transport), 65_537, LONG_INTERVAL, 4).unwrap();
        assert_eq!(buffer.shard_count(), 4);
        assert_eq!(buffer.chunks_per_shard(), 1);
        assert_eq!(buffer.buffer_size(), 2 * 4 * CHUNK_SIZE);

        let buffer = LowLatencyBuffer::with_shards(Arc::clone(&transport), 3 * 2 * 4 * CHUNK_SIZE + 100, LONG_INTERVAL, 4)
            .unwrap();
        assert_eq!(buffer.chunks_per_shard(), 3);
        assert_eq!(buffer.buffer_size(), 3 * 2 * 4 * CHUNK_SIZE + 100);

        let buffer = LowLatencyBuffer::new(transport, 1, LONG_INTERVAL).unwrap();
        assert_eq!(buffer.shard_count(), num_cpus::get().max(1));
        assert_eq!(buffer.chunks_per_shard(), 1);
    }

    #[test]
    fn shard_message_distribution() {
        let shards = num_cpus::get();
        let (buffer, transport) = memory_buffer(shards, Duration::from_millis(10));

        let num_messages = shards * 10;
        for i in 0..num_messages {
            buffer.write(&format!("message={},", i));
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while protocol_lines(&transport).len() < num_messages && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        let mut lines = protocol_lines(&transport);
        lines.sort();
        let mut expected = (0..num_messages).map(|i| format!("message={},", i)).collect::<Vec<_>>();
        expected.sort();
        assert_eq!(lines, expected);
    }

    #[test]
    fn writes_are_spread_across_shards() {
        let (buffer, _transport) = memory_buffer(4, LONG_INTERVAL);
        for _ in 0..8 {
            buffer.write("c:spread:1");
        }

        for shard in buffer.shared.front.iter() {
            let shard = shard.lock();
            assert_eq!(shard.chunks[0], b"c:spread:1\nc:spread:1");
        }
        for shard in buffer.shared.back.iter() {
            assert!(shard.lock().chunks[0].is_empty());
        }
    }

    #[test]
    fn front_buffers_flush_first() {
        let (buffer, transport) = memory_buffer(num_cpus::get(), LONG_INTERVAL);
        assert_eq!(buffer.active_set(), BufferSet::Front);

        buffer.write("message1");
        buffer.swap_and_flush();

        assert_eq!(buffer.active_set(), BufferSet::Back);
        assert_eq!(protocol_lines(&transport), vec!["message1"]);
        assert!(telemetry_lines(&transport)
            .contains(&"c:spectator-rs.lowLatencyBuffer.bytesWritten,bufferSet=front:8".to_string()));
    }

    #[test]
    fn swap_drains_only_previously_active_set() {
        let (buffer, transport) = memory_buffer(2, LONG_INTERVAL);

        buffer.write("first");
        buffer.swap_and_flush();
        buffer.write("second");
        assert_eq!(protocol_lines(&transport), vec!["first"]);

        transport.as_memory().unwrap().reset();
        buffer.swap_and_flush();
        assert_eq!(buffer.active_set(), BufferSet::Front);
        assert_eq!(protocol_lines(&transport), vec!["second"]);
        assert!(telemetry_lines(&transport)
            .contains(&"c:spectator-rs.lowLatencyBuffer.bytesWritten,bufferSet=back:6".to_string()));

        // Both sets are empty now: nothing is sent, not even telemetry.
        transport.as_memory().unwrap().reset();
        buffer.swap_and_flush();
        buffer.swap_and_flush();
        assert!(transport.as_memory().unwrap().is_empty());
    }

    #[test]
    fn chunk_boundaries_half_size() {
        let shards = num_cpus::get();
        let (buffer, transport) = memory_buffer(shards, LONG_INTERVAL);

        let msg = "x".repeat(CHUNK_SIZE / 2);
        for _ in 0..2 * shards {
            buffer.write(&msg);
        }
        buffer.swap_and_flush();

        let lines = protocol_lines(&transport);
        assert_eq!(lines.len(), 2 * shards);
        assert!(lines.iter().all(|line| line.len() == CHUNK_SIZE / 2));
    }

    #[test]
    fn chunk_boundaries_max_size() {
        let shards = num_cpus::get();
        let (buffer, transport) = memory_buffer(shards, LONG_INTERVAL);

        let msg = "x".repeat(CHUNK_SIZE);
        for _ in 0..2 * shards {
            buffer.write(&msg);
        }
        buffer.swap_and_flush();

        let lines = protocol_lines(&transport);
        assert_eq!(lines.len(), 2 * shards);
        assert!(lines.iter().all(|line| line.len() == CHUNK_SIZE));

        // Every chunk is sent as its own payload.
        let payloads = transport.as_memory().unwrap().lines();
        assert!(payloads.iter().all(|payload| payload.len() <= CHUNK_SIZE));
    }

    #[test]
    fn over_max_size_is_dropped() {
        let shards = num_cpus::get();
        let (buffer, transport) = memory_buffer(shards, LONG_INTERVAL);

        let msg = "x".repeat(CHUNK_SIZE + 1);
        for _ in 0..2 * shards {
            buffer.write(&msg);
        }

        let overflows = buffer.shared.front.iter().map(|shard| shard.lock().overflows).sum::<u64>();
        assert_eq!(overflows, 2 * shards as u64);

        buffer.swap_and_flush();
        assert!(protocol_lines(&transport).is_empty());
        assert_eq!(
            telemetry_lines(&transport),
            vec![format!("c:spectator-rs.lowLatencyBuffer.overflows,bufferSet=front:{}", 2 * shards)]
        );

        // Overflow counters are reset by the drain.
        assert!(buffer.shared.front.iter().all(|shard| shard.lock().overflows == 0));
    }

    #[test]
    fn full_shard_drops_until_drained() {
        let (buffer, transport) = memory_buffer(1, LONG_INTERVAL);

        let msg = "x".repeat(CHUNK_SIZE);
        for _ in 0..3 {
            buffer.write(&msg);
        }
        buffer.write("small");
        assert_eq!(buffer.shared.front[0].lock().overflows, 2);

        buffer.swap_and_flush();
        assert_eq!(protocol_lines(&transport).len(), 2);

        // The drained set accepts writes again once it becomes active.
        transport.as_memory().unwrap().reset();
        buffer.swap_and_flush();
        buffer.write("small");
        buffer.swap_and_flush();
        assert_eq!(protocol_lines(&transport), vec!["small"]);
    }

    #[test]
    fn usage_is_reported_as_fraction_of_set() {
        let (buffer, transport) = memory_buffer(1, LONG_INTERVAL);

        buffer.write(&"x".repeat(CHUNK_SIZE));
        buffer.swap_and_flush();

        assert_eq!(
            telemetry_lines(&transport),
            vec![
                format!("c:spectator-rs.lowLatencyBuffer.bytesWritten,bufferSet=front:{}", CHUNK_SIZE),
                "g,1:spectator-rs.lowLatencyBuffer.pctUsage,bufferSet=front:0.5".to_string(),
            ]
        );
    }

    #[test]
    fn close_drains_and_ignores_later_writes() {
        let (buffer, transport) = memory_buffer(2, LONG_INTERVAL);

        buffer.write("message1");
        buffer.write("message2");
        buffer.close().unwrap();
        buffer.write("message3");

        let mut lines = protocol_lines(&transport);
        lines.sort();
        assert_eq!(lines, vec!["message1", "message2"]);
    }

    #[test]
    fn concurrent_close_keeps_every_accepted_line() {
        for _ in 0..20 {
            let (buffer, transport) = memory_buffer(4, LONG_INTERVAL);
            let buffer = Arc::new(buffer);
            let barrier = Arc::new(Barrier::new(6));

            let writers = (0..4)
                .map(|t| {
                    let buffer = Arc::clone(&buffer);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        (0..2_000)
                            .filter(|i| buffer.shared.write(&format!("c:writer,thread={}:{}", t, i)))
                            .count()
                    })
                })
                .collect::<Vec<_>>();
            let closers = (0..2)
                .map(|_| {
                    let buffer = Arc::clone(&buffer);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        buffer.close().unwrap();
                    })
                })
                .collect::<Vec<_>>();

            let accepted = writers.into_iter().map(|handle| handle.join().unwrap()).sum::<usize>();
            for handle in closers {
                handle.join().unwrap();
            }

            assert_eq!(protocol_lines(&transport).len(), accepted);
        }
    }

    #[test]
    fn concurrent_writers_within_capacity_lose_nothing() {
        let (buffer, transport) = memory_buffer(4, Duration::from_millis(5));
        let buffer = Arc::new(buffer);

        let handles = (0..8)
            .map(|t| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..1_000 {
                        buffer.write(&format!("c:writer,thread={}:{}", t, i));
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        buffer.close().unwrap();

        assert_eq!(protocol_lines(&transport).len(), 8 * 1_000);
    }
}
