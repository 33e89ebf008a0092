use std::{fmt, thread::JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::error;

use crate::builder::BuildError;

mod line;
pub use self::line::LineBuffer;

mod low_latency;
pub use self::low_latency::{LowLatencyBuffer, CHUNK_SIZE};

/// Separates protocol lines combined into a single payload.
pub(crate) const SEPARATOR: u8 = b'\n';

/// One of the two shard sets of a [`LowLatencyBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferSet {
    /// The set that is active when the buffer is created.
    Front,

    /// The other set.
    Back,
}

impl BufferSet {
    /// Returns the value used for the `bufferSet` tag.
    pub const fn as_str(self) -> &'static str {
        match self {
            BufferSet::Front => "front",
            BufferSet::Back => "back",
        }
    }
}

impl fmt::Display for BufferSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a buffer's background flush thread.
pub(crate) struct Flusher {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Flusher {
    /// Spawns a named flush thread running `run`.
    ///
    /// `run` receives the stop signal, which fires (or disconnects) when the thread should exit.
    pub fn spawn<F>(name: &str, run: F) -> Result<Self, BuildError>
    where
        F: FnOnce(Receiver<()>) + Send + 'static,
    {
        let (stop, stop_rx) = bounded(1);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(stop_rx))
            .map_err(|_| BuildError::Backend)?;

        Ok(Self { stop, handle })
    }

    /// Signals the flush thread to exit, and waits for it.
    pub fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            error!("Buffer flush thread panicked.");
        }
    }
}
