use parking_lot::Mutex;

/// Keeps every payload in memory, so that output can be inspected in tests.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    lines: Mutex<Vec<String>>,
}

impl MemoryTransport {
    /// Returns a copy of every payload received so far, in order.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Returns the number of payloads received so far.
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    /// Returns `true` if no payloads have been received.
    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    /// Discards every payload received so far.
    pub fn reset(&self) {
        self.lines.lock().clear();
    }

    pub(super) fn send(&self, payload: &[u8]) {
        let line = String::from_utf8_lossy(payload).into_owned();
        self.lines.lock().push(line);
    }
}
