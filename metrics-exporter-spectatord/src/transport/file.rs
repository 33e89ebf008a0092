use std::{
    fs::{File, OpenOptions},
    io::{self, Write as _},
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use tracing::{debug, error};

/// Appends payloads to a file, one per line.
pub struct FileTransport {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileTransport {
    /// Opens `path` for appending, creating it if it does not exist.
    ///
    /// # Errors
    ///
    /// If the file cannot be opened, an error is returned.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        Ok(Self { path: path.to_path_buf(), file: Mutex::new(Some(file)) })
    }

    /// Returns the path of the file being written to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(super) fn send(&self, payload: &[u8]) {
        let mut file = self.file.lock();
        let Some(file) = file.as_mut() else {
            debug!(path = %self.path.display(), "Dropping payload for closed file.");
            return;
        };

        if let Err(e) = super::print_line(file, payload) {
            error!(error = %e, path = %self.path.display(), "Failed to write payload to file.");
        }
    }

    pub(super) fn close(&self) -> io::Result<()> {
        match self.file.lock().take() {
            Some(mut file) => file.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{env, fs, process};

    use super::FileTransport;

    #[test]
    fn appends_lines() {
        let path = env::temp_dir().join(format!("spectatord-file-transport-{}.log", process::id()));
        let _ = fs::remove_file(&path);

        let transport = FileTransport::open(&path).unwrap();
        assert_eq!(transport.path(), path.as_path());
        transport.send(b"c:server.requests:1");
        transport.send(b"g:server.load:0.5");
        transport.close().unwrap();

        // Closed transports drop further payloads.
        transport.send(b"c:server.requests:2");

        let reopened = FileTransport::open(&path).unwrap();
        reopened.send(b"c:server.requests:3");
        reopened.close().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "c:server.requests:1\ng:server.load:0.5\nc:server.requests:3\n");

        fs::remove_file(&path).unwrap();
    }
}
