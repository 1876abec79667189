//! Filesystem-backed [`FileBackend`]/[`FileBackendFactory`], the only part
//! of the stack that touches a real disk (§4.8: file access is always
//! injected, never performed by the transfer engine itself).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::info;
use umesh_files::{FileBackend, FileBackendFactory, FileTransferError};

/// One file opened for a transfer, either direction.
pub struct FsFileBackend {
    file: File,
    size: u32,
    display_name: String,
}

impl FsFileBackend {
    /// Open `path` for reading (the sending side of a transfer).
    pub fn open_for_send(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len() as u32;
        Ok(Self {
            file,
            size,
            display_name: path.display().to_string(),
        })
    }

    /// Create or truncate `path` for writing (the receiving side).
    pub fn open_for_receive(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .read(true)
            .open(path)?;
        Ok(Self {
            file,
            size: 0,
            display_name: path.display().to_string(),
        })
    }
}

impl FileBackend for FsFileBackend {
    fn size(&mut self) -> u32 {
        self.size
    }

    fn read(&mut self, pos: u32, buf: &mut [u8]) -> Result<(), FileTransferError> {
        self.file
            .seek(SeekFrom::Start(u64::from(pos)))
            .map_err(|_| FileTransferError::BackendFailed)?;
        self.file
            .read_exact(buf)
            .map_err(|_| FileTransferError::BackendFailed)
    }

    fn write(&mut self, pos: u32, buf: &[u8]) -> Result<(), FileTransferError> {
        self.file
            .seek(SeekFrom::Start(u64::from(pos)))
            .map_err(|_| FileTransferError::BackendFailed)?;
        self.file
            .write_all(buf)
            .map_err(|_| FileTransferError::BackendFailed)
    }

    fn close(&mut self) {
        let _ = self.file.flush();
    }

    fn progress(&mut self, transferred_pieces: u32, total_pieces: u32) {
        info!(
            file = %self.display_name,
            transferred_pieces,
            total_pieces,
            "file-transfer: progress"
        );
    }
}

/// Resolves peer-initiated transfers to files under a single share
/// directory. Rejects any file name that would escape it.
pub struct FsBackendFactory {
    share_dir: PathBuf,
}

impl FsBackendFactory {
    /// Serve and accept files under `share_dir`.
    #[must_use]
    pub fn new(share_dir: PathBuf) -> Self {
        Self { share_dir }
    }

    fn resolve(&self, file_name: &str) -> Option<PathBuf> {
        if file_name.is_empty() || file_name.contains('/') || file_name.contains("..") {
            return None;
        }
        Some(self.share_dir.join(file_name))
    }
}

impl FileBackendFactory for FsBackendFactory {
    fn open_for_send(&mut self, file_name: &str) -> Option<Box<dyn FileBackend>> {
        let path = self.resolve(file_name)?;
        FsFileBackend::open_for_send(&path).ok().map(|b| Box::new(b) as Box<dyn FileBackend>)
    }

    fn open_for_receive(&mut self, file_name: &str) -> Option<Box<dyn FileBackend>> {
        let path = self.resolve(file_name)?;
        FsFileBackend::open_for_receive(&path).ok().map(|b| Box::new(b) as Box<dyn FileBackend>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_bytes_through_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");

        let mut writer = FsFileBackend::open_for_receive(&path).unwrap();
        writer.write(0, b"hello ").unwrap();
        writer.write(6, b"world").unwrap();
        writer.close();

        let mut reader = FsFileBackend::open_for_send(&path).unwrap();
        assert_eq!(reader.size(), 11);
        let mut buf = [0u8; 11];
        reader.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn factory_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let mut factory = FsBackendFactory::new(dir.path().to_path_buf());
        assert!(factory.open_for_send("../secret").is_none());
        assert!(factory.open_for_send("a/b").is_none());
    }

    #[test]
    fn factory_serves_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("note.txt"), b"hi").unwrap();
        let mut factory = FsBackendFactory::new(dir.path().to_path_buf());
        let mut backend = factory.open_for_send("note.txt").unwrap();
        assert_eq!(backend.size(), 2);
    }
}
