//! Filesystem seam: enumeration and stream open/create behind a trait so the
//! scheduler and processors never touch `std::fs` directly.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::errors::{open_error, CarveResult};
use crate::source::{ByteSource, FileSource, MemorySource};

/// File and directory access consumed by the coordinator and processors.
///
/// `set_parallel(true)` is called before a concurrent run to signal that the
/// source may receive interleaved calls from multiple workers.
pub trait FileSystemSource: Send + Sync {
    /// Immediate child files of `dir`.
    fn enumerate_files(&self, dir: &Path) -> CarveResult<Vec<PathBuf>>;

    /// Immediate child directories of `dir`.
    fn enumerate_dirs(&self, dir: &Path) -> CarveResult<Vec<PathBuf>>;

    fn file_exists(&self, path: &Path) -> bool;

    fn dir_exists(&self, path: &Path) -> bool;

    /// Creates `path` and any missing parents; succeeding on already-exists.
    fn create_dir_all(&self, path: &Path) -> CarveResult<()>;

    fn open_read(&self, path: &Path) -> CarveResult<Box<dyn ByteSource>>;

    fn open_write(&self, path: &Path) -> CarveResult<Box<dyn Write + Send>>;

    fn set_parallel(&self, parallel: bool);
}

/// The real filesystem. With `preload` set, input files are mapped into
/// memory on open so reads take the zero-copy path.
pub struct LocalFileSystem {
    preload: bool,
    parallel: AtomicBool,
}

impl LocalFileSystem {
    pub fn new(preload: bool) -> Self {
        Self {
            preload,
            parallel: AtomicBool::new(false),
        }
    }
}

impl Default for LocalFileSystem {
    fn default() -> Self {
        Self::new(false)
    }
}

impl FileSystemSource for LocalFileSystem {
    fn enumerate_files(&self, dir: &Path) -> CarveResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| open_error(dir, e))? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        Ok(files)
    }

    fn enumerate_dirs(&self, dir: &Path) -> CarveResult<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| open_error(dir, e))? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn dir_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn create_dir_all(&self, path: &Path) -> CarveResult<()> {
        fs::create_dir_all(path).map_err(|e| open_error(path, e))
    }

    fn open_read(&self, path: &Path) -> CarveResult<Box<dyn ByteSource>> {
        if self.preload {
            debug!("Preloading {} into memory", path.display());
            Ok(Box::new(MemorySource::map_path(path)?))
        } else {
            Ok(Box::new(FileSource::open(path)?))
        }
    }

    fn open_write(&self, path: &Path) -> CarveResult<Box<dyn Write + Send>> {
        let file = fs::File::create(path).map_err(|e| open_error(path, e))?;
        Ok(Box::new(file))
    }

    fn set_parallel(&self, parallel: bool) {
        self.parallel.store(parallel, Ordering::Relaxed);
    }
}

type Captured = Arc<Mutex<Vec<(PathBuf, Vec<u8>)>>>;

/// Captures writes into memory instead of performing them, reading through
/// to an inner filesystem. Swapping this in under a segmented step enables
/// segment-within-segment composition; it also backs the test suite.
pub struct BufferingFileSystem {
    inner: Arc<dyn FileSystemSource>,
    captured: Captured,
}

impl BufferingFileSystem {
    pub fn new(inner: Arc<dyn FileSystemSource>) -> Self {
        Self {
            inner,
            captured: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Drains everything written so far, in write-completion order.
    pub fn take_captured(&self) -> Vec<(PathBuf, Vec<u8>)> {
        std::mem::take(&mut self.captured.lock().expect("capture lock poisoned"))
    }
}

impl FileSystemSource for BufferingFileSystem {
    fn enumerate_files(&self, dir: &Path) -> CarveResult<Vec<PathBuf>> {
        self.inner.enumerate_files(dir)
    }

    fn enumerate_dirs(&self, dir: &Path) -> CarveResult<Vec<PathBuf>> {
        self.inner.enumerate_dirs(dir)
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.inner.file_exists(path)
    }

    fn dir_exists(&self, path: &Path) -> bool {
        self.inner.dir_exists(path)
    }

    fn create_dir_all(&self, _path: &Path) -> CarveResult<()> {
        Ok(())
    }

    fn open_read(&self, path: &Path) -> CarveResult<Box<dyn ByteSource>> {
        self.inner.open_read(path)
    }

    fn open_write(&self, path: &Path) -> CarveResult<Box<dyn Write + Send>> {
        Ok(Box::new(CaptureWriter {
            path: path.to_path_buf(),
            buf: Vec::new(),
            store: Arc::clone(&self.captured),
        }))
    }

    fn set_parallel(&self, parallel: bool) {
        self.inner.set_parallel(parallel);
    }
}

struct CaptureWriter {
    path: PathBuf,
    buf: Vec<u8>,
    store: Captured,
}

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for CaptureWriter {
    fn drop(&mut self) {
        let bytes = std::mem::take(&mut self.buf);
        if let Ok(mut store) = self.store.lock() {
            store.push((std::mem::take(&mut self.path), bytes));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_enumerate_immediate_children_only() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.bin"), b"a").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.bin"), b"b").unwrap();

        let fsys = LocalFileSystem::default();
        let files = fsys.enumerate_files(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("a.bin")]);

        let dirs = fsys.enumerate_dirs(dir.path()).unwrap();
        assert_eq!(dirs, vec![dir.path().join("sub")]);
    }

    #[test]
    fn test_preload_open_is_memory_backed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, [1u8, 2, 3, 4]).unwrap();

        let plain = LocalFileSystem::new(false);
        let src = plain.open_read(&path).unwrap();
        assert!(src.backing().is_none());

        let preloading = LocalFileSystem::new(true);
        let src = preloading.open_read(&path).unwrap();
        assert_eq!(src.backing(), Some(&[1u8, 2, 3, 4][..]));
    }

    #[test]
    fn test_buffering_filesystem_captures_writes() {
        let inner = Arc::new(LocalFileSystem::default());
        let buffering = BufferingFileSystem::new(inner);

        {
            let mut w = buffering.open_write(Path::new("out/seg.bin")).unwrap();
            w.write_all(b"hello").unwrap();
        }
        {
            let mut w = buffering.open_write(Path::new("out/seg2.bin")).unwrap();
            w.write_all(b"world").unwrap();
        }

        let captured = buffering.take_captured();
        assert_eq!(
            captured,
            vec![
                (PathBuf::from("out/seg.bin"), b"hello".to_vec()),
                (PathBuf::from("out/seg2.bin"), b"world".to_vec()),
            ]
        );
        assert!(buffering.take_captured().is_empty());
    }
}
