//! Byte sources: seekable input streams with an optional memory backing.
//!
//! A [`ByteSource`] is anything readable and seekable. Sources that are
//! already fully resident in memory expose their backing buffer, which lets
//! [`fetch`] and [`materialize`] hand out borrowed views instead of copying;
//! the borrow ties the view to the source's lifetime, so stale views are a
//! compile error rather than a documented hazard.

use memmap2::Mmap;
use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::errors::{open_error, CarveError, CarveResult};

/// A seekable stream of bytes with optional zero-copy access.
pub trait ByteSource: Read + Seek + Send {
    /// Total length in bytes, when known up front.
    fn len(&self) -> Option<u64>;

    /// The full backing buffer, when the source is memory-resident.
    fn backing(&self) -> Option<&[u8]>;

    fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

/// How a short read is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Return however many bytes were actually available.
    Lenient,
    /// Fewer bytes than requested is an error carrying the shortfall.
    Strict,
}

enum MemoryBacking {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

/// A fully memory-resident source: an owned buffer or a mapped file.
pub struct MemorySource {
    backing: MemoryBacking,
    pos: u64,
}

impl MemorySource {
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            backing: MemoryBacking::Owned(bytes),
            pos: 0,
        }
    }

    /// Maps `path` into memory. Used for the preload path: the whole file
    /// becomes zero-copy addressable without an upfront read.
    pub fn map_path(path: &Path) -> CarveResult<Self> {
        let file = File::open(path).map_err(|e| open_error(path, e))?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(CarveError::IoError)?;
        Ok(Self {
            backing: MemoryBacking::Mapped(mmap),
            pos: 0,
        })
    }

    // Named to stay clear of `Read::bytes`, which would otherwise win
    // method resolution for the receiver.
    fn backing_bytes(&self) -> &[u8] {
        match &self.backing {
            MemoryBacking::Owned(v) => v,
            MemoryBacking::Mapped(m) => m,
        }
    }
}

impl Read for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes = match &self.backing {
            MemoryBacking::Owned(v) => v.as_slice(),
            MemoryBacking::Mapped(m) => &m[..],
        };
        let pos = (self.pos as usize).min(bytes.len());
        let n = buf.len().min(bytes.len() - pos);
        buf[..n].copy_from_slice(&bytes[pos..pos + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for MemorySource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.backing_bytes().len() as u64;
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(d) => len.checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };
        match target {
            Some(n) => {
                self.pos = n;
                Ok(n)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of source",
            )),
        }
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> Option<u64> {
        Some(self.backing_bytes().len() as u64)
    }

    fn backing(&self) -> Option<&[u8]> {
        Some(self.backing_bytes())
    }
}

/// A live file handle behind a buffered reader. No memory backing; reads go
/// through the fallback copy path.
pub struct FileSource {
    reader: BufReader<File>,
    len: u64,
}

impl FileSource {
    pub fn open(path: &Path) -> CarveResult<Self> {
        let file = File::open(path).map_err(|e| open_error(path, e))?;
        let len = file.metadata().map_err(CarveError::IoError)?.len();
        Ok(Self {
            reader: BufReader::new(file),
            len,
        })
    }
}

impl Read for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Seek for FileSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.reader.seek(pos)
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> Option<u64> {
        Some(self.len)
    }

    fn backing(&self) -> Option<&[u8]> {
        None
    }
}

/// Reads into `buf` until it is full or the source is exhausted, and returns
/// the number of bytes actually read.
pub fn fill(source: &mut dyn ByteSource, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Reads `buf.len()` bytes starting at `offset`, saving and restoring the
/// stream position around the temporary seek, also on error.
pub fn read_at(
    source: &mut dyn ByteSource,
    offset: u64,
    buf: &mut [u8],
    mode: ReadMode,
) -> CarveResult<usize> {
    let saved = source.stream_position()?;
    let result = read_at_inner(source, offset, buf, mode);
    let restore = source.seek(SeekFrom::Start(saved));
    let read = result?;
    restore?;
    Ok(read)
}

fn read_at_inner(
    source: &mut dyn ByteSource,
    offset: u64,
    buf: &mut [u8],
    mode: ReadMode,
) -> CarveResult<usize> {
    source.seek(SeekFrom::Start(offset))?;
    let read = fill(source, buf)?;
    if mode == ReadMode::Strict && read < buf.len() {
        return Err(CarveError::insufficient_data(
            buf.len(),
            read,
            offset + read as u64,
        ));
    }
    Ok(read)
}

/// Returns `len` bytes starting at `offset`: a borrowed view straight out of
/// the backing buffer when the source is memory-resident, otherwise a strict
/// copy into `scratch`.
pub fn fetch<'a>(
    source: &'a mut dyn ByteSource,
    offset: u64,
    len: usize,
    scratch: &'a mut Vec<u8>,
) -> CarveResult<&'a [u8]> {
    if source.backing().is_some() {
        let bytes = source.backing().expect("backing vanished");
        let start = offset as usize;
        let end = start
            .checked_add(len)
            .filter(|&e| e <= bytes.len())
            .ok_or_else(|| {
                CarveError::insufficient_data(len, bytes.len().saturating_sub(start), offset)
            })?;
        return Ok(&bytes[start..end]);
    }
    scratch.resize(len, 0);
    read_at(source, offset, scratch, ReadMode::Strict)?;
    Ok(&scratch[..len])
}

/// Materializes the entire source: the backing buffer itself when there is
/// one, an exact-sized strict read when the length is known, and a growable
/// copy otherwise. The stream position is preserved.
pub fn materialize(source: &mut dyn ByteSource) -> CarveResult<Cow<'_, [u8]>> {
    if source.backing().is_some() {
        let bytes = source.backing().expect("backing vanished");
        return Ok(Cow::Borrowed(bytes));
    }
    match source.len() {
        Some(len) => {
            let mut buf = vec![0u8; len as usize];
            read_at(source, 0, &mut buf, ReadMode::Strict)?;
            Ok(Cow::Owned(buf))
        }
        None => {
            let saved = source.stream_position()?;
            source.seek(SeekFrom::Start(0))?;
            let mut buf = Vec::new();
            let result = source.read_to_end(&mut buf);
            source.seek(SeekFrom::Start(saved))?;
            result?;
            Ok(Cow::Owned(buf))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn file_source(bytes: &[u8]) -> (tempfile::TempDir, FileSource) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let mut f = File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        (dir, FileSource::open(&path).unwrap())
    }

    #[test]
    fn test_memory_source_read_seek() {
        let mut src = MemorySource::from_vec(vec![1, 2, 3, 4, 5]);
        assert_eq!(src.len(), Some(5));

        let mut buf = [0u8; 2];
        assert_eq!(src.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [1, 2]);

        src.seek(SeekFrom::Start(3)).unwrap();
        assert_eq!(src.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [4, 5]);

        // Past the end: zero-byte read.
        assert_eq!(src.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_memory_source_relative_seeks() {
        let mut src = MemorySource::from_vec(vec![1, 2, 3, 4, 5]);
        assert_eq!(src.seek(SeekFrom::End(-2)).unwrap(), 3);
        assert_eq!(src.seek(SeekFrom::Current(1)).unwrap(), 4);
        assert!(src.seek(SeekFrom::Current(-10)).is_err());
    }

    #[test]
    fn test_read_at_restores_position() {
        let mut src = MemorySource::from_vec((0u8..32).collect());
        src.seek(SeekFrom::Start(7)).unwrap();

        let mut buf = [0u8; 4];
        read_at(&mut src, 20, &mut buf, ReadMode::Strict).unwrap();
        assert_eq!(buf, [20, 21, 22, 23]);
        assert_eq!(src.stream_position().unwrap(), 7);

        // Restore also happens when the strict read fails.
        let err = read_at(&mut src, 30, &mut buf, ReadMode::Strict).unwrap_err();
        assert!(matches!(
            err,
            CarveError::InsufficientData {
                requested: 4,
                read: 2,
                position: 32,
            }
        ));
        assert_eq!(src.stream_position().unwrap(), 7);
    }

    #[test]
    fn test_lenient_short_read() {
        let mut src = MemorySource::from_vec(vec![9, 8, 7]);
        let mut buf = [0u8; 8];
        let n = read_at(&mut src, 1, &mut buf, ReadMode::Lenient).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..2], &[8, 7]);
    }

    #[test]
    fn test_fetch_zero_copy_matches_fallback() {
        let bytes: Vec<u8> = (0u8..64).collect();
        let mut mem = MemorySource::from_vec(bytes.clone());
        let (_dir, mut file) = file_source(&bytes);

        let mut scratch_a = Vec::new();
        let mut scratch_b = Vec::new();
        let view = fetch(&mut mem, 10, 16, &mut scratch_a).unwrap().to_vec();
        let copy = fetch(&mut file, 10, 16, &mut scratch_b).unwrap().to_vec();
        assert_eq!(view, copy);
        // The memory path did not touch the scratch buffer.
        assert!(scratch_a.is_empty());
        assert_eq!(scratch_b.len(), 16);
    }

    #[test]
    fn test_fetch_out_of_range() {
        let mut mem = MemorySource::from_vec(vec![0; 8]);
        let mut scratch = Vec::new();
        let err = fetch(&mut mem, 4, 8, &mut scratch).unwrap_err();
        assert!(matches!(err, CarveError::InsufficientData { read: 4, .. }));
    }

    #[test]
    fn test_materialize_borrows_when_backed() {
        let bytes: Vec<u8> = (0u8..16).collect();
        let mut mem = MemorySource::from_vec(bytes.clone());
        match materialize(&mut mem).unwrap() {
            Cow::Borrowed(b) => assert_eq!(b, &bytes[..]),
            Cow::Owned(_) => panic!("memory source should borrow"),
        }

        let (_dir, mut file) = file_source(&bytes);
        match materialize(&mut file).unwrap() {
            Cow::Owned(b) => assert_eq!(b, bytes),
            Cow::Borrowed(_) => panic!("file source should copy"),
        }
    }

    #[test]
    fn test_file_source_reports_length() {
        let (_dir, file) = file_source(&[1, 2, 3]);
        assert_eq!(file.len(), Some(3));
        assert!(file.backing().is_none());
    }
}
