//! Per-file processing context and lifecycle.
//!
//! A [`Processor`] is the mutable state one pipeline carries while working
//! on one file: stream handles, directory mapping, endian codec, output
//! counter and scratch buffer. Instances are constructed once per
//! (worker-slot, pipeline) pair and reused across files; `prepare` resets
//! the per-file state, `cleanup` always runs afterwards so the next file
//! never sees a previous file's handles.

use std::io::{Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::codec::{Codec, Endianness};
use crate::errors::{CarveError, CarveResult};
use crate::fsys::FileSystemSource;
use crate::search;
use crate::source::{self, ByteSource, ReadMode};

/// Scratch buffers above this size are trimmed during cleanup so one
/// unusually large file does not pin memory for the rest of the run.
const SCRATCH_TRIM_THRESHOLD: usize = 1024 * 1024;
const SCRATCH_DEFAULT_CAPACITY: usize = 4096;

/// An imperative processing step: reads the input and writes output
/// directly through the [`Processor`]'s primitives.
pub trait DirectStep: Send {
    fn run(&mut self, cx: &mut Processor) -> CarveResult<()>;
}

/// A segmented processing step: yields a lazy, finite, non-restartable
/// sequence of output records instead of writing bytes itself. The
/// framework writes one output file per record.
pub trait SegmentStep: Send {
    fn run<'a>(
        &'a mut self,
        input: &'a mut dyn ByteSource,
        cx: &SegmentContext,
    ) -> CarveResult<SegmentIter<'a>>;
}

pub type SegmentIter<'a> = Box<dyn Iterator<Item = CarveResult<Box<dyn SegmentRecord>>> + 'a>;

/// Read-only view of the processor a segmented step sees while producing.
pub struct SegmentContext {
    pub codec: Codec,
    pub input_file: PathBuf,
    pub worker_id: usize,
    pub args: Arc<Vec<String>>,
}

/// One structured output record produced by a segmented step.
pub trait SegmentRecord {
    /// Stem override for the generated output name; defaults to the input
    /// file's stem.
    fn base_name(&self) -> Option<&str> {
        None
    }

    /// File-extension hint for the record's serialization format.
    fn extension(&self) -> &str;

    /// Writes the record's converted bytes to `out`.
    fn write_to(&self, out: &mut dyn Write) -> CarveResult<()>;
}

/// A plain byte-payload record.
pub struct BytesSegment {
    pub bytes: Vec<u8>,
    pub extension: String,
}

impl SegmentRecord for BytesSegment {
    fn extension(&self) -> &str {
        &self.extension
    }

    fn write_to(&self, out: &mut dyn Write) -> CarveResult<()> {
        out.write_all(&self.bytes)?;
        Ok(())
    }
}

/// A pipeline's processing capability, declared at registration time.
pub enum PipelineStep {
    Direct(Box<dyn DirectStep>),
    Segmented(Box<dyn SegmentStep>),
}

/// A named pipeline: a factory producing one fresh step per worker slot.
pub struct Pipeline {
    name: String,
    factory: Box<dyn Fn() -> PipelineStep + Send + Sync>,
}

impl Pipeline {
    pub fn new(
        name: impl Into<String>,
        factory: impl Fn() -> PipelineStep + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            factory: Box::new(factory),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn instantiate(&self) -> PipelineStep {
        (self.factory)()
    }
}

/// Per-(worker-slot, pipeline) processing context, reused across files.
pub struct Processor {
    fs: Arc<dyn FileSystemSource>,
    worker_id: usize,
    args: Arc<Vec<String>>,
    input_root: PathBuf,
    output_root: PathBuf,
    input_dir: PathBuf,
    output_dir: PathBuf,
    input_file: PathBuf,
    input: Option<Box<dyn ByteSource>>,
    output: Option<Box<dyn Write + Send>>,
    codec: Codec,
    out_counter: u32,
    claimed: bool,
    prepared: bool,
    outputs_written: u64,
    scratch: Vec<u8>,
}

impl Processor {
    pub fn new(fs: Arc<dyn FileSystemSource>, worker_id: usize, args: Arc<Vec<String>>) -> Self {
        Self {
            fs,
            worker_id,
            args,
            input_root: PathBuf::new(),
            output_root: PathBuf::new(),
            input_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            input_file: PathBuf::new(),
            input: None,
            output: None,
            codec: Codec::new(Endianness::Little),
            out_counter: 0,
            claimed: false,
            prepared: false,
            outputs_written: 0,
            scratch: Vec::with_capacity(SCRATCH_DEFAULT_CAPACITY),
        }
    }

    /// Resets all per-file state for `file`: maps its directory from
    /// `input_root` under `output_root`, clears stream handles, resets the
    /// output counter, endianness (little) and the claim flag.
    pub fn prepare(&mut self, input_root: &Path, output_root: &Path, file: &Path) -> CarveResult<()> {
        trace!("worker {} preparing {}", self.worker_id, file.display());
        self.input_root = input_root.to_path_buf();
        self.output_root = output_root.to_path_buf();
        self.input_file = file.to_path_buf();
        self.input_dir = file.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        let relative = self
            .input_dir
            .strip_prefix(input_root)
            .unwrap_or_else(|_| Path::new(""));
        self.output_dir = output_root.join(relative);
        self.input = None;
        self.output = None;
        self.out_counter = 0;
        self.codec = Codec::new(Endianness::Little);
        self.claimed = false;
        self.prepared = true;
        Ok(())
    }

    /// Runs `step` against the prepared file, opening the input stream on
    /// demand. Segmented steps have their records consumed here, one output
    /// file per record.
    pub fn process(&mut self, step: &mut PipelineStep) -> CarveResult<()> {
        if !self.prepared {
            return Err(CarveError::NotReady("process called before prepare"));
        }
        if self.input.is_none() {
            self.input = Some(self.fs.open_read(&self.input_file)?);
        }
        match step {
            PipelineStep::Direct(s) => s.run(self),
            PipelineStep::Segmented(s) => {
                let mut input = self.input.take().expect("input opened above");
                let cx = SegmentContext {
                    codec: self.codec,
                    input_file: self.input_file.clone(),
                    worker_id: self.worker_id,
                    args: Arc::clone(&self.args),
                };
                let result = self.consume_segments(s.as_mut(), &mut *input, &cx);
                self.input = Some(input);
                result
            }
        }
    }

    fn consume_segments(
        &mut self,
        step: &mut dyn SegmentStep,
        input: &mut dyn ByteSource,
        cx: &SegmentContext,
    ) -> CarveResult<()> {
        for record in step.run(input, cx)? {
            let record = record?;
            self.write_segment(record.as_ref())?;
        }
        Ok(())
    }

    /// Disposes the input/output stream handles and trims the scratch
    /// buffer. Idempotent; always runs after `process`, also on error, so a
    /// reused slot never leaks the previous file's handles.
    pub fn cleanup(&mut self) {
        self.input = None;
        self.output = None;
        if self.scratch.capacity() > SCRATCH_TRIM_THRESHOLD {
            self.scratch = Vec::with_capacity(SCRATCH_DEFAULT_CAPACITY);
        } else {
            self.scratch.clear();
        }
        self.prepared = false;
    }

    /// Marks this file as owned by the current pipeline; remaining
    /// pipelines are skipped for it (sequential mode).
    pub fn claim(&mut self) {
        self.claimed = true;
    }

    pub fn claimed(&self) -> bool {
        self.claimed
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn input_file(&self) -> &Path {
        &self.input_file
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub(crate) fn outputs_written(&self) -> u64 {
        self.outputs_written
    }

    /// Swaps the filesystem handle, returning the previous one. Segmented
    /// steps recurse by installing a buffering filesystem that captures
    /// writes instead of performing them.
    pub fn set_filesystem(&mut self, fs: Arc<dyn FileSystemSource>) -> Arc<dyn FileSystemSource> {
        std::mem::replace(&mut self.fs, fs)
    }

    pub fn filesystem(&self) -> Arc<dyn FileSystemSource> {
        Arc::clone(&self.fs)
    }

    // --- endianness -------------------------------------------------------

    /// Declares the input's byte order; the derived swap flag follows.
    pub fn set_little_endian(&mut self, little: bool) {
        self.codec = Codec::new(if little {
            Endianness::Little
        } else {
            Endianness::Big
        });
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    // --- input access -----------------------------------------------------

    fn input_mut(&mut self) -> CarveResult<&mut dyn ByteSource> {
        match self.input.as_mut() {
            Some(input) => Ok(&mut **input),
            None => Err(CarveError::NotReady("input stream not set")),
        }
    }

    pub fn input_len(&self) -> CarveResult<Option<u64>> {
        match self.input.as_ref() {
            Some(input) => Ok(input.len()),
            None => Err(CarveError::NotReady("input stream not set")),
        }
    }

    pub fn position(&mut self) -> CarveResult<u64> {
        Ok(self.input_mut()?.stream_position()?)
    }

    pub fn seek_to(&mut self, offset: u64) -> CarveResult<u64> {
        Ok(self.input_mut()?.seek(SeekFrom::Start(offset))?)
    }

    /// Bytes `[offset, offset + len)` of the input: a zero-copy view when
    /// the input is memory-backed, otherwise a copy into the scratch
    /// buffer.
    pub fn fetch_at(&mut self, offset: u64, len: usize) -> CarveResult<&[u8]> {
        let input = self
            .input
            .as_mut()
            .ok_or(CarveError::NotReady("input stream not set"))?;
        source::fetch(&mut **input, offset, len, &mut self.scratch)
    }

    /// Reads into `buf` at `offset` without moving the stream position.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8], mode: ReadMode) -> CarveResult<usize> {
        let input = self
            .input
            .as_mut()
            .ok_or(CarveError::NotReady("input stream not set"))?;
        source::read_at(&mut **input, offset, buf, mode)
    }

    fn read_field<const N: usize>(&mut self) -> CarveResult<[u8; N]> {
        let mut buf = [0u8; N];
        let input = self
            .input
            .as_mut()
            .ok_or(CarveError::NotReady("input stream not set"))?;
        let pos = input.stream_position()?;
        let read = source::fill(&mut **input, &mut buf)?;
        if read < N {
            return Err(CarveError::insufficient_data(N, read, pos + read as u64));
        }
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> CarveResult<u8> {
        Ok(self.read_field::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> CarveResult<i8> {
        Ok(self.read_field::<1>()?[0] as i8)
    }

    pub fn read_u16(&mut self) -> CarveResult<u16> {
        let field = self.read_field::<2>()?;
        self.codec.decode_u16(&field)
    }

    pub fn read_u32(&mut self) -> CarveResult<u32> {
        let field = self.read_field::<4>()?;
        self.codec.decode_u32(&field)
    }

    pub fn read_u64(&mut self) -> CarveResult<u64> {
        let field = self.read_field::<8>()?;
        self.codec.decode_u64(&field)
    }

    pub fn read_i16(&mut self) -> CarveResult<i16> {
        let field = self.read_field::<2>()?;
        self.codec.decode_i16(&field)
    }

    pub fn read_i32(&mut self) -> CarveResult<i32> {
        let field = self.read_field::<4>()?;
        self.codec.decode_i32(&field)
    }

    pub fn read_i64(&mut self) -> CarveResult<i64> {
        let field = self.read_field::<8>()?;
        self.codec.decode_i64(&field)
    }

    pub fn read_f32(&mut self) -> CarveResult<f32> {
        let field = self.read_field::<4>()?;
        self.codec.decode_f32(&field)
    }

    pub fn read_f64(&mut self) -> CarveResult<f64> {
        let field = self.read_field::<8>()?;
        self.codec.decode_f64(&field)
    }

    // --- pattern search ---------------------------------------------------

    /// All occurrences of `pattern` in the input within `range`.
    pub fn find_all(
        &mut self,
        pattern: &[u8],
        range: Range<u64>,
        max_count: Option<usize>,
    ) -> CarveResult<Vec<u64>> {
        search::find_all(self.input_mut()?, pattern, range, max_count)
    }

    pub fn find_first(&mut self, pattern: &[u8], range: Range<u64>) -> CarveResult<Option<u64>> {
        search::find_first(self.input_mut()?, pattern, range)
    }

    pub fn find_last(&mut self, pattern: &[u8], range: Range<u64>) -> CarveResult<Option<u64>> {
        search::find_last(self.input_mut()?, pattern, range)
    }

    // --- output -----------------------------------------------------------

    /// The next generated output path: `<stem>_<00000001>.<ext>` under the
    /// mirrored output directory, with a per-file monotonic counter.
    pub fn next_output_path(&mut self, stem: Option<&str>, ext: &str) -> PathBuf {
        self.out_counter += 1;
        let stem = stem.unwrap_or_else(|| {
            self.input_file
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("segment")
        });
        let name = if ext.is_empty() {
            format!("{}_{:08}", stem, self.out_counter)
        } else {
            format!("{}_{:08}.{}", stem, self.out_counter, ext)
        };
        self.output_dir.join(name)
    }

    /// Opens a generated output path for direct writing.
    pub fn open_output(&mut self, ext: &str) -> CarveResult<PathBuf> {
        self.fs.create_dir_all(&self.output_dir)?;
        let path = self.next_output_path(None, ext);
        self.output = Some(self.fs.open_write(&path)?);
        self.outputs_written += 1;
        Ok(path)
    }

    pub fn write_output(&mut self, bytes: &[u8]) -> CarveResult<()> {
        match self.output.as_mut() {
            Some(out) => {
                out.write_all(bytes)?;
                Ok(())
            }
            None => Err(CarveError::NotReady("output stream not set")),
        }
    }

    /// Flushes and closes the current output, if any.
    pub fn close_output(&mut self) {
        self.output = None;
    }

    fn write_segment(&mut self, record: &dyn SegmentRecord) -> CarveResult<PathBuf> {
        self.fs.create_dir_all(&self.output_dir)?;
        let path = self.next_output_path(record.base_name(), record.extension());
        debug!(
            "worker {} writing segment {}",
            self.worker_id,
            path.display()
        );
        let mut out = self.fs.open_write(&path)?;
        record.write_to(&mut *out)?;
        self.outputs_written += 1;
        Ok(path)
    }
}
