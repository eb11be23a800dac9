//! Scheduling: walks the configured inputs and dispatches every reachable
//! file to each pipeline, sequentially or onto a bounded worker grid.
//!
//! Directory expansion is interleaved with dispatch instead of front-loaded:
//! the file queue drains first and one directory is expanded only when it is
//! empty, so large or slow trees never have to be enumerated up front.
//! Concurrency is bounded by a slot pool: acquiring a slot blocks until one
//! is free, and a finished task releases its own slot id back to the pool.

use rayon::ThreadPoolBuilder;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::errors::{CarveError, CarveResult};
use crate::fsys::{FileSystemSource, LocalFileSystem};
use crate::processor::{Pipeline, PipelineStep, Processor};

/// Statistics for one completed run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Files dequeued and dispatched to the pipelines.
    pub files_processed: u64,
    /// Pipeline invocations that returned an error (isolated, not fatal).
    pub failures: u64,
    /// Output files produced across all pipelines.
    pub outputs_written: u64,
}

/// A queued unit of work, carrying the original input root forward so
/// output paths stay relative to it.
#[derive(Debug, Clone)]
struct WorkItem {
    root: PathBuf,
    path: PathBuf,
}

/// Schedules pipelines over the configured inputs.
pub struct Coordinator {
    config: RunConfig,
    pipelines: Vec<Pipeline>,
    fs: Arc<dyn FileSystemSource>,
}

impl Coordinator {
    /// Builds a coordinator over the local filesystem. Fails fast when no
    /// pipeline was supplied; no scheduling starts on a configuration
    /// error.
    pub fn new(config: RunConfig, pipelines: Vec<Pipeline>) -> CarveResult<Self> {
        let preload = config.preload;
        Self::with_filesystem(config, pipelines, Arc::new(LocalFileSystem::new(preload)))
    }

    /// Builds a coordinator over a caller-supplied filesystem.
    pub fn with_filesystem(
        config: RunConfig,
        pipelines: Vec<Pipeline>,
        fs: Arc<dyn FileSystemSource>,
    ) -> CarveResult<Self> {
        if pipelines.is_empty() {
            return Err(CarveError::config("at least one pipeline is required"));
        }
        Ok(Self {
            config,
            pipelines,
            fs,
        })
    }

    /// Visits every regular file reachable from the inputs exactly once per
    /// pipeline and returns aggregate statistics.
    pub fn run(&self) -> CarveResult<RunSummary> {
        info!(
            "Starting run: {} inputs, {} pipelines, parallelism {}",
            self.config.inputs.len(),
            self.pipelines.len(),
            self.config.parallelism
        );
        let summary = if self.config.parallelism == 0 {
            self.run_sequential()
        } else {
            self.run_concurrent(self.config.parallelism)
        }?;
        info!(
            "Run complete: {} files, {} outputs, {} failures",
            summary.files_processed, summary.outputs_written, summary.failures
        );
        Ok(summary)
    }

    fn seed_queues(&self) -> (VecDeque<WorkItem>, VecDeque<WorkItem>) {
        let mut files = VecDeque::new();
        let mut dirs = VecDeque::new();
        for input in &self.config.inputs {
            let item = WorkItem {
                root: input.root.clone(),
                path: input.path.clone(),
            };
            if input.is_file {
                files.push_back(item);
            } else {
                dirs.push_back(item);
            }
        }
        (files, dirs)
    }

    /// Expands one directory into its immediate files and subdirectories.
    /// A directory that vanished between enqueue and dequeue is skipped.
    fn expand_dir(
        &self,
        item: WorkItem,
        files: &mut VecDeque<WorkItem>,
        dirs: &mut VecDeque<WorkItem>,
    ) {
        if !self.fs.dir_exists(&item.path) {
            debug!("Skipping vanished directory {}", item.path.display());
            return;
        }
        match self.fs.enumerate_files(&item.path) {
            Ok(children) => {
                for path in children {
                    files.push_back(WorkItem {
                        root: item.root.clone(),
                        path,
                    });
                }
            }
            Err(e) => warn!("Failed to list files in {}: {}", item.path.display(), e),
        }
        match self.fs.enumerate_dirs(&item.path) {
            Ok(children) => {
                for path in children {
                    dirs.push_back(WorkItem {
                        root: item.root.clone(),
                        path,
                    });
                }
            }
            Err(e) => warn!(
                "Failed to list directories in {}: {}",
                item.path.display(),
                e
            ),
        }
    }

    /// Prepares, processes and cleans up one (file, pipeline) invocation.
    /// Cleanup runs unconditionally so the slot is reusable afterwards; an
    /// error is logged keyed by the file path and isolated to this
    /// invocation.
    fn process_one(
        processor: &mut Processor,
        step: &mut PipelineStep,
        item: &WorkItem,
        output_root: &Path,
    ) -> bool {
        let outcome = processor
            .prepare(&item.root, output_root, &item.path)
            .and_then(|_| processor.process(step));
        processor.cleanup();
        match outcome {
            Ok(()) => true,
            Err(e) => {
                warn!("Processing {} failed: {}", item.path.display(), e);
                false
            }
        }
    }

    fn run_sequential(&self) -> CarveResult<RunSummary> {
        let args = Arc::new(self.config.pipeline_args.clone());
        let mut slots: Vec<(Processor, PipelineStep)> = self
            .pipelines
            .iter()
            .map(|p| {
                (
                    Processor::new(Arc::clone(&self.fs), 0, Arc::clone(&args)),
                    p.instantiate(),
                )
            })
            .collect();

        let (mut files, mut dirs) = self.seed_queues();
        let mut summary = RunSummary::default();

        loop {
            if let Some(item) = files.pop_front() {
                summary.files_processed += 1;
                for (k, (processor, step)) in slots.iter_mut().enumerate() {
                    if !Self::process_one(processor, step, &item, &self.config.output_root) {
                        summary.failures += 1;
                    }
                    // First pipeline to claim the file owns it; the rest
                    // are skipped with no further signal.
                    if processor.claimed() {
                        debug!(
                            "Pipeline {} claimed {}",
                            self.pipelines[k].name(),
                            item.path.display()
                        );
                        break;
                    }
                }
            } else if let Some(dir) = dirs.pop_front() {
                self.expand_dir(dir, &mut files, &mut dirs);
            } else {
                break;
            }
        }

        summary.outputs_written = slots
            .iter()
            .map(|(processor, _)| processor.outputs_written())
            .sum();
        Ok(summary)
    }

    fn run_concurrent(&self, requested: usize) -> CarveResult<RunSummary> {
        let workers = requested.min(num_cpus::get()).max(1);
        let pipeline_count = self.pipelines.len();
        debug!(
            "Using {} worker slots for requested parallelism {}",
            workers, requested
        );
        self.fs.set_parallel(true);

        let args = Arc::new(self.config.pipeline_args.clone());
        // The whole grid up front: at most workers x pipelines processor
        // instances exist for the entire run.
        let grid: Vec<Vec<Mutex<(Processor, PipelineStep)>>> = (0..workers)
            .map(|worker_id| {
                self.pipelines
                    .iter()
                    .map(|p| {
                        Mutex::new((
                            Processor::new(Arc::clone(&self.fs), worker_id, Arc::clone(&args)),
                            p.instantiate(),
                        ))
                    })
                    .collect()
            })
            .collect();

        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| CarveError::config(e.to_string()))?;

        let failures = AtomicU64::new(0);
        let output_root = self.config.output_root.as_path();

        // The dispatch loop blocks on slot acquisition, so it stays on the
        // calling thread; only pipeline tasks occupy pool workers.
        let files_processed = pool.in_place_scope(|scope| {
            // Slot pool: the channel starts holding every slot id;
            // acquiring blocks on recv until a finished task sends its id
            // back.
            let (free_tx, free_rx) = mpsc::channel();
            for slot in 0..workers {
                free_tx.send(slot).expect("slot channel open");
            }

            let mut files_processed = 0u64;
            let (mut files, mut dirs) = self.seed_queues();
            loop {
                if let Some(item) = files.pop_front() {
                    files_processed += 1;
                    for k in 0..pipeline_count {
                        let slot = free_rx.recv().expect("slot channel closed");
                        let cell = &grid[slot][k];
                        let release = free_tx.clone();
                        let failures = &failures;
                        let task_item = item.clone();
                        scope.spawn(move |_| {
                            // The slot protocol guarantees the previous
                            // task on this slot has fully returned, so the
                            // lock is uncontended.
                            let mut guard = cell.lock().expect("slot mutex poisoned");
                            let (processor, step) = &mut *guard;
                            if !Self::process_one(processor, step, &task_item, output_root) {
                                failures.fetch_add(1, Ordering::Relaxed);
                            }
                            drop(guard);
                            let _ = release.send(slot);
                        });
                    }
                } else if let Some(dir) = dirs.pop_front() {
                    self.expand_dir(dir, &mut files, &mut dirs);
                } else {
                    break;
                }
            }
            // Scope exit joins every in-flight task.
            files_processed
        });

        self.fs.set_parallel(false);

        let mut outputs_written = 0;
        for row in grid {
            for cell in row {
                let (processor, _) = cell.into_inner().expect("slot mutex poisoned");
                outputs_written += processor.outputs_written();
            }
        }
        Ok(RunSummary {
            files_processed,
            failures: failures.load(Ordering::Relaxed),
            outputs_written,
        })
    }
}
