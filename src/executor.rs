//! Parallel batch executor.
//!
//! Splits a file list into one batch per worker and runs every batch on its
//! own task. Inside a batch files are handled in order: a cache hit is
//! returned as-is, a miss waits on the shared rate limiter, calls the
//! extraction provider and stores the result. One file failing never stops
//! its batch; it is reported as [`FileOutcome::Failed`].
//!
//! Workers are tokio tasks in one process, not separate processes. A
//! panicking provider is contained to its task: the whole batch is marked
//! failed and the other batches finish. Anything that takes the process
//! down (an abort, a stack overflow) ends every batch at once; run the
//! provider out of process, as [`CommandExtractor`] does, to keep such
//! faults away from the executor.
//!
//! [`CommandExtractor`]: crate::extractor::CommandExtractor
//!
//! # Example
//!
//! ```rust,ignore
//! let extractor = Arc::new(CommandExtractor::new("my-extractor"));
//! let options = RunOptions { workers: -1, rpm: 100, ..Default::default() };
//! let report = Executor::new(extractor, options)?.run(&files).await;
//! println!("{} failed", report.failures().count());
//! ```

use crate::cache::Cache;
use crate::error::{SqlDepsError, SqlDepsResult};
use crate::extractor::Extractor;
use crate::limiter::{Limiter, RateLimiter, SharedRateLimiter};
use crate::profile::{merge_profiles, Profile};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Number of execution units on this machine.
pub fn available_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Resolve a requested worker count.
///
/// `-1` means every available unit; otherwise the count must lie in
/// `1..=available`.
pub fn resolve_workers(requested: i32, available: usize) -> SqlDepsResult<usize> {
    match requested {
        -1 => Ok(available.max(1)),
        n if n >= 1 && (n as usize) <= available => Ok(n as usize),
        _ => Err(SqlDepsError::invalid_workers(requested, available)),
    }
}

/// Split `items` into `n` contiguous batches of near-equal size.
///
/// The first `len % n` batches hold one extra item; trailing batches may be
/// empty when there are fewer items than batches.
pub fn split_batches<T: Clone>(items: &[T], n: usize) -> Vec<Vec<T>> {
    let n = n.max(1);
    let base = items.len() / n;
    let extra = items.len() % n;

    let mut batches = Vec::with_capacity(n);
    let mut start = 0;
    for i in 0..n {
        let size = base + usize::from(i < extra);
        batches.push(items[start..start + size].to_vec());
        start += size;
    }
    batches
}

/// Result for one input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileOutcome {
    /// Freshly extracted by the provider.
    Extracted(Profile),
    /// Served from the cache; the provider was not called.
    Cached(Profile),
    Failed { error: String },
}

impl FileOutcome {
    pub fn profile(&self) -> Option<&Profile> {
        match self {
            FileOutcome::Extracted(profile) | FileOutcome::Cached(profile) => Some(profile),
            FileOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            FileOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, FileOutcome::Cached(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FileOutcome::Failed { .. })
    }
}

/// Per-file outcomes of a run. Every input file has exactly one entry.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    outcomes: HashMap<PathBuf, FileOutcome>,
}

impl RunReport {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&FileOutcome> {
        self.outcomes.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &FileOutcome)> {
        self.outcomes.iter().map(|(path, outcome)| (path.as_path(), outcome))
    }

    /// Successful files and their profiles.
    pub fn profiles(&self) -> impl Iterator<Item = (&Path, &Profile)> {
        self.iter()
            .filter_map(|(path, outcome)| outcome.profile().map(|profile| (path, profile)))
    }

    /// Failed files and their error messages.
    pub fn failures(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.iter()
            .filter_map(|(path, outcome)| outcome.error().map(|error| (path, error)))
    }

    pub fn cache_hits(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_cached()).count()
    }

    /// Merge every successful profile into one.
    pub fn merged(&self) -> Profile {
        merge_profiles(self.profiles().map(|(_, profile)| profile))
    }

    pub fn into_outcomes(self) -> HashMap<PathBuf, FileOutcome> {
        self.outcomes
    }

    fn insert(&mut self, path: PathBuf, outcome: FileOutcome) {
        self.outcomes.insert(path, outcome);
    }

    fn extend(&mut self, other: RunReport) {
        self.outcomes.extend(other.outcomes);
    }
}

/// Knobs for one executor.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Worker count; `-1` uses every available unit.
    pub workers: i32,
    /// Provider calls per minute across all workers; `0` disables limiting.
    pub rpm: i64,
    pub use_cache: bool,
    /// Clean the cache once the run is over.
    pub clear_cache: bool,
    pub cache: Cache,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            rpm: 100,
            use_cache: true,
            clear_cache: false,
            cache: Cache::default(),
        }
    }
}

/// Runs extraction over many files with a shared rate budget.
pub struct Executor<E: Extractor> {
    extractor: Arc<E>,
    options: RunOptions,
    workers: usize,
    limiter: SharedRateLimiter,
}

impl<E: Extractor> Executor<E> {
    /// Create an executor sized for this machine.
    ///
    /// Fails on an invalid worker count, before anything is dispatched.
    pub fn new(extractor: Arc<E>, options: RunOptions) -> SqlDepsResult<Self> {
        Self::with_available(extractor, options, available_workers())
    }

    /// Create an executor assuming `available` execution units.
    pub fn with_available(
        extractor: Arc<E>,
        options: RunOptions,
        available: usize,
    ) -> SqlDepsResult<Self> {
        let workers = resolve_workers(options.workers, available)?;
        let limiter = SharedRateLimiter::new(options.rpm);
        Ok(Self {
            extractor,
            options,
            workers,
            limiter,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// The limiter every worker of a multi-worker run draws from.
    pub fn limiter(&self) -> &SharedRateLimiter {
        &self.limiter
    }

    /// Process every file and collect one outcome per file.
    ///
    /// With one resolved worker the files go through [`run_sequential`];
    /// otherwise each batch gets its own task and the shared limiter.
    pub async fn run(&self, files: &[PathBuf]) -> RunReport {
        let report = if self.workers == 1 {
            run_sequential(
                files,
                Arc::clone(&self.extractor),
                self.options.rpm,
                self.cache().cloned(),
            )
            .await
        } else {
            self.run_batches(files).await
        };

        tracing::info!(
            "Processed {} file(s): {} from cache, {} failed",
            report.len(),
            report.cache_hits(),
            report.failures().count()
        );

        if self.options.clear_cache {
            self.options.cache.cleanup();
        }
        report
    }

    fn cache(&self) -> Option<&Cache> {
        self.options.use_cache.then_some(&self.options.cache)
    }

    async fn run_batches(&self, files: &[PathBuf]) -> RunReport {
        let mut handles = Vec::new();
        for (index, batch) in split_batches(files, self.workers).into_iter().enumerate() {
            if batch.is_empty() {
                continue;
            }
            tracing::debug!("Dispatching batch {} with {} file(s)", index, batch.len());
            let handle = spawn_batch(
                batch.clone(),
                Arc::clone(&self.extractor),
                self.limiter.clone(),
                self.cache().cloned(),
            );
            handles.push((batch, handle));
        }
        collect_batches(handles).await
    }
}

/// Run every file as one batch under a limiter of its own.
///
/// Each call starts with a fresh `rpm` budget. The batch still runs on a
/// separate task, so a panicking provider is reported per file instead of
/// unwinding into the caller.
pub async fn run_sequential<E: Extractor>(
    files: &[PathBuf],
    extractor: Arc<E>,
    rpm: i64,
    cache: Option<Cache>,
) -> RunReport {
    let handle = spawn_batch(files.to_vec(), extractor, RateLimiter::new(rpm), cache);
    collect_batches(vec![(files.to_vec(), handle)]).await
}

fn spawn_batch<E, L>(
    files: Vec<PathBuf>,
    extractor: Arc<E>,
    mut limiter: L,
    cache: Option<Cache>,
) -> JoinHandle<RunReport>
where
    E: Extractor,
    L: Limiter + 'static,
{
    tokio::spawn(async move {
        process_batch(&files, extractor.as_ref(), &mut limiter, cache.as_ref()).await
    })
}

async fn collect_batches(handles: Vec<(Vec<PathBuf>, JoinHandle<RunReport>)>) -> RunReport {
    let mut report = RunReport::default();
    for (batch, handle) in handles {
        match handle.await {
            Ok(batch_report) => report.extend(batch_report),
            Err(e) => {
                // keep the report complete even when a worker dies
                tracing::error!("Worker for {} file(s) failed: {}", batch.len(), e);
                for path in batch {
                    report.insert(
                        path,
                        FileOutcome::Failed {
                            error: format!("worker failed: {}", e),
                        },
                    );
                }
            }
        }
    }
    report
}

/// Resolve workers, then run `files` through `extractor`.
pub async fn run_parallel<E: Extractor>(
    files: &[PathBuf],
    extractor: Arc<E>,
    options: RunOptions,
) -> SqlDepsResult<RunReport> {
    let executor = Executor::new(extractor, options)?;
    Ok(executor.run(files).await)
}

/// Process one batch sequentially on the current task.
///
/// `cache` is `None` when caching is off.
pub async fn process_batch<E, L>(
    files: &[PathBuf],
    extractor: &E,
    limiter: &mut L,
    cache: Option<&Cache>,
) -> RunReport
where
    E: Extractor,
    L: Limiter,
{
    let mut report = RunReport::default();
    for path in files {
        let outcome = extract_one(path, extractor, limiter, cache).await;
        report.insert(path.clone(), outcome);
    }
    report
}

async fn extract_one<E, L>(
    path: &Path,
    extractor: &E,
    limiter: &mut L,
    cache: Option<&Cache>,
) -> FileOutcome
where
    E: Extractor,
    L: Limiter,
{
    if let Some(cache) = cache
        && let Some(profile) = cache.fetch(path).await
    {
        return FileOutcome::Cached(profile);
    }

    limiter.acquire().await;
    match extractor.extract_file(path).await {
        Ok(profile) => {
            if let Some(cache) = cache {
                cache.store(&profile, path).await;
            }
            FileOutcome::Extracted(profile)
        }
        Err(e) => {
            tracing::warn!("Failed to extract {}: {}", path.display(), e);
            FileOutcome::Failed {
                error: e.to_string(),
            }
        }
    }
}
