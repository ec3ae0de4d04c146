//! Incremental download of missing blocks followed by repack.
//!
//! ## Flow
//!
//! 1. Read the block references of a stub and drop those already in the
//!    local store; what remains becomes the [`TaskQueue`].
//! 2. A fixed pool of workers claims tasks one at a time, fetches each block
//!    from a [`BlockSource`], verifies its digest and stores it. A failed
//!    fetch or a digest mismatch sends the task back to the queue until the
//!    attempt bound is reached.
//! 3. A monitor waits for every task to settle and reports whether any
//!    failed. Only if none did is the stub repacked.

mod queue;

pub use queue::{Claim, DownloadTask, FailOutcome, TaskQueue, TaskState};

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::codec::{RepackSummary, Repacker, split_trailer, stub_blocks};
use crate::config::{DownloadConfig, ShrinkConfig};
use crate::digest::BlockDigest;
use crate::error::{FailedBlock, Result, ShrinkError};
use crate::io::BlockSource;
use crate::store::BlockStore;

/// Final state of every task of one download run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub tasks: Vec<DownloadTask>,
    /// Whether any task ended failed, as observed by the run's monitor.
    pub has_failures: bool,
}

impl DownloadReport {
    pub fn downloaded(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Done)
            .count()
    }

    pub fn failed(&self) -> Vec<FailedBlock> {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Failed)
            .map(|t| FailedBlock {
                hash: t.hash,
                name: t.display_name.clone(),
            })
            .collect()
    }

    pub fn is_success(&self) -> bool {
        !self.has_failures
    }
}

pub struct Downloader<S: BlockSource> {
    source: Arc<S>,
    store: BlockStore,
    shrink: ShrinkConfig,
    config: DownloadConfig,
}

impl<S: BlockSource + 'static> Downloader<S> {
    pub fn new(source: Arc<S>, store: BlockStore, shrink: ShrinkConfig, config: DownloadConfig) -> Self {
        Self {
            source,
            store,
            shrink,
            config,
        }
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    /// One task per distinct block of `stub` that the local store lacks.
    pub fn plan(&self, stub: &[u8]) -> Result<Vec<DownloadTask>> {
        let (body, _) = split_trailer(stub)?;
        let mut seen = HashSet::new();
        Ok(stub_blocks(body, &self.shrink)?
            .into_iter()
            .filter(|b| seen.insert(b.digest) && !self.store.has(&b.digest))
            .map(|b| DownloadTask::new(b.digest, b.name))
            .collect())
    }

    /// Fetch every block of `stub` missing from the store.
    ///
    /// Per-block failures are retried and never abort the run; they show up
    /// as [`TaskState::Failed`] tasks in the report.
    ///
    /// # Arguments
    ///
    /// * `stub` - A complete stub, trailer included
    ///
    /// # Returns
    ///
    /// The final state of every planned task. Blocks already in the store
    /// are not planned and do not appear in the report.
    ///
    /// # Errors
    ///
    /// Returns [`ShrinkError::Format`] if `stub` cannot be parsed. Transport
    /// and integrity failures of single blocks are reported, not returned.
    pub async fn fetch_missing(&self, stub: &[u8]) -> Result<DownloadReport> {
        let tasks = self.plan(stub)?;
        info!(blocks = tasks.len(), "blocks need to download");
        Ok(self.run_tasks(tasks).await)
    }

    /// Fetch every block of `stub` missing from the store and fail unless
    /// all of them arrived.
    ///
    /// # Errors
    ///
    /// Returns [`ShrinkError::DownloadFailed`] listing every block that
    /// exhausted its attempts, or any error of [`fetch_missing`](Self::fetch_missing).
    pub async fn require_blocks(&self, stub: &[u8]) -> Result<DownloadReport> {
        let report = self.fetch_missing(stub).await?;
        if report.is_success() {
            return Ok(report);
        }

        let failed = report.failed();
        for block in &failed {
            error!(hash = %block.hash, name = %block.name, "block download failed");
        }
        Err(ShrinkError::DownloadFailed { failed })
    }

    async fn run_tasks(&self, tasks: Vec<DownloadTask>) -> DownloadReport {
        let queue = Arc::new(TaskQueue::new(tasks, self.config.max_attempts()));
        let monitor = tokio::spawn(monitor(queue.clone()));

        let mut workers = JoinSet::new();
        for id in 0..self.config.workers() {
            workers.spawn(worker(
                id,
                queue.clone(),
                self.source.clone(),
                self.store.clone(),
                self.config,
            ));
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "download worker aborted");
            }
        }

        // Workers only exit once nothing is waiting; anything still
        // unsettled belonged to a worker that aborted.
        let abandoned = queue.fail_unsettled();
        if abandoned > 0 {
            warn!(abandoned, "blocks left unsettled by aborted workers");
        }

        let has_failures = match monitor.await {
            Ok(failed) => failed,
            Err(e) => {
                error!(error = %e, "download monitor aborted");
                queue.has_failures()
            }
        };

        DownloadReport {
            tasks: queue.snapshot(),
            has_failures,
        }
    }

    /// Fetch missing blocks, then repack `stub` into `out`.
    ///
    /// Nothing is written to `out` unless every block was obtained.
    ///
    /// # Errors
    ///
    /// Returns [`ShrinkError::DownloadFailed`] before touching `out` if any
    /// block could not be fetched, and otherwise any error of
    /// [`Repacker::repack`].
    pub async fn download_and_repack<W>(&self, stub: &[u8], out: &mut W) -> Result<RepackSummary>
    where
        W: Write + ?Sized,
    {
        self.require_blocks(stub).await?;
        Repacker::new(self.shrink, &self.store).repack(stub, out)
    }
}

/// Log progress as tasks settle; returns whether any task failed.
async fn monitor(queue: Arc<TaskQueue>) -> bool {
    let total = queue.len();
    let mut rx = queue.subscribe();
    loop {
        let settled = *rx.borrow_and_update();
        if settled >= total {
            break;
        }
        info!(settled, total, "download progress");
        if rx.changed().await.is_err() {
            break;
        }
    }

    let failed = queue.has_failures();
    if failed {
        warn!("download finished with failed blocks");
    } else {
        info!(total, "all blocks downloaded");
    }
    failed
}

async fn worker<S: BlockSource>(
    id: usize,
    queue: Arc<TaskQueue>,
    source: Arc<S>,
    store: BlockStore,
    config: DownloadConfig,
) {
    while let Some(claim) = queue.claim() {
        match fetch_and_store(source.as_ref(), &store, &claim.hash).await {
            Ok(size) => {
                info!(worker = id, hash = %claim.hash, name = %claim.display_name, size, "downloaded");
                queue.complete(claim);
            }
            Err(e) => {
                // The task stays claimed until the delay has passed.
                if queue.will_retry(&claim) {
                    let retry_count = claim.retry_count + 1;
                    warn!(worker = id, hash = %claim.hash, name = %claim.display_name, retry_count, error = %e, "retrying block");
                    let delay = config.retry_delay() * retry_count;
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                } else {
                    error!(worker = id, hash = %claim.hash, name = %claim.display_name, error = %e, "giving up on block");
                }
                queue.fail(claim);
            }
        }
    }
}

/// Fetch one block, verify it hashes to `hash`, and store it.
async fn fetch_and_store<S: BlockSource + ?Sized>(
    source: &S,
    store: &BlockStore,
    hash: &BlockDigest,
) -> Result<usize> {
    let data = source.fetch_block(hash).await?;

    let actual = BlockDigest::of(&data);
    if actual != *hash {
        return Err(ShrinkError::IntegrityMismatch {
            expected: *hash,
            actual,
        });
    }

    let size = data.len();
    let store = store.clone();
    let hash = *hash;
    tokio::task::spawn_blocking(move || store.put(&hash, &data))
        .await
        .map_err(|e| ShrinkError::Io(std::io::Error::other(e)))??;
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    /// How a scripted source answers one request.
    #[derive(Clone)]
    enum Reply {
        Ok,
        Corrupt,
        Unavailable,
    }

    /// Serves blocks from memory following a per-hash reply script; once a
    /// script runs out the last reply repeats.
    struct ScriptedSource {
        blocks: HashMap<BlockDigest, Vec<u8>>,
        scripts: Mutex<HashMap<BlockDigest, Vec<Reply>>>,
        requests: Mutex<HashMap<BlockDigest, Vec<Instant>>>,
    }

    impl ScriptedSource {
        fn new(blocks: &[Vec<u8>]) -> Self {
            Self {
                blocks: blocks.iter().map(|b| (BlockDigest::of(b), b.clone())).collect(),
                scripts: Mutex::new(HashMap::new()),
                requests: Mutex::new(HashMap::new()),
            }
        }

        fn script(self, hash: BlockDigest, replies: Vec<Reply>) -> Self {
            self.scripts.lock().unwrap().insert(hash, replies);
            self
        }

        fn requests(&self, hash: &BlockDigest) -> usize {
            self.request_times(hash).len()
        }

        fn request_times(&self, hash: &BlockDigest) -> Vec<Instant> {
            self.requests.lock().unwrap().get(hash).cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl BlockSource for ScriptedSource {
        async fn fetch_block(&self, hash: &BlockDigest) -> Result<Vec<u8>> {
            let n = {
                let mut requests = self.requests.lock().unwrap();
                let times = requests.entry(*hash).or_default();
                times.push(Instant::now());
                times.len()
            };
            let reply = self
                .scripts
                .lock()
                .unwrap()
                .get(hash)
                .and_then(|s| s.get(n - 1).or(s.last()).cloned())
                .unwrap_or(Reply::Ok);
            let data = self
                .blocks
                .get(hash)
                .cloned()
                .ok_or_else(|| ShrinkError::Transport("404".into()))?;
            match reply {
                Reply::Ok => Ok(data),
                Reply::Corrupt => Ok(b"garbage".to_vec()),
                Reply::Unavailable => Err(ShrinkError::Transport("503".into())),
            }
        }
    }

    fn setup(
        source: ScriptedSource,
        tasks: &[Vec<u8>],
    ) -> (tempfile::TempDir, Downloader<ScriptedSource>, Vec<DownloadTask>) {
        setup_with(source, tasks, DownloadConfig::default())
    }

    fn setup_with(
        source: ScriptedSource,
        tasks: &[Vec<u8>],
        config: DownloadConfig,
    ) -> (tempfile::TempDir, Downloader<ScriptedSource>, Vec<DownloadTask>) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(dir.path()).unwrap();
        let downloader = Downloader::new(Arc::new(source), store, ShrinkConfig::default(), config);
        let tasks = tasks
            .iter()
            .enumerate()
            .map(|(i, b)| DownloadTask::new(BlockDigest::of(b), format!("entry-{i}")))
            .collect();
        (dir, downloader, tasks)
    }

    #[tokio::test]
    async fn corrupt_twice_then_correct() {
        let block = vec![7u8; 9000];
        let hash = BlockDigest::of(&block);
        let source = ScriptedSource::new(&[block.clone()])
            .script(hash, vec![Reply::Corrupt, Reply::Corrupt, Reply::Ok]);
        let (_dir, downloader, tasks) = setup(source, &[block.clone()]);

        let report = downloader.run_tasks(tasks).await;

        assert!(report.is_success());
        assert_eq!(report.tasks[0].retry_count, 2);
        assert_eq!(downloader.source.requests(&hash), 3);
        assert_eq!(downloader.store().get(&hash).unwrap(), block);
    }

    #[tokio::test]
    async fn always_failing_block_fails_without_hanging() {
        let good = vec![1u8; 5000];
        let bad = vec![2u8; 5000];
        let bad_hash = BlockDigest::of(&bad);
        let source = ScriptedSource::new(&[good.clone(), bad.clone()])
            .script(bad_hash, vec![Reply::Unavailable]);
        let (_dir, downloader, tasks) = setup(source, &[good.clone(), bad.clone()]);

        let report = downloader.run_tasks(tasks).await;

        assert!(!report.is_success());
        assert_eq!(report.downloaded(), 1);
        let failed = report.failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].hash, bad_hash);
        assert_eq!(downloader.source.requests(&bad_hash), 3);
        assert!(!downloader.store().has(&bad_hash));
    }

    #[tokio::test]
    async fn always_corrupt_block_never_reaches_store() {
        let block = vec![3u8; 5000];
        let hash = BlockDigest::of(&block);
        let source = ScriptedSource::new(&[block.clone()]).script(hash, vec![Reply::Corrupt]);
        let (dir, downloader, tasks) = setup(source, &[block]);

        let report = downloader.run_tasks(tasks).await;

        assert_eq!(report.tasks[0].state, TaskState::Failed);
        assert_eq!(report.tasks[0].retry_count, 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn many_blocks_each_fetched_once() {
        let blocks: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i; 4097 + i as usize]).collect();
        let source = ScriptedSource::new(&blocks);
        let (_dir, downloader, tasks) = setup(source, &blocks);

        let report = downloader.run_tasks(tasks).await;

        assert!(report.is_success());
        assert_eq!(report.downloaded(), 20);
        for b in &blocks {
            assert_eq!(downloader.source.requests(&BlockDigest::of(b)), 1);
        }
    }

    #[tokio::test]
    async fn no_tasks_completes_immediately() {
        let (_dir, downloader, _) = setup(ScriptedSource::new(&[]), &[]);
        let report = downloader.run_tasks(Vec::new()).await;
        assert!(report.is_success());
        assert!(report.tasks.is_empty());
    }

    #[tokio::test]
    async fn retry_waits_for_delay_with_idle_workers() {
        let flaky = vec![4u8; 5000];
        let steady = vec![5u8; 5000];
        let flaky_hash = BlockDigest::of(&flaky);
        let source = ScriptedSource::new(&[flaky.clone(), steady.clone()])
            .script(flaky_hash, vec![Reply::Unavailable, Reply::Ok]);
        let delay = Duration::from_millis(200);
        let config = DownloadConfig::default()
            .with_workers(2)
            .with_retry_delay(delay);
        let (_dir, downloader, tasks) = setup_with(source, &[flaky, steady], config);

        let report = downloader.run_tasks(tasks).await;

        assert!(report.is_success());
        let times = downloader.source.request_times(&flaky_hash);
        assert_eq!(times.len(), 2);
        assert!(
            times[1] - times[0] >= delay,
            "retry ran after {:?}",
            times[1] - times[0]
        );
    }

    #[tokio::test]
    async fn monitor_reports_failed_tasks() {
        let tasks = vec![
            DownloadTask::new(BlockDigest::of(b"a"), "a"),
            DownloadTask::new(BlockDigest::of(b"b"), "b"),
        ];
        let queue = Arc::new(TaskQueue::new(tasks, 1));
        let handle = tokio::spawn(monitor(queue.clone()));

        let a = queue.claim().unwrap();
        let b = queue.claim().unwrap();
        queue.complete(a);
        assert!(!handle.is_finished());
        queue.fail(b);

        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn monitor_reports_clean_run() {
        let queue = Arc::new(TaskQueue::new(vec![DownloadTask::new(BlockDigest::of(b"a"), "a")], 3));
        let handle = tokio::spawn(monitor(queue.clone()));
        let a = queue.claim().unwrap();
        queue.complete(a);
        assert!(!handle.await.unwrap());
    }
}
