// Input directory watching
//
// - Queue: FIFO of stable files with single-flight leases
// - Store: completion records that stop finished files from being re-queued

pub mod queue;
pub mod store;

pub use queue::{ItemStatus, Lease, WatchItem, WatchQueue};
pub use store::{CompletionRecord, CompletionStore};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::{Config, WatchConfig};
use crate::error::{CleanserError, Result};
use crate::job::JobOutcome;
use crate::processor::VideoProcessor;
use crate::status::StatusBoard;

/// How often the running service refreshes the status file
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// A candidate video seen during one scan
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Recursive listing of the input directory; blocking filesystem calls only
#[derive(Debug, Clone)]
struct Scanner {
    input_dir: PathBuf,
    excluded: Vec<PathBuf>,
    watch: WatchConfig,
}

impl Scanner {
    fn scan(&self) -> Result<Vec<ScannedFile>> {
        let root = std::fs::canonicalize(&self.input_dir).map_err(|e| {
            CleanserError::Queue(format!(
                "Input directory {} not accessible: {}",
                self.input_dir.display(),
                e
            ))
        })?;
        if !root.is_dir() {
            return Err(CleanserError::Queue(format!(
                "Input path {} is not a directory",
                self.input_dir.display()
            )));
        }

        // Directories that do not exist yet cannot contain anything to skip
        let excluded: Vec<PathBuf> = self.excluded
            .iter()
            .filter_map(|dir| std::fs::canonicalize(dir).ok())
            .filter(|dir| dir != &root)
            .collect();

        let mut files = Vec::new();
        let walker = WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !excluded.iter().any(|dir| entry.path().starts_with(dir)));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.watch.matches_extension(entry.path()) {
                continue;
            }
            match entry.metadata() {
                Ok(metadata) => files.push(ScannedFile {
                    path: entry.into_path(),
                    size: metadata.len(),
                    modified: metadata.modified().ok(),
                }),
                Err(e) => warn!("Cannot stat {}: {}", entry.path().display(), e),
            }
        }

        Ok(files)
    }
}

/// Polls the input directory and enqueues files whose size has settled
pub struct Watcher {
    scanner: Scanner,
    queue: WatchQueue,
    store: CompletionStore,
    sizes: HashMap<PathBuf, u64>,
    failure_streak: u32,
}

impl Watcher {
    pub fn new(config: &Config, queue: WatchQueue, store: CompletionStore) -> Self {
        let paths = &config.paths;
        Self {
            scanner: Scanner {
                input_dir: paths.input_dir.clone(),
                excluded: vec![paths.output_dir.clone(), paths.temp_dir.clone(), paths.state_dir.clone()],
                watch: config.watch.clone(),
            },
            queue,
            store,
            sizes: HashMap::new(),
            failure_streak: 0,
        }
    }

    /// List qualifying video files below the input directory
    pub fn scan_videos(&self) -> Result<Vec<ScannedFile>> {
        self.scanner.scan()
    }

    /// One scan: enqueue every file whose non-zero size matches the previous scan
    pub fn poll(&mut self) -> Result<Vec<PathBuf>> {
        let files = self.scanner.scan()?;
        Ok(self.settle(files))
    }

    /// `poll` with the directory walk moved to the blocking pool
    pub async fn poll_async(&mut self) -> Result<Vec<PathBuf>> {
        let scanner = self.scanner.clone();
        let files = tokio::task::spawn_blocking(move || scanner.scan())
            .await
            .map_err(|e| CleanserError::Queue(format!("Directory scan task failed: {}", e)))??;
        Ok(self.settle(files))
    }

    fn settle(&mut self, files: Vec<ScannedFile>) -> Vec<PathBuf> {
        let mut enqueued = Vec::new();
        let mut seen = HashMap::with_capacity(files.len());

        for file in files {
            if self.queue.is_tracked(&file.path) || self.store.should_skip(&file.path, file.modified) {
                continue;
            }

            let previous = self.sizes.get(&file.path).copied();
            if file.size > 0 && previous == Some(file.size) {
                if self.queue.enqueue(file.path.clone()) {
                    info!("Queued {} ({} bytes)", file.path.display(), file.size);
                    enqueued.push(file.path);
                }
                continue;
            }

            debug!("Waiting for {} to settle ({} bytes)", file.path.display(), file.size);
            seen.insert(file.path, file.size);
        }

        self.sizes = seen;
        enqueued
    }

    fn record_failure(&mut self, e: &CleanserError) {
        self.failure_streak += 1;
        warn!("Scan failed ({} in a row): {}", self.failure_streak, e);

        if self.failure_streak == self.scanner.watch.alarm_after_failures {
            error!(
                alarm = true,
                failures = self.failure_streak,
                "Input directory {} unreadable for {} consecutive scans",
                self.scanner.input_dir.display(),
                self.failure_streak
            );
        }
    }

    fn record_success(&mut self) {
        if self.failure_streak >= self.scanner.watch.alarm_after_failures {
            info!("Input directory scan recovered after {} failures", self.failure_streak);
        }
        self.failure_streak = 0;
    }

    /// Poll until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) {
        let interval = self.scanner.watch.poll_interval();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Watching {} every {:?}", self.scanner.input_dir.display(), interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Watcher stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match self.poll_async().await {
                        Ok(_) => self.record_success(),
                        Err(e) => self.record_failure(&e),
                    }
                }
            }
        }
    }
}

/// Watcher, serial consumer and status publisher wired together
pub struct WatchService {
    processor: Arc<VideoProcessor>,
    queue: WatchQueue,
    store: CompletionStore,
}

impl WatchService {
    pub fn new(processor: Arc<VideoProcessor>) -> Self {
        Self {
            processor,
            queue: WatchQueue::new(),
            store: CompletionStore::new(),
        }
    }

    pub fn watcher(&self) -> Watcher {
        Watcher::new(self.processor.config(), self.queue.clone(), self.store.clone())
    }

    /// Run until `cancel` fires; an interrupted job is requeued, not recorded
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let status_file = self.processor.config().status_file();

        let poller = tokio::spawn(self.watcher().run(cancel.clone()));
        let publisher = tokio::spawn(publish_status(
            self.processor.status().clone(),
            self.queue.clone(),
            status_file.clone(),
            cancel.clone(),
        ));

        self.consume(&cancel).await;

        if let Err(e) = poller.await {
            warn!("Watcher task ended abnormally: {}", e);
        }
        if let Err(e) = publisher.await {
            warn!("Status task ended abnormally: {}", e);
        }

        self.processor
            .status()
            .snapshot(false, self.queue.depth())
            .write_to(&status_file)
            .await?;
        info!("Watch service stopped");
        Ok(())
    }

    /// Hand leases to the processor one at a time until cancelled
    pub async fn consume(&self, cancel: &CancellationToken) {
        loop {
            let lease = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                lease = self.queue.next() => lease,
            };
            self.handle(lease, cancel).await;
        }
    }

    async fn handle(&self, lease: Lease, cancel: &CancellationToken) -> JobOutcome {
        let outcome = self.processor.process(lease.path(), cancel).await;

        if outcome.is_cancelled() {
            drop(lease);
        } else if outcome.is_success() {
            lease.complete(ItemStatus::Done, &self.store);
        } else {
            lease.complete(ItemStatus::Failed, &self.store);
        }
        outcome
    }
}

async fn publish_status(board: StatusBoard, queue: WatchQueue, path: PathBuf, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = board.snapshot(true, queue.depth()).write_to(&path).await {
                    warn!("Failed to write status file {}: {}", path.display(), e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusSnapshot;
    use crate::testing::{StubInpaint, StubMedia, media_info, test_config};
    use std::fs::File;

    fn watcher(config: &Config) -> (Watcher, WatchQueue, CompletionStore) {
        let queue = WatchQueue::new();
        let store = CompletionStore::new();
        (Watcher::new(config, queue.clone(), store.clone()), queue, store)
    }

    #[test]
    fn test_file_enqueued_after_size_settles() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let video = config.paths.input_dir.join("a.mp4");
        std::fs::write(&video, b"12345").unwrap();
        let (mut watcher, queue, _) = watcher(&config);

        assert!(watcher.poll().unwrap().is_empty());

        std::fs::write(&video, b"1234567890").unwrap();
        assert!(watcher.poll().unwrap().is_empty());

        let enqueued = watcher.poll().unwrap();
        assert_eq!(enqueued.len(), 1);
        assert!(enqueued[0].ends_with("a.mp4"));
        assert!(enqueued[0].is_absolute());

        assert!(watcher.poll().unwrap().is_empty());
        assert_eq!(queue.depth(), 1);
    }

    #[test]
    fn test_empty_and_foreign_files_ignored() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        std::fs::write(config.paths.input_dir.join("empty.mp4"), b"").unwrap();
        std::fs::write(config.paths.input_dir.join("notes.txt"), b"hello").unwrap();
        let (mut watcher, queue, _) = watcher(&config);

        watcher.poll().unwrap();
        watcher.poll().unwrap();
        assert_eq!(queue.depth(), 0);
    }

    #[test]
    fn test_nested_files_found_and_excluded_dirs_skipped() {
        let root = tempfile::tempdir().unwrap();
        let mut config = test_config(root.path());
        config.paths.output_dir = config.paths.input_dir.join("cleaned");
        config.paths.temp_dir = config.paths.input_dir.join(".work");

        for dir in ["season1", "cleaned", ".work"] {
            let dir = config.paths.input_dir.join(dir);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("clip.mp4"), b"video").unwrap();
        }
        let (mut watcher, _, _) = watcher(&config);

        let files = watcher.scan_videos().unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("season1/clip.mp4"));

        watcher.poll().unwrap();
        assert_eq!(watcher.poll().unwrap().len(), 1);
    }

    #[test]
    fn test_completed_file_not_requeued_until_modified() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let video = config.paths.input_dir.join("a.mp4");
        std::fs::write(&video, b"video").unwrap();
        let (mut watcher, queue, store) = watcher(&config);

        watcher.poll().unwrap();
        let lease = {
            watcher.poll().unwrap();
            queue.try_next().unwrap()
        };
        let path = lease.path().to_path_buf();
        lease.complete(ItemStatus::Failed, &store);

        watcher.poll().unwrap();
        watcher.poll().unwrap();
        assert_eq!(queue.depth(), 0);

        let later = SystemTime::now() + Duration::from_secs(60);
        File::options().write(true).open(&path).unwrap().set_modified(later).unwrap();
        watcher.poll().unwrap();
        let enqueued = watcher.poll().unwrap();
        assert_eq!(enqueued, vec![path]);
    }

    #[test]
    fn test_missing_input_dir_is_queue_error() {
        let root = tempfile::tempdir().unwrap();
        let mut config = test_config(root.path());
        config.paths.input_dir = root.path().join("missing");
        config.watch.alarm_after_failures = 2;
        let (mut watcher, _, _) = watcher(&config);

        for _ in 0..3 {
            let err = watcher.poll().unwrap_err();
            assert!(matches!(err, CleanserError::Queue(_)));
            watcher.record_failure(&err);
        }
        assert_eq!(watcher.failure_streak, 3);

        std::fs::create_dir_all(&config.paths.input_dir).unwrap();
        assert!(watcher.poll().is_ok());
        watcher.record_success();
        assert_eq!(watcher.failure_streak, 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_poll_async_scans_on_blocking_pool() {
        let root = tempfile::tempdir().unwrap();
        let mut config = test_config(root.path());
        let video = config.paths.input_dir.join("a.mp4");
        std::fs::write(&video, b"settled").unwrap();
        let (mut poller, queue, _) = watcher(&config);

        assert!(poller.poll_async().await.unwrap().is_empty());
        let enqueued = poller.poll_async().await.unwrap();
        assert_eq!(enqueued.len(), 1);
        assert!(enqueued[0].ends_with("a.mp4"));
        assert_eq!(queue.depth(), 1);

        config.paths.input_dir = root.path().join("missing");
        let (mut missing, _, _) = watcher(&config);
        assert!(matches!(missing.poll_async().await, Err(CleanserError::Queue(_))));
    }

    #[tokio::test]
    async fn test_service_processes_videos_one_at_a_time() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        for name in ["a.mp4", "b.mp4"] {
            std::fs::write(config.paths.input_dir.join(name), b"video").unwrap();
        }

        let media = Arc::new(
            StubMedia::new(media_info(32, 18, 1.0, 5), 3).with_delay(Duration::from_millis(30)),
        );
        let processor = VideoProcessor::new(
            config.clone(),
            media.clone(),
            Arc::new(StubInpaint::black(32, 18)),
            StatusBoard::new(),
        );
        let service = Arc::new(WatchService::new(Arc::new(processor)));

        let cancel = CancellationToken::new();
        let running = {
            let service = service.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { service.run(cancel).await })
        };

        let outputs = [
            config.paths.output_dir.join("a_cleaned.mp4"),
            config.paths.output_dir.join("b_cleaned.mp4"),
        ];
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while !outputs.iter().all(|p| p.exists()) && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        cancel.cancel();
        running.await.unwrap().unwrap();

        assert!(outputs.iter().all(|p| p.exists()));
        assert_eq!(media.events(), vec!["probe:a.mp4", "mux", "probe:b.mp4", "mux"]);

        let snapshot = StatusSnapshot::read_from(&config.status_file()).unwrap();
        assert!(!snapshot.running);
        assert_eq!(snapshot.jobs_succeeded, 2);
        assert_eq!(service.store.len(), 2);
    }
}
