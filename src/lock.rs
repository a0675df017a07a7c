// A lock is the JSON file `<job_dir>/.lock`, created with an atomic
// create-if-absent and refreshed by a heartbeat task while held. Once its
// modification time is older than the stale timeout it is renamed aside
// (`.lock.stale`, `.lock.stale1`, ...), never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;
use tracing::{debug, info, warn};

use crate::config::{clamp_heartbeat, resolve_worker_id, LockConfig};
use crate::error::{Result, RevoiceError};

pub const LOCK_FILE_NAME: &str = ".lock";

/// Wall-clock source used for lock timestamps and age checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// On-disk lock content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub worker_id: String,
    /// ISO-8601 time of acquisition or last heartbeat
    pub timestamp: String,
    pub directory: String,
    /// Distinguishes two acquisitions by the same worker id
    #[serde(default)]
    pub lease: String,
}

#[derive(Debug, Clone)]
pub struct LockStatus {
    pub path: PathBuf,
    pub record: Option<LockRecord>,
    pub age: Duration,
    pub stale: bool,
}

/// Result of an acquisition attempt. `Busy` is the normal "another live worker
/// owns this job" answer, not a failure.
#[derive(Debug)]
pub enum LockOutcome {
    Acquired(LockHandle),
    Busy { holder: Option<LockRecord> },
}

#[derive(Clone)]
pub struct LockCoordinator {
    worker_id: String,
    stale_timeout: Duration,
    heartbeat_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LockCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockCoordinator")
            .field("worker_id", &self.worker_id)
            .field("stale_timeout", &self.stale_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish()
    }
}

impl LockCoordinator {
    pub fn new(worker_id: impl Into<String>, stale_timeout: Duration, heartbeat_interval: Duration) -> Self {
        Self {
            worker_id: worker_id.into(),
            stale_timeout,
            heartbeat_interval: clamp_heartbeat(heartbeat_interval, stale_timeout),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn from_config(config: &LockConfig) -> Self {
        let worker_id = resolve_worker_id(config.worker_id.as_deref());
        Self::new(worker_id, config.stale_timeout(), config.heartbeat_interval())
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn stale_timeout(&self) -> Duration {
        self.stale_timeout
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn lock_path(directory: &Path) -> PathBuf {
        directory.join(LOCK_FILE_NAME)
    }

    /// Current lock state of `directory`, or `None` when it is unlocked.
    pub fn inspect(&self, directory: &Path) -> Result<Option<LockStatus>> {
        let path = Self::lock_path(directory);
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let modified = metadata.modified()?;
        let age = self
            .clock
            .now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        let record = read_record(&path).unwrap_or_else(|e| {
            debug!("Unreadable lock file {}: {}", path.display(), e);
            None
        });

        Ok(Some(LockStatus {
            path,
            record,
            age,
            stale: age > self.stale_timeout,
        }))
    }

    pub fn is_stale(&self, directory: &Path) -> Result<bool> {
        Ok(self.inspect(directory)?.map(|s| s.stale).unwrap_or(false))
    }

    /// Rename an abandoned lock aside. Returns whether a recovery happened.
    pub fn recover_if_stale(&self, directory: &Path) -> Result<bool> {
        match self.inspect(directory)? {
            Some(status) if status.stale => {
                let Some(moved_to) = set_aside(&status.path)? else {
                    return Ok(false);
                };
                self.confirm_set_aside(&moved_to, &status);
                warn!(
                    "Recovered stale lock in {} (owner {}, idle {:.0}s), moved to {}",
                    directory.display(),
                    status.record.as_ref().map(|r| r.worker_id.as_str()).unwrap_or("unknown"),
                    status.age.as_secs_f64(),
                    moved_to.display()
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Claim `directory` for this worker and start its heartbeat.
    ///
    /// Must be called from within a tokio runtime.
    pub fn acquire(&self, directory: &Path) -> Result<LockOutcome> {
        fs::create_dir_all(directory)?;
        let path = Self::lock_path(directory);

        if let Some(lease) = self.try_create(&path, directory)? {
            return Ok(LockOutcome::Acquired(self.start_heartbeat(path, directory, lease)));
        }

        match self.inspect(directory)? {
            Some(status) if !status.stale => {
                debug!(
                    "Lock {} is held ({} s old)",
                    path.display(),
                    status.age.as_secs()
                );
                return Ok(LockOutcome::Busy {
                    holder: status.record,
                });
            }
            Some(status) => {
                if let Some(moved_to) = set_aside(&path)? {
                    self.confirm_set_aside(&moved_to, &status);
                    warn!(
                        "Recovered stale lock in {} (owner {}), moved to {}",
                        directory.display(),
                        status.record.as_ref().map(|r| r.worker_id.as_str()).unwrap_or("unknown"),
                        moved_to.display()
                    );
                }
            }
            None => {}
        }

        match self.try_create(&path, directory)? {
            Some(lease) => Ok(LockOutcome::Acquired(self.start_heartbeat(path, directory, lease))),
            None => Ok(LockOutcome::Busy {
                holder: read_record(&path).ok().flatten(),
            }),
        }
    }

    /// Check that the file just renamed aside is the stale lock `observed`
    /// earlier. Another worker may have recovered and re-created the lock in
    /// between, in which case a live lock was displaced. Returns whether the
    /// moved file matched.
    fn confirm_set_aside(&self, moved_to: &Path, observed: &LockStatus) -> bool {
        let moved = read_record(moved_to).ok().flatten();
        let same_lease = match (&moved, &observed.record) {
            (Some(moved), Some(observed)) => moved.lease == observed.lease,
            (Some(_), None) => false,
            (None, _) => true,
        };
        let still_stale = fs::metadata(moved_to)
            .and_then(|m| m.modified())
            .map(|modified| {
                self.clock.now().duration_since(modified).unwrap_or(Duration::ZERO) > self.stale_timeout
            })
            .unwrap_or(true);

        if same_lease && still_stale {
            return true;
        }
        warn!(
            "Lock moved to {} was not the stale lock observed (owner {}); a live holder may have been displaced",
            moved_to.display(),
            moved.as_ref().map(|r| r.worker_id.as_str()).unwrap_or("unknown")
        );
        false
    }

    fn record(&self, directory: &Path, lease: &str, at: SystemTime) -> LockRecord {
        LockRecord {
            worker_id: self.worker_id.clone(),
            timestamp: DateTime::<Utc>::from(at).to_rfc3339(),
            directory: directory.display().to_string(),
            lease: lease.to_string(),
        }
    }

    /// Atomic create-if-absent. `None` means a lock file already exists.
    fn try_create(&self, path: &Path, directory: &Path) -> Result<Option<String>> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let lease = uuid::Uuid::new_v4().to_string();
        let now = self.clock.now();
        let written = serde_json::to_vec_pretty(&self.record(directory, &lease, now))
            .map_err(std::io::Error::from)
            .and_then(|bytes| file.write_all(&bytes))
            .and_then(|_| file.set_modified(now))
            .and_then(|_| file.sync_all());

        if let Err(e) = written {
            drop(file);
            let _ = fs::remove_file(path);
            return Err(RevoiceError::Lock(format!(
                "Failed to write lock {}: {}",
                path.display(),
                e
            )));
        }

        info!("Worker {} acquired {}", self.worker_id, path.display());
        Ok(Some(lease))
    }

    fn start_heartbeat(&self, path: PathBuf, directory: &Path, lease: String) -> LockHandle {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let task_path = path.clone();
        let coordinator = self.clone();
        let directory = directory.to_path_buf();
        let task_lease = lease.clone();
        let interval = self.heartbeat_interval;

        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        match coordinator.refresh(&task_path, &directory, &task_lease) {
                            Ok(true) => debug!("Heartbeat {}", task_path.display()),
                            Ok(false) => {
                                warn!(
                                    "Lock {} was taken over by another worker; stopping heartbeat",
                                    task_path.display()
                                );
                                break;
                            }
                            Err(e) => warn!("Heartbeat for {} failed: {}", task_path.display(), e),
                        }
                    }
                }
            }
        });

        LockHandle {
            path,
            lease,
            token,
            heartbeat: Some(heartbeat),
            released: false,
        }
    }

    /// Rewrite the timestamp and touch the mtime. `Ok(false)` if the file no
    /// longer carries our lease.
    fn refresh(&self, path: &Path, directory: &Path, lease: &str) -> std::io::Result<bool> {
        match read_record(path) {
            Ok(Some(record)) if record.lease != lease => return Ok(false),
            Ok(None) => {
                return Err(std::io::Error::new(
                    ErrorKind::NotFound,
                    "lock file disappeared",
                ))
            }
            _ => {}
        }

        let now = self.clock.now();
        let bytes = serde_json::to_vec_pretty(&self.record(directory, lease, now))?;
        let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
        file.write_all(&bytes)?;
        file.set_modified(now)?;
        Ok(true)
    }
}

/// Held lock. Release it with [`LockHandle::release`]; dropping an unreleased
/// handle stops the heartbeat and removes the file on a best-effort basis.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    lease: String,
    token: CancellationToken,
    heartbeat: Option<JoinHandle<()>>,
    released: bool,
}

impl LockHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop the heartbeat, wait for it to finish and delete the lock file.
    pub async fn release(mut self) -> Result<()> {
        self.token.cancel();
        if let Some(task) = self.heartbeat.take() {
            if let Err(e) = task.await {
                warn!("Heartbeat task for {} ended abnormally: {}", self.path.display(), e);
            }
        }
        self.released = true;
        remove_if_owned(&self.path, &self.lease)?;
        info!("Released {}", self.path.display());
        Ok(())
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.token.cancel();
        if let Err(e) = remove_if_owned(&self.path, &self.lease) {
            warn!("Failed to release {} on drop: {}", self.path.display(), e);
        }
    }
}

fn read_record(path: &Path) -> Result<Option<LockRecord>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_if_owned(path: &Path, lease: &str) -> Result<()> {
    match read_record(path) {
        Ok(Some(record)) if record.lease == lease => match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        },
        Ok(Some(record)) => {
            warn!(
                "Lock {} now belongs to {}; leaving it in place",
                path.display(),
                record.worker_id
            );
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => {
            warn!("Lock {} is unreadable; leaving it in place: {}", path.display(), e);
            Ok(())
        }
    }
}

/// Rename a lock file to the first free `.lock.stale[N]` name. `None` when the
/// file vanished first (another worker recovered it).
fn set_aside(path: &Path) -> Result<Option<PathBuf>> {
    let target = (0..)
        .map(|n| stale_name(path, n))
        .find(|candidate| !candidate.exists())
        .ok_or_else(|| RevoiceError::Lock("no free stale lock name".to_string()))?;

    match fs::rename(path, &target) {
        Ok(()) => Ok(Some(target)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn stale_name(path: &Path, n: usize) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| LOCK_FILE_NAME.to_string());
    if n == 0 {
        path.with_file_name(format!("{}.stale", name))
    } else {
        path.with_file_name(format!("{}.stale{}", name, n))
    }
}

/// Every job directory under `root` that currently has a lock file.
pub fn find_locked_directories(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == LOCK_FILE_NAME)
        .filter_map(|e| e.path().parent().map(Path::to_path_buf))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    /// Wall clock that follows tokio's (pausable) time.
    struct TokioClock {
        base: SystemTime,
        origin: Instant,
    }

    impl TokioClock {
        fn new() -> Self {
            Self {
                base: SystemTime::now(),
                origin: Instant::now(),
            }
        }
    }

    impl Clock for TokioClock {
        fn now(&self) -> SystemTime {
            self.base + self.origin.elapsed()
        }
    }

    fn coordinator(worker: &str) -> LockCoordinator {
        LockCoordinator::new(worker, Duration::from_secs(5), Duration::from_secs(1))
    }

    fn write_aged_lock(directory: &Path, owner: &str, age: Duration) {
        write_lock(directory, owner, "crashed", age);
    }

    fn write_lock(directory: &Path, owner: &str, lease: &str, age: Duration) {
        let path = LockCoordinator::lock_path(directory);
        let at = SystemTime::now() - age;
        let record = LockRecord {
            worker_id: owner.to_string(),
            timestamp: DateTime::<Utc>::from(at).to_rfc3339(),
            directory: directory.display().to_string(),
            lease: lease.to_string(),
        };
        fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(at)
            .unwrap();
    }

    #[tokio::test]
    async fn second_worker_is_busy_while_first_holds_lock() {
        let dir = tempfile::tempdir().unwrap();
        let a = coordinator("worker-a");
        let b = coordinator("worker-b");

        let handle = match a.acquire(dir.path()).unwrap() {
            LockOutcome::Acquired(handle) => handle,
            LockOutcome::Busy { .. } => panic!("first acquisition must succeed"),
        };

        match b.acquire(dir.path()).unwrap() {
            LockOutcome::Busy { holder } => {
                assert_eq!(holder.unwrap().worker_id, "worker-a");
            }
            LockOutcome::Acquired(_) => panic!("second worker must be refused"),
        }

        handle.release().await.unwrap();
        assert!(!LockCoordinator::lock_path(dir.path()).exists());
    }

    #[tokio::test]
    async fn lock_file_has_owner_timestamp_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let a = coordinator("worker-a");
        let LockOutcome::Acquired(handle) = a.acquire(dir.path()).unwrap() else {
            panic!("expected acquisition");
        };

        let raw = fs::read_to_string(handle.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["worker_id"], "worker-a");
        assert_eq!(value["directory"], dir.path().display().to_string());
        let timestamp = value["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());

        handle.release().await.unwrap();
    }

    #[tokio::test]
    async fn stale_lock_is_renamed_aside_and_reclaimable() {
        let dir = tempfile::tempdir().unwrap();
        write_aged_lock(dir.path(), "crashed-worker", Duration::from_secs(10));

        let b = coordinator("worker-b");
        assert!(b.is_stale(dir.path()).unwrap());
        assert!(b.recover_if_stale(dir.path()).unwrap());

        let aside = dir.path().join(".lock.stale");
        assert!(aside.exists());
        let kept: LockRecord = serde_json::from_str(&fs::read_to_string(&aside).unwrap()).unwrap();
        assert_eq!(kept.worker_id, "crashed-worker");

        let LockOutcome::Acquired(handle) = b.acquire(dir.path()).unwrap() else {
            panic!("reclaim after recovery must succeed");
        };
        handle.release().await.unwrap();
    }

    #[tokio::test]
    async fn acquire_recovers_stale_lock_itself_with_numbered_names() {
        let dir = tempfile::tempdir().unwrap();
        let b = coordinator("worker-b");

        write_aged_lock(dir.path(), "first-crash", Duration::from_secs(30));
        assert!(b.recover_if_stale(dir.path()).unwrap());

        write_aged_lock(dir.path(), "second-crash", Duration::from_secs(30));
        let LockOutcome::Acquired(handle) = b.acquire(dir.path()).unwrap() else {
            panic!("stale lock should be reclaimed by acquire");
        };

        assert!(dir.path().join(".lock.stale").exists());
        assert!(dir.path().join(".lock.stale1").exists());
        handle.release().await.unwrap();
    }

    #[test]
    fn fresh_lock_is_not_recovered() {
        let dir = tempfile::tempdir().unwrap();
        write_aged_lock(dir.path(), "live-worker", Duration::from_secs(1));

        let b = coordinator("worker-b");
        assert!(!b.recover_if_stale(dir.path()).unwrap());
        assert!(LockCoordinator::lock_path(dir.path()).exists());
        assert!(!b.recover_if_stale(&dir.path().join("missing")).unwrap());
    }

    #[tokio::test]
    async fn release_leaves_a_foreign_lock_alone() {
        let dir = tempfile::tempdir().unwrap();
        let a = coordinator("worker-a");
        let LockOutcome::Acquired(handle) = a.acquire(dir.path()).unwrap() else {
            panic!("expected acquisition");
        };

        // Another worker reclaimed the directory in the meantime.
        write_aged_lock(dir.path(), "worker-b", Duration::ZERO);
        handle.release().await.unwrap();

        let record = read_record(&LockCoordinator::lock_path(dir.path())).unwrap().unwrap();
        assert_eq!(record.worker_id, "worker-b");
    }

    #[tokio::test]
    async fn dropping_a_handle_releases_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let a = coordinator("worker-a");
        {
            let outcome = a.acquire(dir.path()).unwrap();
            assert!(matches!(outcome, LockOutcome::Acquired(_)));
        }
        assert!(!LockCoordinator::lock_path(dir.path()).exists());
    }

    #[test]
    fn heartbeat_interval_is_clamped() {
        let c = LockCoordinator::new("w", Duration::from_secs(6), Duration::from_secs(6));
        assert_eq!(c.heartbeat_interval(), Duration::from_secs(2));

        let tiny = LockCoordinator::new("w", Duration::from_nanos(1), Duration::ZERO);
        assert!(!tiny.heartbeat_interval().is_zero());
    }

    #[tokio::test(start_paused = true)]
    async fn tiny_timeout_heartbeat_runs_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let holder = LockCoordinator::new("worker-a", Duration::from_nanos(1), Duration::from_secs(60));
        let LockOutcome::Acquired(handle) = holder.acquire(dir.path()).unwrap() else {
            panic!("expected acquisition");
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.heartbeat.as_ref().unwrap().is_finished());
        tokio_test::assert_ok!(handle.release().await);
    }

    #[test]
    fn set_aside_detects_a_displaced_live_lock() {
        let dir = tempfile::tempdir().unwrap();
        let b = coordinator("worker-b");

        // Untouched stale lock
        write_aged_lock(dir.path(), "crashed-worker", Duration::from_secs(30));
        let observed = b.inspect(dir.path()).unwrap().unwrap();
        let moved = set_aside(&observed.path).unwrap().unwrap();
        assert!(b.confirm_set_aside(&moved, &observed));

        // Recovered and re-locked by worker-c between inspect and rename
        write_aged_lock(dir.path(), "crashed-worker", Duration::from_secs(30));
        let observed = b.inspect(dir.path()).unwrap().unwrap();
        write_lock(dir.path(), "worker-c", "fresh-lease", Duration::from_secs(30));
        let moved = set_aside(&observed.path).unwrap().unwrap();
        assert!(!b.confirm_set_aside(&moved, &observed));

        // Same lease, but refreshed by a heartbeat that came back
        write_aged_lock(dir.path(), "slow-worker", Duration::from_secs(30));
        let observed = b.inspect(dir.path()).unwrap().unwrap();
        write_aged_lock(dir.path(), "slow-worker", Duration::ZERO);
        let moved = set_aside(&observed.path).unwrap().unwrap();
        assert!(!b.confirm_set_aside(&moved, &observed));

        assert!(dir.path().join(".lock.stale2").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_keeps_lock_fresh_while_stage_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
        let holder = coordinator("worker-a").with_clock(clock.clone());
        let checker = coordinator("worker-b").with_clock(clock.clone());

        let LockOutcome::Acquired(handle) = holder.acquire(dir.path()).unwrap() else {
            panic!("expected acquisition");
        };

        let stage = tokio::time::sleep(Duration::from_secs(8));
        tokio::pin!(stage);
        let mut check = tokio::time::interval(Duration::from_millis(500));
        let mut checks = 0;
        loop {
            tokio::select! {
                _ = &mut stage => break,
                _ = check.tick() => {
                    checks += 1;
                    assert!(!checker.is_stale(dir.path()).unwrap());
                    assert!(!checker.recover_if_stale(dir.path()).unwrap());
                    assert!(matches!(
                        checker.acquire(dir.path()).unwrap(),
                        LockOutcome::Busy { .. }
                    ));
                }
            }
        }
        assert!(checks >= 15);

        handle.release().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn lock_without_heartbeat_goes_stale() {
        let dir = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
        let holder = coordinator("worker-a").with_clock(clock.clone());
        let checker = coordinator("worker-b").with_clock(clock.clone());

        let LockOutcome::Acquired(handle) = holder.acquire(dir.path()).unwrap() else {
            panic!("expected acquisition");
        };
        // Simulate a dead process: the heartbeat stops but the file stays.
        handle.token.cancel();
        std::mem::forget(handle);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(checker.is_stale(dir.path()).unwrap());
        assert!(checker.recover_if_stale(dir.path()).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_survives_a_removed_job_directory() {
        let root = tempfile::tempdir().unwrap();
        let job = root.path().join("episode01");
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
        let holder = coordinator("worker-a").with_clock(clock);

        let LockOutcome::Acquired(handle) = holder.acquire(&job).unwrap() else {
            panic!("expected acquisition");
        };
        fs::remove_dir_all(&job).unwrap();

        // Several failing refreshes are logged and skipped
        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert!(!handle.heartbeat.as_ref().unwrap().is_finished());

        tokio_test::assert_ok!(handle.release().await);
        assert!(!job.exists());
    }

    #[tokio::test]
    async fn finds_locked_directories() {
        let root = tempfile::tempdir().unwrap();
        let job = root.path().join("show").join("episode01");
        fs::create_dir_all(&job).unwrap();
        let a = coordinator("worker-a");
        let LockOutcome::Acquired(handle) = a.acquire(&job).unwrap() else {
            panic!("expected acquisition");
        };

        assert_eq!(find_locked_directories(root.path()), vec![job.clone()]);
        handle.release().await.unwrap();
        assert!(find_locked_directories(root.path()).is_empty());
    }
}
