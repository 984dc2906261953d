//! Scoped temporary audio artifacts.
//!
//! Each extraction gets its own directory under a shared root. The
//! [`AudioArtifact`] guard removes that directory when dropped, so cleanup
//! happens on every exit path of the code holding it. A periodic sweep
//! removes anything under the root older than the retention window, which
//! catches directories orphaned by a crash.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::video_id::VideoId;

/// Orphaned artifacts older than this are removed by the sweep.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);

/// Build a request id that is unique within this process and very unlikely
/// to collide with another process sharing the same root.
pub fn request_id(video_id: &VideoId) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{video_id}-{}-{nanos}-{seq}", std::process::id())
}

/// Outcome of one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub kept: usize,
    pub failed: usize,
}

/// Owns the temp namespace that audio artifacts live in.
#[derive(Debug)]
pub struct ArtifactManager {
    root: PathBuf,
    retention: Duration,
    live: Arc<AtomicUsize>,
}

impl ArtifactManager {
    pub fn new(root: impl Into<PathBuf>, retention: Duration) -> Self {
        Self {
            root: root.into(),
            retention,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Number of artifacts handed out and not yet dropped.
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Reserve a fresh directory for `request_id`.
    ///
    /// Fails if the directory already exists, so two requests can never
    /// share one.
    pub fn acquire(&self, request_id: &str) -> Result<AudioArtifact> {
        if request_id.is_empty()
            || request_id == "."
            || request_id == ".."
            || request_id.contains(['/', '\\'])
        {
            return Err(Error::InvalidOption(format!(
                "invalid artifact request id: {request_id:?}"
            )));
        }

        std::fs::create_dir_all(&self.root)?;
        let dir = self.root.join(request_id);
        std::fs::create_dir(&dir)?;
        self.live.fetch_add(1, Ordering::SeqCst);

        debug!(path = %dir.display(), request_id, "artifact acquired");

        Ok(AudioArtifact {
            dir,
            audio_path: None,
            created_at: SystemTime::now(),
            request_id: request_id.to_string(),
            live: Arc::clone(&self.live),
        })
    }

    /// Remove every entry under the root older than the retention window.
    pub fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(SystemTime::now())
    }

    /// Like [`sweep`](Self::sweep), measuring ages against `now`.
    pub fn sweep_at(&self, now: SystemTime) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            // Entries can vanish underneath us when a request finishes mid-sweep.
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            let Ok(meta) = entry.metadata() else { continue };
            let Ok(modified) = meta.modified() else { continue };

            let age = now.duration_since(modified).unwrap_or_default();
            if age <= self.retention {
                report.kept += 1;
                continue;
            }

            let removed = if meta.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };

            match removed {
                Ok(()) => {
                    info!(
                        path = %path.display(),
                        age_secs = age.as_secs(),
                        "removed stale artifact"
                    );
                    report.removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove stale artifact");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Run [`sweep`](Self::sweep) every `interval` on a background task.
    ///
    /// The first pass runs immediately. Abort the returned handle to stop.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let pass = Arc::clone(&manager);
                match tokio::task::spawn_blocking(move || pass.sweep()).await {
                    Ok(Ok(report)) if report.removed > 0 || report.failed > 0 => {
                        info!(
                            removed = report.removed,
                            failed = report.failed,
                            kept = report.kept,
                            "artifact sweep finished"
                        );
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "artifact sweep failed"),
                    Err(e) => warn!(error = %e, "artifact sweep task panicked"),
                }
            }
        })
    }
}

/// A per-request directory holding one downloaded audio file.
///
/// Dropping the artifact deletes the directory and everything in it.
#[derive(Debug)]
pub struct AudioArtifact {
    dir: PathBuf,
    audio_path: Option<PathBuf>,
    created_at: SystemTime,
    request_id: String,
    live: Arc<AtomicUsize>,
}

impl AudioArtifact {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The audio file, once the extractor has written it.
    pub fn audio_path(&self) -> Option<&Path> {
        self.audio_path.as_deref()
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub(crate) fn set_audio_path(&mut self, path: PathBuf) {
        self.audio_path = Some(path);
    }
}

impl Drop for AudioArtifact {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(path = %self.dir.display(), "artifact removed"),
            // Already swept.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.dir.display(), error = %e, "failed to clean up artifact");
            }
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(root: &Path) -> ArtifactManager {
        ArtifactManager::new(root.join("artifacts"), DEFAULT_RETENTION)
    }

    #[test]
    fn test_request_ids_are_unique() {
        let id = VideoId::parse("dQw4w9WgXcQ").unwrap();
        let a = request_id(&id);
        let b = request_id(&id);
        assert_ne!(a, b);
        assert!(a.starts_with("dQw4w9WgXcQ-"));
    }

    #[test]
    fn test_acquire_creates_and_drop_removes() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path());

        let artifact = manager.acquire("req-1").unwrap();
        let dir = artifact.dir().to_path_buf();
        std::fs::write(dir.join("audio.wav"), b"RIFF").unwrap();
        assert!(dir.is_dir());
        assert_eq!(manager.live_count(), 1);
        assert_eq!(artifact.request_id(), "req-1");

        drop(artifact);
        assert!(!dir.exists());
        assert_eq!(manager.live_count(), 0);
    }

    #[test]
    fn test_acquire_rejects_duplicate_request() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path());

        let _first = manager.acquire("req-1").unwrap();
        assert!(manager.acquire("req-1").is_err());
        assert_eq!(manager.live_count(), 1);
    }

    #[test]
    fn test_acquire_rejects_path_like_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path());

        for bad in ["", ".", "..", "../escape", "a/b"] {
            assert!(
                matches!(manager.acquire(bad), Err(Error::InvalidOption(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_drop_after_sweep_is_quiet() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path());

        let artifact = manager.acquire("req-1").unwrap();
        std::fs::remove_dir_all(artifact.dir()).unwrap();
        drop(artifact);
        assert_eq!(manager.live_count(), 0);
    }

    #[test]
    fn test_sweep_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path());
        assert_eq!(manager.sweep().unwrap(), SweepReport::default());
    }

    #[test]
    fn test_sweep_keeps_fresh_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path());
        let artifact = manager.acquire("fresh").unwrap();

        let report = manager.sweep().unwrap();
        assert_eq!(report.removed, 0);
        assert_eq!(report.kept, 1);
        assert!(artifact.dir().exists());
    }

    #[test]
    fn test_sweep_removes_stale_files_and_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path());
        std::fs::create_dir_all(manager.root().join("orphan")).unwrap();
        std::fs::write(manager.root().join("orphan").join("a.wav"), b"x").unwrap();
        std::fs::write(manager.root().join("loose.mp4"), b"x").unwrap();

        let later = SystemTime::now() + DEFAULT_RETENTION + Duration::from_secs(60);
        let report = manager.sweep_at(later).unwrap();

        assert_eq!(report.removed, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(std::fs::read_dir(manager.root()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_sweeper_task_runs_first_pass() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = Arc::new(ArtifactManager::new(
            tmp.path().join("artifacts"),
            Duration::from_millis(10),
        ));
        std::fs::create_dir_all(manager.root()).unwrap();
        std::fs::write(manager.root().join("old.wav"), b"x").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let handle = manager.spawn_sweeper(Duration::from_secs(3600));
        for _ in 0..50 {
            if !manager.root().join("old.wav").exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.abort();

        assert!(!manager.root().join("old.wav").exists());
    }
}
