//! Media manager.
//!
//! Bridges uploads and the processing pipeline: post-processing work is
//! wrapped as one-shot jobs on the processing worker pool, which in turn
//! dispatches into the bounded sandbox pool. The manager also owns the
//! scratch directory and prunes leftovers on a schedule.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, info};

use pelago_common::config::MediaConfig;
use pelago_common::AppResult;
use pelago_queue::{OneshotJob, TaskQueue};

use crate::ffmpeg;
use crate::sandbox::{SandboxPool, SandboxRuntime};

/// Default thumbnail bounds.
const THUMB_WIDTH: u32 = 512;
const THUMB_HEIGHT: u32 = 512;

/// Media manager over the active transcoder strategy.
pub struct MediaManager<R: SandboxRuntime> {
    pool: Arc<SandboxPool<R>>,
    processing: TaskQueue<OneshotJob>,
    work_dir: PathBuf,
    temp_retention: Duration,
}

impl<R: SandboxRuntime> MediaManager<R> {
    /// Create a manager dispatching into `pool` via `processing`, the
    /// processing pipeline's queue.
    #[must_use]
    pub fn new(
        pool: Arc<SandboxPool<R>>,
        processing: TaskQueue<OneshotJob>,
        config: &MediaConfig,
    ) -> Self {
        Self {
            pool,
            processing,
            work_dir: PathBuf::from(&config.work_dir),
            temp_retention: Duration::from_secs(config.temp_retention_hours * 3600),
        }
    }

    /// Scratch directory for in-flight transcodes.
    #[must_use]
    pub fn work_dir(&self) -> &PathBuf {
        &self.work_dir
    }

    /// Enqueue post-processing for a freshly stored upload: metadata is
    /// stripped in place, then a thumbnail is generated alongside.
    pub fn enqueue_postprocess(&self, media_id: String, path: PathBuf) {
        let pool = Arc::clone(&self.pool);
        let desc = format!("postprocess media {media_id}");

        self.processing.push(OneshotJob::new(desc, async move {
            ffmpeg::clear_metadata(&pool, &path).await?;
            let thumb = ffmpeg::generate_thumb(&pool, &path, THUMB_WIDTH, THUMB_HEIGHT).await?;
            debug!(media = %media_id, thumb = %thumb.display(), "Media post-processed");
            Ok(())
        }));
    }

    /// Remove scratch files older than the configured retention. Registered
    /// with the recurring scheduler as a cleaner job.
    pub async fn prune_work_dir(&self) -> AppResult<u64> {
        let cutoff = SystemTime::now()
            .checked_sub(self.temp_retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut pruned = 0u64;
        let mut entries = match tokio::fs::read_dir(&self.work_dir).await {
            Ok(entries) => entries,
            // A missing scratch directory means nothing to prune.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            if modified <= cutoff {
                tokio::fs::remove_file(entry.path()).await?;
                pruned += 1;
            }
        }

        if pruned > 0 {
            info!(pruned, dir = %self.work_dir.display(), "Pruned stale media scratch files");
        }
        Ok(pruned)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sandbox::{SandboxArgs, SandboxOutput};
    use async_trait::async_trait;
    use pelago_common::AppResult;

    struct AlwaysOkRuntime;

    #[async_trait]
    impl SandboxRuntime for AlwaysOkRuntime {
        type Instance = ();

        async fn instantiate(&self) -> AppResult<()> {
            Ok(())
        }

        async fn run(&self, _instance: &mut (), _args: SandboxArgs) -> AppResult<SandboxOutput> {
            Ok(SandboxOutput {
                exit_code: 0,
                stdout: Vec::new(),
                stderr: Vec::new(),
            })
        }
    }

    async fn test_manager(config: &MediaConfig) -> MediaManager<AlwaysOkRuntime> {
        let pool = Arc::new(SandboxPool::init(AlwaysOkRuntime, 1).await.unwrap());
        MediaManager::new(pool, TaskQueue::new(), config)
    }

    #[tokio::test]
    async fn test_enqueue_postprocess_pushes_job() {
        let config = MediaConfig::default();
        let manager = test_manager(&config).await;

        manager.enqueue_postprocess("01ARZ".to_string(), PathBuf::from("/tmp/01ARZ.mp4"));

        assert_eq!(manager.processing.len(), 1);
        let job = manager.processing.try_pop().unwrap();
        assert!(job.desc().contains("01ARZ"));
    }

    #[tokio::test]
    async fn test_prune_missing_dir_is_noop() {
        let config = MediaConfig {
            work_dir: "/nonexistent/pelago-test".to_string(),
            ..Default::default()
        };
        let manager = test_manager(&config).await;

        assert_eq!(manager.prune_work_dir().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_prune_removes_old_files() {
        let dir = std::env::temp_dir().join("pelago-prune-test");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("stale.mp4"), b"x").await.unwrap();

        let config = MediaConfig {
            work_dir: dir.to_string_lossy().into_owned(),
            // Zero retention: everything present counts as stale.
            temp_retention_hours: 0,
            ..Default::default()
        };
        let manager = test_manager(&config).await;

        assert_eq!(manager.prune_work_dir().await.unwrap(), 1);
        assert_eq!(manager.prune_work_dir().await.unwrap(), 0);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
