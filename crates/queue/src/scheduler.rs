//! Recurring job scheduler.
//!
//! One timing authority for all periodic maintenance work: cache sweeps,
//! poll-expiry dispatch, scheduled-status publication, permission
//! subscription refresh, and cleaner jobs. Jobs live in memory only and are
//! re-registered by the composition root at every process start.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use pelago_common::{AppResult, get_metrics};

/// Callback invoked at each firing with the firing time.
type JobFn = Arc<dyn Fn(DateTime<Utc>) -> BoxFuture<'static, AppResult<()>> + Send + Sync>;

struct Job {
    start: DateTime<Utc>,
    every: Duration,
    callback: JobFn,
    handle: Option<JoinHandle<()>>,
}

/// Scheduler for recurring jobs.
///
/// Each registered job runs on its own timing task. Different jobs fire
/// independently of each other, but a single job's successive firings never
/// overlap: a firing that comes due while the previous one is still running
/// is deferred until it completes.
pub struct Scheduler {
    jobs: Mutex<HashMap<String, Job>>,
    started: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Create a stopped scheduler with no jobs.
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            jobs: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// Register a recurring job.
    ///
    /// The first firing happens at the smallest `start + k * every` that is
    /// not in the past, so a zero or past `start` means "fire every `every`,
    /// phase-aligned to that anchor".
    ///
    /// Returns `false` without registering anything if `id` is already
    /// taken or `every` is zero. Callers treat a duplicate ID as fatal
    /// startup misconfiguration.
    pub fn add_recurring<F, Fut>(
        &self,
        id: &str,
        start: DateTime<Utc>,
        every: Duration,
        callback: F,
    ) -> bool
    where
        F: Fn(DateTime<Utc>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = AppResult<()>> + Send + 'static,
    {
        if every.is_zero() {
            return false;
        }

        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(id) {
            return false;
        }

        let callback: JobFn = Arc::new(move |fired_at| Box::pin(callback(fired_at)));
        let mut job = Job {
            start,
            every,
            callback,
            handle: None,
        };

        if self.started.load(Ordering::Acquire) {
            job.handle = Some(self.spawn_job(id.to_string(), &job));
        }

        jobs.insert(id.to_string(), job);
        true
    }

    /// Begin firing registered jobs. Jobs registered afterwards start
    /// firing immediately.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown_tx.send_replace(false);

        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let count = jobs.len();
        for (id, job) in jobs.iter_mut() {
            if job.handle.is_none() {
                job.handle = Some(self.spawn_job(id.clone(), job));
            }
        }

        info!(jobs = count, "Started scheduler");
    }

    /// Halt all future firings. In-flight firings are allowed to finish
    /// before this returns. Jobs stay registered.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
            jobs.iter_mut()
                .filter_map(|(id, job)| job.handle.take().map(|h| (id.clone(), h)))
                .collect()
        };
        for (id, handle) in handles {
            if handle.await.is_err() {
                error!(job = %id, "Scheduler job task panicked");
            }
        }

        info!("Stopped scheduler");
    }

    /// Number of registered jobs.
    pub fn len(&self) -> usize {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no jobs are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn spawn_job(&self, id: String, job: &Job) -> JoinHandle<()> {
        let callback = Arc::clone(&job.callback);
        let start = job.start;
        let every = job.every;
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(run_job(id, start, every, callback, shutdown_rx))
    }
}

/// Timing loop for one job.
async fn run_job(
    id: String,
    start: DateTime<Utc>,
    every: Duration,
    callback: JobFn,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut next = tokio::time::Instant::now() + initial_delay(start, every, Utc::now());

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            () = tokio::time::sleep_until(next) => {
                let fired_at = Utc::now();
                debug!(job = %id, "Firing recurring job");
                match (callback)(fired_at).await {
                    Ok(()) => get_metrics().record_scheduler_fire(true),
                    Err(e) => {
                        // The job stays registered and keeps its cadence.
                        error!(job = %id, error = %e, "Recurring job failed");
                        get_metrics().record_scheduler_fire(false);
                    }
                }
                // A firing that overran its period is followed immediately
                // by the deferred one; firings of this job never overlap.
                next += every;
            }
        }
    }

    debug!(job = %id, "Scheduler job loop exited");
}

/// Delay until the smallest `start + k * every` that is not in the past.
fn initial_delay(start: DateTime<Utc>, every: Duration, now: DateTime<Utc>) -> Duration {
    if start > now {
        return (start - now).to_std().unwrap_or_default();
    }

    let every_ms = i64::try_from(every.as_millis()).unwrap_or(i64::MAX).max(1);
    let elapsed_ms = (now - start).num_milliseconds();
    let rem = elapsed_ms % every_ms;
    if rem == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis((every_ms - rem).unsigned_abs())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_initial_delay_future_start() {
        let now = Utc::now();
        let start = now + chrono::Duration::seconds(90);

        let delay = initial_delay(start, Duration::from_secs(60), now);

        assert_eq!(delay.as_secs(), 90);
    }

    #[test]
    fn test_initial_delay_past_start_phase_aligned() {
        let now = Utc::now();
        let start = now - chrono::Duration::seconds(150);

        // Next multiple of 60s after 150s elapsed is 180s, i.e. 30s away.
        let delay = initial_delay(start, Duration::from_secs(60), now);

        assert_eq!(delay.as_secs(), 30);
    }

    #[test]
    fn test_initial_delay_aligned_now() {
        let now = Utc::now();
        let start = now - chrono::Duration::seconds(120);

        let delay = initial_delay(start, Duration::from_secs(60), now);

        assert_eq!(delay, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let scheduler = Scheduler::new();

        assert!(scheduler.add_recurring("@sweep", Utc::now(), Duration::from_secs(60), |_| {
            async { Ok(()) }
        }));
        assert!(!scheduler.add_recurring("@sweep", Utc::now(), Duration::from_secs(30), |_| {
            async { Ok(()) }
        }));
        assert_eq!(scheduler.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_frequency_rejected() {
        let scheduler = Scheduler::new();

        assert!(!scheduler.add_recurring("@never", Utc::now(), Duration::ZERO, |_| async {
            Ok(())
        }));
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_per_period() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&fired);
        scheduler.add_recurring("@sweep", Utc::now(), Duration::from_secs(60), move |_| {
            let f = Arc::clone(&f);
            async move {
                f.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        scheduler.start();

        // 61 simulated seconds: the anchor firing plus one period.
        tokio::time::sleep(Duration::from_secs(61)).await;

        let count = fired.load(Ordering::SeqCst);
        assert!((1..=2).contains(&count), "fired {count} times");

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_job_firings_never_overlap() {
        let scheduler = Scheduler::new();
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&concurrent);
        let m = Arc::clone(&max_seen);
        scheduler.add_recurring("@slow", Utc::now(), Duration::from_secs(10), move |_| {
            let c = Arc::clone(&c);
            let m = Arc::clone(&m);
            async move {
                let now = c.fetch_add(1, Ordering::SeqCst) + 1;
                m.fetch_max(now, Ordering::SeqCst);
                // Runs past the next scheduled firing.
                tokio::time::sleep(Duration::from_secs(25)).await;
                c.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(120)).await;
        scheduler.stop().await;

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_error_keeps_job_registered() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&fired);
        scheduler.add_recurring("@flaky", Utc::now(), Duration::from_secs(10), move |_| {
            let f = Arc::clone(&f);
            async move {
                f.fetch_add(1, Ordering::SeqCst);
                Err(pelago_common::AppError::Internal("boom".to_string()))
            }
        });
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(35)).await;
        scheduler.stop().await;

        assert!(fired.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_firing_after_stop() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&fired);
        scheduler.add_recurring("@sweep", Utc::now(), Duration::from_secs(10), move |_| {
            let f = Arc::clone(&f);
            async move {
                f.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(15)).await;
        scheduler.stop().await;
        let after_stop = fired.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(fired.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_added_after_start_fires() {
        let scheduler = Scheduler::new();
        scheduler.start();

        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        scheduler.add_recurring("@late", Utc::now(), Duration::from_secs(5), move |_| {
            let f = Arc::clone(&f);
            async move {
                f.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_secs(6)).await;
        scheduler.stop().await;

        assert!(fired.load(Ordering::SeqCst) >= 1);
    }
}
