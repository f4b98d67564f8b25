//! One-shot function jobs.

use futures::future::BoxFuture;

use pelago_common::AppResult;

/// A job wrapping a single async function, used by the dereference and
/// processing pipelines.
///
/// Unlike the serializable jobs, these carry arbitrary captured state and
/// are deliberately not persistable: a dereference or a media transcode
/// still pending at shutdown is simply re-derived on demand after restart.
pub struct OneshotJob {
    desc: String,
    task: BoxFuture<'static, AppResult<()>>,
}

impl OneshotJob {
    /// Wrap an async function as a queueable job. `desc` names the work for
    /// logs.
    pub fn new<Fut>(desc: impl Into<String>, task: Fut) -> Self
    where
        Fut: std::future::Future<Output = AppResult<()>> + Send + 'static,
    {
        Self {
            desc: desc.into(),
            task: Box::pin(task),
        }
    }

    /// What this job does, for logs.
    #[must_use]
    pub fn desc(&self) -> &str {
        &self.desc
    }

    /// Run the wrapped function to completion.
    pub async fn run(self) -> AppResult<()> {
        self.task.await
    }
}

impl std::fmt::Debug for OneshotJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneshotJob")
            .field("desc", &self.desc)
            .finish_non_exhaustive()
    }
}
