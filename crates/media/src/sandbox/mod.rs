//! Bounded pool of sandboxed execution units.

#[cfg(feature = "native-ffmpeg")]
mod native;
#[cfg(feature = "wasm-ffmpeg")]
mod wasm;

#[cfg(feature = "native-ffmpeg")]
pub use native::NativeRuntime;
#[cfg(feature = "wasm-ffmpeg")]
pub use wasm::WasmRuntime;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use pelago_common::config::MediaConfig;
use pelago_common::{AppError, AppResult, get_metrics};

/// Arguments for one sandboxed invocation.
///
/// `args` excludes the program name; each strategy supplies its own argv0.
#[derive(Debug, Default, Clone)]
pub struct SandboxArgs {
    /// CLI-style argument vector.
    pub args: Vec<String>,
    /// Bytes fed to standard input, if any.
    pub stdin: Option<Vec<u8>>,
    /// Environment variables visible inside the sandbox.
    pub env: Vec<(String, String)>,
    /// Host directory made visible inside the sandbox, if any.
    pub mount_dir: Option<PathBuf>,
    /// Whether the mounted directory is read-only.
    pub read_only_mount: bool,
}

/// Captured result of one sandboxed invocation.
#[derive(Debug)]
pub struct SandboxOutput {
    /// Process exit code.
    pub exit_code: u32,
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: Vec<u8>,
}

/// One execution strategy behind the pool.
///
/// Exactly two implementations exist: the in-process WASM sandbox and the
/// native subprocess fallback. The choice is a build-time cargo feature;
/// callers cannot tell which is active except via the differing isolation
/// guarantees.
#[async_trait]
pub trait SandboxRuntime: Send + Sync + 'static {
    /// A prepared execution unit, reusable across invocations.
    type Instance: Send + 'static;

    /// Prepare a fresh unit. Called eagerly once at pool init (to warm any
    /// compilation cache) and lazily whenever a closed unit is acquired.
    async fn instantiate(&self) -> AppResult<Self::Instance>;

    /// Execute one invocation on a unit.
    async fn run(&self, instance: &mut Self::Instance, args: SandboxArgs)
    -> AppResult<SandboxOutput>;
}

/// A unit slot. `None` means closed; the next acquisition re-instantiates.
struct Unit<I> {
    instance: Option<I>,
}

/// Fixed-capacity pool of sandboxed execution units.
///
/// The semaphore is the sole arbiter of concurrent sandbox usage; no other
/// code path may invoke a unit directly. Units are returned to the pool on
/// completion regardless of success; a unit whose run failed comes back
/// closed and is re-instantiated on its next acquisition.
pub struct SandboxPool<R: SandboxRuntime> {
    runtime: Arc<R>,
    units: Mutex<Vec<Unit<R::Instance>>>,
    slots: Semaphore,
    capacity: usize,
}

impl<R: SandboxRuntime> SandboxPool<R> {
    /// Initialize the pool: perform one eager instantiation to warm the
    /// runtime's caches, close it again, and fill the pool with `capacity`
    /// closed placeholder units.
    pub async fn init(runtime: R, capacity: usize) -> AppResult<Self> {
        if capacity == 0 {
            return Err(AppError::Config(
                "sandbox capacity must be at least 1".to_string(),
            ));
        }

        // Warm instantiation; dropped immediately, units start closed.
        let warm = runtime.instantiate().await?;
        drop(warm);

        let units = (0..capacity).map(|_| Unit { instance: None }).collect();

        debug!(capacity, "Initialized sandbox pool");
        Ok(Self {
            runtime: Arc::new(runtime),
            units: Mutex::new(units),
            slots: Semaphore::new(capacity),
            capacity,
        })
    }

    /// Number of units, fixed at init.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of units currently executing.
    pub fn busy(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    /// Acquire a unit (waiting until one is free), re-instantiating it if
    /// closed, run the invocation, and return the unit to the pool.
    ///
    /// # Errors
    ///
    /// Instantiation and execution failures surface to the caller; the unit
    /// is still returned to the pool and retried lazily on a future
    /// acquisition.
    pub async fn run(&self, args: SandboxArgs) -> AppResult<SandboxOutput> {
        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| AppError::Internal("sandbox pool closed".to_string()))?;

        // The permit guarantees a unit is available.
        let mut unit = self
            .units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or_else(|| AppError::Internal("sandbox pool unit missing".to_string()))?;

        let mut instance = match unit.instance.take() {
            Some(instance) => instance,
            None => match self.runtime.instantiate().await {
                Ok(instance) => instance,
                Err(e) => {
                    // Unit stays closed in the pool; a later acquisition
                    // retries the instantiation.
                    self.push_unit(unit);
                    get_metrics().record_sandbox_run(true);
                    return Err(e);
                }
            },
        };

        let result = self.runtime.run(&mut instance, args).await;

        match result {
            Ok(output) => {
                unit.instance = Some(instance);
                self.push_unit(unit);
                get_metrics().record_sandbox_run(false);
                Ok(output)
            }
            Err(e) => {
                // Tear the unit down; it re-instantiates on next use.
                warn!(error = %e, "Sandbox run failed, closing unit");
                self.push_unit(unit);
                get_metrics().record_sandbox_run(true);
                Err(e)
            }
        }
    }

    fn push_unit(&self, unit: Unit<R::Instance>) {
        self.units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(unit);
    }
}

// === Build-time strategy selection ===

/// The active ffmpeg execution strategy.
#[cfg(feature = "wasm-ffmpeg")]
pub type FfmpegRuntime = wasm::WasmRuntime;

/// The active ffmpeg execution strategy.
#[cfg(all(feature = "native-ffmpeg", not(feature = "wasm-ffmpeg")))]
pub type FfmpegRuntime = native::NativeRuntime;

#[cfg(not(any(feature = "wasm-ffmpeg", feature = "native-ffmpeg")))]
compile_error!("enable either the wasm-ffmpeg or native-ffmpeg feature");

/// The transcoder pool, over whichever strategy this build selected.
#[cfg(any(feature = "wasm-ffmpeg", feature = "native-ffmpeg"))]
pub type FfmpegPool = SandboxPool<FfmpegRuntime>;

/// Build the transcoder pool from configuration.
#[cfg(feature = "wasm-ffmpeg")]
pub async fn init_ffmpeg_pool(config: &MediaConfig) -> AppResult<FfmpegPool> {
    let runtime = wasm::WasmRuntime::from_file(&config.wasm_module_path).await?;
    SandboxPool::init(runtime, config.sandbox_capacity).await
}

/// Build the transcoder pool from configuration.
#[cfg(all(feature = "native-ffmpeg", not(feature = "wasm-ffmpeg")))]
pub async fn init_ffmpeg_pool(config: &MediaConfig) -> AppResult<FfmpegPool> {
    let runtime = native::NativeRuntime::new(&config.ffmpeg_binary);
    SandboxPool::init(runtime, config.sandbox_capacity).await
}
