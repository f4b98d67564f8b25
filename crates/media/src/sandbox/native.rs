//! Native subprocess execution strategy.
//!
//! Fallback for deployments without WASM support: spawns the system ffmpeg
//! binary per invocation. The pool still bounds concurrency, but isolation
//! is whatever the operating system provides.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use pelago_common::{AppError, AppResult};

use super::{SandboxArgs, SandboxOutput, SandboxRuntime};

/// Subprocess execution strategy over a system binary.
pub struct NativeRuntime {
    binary: PathBuf,
}

impl NativeRuntime {
    /// Create a runtime spawning `binary`.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

/// A prepared native unit. The process itself is spawned per run; preparing
/// a unit just verifies the binary is still present.
pub struct NativeUnit;

#[async_trait]
impl SandboxRuntime for NativeRuntime {
    type Instance = NativeUnit;

    async fn instantiate(&self) -> AppResult<NativeUnit> {
        // Resolution through PATH is left to spawn; only verify explicit paths.
        if self.binary.components().count() > 1 {
            tokio::fs::metadata(&self.binary).await.map_err(|e| {
                AppError::Media(format!("ffmpeg binary {}: {e}", self.binary.display()))
            })?;
        }
        Ok(NativeUnit)
    }

    async fn run(&self, _instance: &mut NativeUnit, args: SandboxArgs) -> AppResult<SandboxOutput> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&args.args)
            .env_clear()
            .envs(args.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if args.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = args.mount_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::Media(format!("spawning {}: {e}", self.binary.display())))?;

        if let Some(stdin_bytes) = args.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(&stdin_bytes)
                    .await
                    .map_err(|e| AppError::Media(format!("writing stdin: {e}")))?;
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| AppError::Media(format!("waiting for {}: {e}", self.binary.display())))?;

        let exit_code = output
            .status
            .code()
            .map_or(u32::MAX, i32::unsigned_abs);

        Ok(SandboxOutput {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxPool;

    #[tokio::test]
    async fn test_missing_explicit_binary_fails_instantiation() {
        let runtime = NativeRuntime::new("/nonexistent/path/to/ffmpeg");

        assert!(runtime.instantiate().await.is_err());
    }

    #[tokio::test]
    async fn test_runs_system_binary() {
        // `true` exists on any host this test runs on.
        let runtime = NativeRuntime::new("true");
        let pool = SandboxPool::init(runtime, 1).await.unwrap();

        let output = pool.run(SandboxArgs::default()).await.unwrap();

        assert_eq!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn test_nonzero_exit_code_captured() {
        let runtime = NativeRuntime::new("false");
        let pool = SandboxPool::init(runtime, 1).await.unwrap();

        let output = pool.run(SandboxArgs::default()).await.unwrap();

        assert_eq!(output.exit_code, 1);
    }
}
