//! In-process WASM execution strategy.
//!
//! Runs ffmpeg compiled to WASI inside wasmtime. The module is compiled
//! once at startup; each pool unit holds a pre-instantiation of it, and
//! each invocation gets a fresh store, so no state leaks between inputs.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;
use wasmtime::{Engine, InstancePre, Linker, Module, Store};
use wasmtime_wasi::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::{DirPerms, FilePerms, I32Exit, WasiCtxBuilder};

use pelago_common::{AppError, AppResult};

use super::{SandboxArgs, SandboxOutput, SandboxRuntime};

/// Captured stdio is capped; ffprobe-style JSON output stays far below this.
const PIPE_CAPACITY: usize = 4 * 1024 * 1024;

/// WASM execution strategy over a compiled ffmpeg module.
pub struct WasmRuntime {
    engine: Engine,
    module: Module,
    linker: Linker<WasiP1Ctx>,
}

impl WasmRuntime {
    /// Compile the module at `path` into a reusable runtime.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();

        let mut config = wasmtime::Config::new();
        config.async_support(true);
        if config.cache_config_load_default().is_err() {
            debug!("No wasmtime compilation cache available");
        }

        let engine = Engine::new(&config)
            .map_err(|e| AppError::Media(format!("creating wasm engine: {e}")))?;

        let bytes = tokio::fs::read(path).await.map_err(|e| {
            AppError::Media(format!("reading wasm module {}: {e}", path.display()))
        })?;
        let module = Module::new(&engine, &bytes)
            .map_err(|e| AppError::Media(format!("compiling wasm module: {e}")))?;

        let mut linker = Linker::new(&engine);
        wasmtime_wasi::preview1::add_to_linker_async(&mut linker, |ctx| ctx)
            .map_err(|e| AppError::Media(format!("linking WASI: {e}")))?;

        Ok(Self {
            engine,
            module,
            linker,
        })
    }

    fn build_wasi(&self, args: &SandboxArgs) -> AppResult<(WasiP1Ctx, MemoryOutputPipe, MemoryOutputPipe)> {
        let stdout = MemoryOutputPipe::new(PIPE_CAPACITY);
        let stderr = MemoryOutputPipe::new(PIPE_CAPACITY);

        let mut builder = WasiCtxBuilder::new();

        let mut argv = Vec::with_capacity(args.args.len() + 1);
        argv.push("ffmpeg".to_string());
        argv.extend(args.args.iter().cloned());
        builder.args(&argv);

        for (key, value) in &args.env {
            builder.env(key, value);
        }

        builder.stdout(stdout.clone());
        builder.stderr(stderr.clone());
        if let Some(ref stdin) = args.stdin {
            builder.stdin(MemoryInputPipe::new(stdin.clone()));
        }

        if let Some(ref dir) = args.mount_dir {
            let dir_perms = if args.read_only_mount {
                DirPerms::READ
            } else {
                DirPerms::all()
            };
            let file_perms = if args.read_only_mount {
                FilePerms::READ
            } else {
                FilePerms::all()
            };
            let guest_path = dir.to_string_lossy();
            builder
                .preopened_dir(dir, guest_path.as_ref(), dir_perms, file_perms)
                .map_err(|e| {
                    AppError::Media(format!("mounting {} in sandbox: {e}", dir.display()))
                })?;
        }

        Ok((builder.build_p1(), stdout, stderr))
    }
}

#[async_trait]
impl SandboxRuntime for WasmRuntime {
    type Instance = InstancePre<WasiP1Ctx>;

    async fn instantiate(&self) -> AppResult<InstancePre<WasiP1Ctx>> {
        self.linker
            .instantiate_pre(&self.module)
            .map_err(|e| AppError::Media(format!("pre-instantiating wasm module: {e}")))
    }

    async fn run(
        &self,
        instance: &mut InstancePre<WasiP1Ctx>,
        args: SandboxArgs,
    ) -> AppResult<SandboxOutput> {
        let (wasi, stdout, stderr) = self.build_wasi(&args)?;
        let mut store = Store::new(&self.engine, wasi);

        let instantiated = instance
            .instantiate_async(&mut store)
            .await
            .map_err(|e| AppError::Media(format!("instantiating wasm module: {e}")))?;
        let start = instantiated
            .get_typed_func::<(), ()>(&mut store, "_start")
            .map_err(|e| AppError::Media(format!("module has no _start: {e}")))?;

        let exit_code = match start.call_async(&mut store, ()).await {
            Ok(()) => 0,
            Err(trap) => match trap.downcast::<I32Exit>() {
                Ok(I32Exit(code)) => code.unsigned_abs(),
                Err(trap) => {
                    return Err(AppError::Media(format!("wasm trap: {trap}")));
                }
            },
        };

        drop(store);
        Ok(SandboxOutput {
            exit_code,
            stdout: stdout.contents().to_vec(),
            stderr: stderr.contents().to_vec(),
        })
    }
}
