//! WebAssembly isolation backend (`isolation: wasm`).
//!
//! Runs each call in a fresh sandboxed instance using wasmtime's core
//! `Module`/`Linker`/`Store` API against the WASI `preview1` surface
//! (`wasmtime_wasi::preview1::add_to_linker_sync`), not the component-model
//! `bindgen!` approach — the host-function surface here is a small fixed
//! POSIX-like shim (args, env, stdio, a preopened directory), which is
//! exactly what a WASI preview1 command module expects, not a WIT-defined
//! component interface. See DESIGN.md.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use wasmtime::{Config, Engine, Linker, Module, Store, Trap};
use wasmtime_wasi::pipe::MemoryOutputPipe;
use wasmtime_wasi::preview1::{self, I32Exit, WasiP1Ctx};
use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

use super::{cap_output, timeout_marker, ExecutionBackend, ExecutionRequest, ExecutionResult};
use crate::error::{Error, Result};

/// Capacity of the in-memory stdio pipes handed to a guest instance,
/// generous relative to any plausible `max_output_bytes` so truncation is
/// always decided by [`cap_output`], never by the pipe dropping bytes
/// first.
const PIPE_CAPACITY: usize = 16 * 1024 * 1024;

/// Grace period added on top of a call's own timeout before the outer
/// `tokio::time::timeout` gives up, so the epoch-interruption path (which
/// itself obeys the same budget) gets a chance to produce a clean
/// [`WasmExit::Interrupted`] result first.
const INTERRUPT_GRACE: Duration = Duration::from_millis(250);

/// Runs a tool's command as a WASI preview1 guest module.
pub struct WasmBackend {
    engine: Engine,
    modules: RwLock<HashMap<PathBuf, Arc<Module>>>,
    call_counter: AtomicU64,
}

impl WasmBackend {
    /// Build a backend with a fresh wasmtime engine configured for epoch
    /// interruption (a guest cannot be signalled the way a child process
    /// can, so timeouts are enforced cooperatively).
    #[must_use]
    pub fn new() -> Self {
        let mut config = Config::new();
        config.epoch_interruption(true);
        let engine = Engine::new(&config).expect("static wasmtime configuration is always valid");
        Self {
            engine,
            modules: RwLock::new(HashMap::new()),
            call_counter: AtomicU64::new(1),
        }
    }

    /// Fetch a compiled module from the cache, compiling and inserting it
    /// on a miss. Double-checked locking: the common case (already
    /// compiled) only ever takes a read lock.
    fn compiled_module(&self, path: &Path) -> Result<Arc<Module>> {
        if let Some(module) = self.modules.read().get(path) {
            return Ok(Arc::clone(module));
        }

        let mut modules = self.modules.write();
        if let Some(module) = modules.get(path) {
            return Ok(Arc::clone(module));
        }

        let module = Module::from_file(&self.engine, path).map_err(|e| {
            Error::ExecutionFailed(format!("compiling wasm module {}: {e}", path.display()))
        })?;
        let module = Arc::new(module);
        modules.insert(path.to_path_buf(), Arc::clone(&module));
        Ok(module)
    }
}

impl Default for WasmBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionBackend for WasmBackend {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let module_path = request
            .module_path
            .clone()
            .ok_or_else(|| Error::ExecutionFailed("no module_path configured".to_string()))?;
        let module = self.compiled_module(&module_path)?;
        let call_id = self.call_counter.fetch_add(1, Ordering::Relaxed);
        let guest_module_path = format!(
            "/.wasm/{}",
            module_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("module.wasm")
        );

        let engine = self.engine.clone();
        let timeout = request.timeout;
        let request_for_task = request.clone();
        let guest_path_for_task = guest_module_path.clone();

        let task = tokio::task::spawn_blocking(move || {
            run_instance(&engine, &module, &request_for_task, &guest_path_for_task, call_id)
        });

        let ticker_engine = self.engine.clone();
        let ticker = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            ticker_engine.increment_epoch();
        });

        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout + INTERRUPT_GRACE, task).await;
        ticker.abort();

        match outcome {
            Ok(Ok(Ok((stdout, stderr, WasmExit::Exited(exit_code))))) => Ok(ExecutionResult {
                stdout: cap_output(stdout, request.max_output_bytes),
                stderr: cap_output(stderr, request.max_output_bytes),
                exit_code,
                duration_ms: elapsed_ms(started),
                timed_out: false,
            }),
            Ok(Ok(Ok((stdout, mut stderr, WasmExit::Trapped(diagnostic))))) => {
                stderr.extend_from_slice(format!("[trap: {diagnostic}]").as_bytes());
                Ok(ExecutionResult {
                    stdout: cap_output(stdout, request.max_output_bytes),
                    stderr: cap_output(stderr, request.max_output_bytes),
                    exit_code: 1,
                    duration_ms: elapsed_ms(started),
                    timed_out: false,
                })
            }
            Ok(Ok(Ok((stdout, mut stderr, WasmExit::Interrupted)))) => {
                stderr.extend_from_slice(timeout_marker(timeout).as_bytes());
                Ok(ExecutionResult {
                    stdout: cap_output(stdout, request.max_output_bytes),
                    stderr: cap_output(stderr, request.max_output_bytes),
                    exit_code: -1,
                    duration_ms: elapsed_ms(started),
                    timed_out: true,
                })
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(join_err)) => Err(Error::ExecutionFailed(format!(
                "wasm instance task panicked: {join_err}"
            ))),
            Err(_elapsed) => Ok(ExecutionResult {
                stdout: Vec::new(),
                stderr: timeout_marker(timeout).into_bytes(),
                exit_code: -1,
                duration_ms: elapsed_ms(started),
                timed_out: true,
            }),
        }
    }
}

/// How a guest instance's `_start` call ended.
enum WasmExit {
    /// Normal exit, via fall-through return or an explicit `proc_exit`.
    Exited(i32),
    /// A genuine trap unrelated to the epoch deadline (e.g. an
    /// out-of-bounds memory access). Per §4.C.3 this is mapped to
    /// `exit_code = 1`, not a backend-internal failure.
    Trapped(String),
    /// The epoch deadline fired — the cooperative equivalent of a process
    /// timeout, since a guest cannot be signalled.
    Interrupted,
}

/// Rewrite a host-path-shaped argv or environment value to its guest-visible
/// form (§4.C.3): a value under the module's own directory becomes
/// `/.wasm/...`, a value under the jail root becomes the corresponding path
/// under the guest's `/` preopen. Values matching neither prefix (including
/// anything that isn't a path at all) pass through unchanged.
fn rewrite_guest_path(value: &str, jail_root: &Path, module_dir: Option<&Path>) -> String {
    let candidate = Path::new(value);

    if let Some(module_dir) = module_dir {
        if let Ok(rest) = candidate.strip_prefix(module_dir) {
            return format!("/.wasm/{}", rest.display());
        }
    }

    if let Ok(rest) = candidate.strip_prefix(jail_root) {
        return format!("/{}", rest.display());
    }

    value.to_string()
}

fn run_instance(
    engine: &Engine,
    module: &Module,
    request: &ExecutionRequest,
    guest_module_path: &str,
    call_id: u64,
) -> Result<(Vec<u8>, Vec<u8>, WasmExit)> {
    let mut linker: Linker<WasiP1Ctx> = Linker::new(engine);
    preview1::add_to_linker_sync(&mut linker, |ctx| ctx)
        .map_err(|e| Error::ExecutionFailed(format!("linking WASI host functions: {e}")))?;

    let stdout_pipe = MemoryOutputPipe::new(PIPE_CAPACITY);
    let stderr_pipe = MemoryOutputPipe::new(PIPE_CAPACITY);

    let module_dir = request.module_path.as_ref().and_then(|p| p.parent());
    let mut argv = vec![guest_module_path.to_string()];
    argv.extend(
        request
            .args
            .iter()
            .map(|a| rewrite_guest_path(a, &request.jail_root, module_dir)),
    );
    let envs: Vec<(String, String)> = request
        .env
        .iter()
        .map(|(k, v)| (k.clone(), rewrite_guest_path(v, &request.jail_root, module_dir)))
        .collect();

    let mut builder = WasiCtxBuilder::new();
    builder.args(&argv);
    builder.envs(&envs);
    builder.stdout(stdout_pipe.clone());
    builder.stderr(stderr_pipe.clone());
    builder
        .preopened_dir(&request.jail_root, "/", DirPerms::all(), FilePerms::all())
        .map_err(|e| Error::ExecutionFailed(format!("preopening jail root: {e}")))?;

    if let Some(module_dir) = request.module_path.as_ref().and_then(|p| p.parent()) {
        builder
            .preopened_dir(module_dir, "/.wasm", DirPerms::READ, FilePerms::READ)
            .map_err(|e| Error::ExecutionFailed(format!("preopening module dir: {e}")))?;
    }

    let wasi_ctx = builder.build_p1();
    let mut store = Store::new(engine, wasi_ctx);
    store.set_epoch_deadline(1);

    // A deterministic, unique name per call for diagnostics (§4.C.3); not
    // used by wasmtime itself, only surfaced in error messages below.
    let instance_name = format!("{guest_module_path}#{call_id}");

    let instance = linker
        .instantiate(&mut store, module)
        .map_err(|e| Error::ExecutionFailed(format!("instantiating {instance_name}: {e}")))?;

    let start = instance
        .get_typed_func::<(), ()>(&mut store, "_start")
        .map_err(|e| {
            Error::ExecutionFailed(format!("module {instance_name} has no _start export: {e}"))
        })?;

    let call_result = start.call(&mut store, ());

    let stdout = stdout_pipe.contents().to_vec();
    let stderr = stderr_pipe.contents().to_vec();

    let exit = match call_result {
        Ok(()) => WasmExit::Exited(0),
        Err(err) => {
            if let Some(exit) = err.downcast_ref::<I32Exit>() {
                WasmExit::Exited(exit.0)
            } else if matches!(err.downcast_ref::<Trap>(), Some(Trap::Interrupt)) {
                WasmExit::Interrupted
            } else {
                WasmExit::Trapped(err.to_string())
            }
        }
    };

    Ok((stdout, stderr, exit))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn request_without_module() -> ExecutionRequest {
        ExecutionRequest {
            command: None,
            args: vec![],
            cwd: PathBuf::from("/tmp"),
            jail_root: PathBuf::from("/tmp"),
            env: HashMap::new(),
            module_path: None,
            timeout: Duration::from_secs(5),
            max_output_bytes: 1024,
        }
    }

    #[tokio::test]
    async fn missing_module_path_is_an_execution_error() {
        let backend = WasmBackend::new();
        let err = backend.execute(request_without_module()).await.unwrap_err();
        assert_eq!(err.to_rpc_code(), crate::error::rpc_codes::EXECUTION_FAILED);
    }

    #[tokio::test]
    async fn missing_module_file_fails_to_compile() {
        let backend = WasmBackend::new();
        let mut request = request_without_module();
        request.module_path = Some(PathBuf::from("/nonexistent/module.wasm"));
        let err = backend.execute(request).await.unwrap_err();
        assert_eq!(err.to_rpc_code(), crate::error::rpc_codes::EXECUTION_FAILED);
    }

    #[test]
    fn module_cache_is_empty_on_construction() {
        let backend = WasmBackend::new();
        assert!(backend.modules.read().is_empty());
    }

    #[test]
    fn rewrites_path_under_module_dir_to_wasm_guest_form() {
        let module_dir = Path::new("/opt/modules");
        let jail_root = Path::new("/srv/jail");
        let rewritten = rewrite_guest_path("/opt/modules/data.json", jail_root, Some(module_dir));
        assert_eq!(rewritten, "/.wasm/data.json");
    }

    #[test]
    fn rewrites_path_under_jail_root_to_guest_root() {
        let jail_root = Path::new("/srv/jail");
        let rewritten = rewrite_guest_path("/srv/jail/input.txt", jail_root, None);
        assert_eq!(rewritten, "/input.txt");
    }

    #[test]
    fn leaves_unrelated_values_untouched() {
        let jail_root = Path::new("/srv/jail");
        let rewritten = rewrite_guest_path("--verbose", jail_root, None);
        assert_eq!(rewritten, "--verbose");
        let rewritten = rewrite_guest_path("/etc/passwd", jail_root, None);
        assert_eq!(rewritten, "/etc/passwd");
    }
}
