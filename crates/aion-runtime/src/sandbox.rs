//! WASM sandbox for strategy execution.
//!
//! Strategy code is a WebAssembly module in text format, compiled with
//! Wasmtime. There is no WASI and no ambient capability: the only import a
//! module may declare is `aion.log`. Anything else is rejected before
//! instantiation.
//!
//! # Guest ABI
//!
//! Strategy modules must export:
//! - `memory`: linear memory
//! - `alloc(size: i32) -> i32`: allocate `size` bytes, return pointer
//! - `execute(input_ptr: i32, input_len: i32) -> i64`: the entry point
//!
//! `execute` receives the JSON-encoded arguments `{"args": [...],
//! "kwargs": {...}}` and returns the packed output slot
//! `(result_ptr << 32) | result_len`, which must point at JSON bytes.
//!
//! # Host ABI
//!
//! - `aion.log(level: i32, msg_ptr: i32, msg_len: i32)`: forwarded to
//!   tracing (0 trace .. 4 error).

use aion_types::config::SandboxConfig;
use aion_types::package::StrategyArgs;
use tracing::debug;
use wasmtime::*;

/// Import module name for host functions.
pub const HOST_MODULE: &str = "aion";

/// The complete set of host imports a strategy may declare.
pub const ALLOWED_IMPORTS: &[(&str, &str)] = &[(HOST_MODULE, "log")];

/// Longest guest log message forwarded to tracing.
const MAX_LOG_BYTES: usize = 4096;

/// State carried in each WASM Store.
pub struct GuestState {
    /// Strategy being executed, for log attribution.
    pub strategy_id: String,
    limits: StoreLimits,
}

/// Result of executing a strategy module.
#[derive(Debug)]
pub struct ExecutionResult {
    /// JSON read from the guest's output slot.
    pub output: serde_json::Value,
    /// Number of fuel units consumed.
    pub fuel_consumed: u64,
}

/// Errors from sandbox operations.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("WASM compilation failed: {0}")]
    Compilation(String),
    #[error("Import not permitted: {0}")]
    ForbiddenImport(String),
    #[error("WASM instantiation failed: {0}")]
    Instantiation(String),
    #[error("WASM execution failed: {0}")]
    Execution(String),
    #[error("Fuel exhausted: strategy exceeded CPU budget")]
    FuelExhausted,
    #[error("Guest ABI violation: {0}")]
    AbiError(String),
}

/// The WASM sandbox engine.
///
/// Cheap to clone; the `Engine` is shared. Create once and reuse across
/// executions.
#[derive(Clone)]
pub struct WasmSandbox {
    engine: Engine,
    config: SandboxConfig,
}

impl WasmSandbox {
    /// Create a sandbox engine with fuel metering enabled.
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        let mut wasm_config = Config::new();
        wasm_config.consume_fuel(true);
        let engine =
            Engine::new(&wasm_config).map_err(|e| SandboxError::Compilation(e.to_string()))?;
        Ok(Self { engine, config })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Compile `code` and check it only imports allow-listed host functions.
    pub fn compile(&self, code: &str) -> Result<Module, SandboxError> {
        let module = Module::new(&self.engine, code.as_bytes())
            .map_err(|e| SandboxError::Compilation(e.to_string()))?;

        for import in module.imports() {
            let pair = (import.module(), import.name());
            if !ALLOWED_IMPORTS.contains(&pair) {
                return Err(SandboxError::ForbiddenImport(format!("{}.{}", pair.0, pair.1)));
            }
        }
        Ok(module)
    }

    /// Run a strategy to completion on the current thread.
    ///
    /// CPU-bound; async callers should move this onto a blocking thread.
    pub fn run(
        &self,
        strategy_id: &str,
        code: &str,
        input: &StrategyArgs,
    ) -> Result<ExecutionResult, SandboxError> {
        let module = self.compile(code)?;

        let limits = StoreLimitsBuilder::new()
            .memory_size(self.config.max_memory_bytes)
            .instances(1)
            .build();
        let mut store = Store::new(
            &self.engine,
            GuestState {
                strategy_id: strategy_id.to_string(),
                limits,
            },
        );
        store.limiter(|state| &mut state.limits);

        // 0 means unlimited, but metering is always on, so top the tank up.
        let fuel = match self.config.fuel_limit {
            0 => u64::MAX,
            n => n,
        };
        store
            .set_fuel(fuel)
            .map_err(|e| SandboxError::Execution(e.to_string()))?;

        let mut linker = Linker::new(&self.engine);
        Self::register_host_functions(&mut linker)?;

        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| SandboxError::Instantiation(e.to_string()))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| SandboxError::AbiError("Module must export 'memory'".into()))?;

        let alloc_fn = instance
            .get_typed_func::<i32, i32>(&mut store, "alloc")
            .map_err(|e| {
                SandboxError::AbiError(format!("Module must export 'alloc(i32)->i32': {e}"))
            })?;

        let execute_fn = instance
            .get_typed_func::<(i32, i32), i64>(&mut store, "execute")
            .map_err(|e| {
                SandboxError::AbiError(format!("Module must export 'execute(i32,i32)->i64': {e}"))
            })?;

        let input_bytes = serde_json::to_vec(input)
            .map_err(|e| SandboxError::Execution(format!("JSON serialize failed: {e}")))?;
        let input_len = i32::try_from(input_bytes.len())
            .map_err(|_| SandboxError::AbiError("Input too large".into()))?;

        let input_ptr = alloc_fn
            .call(&mut store, input_len)
            .map_err(|e| Self::classify_trap(e, "alloc"))?;

        let mem_data = memory.data_mut(&mut store);
        let start = input_ptr as u32 as usize;
        let end = start
            .checked_add(input_bytes.len())
            .filter(|end| *end <= mem_data.len())
            .ok_or_else(|| SandboxError::AbiError("Input exceeds memory bounds".into()))?;
        mem_data[start..end].copy_from_slice(&input_bytes);

        let packed = execute_fn
            .call(&mut store, (input_ptr, input_len))
            .map_err(|e| Self::classify_trap(e, "execute"))?;

        // High 32 bits = ptr, low 32 bits = len.
        let result_ptr = (packed as u64 >> 32) as usize;
        let result_len = (packed as u64 & 0xFFFF_FFFF) as usize;

        let mem_data = memory.data(&store);
        let output_bytes = result_ptr
            .checked_add(result_len)
            .filter(|end| *end <= mem_data.len())
            .map(|end| &mem_data[result_ptr..end])
            .ok_or_else(|| SandboxError::AbiError("Result pointer out of bounds".into()))?;

        let output: serde_json::Value = serde_json::from_slice(output_bytes)
            .map_err(|e| SandboxError::AbiError(format!("Invalid JSON output from guest: {e}")))?;

        let fuel_remaining = store.get_fuel().unwrap_or(0);
        let fuel_consumed = fuel.saturating_sub(fuel_remaining);

        debug!(strategy = strategy_id, fuel_consumed, "WASM execution complete");

        Ok(ExecutionResult {
            output,
            fuel_consumed,
        })
    }

    fn classify_trap(e: Error, stage: &str) -> SandboxError {
        if let Some(Trap::OutOfFuel) = e.downcast_ref::<Trap>() {
            return SandboxError::FuelExhausted;
        }
        SandboxError::Execution(format!("{stage}: {e}"))
    }

    /// Register the allow-listed host functions.
    fn register_host_functions(linker: &mut Linker<GuestState>) -> Result<(), SandboxError> {
        linker
            .func_wrap(
                HOST_MODULE,
                "log",
                |mut caller: Caller<'_, GuestState>,
                 level: i32,
                 msg_ptr: i32,
                 msg_len: i32|
                 -> Result<(), anyhow::Error> {
                    let memory = caller
                        .get_export("memory")
                        .and_then(|e| e.into_memory())
                        .ok_or_else(|| anyhow::anyhow!("no memory export"))?;

                    let data = memory.data(&caller);
                    let start = msg_ptr as u32 as usize;
                    let len = (msg_len as u32 as usize).min(MAX_LOG_BYTES);
                    let Some(bytes) = start
                        .checked_add(len)
                        .filter(|end| *end <= data.len())
                        .map(|end| &data[start..end])
                    else {
                        anyhow::bail!("log: pointer out of bounds");
                    };
                    let msg = String::from_utf8_lossy(bytes);
                    let strategy = &caller.data().strategy_id;

                    match level {
                        0 => tracing::trace!(strategy = %strategy, "[wasm] {msg}"),
                        1 => tracing::debug!(strategy = %strategy, "[wasm] {msg}"),
                        2 => tracing::info!(strategy = %strategy, "[wasm] {msg}"),
                        3 => tracing::warn!(strategy = %strategy, "[wasm] {msg}"),
                        _ => tracing::error!(strategy = %strategy, "[wasm] {msg}"),
                    }
                    Ok(())
                },
            )
            .map_err(|e| SandboxError::Compilation(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Returns its input unchanged.
    pub(crate) const ECHO_WAT: &str = r#"
        (module
            (memory (export "memory") 1)
            (global $bump (mut i32) (i32.const 1024))

            (func (export "alloc") (param $size i32) (result i32)
                (local $ptr i32)
                (local.set $ptr (global.get $bump))
                (global.set $bump (i32.add (global.get $bump) (local.get $size)))
                (local.get $ptr)
            )

            (func (export "execute") (param $ptr i32) (param $len i32) (result i64)
                (i64.or
                    (i64.shl
                        (i64.extend_i32_u (local.get $ptr))
                        (i64.const 32)
                    )
                    (i64.extend_i32_u (local.get $len))
                )
            )
        )
    "#;

    /// Ignores its input and answers with a fixed decision.
    pub(crate) const DECISION_WAT: &str = r##"
        (module
            (memory (export "memory") 1)
            (data (i32.const 0) "{\"action\":\"scale_down\"}")
            (func (export "alloc") (param i32) (result i32) (i32.const 1024))
            (func (export "execute") (param i32 i32) (result i64)
                (i64.const 23)
            )
        )
    "##;

    /// Logs through the host, then echoes.
    const LOGGING_WAT: &str = r#"
        (module
            (import "aion" "log" (func $log (param i32 i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "hello from guest")
            (func (export "alloc") (param i32) (result i32) (i32.const 1024))
            (func (export "execute") (param $ptr i32) (param $len i32) (result i64)
                (call $log (i32.const 2) (i32.const 0) (i32.const 16))
                (i64.or
                    (i64.shl (i64.extend_i32_u (local.get $ptr)) (i64.const 32))
                    (i64.extend_i32_u (local.get $len))
                )
            )
        )
    "#;

    const INFINITE_LOOP_WAT: &str = r#"
        (module
            (memory (export "memory") 1)
            (func (export "alloc") (param i32) (result i32) (i32.const 1024))
            (func (export "execute") (param i32 i32) (result i64)
                (loop $inf
                    (br $inf)
                )
                (i64.const 0)
            )
        )
    "#;

    pub(crate) const TRAP_WAT: &str = r#"
        (module
            (memory (export "memory") 1)
            (func (export "alloc") (param i32) (result i32) (i32.const 1024))
            (func (export "execute") (param i32 i32) (result i64)
                unreachable
            )
        )
    "#;

    const WASI_WAT: &str = r#"
        (module
            (import "wasi_snapshot_preview1" "fd_write"
                (func $fd_write (param i32 i32 i32 i32) (result i32)))
            (memory (export "memory") 1)
            (func (export "alloc") (param i32) (result i32) (i32.const 1024))
            (func (export "execute") (param i32 i32) (result i64) (i64.const 0))
        )
    "#;

    const NOT_JSON_WAT: &str = r#"
        (module
            (memory (export "memory") 1)
            (data (i32.const 0) "not json")
            (func (export "alloc") (param i32) (result i32) (i32.const 1024))
            (func (export "execute") (param i32 i32) (result i64) (i64.const 8))
        )
    "#;

    fn sandbox() -> WasmSandbox {
        WasmSandbox::new(SandboxConfig::default()).unwrap()
    }

    fn args() -> StrategyArgs {
        StrategyArgs::new()
            .arg(serde_json::json!({"cpu_load": 85}))
            .kwarg("mode", serde_json::json!("eco"))
    }

    #[test]
    fn test_echo_receives_args_and_kwargs() {
        let result = sandbox().run("echo", ECHO_WAT, &args()).unwrap();
        assert_eq!(
            result.output,
            serde_json::json!({"args": [{"cpu_load": 85}], "kwargs": {"mode": "eco"}})
        );
        assert!(result.fuel_consumed > 0);
    }

    #[test]
    fn test_fixed_output_slot() {
        let result = sandbox().run("decide", DECISION_WAT, &args()).unwrap();
        assert_eq!(result.output, serde_json::json!({"action": "scale_down"}));
    }

    #[test]
    fn test_log_import_allowed() {
        let result = sandbox().run("logger", LOGGING_WAT, &args()).unwrap();
        assert_eq!(result.output["kwargs"]["mode"], "eco");
    }

    #[test]
    fn test_fuel_exhaustion() {
        let sandbox = WasmSandbox::new(SandboxConfig {
            fuel_limit: 10_000,
            ..Default::default()
        })
        .unwrap();
        let err = sandbox
            .run("spin", INFINITE_LOOP_WAT, &StrategyArgs::new())
            .unwrap_err();
        assert!(
            matches!(err, SandboxError::FuelExhausted),
            "Expected FuelExhausted, got: {err}"
        );
    }

    #[test]
    fn test_trap_is_execution_error() {
        let err = sandbox().run("trap", TRAP_WAT, &args()).unwrap_err();
        assert!(matches!(err, SandboxError::Execution(_)));
    }

    #[test]
    fn test_wasi_import_forbidden() {
        let err = sandbox().run("wasi", WASI_WAT, &args()).unwrap_err();
        match err {
            SandboxError::ForbiddenImport(name) => {
                assert_eq!(name, "wasi_snapshot_preview1.fd_write")
            }
            other => panic!("expected ForbiddenImport, got {other}"),
        }
    }

    #[test]
    fn test_non_json_output_is_abi_error() {
        let err = sandbox().run("bad", NOT_JSON_WAT, &args()).unwrap_err();
        assert!(matches!(err, SandboxError::AbiError(_)));
    }

    #[test]
    fn test_missing_entry_point() {
        let err = sandbox()
            .run("empty", r#"(module (memory (export "memory") 1))"#, &args())
            .unwrap_err();
        assert!(matches!(err, SandboxError::AbiError(_)));
    }

    #[test]
    fn test_garbage_does_not_compile() {
        let err = sandbox().run("junk", "print('hi')", &args()).unwrap_err();
        assert!(matches!(err, SandboxError::Compilation(_)));
    }

    #[test]
    fn test_memory_ceiling_enforced() {
        let sandbox = WasmSandbox::new(SandboxConfig {
            max_memory_bytes: 64 * 1024,
            ..Default::default()
        })
        .unwrap();
        let big = r#"
            (module
                (memory (export "memory") 4)
                (func (export "alloc") (param i32) (result i32) (i32.const 0))
                (func (export "execute") (param i32 i32) (result i64) (i64.const 0))
            )
        "#;
        let err = sandbox.run("big", big, &args()).unwrap_err();
        assert!(matches!(err, SandboxError::Instantiation(_)));
    }
}
