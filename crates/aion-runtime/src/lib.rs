//! Strategy execution for AION.
//!
//! - **sandbox**: the Wasmtime sandbox that strategy code runs in
//! - **runner**: re-verifies an installed strategy and drives the sandbox

pub mod runner;
pub mod sandbox;

pub use runner::StrategyRunner;
pub use sandbox::{ExecutionResult, SandboxError, WasmSandbox};
