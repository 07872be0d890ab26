//! Wires configuration, trust store, marketplace and runtime together.
//!
//! [`AionKernel`] is the single context object the CLI (or any embedding
//! host) talks to. Nothing in AION is a process-wide global.

pub mod config;
pub mod error;
pub mod kernel;

pub use error::{KernelError, KernelResult};
pub use kernel::AionKernel;
