//! Core types for the AION strategy marketplace.
//!
//! This crate defines the data model shared by the marketplace, the sandbox
//! runtime and the kernel: strategy packages, registry descriptors,
//! configuration and the error taxonomy. It contains no business logic.

pub mod config;
pub mod error;
pub mod package;
