//! Shared types, error handling, and lifecycle contracts for the Epicenter
//! workspace runtime.
//!
//! This crate contains the foundational pieces shared between the document
//! layer and all provider implementations. Extracting these into a separate
//! crate allows provider crates to compile in parallel with the workspace
//! runtime.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod clock;
pub mod error;
pub mod lifecycle;
pub mod prelude;
pub mod types;
pub mod utils;
pub mod validate;

// vim: ts=4
