#![forbid(unsafe_code)]
//! Fork-isolated testing with private scratch directories.
//!
//! A `#[cupel]` test body runs in a forked copy of the test binary: the
//! child gets a fresh scratch directory as its working directory, failures
//! are relayed back to the parent as if they happened locally, and nothing
//! a test does to global state can leak into its siblings. The
//! `cupel-verify` binary double-checks the forking machinery itself against
//! a set of deliberately failing ignored tests.
//!
//! ## Panic Policy
//!
//! - **Production code**: `Result` + `?`; the `cli` module enforces
//!   `#![deny(clippy::unwrap_used)]`.
//! - **Generated test code and test modules**: unwrapping is acceptable.

pub mod cli;
pub mod net;
#[doc(hidden)]
pub mod relay;
#[cfg(feature = "tokio-runtime")]
pub mod rt;
pub mod sandbox;

pub use cupel_macro::cupel;
pub use eyre;
pub use pretty_assertions::{assert_eq, assert_ne, assert_str_eq};
pub use sandbox::Sandbox;

/// Catch-all result type for test bodies; any `std` error bubbles with `?`.
pub type Result<T> = std::result::Result<T, eyre::Report>;
