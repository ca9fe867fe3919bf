//! Async runtime shim for `async fn` test bodies.
//!
//! Each forked child builds its own runtime; tests never share one.

use std::future::Future;

/// Run an async test body to completion on a fresh tokio runtime.
pub fn block_on<F: Future>(future: F) -> crate::Result<F::Output> {
    Ok(tokio::runtime::Runtime::new()?.block_on(future))
}
