//! Attribute macro for the cupel test framework.
//!
//! `#[cupel]` rewrites a test function so its body runs in a forked copy of
//! the test binary, inside a private scratch directory. See the `cupel`
//! crate for the runtime half (sandbox, failure relay, net helpers).

mod args;
mod expand;

use proc_macro::TokenStream;
use syn::{ItemFn, parse_macro_input};

use args::CupelArgs;

/// Marks a function as a fork-isolated test.
///
/// The body may use `?` freely; it runs inside a child process whose working
/// directory is a fresh scratch directory, and any failure is relayed back
/// to the parent as if it happened locally.
///
/// # Example
/// ```ignore
/// use cupel::cupel;
///
/// #[cupel(
///     include = ["Cargo.toml"],
///     env = [("ANSWER", "42")],
/// )]
/// fn reads_staged_files() {
///     assert_eq!(std::env::var("ANSWER")?, "42");
///     assert!(std::fs::metadata("Cargo.toml")?.is_file());
/// }
/// ```
///
/// Accepted settings: `include`, `env`, `setup`, `teardown`, `ignore`,
/// `should_panic`, `timeout`, `retries`, `cases`, `matrix`.
#[proc_macro_attribute]
pub fn cupel(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as CupelArgs);
    let func = parse_macro_input!(item as ItemFn);
    expand::expand(args, func)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
