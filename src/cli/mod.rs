//! CLI for the `cupel-verify` binary.
//!
//! `cupel-verify` takes no flags and no subcommands: it runs the workspace
//! test suite, then proves that the deliberately failing ignored tests
//! still fail.
//!
//! ## Design
//!
//! Command functions return `CliResult<T>` instead of calling
//! `process::exit`. Only the top-level `run()` function handles errors and
//! exits.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod verify;

use std::fmt;
use std::process;

use clap::Parser;

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
}

/// Error type for CLI operations.
///
/// Contains a user-facing message and an exit code. The CLI entry point
/// catches these errors, prints the message, and exits with the code. An
/// empty message means everything worth saying has already been printed.
#[derive(Debug)]
pub struct CliError {
    /// User-facing error message (already formatted for display)
    pub message: String,
    /// Exit code to return to the shell
    pub exit_code: ExitCode,
}

impl CliError {
    /// Create a new CLI error with a message and exit code.
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    /// Create a failure error (exit code 1).
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::FAILURE)
    }

    /// Create an error with a custom exit code.
    pub fn with_code(message: impl Into<String>, code: i32) -> Self {
        Self::new(message, ExitCode(code))
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Verifier for the fork-isolation machinery
#[derive(Parser, Debug)]
#[command(name = "cupel-verify")]
#[command(version = VERSION)]
#[command(about = "Verify that forked test processes still report failures", long_about = None)]
pub struct Cli {}

// ============================================================================
// CLI entry point
// ============================================================================

/// Main CLI entry point.
///
/// This is the only place where `process::exit` is called. The verifier
/// itself returns `CliResult` and errors are handled here.
pub fn run() {
    let _cli = Cli::parse();

    match verify::run_verify(&verify::CargoSuites) {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_bare_invocation() {
        Cli::try_parse_from(["cupel-verify"]).unwrap();
    }

    #[test]
    fn test_cli_rejects_arguments() {
        assert!(Cli::try_parse_from(["cupel-verify", "--fast"]).is_err());
        assert!(Cli::try_parse_from(["cupel-verify", "subcommand"]).is_err());
    }

    #[test]
    fn test_cli_error_constructors() {
        assert_eq!(CliError::failure("boom").exit_code, ExitCode::FAILURE);
        assert_eq!(CliError::with_code("", 101).exit_code, ExitCode(101));
    }
}
