//! The verifier: a meta-test for the forking machinery.
//!
//! Two sequential, blocking checks:
//!
//! 1. `cargo test --workspace` with inherited streams must pass. Its
//!    failure is the dominant signal and is propagated immediately with the
//!    same exit code.
//! 2. `cargo test --workspace -- --ignored` with its output discarded must
//!    *fail* - the ignored tests fail on purpose. An ignored suite that
//!    "passes" means forked children stopped reporting failures, which is
//!    exactly the breakage this tool exists to catch.
//!
//! ## I/O Boundaries
//!
//! The two cargo invocations sit behind the `SuiteRunner` trait so the
//! decision logic can be exercised in tests without spawning cargo.

use std::io;
use std::process::{Command, ExitStatus, Stdio};

use tracing::debug;

use super::{CliError, CliResult, ExitCode};

const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

/// Outcome of one suite invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuiteStatus {
    Passed,
    /// Failed with the given exit code.
    Failed(i32),
}

impl From<ExitStatus> for SuiteStatus {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            SuiteStatus::Passed
        } else {
            SuiteStatus::Failed(status.code().unwrap_or(1))
        }
    }
}

/// I/O boundary for the two suite invocations.
pub trait SuiteRunner {
    /// Run every non-ignored test in the workspace, streams inherited so
    /// failures stay visible to the caller.
    fn run_default_suite(&self) -> io::Result<SuiteStatus>;

    /// Run only the ignored tests with stdout and stderr discarded: they
    /// fail by design, and their noise would drown the report.
    fn run_ignored_suite(&self) -> io::Result<SuiteStatus>;
}

/// The real cargo invocations used by the shipped binary.
pub struct CargoSuites;

impl SuiteRunner for CargoSuites {
    fn run_default_suite(&self) -> io::Result<SuiteStatus> {
        Ok(Command::new("cargo").args(["test", "--workspace"]).status()?.into())
    }

    fn run_ignored_suite(&self) -> io::Result<SuiteStatus> {
        Ok(Command::new("cargo")
            .args(["test", "--workspace", "--", "--ignored"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?
            .into())
    }
}

/// Run both checks in order. Healthy outcome: the default suite passes, the
/// ignored suite fails, nothing is printed.
pub fn run_verify(suites: &dyn SuiteRunner) -> CliResult<ExitCode> {
    debug!("running the workspace test suite");
    match suites
        .run_default_suite()
        .map_err(|e| CliError::failure(format!("failed to launch the workspace test suite: {e}")))?
    {
        SuiteStatus::Failed(code) => {
            // cargo already streamed the failures to the caller
            return Err(CliError::with_code("", code));
        }
        SuiteStatus::Passed => {}
    }

    debug!("running the ignored tests, expecting them to fail");
    match suites
        .run_ignored_suite()
        .map_err(|e| CliError::failure(format!("failed to launch the ignored test suite: {e}")))?
    {
        SuiteStatus::Failed(_) => Ok(ExitCode::SUCCESS),
        SuiteStatus::Passed => {
            for line in anomaly_report() {
                println!("{line}");
            }
            Err(CliError::new("", ExitCode::FAILURE))
        }
    }
}

/// The two diagnostic lines for the anomalous outcome: the deliberately
/// failing ignored tests did not fail.
fn anomaly_report() -> [String; 2] {
    [
        format!("{RED}ERROR: {RESET}ignored tests failed to fail; forked test processes are not reporting failures"),
        format!("{CYAN}HINT: {RESET}run `cargo test --workspace -- --ignored` to see what actually happened"),
    ]
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Scripted {
        default: SuiteStatus,
        ignored: SuiteStatus,
        ignored_ran: Cell<bool>,
    }

    impl Scripted {
        fn new(default: SuiteStatus, ignored: SuiteStatus) -> Self {
            Self {
                default,
                ignored,
                ignored_ran: Cell::new(false),
            }
        }
    }

    impl SuiteRunner for Scripted {
        fn run_default_suite(&self) -> io::Result<SuiteStatus> {
            Ok(self.default)
        }

        fn run_ignored_suite(&self) -> io::Result<SuiteStatus> {
            self.ignored_ran.set(true);
            Ok(self.ignored)
        }
    }

    struct NoCargo;

    impl SuiteRunner for NoCargo {
        fn run_default_suite(&self) -> io::Result<SuiteStatus> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no cargo on PATH"))
        }

        fn run_ignored_suite(&self) -> io::Result<SuiteStatus> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no cargo on PATH"))
        }
    }

    #[test]
    fn default_suite_failure_propagates_the_same_exit_code() {
        let suites = Scripted::new(SuiteStatus::Failed(101), SuiteStatus::Failed(1));
        let err = run_verify(&suites).unwrap_err();
        assert_eq!(err.exit_code, ExitCode(101));
        assert!(err.message.is_empty());
        // the second command must not run once the first has failed
        assert!(!suites.ignored_ran.get());
    }

    #[test]
    fn healthy_run_exits_zero() {
        let suites = Scripted::new(SuiteStatus::Passed, SuiteStatus::Failed(101));
        let code = run_verify(&suites).unwrap();
        assert_eq!(code, ExitCode::SUCCESS);
        assert!(suites.ignored_ran.get());
    }

    #[test]
    fn ignored_suite_that_passes_exits_one() {
        let suites = Scripted::new(SuiteStatus::Passed, SuiteStatus::Passed);
        let err = run_verify(&suites).unwrap_err();
        assert_eq!(err.exit_code, ExitCode::FAILURE);
        assert!(err.message.is_empty());
    }

    #[test]
    fn launch_failure_surfaces_as_a_cli_error() {
        let err = run_verify(&NoCargo).unwrap_err();
        assert_eq!(err.exit_code, ExitCode::FAILURE);
        assert!(err.message.contains("failed to launch"));
    }

    #[test]
    fn anomaly_lines_carry_the_expected_prefixes() {
        let [error, hint] = anomaly_report();
        assert!(error.starts_with(RED));
        assert!(error.contains("ERROR: "));
        assert!(hint.starts_with(CYAN));
        assert!(hint.contains("HINT: "));
    }

    #[test]
    fn anomaly_report_text() {
        let uncolored = |line: &String| line.replace(RED, "").replace(CYAN, "").replace(RESET, "");
        let report = anomaly_report().iter().map(uncolored).collect::<Vec<_>>().join("\n");
        insta::assert_snapshot!(report, @r"
        ERROR: ignored tests failed to fail; forked test processes are not reporting failures
        HINT: run `cargo test --workspace -- --ignored` to see what actually happened
        ");
    }
}
