//! Inverted tests: every `#[cupel(ignore)]` test below is *designed* to
//! fail, to prove that failures inside forked child processes still fail
//! the parent. `cargo test --workspace` skips them; `cupel-verify` runs
//! them with `cargo test --workspace -- --ignored` and demands a failing
//! exit status. If that run ever passes, the forking machinery is silently
//! swallowing failures.

use cupel::cupel;
use cupel::eyre::bail;
use std::process::Command;

#[cupel(ignore)]
fn panics_and_must_fail() {
    panic!()
}

#[cupel(ignore, should_panic)]
fn does_not_panic_and_must_fail() {}

#[cupel(ignore)]
fn errors_and_must_fail() {
    bail!("deliberate failure");
}

#[cupel(ignore, timeout = "2s")]
fn overruns_the_deadline_and_must_fail() {
    // Sleeps well past the deadline; the parent must kill it and fail.
    std::thread::sleep(std::time::Duration::from_secs(10));
}

/// Runs one of the ignored tests above through a real cargo invocation and
/// checks that its failure made it out of the forked child.
#[test]
fn forked_failures_reach_the_parent() {
    let output = Command::new("cargo")
        .args(["test", "--workspace", "--", "--ignored", "panics_and_must_fail"])
        .env_remove("NEXTEST_EXECUTION_MODE")
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(
        !output.status.success(),
        "a deliberately failing ignored test passed.\n\nOutput:\n{stdout}"
    );
    assert!(
        stdout.contains("panics_and_must_fail"),
        "expected the failing test in the report.\n\nOutput:\n{stdout}"
    );
}
