//! Relaying failures out of forked test processes.
//!
//! The parent half of a forked test scrapes the child's libtest report and
//! re-raises the failure locally. Panicking with the raw report would bury
//! it under this module's own panic location, so relayed panics carry a
//! marker prefix and a replacement hook prints only the relayed detail.

use std::panic;
use std::sync::OnceLock;

const MARKER: &str = "CUPEL_RELAYED_FAILURE\n";

static HOOK: OnceLock<()> = OnceLock::new();

/// Install the relay-aware panic hook. Idempotent; panics without the
/// marker fall through to the previously installed hook.
pub fn install() {
    HOOK.get_or_init(|| {
        let default = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let payload = info
                .payload()
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| info.payload().downcast_ref::<String>().cloned())
                .unwrap_or_default();
            match payload.strip_prefix(MARKER) {
                Some(detail) => println!("{}", detail.trim()),
                None => default(info),
            }
        }));
    });
}

/// Re-raise a failure captured from a forked child. Never returns.
pub fn fail(detail: String) -> ! {
    install();
    panic!("{MARKER}{detail}");
}
