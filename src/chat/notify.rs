// Audible cue for inbound messages: a terminal bell, the one side effect
// shared across conversation views. Strictly best-effort; a missing or
// closed terminal never surfaces as an error.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;

static MUTED: AtomicBool = AtomicBool::new(false);

pub fn set_muted(muted: bool) {
    MUTED.store(muted, Ordering::Relaxed);
}

pub fn message_cue() {
    if MUTED.load(Ordering::Relaxed) {
        return;
    }
    let mut out = std::io::stdout();
    if out.write_all(b"\x07").and_then(|_| out.flush()).is_err() {
        debug!("notification cue unavailable");
    }
}
