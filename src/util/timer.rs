use std::sync::OnceLock;
use std::time::Instant;

static START: OnceLock<Instant> = OnceLock::new();

/// Anchor the process-wide clock. Called once at startup; later calls are no-ops.
pub fn init() {
    let _ = START.get_or_init(Instant::now);
}

/// Seconds elapsed since `init` (or since the first call, whichever came first).
///
/// All scheduling timestamps (arrival, activation, limit checks) are expressed
/// on this clock so they are comparable across components of one process.
pub fn elapsed_seconds() -> f64 {
    START.get_or_init(Instant::now).elapsed().as_secs_f64()
}
