//! Cooperative cancellation.
//!
//! A [`Terminator`] is a cheaply cloneable atomic flag handed to every
//! solver and generator thread; threads query it between decisions and
//! return promptly once it is set. The process-wide instance is flipped by
//! the signal handler installed in `main`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct Terminator {
    flag: Arc<AtomicBool>,
}

impl Terminator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Install a shutdown handler that listens for SIGTERM and SIGINT and
/// forwards them to the process-wide terminator.
///
/// Returns a `CancellationToken` the main loop selects on; all subsystems
/// observing the terminator drain gracefully.
pub fn install_shutdown_handler(terminator: Terminator) -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }

        terminator.set();
        token_clone.cancel();
    });

    token
}
