//! Global Tokio runtime for background waveform work
//!
//! Lazily built on first use. Callers already inside a runtime keep using
//! their own; everything else (the CLI, audio callbacks) shares this one.

use std::future::Future;
use std::sync::OnceLock;
use tokio::runtime::{Handle, Runtime};

static TOKIO_RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Initialize the global Tokio runtime. Safe to call more than once.
pub fn init() -> &'static Runtime {
    TOKIO_RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("wavetile-worker")
            .enable_all()
            .build()
            .expect("Failed to create Tokio runtime")
    })
}

/// Handle of the runtime the caller is in, or of the global one
pub fn handle() -> Handle {
    Handle::try_current().unwrap_or_else(|_| init().handle().clone())
}

/// Run a future to completion on the global runtime from synchronous code
pub fn block_on<F: Future>(future: F) -> F::Output {
    init().block_on(future)
}
