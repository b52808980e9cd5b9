//! The one process-wide stop signal.
//!
//! It starts clear and is raised exactly once, either by SIGINT/SIGTERM or by
//! a fatal capture failure. Workers poll it at the top of every loop
//! iteration; nothing is interrupted mid-write.

use log::{info, warn};
use parking_lot::{Condvar, Mutex};
use std::{
    future::{self, Future},
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// How often the async waiter re-checks the flag.
const ASYNC_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct Inner {
    raised: AtomicBool,
    reason: Mutex<Option<String>>,
    wakeup: Condvar,
}

/// A cloneable handle on the shared stop signal.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    /// A fresh, clear signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal. Only the first call has any effect; it returns
    /// `true` and its `reason` is kept.
    pub fn trigger(&self, reason: impl Into<String>) -> bool {
        let mut slot = self.inner.reason.lock();
        if self.inner.raised.swap(true, Ordering::SeqCst) {
            return false;
        }
        let reason = reason.into();
        info!("Shutdown requested: {reason}");
        *slot = Some(reason);
        self.inner.wakeup.notify_all();
        true
    }

    /// Whether the signal has been raised.
    pub fn is_triggered(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    /// Why the signal was raised, if it was.
    pub fn reason(&self) -> Option<String> {
        self.inner.reason.lock().clone()
    }

    /// Blocks the calling thread until the signal is raised.
    pub fn wait(&self) {
        let mut slot = self.inner.reason.lock();
        while !self.is_triggered() {
            self.inner.wakeup.wait(&mut slot);
        }
    }

    /// Blocks for at most `timeout`; returns whether the signal is raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut slot = self.inner.reason.lock();
        if !self.is_triggered() {
            self.inner.wakeup.wait_for(&mut slot, timeout);
        }
        self.is_triggered()
    }

    /// Resolves once the signal is raised.
    pub async fn triggered(&self) {
        while !self.is_triggered() {
            tokio::time::sleep(ASYNC_POLL).await;
        }
    }
}

/// Raises `shutdown` on ctrl-c, or on SIGTERM where that exists. Runs until
/// one of them arrives or the signal is raised some other way.
pub async fn listen_for_signals(shutdown: Shutdown) {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                Ok(())
            }
            Err(error) => Err(error),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<io::Result<()>>();

    raise_on_signals(shutdown, tokio::signal::ctrl_c(), terminate).await;
}

/// Raises `shutdown` when `interrupt` or `terminate` resolves. A listener
/// that fails to install is logged and the other one keeps running.
async fn raise_on_signals(
    shutdown: Shutdown,
    interrupt: impl Future<Output = io::Result<()>>,
    terminate: impl Future<Output = io::Result<()>>,
) {
    let interrupt = async {
        if let Err(error) = interrupt.await {
            warn!("Cannot listen for ctrl-c: {error}");
            future::pending::<()>().await;
        }
    };
    let terminate = async {
        if let Err(error) = terminate.await {
            warn!("Cannot listen for SIGTERM: {error}");
            future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = interrupt => {
            shutdown.trigger("interrupt received");
        }
        _ = terminate => {
            shutdown.trigger("terminate received");
        }
        _ = shutdown.triggered() => {}
    }
}
