use std::future::Future;
use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

/// Process phases: `Starting -> Listening -> Draining -> Stopped`, or `Crashed`
/// from any phase before `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Listening,
    Draining,
    Stopped,
    Crashed,
}

impl Phase {
    /// Exit status for terminal phases.
    pub fn exit_code(self) -> Option<i32> {
        match self {
            Phase::Stopped => Some(0),
            Phase::Crashed => Some(1),
            _ => None,
        }
    }

    pub fn can_advance_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Starting, Phase::Listening)
                | (Phase::Listening, Phase::Draining)
                | (Phase::Draining, Phase::Stopped)
                | (Phase::Starting | Phase::Listening | Phase::Draining, Phase::Crashed)
        )
    }

    pub fn enter(self) {
        match self {
            Phase::Crashed => error!("Lifecycle: {}", self),
            _ => info!("Lifecycle: {}", self),
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Starting => write!(f, "starting"),
            Phase::Listening => write!(f, "listening"),
            Phase::Draining => write!(f, "draining"),
            Phase::Stopped => write!(f, "stopped"),
            Phase::Crashed => write!(f, "crashed"),
        }
    }
}

/// Current phase of the process, shared between `main` and the signal watcher.
#[derive(Debug)]
pub struct Lifecycle {
    phase: Mutex<Phase>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Phase::Starting.enter();
        Self {
            phase: Mutex::new(Phase::Starting),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to `next` if the transition is allowed. Returns whether it happened.
    pub fn advance(&self, next: Phase) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if !phase.can_advance_to(next) {
            warn!("Ignoring lifecycle transition {} -> {}", *phase, next);
            return false;
        }
        *phase = next;
        next.enter();
        true
    }
}

/// Resolves on SIGTERM or Ctrl-C and moves the process into draining.
pub async fn shutdown_signal(lifecycle: Arc<Lifecycle>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal = async {
        tokio::select! {
            _ = ctrl_c => "SIGINT",
            _ = terminate => "SIGTERM",
        }
    };

    drain_on(lifecycle, signal).await;
}

/// Wait for `signal` to yield the signal name, then enter `Draining`.
pub async fn drain_on<F>(lifecycle: Arc<Lifecycle>, signal: F)
where
    F: Future<Output = &'static str>,
{
    let name = signal.await;
    info!("{} received. Shutting down gracefully...", name);
    lifecycle.advance(Phase::Draining);
}

/// Route panic messages through tracing. Unwinding continues as usual, so
/// handler panics are still caught by the HTTP layer.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());
        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        error!("Uncaught panic at {}: {}", location, message);
    }));
}
