//! Single-fire shutdown with a bounded cleanup deadline.
//!
//! Every shutdown source (fault, normal exit, SIGINT, SIGTERM) goes through a
//! cloneable [`ShutdownHandle`]. The first trigger wins; later ones are logged
//! and ignored. [`ShutdownOrchestrator::run`] then races the cleanup action
//! against the deadline:
//!
//! ```text
//! Armed ──trigger──► CleaningUp ──┬─ cleanup Ok  ──► Succeeded (exit 0)
//!                                 ├─ deadline    ──► TimedOut  (exit 2)
//!                                 └─ cleanup Err ──► Failed    (exit 1)
//! ```
//!
//! On timeout the cleanup task is detached, not aborted. The caller is
//! expected to exit the process right after `run` returns.

use std::backtrace::Backtrace;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use mm_core::error::MmError;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::gateway::OrderBroker;

// ---------------------------------------------------------------------------
// Triggers, states, reports
// ---------------------------------------------------------------------------

/// Why shutdown started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Uncaught panic anywhere in the process.
    Fault {
        message: String,
        backtrace: Option<String>,
    },
    /// Normal termination of the main loop.
    Exit,
    /// SIGINT / ctrl-c.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Fault { message, .. } => write!(f, "fault: {message}"),
            Trigger::Exit => write!(f, "exit"),
            Trigger::Interrupt => write!(f, "SIGINT"),
            Trigger::Terminate => write!(f, "SIGTERM"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Armed,
    CleaningUp,
    Succeeded,
    TimedOut,
    Failed,
}

impl fmt::Display for ShutdownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownState::Armed => write!(f, "armed"),
            ShutdownState::CleaningUp => write!(f, "cleaning_up"),
            ShutdownState::Succeeded => write!(f, "succeeded"),
            ShutdownState::TimedOut => write!(f, "timed_out"),
            ShutdownState::Failed => write!(f, "failed"),
        }
    }
}

/// What the cleanup action achieved before the orchestrator stopped waiting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupOutcome {
    pub completed: bool,
    /// Orders cancelled. Zero when the deadline won.
    pub items_processed: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub trigger: Trigger,
    pub state: ShutdownState,
    pub outcome: CleanupOutcome,
    /// Time from trigger to decision.
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self.state {
            ShutdownState::Succeeded => 0,
            ShutdownState::TimedOut => 2,
            ShutdownState::Failed | ShutdownState::Armed | ShutdownState::CleaningUp => 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Cleanup action
// ---------------------------------------------------------------------------

/// The work performed once shutdown is triggered.
#[async_trait]
pub trait CleanupAction: Send + Sync {
    /// Returns the number of items processed.
    async fn run(&self) -> Result<usize, MmError>;
}

/// Cancel every open order through the broker.
pub struct CancelOpenOrders(pub Arc<dyn OrderBroker>);

#[async_trait]
impl CleanupAction for CancelOpenOrders {
    async fn run(&self) -> Result<usize, MmError> {
        self.0.cancel_open_orders().await
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable trigger. Only the first call to [`trigger`](Self::trigger)
/// across all clones has any effect.
#[derive(Clone)]
pub struct ShutdownHandle {
    fired: Arc<AtomicBool>,
    tx: Arc<Mutex<Option<oneshot::Sender<Trigger>>>>,
}

impl ShutdownHandle {
    /// Start shutdown. Returns `false` if shutdown was already triggered.
    pub fn trigger(&self, trigger: Trigger) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            warn!("[shutdown] already triggered, ignoring {trigger}");
            return false;
        }

        match &trigger {
            Trigger::Fault { message, backtrace } => {
                error!("[shutdown] unhandled fault: {message}");
                if let Some(bt) = backtrace {
                    error!("[shutdown] backtrace:\n{bt}");
                }
            }
            other => info!("[shutdown] triggered by {other}"),
        }

        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(tx) = tx {
            // The orchestrator may already be gone.
            let _ = tx.send(trigger);
        }
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct ShutdownOrchestrator {
    handle: ShutdownHandle,
    trigger_rx: oneshot::Receiver<Trigger>,
    cleanup: Arc<dyn CleanupAction>,
    deadline: Duration,
    state: watch::Sender<ShutdownState>,
}

impl ShutdownOrchestrator {
    pub fn new(cleanup: Arc<dyn CleanupAction>, deadline: Duration) -> Self {
        let (tx, trigger_rx) = oneshot::channel();
        let (state, _) = watch::channel(ShutdownState::Armed);
        Self {
            handle: ShutdownHandle {
                fired: Arc::new(AtomicBool::new(false)),
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            trigger_rx,
            cleanup,
            deadline,
            state,
        }
    }

    pub fn handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    /// Wait for the first trigger, run the cleanup against the deadline and
    /// report the outcome. If every handle is dropped without firing, the
    /// trigger is [`Trigger::Exit`].
    pub async fn run(self) -> ShutdownReport {
        let Self {
            handle,
            trigger_rx,
            cleanup,
            deadline,
            state,
        } = self;
        drop(handle);

        let trigger = match trigger_rx.await {
            Ok(trigger) => trigger,
            Err(_) => {
                info!("[shutdown] all handles dropped, treating as exit");
                Trigger::Exit
            }
        };

        let started = Instant::now();
        state.send_replace(ShutdownState::CleaningUp);
        info!("[shutdown] {trigger}: running cleanup with {deadline:?} deadline");

        let mut task = tokio::spawn(async move { cleanup.run().await });

        let (final_state, outcome) = tokio::select! {
            biased;
            joined = &mut task => match joined {
                Ok(Ok(items)) => (
                    ShutdownState::Succeeded,
                    CleanupOutcome {
                        completed: true,
                        items_processed: items,
                        error: None,
                    },
                ),
                Ok(Err(e)) => {
                    let e = MmError::Cleanup(e.to_string());
                    error!("[shutdown] {e}");
                    (
                        ShutdownState::Failed,
                        CleanupOutcome {
                            completed: false,
                            items_processed: 0,
                            error: Some(e.to_string()),
                        },
                    )
                }
                Err(join) => {
                    let e = MmError::Cleanup(format!("cleanup task did not finish: {join}"));
                    error!("[shutdown] {e}");
                    (
                        ShutdownState::Failed,
                        CleanupOutcome {
                            completed: false,
                            items_processed: 0,
                            error: Some(e.to_string()),
                        },
                    )
                }
            },
            _ = tokio::time::sleep(deadline) => {
                warn!("[shutdown] cleanup did not finish within {deadline:?}, giving up");
                (ShutdownState::TimedOut, CleanupOutcome::default())
            }
        };
        // Detached on timeout; dropping the JoinHandle does not abort it.
        drop(task);

        let elapsed = started.elapsed();
        state.send_replace(final_state);
        info!(
            "[shutdown] {final_state} after {elapsed:?} ({} item(s) processed)",
            outcome.items_processed
        );

        ShutdownReport {
            trigger,
            state: final_state,
            outcome,
            elapsed,
        }
    }
}

// ---------------------------------------------------------------------------
// Process-level trigger sources
// ---------------------------------------------------------------------------

/// Trigger on SIGINT (ctrl-c) and, on unix, SIGTERM. Must be called inside a
/// tokio runtime.
pub fn spawn_signal_listeners(handle: ShutdownHandle) {
    let on_interrupt = handle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                on_interrupt.trigger(Trigger::Interrupt);
            }
            Err(e) => error!("[shutdown] cannot listen for SIGINT: {e}"),
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::spawn(async move {
                    if term.recv().await.is_some() {
                        handle.trigger(Trigger::Terminate);
                    }
                });
            }
            Err(e) => error!("[shutdown] cannot listen for SIGTERM: {e}"),
        }
    }
    #[cfg(not(unix))]
    drop(handle);
}

/// Route every panic to a [`Trigger::Fault`] after the previous hook ran.
pub fn install_panic_hook(handle: ShutdownHandle) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        previous(info);
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        let message = match info.location() {
            Some(loc) => format!("{payload} at {}:{}", loc.file(), loc.line()),
            None => payload,
        };
        handle.trigger(Trigger::Fault {
            message,
            backtrace: Some(Backtrace::force_capture().to_string()),
        });
    }));
}
