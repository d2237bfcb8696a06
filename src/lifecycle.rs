//! Lifecycle coordination
//!
//! The coordinator ties the applier and the supervisor into a single-shot
//! state machine:
//!
//! ```text
//! Idle -> Applying -> Running -> Cleaning -> Terminated
//!             \
//!              -> ApplyFailed -> Terminated
//! ```
//!
//! While `Running`, exactly two event sources race: the SIGINT/SIGTERM
//! watcher and the child-exit waiter. Both produce into a single-slot
//! channel via `try_send`; whichever arrives second finds the slot taken
//! (or the receiver already satisfied) and is only logged. The coordinator
//! consumes the first event and runs teardown exactly once, no matter how
//! close together the triggers fire.

use std::fmt;

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audit;
use crate::core::applier::RuleApplier;
use crate::core::error::{Error, Result};
use crate::core::params::RuleNaming;
use crate::core::ruleset::RuleSet;
use crate::engine::{FirewallEngine, RoutePolicyEngine};
use crate::supervisor::{ProxyCommand, ProxyExit, ProxyProcess};

/// Coordinator states. Single-shot: there is no pause/resume and no path
/// back out of `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum State {
    Idle,
    Applying,
    Running,
    ApplyFailed,
    Cleaning,
    Terminated,
}

/// The first (and only acted-upon) termination trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// An external SIGINT/SIGTERM requested a graceful stop
    Signal { name: &'static str },
    /// The proxy process exited on its own
    ProxyExit(ProxyExit),
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Signal { name } => write!(f, "{name}"),
            Termination::ProxyExit(exit) => write!(f, "proxy {exit}"),
        }
    }
}

/// Sends a termination event into the single-slot channel. A full slot
/// means another trigger already won the race; the loser is logged and
/// dropped, which is what guarantees at-most-once cleanup.
fn notify(tx: &mpsc::Sender<Termination>, event: Termination) {
    if tx.try_send(event).is_err() {
        debug!(%event, "termination already signalled; later trigger ignored");
    }
}

/// Spawns the external-signal watcher feeding the termination channel.
fn watch_signals(tx: mpsc::Sender<Termination>) -> Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())
        .map_err(|e| Error::Internal(format!("failed to install SIGINT handler: {e}")))?;
    let mut terminate = signal(SignalKind::terminate())
        .map_err(|e| Error::Internal(format!("failed to install SIGTERM handler: {e}")))?;

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        };
        notify(&tx, Termination::Signal { name });
    });

    Ok(())
}

pub struct Coordinator<F: FirewallEngine, R: RoutePolicyEngine> {
    applier: RuleApplier<F, R>,
    state: State,
}

impl<F: FirewallEngine, R: RoutePolicyEngine> Coordinator<F, R> {
    pub fn new(applier: RuleApplier<F, R>) -> Self {
        Self {
            applier,
            state: State::Idle,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    fn transition(&mut self, next: State) {
        debug!(from = %self.state, to = %next, "lifecycle transition");
        self.state = next;
    }

    /// Runs the full lifecycle: apply rules, start the proxy, wait for the
    /// first termination trigger, tear down, return the process exit code.
    ///
    /// # Errors
    ///
    /// Returns `Err` when rule application or the proxy start fails; in
    /// both cases teardown has already run and the host is clean.
    pub async fn run(&mut self, ruleset: &RuleSet, proxy: &ProxyCommand) -> Result<u8> {
        // Watchers first: installing them can only fail before any rule is
        // touched, and a signal arriving during Applying is then consumed
        // as an immediate graceful stop once Running is reached
        let (tx, rx) = mpsc::channel(1);
        watch_signals(tx.clone())?;

        self.transition(State::Applying);

        if let Err(e) = self.applier.apply(ruleset).await {
            audit::log_apply(&ruleset.naming.table, false, Some(e.to_string())).await;
            self.transition(State::ApplyFailed);
            self.transition(State::Terminated);
            return Err(e);
        }
        audit::log_apply(&ruleset.naming.table, true, None).await;

        let process = match ProxyProcess::start(proxy) {
            Ok(process) => process,
            Err(e) => {
                warn!(error = %e, "proxy start failed; rolling back rules");
                self.applier.teardown(&ruleset.naming).await;
                audit::log_proxy_start(&proxy.executable, None, Some(e.to_string())).await;
                self.transition(State::ApplyFailed);
                self.transition(State::Terminated);
                return Err(e);
            }
        };
        let pid = process.pid();
        audit::log_proxy_start(&proxy.executable, pid, None).await;

        let exit_tx = tx.clone();
        tokio::spawn(async move {
            let exit = process.wait().await;
            notify(&exit_tx, Termination::ProxyExit(exit));
        });
        drop(tx);

        self.transition(State::Running);
        info!("proxy running; interception active until it stops");

        Ok(self.settle(rx, pid, &ruleset.naming).await)
    }

    /// Consumes the first termination trigger, cleans up exactly once and
    /// reaches `Terminated`. Returns the manager's exit code.
    async fn settle(
        &mut self,
        mut rx: mpsc::Receiver<Termination>,
        pid: Option<u32>,
        naming: &RuleNaming,
    ) -> u8 {
        let event = match rx.recv().await {
            Some(event) => event,
            None => {
                // Both producers died without sending; treat as a crash
                warn!("termination channel closed without an event");
                Termination::ProxyExit(ProxyExit { code: Some(1) })
            }
        };

        info!(trigger = %event, "shutting down");
        self.transition(State::Cleaning);

        // The race's loser may land in the freed slot; observe and log only
        if let Ok(late) = rx.try_recv() {
            debug!(trigger = %late, "second termination trigger observed; no further action");
        }

        let code = match event {
            Termination::Signal { name } => {
                // A requested stop: ask the proxy to exit before the rules
                // it depends on disappear
                if let Some(pid) = pid
                    && let Ok(raw) = i32::try_from(pid)
                {
                    let pid = nix::unistd::Pid::from_raw(raw);
                    if let Err(e) = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM)
                    {
                        debug!(signal = name, error = %e, "proxy already gone; not forwarded");
                    }
                }
                audit::log_proxy_exit(None, Some(name)).await;
                0
            }
            Termination::ProxyExit(exit) => {
                audit::log_proxy_exit(exit.code, None).await;
                exit.manager_exit_code()
            }
        };

        self.applier.teardown(naming).await;
        audit::log_teardown(&naming.table).await;
        self.transition(State::Terminated);

        code
    }
}
