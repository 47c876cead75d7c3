//! AgentWorker: drives one controller from a single-slot mailbox.
//!
//! The coordinator overwrites the mailbox with each new tick. A worker that is
//! still busy when several ticks arrive only ever sees the newest one, so a
//! slow controller falls behind by skipping ticks instead of queueing them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::arena::Command;
use crate::controller::Controller;
use crate::messages::{AgentReport, FieldPlot, TickEnvelope};

/// Flags shared between a worker and its coordinator.
#[derive(Debug, Default)]
pub struct AgentStatus {
    exploring: AtomicBool,
    plotting: AtomicBool,
}

impl AgentStatus {
    pub fn is_exploring(&self) -> bool {
        self.exploring.load(Ordering::Relaxed)
    }

    pub fn is_plotting(&self) -> bool {
        self.plotting.load(Ordering::Relaxed)
    }

    pub fn set_plotting(&self, enabled: bool) {
        self.plotting.store(enabled, Ordering::Relaxed);
    }
}

/// Coordinator-side handle to a running worker task.
pub struct AgentWorker {
    agent: usize,
    mailbox: watch::Sender<Option<TickEnvelope>>,
    status: Arc<AgentStatus>,
    plots: watch::Receiver<Option<FieldPlot>>,
    join: JoinHandle<()>,
}

impl AgentWorker {
    /// Spawn a worker task for `controller`, reporting on `reports`.
    pub fn spawn(controller: Box<dyn Controller>, reports: mpsc::Sender<AgentReport>) -> Self {
        let agent = controller.agent();
        let (mailbox, inbox) = watch::channel(None);
        let (plot_tx, plots) = watch::channel(None);
        let status = Arc::new(AgentStatus::default());

        let join = tokio::spawn(run(controller, inbox, reports, status.clone(), plot_tx));

        Self {
            agent,
            mailbox,
            status,
            plots,
            join,
        }
    }

    pub fn agent(&self) -> usize {
        self.agent
    }

    pub fn status(&self) -> &AgentStatus {
        &self.status
    }

    /// Overwrite the mailbox. Returns false if the worker has stopped.
    pub fn deliver(&self, envelope: TickEnvelope) -> bool {
        self.mailbox.send(Some(envelope)).is_ok()
    }

    pub fn subscribe_plot(&self) -> watch::Receiver<Option<FieldPlot>> {
        self.plots.clone()
    }

    /// Close the mailbox and wait for the task to finish.
    pub async fn stop(self) {
        let Self { agent, mailbox, join, .. } = self;
        drop(mailbox);
        if let Err(e) = join.await {
            error!(agent, error = %e, "Agent worker task failed");
        }
    }
}

async fn run(
    mut controller: Box<dyn Controller>,
    mut inbox: watch::Receiver<Option<TickEnvelope>>,
    reports: mpsc::Sender<AgentReport>,
    status: Arc<AgentStatus>,
    plots: watch::Sender<Option<FieldPlot>>,
) {
    let agent = controller.agent();
    debug!(agent, "Agent worker started");

    while inbox.changed().await.is_ok() {
        let Some(envelope) = inbox.borrow_and_update().clone() else {
            continue;
        };
        let tick = envelope.tick;
        trace!(agent, tick, "Computing command");

        // Controller work is CPU-bound and may call the arena synchronously.
        let outcome = tokio::task::spawn_blocking(move || {
            let command = controller.tick(&envelope.snapshot);
            (controller, command)
        })
        .await;

        let command = match outcome {
            Ok((returned, command)) => {
                controller = returned;
                command
            }
            Err(e) => {
                error!(agent, tick, error = %e, "Controller panicked, worker stopping");
                // Close the mailbox first so later ticks see the worker as gone.
                drop(inbox);
                let hold = AgentReport {
                    tick,
                    agent,
                    command: Command::hold(agent),
                };
                if reports.send(hold).await.is_err() {
                    debug!(agent, tick, "Coordinator gone, hold report dropped");
                }
                return;
            }
        };

        status.exploring.store(controller.is_exploring(), Ordering::Relaxed);
        if status.is_plotting() {
            plots.send_replace(controller.plot());
        }

        if reports.send(AgentReport { tick, agent, command }).await.is_err() {
            break;
        }
    }

    debug!(agent, "Agent worker stopped");
}
