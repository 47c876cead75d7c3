//! TickCoordinator: fans a snapshot out to every agent worker and collects
//! exactly one command per agent before the tick is released.
//!
//! ```text
//! run_tick(snapshot)
//!   ├─ TickEnvelope (overwrite) → AgentWorker mailboxes
//!   │   └─ Controller::tick on a blocking thread
//!   ├─ AgentReport ← completion channel (stale ticks discarded)
//!   └─ TickReport (commands ordered by agent)
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::arena::{Command, Snapshot};
use crate::config::CoordinatorConfig;
use crate::controller::Controller;
use crate::kernel::TickReport;
use crate::messages::{AgentReport, FieldPlot, TickEnvelope};

use super::worker::AgentWorker;

/// Completions still outstanding for one tick.
#[derive(Debug)]
struct PendingCompletions {
    tick: u64,
    /// Agents whose mailbox accepted this tick
    awaiting: BTreeSet<usize>,
    commands: BTreeMap<usize, Command>,
}

impl PendingCompletions {
    fn new(tick: u64) -> Self {
        Self {
            tick,
            awaiting: BTreeSet::new(),
            commands: BTreeMap::new(),
        }
    }

    fn expect(&mut self, agent: usize) {
        self.awaiting.insert(agent);
    }

    /// Settle an agent without waiting for it.
    fn resolve(&mut self, agent: usize, command: Command) {
        self.awaiting.remove(&agent);
        self.commands.insert(agent, command);
    }

    /// Accept a report for this tick. Returns false for stale or unexpected
    /// reports.
    fn accept(&mut self, report: AgentReport) -> bool {
        if report.tick != self.tick || !self.awaiting.remove(&report.agent) {
            return false;
        }
        self.commands.insert(report.agent, report.command);
        true
    }

    fn is_complete(&self) -> bool {
        self.awaiting.is_empty()
    }
}

/// Team-wide tick barrier over a set of agent workers.
pub struct TickCoordinator {
    config: CoordinatorConfig,
    workers: Vec<AgentWorker>,
    reports: mpsc::Receiver<AgentReport>,
    current_tick: u64,
}

impl TickCoordinator {
    /// Spawn one worker per controller. Must be called inside a tokio runtime.
    pub fn spawn(config: CoordinatorConfig, controllers: Vec<Box<dyn Controller>>) -> Self {
        let capacity = (controllers.len() * 4).max(4);
        let (tx, reports) = mpsc::channel(capacity);
        let mut workers: Vec<AgentWorker> = controllers
            .into_iter()
            .map(|controller| AgentWorker::spawn(controller, tx.clone()))
            .collect();
        workers.sort_by_key(|w| w.agent());

        info!(agents = workers.len(), "Tick coordinator started");
        Self {
            config,
            workers,
            reports,
            current_tick: 0,
        }
    }

    pub fn agent_count(&self) -> usize {
        self.workers.len()
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    /// Run one tick: deliver `snapshot` to every worker and wait until each
    /// has answered (or the configured deadline passes).
    pub async fn run_tick(&mut self, snapshot: Snapshot) -> TickReport {
        self.current_tick += 1;
        let tick = self.current_tick;
        let elapsed_s = snapshot.elapsed_s;
        let envelope = TickEnvelope {
            tick,
            snapshot: Arc::new(snapshot),
        };

        let mut pending = PendingCompletions::new(tick);
        for worker in &self.workers {
            if worker.deliver(envelope.clone()) {
                pending.expect(worker.agent());
            } else {
                warn!(agent = worker.agent(), tick, "Agent worker has stopped, holding");
                pending.resolve(worker.agent(), Command::hold(worker.agent()));
            }
        }

        let deadline = self
            .config
            .tick_deadline_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));

        while !pending.is_complete() {
            let next = match deadline {
                Some(at) => match tokio::time::timeout_at(at, self.reports.recv()).await {
                    Ok(report) => report,
                    Err(_) => break,
                },
                None => self.reports.recv().await,
            };
            let Some(report) = next else {
                warn!(tick, "Every agent worker has stopped");
                break;
            };
            let (agent, report_tick) = (report.agent, report.tick);
            if !pending.accept(report) {
                trace!(agent, report_tick, tick, "Discarding stale report");
            }
        }

        let late_agents: Vec<usize> = pending.awaiting.iter().copied().collect();
        for agent in &late_agents {
            pending.commands.insert(*agent, Command::hold(*agent));
        }
        if !late_agents.is_empty() {
            warn!(tick, late = ?late_agents, "Agents missed the tick deadline, holding");
        }

        let exploring = self.workers.iter().filter(|w| w.status().is_exploring()).count();
        let report = TickReport {
            tick,
            elapsed_s,
            commands: pending.commands.into_values().collect(),
            late_agents,
            exploring,
        };

        debug!(
            tick,
            commands = report.commands.len(),
            exploring,
            "Tick complete"
        );
        if self.config.log_every_ticks > 0 && tick % self.config.log_every_ticks == 0 {
            info!(
                tick,
                elapsed_s,
                exploring,
                late = report.late_agents.len(),
                "Tick summary"
            );
        }
        report
    }

    fn worker(&self, agent: usize) -> Result<&AgentWorker> {
        self.workers
            .iter()
            .find(|w| w.agent() == agent)
            .ok_or_else(|| anyhow!("no agent with index {agent}"))
    }

    /// Whether `agent` spent its last completed tick exploring.
    pub fn is_exploring(&self, agent: usize) -> Result<bool> {
        Ok(self.worker(agent)?.status().is_exploring())
    }

    pub fn enable_plotting(&self, agent: usize) -> Result<()> {
        self.worker(agent)?.status().set_plotting(true);
        Ok(())
    }

    pub fn disable_plotting(&self, agent: usize) -> Result<()> {
        self.worker(agent)?.status().set_plotting(false);
        Ok(())
    }

    /// Field plots published by `agent` while plotting is enabled.
    pub fn subscribe_plot(&self, agent: usize) -> Result<watch::Receiver<Option<FieldPlot>>> {
        Ok(self.worker(agent)?.subscribe_plot())
    }

    /// Close every mailbox and wait for the workers to exit.
    pub async fn shutdown(self) {
        let Self { workers, .. } = self;
        let count = workers.len();
        join_all(workers.into_iter().map(AgentWorker::stop)).await;
        info!(agents = count, "Tick coordinator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(tick: u64, agent: usize) -> AgentReport {
        AgentReport {
            tick,
            agent,
            command: Command::hold(agent),
        }
    }

    #[test]
    fn test_pending_completions_rejects_stale_and_duplicate_reports() {
        let mut pending = PendingCompletions::new(7);
        pending.expect(0);
        pending.expect(1);

        assert!(!pending.accept(report(6, 0)));
        assert!(pending.accept(report(7, 0)));
        assert!(!pending.accept(report(7, 0)));
        assert!(!pending.accept(report(7, 5)));
        assert!(!pending.is_complete());

        pending.resolve(1, Command::hold(1));
        assert!(pending.is_complete());
        assert_eq!(pending.commands.len(), 2);
    }
}
