//! Integration tests for the tick barrier.
//!
//! Tests the full flow of:
//! - run_tick fan-out to every worker mailbox
//! - Waiting for the slowest agent before releasing the batch
//! - Deadline mode: late agents hold and their stale reports are discarded
//! - Plot and exploring introspection
//! - Recovery from a panicking controller

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use nalgebra::{Point2, Vector2};
use tokio::time::Instant;

use fusion_kernel::arena::{Command, Snapshot};
use fusion_kernel::config::CoordinatorConfig;
use fusion_kernel::{Controller, FieldPlot, TickCoordinator, VectorField};

/// Controller that answers with a recognizable throttle after an optional
/// delay on its first `slow_ticks` ticks.
struct ScriptedController {
    agent: usize,
    throttle: f64,
    delay: Duration,
    slow_ticks: usize,
    calls: Arc<AtomicUsize>,
}

impl ScriptedController {
    fn new(agent: usize, throttle: f64) -> Self {
        Self {
            agent,
            throttle,
            delay: Duration::ZERO,
            slow_ticks: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn slow(mut self, delay: Duration, slow_ticks: usize) -> Self {
        self.delay = delay;
        self.slow_ticks = slow_ticks;
        self
    }
}

impl Controller for ScriptedController {
    fn agent(&self) -> usize {
        self.agent
    }

    fn tick(&mut self, snapshot: &Snapshot) -> Command {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.slow_ticks {
            std::thread::sleep(self.delay);
        }
        Command {
            agent: self.agent,
            throttle: self.throttle,
            turn_rate: snapshot.elapsed_s,
            fire: false,
        }
    }

    fn is_exploring(&self) -> bool {
        true
    }

    fn plot(&self) -> Option<FieldPlot> {
        Some(FieldPlot {
            agent: self.agent,
            tick_time: 0.0,
            position: Point2::origin(),
            fields: vec![VectorField::attraction(Point2::new(1.0, 0.0), 0.0, 1.0, 1.0)],
            net_force: Vector2::x(),
        })
    }
}

struct PanickingController;

impl Controller for PanickingController {
    fn agent(&self) -> usize {
        0
    }

    fn tick(&mut self, _snapshot: &Snapshot) -> Command {
        panic!("controller blew up");
    }
}

fn snapshot_at(elapsed_s: f64) -> Snapshot {
    Snapshot {
        elapsed_s,
        ..Snapshot::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_batch_waits_for_slowest_agent() {
    let controllers: Vec<Box<dyn Controller>> = vec![
        Box::new(ScriptedController::new(1, -0.5).slow(Duration::from_millis(200), usize::MAX)),
        Box::new(ScriptedController::new(0, 0.5)),
    ];
    let mut coordinator = TickCoordinator::spawn(CoordinatorConfig::default(), controllers);

    let started = Instant::now();
    let report = coordinator.run_tick(snapshot_at(1.5)).await;

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(report.tick, 1);
    assert_eq!(report.commands.len(), 2);
    assert!(report.late_agents.is_empty());
    assert_eq!(report.commands[0].agent, 0);
    assert_eq!(report.commands[0].throttle, 0.5);
    assert_eq!(report.commands[1].agent, 1);
    assert_eq!(report.commands[1].throttle, -0.5);
    assert!(report.commands.iter().all(|c| c.turn_rate == 1.5));

    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deadline_holds_late_agent_and_discards_stale_report() {
    let config = CoordinatorConfig {
        tick_deadline_ms: Some(50),
        ..CoordinatorConfig::default()
    };
    let controllers: Vec<Box<dyn Controller>> = vec![
        Box::new(ScriptedController::new(0, 0.5)),
        Box::new(ScriptedController::new(1, -0.5).slow(Duration::from_millis(300), 1)),
    ];
    let mut coordinator = TickCoordinator::spawn(config, controllers);

    let first = coordinator.run_tick(snapshot_at(1.0)).await;
    assert_eq!(first.commands.len(), 2);
    assert_eq!(first.late_agents, vec![1]);
    assert_eq!(first.command(1), Some(&Command::hold(1)));
    assert_eq!(first.command(0).map(|c| c.throttle), Some(0.5));

    // Let the slow agent finish tick 1 so its stale report is queued.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let second = coordinator.run_tick(snapshot_at(2.0)).await;
    assert_eq!(second.tick, 2);
    assert!(second.late_agents.is_empty());
    let slow = second.command(1).unwrap();
    assert_eq!(slow.throttle, -0.5);
    assert_eq!(slow.turn_rate, 2.0, "tick 1 result must not leak into tick 2");

    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_plotting_and_exploring_introspection() {
    let controllers: Vec<Box<dyn Controller>> = vec![
        Box::new(ScriptedController::new(0, 1.0)),
        Box::new(ScriptedController::new(1, 1.0)),
    ];
    let mut coordinator = TickCoordinator::spawn(CoordinatorConfig::default(), controllers);
    let plots = coordinator.subscribe_plot(0).unwrap();
    let quiet = coordinator.subscribe_plot(1).unwrap();
    coordinator.enable_plotting(0).unwrap();

    let report = coordinator.run_tick(snapshot_at(0.0)).await;
    assert_eq!(report.exploring, 2);
    assert!(coordinator.is_exploring(0).unwrap());

    let plot = plots.borrow().clone().unwrap();
    assert_eq!(plot.agent, 0);
    assert_eq!(plot.fields.len(), 1);
    assert!(quiet.borrow().is_none(), "plotting is off for agent 1");

    coordinator.disable_plotting(0).unwrap();
    assert!(coordinator.is_exploring(7).is_err());
    assert!(coordinator.enable_plotting(7).is_err());

    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_controller_degrades_to_hold() {
    let controllers: Vec<Box<dyn Controller>> = vec![
        Box::new(PanickingController),
        Box::new(ScriptedController::new(1, 0.25)),
    ];
    let mut coordinator = TickCoordinator::spawn(CoordinatorConfig::default(), controllers);

    for elapsed in [0.0, 0.1, 0.2] {
        let report = coordinator.run_tick(snapshot_at(elapsed)).await;
        assert_eq!(report.commands.len(), 2);
        assert_eq!(report.command(0), Some(&Command::hold(0)));
        assert_eq!(report.command(1).map(|c| c.throttle), Some(0.25));
    }

    coordinator.shutdown().await;
}
