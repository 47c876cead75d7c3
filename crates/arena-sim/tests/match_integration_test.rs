//! Integration tests for simulated matches.
//!
//! Tests the full flow of:
//! - Building the kernel against the simulated arena
//! - Driving ticks until the run completes
//! - Mapping the world from noisy sweeps
//! - Summarizing and saving the run

use arena_sim::{SimConfig, run_match};
use fusion_kernel::{FirePolicy, FusionConfig};

fn small_world() -> SimConfig {
    SimConfig {
        world_size: 200.0,
        team_size: 2,
        enemies: 1,
        obstacles: 4,
        sweep_size: 40,
        ..SimConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_match_runs_every_tick_and_maps_the_world() {
    let summary = run_match(small_world(), FusionConfig::default(), 30)
        .await
        .unwrap();

    assert_eq!(summary.ticks, 30);
    assert_eq!(summary.tick_metrics.len(), 30);
    for (i, metrics) in summary.tick_metrics.iter().enumerate() {
        assert_eq!(metrics.tick, i as u64 + 1);
        assert_eq!(metrics.late_agents, 0);
    }
    assert_eq!(summary.late_ticks, 0);
    assert_eq!(summary.tick_metrics[0].exploring, 2);
    assert!((summary.arena.elapsed_s - 3.0).abs() < 1e-9);

    let counts = summary.final_counts;
    assert_eq!(counts.free + counts.obstacle + counts.unknown, 200 * 200);
    assert!(counts.free > 0, "sweeps should have cleared some cells");
    assert!(counts.unknown > 0, "three seconds is not enough to map everything");
    assert!(summary.explored_fraction() > 0.0 && summary.explored_fraction() < 1.0);
    assert!(summary.arena.distance_driven > 0.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_perfect_sensor_maps_without_errors() {
    let sim = SimConfig {
        true_positive: 1.0,
        true_negative: 1.0,
        ..small_world()
    };
    let summary = run_match(sim, FusionConfig::default(), 15).await.unwrap();

    // The kernel clamps the reported accuracy below 1.
    assert_eq!(summary.fusion.sensor.true_positive, 0.99);
    assert_eq!(summary.map_accuracy, Some(1.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_never_fire_policy_holds_fire() {
    let mut fusion = FusionConfig::default();
    fusion.controller.fire_policy = FirePolicy::Never;
    let summary = run_match(small_world(), fusion, 20).await.unwrap();

    assert!(summary.tick_metrics.iter().all(|m| m.firing == 0));
    assert_eq!(summary.arena.shots_fired, 0);
    assert_eq!(summary.arena.kills, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_summary_saves_as_json() {
    let summary = run_match(small_world(), FusionConfig::default(), 5)
        .await
        .unwrap();

    let path = std::env::temp_dir().join(format!("arena-sim-summary-{}.json", std::process::id()));
    summary.save(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).ok();

    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["ticks"], 5);
    assert_eq!(value["tick_metrics"].as_array().map(Vec::len), Some(5));
    assert_eq!(value["sim"]["world_size"], 200.0);
    assert!(value["final_counts"]["unknown"].as_u64().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_world_is_rejected() {
    let sim = SimConfig {
        world_size: 10.0,
        ..SimConfig::default()
    };
    assert!(run_match(sim, FusionConfig::default(), 1).await.is_err());
}
