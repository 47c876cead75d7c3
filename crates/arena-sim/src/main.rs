//! Arena Sim CLI.
//!
//! Commands:
//! - run: Play one simulated match and save its summary
//! - config: Print the default kernel configuration as JSON

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use arena_sim::{SimConfig, run_match};
use fusion_kernel::{FirePolicy, FusionConfig};

/// Generate a timestamped output path from the given path.
/// e.g., "match.json" -> "match-20260108-010530.json"
fn timestamped_path(path: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("match");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("json");
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!("{}-{}.{}", stem, timestamp, ext))
}

#[derive(Parser)]
#[command(name = "arena-sim")]
#[command(version)]
#[command(about = "Run the fusion kernel against a simulated arena")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play one match
    Run {
        /// Side length of the square world
        #[arg(long, default_value = "400")]
        world_size: f64,

        /// Tanks on the home team
        #[arg(long, default_value = "2")]
        tanks: usize,

        /// Orbiting adversaries
        #[arg(long, default_value = "2")]
        enemies: usize,

        /// Rectangular obstacles to scatter
        #[arg(long, default_value = "12")]
        obstacles: usize,

        /// Ticks to run
        #[arg(long, default_value = "600")]
        ticks: u64,

        /// Simulated seconds per tick
        #[arg(long, default_value = "0.1")]
        dt: f64,

        /// Random seed for the world and the agents
        #[arg(long, env = "ARENA_SEED")]
        seed: Option<u64>,

        /// Kernel configuration file (JSON). Defaults are used if omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// When to fire: never, always, intercept
        #[arg(long)]
        fire_policy: Option<String>,

        /// Per-tick deadline in milliseconds; late agents hold
        #[arg(long)]
        deadline_ms: Option<u64>,

        /// Output file for the run summary
        #[arg(long, default_value = "match.json")]
        output: PathBuf,
    },

    /// Print the default kernel configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();

    match cli.command {
        Commands::Run {
            world_size,
            tanks,
            enemies,
            obstacles,
            ticks,
            dt,
            seed,
            config,
            fire_policy,
            deadline_ms,
            output,
        } => {
            let mut fusion = match config {
                Some(path) => load_config(&path)?,
                None => FusionConfig::default(),
            };
            if let Some(policy) = fire_policy {
                fusion.controller.fire_policy = parse_fire_policy(&policy)?;
            }
            if deadline_ms.is_some() {
                fusion.coordinator.tick_deadline_ms = deadline_ms;
            }

            let mut sim = SimConfig {
                world_size,
                team_size: tanks,
                enemies,
                obstacles,
                dt_s: dt,
                ..SimConfig::default()
            };
            if let Some(seed) = seed {
                sim.seed = seed;
                fusion.seed = seed;
            }

            info!(world_size, tanks, enemies, obstacles, ticks, "Starting match");
            let summary = run_match(sim, fusion, ticks).await?;

            let output_path = timestamped_path(&output);
            summary.save(&output_path)?;

            println!("\n=== Match Result ===");
            println!("Ticks: {} ({:.1}s simulated)", summary.ticks, summary.arena.elapsed_s);
            println!("Late ticks: {}", summary.late_ticks);
            println!(
                "Map: {} free, {} obstacle, {} unknown ({:.1}% explored)",
                summary.final_counts.free,
                summary.final_counts.obstacle,
                summary.final_counts.unknown,
                summary.explored_fraction() * 100.0
            );
            match summary.map_accuracy {
                Some(accuracy) => println!("Map accuracy: {:.1}%", accuracy * 100.0),
                None => println!("Map accuracy: n/a"),
            }
            println!("Distance driven: {:.1}", summary.arena.distance_driven);
            println!("Shots fired: {}", summary.arena.shots_fired);
            println!("Kills: {}", summary.arena.kills);
            println!("Captures: {}", summary.arena.captures);
            println!("\nSummary saved to: {}", output_path.display());
        }

        Commands::Config => {
            let json = serde_json::to_string_pretty(&FusionConfig::default())?;
            println!("{}", json);
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<FusionConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn parse_fire_policy(s: &str) -> Result<FirePolicy> {
    match s.to_lowercase().as_str() {
        "never" | "off" => Ok(FirePolicy::Never),
        "always" => Ok(FirePolicy::Always),
        "intercept" | "lead" => Ok(FirePolicy::Intercept),
        _ => anyhow::bail!("Unknown fire policy: {}. Valid: never, always, intercept", s),
    }
}
