//! SimulatedArena: an in-process world implementing [`ArenaLink`].
//!
//! The world is a square with rectangular obstacles, two bases and their
//! flags, one team of tanks driven by the kernel and a set of adversaries
//! orbiting the enemy base. Sweeps are sampled against the true obstacle map
//! through the configured sensor accuracies, so the kernel sees the same kind
//! of noise a real arena would give it.

use std::f64::consts::{PI, TAU};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Result, anyhow, bail, ensure};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use fusion_kernel::arena::{
    ArenaLink, Base, Command, EnemyTank, Flag, MyTank, Observation, SensorSweep, Shot, Snapshot,
    StaticConfig, TankStatus, TeamRoster,
};
use fusion_kernel::steering::normalize_angle;

/// Team the kernel plays.
pub const HOME_TEAM: &str = "blue";
/// Team of the simulated adversaries.
pub const ENEMY_TEAM: &str = "red";

/// Simulated world parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Side length of the square world
    pub world_size: f64,
    /// Tanks on the home team
    pub team_size: usize,
    /// Orbiting adversaries
    pub enemies: usize,
    /// Rectangular obstacles to scatter
    pub obstacles: usize,
    /// Simulated seconds per tick
    pub dt_s: f64,
    pub seed: u64,
    /// P(reads obstacle | obstacle)
    pub true_positive: f64,
    /// P(reads free | free)
    pub true_negative: f64,
    /// Side length, in cells, of each sensor sweep
    pub sweep_size: usize,
    /// Tank speed at full throttle
    pub tank_speed: f64,
    /// Largest turn rate a tank can execute
    pub max_turn_rate: f64,
    pub shot_speed: f64,
    pub shot_range: f64,
    pub tank_length: f64,
    /// Seconds between shots from one tank
    pub reload_s: f64,
    /// Radius of the adversaries' orbit
    pub orbit_radius: f64,
    /// Adversary angular speed in radians per second
    pub orbit_speed: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            world_size: 400.0,
            team_size: 2,
            enemies: 2,
            obstacles: 12,
            dt_s: 0.1,
            seed: 7,
            true_positive: 0.97,
            true_negative: 0.9,
            sweep_size: 60,
            tank_speed: 25.0,
            max_turn_rate: 1.0,
            shot_speed: 100.0,
            shot_range: 350.0,
            tank_length: 6.0,
            reload_s: 2.0,
            orbit_radius: 60.0,
            orbit_speed: 0.3,
        }
    }
}

impl SimConfig {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.world_size.is_finite() && self.world_size >= 100.0,
            "world size must be at least 100, got {}",
            self.world_size
        );
        ensure!(self.team_size > 0, "team size must be positive");
        ensure!(self.dt_s > 0.0, "dt must be positive, got {}", self.dt_s);
        ensure!(self.sweep_size > 0, "sweep size must be positive");
        for (name, value) in [
            ("true_positive", self.true_positive),
            ("true_negative", self.true_negative),
        ] {
            ensure!(
                (0.0..=1.0).contains(&value),
                "{name} must lie in [0, 1], got {value}"
            );
        }
        Ok(())
    }

    /// Center of a team's base.
    fn base_center(&self, color: &str) -> (f64, f64) {
        let offset = self.world_size * 0.4;
        if color == HOME_TEAM {
            (-offset, -offset)
        } else {
            (offset, offset)
        }
    }
}

/// Axis-aligned rectangle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    fn around(x: f64, y: f64, half: f64) -> Self {
        Self {
            x0: x - half,
            y0: y - half,
            x1: x + half,
            y1: y + half,
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }

    fn overlaps(&self, other: &Rect) -> bool {
        self.x0 < other.x1 && other.x0 < self.x1 && self.y0 < other.y1 && other.y0 < self.y1
    }

    fn corners(&self) -> Vec<(f64, f64)> {
        vec![
            (self.x0, self.y0),
            (self.x1, self.y0),
            (self.x1, self.y1),
            (self.x0, self.y1),
        ]
    }
}

#[derive(Debug, Clone)]
struct SimTank {
    x: f64,
    y: f64,
    angle: f64,
    vx: f64,
    vy: f64,
    angvel: f64,
    flag: Option<String>,
    reload_until: f64,
}

#[derive(Debug, Clone)]
struct SimEnemy {
    center: (f64, f64),
    phase: f64,
    alive: bool,
}

#[derive(Debug, Clone)]
struct SimFlag {
    color: String,
    home: (f64, f64),
    x: f64,
    y: f64,
    /// Team holding the flag, and which of its tanks
    holder: Option<(String, usize)>,
}

#[derive(Debug, Clone)]
struct SimShot {
    x: f64,
    y: f64,
    vx: f64,
    vy: f64,
    travelled: f64,
    owner: String,
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArenaStats {
    pub elapsed_s: f64,
    pub shots_fired: usize,
    pub kills: usize,
    pub captures: usize,
    /// Total distance driven by the home team
    pub distance_driven: f64,
}

#[derive(Debug)]
struct World {
    tanks: Vec<SimTank>,
    enemies: Vec<SimEnemy>,
    flags: Vec<SimFlag>,
    shots: Vec<SimShot>,
    rng: ChaCha8Rng,
    stats: ArenaStats,
}

/// In-process arena.
#[derive(Debug)]
pub struct SimulatedArena {
    config: SimConfig,
    obstacles: Vec<Rect>,
    bases: Vec<(String, Rect)>,
    world: Mutex<World>,
}

impl SimulatedArena {
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

        let bases: Vec<(String, Rect)> = [HOME_TEAM, ENEMY_TEAM]
            .iter()
            .map(|color| {
                let (x, y) = config.base_center(color);
                (color.to_string(), Rect::around(x, y, 10.0))
            })
            .collect();

        let obstacles = scatter_obstacles(&config, &bases, &mut rng);

        let (hx, hy) = config.base_center(HOME_TEAM);
        let tanks = (0..config.team_size)
            .map(|i| SimTank {
                x: hx + (i % 4) as f64 * 4.0 - 6.0,
                y: hy + (i / 4) as f64 * 4.0 - 6.0,
                angle: PI / 4.0,
                vx: 0.0,
                vy: 0.0,
                angvel: 0.0,
                flag: None,
                reload_until: 0.0,
            })
            .collect();

        let (ex, ey) = config.base_center(ENEMY_TEAM);
        let enemies = (0..config.enemies)
            .map(|j| SimEnemy {
                center: (ex - config.orbit_radius, ey - config.orbit_radius),
                phase: TAU * j as f64 / config.enemies as f64,
                alive: true,
            })
            .collect();

        let flags = [HOME_TEAM, ENEMY_TEAM]
            .iter()
            .map(|color| {
                let home = config.base_center(color);
                SimFlag {
                    color: color.to_string(),
                    home,
                    x: home.0,
                    y: home.1,
                    holder: None,
                }
            })
            .collect();

        info!(
            world_size = config.world_size,
            obstacles = obstacles.len(),
            tanks = config.team_size,
            enemies = config.enemies,
            "Simulated arena ready"
        );

        Ok(Self {
            config,
            obstacles,
            bases,
            world: Mutex::new(World {
                tanks,
                enemies,
                flags,
                shots: Vec::new(),
                rng,
                stats: ArenaStats::default(),
            }),
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn obstacles(&self) -> &[Rect] {
        &self.obstacles
    }

    /// Ground truth for one world point.
    pub fn is_obstacle(&self, x: f64, y: f64) -> bool {
        self.obstacles.iter().any(|r| r.contains(x, y))
    }

    fn inside_world(&self, x: f64, y: f64) -> bool {
        let half = self.config.world_size / 2.0;
        x >= -half && x < half && y >= -half && y < half
    }

    fn lock(&self) -> Result<MutexGuard<'_, World>> {
        self.world.lock().map_err(|e| anyhow!("Lock error: {}", e))
    }

    pub fn stats(&self) -> Result<ArenaStats> {
        Ok(self.lock()?.stats.clone())
    }

    /// Current position of a home-team tank.
    pub fn tank_position(&self, agent: usize) -> Result<(f64, f64)> {
        let world = self.lock()?;
        let tank = world
            .tanks
            .get(agent)
            .ok_or_else(|| anyhow!("no tank {agent}"))?;
        Ok((tank.x, tank.y))
    }

    fn enemy_position(&self, enemy: &SimEnemy) -> (f64, f64) {
        (
            enemy.center.0 + self.config.orbit_radius * enemy.phase.cos(),
            enemy.center.1 + self.config.orbit_radius * enemy.phase.sin(),
        )
    }

    fn drive(&self, world: &mut World, command: &Command) {
        let dt = self.config.dt_s;
        let now = world.stats.elapsed_s;
        let Some(tank) = world.tanks.get_mut(command.agent) else {
            debug!(agent = command.agent, "Command for unknown tank ignored");
            return;
        };

        tank.angvel = command
            .turn_rate
            .clamp(-self.config.max_turn_rate, self.config.max_turn_rate);
        tank.angle = normalize_angle(tank.angle + tank.angvel * dt);

        let speed = command.throttle.clamp(-1.0, 1.0) * self.config.tank_speed;
        let (nx, ny) = (
            tank.x + tank.angle.cos() * speed * dt,
            tank.y + tank.angle.sin() * speed * dt,
        );
        if self.inside_world(nx, ny) && !self.is_obstacle(nx, ny) {
            world.stats.distance_driven += (speed * dt).abs();
            tank.vx = (nx - tank.x) / dt;
            tank.vy = (ny - tank.y) / dt;
            tank.x = nx;
            tank.y = ny;
        } else {
            tank.vx = 0.0;
            tank.vy = 0.0;
        }

        if command.fire && now >= tank.reload_until {
            tank.reload_until = now + self.config.reload_s;
            let (dx, dy) = (tank.angle.cos(), tank.angle.sin());
            let nose = self.config.tank_length / 2.0;
            let shot = SimShot {
                x: tank.x + dx * nose,
                y: tank.y + dy * nose,
                vx: dx * self.config.shot_speed,
                vy: dy * self.config.shot_speed,
                travelled: 0.0,
                owner: HOME_TEAM.to_string(),
            };
            world.shots.push(shot);
            world.stats.shots_fired += 1;
        }
    }

    fn advance(&self, world: &mut World) {
        let dt = self.config.dt_s;
        world.stats.elapsed_s += dt;

        for enemy in world.enemies.iter_mut().filter(|e| e.alive) {
            enemy.phase = (enemy.phase + self.config.orbit_speed * dt).rem_euclid(TAU);
        }

        let hit_radius = self.config.tank_length / 2.0;
        let mut shots = std::mem::take(&mut world.shots);
        shots.retain_mut(|shot| {
            shot.x += shot.vx * dt;
            shot.y += shot.vy * dt;
            shot.travelled += self.config.shot_speed * dt;
            if shot.travelled > self.config.shot_range
                || !self.inside_world(shot.x, shot.y)
                || self.is_obstacle(shot.x, shot.y)
            {
                return false;
            }
            for enemy in world.enemies.iter_mut().filter(|e| e.alive) {
                let (ex, ey) = self.enemy_position(enemy);
                if (ex - shot.x).hypot(ey - shot.y) <= hit_radius {
                    enemy.alive = false;
                    world.stats.kills += 1;
                    debug!(x = ex, y = ey, "Adversary destroyed");
                    return false;
                }
            }
            true
        });
        world.shots = shots;

        self.move_flags(world);
    }

    fn move_flags(&self, world: &mut World) {
        let home_base = self.bases.iter().find(|(color, _)| color == HOME_TEAM).map(|(_, r)| *r);
        for flag in world.flags.iter_mut().filter(|f| f.color != HOME_TEAM) {
            match flag.holder.clone() {
                Some((_, carrier)) => {
                    let Some(tank) = world.tanks.get_mut(carrier) else {
                        continue;
                    };
                    flag.x = tank.x;
                    flag.y = tank.y;
                    if home_base.is_some_and(|base| base.contains(tank.x, tank.y)) {
                        info!(agent = carrier, flag = %flag.color, "Flag captured");
                        world.stats.captures += 1;
                        tank.flag = None;
                        flag.holder = None;
                        (flag.x, flag.y) = flag.home;
                    }
                }
                None => {
                    let reach = self.config.tank_length;
                    let grab = world.tanks.iter().position(|t| {
                        t.flag.is_none() && (t.x - flag.x).hypot(t.y - flag.y) < reach
                    });
                    if let Some(carrier) = grab {
                        debug!(agent = carrier, flag = %flag.color, "Flag picked up");
                        world.tanks[carrier].flag = Some(flag.color.clone());
                        flag.holder = Some((HOME_TEAM.to_string(), carrier));
                    }
                }
            }
        }
    }
}

fn scatter_obstacles(
    config: &SimConfig,
    bases: &[(String, Rect)],
    rng: &mut ChaCha8Rng,
) -> Vec<Rect> {
    let half = config.world_size / 2.0;
    let keep_clear: Vec<Rect> = bases
        .iter()
        .map(|(_, base)| Rect {
            x0: base.x0 - 30.0,
            y0: base.y0 - 30.0,
            x1: base.x1 + 30.0,
            y1: base.y1 + 30.0,
        })
        .collect();

    let mut obstacles: Vec<Rect> = Vec::with_capacity(config.obstacles);
    let mut attempts = 0;
    while obstacles.len() < config.obstacles && attempts < config.obstacles * 20 {
        attempts += 1;
        let w = rng.random_range(10.0..40.0);
        let h = rng.random_range(10.0..40.0);
        let x0 = rng.random_range(-half..half - w);
        let y0 = rng.random_range(-half..half - h);
        let candidate = Rect {
            x0: x0.floor(),
            y0: y0.floor(),
            x1: (x0 + w).floor(),
            y1: (y0 + h).floor(),
        };
        if keep_clear.iter().any(|r| r.overlaps(&candidate)) {
            continue;
        }
        obstacles.push(candidate);
    }
    obstacles
}

impl ArenaLink for SimulatedArena {
    fn static_config(&self) -> Result<StaticConfig> {
        Ok(StaticConfig {
            world_size: self.config.world_size,
            sensor_true_positive: Some(self.config.true_positive),
            sensor_true_negative: Some(self.config.true_negative),
            team: HOME_TEAM.to_string(),
            roster: vec![
                TeamRoster {
                    color: HOME_TEAM.to_string(),
                    count: self.config.team_size,
                },
                TeamRoster {
                    color: ENEMY_TEAM.to_string(),
                    count: self.config.enemies,
                },
            ],
            bases: self
                .bases
                .iter()
                .map(|(color, rect)| Base {
                    color: color.clone(),
                    corners: rect.corners(),
                })
                .collect(),
            shot_speed: self.config.shot_speed,
            shot_range: self.config.shot_range,
            tank_length: self.config.tank_length,
        })
    }

    fn snapshot(&self, team: &str) -> Result<Snapshot> {
        if team != HOME_TEAM {
            bail!("simulated arena only serves team {HOME_TEAM}, not {team}");
        }
        let world = self.lock()?;
        let my_tanks = world
            .tanks
            .iter()
            .enumerate()
            .map(|(index, t)| MyTank {
                index,
                callsign: format!("{HOME_TEAM}{index}"),
                status: TankStatus::Alive,
                flag: t.flag.clone(),
                x: t.x,
                y: t.y,
                angle: t.angle,
                vx: t.vx,
                vy: t.vy,
                angvel: t.angvel,
            })
            .collect();
        let enemy_tanks = world
            .enemies
            .iter()
            .enumerate()
            .map(|(j, e)| {
                let (x, y) = self.enemy_position(e);
                EnemyTank {
                    callsign: format!("{ENEMY_TEAM}{j}"),
                    color: ENEMY_TEAM.to_string(),
                    status: if e.alive { TankStatus::Alive } else { TankStatus::Dead },
                    flag: None,
                    x,
                    y,
                    angle: normalize_angle(e.phase + PI / 2.0),
                }
            })
            .collect();
        let flags = world
            .flags
            .iter()
            .map(|f| Flag {
                color: f.color.clone(),
                possessing_color: f.holder.as_ref().map(|(team, _)| team.clone()),
                x: f.x,
                y: f.y,
            })
            .collect();
        let shots = world
            .shots
            .iter()
            .filter(|s| s.owner != team)
            .map(|s| Shot {
                x: s.x,
                y: s.y,
                vx: s.vx,
                vy: s.vy,
            })
            .collect();

        Ok(Snapshot {
            my_tanks,
            enemy_tanks,
            flags,
            shots,
            elapsed_s: world.stats.elapsed_s,
        })
    }

    fn sensor_sweep(&self, agent: usize, world_size: f64) -> Result<SensorSweep> {
        ensure!(
            (world_size - self.config.world_size).abs() < f64::EPSILON,
            "sweep requested for world size {world_size}, arena is {}",
            self.config.world_size
        );
        let mut world = self.lock()?;
        let (x, y) = world
            .tanks
            .get(agent)
            .map(|t| (t.x, t.y))
            .ok_or_else(|| anyhow!("no tank {agent}"))?;

        let side = self.config.sweep_size;
        let offset_x = (x - side as f64 / 2.0).floor();
        let offset_y = (y - side as f64 / 2.0).floor();
        let (tp, tn) = (self.config.true_positive, self.config.true_negative);

        let mut cells = Vec::with_capacity(side * side);
        for i in 0..side {
            for j in 0..side {
                let cx = offset_x + i as f64 + 0.5;
                let cy = offset_y + j as f64 + 0.5;
                let reading = if !self.inside_world(cx, cy) {
                    Observation::Unobserved
                } else if self.is_obstacle(cx, cy) {
                    if world.rng.random_bool(tp) {
                        Observation::Obstacle
                    } else {
                        Observation::Free
                    }
                } else if world.rng.random_bool(tn) {
                    Observation::Free
                } else {
                    Observation::Obstacle
                };
                cells.push(reading);
            }
        }
        SensorSweep::new(offset_x, offset_y, side, side, cells)
    }

    fn send_commands(&self, commands: &[Command]) -> Result<()> {
        let mut world = self.lock()?;
        for command in commands {
            self.drive(&mut world, command);
        }
        self.advance(&mut world);
        Ok(())
    }
}
