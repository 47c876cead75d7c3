//! Goal arbitration for a tank once exploration is over.
//!
//! Every candidate goal gets a utility from its priority and the distance to
//! its target. The best one wins, and a winner is kept for its minimum hold
//! time so a tank does not flip between goals on every tick.

use nalgebra::Point2;
use serde::Serialize;
use tracing::debug;

use crate::arena::{MyTank, Snapshot};
use crate::config::{BehaviorConfig, BehaviorWeight};

/// What a tank is trying to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GoalKind {
    /// Drive to an enemy flag
    CaptureFlag { color: String },
    /// Bring a carried flag home
    ReturnToBase,
    /// Close on an adversary so the tracker can fire on it
    Attack { callsign: String },
    /// Leave the goal alone and let the stall repulsion push the tank free
    Unstick,
}

impl GoalKind {
    fn weight(&self, config: &BehaviorConfig) -> BehaviorWeight {
        match self {
            Self::CaptureFlag { .. } => config.capture_flag,
            Self::ReturnToBase => config.return_to_base,
            Self::Attack { .. } => config.attack,
            Self::Unstick => config.unstick,
        }
    }
}

/// A scored goal.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub kind: GoalKind,
    pub target: Point2<f64>,
    pub utility: f64,
}

/// What the arbiter needs to know about the tank this tick.
pub struct Situation<'a> {
    pub tank: &'a MyTank,
    pub snapshot: &'a Snapshot,
    pub team: &'a str,
    /// Own base center, if the arena reported one
    pub base: Option<Point2<f64>>,
    /// Whether the stall detector has fired
    pub stalled: bool,
}

/// `priority / distance`, zero when standing on the target.
fn inverse_distance(priority: f64, distance: f64) -> f64 {
    if distance > 0.0 { priority / distance } else { 0.0 }
}

/// Score every goal available in `situation`.
pub fn candidates(config: &BehaviorConfig, situation: &Situation<'_>) -> Vec<Candidate> {
    let Situation {
        tank,
        snapshot,
        team,
        base,
        stalled,
    } = *situation;
    let here = tank.position();
    let mut out = Vec::new();

    for flag in snapshot.flags.iter().filter(|f| f.color != team) {
        let target = flag.position();
        let utility = if flag.possessing_color.as_deref() == Some(team) {
            0.0
        } else {
            inverse_distance(config.capture_flag.priority, nalgebra::distance(&here, &target))
        };
        out.push(Candidate {
            kind: GoalKind::CaptureFlag {
                color: flag.color.clone(),
            },
            target,
            utility,
        });
    }

    let home = base.unwrap_or_else(Point2::origin);
    let carrying = tank.flag.as_deref().is_some_and(|color| color != team);
    out.push(Candidate {
        kind: GoalKind::ReturnToBase,
        target: home,
        utility: if carrying {
            inverse_distance(config.return_to_base.priority, nalgebra::distance(&here, &home))
        } else {
            0.0
        },
    });

    let own_flag = snapshot
        .flags
        .iter()
        .find(|f| f.color == team)
        .map(|f| f.position());
    for enemy in snapshot.enemy_tanks.iter().filter(|e| e.is_alive()) {
        let target = enemy.position();
        let distance = nalgebra::distance(&here, &target);
        let threat = own_flag
            .is_some_and(|flag| nalgebra::distance(&flag, &target) < config.defend_radius);
        let utility = if threat {
            inverse_distance(config.attack.priority * config.defend_boost, distance)
        } else if distance < config.engage_range {
            inverse_distance(config.attack.priority, distance)
        } else {
            0.0
        };
        out.push(Candidate {
            kind: GoalKind::Attack {
                callsign: enemy.callsign.clone(),
            },
            target,
            utility,
        });
    }

    out.push(Candidate {
        kind: GoalKind::Unstick,
        target: here,
        utility: if stalled { config.unstick.priority } else { 0.0 },
    });
    out
}

/// Picks a goal each tick, holding a choice for its minimum time.
#[derive(Debug, Clone, Default)]
pub struct Arbiter {
    current: Option<GoalKind>,
    chosen_at_s: f64,
}

impl Arbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&GoalKind> {
        self.current.as_ref()
    }

    /// Forget the held goal (exploration took over).
    pub fn clear(&mut self) {
        self.current = None;
    }

    /// The goal to pursue at `now_s`, or `None` when nothing is worth doing.
    ///
    /// A held goal is kept until its hold time runs out, as long as its
    /// target still exists. Ties go to the later candidate.
    pub fn choose(
        &mut self,
        config: &BehaviorConfig,
        situation: &Situation<'_>,
        now_s: f64,
    ) -> Option<Candidate> {
        let mut scored = candidates(config, situation);

        if let Some(held) = &self.current {
            let elapsed = now_s - self.chosen_at_s;
            if (0.0..held.weight(config).min_hold_s).contains(&elapsed)
                && let Some(pos) = scored.iter().position(|c| &c.kind == held)
            {
                return Some(scored.swap_remove(pos));
            }
        }

        let best = scored
            .into_iter()
            .filter(|c| c.utility > 0.0)
            .max_by(|a, b| a.utility.total_cmp(&b.utility));
        match &best {
            Some(choice) => {
                if self.current.as_ref() != Some(&choice.kind) {
                    debug!(
                        agent = situation.tank.index,
                        goal = ?choice.kind,
                        utility = choice.utility,
                        "Goal changed"
                    );
                }
                self.current = Some(choice.kind.clone());
                self.chosen_at_s = now_s;
            }
            None => self.current = None,
        }
        best
    }
}
