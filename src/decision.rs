//! Bot decision loop: escape, forage dead drops, hunt, forage natural DNA.
//!
//! Every cell reads a snapshot of the world taken at the start of the system,
//! so the traversal order never changes what a cell sees this tick. Predator
//! sets are patched after the loop.

use std::collections::HashMap;

use bevy::prelude::*;
use rand::Rng;
use tracing::trace;

use crate::cell::{compare_strength, Cell, Strength};
use crate::config::*;
use crate::dna::DnaPoint;
use crate::rng::{coin_flip, random_float, SimRng};
use crate::scheduler::{Scheduler, TimerReason};

/// What a cell is moving toward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Cell(Entity),
    Dna(Entity),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Intent {
    #[default]
    Idle,
    Escaping(Entity),
    Hunting(Target),
}

/// Behavioral state and relations of a cell
#[derive(Component, Debug, Clone, Default)]
pub struct Brain {
    pub intent: Intent,
    /// Prey this cell is currently chasing
    pub hunting: Option<Entity>,
    /// Cells currently chasing this one
    pub predators: Vec<Entity>,
    /// Abandoned prey, not re-targeted until forgotten
    pub last_hunt: Option<Entity>,
    /// Heading offset while escaping
    pub jitter: f32,
    /// Angle the movement system steers toward; `None` for the player
    pub desired_heading: Option<f32>,
    pub hunt_idle_ms: f32,
    pub hunt_tolerance_ms: f32,
    pub last_hunt_distance: f32,
}

impl Brain {
    /// Drop the current prey. Returns it so the caller can patch its predator set.
    pub fn release_hunt(&mut self) -> Option<Entity> {
        let prey = self.hunting.take();
        if let Intent::Hunting(Target::Cell(_)) = self.intent {
            self.intent = Intent::Idle;
        }
        prey
    }

    pub fn is_hunted(&self) -> bool {
        !self.predators.is_empty()
    }

    pub fn is_escaping(&self) -> bool {
        matches!(self.intent, Intent::Escaping(_))
    }
}

/// Per-tick view of a cell used for perception
#[derive(Debug, Clone, Copy)]
pub struct CellView {
    pub entity: Entity,
    pub position: Vec2,
    pub level: u32,
    pub points: f32,
}

impl CellView {
    fn strength_against(&self, other: &CellView) -> Strength {
        compare_strength(self.level, self.points, other.level, other.points)
    }
}

/// Per-tick view of a DNA node
#[derive(Debug, Clone, Copy)]
pub struct DnaView {
    pub entity: Entity,
    pub position: Vec2,
    pub natural: bool,
    pub invincible: bool,
}

/// Nearest strictly stronger cell within `radius`
pub fn nearest_threat(me: &CellView, others: &[CellView], radius: f32) -> Option<(Entity, f32)> {
    others
        .iter()
        .filter(|other| other.entity != me.entity)
        .filter(|other| other.strength_against(me) == Strength::Stronger)
        .map(|other| (other.entity, me.position.distance(other.position)))
        .filter(|(_, distance)| *distance <= radius)
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

/// Nearest strictly weaker cell within `radius`, skipping `exclude`
pub fn nearest_prey(
    me: &CellView,
    others: &[CellView],
    radius: f32,
    exclude: Option<Entity>,
) -> Option<(Entity, f32)> {
    others
        .iter()
        .filter(|other| other.entity != me.entity && Some(other.entity) != exclude)
        .filter(|other| me.strength_against(other) == Strength::Stronger)
        .map(|other| (other.entity, me.position.distance(other.position)))
        .filter(|(_, distance)| *distance <= radius)
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

/// Nearest DNA node of the requested kind. Dead drops still invincible are skipped.
pub fn nearest_dna(
    position: Vec2,
    nodes: &[DnaView],
    natural: bool,
    radius: Option<f32>,
) -> Option<Entity> {
    nodes
        .iter()
        .filter(|node| node.natural == natural && !node.invincible)
        .map(|node| (node.entity, position.distance(node.position)))
        .filter(|(_, distance)| radius.is_none_or(|radius| *distance <= radius))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(entity, _)| entity)
}

/// Predator-set edits collected during the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    Chase { prey: Entity, hunter: Entity },
    Release { prey: Entity, hunter: Entity },
}

fn commit(brain: &mut Brain, scheduler: &mut Scheduler, rng: &mut impl Rng, intent: Intent) {
    brain.intent = intent;
    scheduler.cancel(TimerReason::IntentExpired);
    scheduler.after(
        random_float(rng, STATE_DURATION_MS.0, STATE_DURATION_MS.1),
        TimerReason::IntentExpired,
    );
}

fn start_hunt(
    brain: &mut Brain,
    scheduler: &mut Scheduler,
    rng: &mut impl Rng,
    prey: Entity,
    distance: f32,
) {
    brain.hunting = Some(prey);
    brain.intent = Intent::Hunting(Target::Cell(prey));
    brain.hunt_idle_ms = 0.0;
    brain.last_hunt_distance = distance;
    brain.hunt_tolerance_ms = random_float(rng, HUNT_TOLERANCE_MS.0, HUNT_TOLERANCE_MS.1);
    scheduler.cancel(TimerReason::HuntPatience);
    scheduler.schedule(HUNT_PATIENCE_INTERVAL_MS, TimerReason::HuntPatience, true, true);
}

fn angle_between(from: Vec2, to: Vec2) -> f32 {
    let delta = to - from;
    delta.y.atan2(delta.x)
}

/// Decision system, one pass per logic tick
pub fn decide(
    config: Res<SimConfig>,
    mut rng: ResMut<SimRng>,
    mut cells: Query<(Entity, &mut Cell, &mut Brain, &mut Scheduler, &Transform)>,
    nodes: Query<(Entity, &DnaPoint, &Transform)>,
) {
    let views: Vec<CellView> = cells
        .iter()
        .filter(|(_, cell, ..)| cell.is_alive())
        .map(|(entity, cell, _, _, transform)| CellView {
            entity,
            position: transform.translation.truncate(),
            level: cell.level,
            points: cell.points,
        })
        .collect();
    let by_entity: HashMap<Entity, CellView> = views.iter().map(|view| (view.entity, *view)).collect();
    let dna: Vec<DnaView> = nodes
        .iter()
        .map(|(entity, node, transform)| DnaView {
            entity,
            position: transform.translation.truncate(),
            natural: node.natural,
            invincible: node.is_invincible(),
        })
        .collect();
    let dna_positions: HashMap<Entity, &DnaView> = dna.iter().map(|node| (node.entity, node)).collect();

    let mut relations = Vec::new();

    for (entity, mut cell, mut brain, mut scheduler, _) in &mut cells {
        let Some(me) = by_entity.get(&entity).copied() else {
            continue;
        };
        let cell = &mut *cell;
        let brain = &mut *brain;
        let scheduler = &mut *scheduler;
        let rng = &mut *rng;

        // Invalid targets: clear and re-evaluate
        brain.predators.retain(|predator| by_entity.contains_key(predator));
        if brain.hunting.is_some_and(|prey| !by_entity.contains_key(&prey)) {
            brain.hunting = None;
        }
        let stale = match brain.intent {
            Intent::Idle => false,
            Intent::Escaping(threat) => !by_entity.contains_key(&threat),
            Intent::Hunting(Target::Cell(prey)) => !by_entity.contains_key(&prey),
            Intent::Hunting(Target::Dna(node)) => !dna_positions.contains_key(&node),
        };
        if stale {
            brain.intent = Intent::Idle;
            scheduler.cancel(TimerReason::IntentExpired);
        }

        if cell.is_player {
            detect_for_player(&me, &views, brain, config.player_detection_radius, &mut relations);
            brain.desired_heading = None;
            continue;
        }

        // 1. escape
        let intent = brain.intent;
        let fleeing = match intent {
            Intent::Escaping(threat) => by_entity.get(&threat).map(|threat| threat.entity),
            _ => {
                let radius = random_float(rng, ESCAPE_RADIUS_RANGE.0, ESCAPE_RADIUS_RANGE.1);
                nearest_threat(&me, &views, radius).map(|(threat, _)| {
                    trace!(cell = %cell.species, ?threat, "escaping");
                    commit(brain, scheduler, rng, Intent::Escaping(threat));
                    threat
                })
            }
        };
        if let Some(threat) = fleeing {
            if let Some(prey) = brain.release_hunt() {
                relations.push(Relation::Release { prey, hunter: entity });
            }
            brain.intent = Intent::Escaping(threat);
            let threat_position = by_entity.get(&threat).map_or(me.position, |threat| threat.position);
            let away = angle_between(threat_position, me.position);
            if !scheduler.is_pending(TimerReason::JitterEnd) {
                if coin_flip(rng) {
                    brain.jitter = random_float(rng, -JITTER_RANGE, JITTER_RANGE);
                }
                scheduler.after(JITTER_INTERVAL_MS, TimerReason::JitterEnd);
            }
            brain.desired_heading = Some(away + brain.jitter);
            cell.running = cell.stamina > 0.0;
            continue;
        }
        brain.jitter = 0.0;
        scheduler.cancel(TimerReason::JitterEnd);

        // 2. dead drops first
        let current_drop = match brain.intent {
            Intent::Hunting(Target::Dna(node)) => dna_positions.get(&node).filter(|node| !node.natural),
            _ => None,
        };
        let drop = match current_drop {
            Some(node) => Some(**node),
            None => nearest_dna(me.position, &dna, false, Some(DEAD_DROP_SEARCH_RADIUS))
                .and_then(|node| dna_positions.get(&node))
                .map(|node| {
                    commit(brain, scheduler, rng, Intent::Hunting(Target::Dna(node.entity)));
                    **node
                }),
        };
        if let Some(node) = drop {
            if let Some(prey) = brain.hunting.take() {
                relations.push(Relation::Release { prey, hunter: entity });
            }
            brain.desired_heading = Some(angle_between(me.position, node.position));
            cell.running = false;
            continue;
        }

        // 3. hunt
        let fit = cell.life > cell.max_life * HUNT_LIFE_FRACTION
            && cell.stamina > cell.max_stamina * HUNT_STAMINA_FRACTION;
        if fit {
            let current = brain
                .hunting
                .filter(|prey| Some(*prey) != brain.last_hunt)
                .and_then(|prey| by_entity.get(&prey))
                .filter(|prey| me.strength_against(prey) == Strength::Stronger)
                .map(|prey| (prey.entity, prey.position));
            let chase = match current {
                Some(prey) => Some(prey),
                None => {
                    if let Some(prey) = brain.hunting.take() {
                        relations.push(Relation::Release { prey, hunter: entity });
                    }
                    let radius = random_float(rng, HUNT_RADIUS_RANGE.0, HUNT_RADIUS_RANGE.1);
                    nearest_prey(&me, &views, radius, brain.last_hunt)
                        .and_then(|(prey, distance)| by_entity.get(&prey).map(|prey| (prey, distance)))
                        .map(|(prey, distance)| {
                            start_hunt(brain, scheduler, rng, prey.entity, distance);
                            relations.push(Relation::Chase { prey: prey.entity, hunter: entity });
                            (prey.entity, prey.position)
                        })
                }
            };
            if let Some((prey, prey_position)) = chase {
                let distance = me.position.distance(prey_position);
                brain.intent = Intent::Hunting(Target::Cell(prey));
                brain.desired_heading = Some(angle_between(me.position, prey_position));
                cell.running = distance < CHASE_RUN_DISTANCE
                    && cell.stamina > cell.max_stamina * BOT_RUN_STAMINA_FRACTION;
                continue;
            }
        } else if let Some(prey) = brain.release_hunt() {
            relations.push(Relation::Release { prey, hunter: entity });
        }

        // 4. natural DNA, no radius limit
        cell.running = false;
        let intent = brain.intent;
        let node = match intent {
            Intent::Hunting(Target::Dna(node)) => Some(node),
            _ => nearest_dna(me.position, &dna, true, None).inspect(|node| {
                commit(brain, scheduler, rng, Intent::Hunting(Target::Dna(*node)));
            }),
        };
        brain.desired_heading = node
            .and_then(|node| dna_positions.get(&node))
            .map(|node| angle_between(me.position, node.position));
    }

    for relation in relations {
        match relation {
            Relation::Chase { prey, hunter } => {
                if let Ok((_, _, mut brain, ..)) = cells.get_mut(prey) {
                    if !brain.predators.contains(&hunter) {
                        brain.predators.push(hunter);
                    }
                }
            }
            Relation::Release { prey, hunter } => {
                if let Ok((_, _, mut brain, ..)) = cells.get_mut(prey) {
                    brain.predators.retain(|predator| *predator != hunter);
                }
            }
        }
    }
}

/// The player never steers automatically; it only tracks the nearest weaker cell
/// inside its view so the host can show who it could hunt.
fn detect_for_player(
    me: &CellView,
    views: &[CellView],
    brain: &mut Brain,
    radius: f32,
    relations: &mut Vec<Relation>,
) {
    let found = nearest_prey(me, views, radius, None).map(|(prey, _)| prey);
    if found == brain.hunting {
        return;
    }
    if let Some(prey) = brain.hunting.take() {
        relations.push(Relation::Release { prey, hunter: me.entity });
    }
    if let Some(prey) = found {
        brain.hunting = Some(prey);
        relations.push(Relation::Chase { prey, hunter: me.entity });
    }
}
