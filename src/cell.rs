use std::collections::{HashMap, HashSet};

use bevy::prelude::*;
use rand::Rng;
use tracing::{debug, info};

use crate::config::*;
use crate::decision::{Brain, Intent};
use crate::dna::{spawn_dead_drop, spawn_natural_dna};
use crate::effects::{EffectCause, Effects, Stat};
use crate::follow::FollowTarget;
use crate::rng::{random_float, random_int, SimRng};
use crate::scheduler::{Scheduler, TimerReason};
use crate::upgrades::{default_caps, Attribute};

pub const PLAYER_SPECIES: &str = "Astuto";
pub const BOT_SPECIES_PREFIX: &str = "Alpha";

/// Marker for the keyboard-driven cell
#[derive(Component)]
pub struct Player;

/// Role a cell had in its last contact, used for kill messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactRole {
    Attack,
    Defense,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contact {
    pub other: Entity,
    pub role: ContactRole,
}

/// Relative strength of one cell against another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strength {
    Stronger,
    Weaker,
    Even,
}

/// Compare by level first; equal levels need a points lead above `level × 50`.
pub fn compare_strength(level: u32, points: f32, other_level: u32, other_points: f32) -> Strength {
    if level > other_level {
        return Strength::Stronger;
    }
    if level < other_level {
        return Strength::Weaker;
    }
    let margin = level as f32 * STRENGTH_MARGIN_PER_LEVEL;
    if points > other_points + margin {
        Strength::Stronger
    } else if points < other_points - margin {
        Strength::Weaker
    } else {
        Strength::Even
    }
}

/// Cell component: every attribute the simulation and the host read
#[derive(Component, Debug, Clone)]
pub struct Cell {
    pub species: String,
    pub is_player: bool,
    pub heading: f32,

    pub life: f32,
    pub max_life: f32,
    pub base_defense: f32,
    pub defense: f32,
    pub base_damage: f32,
    pub damage: f32,
    pub base_speed: f32,
    pub speed: f32,
    pub life_recovery: f32,

    pub stamina: f32,
    pub max_stamina: f32,
    pub stamina_recovery: f32,
    pub walk_cost: f32,
    pub run_cost: f32,

    pub size: f32,
    pub points: f32,
    pub total_points: f32,
    pub level: u32,
    pub next_level: f32,
    pub kills: u32,
    pub dna_harvesting: f32,

    pub reduce_speed: bool,
    pub reduce_speed_by: f32,
    pub attack_cooldown_ms: f32,
    pub full_defense_cooldown_ms: f32,
    pub adrenaline_speed_buff: f32,
    pub adrenaline_damage_buff: f32,
    pub adrenaline_time: f32,
    pub multiplier_max_value: f32,
    pub caps: HashMap<Attribute, f32>,

    pub attack_ready: bool,
    pub full_defense: bool,
    pub running: bool,
    pub adrenaline: bool,

    pub rare_pity: u32,
    pub epic_pity: u32,

    pub speed_per_second: f32,
    pub last_sample: Vec2,
    pub last_contact: Option<Contact>,
    pub success_hunt: bool,
}

impl Cell {
    pub fn new(species: impl Into<String>, is_player: bool, rng: &mut impl Rng) -> Self {
        let mut cell = Self::with_threshold(species, is_player, FIRST_LEVEL_RANGE.0 as f32);
        cell.next_level = random_int(rng, FIRST_LEVEL_RANGE.0, FIRST_LEVEL_RANGE.1) as f32;
        cell.heading = random_float(rng, 0.0, std::f32::consts::TAU);
        cell
    }

    /// Deterministic constructor with a fixed first threshold
    pub fn with_threshold(species: impl Into<String>, is_player: bool, next_level: f32) -> Self {
        Self {
            species: species.into(),
            is_player,
            heading: 0.0,
            life: STARTING_LIFE,
            max_life: STARTING_LIFE,
            base_defense: STARTING_DEFENSE,
            defense: STARTING_DEFENSE,
            base_damage: STARTING_DAMAGE,
            damage: STARTING_DAMAGE,
            base_speed: STARTING_SPEED,
            speed: STARTING_SPEED,
            life_recovery: 0.0,
            stamina: STARTING_STAMINA,
            max_stamina: STARTING_STAMINA,
            stamina_recovery: STAMINA_RECOVERY,
            walk_cost: WALK_COST,
            run_cost: RUN_COST,
            size: STARTING_SIZE,
            points: 0.0,
            total_points: 0.0,
            level: 1,
            next_level,
            kills: 0,
            dna_harvesting: 1.0,
            reduce_speed: true,
            reduce_speed_by: REDUCE_SPEED_BY,
            attack_cooldown_ms: ATTACK_COOLDOWN_MS,
            full_defense_cooldown_ms: FULL_DEFENSE_COOLDOWN_MS,
            adrenaline_speed_buff: ADRENALINE_SPEED_BUFF,
            adrenaline_damage_buff: ADRENALINE_DAMAGE_BUFF,
            adrenaline_time: ADRENALINE_TIME_SECS,
            multiplier_max_value: MULTIPLIER_MAX_VALUE,
            caps: default_caps(),
            attack_ready: true,
            full_defense: false,
            running: false,
            adrenaline: false,
            rare_pity: 0,
            epic_pity: 0,
            speed_per_second: 0.0,
            last_sample: Vec2::ZERO,
            last_contact: None,
            success_hunt: false,
        }
    }

    /// Life is floored before the check, so a sliver below 1 is already dead
    pub fn is_alive(&self) -> bool {
        self.life.floor() > 0.0
    }

    pub fn radius(&self) -> f32 {
        self.size
    }

    pub fn strength_against(&self, other: &Cell) -> Strength {
        compare_strength(self.level, self.points, other.level, other.points)
    }

    pub fn add_points(&mut self, amount: f32) {
        self.points += amount;
        if amount > 0.0 {
            self.total_points += amount;
        }
    }

    pub fn clamp_vitals(&mut self) {
        self.life = self.life.clamp(0.0, self.max_life);
        self.stamina = self.stamina.clamp(0.0, self.max_stamina);
    }

    pub fn cap(&self, attribute: Attribute) -> Option<f32> {
        self.caps.get(&attribute).copied()
    }

    /// Recompute current speed/damage/defense from base values plus active effects
    pub fn refresh_effective(&mut self, effects: &Effects) {
        self.speed = (self.base_speed + effects.sum(Stat::Speed)).max(0.0);
        self.damage = (self.base_damage + effects.sum(Stat::Damage)).max(0.0);
        self.defense = (self.base_defense + effects.sum(Stat::Defense)).clamp(0.0, 100.0);
    }

    pub fn effective_life_recovery(&self, effects: &Effects) -> f32 {
        self.life_recovery + effects.sum(Stat::LifeRecovery)
    }

    /// Apply one level transition if the threshold is reached.
    ///
    /// Only one level is gained per call; leftover points carry over.
    pub fn advance_level(&mut self, rng: &mut impl Rng) -> bool {
        if self.points < self.next_level {
            return false;
        }
        self.rare_pity += 1;
        self.epic_pity += 1;
        self.points -= self.next_level;
        self.level += 1;
        if self.reduce_speed {
            self.base_speed -= self.base_speed * (self.reduce_speed_by / 100.0);
        }
        self.size += self.size * SIZE_GROWTH_PER_LEVEL;
        self.walk_cost += self.walk_cost * MOVEMENT_COST_GROWTH;
        self.run_cost += self.run_cost * MOVEMENT_COST_GROWTH;
        self.next_level =
            random_int(rng, LEVEL_THRESHOLD_RANGE.0, LEVEL_THRESHOLD_RANGE.1) as f32 * self.level as f32;
        if self.level % CAP_SCALE_EVERY == 0 {
            self.scale_caps();
        }
        true
    }

    fn scale_caps(&mut self) {
        let factor = self.multiplier_max_value;
        for cap in self.caps.values_mut() {
            *cap *= factor;
        }
    }
}

/// Population bookkeeping exposed to the host
#[derive(Resource, Debug, Default, Clone)]
pub struct PopulationStats {
    pub alive: usize,
    pub spawned: usize,
    pub respawned: usize,
    pub deaths: usize,
    pub out_of_bounds: usize,
    next_serial: usize,
}

impl PopulationStats {
    pub fn next_species(&mut self) -> String {
        self.next_serial += 1;
        format!("{}-{}", BOT_SPECIES_PREFIX, self.next_serial)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathCause {
    Killed,
    OutOfBounds,
}

/// Sent when a cell leaves the simulation. `follow` is where the host camera/UI should move
/// if it was following this cell.
#[derive(Event, Debug, Clone)]
pub struct CellDied {
    pub cell: Entity,
    pub species: String,
    pub killer: Option<Entity>,
    pub cause: DeathCause,
    pub follow: Option<Entity>,
}

/// Every component a live cell carries
pub fn cell_bundle(cell: Cell, position: Vec2) -> (Cell, Brain, Effects, Scheduler, Transform) {
    let mut scheduler = Scheduler::default();
    scheduler.every(SPEED_SAMPLE_MS, TimerReason::SpeedSample);
    scheduler.every(REGENERATION_MS, TimerReason::Regeneration);

    let rotation = Quat::from_rotation_z(cell.heading);
    let mut cell = cell;
    cell.last_sample = position;
    (
        cell,
        Brain::default(),
        Effects::default(),
        scheduler,
        Transform::from_xyz(position.x, position.y, 0.0).with_rotation(rotation),
    )
}

pub fn random_position(rng: &mut impl Rng, config: &SimConfig, clearance: f32) -> Vec2 {
    Vec2::new(
        random_float(rng, clearance, config.map_width - clearance),
        random_float(rng, clearance, config.map_height - clearance),
    )
}

pub fn spawn_bot(
    commands: &mut Commands,
    rng: &mut SimRng,
    config: &SimConfig,
    stats: &mut PopulationStats,
) -> Entity {
    let species = stats.next_species();
    let cell = Cell::new(species, false, rng);
    let position = random_position(rng, config, EDGE_CLEARANCE);
    stats.spawned += 1;
    commands.spawn(cell_bundle(cell, position)).id()
}

/// Startup system: natural DNA, bots and the player
pub fn spawn_world(
    mut commands: Commands,
    config: Res<SimConfig>,
    mut rng: ResMut<SimRng>,
    mut stats: ResMut<PopulationStats>,
    mut follow: ResMut<FollowTarget>,
) {
    for _ in 0..config.natural_dna {
        spawn_natural_dna(&mut commands, &mut rng, &config);
    }

    if config.spawn_player {
        let cell = Cell::new(PLAYER_SPECIES, true, &mut *rng);
        let position = random_position(&mut *rng, &config, EDGE_CLEARANCE);
        let player = commands.spawn((cell_bundle(cell, position), Player)).id();
        stats.spawned += 1;
        follow.entity = Some(player);
    }

    for _ in 0..config.initial_bots {
        spawn_bot(&mut commands, &mut rng, &config, &mut stats);
    }

    info!(
        bots = config.initial_bots,
        dna = config.natural_dna,
        player = config.spawn_player,
        "world spawned"
    );
}

/// Run every cell's timers and dispatch what fired
pub fn tick_timers(
    config: Res<SimConfig>,
    mut rng: ResMut<SimRng>,
    mut cells: Query<(Entity, &mut Cell, &mut Brain, &mut Effects, &mut Scheduler, &Transform)>,
) {
    let delta = config.tick_duration();
    let positions: HashMap<Entity, Vec2> = cells
        .iter()
        .map(|(entity, .., transform)| (entity, transform.translation.truncate()))
        .collect();
    let mut released: Vec<(Entity, Entity)> = Vec::new();

    for (entity, mut cell, mut brain, mut effects, mut scheduler, transform) in &mut cells {
        let position = transform.translation.truncate();
        let cell = &mut *cell;
        let brain = &mut *brain;
        let effects = &mut *effects;
        let rng = &mut *rng;

        scheduler.tick(delta, |reason, scheduler| match reason {
            TimerReason::AttackReady => {
                cell.attack_ready = true;
                false
            }
            TimerReason::FullDefenseEnd => {
                cell.full_defense = false;
                false
            }
            TimerReason::AdrenalineEnd => {
                cell.adrenaline = false;
                effects.remove_cause(EffectCause::Adrenaline);
                cell.refresh_effective(effects);
                false
            }
            TimerReason::IntentExpired => {
                brain.intent = Intent::Idle;
                false
            }
            TimerReason::JitterEnd => {
                brain.jitter = 0.0;
                false
            }
            TimerReason::ForgetLastHunt => {
                brain.last_hunt = None;
                false
            }
            TimerReason::SpeedSample => {
                cell.speed_per_second = position.distance(cell.last_sample).floor();
                cell.last_sample = position;
                false
            }
            TimerReason::Regeneration => {
                if cell.life < cell.max_life {
                    cell.life += cell.effective_life_recovery(effects);
                }
                if cell.points > 0.0 {
                    cell.points = (cell.points - POINT_DECAY).max(0.0);
                }
                cell.clamp_vitals();
                false
            }
            TimerReason::HuntPatience => {
                let (done, abandoned) =
                    check_hunt_progress(cell, brain, position, &positions, rng, scheduler);
                if let Some(prey) = abandoned {
                    released.push((entity, prey));
                }
                done
            }
        });
    }

    for (hunter, prey) in released {
        if let Ok((_, _, mut prey_brain, ..)) = cells.get_mut(prey) {
            prey_brain.predators.retain(|predator| *predator != hunter);
        }
    }
}

/// Hunt patience check. Returns `(done, abandoned_prey)`; `done` ends the repeating timer.
pub fn check_hunt_progress(
    cell: &mut Cell,
    brain: &mut Brain,
    position: Vec2,
    positions: &HashMap<Entity, Vec2>,
    rng: &mut impl Rng,
    scheduler: &mut Scheduler,
) -> (bool, Option<Entity>) {
    let Some(prey) = brain.hunting else {
        brain.hunt_idle_ms = 0.0;
        cell.success_hunt = false;
        return (true, None);
    };
    let Some(prey_position) = positions.get(&prey) else {
        brain.release_hunt();
        brain.hunt_idle_ms = 0.0;
        return (true, Some(prey));
    };

    let distance = position.distance(*prey_position);
    if distance < brain.last_hunt_distance - HUNT_PROGRESS_MIN || cell.success_hunt {
        brain.hunt_idle_ms = 0.0;
        cell.success_hunt = false;
    } else {
        brain.hunt_idle_ms += HUNT_PATIENCE_INTERVAL_MS;
    }
    brain.last_hunt_distance = distance;

    if brain.hunt_idle_ms < brain.hunt_tolerance_ms {
        return (false, None);
    }

    debug!(prey = ?prey, "hunt abandoned");
    brain.last_hunt = Some(prey);
    brain.release_hunt();
    brain.hunt_idle_ms = 0.0;
    brain.hunt_tolerance_ms = random_float(rng, HUNT_TOLERANCE_MS.0, HUNT_TOLERANCE_MS.1);
    scheduler.cancel(TimerReason::ForgetLastHunt);
    scheduler.after(
        random_float(rng, FORGET_HUNT_MS.0, FORGET_HUNT_MS.1),
        TimerReason::ForgetLastHunt,
    );
    (true, Some(prey))
}

/// Remove dead and out-of-bounds cells, dropping DNA for the dead ones
pub fn cull_cells(
    mut commands: Commands,
    config: Res<SimConfig>,
    mut rng: ResMut<SimRng>,
    mut stats: ResMut<PopulationStats>,
    mut follow: ResMut<FollowTarget>,
    mut died: EventWriter<CellDied>,
    mut cells: Query<(Entity, &mut Cell, &Transform)>,
) {
    let mut dead = Vec::new();
    let mut lost = Vec::new();
    for (entity, cell, transform) in &cells {
        let position = transform.translation.truncate();
        if config.out_of_bounds(position.x, position.y) {
            lost.push(entity);
        } else if !cell.is_alive() {
            dead.push(entity);
        }
    }
    if dead.is_empty() && lost.is_empty() {
        return;
    }

    let leaving: HashSet<Entity> = dead.iter().chain(lost.iter()).copied().collect();
    let survivor = cells
        .iter()
        .find(|(entity, cell, _)| !leaving.contains(entity) && cell.is_alive())
        .map(|(entity, ..)| entity);

    for entity in dead {
        let (species, level, position, contact) = {
            let Ok((_, mut cell, transform)) = cells.get_mut(entity) else {
                continue;
            };
            cell.life = 0.0;
            (
                cell.species.clone(),
                cell.level,
                transform.translation.truncate(),
                cell.last_contact,
            )
        };

        let killer = contact
            .map(|contact| contact.other)
            .filter(|other| !leaving.contains(other) && cells.contains(*other));
        let mut killer_species = String::from("nobody");
        if let Some(killer) = killer {
            if let Ok((_, mut killer_cell, _)) = cells.get_mut(killer) {
                killer_cell.kills += 1;
                killer_cell.add_points(KILL_BONUS_PER_LEVEL * level as f32);
                killer_species = killer_cell.species.clone();
            }
        }
        let reason = match contact.map(|contact| contact.role) {
            Some(ContactRole::Attack) => "attacking him",
            _ => "trying to escape",
        };
        info!("{} was killed by {} while {}", species, killer_species, reason);

        for _ in 0..=(level * DROPS_PER_LEVEL) {
            spawn_dead_drop(&mut commands, &mut rng, &config, position);
        }

        let next = killer.or(survivor);
        let follow_next = if follow.is_following(entity) {
            follow.retarget(next)
        } else {
            None
        };

        commands.entity(entity).despawn();
        stats.deaths += 1;
        died.send(CellDied {
            cell: entity,
            species,
            killer,
            cause: DeathCause::Killed,
            follow: follow_next,
        });
    }

    for entity in lost {
        let Ok((_, cell, _)) = cells.get(entity) else {
            continue;
        };
        let species = cell.species.clone();
        debug!(species = %species, "cell left the map");

        let follow_next = if follow.is_following(entity) {
            follow.retarget(survivor)
        } else {
            None
        };

        commands.entity(entity).despawn();
        stats.out_of_bounds += 1;
        died.send(CellDied {
            cell: entity,
            species,
            killer: None,
            cause: DeathCause::OutOfBounds,
            follow: follow_next,
        });
    }
}

/// Respawn bots until the population floor is met
pub fn maintain_population(
    mut commands: Commands,
    config: Res<SimConfig>,
    mut rng: ResMut<SimRng>,
    mut stats: ResMut<PopulationStats>,
    cells: Query<&Cell>,
) {
    let alive = cells.iter().filter(|cell| cell.is_alive()).count();
    let bots = cells
        .iter()
        .filter(|cell| !cell.is_player && cell.is_alive())
        .count();

    let missing = config.min_population.saturating_sub(bots);
    for _ in 0..missing {
        spawn_bot(&mut commands, &mut rng, &config, &mut stats);
    }
    if missing > 0 {
        stats.respawned += missing;
        info!(respawned = missing, "population floor restored");
    }
    stats.alive = alive + missing;
}
