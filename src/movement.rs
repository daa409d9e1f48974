use std::f32::consts::{PI, TAU};

use bevy::prelude::*;

use crate::cell::Cell;
use crate::config::*;
use crate::decision::Brain;
use crate::effects::{Effect, EffectCause, Effects, Stat};

/// Keyboard state for the player cell. Filled from bevy input when present,
/// otherwise written directly by the host.
#[derive(Resource, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlayerInput {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub run: bool,
}

impl PlayerInput {
    /// Unit movement vector, zero when no key is held
    pub fn direction(&self) -> Vec2 {
        let mut direction = Vec2::ZERO;
        if self.up {
            direction.y += 1.0;
        }
        if self.down {
            direction.y -= 1.0;
        }
        if self.left {
            direction.x -= 1.0;
        }
        if self.right {
            direction.x += 1.0;
        }
        direction.normalize_or_zero()
    }
}

pub fn read_player_input(keys: Option<Res<ButtonInput<KeyCode>>>, mut input: ResMut<PlayerInput>) {
    let Some(keys) = keys else {
        return;
    };
    *input = PlayerInput {
        up: keys.pressed(KeyCode::KeyW),
        down: keys.pressed(KeyCode::KeyS),
        left: keys.pressed(KeyCode::KeyA),
        right: keys.pressed(KeyCode::KeyD),
        run: keys.any_pressed([KeyCode::ShiftLeft, KeyCode::ShiftRight]),
    };
}

/// Turn `heading` toward `desired` by at most `rate` radians, along the shorter side
pub fn steer(heading: f32, desired: f32, rate: f32) -> f32 {
    let mut diff = (desired - heading).rem_euclid(TAU);
    if diff > PI {
        diff -= TAU;
    }
    (heading + diff.clamp(-rate, rate)).rem_euclid(TAU)
}

/// Unit push toward the interior for a cell touching an edge
pub fn edge_push(position: Vec2, config: &SimConfig) -> Vec2 {
    let mut push = Vec2::ZERO;
    if position.x <= EDGE_CLEARANCE {
        push.x += 1.0;
    } else if position.x >= config.map_width - EDGE_CLEARANCE {
        push.x -= 1.0;
    }
    if position.y <= EDGE_CLEARANCE {
        push.y += 1.0;
    } else if position.y >= config.map_height - EDGE_CLEARANCE {
        push.y -= 1.0;
    }
    push
}

/// Rebuild the natural effects (running, exhaustion) and the effective stats
pub fn refresh_effects(mut cells: Query<(&mut Cell, &mut Effects)>) {
    for (mut cell, mut effects) in cells.iter_mut() {
        let mut natural = Vec::new();
        if cell.running && cell.stamina > 0.0 {
            natural.push(Effect::natural(
                Stat::Speed,
                cell.base_speed * RUN_SPEED_BONUS,
                EffectCause::Running,
                "Running",
            ));
        }
        if cell.stamina < cell.max_stamina * EXHAUSTED_FRACTION {
            natural.push(Effect::natural(
                Stat::Speed,
                -cell.base_speed * EXHAUSTED_SPEED_PENALTY,
                EffectCause::Exhaustion,
                "Exhausted: slower",
            ));
        }
        effects.replace_natural(natural);
        cell.refresh_effective(&effects);
    }
}

/// Stamina change over `dt` seconds
pub fn stamina_delta(cell: &Cell, moving: bool, dt: f32) -> f32 {
    if cell.running && moving {
        -cell.run_cost * dt
    } else if moving {
        (cell.stamina_recovery - cell.walk_cost) * dt
    } else {
        cell.stamina_recovery * dt
    }
}

pub fn move_cells(
    config: Res<SimConfig>,
    input: Res<PlayerInput>,
    mut cells: Query<(&mut Cell, &Brain, &mut Transform)>,
) {
    let dt = config.tick_secs();
    let min = Vec2::splat(EDGE_CLEARANCE);
    let max = Vec2::new(
        config.map_width - EDGE_CLEARANCE,
        config.map_height - EDGE_CLEARANCE,
    );

    for (mut cell, brain, mut transform) in cells.iter_mut() {
        if !cell.is_alive() {
            continue;
        }
        let position = transform.translation.truncate();

        let heading = if cell.is_player {
            cell.running = input.run && cell.stamina > 0.0;
            input.direction()
        } else {
            if let Some(desired) = brain.desired_heading {
                cell.heading = steer(cell.heading, desired, TURN_RATE);
            }
            Vec2::from_angle(cell.heading)
        };

        let direction = (heading + edge_push(position, &config)).normalize_or_zero();
        let moving = direction != Vec2::ZERO;
        if cell.is_player && heading != Vec2::ZERO {
            cell.heading = heading.to_angle();
        }

        let next = (position + direction * cell.speed * dt).clamp(min, max);
        transform.translation.x = next.x;
        transform.translation.y = next.y;
        transform.rotation = Quat::from_rotation_z(cell.heading);

        let delta = stamina_delta(&cell, moving, dt);
        cell.stamina += delta;
        cell.clamp_vitals();
        if cell.stamina <= 0.0 {
            cell.running = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagonal_input_is_normalized() {
        let input = PlayerInput {
            up: true,
            right: true,
            ..default()
        };
        let direction = input.direction();
        assert!((direction.length() - 1.0).abs() < 1e-5);
        assert!(direction.x > 0.0 && direction.y > 0.0);

        let opposed = PlayerInput {
            left: true,
            right: true,
            ..default()
        };
        assert_eq!(opposed.direction(), Vec2::ZERO);
    }

    #[test]
    fn steering_is_rate_limited_and_takes_short_way() {
        let heading = steer(0.0, 1.0, 0.05);
        assert!((heading - 0.05).abs() < 1e-6);

        // from just above 0 to just below TAU: turn clockwise through 0
        let heading = steer(0.1, TAU - 0.1, 0.05);
        assert!((heading - 0.05).abs() < 1e-5);

        // close enough: snap onto the target
        let heading = steer(1.0, 1.02, 0.05);
        assert!((heading - 1.02).abs() < 1e-5);
    }

    #[test]
    fn edges_push_inward() {
        let config = SimConfig::default();
        assert_eq!(edge_push(Vec2::new(5.0, 500.0), &config), Vec2::new(1.0, 0.0));
        assert_eq!(
            edge_push(Vec2::new(config.map_width - 2.0, config.map_height), &config),
            Vec2::new(-1.0, -1.0)
        );
        assert_eq!(edge_push(Vec2::splat(500.0), &config), Vec2::ZERO);
    }

    #[test]
    fn running_drains_walking_recovers() {
        let mut cell = Cell::with_threshold("t", false, 100.0);
        cell.running = true;
        assert!(stamina_delta(&cell, true, 1.0) < 0.0);
        assert_eq!(stamina_delta(&cell, false, 1.0), STAMINA_RECOVERY);
        cell.running = false;
        assert_eq!(stamina_delta(&cell, true, 1.0), STAMINA_RECOVERY - WALK_COST);
    }

    #[test]
    fn exhaustion_slows_and_running_speeds_up() {
        let mut world = World::new();
        let mut cell = Cell::with_threshold("t", false, 100.0);
        cell.running = true;
        let runner = world.spawn((cell.clone(), Effects::default())).id();
        cell.running = false;
        cell.stamina = 1.0;
        let tired = world.spawn((cell, Effects::default())).id();

        let mut schedule = Schedule::default();
        schedule.add_systems(refresh_effects);
        schedule.run(&mut world);

        let runner = world.get::<Cell>(runner).unwrap();
        assert_eq!(runner.speed, STARTING_SPEED * (1.0 + RUN_SPEED_BONUS));
        let tired = world.get::<Cell>(tired).unwrap();
        assert_eq!(tired.speed, STARTING_SPEED * (1.0 - EXHAUSTED_SPEED_PENALTY));
    }
}
