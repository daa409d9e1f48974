use std::time::Duration;

use bevy::prelude::*;
use rand::Rng;
use tracing::trace;

use crate::cell::Cell;
use crate::config::*;
use crate::rng::{random_float, random_int, SimRng};

/// DNA node: a passive point pickup
#[derive(Component, Debug, Clone)]
pub struct DnaPoint {
    pub points: f32,
    pub booster: f32,
    /// Natural nodes are world-seeded and replaced as soon as they disappear
    pub natural: bool,
    /// Dead drops can't be picked up until this finishes
    pub invincible: Option<Timer>,
}

impl DnaPoint {
    pub fn natural(rng: &mut impl Rng) -> Self {
        Self {
            points: random_int(rng, NATURAL_POINTS_RANGE.0, NATURAL_POINTS_RANGE.1) as f32,
            booster: random_int(rng, NATURAL_BOOSTER_RANGE.0, NATURAL_BOOSTER_RANGE.1) as f32,
            natural: true,
            invincible: None,
        }
    }

    pub fn dead_drop() -> Self {
        Self {
            points: DEAD_DROP_POINTS,
            booster: DEAD_DROP_BOOSTER,
            natural: false,
            invincible: Some(Timer::new(
                Duration::from_millis(DEAD_DROP_INVINCIBLE_MS),
                TimerMode::Once,
            )),
        }
    }

    pub fn is_invincible(&self) -> bool {
        self.invincible.as_ref().is_some_and(|timer| !timer.finished())
    }

    /// Points, life and stamina a harvester with the given multiplier receives
    pub fn yield_for(&self, harvesting: f32) -> Harvest {
        Harvest {
            points: self.points * self.booster * harvesting,
            life: (self.points * HARVEST_LIFE_FACTOR * harvesting).floor(),
            stamina: self.points * HARVEST_STAMINA_FACTOR * harvesting,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Harvest {
    pub points: f32,
    pub life: f32,
    pub stamina: f32,
}

impl Harvest {
    pub fn apply(&self, cell: &mut Cell) {
        cell.add_points(self.points);
        cell.life += self.life;
        cell.stamina += self.stamina;
        cell.clamp_vitals();
    }
}

fn clamp_to_field(position: Vec2, config: &SimConfig) -> Vec2 {
    Vec2::new(
        position
            .x
            .clamp(DNA_EDGE_CLEARANCE, config.map_width - DNA_EDGE_CLEARANCE),
        position
            .y
            .clamp(DNA_EDGE_CLEARANCE, config.map_height - DNA_EDGE_CLEARANCE),
    )
}

pub fn spawn_natural_dna(commands: &mut Commands, rng: &mut SimRng, config: &SimConfig) -> Entity {
    let position = Vec2::new(
        random_float(rng, DNA_EDGE_CLEARANCE, config.map_width - DNA_EDGE_CLEARANCE),
        random_float(rng, DNA_EDGE_CLEARANCE, config.map_height - DNA_EDGE_CLEARANCE),
    );
    commands
        .spawn((
            DnaPoint::natural(rng),
            Transform::from_xyz(position.x, position.y, 0.0),
        ))
        .id()
}

/// Spawn one dead-drop node scattered around `origin`
pub fn spawn_dead_drop(
    commands: &mut Commands,
    rng: &mut SimRng,
    config: &SimConfig,
    origin: Vec2,
) -> Entity {
    let offset = Vec2::new(
        random_float(rng, -DEAD_DROP_SCATTER, DEAD_DROP_SCATTER),
        random_float(rng, -DEAD_DROP_SCATTER, DEAD_DROP_SCATTER),
    );
    let position = clamp_to_field(origin + offset, config);
    commands
        .spawn((
            DnaPoint::dead_drop(),
            Transform::from_xyz(position.x, position.y, 0.0),
        ))
        .id()
}

/// Harvest check: the first cell touching a node takes it. Natural nodes are replaced.
pub fn harvest_dna(
    mut commands: Commands,
    config: Res<SimConfig>,
    mut rng: ResMut<SimRng>,
    mut nodes: Query<(Entity, &mut DnaPoint, &Transform)>,
    mut cells: Query<(&mut Cell, &Transform)>,
) {
    let delta = config.tick_duration();

    for (entity, mut node, transform) in nodes.iter_mut() {
        let position = transform.translation.truncate();

        if config.out_of_bounds(position.x, position.y) {
            commands.entity(entity).despawn();
            if node.natural {
                spawn_natural_dna(&mut commands, &mut rng, &config);
            }
            continue;
        }

        // Dead drops are untouchable for their first moments
        if node.is_invincible() {
            if let Some(timer) = node.invincible.as_mut() {
                timer.tick(delta);
            }
            continue;
        }

        let harvester = cells.iter_mut().find(|(cell, cell_transform)| {
            cell.is_alive()
                && cell_transform.translation.truncate().distance(position) <= DNA_RADIUS + cell.size - 1.0
        });
        let Some((mut cell, _)) = harvester else {
            continue;
        };

        let harvest = node.yield_for(cell.dna_harvesting);
        harvest.apply(&mut cell);
        trace!(cell = %cell.species, points = harvest.points, natural = node.natural, "dna harvested");

        commands.entity(entity).despawn();
        if node.natural {
            spawn_natural_dna(&mut commands, &mut rng, &config);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yield_scales_with_booster_and_harvesting() {
        let node = DnaPoint {
            points: 8.0,
            booster: 3.0,
            natural: true,
            invincible: None,
        };
        let harvest = node.yield_for(2.0);
        assert_eq!(harvest.points, 48.0);
        // 8 * 0.1 * 2 = 1.6, floored
        assert_eq!(harvest.life, 1.0);
        assert_eq!(harvest.stamina, 8.0);
    }

    #[test]
    fn harvest_respects_caps() {
        let mut cell = Cell::with_threshold("t", false, 100.0);
        cell.life = cell.max_life;
        cell.stamina = cell.max_stamina - 1.0;
        Harvest {
            points: 5.0,
            life: 3.0,
            stamina: 4.0,
        }
        .apply(&mut cell);
        assert_eq!(cell.life, cell.max_life);
        assert_eq!(cell.stamina, cell.max_stamina);
        assert_eq!(cell.points, 5.0);
        assert_eq!(cell.total_points, 5.0);
    }

    #[test]
    fn natural_nodes_roll_inside_ranges() {
        let mut rng = SimRng::seeded(11);
        for _ in 0..100 {
            let node = DnaPoint::natural(&mut rng);
            assert!((1.0..=10.0).contains(&node.points));
            assert!((1.0..=3.0).contains(&node.booster));
            assert!(!node.is_invincible());
        }
        assert!(DnaPoint::dead_drop().is_invincible());
    }

    #[test]
    fn dead_drop_opens_after_its_window() {
        let mut drop = DnaPoint::dead_drop();
        let timer = drop.invincible.as_mut().unwrap();
        timer.tick(Duration::from_millis(399));
        assert!(drop.is_invincible());
        drop.invincible.as_mut().unwrap().tick(Duration::from_millis(1));
        assert!(!drop.is_invincible());
    }
}
