use bevy::prelude::*;
use tracing::trace;

use crate::cell::{Cell, Contact, ContactRole, Strength};
use crate::config::*;
use crate::decision::Brain;
use crate::effects::{Effect, EffectCause, Effects, Stat};
use crate::scheduler::{Scheduler, TimerReason};

/// Damage after defense, floored at the attacker's level and capped at the target's max life
pub fn damage_dealt(raw: f32, target_defense: f32, attacker_level: u32, target_max_life: f32) -> f32 {
    let reduced = raw - raw * (target_defense / 100.0);
    reduced.max(attacker_level as f32).min(target_max_life)
}

pub fn in_contact(a: Vec2, a_radius: f32, b: Vec2, b_radius: f32) -> bool {
    a.distance(b) <= a_radius + b_radius - CONTACT_OVERLAP
}

/// Push two centers apart along their contact normal, keeping both inside the edge clearance
pub fn separate(a: Vec2, b: Vec2, impulse: f32, config: &SimConfig) -> (Vec2, Vec2) {
    let normal = (b - a).try_normalize().unwrap_or(Vec2::X);
    let min = Vec2::splat(EDGE_CLEARANCE);
    let max = Vec2::new(
        config.map_width - EDGE_CLEARANCE,
        config.map_height - EDGE_CLEARANCE,
    );
    (
        (a - normal * impulse).clamp(min, max),
        (b + normal * impulse).clamp(min, max),
    )
}

/// Mutable view of one side of a contact
pub struct Fighter<'a> {
    pub entity: Entity,
    pub cell: &'a mut Cell,
    pub effects: &'a mut Effects,
    pub scheduler: &'a mut Scheduler,
    /// Prey the fighter was chasing, for the successful-hunt flag
    pub hunting: Option<Entity>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Exchange {
    /// The stronger side hit and the weaker countered
    FullAttack {
        attacker: Entity,
        victim: Entity,
        damage: f32,
        counter: f32,
    },
    /// Even strength: both take a third
    Clash,
    /// Attacker on cooldown or victim shielded
    Blocked,
}

pub fn resolve_contact(a: &mut Fighter, b: &mut Fighter) -> Exchange {
    match a.cell.strength_against(b.cell) {
        Strength::Stronger => attack(a, b),
        Strength::Weaker => attack(b, a),
        Strength::Even => clash(a, b),
    }
}

fn attack(strong: &mut Fighter, weak: &mut Fighter) -> Exchange {
    strong.cell.last_contact = Some(Contact {
        other: weak.entity,
        role: ContactRole::Attack,
    });
    weak.cell.last_contact = Some(Contact {
        other: strong.entity,
        role: ContactRole::Defense,
    });

    if !strong.cell.attack_ready || weak.cell.full_defense {
        return Exchange::Blocked;
    }

    let damage = damage_dealt(
        strong.cell.damage,
        weak.cell.defense,
        strong.cell.level,
        weak.cell.max_life,
    );
    let counter = damage_dealt(
        weak.cell.damage * COUNTER_DAMAGE_FACTOR,
        strong.cell.defense,
        weak.cell.level,
        strong.cell.max_life,
    );
    weak.cell.life -= damage;
    strong.cell.life -= counter;
    weak.cell.clamp_vitals();
    strong.cell.clamp_vitals();

    enter_attack_cooldown(strong.cell, strong.scheduler);
    enter_full_defense(weak.cell, weak.scheduler);
    trigger_adrenaline(strong.cell, strong.effects, strong.scheduler);
    trigger_adrenaline(weak.cell, weak.effects, weak.scheduler);

    if strong.hunting == Some(weak.entity) {
        strong.cell.success_hunt = true;
    }

    Exchange::FullAttack {
        attacker: strong.entity,
        victim: weak.entity,
        damage,
        counter,
    }
}

fn clash(a: &mut Fighter, b: &mut Fighter) -> Exchange {
    a.cell.last_contact = Some(Contact {
        other: b.entity,
        role: ContactRole::Attack,
    });
    b.cell.last_contact = Some(Contact {
        other: a.entity,
        role: ContactRole::Attack,
    });

    let to_b = damage_dealt(
        a.cell.damage * CLASH_DAMAGE_FACTOR,
        b.cell.defense,
        a.cell.level,
        b.cell.max_life,
    );
    let to_a = damage_dealt(
        b.cell.damage * CLASH_DAMAGE_FACTOR,
        a.cell.defense,
        b.cell.level,
        a.cell.max_life,
    );
    a.cell.life -= to_a;
    b.cell.life -= to_b;
    a.cell.clamp_vitals();
    b.cell.clamp_vitals();

    trigger_adrenaline(a.cell, a.effects, a.scheduler);
    trigger_adrenaline(b.cell, b.effects, b.scheduler);
    Exchange::Clash
}

pub fn enter_attack_cooldown(cell: &mut Cell, scheduler: &mut Scheduler) {
    cell.attack_ready = false;
    scheduler.cancel(TimerReason::AttackReady);
    scheduler.after(cell.attack_cooldown_ms, TimerReason::AttackReady);
}

pub fn enter_full_defense(cell: &mut Cell, scheduler: &mut Scheduler) {
    cell.full_defense = true;
    scheduler.cancel(TimerReason::FullDefenseEnd);
    scheduler.after(cell.full_defense_cooldown_ms, TimerReason::FullDefenseEnd);
}

/// Arm adrenaline unless it is already running. Returns whether it was armed.
pub fn trigger_adrenaline(cell: &mut Cell, effects: &mut Effects, scheduler: &mut Scheduler) -> bool {
    if cell.adrenaline {
        return false;
    }
    cell.adrenaline = true;
    effects.push_applied(Effect::applied(
        Stat::Speed,
        cell.base_speed * (cell.adrenaline_speed_buff / 100.0),
        EffectCause::Adrenaline,
        "Adrenaline: faster",
    ));
    effects.push_applied(Effect::applied(
        Stat::Damage,
        cell.base_damage * (cell.adrenaline_damage_buff / 100.0),
        EffectCause::Adrenaline,
        "Adrenaline: stronger bites",
    ));
    if cell.life_recovery > 0.0 {
        effects.push_applied(Effect::applied(
            Stat::LifeRecovery,
            cell.life_recovery * ADRENALINE_REGEN_BONUS,
            EffectCause::Adrenaline,
            "Adrenaline: faster healing",
        ));
    }
    scheduler.after(cell.adrenaline_time * 1000.0, TimerReason::AdrenalineEnd);
    cell.refresh_effective(effects);
    true
}

/// Pairwise contact check and resolution
pub fn resolve_combat(
    config: Res<SimConfig>,
    mut cells: Query<(
        Entity,
        &mut Cell,
        &Brain,
        &mut Effects,
        &mut Scheduler,
        &mut Transform,
    )>,
) {
    let impulse = CONTACT_IMPULSE * config.tick_secs();
    let mut pairs = cells.iter_combinations_mut();

    while let Some(
        [(entity_a, mut cell_a, brain_a, mut effects_a, mut scheduler_a, mut transform_a), (entity_b, mut cell_b, brain_b, mut effects_b, mut scheduler_b, mut transform_b)],
    ) = pairs.fetch_next()
    {
        // Dead this tick: waiting for cull
        if !cell_a.is_alive() || !cell_b.is_alive() {
            continue;
        }
        let position_a = transform_a.translation.truncate();
        let position_b = transform_b.translation.truncate();
        if !in_contact(position_a, cell_a.radius(), position_b, cell_b.radius()) {
            continue;
        }

        let mut a = Fighter {
            entity: entity_a,
            cell: &mut *cell_a,
            effects: &mut *effects_a,
            scheduler: &mut *scheduler_a,
            hunting: brain_a.hunting,
        };
        let mut b = Fighter {
            entity: entity_b,
            cell: &mut *cell_b,
            effects: &mut *effects_b,
            scheduler: &mut *scheduler_b,
            hunting: brain_b.hunting,
        };
        let exchange = resolve_contact(&mut a, &mut b);
        trace!(?entity_a, ?entity_b, ?exchange, "contact");

        let (next_a, next_b) = separate(position_a, position_b, impulse, &config);
        transform_a.translation.x = next_a.x;
        transform_a.translation.y = next_a.y;
        transform_b.translation.x = next_b.x;
        transform_b.translation.y = next_b.y;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Side {
        cell: Cell,
        effects: Effects,
        scheduler: Scheduler,
    }

    fn side(level: u32, points: f32) -> Side {
        let mut cell = Cell::with_threshold("t", false, 10_000.0);
        cell.level = level;
        cell.points = points;
        Side {
            cell,
            effects: Effects::default(),
            scheduler: Scheduler::default(),
        }
    }

    fn fighter(entity: u32, side: &mut Side, hunting: Option<Entity>) -> Fighter<'_> {
        Fighter {
            entity: Entity::from_raw(entity),
            cell: &mut side.cell,
            effects: &mut side.effects,
            scheduler: &mut side.scheduler,
            hunting,
        }
    }

    #[test]
    fn damage_floor_and_ceiling() {
        assert_eq!(damage_dealt(10.0, 50.0, 1, 100.0), 5.0);
        // floored at attacker level
        assert_eq!(damage_dealt(10.0, 90.0, 3, 100.0), 3.0);
        // never more than the target's max life
        assert_eq!(damage_dealt(500.0, 0.0, 1, 20.0), 20.0);
    }

    #[test]
    fn stronger_cell_lands_full_attack() {
        let mut strong = side(5, 400.0);
        let mut weak = side(3, 100.0);
        let expected = strong.cell.damage * (1.0 - weak.cell.defense / 100.0);
        let expected = expected.max(5.0);
        let weak_life = weak.cell.life;

        let exchange = {
            let mut a = fighter(1, &mut strong, Some(Entity::from_raw(2)));
            let mut b = fighter(2, &mut weak, None);
            resolve_contact(&mut a, &mut b)
        };

        assert!(matches!(exchange, Exchange::FullAttack { .. }));
        assert!((weak_life - weak.cell.life - expected).abs() < 1e-4);
        assert!(!strong.cell.attack_ready);
        assert!(weak.cell.full_defense);
        assert!(strong.scheduler.is_pending(TimerReason::AttackReady));
        assert!(weak.scheduler.is_pending(TimerReason::FullDefenseEnd));
        assert!(strong.cell.adrenaline && weak.cell.adrenaline);
        assert!(strong.cell.success_hunt);
        assert_eq!(weak.cell.last_contact.map(|c| c.role), Some(ContactRole::Defense));
    }

    #[test]
    fn shield_blocks_the_attack() {
        let mut strong = side(4, 0.0);
        let mut weak = side(1, 0.0);
        weak.cell.full_defense = true;
        let life = weak.cell.life;
        let exchange = {
            let mut a = fighter(1, &mut weak, None);
            let mut b = fighter(2, &mut strong, None);
            resolve_contact(&mut a, &mut b)
        };
        assert_eq!(exchange, Exchange::Blocked);
        assert_eq!(weak.cell.life, life);
        assert!(strong.cell.attack_ready);
    }

    #[test]
    fn even_cells_clash_without_cooldowns() {
        let mut a_side = side(2, 10.0);
        let mut b_side = side(2, 20.0);
        let exchange = {
            let mut a = fighter(1, &mut a_side, None);
            let mut b = fighter(2, &mut b_side, None);
            resolve_contact(&mut a, &mut b)
        };
        assert_eq!(exchange, Exchange::Clash);
        assert!(a_side.cell.life < STARTING_LIFE && b_side.cell.life < STARTING_LIFE);
        assert!(a_side.cell.attack_ready && b_side.cell.attack_ready);
        assert!(!a_side.cell.full_defense && !b_side.cell.full_defense);
        assert!(a_side.cell.adrenaline && b_side.cell.adrenaline);
    }

    #[test]
    fn adrenaline_is_not_rearmed_while_active() {
        let mut s = side(1, 0.0);
        assert!(trigger_adrenaline(&mut s.cell, &mut s.effects, &mut s.scheduler));
        let speed = s.cell.speed;
        assert!(speed > s.cell.base_speed);
        assert!(!trigger_adrenaline(&mut s.cell, &mut s.effects, &mut s.scheduler));
        assert_eq!(s.cell.speed, speed);
        assert_eq!(s.effects.len(), 2);
    }

    #[test]
    fn separation_moves_along_normal_and_respects_edges() {
        let config = SimConfig::default();
        let (a, b) = separate(Vec2::new(100.0, 100.0), Vec2::new(110.0, 100.0), 40.0, &config);
        assert_eq!(a, Vec2::new(60.0, 100.0));
        assert_eq!(b, Vec2::new(150.0, 100.0));

        let (a, _) = separate(Vec2::new(15.0, 50.0), Vec2::new(20.0, 50.0), 40.0, &config);
        assert_eq!(a.x, EDGE_CLEARANCE);
    }
}
