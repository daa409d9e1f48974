use std::collections::HashSet;
use std::time::Duration;

use proptest::prelude::*;

use cells_sim::cell::{compare_strength, Cell, Strength};
use cells_sim::combat::damage_dealt;
use cells_sim::rng::SimRng;
use cells_sim::scheduler::{Scheduler, TimerReason};
use cells_sim::upgrades::{
    apply_card, catalog, draw_cards, is_eligible, Accessor, AppliedChange, Attribute, Card, Mutation,
};

proptest! {
    #[test]
    fn more_defense_never_means_more_damage(
        raw in 0.0f32..500.0,
        low in 0.0f32..100.0,
        extra in 0.0f32..100.0,
        level in 1u32..30,
        max_life in 1.0f32..400.0,
    ) {
        let high = (low + extra).min(100.0);
        let weak_armor = damage_dealt(raw, low, level, max_life);
        let strong_armor = damage_dealt(raw, high, level, max_life);
        prop_assert!(strong_armor <= weak_armor);
        prop_assert!(weak_armor <= max_life);
        prop_assert!(strong_armor >= (level as f32).min(max_life));
    }

    #[test]
    fn strength_is_antisymmetric(
        level_a in 1u32..20,
        level_b in 1u32..20,
        points_a in 0u32..2000,
        points_b in 0u32..2000,
    ) {
        let (points_a, points_b) = (points_a as f32, points_b as f32);
        let ab = compare_strength(level_a, points_a, level_b, points_b);
        let ba = compare_strength(level_b, points_b, level_a, points_a);
        let expected = match ab {
            Strength::Stronger => Strength::Weaker,
            Strength::Weaker => Strength::Stronger,
            Strength::Even => Strength::Even,
        };
        prop_assert_eq!(ba, expected);
    }

    #[test]
    fn level_up_keeps_the_overshoot(threshold in 100u32..=200, extra in 0u32..300, seed in any::<u64>()) {
        let mut rng = SimRng::seeded(seed);
        let mut cell = Cell::with_threshold("p", false, threshold as f32);
        cell.points = (threshold + extra) as f32;
        let size = cell.size;

        prop_assert!(cell.advance_level(&mut rng));
        prop_assert_eq!(cell.level, 2);
        prop_assert_eq!(cell.points, extra as f32);
        prop_assert!(cell.size > size);
        prop_assert!(cell.next_level >= 300.0 && cell.next_level <= 600.0);
        // one level per call even with points to spare
        prop_assert!(!cell.advance_level(&mut rng));
    }

    #[test]
    fn drafted_cards_are_distinct_and_eligible(level in 1u32..15, seed in any::<u64>(), reduce in any::<bool>()) {
        let mut rng = SimRng::seeded(seed);
        let mut cell = Cell::with_threshold("p", false, 100.0);
        cell.level = level;
        cell.reduce_speed = reduce;

        let cards = draw_cards(&cell, &mut rng);
        prop_assert!(cards.len() <= 3);
        let ids: HashSet<&str> = cards.iter().map(|card| card.template.id).collect();
        prop_assert_eq!(ids.len(), cards.len());
        for card in &cards {
            prop_assert!(card.template.min_level <= level);
            prop_assert!(is_eligible(&cell, card));
            prop_assert!(!card.description.contains("<VALUE>"));
        }
    }

    #[test]
    fn applied_cards_keep_vitals_sane(level in 1u32..15, seed in any::<u64>(), rounds in 1usize..20) {
        let mut rng = SimRng::seeded(seed);
        let mut cell = Cell::with_threshold("p", false, 100.0);
        cell.level = level;

        for _ in 0..rounds {
            for card in draw_cards(&cell, &mut rng).iter().take(1) {
                prop_assert!(apply_card(&mut cell, card).is_ok());
            }
        }
        prop_assert!(cell.max_life >= Attribute::MaxLife.floor());
        prop_assert!(cell.life <= cell.max_life);
        prop_assert!(cell.stamina >= 0.0 && cell.stamina <= cell.max_stamina);
        prop_assert!(cell.base_speed >= Attribute::BaseSpeed.floor());
        prop_assert!(cell.attack_cooldown_ms >= Attribute::AttackCooldown.floor());
    }

    #[test]
    fn repeating_timer_fires_once_per_interval(interval in 50u32..1000, step in 1u32..50, ticks in 1u32..500) {
        let mut scheduler = Scheduler::default();
        scheduler.every(interval as f32, TimerReason::Regeneration);

        let mut fired = 0u32;
        for _ in 0..ticks {
            scheduler.tick(Duration::from_millis(step as u64), |_, _| {
                fired += 1;
                false
            });
        }
        prop_assert_eq!(fired, ticks * step / interval);
        prop_assert!(scheduler.is_pending(TimerReason::Regeneration));
    }

    #[test]
    fn percent_card_adds_that_share_of_the_current_value(value in 200u32..2000, cents in -5000i32..5000) {
        let percent = cents as f32 / 100.0;
        let templates = catalog().filter(|template| {
            template.percent.is_some()
                && !matches!(template.attribute, Attribute::Life | Attribute::Stamina)
        });
        for template in templates {
            let Accessor::Number { get, set } = template.attribute.accessor() else {
                continue;
            };
            let mut cell = Cell::with_threshold("p", false, 100.0);
            set(&mut cell, value as f32);
            let v = get(&cell);
            let card = Card {
                template,
                mutation: Mutation::Percent(percent),
                description: String::new(),
            };

            let change = apply_card(&mut cell, &card);
            let expected = v + v * (percent / 100.0);
            prop_assert_eq!(change, Ok(AppliedChange::Number { before: v, after: expected }));
            prop_assert_eq!(get(&cell), expected);
        }
    }
}
