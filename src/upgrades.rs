//! Upgrade cards offered on level up.
//!
//! Every attribute a card can touch goes through [`Attribute::accessor`], a
//! table of typed getter/setter pairs. Cards are static templates; drawing one
//! resolves it into a concrete [`Card`] with a sampled value.

use std::collections::HashMap;
use std::fmt;

use bevy::prelude::*;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cell::Cell;
use crate::config::*;
use crate::rng::{random_float, random_item, SimRng};
use crate::SimulationState;

/// Card-addressable cell attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    MaxLife,
    Life,
    LifeRecovery,
    BaseSpeed,
    Speed,
    BaseDamage,
    BaseDefense,
    MaxStamina,
    Stamina,
    StaminaRecovery,
    AdrenalineSpeedBuff,
    AdrenalineDamageBuff,
    AdrenalineTime,
    DnaHarvesting,
    ReduceSpeed,
    ReduceSpeedBy,
    AttackCooldown,
    FullDefenseCooldown,
}

/// Typed access to one attribute
#[derive(Clone, Copy)]
pub enum Accessor {
    Number {
        get: fn(&Cell) -> f32,
        set: fn(&mut Cell, f32),
    },
    Flag {
        get: fn(&Cell) -> bool,
        set: fn(&mut Cell, bool),
    },
}

impl Attribute {
    pub fn accessor(self) -> Accessor {
        use Attribute::*;
        match self {
            MaxLife => Accessor::Number {
                get: |cell| cell.max_life,
                set: |cell, value| cell.max_life = value,
            },
            Life => Accessor::Number {
                get: |cell| cell.life,
                set: |cell, value| cell.life = value,
            },
            LifeRecovery => Accessor::Number {
                get: |cell| cell.life_recovery,
                set: |cell, value| cell.life_recovery = value,
            },
            BaseSpeed => Accessor::Number {
                get: |cell| cell.base_speed,
                set: |cell, value| cell.base_speed = value,
            },
            Speed => Accessor::Number {
                get: |cell| cell.speed,
                set: |cell, value| cell.speed = value,
            },
            BaseDamage => Accessor::Number {
                get: |cell| cell.base_damage,
                set: |cell, value| cell.base_damage = value,
            },
            BaseDefense => Accessor::Number {
                get: |cell| cell.base_defense,
                set: |cell, value| cell.base_defense = value,
            },
            MaxStamina => Accessor::Number {
                get: |cell| cell.max_stamina,
                set: |cell, value| cell.max_stamina = value,
            },
            Stamina => Accessor::Number {
                get: |cell| cell.stamina,
                set: |cell, value| cell.stamina = value,
            },
            StaminaRecovery => Accessor::Number {
                get: |cell| cell.stamina_recovery,
                set: |cell, value| cell.stamina_recovery = value,
            },
            AdrenalineSpeedBuff => Accessor::Number {
                get: |cell| cell.adrenaline_speed_buff,
                set: |cell, value| cell.adrenaline_speed_buff = value,
            },
            AdrenalineDamageBuff => Accessor::Number {
                get: |cell| cell.adrenaline_damage_buff,
                set: |cell, value| cell.adrenaline_damage_buff = value,
            },
            AdrenalineTime => Accessor::Number {
                get: |cell| cell.adrenaline_time,
                set: |cell, value| cell.adrenaline_time = value,
            },
            DnaHarvesting => Accessor::Number {
                get: |cell| cell.dna_harvesting,
                set: |cell, value| cell.dna_harvesting = value,
            },
            ReduceSpeed => Accessor::Flag {
                get: |cell| cell.reduce_speed,
                set: |cell, value| cell.reduce_speed = value,
            },
            ReduceSpeedBy => Accessor::Number {
                get: |cell| cell.reduce_speed_by,
                set: |cell, value| cell.reduce_speed_by = value,
            },
            AttackCooldown => Accessor::Number {
                get: |cell| cell.attack_cooldown_ms,
                set: |cell, value| cell.attack_cooldown_ms = value,
            },
            FullDefenseCooldown => Accessor::Number {
                get: |cell| cell.full_defense_cooldown_ms,
                set: |cell, value| cell.full_defense_cooldown_ms = value,
            },
        }
    }

    /// Lowest value a card may leave the attribute at
    pub fn floor(self) -> f32 {
        match self {
            Attribute::MaxLife | Attribute::Life | Attribute::MaxStamina => 1.0,
            Attribute::BaseSpeed => 10.0,
            Attribute::AttackCooldown => 100.0,
            _ => 0.0,
        }
    }
}

/// Per-five-level caps a cell starts with
pub fn default_caps() -> HashMap<Attribute, f32> {
    HashMap::from([
        (Attribute::MaxLife, 40.0),
        (Attribute::BaseDefense, 40.0),
        (Attribute::BaseDamage, 18.0),
        (Attribute::BaseSpeed, 300.0),
        (Attribute::FullDefenseCooldown, 400.0),
        (Attribute::AdrenalineSpeedBuff, 40.0),
        (Attribute::AdrenalineDamageBuff, 20.0),
        (Attribute::AdrenalineTime, 1.0),
        (Attribute::DnaHarvesting, 5.0),
        (Attribute::LifeRecovery, 8.0),
        (Attribute::MaxStamina, 200.0),
        (Attribute::StaminaRecovery, 16.0),
    ])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rarity {
    Common,
    Rare,
    Epic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Buff,
    Debuff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Absolute,
    Percent,
    Set,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Gt,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConditionValue {
    Number(f32),
    Flag(bool),
}

/// Prerequisite checked against the drawing cell
#[derive(Debug, Clone, Copy)]
pub struct Condition {
    pub attribute: Attribute,
    pub comparator: Comparator,
    pub value: ConditionValue,
}

impl Condition {
    pub fn holds(&self, cell: &Cell) -> bool {
        match (self.attribute.accessor(), self.value) {
            (Accessor::Number { get, .. }, ConditionValue::Number(value)) => {
                let current = get(cell);
                match self.comparator {
                    Comparator::Eq => current == value,
                    Comparator::Ne => current != value,
                    Comparator::Lt => current < value,
                    Comparator::Gt => current > value,
                }
            }
            (Accessor::Flag { get, .. }, ConditionValue::Flag(value)) => match self.comparator {
                Comparator::Eq => get(cell) == value,
                Comparator::Ne => get(cell) != value,
                Comparator::Lt | Comparator::Gt => false,
            },
            _ => false,
        }
    }
}

/// Static card definition
#[derive(Debug)]
pub struct CardTemplate {
    pub id: &'static str,
    pub polarity: Polarity,
    pub attribute: Attribute,
    /// Receives the same change, e.g. max life also heals
    pub linked: Option<Attribute>,
    /// `<VALUE>` is replaced with the sampled value
    pub text: &'static str,
    pub unit: &'static str,
    pub absolute: Option<(f32, f32)>,
    pub percent: Option<(f32, f32)>,
    pub set: Option<bool>,
    pub min_level: u32,
    pub weight: u32,
    pub rarity: Rarity,
    pub conditions: &'static [Condition],
}

impl CardTemplate {
    const fn new(id: &'static str, polarity: Polarity, attribute: Attribute, text: &'static str) -> Self {
        Self {
            id,
            polarity,
            attribute,
            linked: None,
            text,
            unit: "",
            absolute: None,
            percent: None,
            set: None,
            min_level: 1,
            weight: 1,
            rarity: Rarity::Common,
            conditions: &[],
        }
    }

    const fn linked(mut self, attribute: Attribute) -> Self {
        self.linked = Some(attribute);
        self
    }

    const fn unit(mut self, unit: &'static str) -> Self {
        self.unit = unit;
        self
    }

    const fn absolute(mut self, from: f32, to: f32) -> Self {
        self.absolute = Some((from, to));
        self
    }

    const fn percent(mut self, from: f32, to: f32) -> Self {
        self.percent = Some((from, to));
        self
    }

    const fn set(mut self, value: bool) -> Self {
        self.set = Some(value);
        self
    }

    const fn gate(mut self, min_level: u32, weight: u32, rarity: Rarity) -> Self {
        self.min_level = min_level;
        self.weight = weight;
        self.rarity = rarity;
        self
    }

    const fn requires(mut self, conditions: &'static [Condition]) -> Self {
        self.conditions = conditions;
        self
    }

    fn kinds(&self) -> Vec<MutationKind> {
        let mut kinds = Vec::new();
        if self.absolute.is_some() {
            kinds.push(MutationKind::Absolute);
        }
        if self.percent.is_some() {
            kinds.push(MutationKind::Percent);
        }
        if self.set.is_some() {
            kinds.push(MutationKind::Set);
        }
        kinds
    }
}

const SLOWS_ON_LEVEL_UP: Condition = Condition {
    attribute: Attribute::ReduceSpeed,
    comparator: Comparator::Eq,
    value: ConditionValue::Flag(true),
};
const STEADY_ON_LEVEL_UP: Condition = Condition {
    attribute: Attribute::ReduceSpeed,
    comparator: Comparator::Eq,
    value: ConditionValue::Flag(false),
};
const HAS_SPEED_REDUCTION: Condition = Condition {
    attribute: Attribute::ReduceSpeedBy,
    comparator: Comparator::Gt,
    value: ConditionValue::Number(0.0),
};

use Attribute as A;
use Polarity::{Buff, Debuff};

pub static BUFFS: &[CardTemplate] = &[
    CardTemplate::new("buff-max-life", Buff, A::MaxLife, "+<VALUE> maximum health")
        .linked(A::Life)
        .unit("points")
        .absolute(1.0, 10.0)
        .percent(1.0, 10.0)
        .gate(1, 10, Rarity::Common),
    CardTemplate::new("buff-life-recovery", Buff, A::LifeRecovery, "+<VALUE> health recovered per second")
        .unit("points")
        .absolute(0.1, 2.0)
        .gate(1, 10, Rarity::Common),
    CardTemplate::new("buff-speed", Buff, A::BaseSpeed, "+<VALUE> movement speed")
        .linked(A::Speed)
        .unit("points")
        .absolute(10.0, 30.0)
        .percent(1.0, 3.0)
        .gate(1, 9, Rarity::Common),
    CardTemplate::new("buff-adrenaline-speed", Buff, A::AdrenalineSpeedBuff, "+<VALUE> speed increase when attacked")
        .percent(0.5, 3.0)
        .gate(1, 9, Rarity::Common),
    CardTemplate::new("buff-adrenaline-damage", Buff, A::AdrenalineDamageBuff, "+<VALUE> damage increase when attacked")
        .percent(0.3, 5.0)
        .gate(1, 8, Rarity::Common),
    CardTemplate::new("buff-adrenaline-time", Buff, A::AdrenalineTime, "+<VALUE> seconds in adrenaline time")
        .absolute(0.1, 0.5)
        .gate(1, 7, Rarity::Common),
    CardTemplate::new("buff-max-stamina", Buff, A::MaxStamina, "+<VALUE> maximum stamina")
        .linked(A::Stamina)
        .unit("points")
        .absolute(5.0, 20.0)
        .percent(2.0, 8.0)
        .gate(1, 8, Rarity::Common),
    CardTemplate::new("buff-stamina-recovery", Buff, A::StaminaRecovery, "+<VALUE> stamina recovered per second")
        .unit("points")
        .absolute(0.5, 2.0)
        .gate(2, 7, Rarity::Common),
    CardTemplate::new("buff-defense", Buff, A::BaseDefense, "+<VALUE> defense")
        .unit("points")
        .absolute(1.0, 4.0)
        .percent(2.0, 6.0)
        .gate(2, 7, Rarity::Common),
    CardTemplate::new("buff-damage", Buff, A::BaseDamage, "+<VALUE> damage when attacking")
        .unit("points")
        .absolute(1.0, 5.0)
        .percent(10.0, 20.0)
        .gate(3, 7, Rarity::Common),
    CardTemplate::new(
        "buff-dna-harvesting",
        Buff,
        A::DnaHarvesting,
        "+<VALUE> DNA points, stamina and health recovery when harvesting",
    )
    .absolute(0.1, 1.0)
    .percent(5.0, 10.0)
    .gate(3, 6, Rarity::Rare),
    CardTemplate::new("buff-speed-reduction", Buff, A::ReduceSpeedBy, "<VALUE> speed reduction when leveling up")
        .percent(-0.1, -0.5)
        .gate(4, 5, Rarity::Rare)
        .requires(&[SLOWS_ON_LEVEL_UP, HAS_SPEED_REDUCTION]),
    CardTemplate::new("buff-attack-cooldown", Buff, A::AttackCooldown, "<VALUE> between attacks")
        .unit("ms")
        .absolute(-20.0, -60.0)
        .gate(4, 4, Rarity::Rare),
    CardTemplate::new("buff-full-defense", Buff, A::FullDefenseCooldown, "+<VALUE> of shield after being hit")
        .unit("ms")
        .absolute(20.0, 60.0)
        .gate(4, 4, Rarity::Rare),
    CardTemplate::new(
        "buff-steady-speed",
        Buff,
        A::ReduceSpeed,
        "stops slowing down when leveling up, but all cards are 5% weaker",
    )
    .set(false)
    .gate(6, 2, Rarity::Epic)
    .requires(&[SLOWS_ON_LEVEL_UP]),
];

pub static DEBUFFS: &[CardTemplate] = &[
    CardTemplate::new("debuff-max-life", Debuff, A::MaxLife, "<VALUE> maximum health")
        .linked(A::Life)
        .unit("points")
        .absolute(-1.0, -10.0)
        .percent(-1.0, -10.0)
        .gate(5, 12, Rarity::Common),
    CardTemplate::new("debuff-life-recovery", Debuff, A::LifeRecovery, "<VALUE> health recovered per second")
        .unit("points")
        .absolute(-0.1, -5.0)
        .gate(5, 12, Rarity::Common),
    CardTemplate::new("debuff-speed", Debuff, A::BaseSpeed, "<VALUE> movement speed")
        .linked(A::Speed)
        .unit("points")
        .absolute(-10.0, -30.0)
        .percent(-1.0, -3.0)
        .gate(5, 11, Rarity::Common),
    CardTemplate::new("debuff-adrenaline-speed", Debuff, A::AdrenalineSpeedBuff, "<VALUE> speed increase when attacked")
        .percent(-0.5, -3.0)
        .gate(5, 11, Rarity::Common),
    CardTemplate::new(
        "debuff-adrenaline-damage",
        Debuff,
        A::AdrenalineDamageBuff,
        "<VALUE> damage increase when attacked",
    )
    .percent(-0.3, -5.0)
    .gate(5, 10, Rarity::Common),
    CardTemplate::new("debuff-adrenaline-time", Debuff, A::AdrenalineTime, "<VALUE> seconds in adrenaline time")
        .absolute(-0.1, -0.5)
        .gate(5, 9, Rarity::Common),
    CardTemplate::new("debuff-max-stamina", Debuff, A::MaxStamina, "<VALUE> maximum stamina")
        .linked(A::Stamina)
        .unit("points")
        .absolute(-5.0, -20.0)
        .gate(5, 10, Rarity::Common),
    CardTemplate::new("debuff-defense", Debuff, A::BaseDefense, "<VALUE> defense")
        .unit("points")
        .absolute(-1.0, -4.0)
        .gate(5, 10, Rarity::Common),
    CardTemplate::new(
        "debuff-dna-harvesting",
        Debuff,
        A::DnaHarvesting,
        "<VALUE> DNA points and health recovery when harvesting",
    )
    .absolute(-0.1, -1.0)
    .percent(-5.0, -10.0)
    .gate(8, 8, Rarity::Rare),
    CardTemplate::new("debuff-speed-reduction", Debuff, A::ReduceSpeedBy, "+<VALUE> speed reduction when leveling up")
        .percent(0.1, 0.5)
        .gate(9, 7, Rarity::Rare)
        .requires(&[SLOWS_ON_LEVEL_UP]),
    CardTemplate::new(
        "debuff-slow-again",
        Debuff,
        A::ReduceSpeed,
        "becomes slower again when leveling up, cards are back to full strength",
    )
    .set(true)
    .gate(10, 2, Rarity::Epic)
    .requires(&[STEADY_ON_LEVEL_UP]),
];

pub fn catalog() -> impl Iterator<Item = &'static CardTemplate> {
    BUFFS.iter().chain(DEBUFFS.iter())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mutation {
    Absolute(f32),
    Percent(f32),
    Set(bool),
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Absolute(_) => MutationKind::Absolute,
            Mutation::Percent(_) => MutationKind::Percent,
            Mutation::Set(_) => MutationKind::Set,
        }
    }
}

/// A template with its value rolled
#[derive(Debug, Clone)]
pub struct Card {
    pub template: &'static CardTemplate,
    pub mutation: Mutation,
    pub description: String,
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description)
    }
}

fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

/// Pick a mutation kind and sample its value
pub fn resolve(template: &'static CardTemplate, rng: &mut impl Rng) -> Option<Card> {
    let kind = *random_item(rng, &template.kinds())?;
    let mutation = match kind {
        MutationKind::Absolute => {
            let (from, to) = template.absolute?;
            Mutation::Absolute(round2(random_float(rng, from, to)))
        }
        MutationKind::Percent => {
            let (from, to) = template.percent?;
            Mutation::Percent(round2(random_float(rng, from, to)))
        }
        MutationKind::Set => Mutation::Set(template.set?),
    };
    let value = match mutation {
        Mutation::Absolute(value) => format!("{:.2} {}", value, template.unit).trim_end().to_string(),
        Mutation::Percent(value) => format!("{:.2}%", value),
        Mutation::Set(_) => String::new(),
    };
    Some(Card {
        template,
        mutation,
        description: template.text.replace("<VALUE>", &value),
    })
}

/// Numeric change the card would make to `cell`, `None` for flag cards
pub fn change_for(cell: &Cell, card: &Card) -> Result<Option<f32>, UpgradeError> {
    let attribute = card.template.attribute;
    let change = match (attribute.accessor(), card.mutation) {
        (Accessor::Number { .. }, Mutation::Absolute(value)) => value,
        (Accessor::Number { get, .. }, Mutation::Percent(percent)) => get(cell) * (percent / 100.0),
        (Accessor::Flag { .. }, Mutation::Set(_)) => return Ok(None),
        (_, mutation) => {
            return Err(UpgradeError::ValueKindMismatch {
                attribute,
                kind: mutation.kind(),
            })
        }
    };
    if cell.reduce_speed {
        Ok(Some(change))
    } else {
        Ok(Some(change - change * UNTOGGLED_CARD_PENALTY))
    }
}

/// Level gate, prerequisites and the per-five-level cap
pub fn is_eligible(cell: &Cell, card: &Card) -> bool {
    let template = card.template;
    if cell.level < template.min_level {
        return false;
    }
    if !template.conditions.iter().all(|condition| condition.holds(cell)) {
        return false;
    }
    match (change_for(cell, card), template.attribute.accessor(), cell.cap(template.attribute)) {
        (Ok(Some(change)), Accessor::Number { get, .. }, Some(cap)) if change > 0.0 => get(cell) + change <= cap,
        (Ok(_), ..) => true,
        (Err(_), ..) => false,
    }
}

/// Draw weight with the pity boost for rare and epic cards
pub fn draw_weight(template: &CardTemplate, cell: &Cell) -> f64 {
    let base = template.weight as f64;
    let pity = match template.rarity {
        Rarity::Common => return base,
        Rarity::Rare => cell.rare_pity,
        Rarity::Epic => cell.epic_pity,
    };
    base * (2.0 + pity as f64) / 2.0
}

/// Up to `CARDS_PER_OFFER` distinct eligible cards, drawn by weight without replacement
pub fn draw_cards(cell: &Cell, rng: &mut impl Rng) -> Vec<Card> {
    let mut pool: Vec<&'static CardTemplate> = catalog().collect();
    let mut cards = Vec::with_capacity(CARDS_PER_OFFER);

    while cards.len() < CARDS_PER_OFFER && !pool.is_empty() {
        let weights: Vec<f64> = pool.iter().map(|template| draw_weight(template, cell)).collect();
        let Ok(index) = WeightedIndex::new(&weights) else {
            break;
        };
        let template = pool.swap_remove(index.sample(rng));
        let Some(card) = resolve(template, rng) else {
            continue;
        };
        if is_eligible(cell, &card) {
            cards.push(card);
        }
    }
    cards
}

/// Draw an offer and reset the pity counter of every tier it contains
pub fn draft(cell: &mut Cell, rng: &mut impl Rng) -> Vec<Card> {
    let cards = draw_cards(cell, rng);
    for card in &cards {
        match card.template.rarity {
            Rarity::Rare => cell.rare_pity = 0,
            Rarity::Epic => cell.epic_pity = 0,
            Rarity::Common => {}
        }
    }
    cards
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppliedChange {
    Number { before: f32, after: f32 },
    Flag(bool),
}

/// Mutate the cell in place. Linked attributes get the same change.
pub fn apply_card(cell: &mut Cell, card: &Card) -> Result<AppliedChange, UpgradeError> {
    let attribute = card.template.attribute;
    let Some(change) = change_for(cell, card)? else {
        return match (attribute.accessor(), card.mutation) {
            (Accessor::Flag { set, .. }, Mutation::Set(value)) => {
                set(cell, value);
                Ok(AppliedChange::Flag(value))
            }
            (_, mutation) => Err(UpgradeError::ValueKindMismatch {
                attribute,
                kind: mutation.kind(),
            }),
        };
    };
    let Accessor::Number { get, set } = attribute.accessor() else {
        return Err(UpgradeError::ValueKindMismatch {
            attribute,
            kind: card.mutation.kind(),
        });
    };

    let before = get(cell);
    let after = (before + change).max(attribute.floor());
    set(cell, after);

    if let Some(linked) = card.template.linked {
        if let Accessor::Number { get, set } = linked.accessor() {
            let value = (get(cell) + change).max(linked.floor());
            set(cell, value);
        }
    }
    cell.clamp_vitals();
    Ok(AppliedChange::Number { before, after })
}

#[derive(Debug, Error, PartialEq)]
pub enum UpgradeError {
    #[error("card {index} is out of range, only {available} offered")]
    OutOfRange { index: usize, available: usize },

    #[error("no upgrade offer is pending")]
    NoPendingOffer,

    #[error("{attribute:?} does not accept a {kind:?} mutation")]
    ValueKindMismatch {
        attribute: Attribute,
        kind: MutationKind,
    },
}

/// Offer waiting for the player's pick
#[derive(Resource, Debug, Default)]
pub struct PendingUpgrade {
    pub cell: Option<Entity>,
    pub cards: Vec<Card>,
}

impl PendingUpgrade {
    pub fn is_pending(&self) -> bool {
        self.cell.is_some()
    }

    /// Take the chosen card, leaving the offer untouched on error
    pub fn take(&mut self, index: usize) -> Result<(Entity, Card), UpgradeError> {
        let Some(cell) = self.cell else {
            return Err(UpgradeError::NoPendingOffer);
        };
        if index >= self.cards.len() {
            return Err(UpgradeError::OutOfRange {
                index,
                available: self.cards.len(),
            });
        }
        let card = self.cards.swap_remove(index);
        self.cell = None;
        self.cards.clear();
        Ok((cell, card))
    }
}

#[derive(Event, Debug, Clone)]
pub struct CellLeveledUp {
    pub cell: Entity,
    pub level: u32,
    pub offered: Vec<String>,
}

/// Host input: pick card `index` of the pending offer
#[derive(Event, Debug, Clone, Copy)]
pub struct ChooseUpgrade {
    pub index: usize,
}

/// One level per cell per tick, then the card engine
pub fn level_up_cells(
    mut rng: ResMut<SimRng>,
    mut pending: ResMut<PendingUpgrade>,
    mut next_state: ResMut<NextState<SimulationState>>,
    mut leveled: EventWriter<CellLeveledUp>,
    mut cells: Query<(Entity, &mut Cell)>,
) {
    for (entity, mut cell) in cells.iter_mut() {
        // An open offer holds the player's level; the points wait for the next tick
        if cell.is_player && pending.is_pending() {
            continue;
        }
        if !cell.is_alive() || !cell.advance_level(&mut *rng) {
            continue;
        }
        let cards = draft(&mut cell, &mut *rng);
        info!(cell = %cell.species, level = cell.level, offered = cards.len(), "level up");
        leveled.send(CellLeveledUp {
            cell: entity,
            level: cell.level,
            offered: cards.iter().map(|card| card.description.clone()).collect(),
        });

        if cell.is_player {
            if !cards.is_empty() {
                pending.cell = Some(entity);
                pending.cards = cards;
                next_state.set(SimulationState::ChoosingUpgrade);
            }
        } else if let Some(card) = random_item(&mut *rng, &cards) {
            match apply_card(&mut cell, card) {
                Ok(change) => debug!(
                    cell = %cell.species,
                    card = card.template.id,
                    polarity = ?card.template.polarity,
                    ?change,
                    "card applied"
                ),
                Err(err) => warn!(%err, "card skipped"),
            }
        }
    }
}

fn pressed_card(keys: &ButtonInput<KeyCode>) -> Option<usize> {
    [KeyCode::Digit1, KeyCode::Digit2, KeyCode::Digit3]
        .iter()
        .position(|key| keys.just_pressed(*key))
}

/// Apply the player's choice and resume
pub fn choose_upgrade(
    keys: Option<Res<ButtonInput<KeyCode>>>,
    mut choices: EventReader<ChooseUpgrade>,
    mut pending: ResMut<PendingUpgrade>,
    mut next_state: ResMut<NextState<SimulationState>>,
    mut cells: Query<&mut Cell>,
) {
    let index = choices
        .read()
        .last()
        .map(|choice| choice.index)
        .or_else(|| keys.as_deref().and_then(pressed_card));
    let Some(index) = index else {
        return;
    };

    match pending.take(index) {
        Ok((entity, card)) => {
            if let Ok(mut cell) = cells.get_mut(entity) {
                match apply_card(&mut cell, &card) {
                    Ok(change) => info!(card = %card, polarity = ?card.template.polarity, ?change, "upgrade chosen"),
                    Err(err) => warn!(%err, "upgrade could not be applied"),
                }
            }
            next_state.set(SimulationState::Running);
        }
        Err(UpgradeError::NoPendingOffer) => next_state.set(SimulationState::Running),
        Err(err) => warn!(%err, "upgrade choice rejected"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(id: &str) -> &'static CardTemplate {
        catalog().find(|template| template.id == id).unwrap()
    }

    fn card(id: &str, mutation: Mutation) -> Card {
        Card {
            template: template(id),
            mutation,
            description: String::new(),
        }
    }

    #[test]
    fn percent_card_adds_fraction_of_current_value() {
        let mut cell = Cell::with_threshold("t", false, 100.0);
        let before = cell.max_life;
        let change = apply_card(&mut cell, &card("buff-max-life", Mutation::Percent(10.0))).unwrap();
        assert_eq!(
            change,
            AppliedChange::Number {
                before,
                after: before + before * 0.1
            }
        );
        // linked life got the same bump and stays within max
        assert_eq!(cell.life, cell.max_life);
    }

    #[test]
    fn untoggled_speed_reduction_weakens_cards() {
        let mut cell = Cell::with_threshold("t", false, 100.0);
        cell.reduce_speed = false;
        apply_card(&mut cell, &card("buff-damage", Mutation::Absolute(4.0))).unwrap();
        assert!((cell.base_damage - (STARTING_DAMAGE + 3.8)).abs() < 1e-5);
    }

    #[test]
    fn flag_card_sets_the_flag() {
        let mut cell = Cell::with_threshold("t", false, 100.0);
        let change = apply_card(&mut cell, &card("buff-steady-speed", Mutation::Set(false))).unwrap();
        assert_eq!(change, AppliedChange::Flag(false));
        assert!(!cell.reduce_speed);
    }

    #[test]
    fn mismatched_value_kind_is_an_error() {
        let mut cell = Cell::with_threshold("t", false, 100.0);
        let err = apply_card(&mut cell, &card("buff-steady-speed", Mutation::Absolute(1.0))).unwrap_err();
        assert_eq!(
            err,
            UpgradeError::ValueKindMismatch {
                attribute: Attribute::ReduceSpeed,
                kind: MutationKind::Absolute
            }
        );
    }

    #[test]
    fn floors_hold_against_large_debuffs() {
        let mut cell = Cell::with_threshold("t", false, 100.0);
        apply_card(&mut cell, &card("debuff-max-life", Mutation::Absolute(-500.0))).unwrap();
        assert_eq!(cell.max_life, 1.0);
        assert_eq!(cell.life, 1.0);
    }

    #[test]
    fn cap_refuses_overshooting_buffs() {
        let mut cell = Cell::with_threshold("t", false, 100.0);
        cell.max_life = 39.0;
        assert!(!is_eligible(&cell, &card("buff-max-life", Mutation::Absolute(5.0))));
        assert!(is_eligible(&cell, &card("buff-max-life", Mutation::Absolute(1.0))));
        // debuffs are never capped
        cell.level = 5;
        assert!(is_eligible(&cell, &card("debuff-max-life", Mutation::Absolute(-5.0))));
    }

    #[test]
    fn level_gate_and_conditions_filter() {
        let mut cell = Cell::with_threshold("t", false, 100.0);
        let steady = card("buff-steady-speed", Mutation::Set(false));
        assert!(!is_eligible(&cell, &steady));
        cell.level = 6;
        assert!(is_eligible(&cell, &steady));
        cell.reduce_speed = false;
        assert!(!is_eligible(&cell, &steady));
    }

    #[test]
    fn pity_raises_rare_weight_and_draft_resets_it() {
        let mut cell = Cell::with_threshold("t", false, 100.0);
        let rare = template("buff-dna-harvesting");
        let common = template("buff-max-life");
        let mut last = draw_weight(rare, &cell);
        for _ in 0..5 {
            cell.rare_pity += 1;
            let weight = draw_weight(rare, &cell);
            assert!(weight > last);
            last = weight;
        }
        assert_eq!(draw_weight(common, &cell), common.weight as f64);

        let mut rng = SimRng::seeded(3);
        cell.level = 20;
        for _ in 0..50 {
            cell.rare_pity = 7;
            let cards = draft(&mut cell, &mut rng);
            if cards.iter().any(|card| card.template.rarity == Rarity::Rare) {
                assert_eq!(cell.rare_pity, 0);
            } else {
                assert_eq!(cell.rare_pity, 7);
            }
        }
    }

    #[test]
    fn offers_are_distinct_and_at_most_three() {
        let mut rng = SimRng::seeded(12);
        let mut cell = Cell::with_threshold("t", false, 100.0);
        cell.level = 12;
        for _ in 0..100 {
            let cards = draw_cards(&cell, &mut rng);
            assert!(cards.len() <= CARDS_PER_OFFER);
            let mut ids: Vec<_> = cards.iter().map(|card| card.template.id).collect();
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), cards.len());
        }
    }

    #[test]
    fn descriptions_fill_the_placeholder() {
        let mut rng = SimRng::seeded(4);
        for template in catalog() {
            let card = resolve(template, &mut rng).unwrap();
            assert!(!card.description.contains("<VALUE>"), "{}", template.id);
        }
    }

    #[test]
    fn pending_offer_survives_a_bad_index() {
        let mut pending = PendingUpgrade {
            cell: Some(Entity::from_raw(1)),
            cards: vec![card("buff-max-life", Mutation::Absolute(1.0))],
        };
        assert_eq!(
            pending.take(2).unwrap_err(),
            UpgradeError::OutOfRange { index: 2, available: 1 }
        );
        assert!(pending.is_pending());
        let (entity, _) = pending.take(0).unwrap();
        assert_eq!(entity, Entity::from_raw(1));
        assert_eq!(pending.take(0).unwrap_err(), UpgradeError::NoPendingOffer);
    }
}
