use bevy::prelude::Component;
use std::fmt;

/// Attribute perturbed by an effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stat {
    Speed,
    Damage,
    Defense,
    LifeRecovery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    Buff,
    Debuff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectCause {
    Adrenaline,
    Running,
    Exhaustion,
}

impl fmt::Display for EffectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectCause::Adrenaline => write!(f, "adrenaline"),
            EffectCause::Running => write!(f, "running"),
            EffectCause::Exhaustion => write!(f, "exhaustion"),
        }
    }
}

/// A transient numeric modifier on one stat.
///
/// Natural effects are rebuilt from the cell's condition every tick; applied
/// effects stay until a timer removes them by cause.
#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    pub stat: Stat,
    pub kind: EffectKind,
    pub delta: f32,
    pub cause: EffectCause,
    pub natural: bool,
    pub message: String,
}

impl Effect {
    pub fn natural(stat: Stat, delta: f32, cause: EffectCause, message: impl Into<String>) -> Self {
        Self::new(stat, delta, cause, true, message)
    }

    pub fn applied(stat: Stat, delta: f32, cause: EffectCause, message: impl Into<String>) -> Self {
        Self::new(stat, delta, cause, false, message)
    }

    fn new(stat: Stat, delta: f32, cause: EffectCause, natural: bool, message: impl Into<String>) -> Self {
        let kind = if delta < 0.0 {
            EffectKind::Debuff
        } else {
            EffectKind::Buff
        };
        Self {
            stat,
            kind,
            delta,
            cause,
            natural,
            message: message.into(),
        }
    }
}

/// Ordered list of effects active on a cell
#[derive(Component, Debug, Default, Clone)]
pub struct Effects {
    list: Vec<Effect>,
}

impl Effects {
    /// Sum of every active delta on `stat`
    pub fn sum(&self, stat: Stat) -> f32 {
        self.list
            .iter()
            .filter(|effect| effect.stat == stat)
            .map(|effect| effect.delta)
            .sum()
    }

    /// Drop all natural effects and install a fresh set
    pub fn replace_natural(&mut self, natural: impl IntoIterator<Item = Effect>) {
        self.list.retain(|effect| !effect.natural);
        self.list.extend(natural.into_iter().map(|mut effect| {
            effect.natural = true;
            effect
        }));
    }

    pub fn push_applied(&mut self, mut effect: Effect) {
        effect.natural = false;
        self.list.push(effect);
    }

    pub fn remove_cause(&mut self, cause: EffectCause) -> usize {
        let before = self.list.len();
        self.list.retain(|effect| effect.cause != cause);
        before - self.list.len()
    }

    pub fn has_cause(&self, cause: EffectCause) -> bool {
        self.list.iter().any(|effect| effect.cause == cause)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Effect> {
        self.list.iter()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}
