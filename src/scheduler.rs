//! Per-cell cooperative timer queue.
//!
//! Events are plain records keyed by a [`TimerReason`]; the owner of the
//! scheduler decides what a reason means when it fires. Nothing here runs
//! concurrently: time only moves when [`Scheduler::tick`] is called from the
//! fixed logic tick.

use std::time::Duration;

use bevy::prelude::Component;
use bevy::time::{Timer, TimerMode};

/// Why a timer exists. The cell systems dispatch on this when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerReason {
    /// Attack cooldown finished
    AttackReady,
    /// Full-defense shield expires
    FullDefenseEnd,
    /// Adrenaline buff expires
    AdrenalineEnd,
    /// Escape/hunt commitment expires
    IntentExpired,
    /// Random heading offset while escaping expires
    JitterEnd,
    /// The last abandoned prey may be hunted again
    ForgetLastHunt,
    /// Repeating: measure units travelled
    SpeedSample,
    /// Repeating: life recovery and point decay
    Regeneration,
    /// Repeating, auto-cancel: abandon hunts that make no progress
    HuntPatience,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug, Clone)]
pub struct TimedEvent {
    pub id: TimerId,
    pub reason: TimerReason,
    pub timer: Timer,
    pub auto_cancel: bool,
}

impl TimedEvent {
    pub fn is_repeating(&self) -> bool {
        self.timer.mode() == TimerMode::Repeating
    }
}

/// Repeating timers shorter than this would fire thousands of times per tick
const MIN_REPEAT_MS: f32 = 1.0;

fn millis(ms: f32) -> Duration {
    Duration::from_micros((ms.max(0.0) * 1000.0).round() as u64)
}

#[derive(Component, Debug, Default, Clone)]
pub struct Scheduler {
    events: Vec<TimedEvent>,
    next_id: u64,
}

impl Scheduler {
    /// Queue a timer. `auto_cancel` only matters for repeating timers: they are
    /// dropped as soon as their handler reports `true`.
    pub fn schedule(
        &mut self,
        delay_ms: f32,
        reason: TimerReason,
        repeating: bool,
        auto_cancel: bool,
    ) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        let timer = if repeating {
            Timer::new(millis(delay_ms.max(MIN_REPEAT_MS)), TimerMode::Repeating)
        } else {
            Timer::new(millis(delay_ms), TimerMode::Once)
        };
        self.events.push(TimedEvent {
            id,
            reason,
            timer,
            auto_cancel,
        });
        id
    }

    pub fn after(&mut self, delay_ms: f32, reason: TimerReason) -> TimerId {
        self.schedule(delay_ms, reason, false, false)
    }

    pub fn every(&mut self, delay_ms: f32, reason: TimerReason) -> TimerId {
        self.schedule(delay_ms, reason, true, false)
    }

    /// Remove every pending timer with this reason, returning how many were dropped
    pub fn cancel(&mut self, reason: TimerReason) -> usize {
        let before = self.events.len();
        self.events.retain(|event| event.reason != reason);
        before - self.events.len()
    }

    pub fn cancel_id(&mut self, id: TimerId) -> bool {
        let before = self.events.len();
        self.events.retain(|event| event.id != id);
        before != self.events.len()
    }

    pub fn is_pending(&self, reason: TimerReason) -> bool {
        self.events.iter().any(|event| event.reason == reason)
    }

    fn contains(&self, id: TimerId) -> bool {
        self.events.iter().any(|event| event.id == id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimedEvent> {
        self.events.iter()
    }

    /// Advance every timer by `delta` and hand each due one to `handler`.
    ///
    /// The handler may schedule or cancel timers on the scheduler it receives.
    /// A timer cancelled by an earlier handler in the same call does not fire.
    /// Repeating timers fire once per completed interval and keep the overshoot.
    pub fn tick<F>(&mut self, delta: Duration, mut handler: F)
    where
        F: FnMut(TimerReason, &mut Scheduler) -> bool,
    {
        let mut due = Vec::new();
        for event in &mut self.events {
            event.timer.tick(delta);
            let fired = event.timer.times_finished_this_tick();
            if fired > 0 {
                due.push((event.id, event.reason, event.is_repeating(), event.auto_cancel, fired));
            }
        }

        for (id, reason, repeating, auto_cancel, fired) in due {
            if !repeating {
                if self.cancel_id(id) {
                    handler(reason, self);
                }
                continue;
            }
            for _ in 0..fired {
                if !self.contains(id) {
                    break;
                }
                let done = handler(reason, self);
                if auto_cancel && done {
                    self.cancel_id(id);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_fires_once_after_delay() {
        let mut scheduler = Scheduler::default();
        scheduler.after(100.0, TimerReason::AttackReady);

        let mut fired = Vec::new();
        scheduler.tick(Duration::from_millis(60), |reason, _| {
            fired.push(reason);
            false
        });
        assert!(fired.is_empty());

        scheduler.tick(Duration::from_millis(60), |reason, _| {
            fired.push(reason);
            false
        });
        assert_eq!(fired, vec![TimerReason::AttackReady]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn repeating_keeps_firing_and_carries_overshoot() {
        let mut scheduler = Scheduler::default();
        scheduler.every(100.0, TimerReason::Regeneration);

        let mut count = 0;
        for _ in 0..10 {
            scheduler.tick(Duration::from_millis(33), |_, _| {
                count += 1;
                false
            });
        }
        // 330ms elapsed -> fired at 132, 231, 330
        assert_eq!(count, 3);
        assert!(scheduler.is_pending(TimerReason::Regeneration));
    }

    #[test]
    fn auto_cancel_drops_repeating_timer_when_done() {
        let mut scheduler = Scheduler::default();
        scheduler.schedule(10.0, TimerReason::HuntPatience, true, true);

        let mut calls = 0;
        for _ in 0..5 {
            scheduler.tick(Duration::from_millis(10), |_, _| {
                calls += 1;
                calls == 2
            });
        }
        assert_eq!(calls, 2);
        assert!(!scheduler.is_pending(TimerReason::HuntPatience));
    }

    #[test]
    fn truthy_result_is_ignored_without_auto_cancel() {
        let mut scheduler = Scheduler::default();
        scheduler.every(10.0, TimerReason::SpeedSample);
        scheduler.tick(Duration::from_millis(10), |_, _| true);
        assert!(scheduler.is_pending(TimerReason::SpeedSample));
    }

    #[test]
    fn handler_can_schedule_follow_up() {
        let mut scheduler = Scheduler::default();
        scheduler.after(5.0, TimerReason::HuntPatience);
        scheduler.tick(Duration::from_millis(5), |reason, scheduler| {
            if reason == TimerReason::HuntPatience {
                scheduler.after(50.0, TimerReason::ForgetLastHunt);
            }
            false
        });
        assert!(scheduler.is_pending(TimerReason::ForgetLastHunt));
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn cancel_removes_by_reason() {
        let mut scheduler = Scheduler::default();
        scheduler.after(5.0, TimerReason::IntentExpired);
        scheduler.after(9.0, TimerReason::IntentExpired);
        scheduler.after(9.0, TimerReason::JitterEnd);
        assert_eq!(scheduler.cancel(TimerReason::IntentExpired), 2);
        assert!(scheduler.is_pending(TimerReason::JitterEnd));
    }

    #[test]
    fn timer_cancelled_by_an_earlier_handler_does_not_fire() {
        let mut scheduler = Scheduler::default();
        scheduler.after(10.0, TimerReason::AdrenalineEnd);
        scheduler.after(10.0, TimerReason::IntentExpired);

        let mut fired = Vec::new();
        scheduler.tick(Duration::from_millis(10), |reason, scheduler| {
            fired.push(reason);
            if reason == TimerReason::AdrenalineEnd {
                scheduler.cancel(TimerReason::IntentExpired);
            }
            false
        });
        assert_eq!(fired, vec![TimerReason::AdrenalineEnd]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn long_tick_fires_repeating_timer_per_interval() {
        let mut scheduler = Scheduler::default();
        scheduler.every(100.0, TimerReason::SpeedSample);

        let mut count = 0;
        scheduler.tick(Duration::from_millis(250), |_, _| {
            count += 1;
            false
        });
        assert_eq!(count, 2);
    }
}
