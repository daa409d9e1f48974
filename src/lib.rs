//! Headless multi-agent survival simulation on bevy ECS.
//!
//! Cells roam a bounded map, harvest DNA, hunt and flee each other, and level
//! up through a weighted card draft. Everything runs in `FixedUpdate`; a host
//! adds [`CellsPlugin`] and reads components, resources and events.

pub mod cell;
pub mod combat;
pub mod config;
pub mod decision;
pub mod dna;
pub mod effects;
pub mod follow;
pub mod movement;
pub mod rng;
pub mod scheduler;
pub mod upgrades;

use bevy::prelude::*;
use bevy::state::app::StatesPlugin;
use bevy::time::Stopwatch;

use cell::{cull_cells, maintain_population, spawn_world, tick_timers, CellDied, PopulationStats};
use combat::resolve_combat;
use config::SimConfig;
use decision::decide;
use dna::harvest_dna;
use follow::FollowTarget;
use movement::{move_cells, read_player_input, refresh_effects, PlayerInput};
use rng::SimRng;
use upgrades::{choose_upgrade, level_up_cells, CellLeveledUp, ChooseUpgrade, PendingUpgrade};

/// Simulation run state
#[derive(States, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SimulationState {
    #[default]
    Running,
    Paused,
    /// The player has an upgrade offer open
    ChoosingUpgrade,
}

/// Logic ticks run so far and the simulated time they cover
#[derive(Resource, Debug, Default, Clone)]
pub struct SimulationClock {
    pub ticks: u64,
    pub elapsed: Stopwatch,
}

impl SimulationClock {
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.elapsed_secs_f64()
    }
}

pub fn advance_clock(config: Res<SimConfig>, mut clock: ResMut<SimulationClock>) {
    clock.ticks += 1;
    clock.elapsed.tick(config.tick_duration());
}

/// Space toggles between running and paused. Ignored while an upgrade is pending.
pub fn toggle_pause(
    keys: Option<Res<ButtonInput<KeyCode>>>,
    state: Res<State<SimulationState>>,
    mut next_state: ResMut<NextState<SimulationState>>,
) {
    let Some(keys) = keys else {
        return;
    };
    if !keys.just_pressed(KeyCode::Space) {
        return;
    }
    match state.get() {
        SimulationState::Running => next_state.set(SimulationState::Paused),
        SimulationState::Paused => next_state.set(SimulationState::Running),
        SimulationState::ChoosingUpgrade => {}
    }
}

/// Registers every resource, event and system of the simulation
#[derive(Default)]
pub struct CellsPlugin {
    pub config: SimConfig,
}

impl Plugin for CellsPlugin {
    fn build(&self, app: &mut App) {
        if !app.is_plugin_added::<StatesPlugin>() {
            app.add_plugins(StatesPlugin);
        }

        app.insert_resource(self.config.clone())
            .insert_resource(SimRng::new(self.config.seed))
            .insert_resource(Time::<Fixed>::from_hz(self.config.logic_hz))
            .init_resource::<PopulationStats>()
            .init_resource::<FollowTarget>()
            .init_resource::<PendingUpgrade>()
            .init_resource::<PlayerInput>()
            .init_resource::<SimulationClock>()
            .init_state::<SimulationState>()
            .add_event::<CellDied>()
            .add_event::<CellLeveledUp>()
            .add_event::<ChooseUpgrade>()
            .add_systems(Startup, spawn_world)
            .add_systems(
                Update,
                (
                    read_player_input,
                    toggle_pause,
                    choose_upgrade.run_if(in_state(SimulationState::ChoosingUpgrade)),
                )
                    .chain(),
            )
            .add_systems(
                FixedUpdate,
                (
                    // DNA first, then cells
                    harvest_dna,
                    tick_timers,
                    decide,
                    refresh_effects,
                    resolve_combat,
                    move_cells,
                    level_up_cells,
                    cull_cells,
                    maintain_population,
                    advance_clock,
                )
                    .chain()
                    .run_if(in_state(SimulationState::Running)),
            );
    }
}

/// App with `MinimalPlugins` and the simulation, nothing else
pub fn headless_app(config: SimConfig) -> App {
    let mut app = App::new();
    app.add_plugins(MinimalPlugins)
        .add_plugins(CellsPlugin { config });
    app
}

/// Run `ticks` logic ticks directly, independent of wall time
pub fn step(app: &mut App, ticks: usize) {
    for _ in 0..ticks {
        app.world_mut().run_schedule(FixedUpdate);
    }
}
