use std::path::PathBuf;
use std::time::Duration;

use bevy::app::ScheduleRunnerPlugin;
use bevy::log::{Level, LogPlugin};
use bevy::prelude::*;
use clap::Parser;

use cells_sim::cell::{Cell, PopulationStats};
use cells_sim::config::SimConfig;
use cells_sim::decision::Brain;
use cells_sim::dna::DnaPoint;
use cells_sim::upgrades::{choose_upgrade, ChooseUpgrade, PendingUpgrade};
use cells_sim::{advance_clock, CellsPlugin, SimulationClock, SimulationState};

/// Simulated seconds between population reports
const REPORT_EVERY_SECS: f64 = 5.0;

#[derive(Parser, Debug)]
#[command(name = "cells-sim", about = "Headless cell survival simulation")]
struct Cli {
    /// JSON config file; missing fields use built-in defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed for a reproducible run
    #[arg(long)]
    seed: Option<u64>,

    /// Bots spawned at startup
    #[arg(long)]
    bots: Option<usize>,

    /// Stop after this many logic ticks (0 runs forever)
    #[arg(long, default_value_t = 0)]
    ticks: u64,

    /// tracing filter, e.g. "info,cells_sim=debug"
    #[arg(long, default_value = "info")]
    log: String,

    /// Run bots only
    #[arg(long)]
    no_player: bool,
}

#[derive(Resource)]
struct TickLimit(u64);

fn load_config(cli: &Cli) -> Result<SimConfig, cells_sim::config::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => SimConfig::from_file(path)?,
        None => SimConfig::default(),
    };
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    if let Some(bots) = cli.bots {
        config.initial_bots = bots;
    }
    if cli.no_player {
        config.spawn_player = false;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> AppExit {
    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return AppExit::error();
        }
    };

    let frame = Duration::from_secs_f64(1.0 / config.logic_hz);
    App::new()
        .add_plugins(MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(frame)))
        .add_plugins(LogPlugin {
            filter: cli.log.clone(),
            level: Level::INFO,
            ..default()
        })
        .add_plugins(CellsPlugin { config })
        .insert_resource(TickLimit(cli.ticks))
        .add_systems(
            Update,
            auto_pick_upgrade
                .before(choose_upgrade)
                .run_if(in_state(SimulationState::ChoosingUpgrade)),
        )
        .add_systems(
            FixedUpdate,
            (report_population, stop_after_limit)
                .after(advance_clock)
                .run_if(in_state(SimulationState::Running)),
        )
        .run()
}

/// Without a keyboard nobody answers the offer, so take the first card
fn auto_pick_upgrade(pending: Res<PendingUpgrade>, mut choices: EventWriter<ChooseUpgrade>) {
    if pending.is_pending() {
        choices.send(ChooseUpgrade { index: 0 });
    }
}

fn report_population(
    config: Res<SimConfig>,
    clock: Res<SimulationClock>,
    stats: Res<PopulationStats>,
    cells: Query<(&Cell, &Brain)>,
    nodes: Query<&DnaPoint>,
) {
    let every = (REPORT_EVERY_SECS * config.logic_hz).round().max(1.0) as u64;
    if clock.ticks % every != 0 {
        return;
    }

    let leader = cells.iter().map(|(cell, _)| cell).max_by(|a, b| {
        a.level
            .cmp(&b.level)
            .then(a.total_points.total_cmp(&b.total_points))
    });
    let player = cells.iter().find(|(cell, _)| cell.is_player);
    let escaping = cells.iter().filter(|(_, brain)| brain.is_escaping()).count();
    let dead_drops = nodes.iter().filter(|node| !node.natural).count();

    info!(
        "t={:.0}s alive={} escaping={} deaths={} respawned={} out_of_bounds={} dead_drops={}",
        clock.elapsed_secs(),
        stats.alive,
        escaping,
        stats.deaths,
        stats.respawned,
        stats.out_of_bounds,
        dead_drops
    );
    if let Some(leader) = leader {
        info!(
            "leader {} level {} kills {} points {:.0}",
            leader.species, leader.level, leader.kills, leader.total_points
        );
    }
    if let Some((player, brain)) = player {
        info!(
            "player level {} life {:.0}/{:.0} stamina {:.0}/{:.0} hunted={}",
            player.level,
            player.life,
            player.max_life,
            player.stamina,
            player.max_stamina,
            brain.is_hunted()
        );
    }
}

fn stop_after_limit(
    limit: Res<TickLimit>,
    clock: Res<SimulationClock>,
    mut exit: EventWriter<AppExit>,
) {
    if limit.0 > 0 && clock.ticks >= limit.0 {
        info!("stopping after {} ticks", clock.ticks);
        exit.send(AppExit::Success);
    }
}
