//! Demo: two partitions, one owner, a whistle across partitions, a death and
//! a save.
//!
//! Usage: `menagerie-sim [config.toml] [data-dir]`
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use menagerie_core::clock::SystemClock;
use menagerie_core::commands::{execute, Command, Invoker};
use menagerie_core::hooks::on_entity_loaded;
use menagerie_core::persistence::RegistryDb;
use menagerie_core::scheduler::on_tick;
use menagerie_core::{CompanionKind, DeadRegistry, Kennel, MenagerieConfig, OwnerId, Partition, Position};
use menagerie_sim::{SimObject, SimPartition};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => MenagerieConfig::from_file(Path::new(&path)).with_context(|| format!("loading {path}"))?,
        None => MenagerieConfig::default(),
    };
    let data_dir = PathBuf::from(args.next().unwrap_or_else(|| "menagerie-data".to_owned()));
    std::fs::create_dir_all(&data_dir).with_context(|| format!("creating {}", data_dir.display()))?;

    let dead = Arc::new(DeadRegistry::open(config.persistence.dead_registry_file(&data_dir))?);
    info!(tombstones = dead.len(), "Dead registry loaded");
    let mut kennel = Kennel::new(config, dead, Arc::new(SystemClock));

    let owner = OwnerId::new();
    let camp = Position::new(0.0, 64.0, 0.0);

    let mut overworld = SimPartition::new("overworld");
    let rex = overworld.spawn(SimObject::pet(owner, "wolf").named("Rex").at(Position::new(3.0, 64.0, 1.0)));
    let tabby = overworld.spawn(SimObject::pet(owner, "cat").at(Position::new(-2.0, 64.0, 4.0)));
    let thunder = overworld.spawn(
        SimObject::mount(owner, "horse")
            .named("Thunder")
            .at(Position::new(6.0, 64.0, -3.0))
            .carrying(&["saddle", "apple"]),
    );
    overworld.join(owner, camp);
    overworld.add_hostile(owner, Position::new(10.0, 64.0, 0.0));
    let overworld_id = overworld.id().clone();
    kennel.add_partition(overworld);

    let nether = SimPartition::new("nether");
    let nether_id = nether.id().clone();
    kennel.add_partition(nether);

    for key in [rex, tabby, thunder] {
        on_entity_loaded(&mut kennel, &overworld_id, key)?;
    }

    for tick in 1..=kennel.config.schedule.slow_capture_every {
        let report = on_tick(&mut kennel, tick);
        if report.targets_assigned > 0 {
            info!(tick, "Rex spotted a threat");
        }
    }

    // The owner steps into the nether and whistles for every pet.
    let here = Invoker {
        owner,
        partition: nether_id.clone(),
        position: Position::new(100.0, 40.0, 100.0),
    };
    let outcome = execute(&mut kennel, &here, Command::Call { kind: CompanionKind::Pet, name: None });
    for line in &outcome.feedback {
        info!(owner = %owner, "{line}");
    }
    let outcome = execute(&mut kennel, &here, Command::List { kind: CompanionKind::Pet });
    for line in &outcome.feedback {
        info!(owner = %owner, "{line}");
    }

    // Rex dies in the nether; the next sweep tombstones him for good.
    if let Some(shard) = kennel.shard_mut(&nether_id) {
        shard.partition.kill(rex);
    }
    let sweep_tick = kennel.config.schedule.dead_sweep_every;
    on_tick(&mut kennel, sweep_tick);
    info!(rex_dead = kennel.dead.contains(&rex), "Dead sweep finished");

    for id in [&overworld_id, &nether_id] {
        let path = data_dir.join(format!("{id}.db"));
        let mut db = RegistryDb::open(&path, &kennel.config.persistence)?;
        let rows = kennel.save_partition(id, &mut db)?;
        info!(partition = %id, rows, path = %path.display(), "Saved");
    }

    info!(counters = ?kennel.counters.snapshot(), "Done");
    Ok(())
}
