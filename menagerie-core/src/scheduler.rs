//! Tick-driven maintenance passes.
//!
//! [`on_tick`] is called once per simulation tick and runs whichever passes
//! are due (`tick % cadence == 0`). Every pass except the dead sweep only
//! looks at objects within a radius of connected owners, so per-tick cost
//! follows online owners and their nearby companions rather than registry
//! size. A failure on one companion is logged and the pass moves on.

use chrono::{DateTime, Duration, Utc};
use ordered_float::OrderedFloat;
use tracing::{debug, error, info};

use crate::config::MenagerieConfig;
use crate::engine::{ObjectState, OwnerPresence, Partition};
use crate::kennel::{grant_tombstone, Kennel, Shard};
use crate::metrics::KennelCounters;
use crate::types::CompanionKind;

/// Message sent to riders thrown by an injured mount.
pub const TOO_INJURED: &str = "Your mount is too injured to carry you!";

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// The tick processed.
    pub tick: u64,
    /// Cooldown and debounce entries forgotten.
    pub cooldowns_pruned: usize,
    /// Pets given a new target.
    pub targets_assigned: usize,
    /// Companions healed.
    pub healed: usize,
    /// Pets whose target was cleared for low health.
    pub pacified: usize,
    /// Riders thrown by injured mounts.
    pub dismounted: usize,
    /// Records written by the unconditional capture.
    pub fast_captured: usize,
    /// Records written by the movement-gated capture.
    pub slow_captured: usize,
    /// Records of tombstoned keys flagged dead locally.
    pub dead_cleared: usize,
    /// Records newly found dead.
    pub marked_dead: usize,
    /// Tombstones granted by the sweep.
    pub tombstoned: usize,
    /// Dead records purged after retention.
    pub purged: usize,
    /// Loaded tombstoned objects destroyed.
    pub reaped: usize,
}

impl TickReport {
    /// Whether the dead sweep changed anything.
    #[must_use]
    pub const fn sweep_changed(&self) -> bool {
        self.dead_cleared + self.marked_dead + self.purged + self.reaped > 0
    }

    /// Whether nothing happened at all.
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        *self == Self { tick: self.tick, ..Self::default() }
    }
}

const fn due(tick: u64, every: u64) -> bool {
    every != 0 && tick % every == 0
}

/// Run every pass due at `tick`.
pub fn on_tick<P: Partition>(kennel: &mut Kennel<P>, tick: u64) -> TickReport {
    kennel.current_tick = tick;
    KennelCounters::bump(&kennel.counters.ticks, 1);
    let mut report = TickReport { tick, ..TickReport::default() };
    if !kennel.config.general.enabled {
        return report;
    }

    let schedule = kennel.config.schedule.clone();
    let now = kennel.clock.now();

    if due(tick, schedule.cleanup_every) {
        report.cooldowns_pruned = cleanup_cooldowns(kennel, now);
    }
    if due(tick, schedule.aggression_every) {
        report.targets_assigned = aggression_pass(kennel);
    }
    if due(tick, schedule.regen_every) {
        let (healed, pacified, dismounted) = regen_pass(kennel, now);
        report.healed = healed;
        report.pacified = pacified;
        report.dismounted = dismounted;
    }
    if due(tick, schedule.fast_capture_every) {
        report.fast_captured = fast_capture_pass(kennel, now);
    }
    if due(tick, schedule.slow_capture_every) {
        report.slow_captured = slow_capture_pass(kennel, now);
    }
    if due(tick, schedule.dead_sweep_every) {
        dead_sweep(kennel, now, &mut report);
        if report.sweep_changed() {
            info!(
                tick,
                cleared = report.dead_cleared,
                marked = report.marked_dead,
                purged = report.purged,
                reaped = report.reaped,
                "Dead sweep"
            );
        }
    }

    if !report.is_quiet() {
        debug!(?report, "Tick maintenance");
    }
    report
}

/// Live companions owned by `presence.owner` within `radius` of them.
fn companions_near<P: Partition>(
    shard: &Shard<P>,
    kennel_config: &MenagerieConfig,
    dead: &crate::dead_registry::DeadRegistry,
    presence: &OwnerPresence,
    radius: f64,
    kind: Option<CompanionKind>,
) -> Vec<(CompanionKind, ObjectState)> {
    shard
        .partition
        .objects_near(presence.position, radius)
        .into_iter()
        .filter(|o| o.alive && o.capability.is_owned_by(presence.owner) && !dead.contains(&o.key))
        .filter_map(|o| {
            let k = kennel_config.kind_of(&o.species)?;
            kind.is_none_or(|want| want == k).then_some((k, o))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Passes
// ---------------------------------------------------------------------------

/// Forget expired whistle, buck and interaction entries.
pub fn cleanup_cooldowns<P: Partition>(kennel: &mut Kennel<P>, now: DateTime<Utc>) -> usize {
    let s = &kennel.config.schedule;
    let whistle_keep = kennel.whistle.window().checked_add(&s.whistle_grace()).unwrap_or(Duration::MAX);
    let buck_keep = s.buck_retention();
    let interaction_keep = s.interaction_retention();

    let mut pruned = kennel.whistle.prune(now, whistle_keep);
    pruned += kennel.bucks.prune(now, buck_keep);
    pruned += kennel.buck_messages.prune(now, buck_keep);

    let stale: Vec<_> = kennel
        .interactions
        .iter()
        .filter(|(_, at)| now - **at > interaction_keep)
        .map(|(k, _)| *k)
        .collect();
    for key in &stale {
        kennel.interactions.pop(key);
    }
    pruned + stale.len()
}

/// Point idle, healthy, aggressive pets at the nearest visible hostile
/// that is targeting their owner.
pub fn aggression_pass<P: Partition>(kennel: &mut Kennel<P>) -> usize {
    let config = &kennel.config;
    if !config.pets.attack_hostiles {
        return 0;
    }
    let range = config.pets.aggression_range;
    let radius = config.schedule.aggression_radius;
    let mut assigned = 0;

    for shard in &mut kennel.shards {
        for presence in shard.partition.online_owners() {
            let pets = companions_near(shard, config, &kennel.dead, &presence, radius, Some(CompanionKind::Pet));
            for (_, pet) in pets {
                if !config.is_aggressive(&pet.species)
                    || pet.health_percent() <= config.health.fight_threshold_percent
                    || pet.target.is_some_and(|t| shard.partition.is_alive(t))
                {
                    continue;
                }
                let threat = shard
                    .partition
                    .hostiles_targeting(presence.owner, presence.position, range)
                    .into_iter()
                    .filter(|h| pet.position.within(&h.position, range))
                    .filter(|h| shard.partition.can_see(pet.key, h.key))
                    .min_by_key(|h| OrderedFloat(pet.position.distance_sq(&h.position)));
                if let Some(hostile) = threat {
                    shard.partition.set_target(pet.key, Some(hostile.key));
                    debug!(pet = %pet.key, hostile = %hostile.key, "Pet engaging threat to owner");
                    assigned += 1;
                }
            }
        }
    }
    assigned
}

/// Heal companions, calm badly hurt pets and throw riders off badly hurt
/// mounts. Returns `(healed, pacified, dismounted)`.
pub fn regen_pass<P: Partition>(kennel: &mut Kennel<P>, now: DateTime<Utc>) -> (usize, usize, usize) {
    let config = &kennel.config;
    let radius = config.schedule.regen_radius;
    let step = config.health.regen_step;
    let (mut healed, mut pacified, mut dismounted) = (0, 0, 0);

    for shard in &mut kennel.shards {
        for presence in shard.partition.online_owners() {
            for (kind, obj) in companions_near(shard, config, &kennel.dead, &presence, radius, None) {
                let mut health = obj.health;
                if config.regen_enabled(kind) && obj.health < obj.max_health {
                    shard.partition.heal(obj.key, step);
                    health = (health + step).min(obj.max_health);
                    healed += 1;
                }
                let percent = if obj.max_health > 0.0 { health / obj.max_health * 100.0 } else { 0.0 };

                match kind {
                    CompanionKind::Pet => {
                        if config.immortal(kind)
                            && percent <= config.health.fight_threshold_percent
                            && (obj.target.is_some() || obj.sitting)
                        {
                            shard.partition.set_target(obj.key, None);
                            shard.partition.set_sitting(obj.key, false);
                            pacified += 1;
                        }
                    }
                    CompanionKind::Mount => {
                        if config.immortal(kind)
                            && percent <= config.health.carry_threshold_percent
                            && obj.has_riders
                            && !kennel.bucks.is_on_cooldown(obj.key, now)
                        {
                            kennel.bucks.set_cooldown(obj.key, now);
                            let riders = shard.partition.dismount_riders(obj.key);
                            dismounted += riders.len();
                            for rider in riders {
                                if !kennel.buck_messages.is_on_cooldown(rider, now) {
                                    shard.partition.notify(rider, TOO_INJURED);
                                    kennel.buck_messages.set_cooldown(rider, now);
                                }
                            }
                        }
                    }
                }
            }
        }
    }
    (healed, pacified, dismounted)
}

/// Re-capture every companion near its owner, moved or not.
pub fn fast_capture_pass<P: Partition>(kennel: &mut Kennel<P>, now: DateTime<Utc>) -> usize {
    let radius = kennel.config.schedule.fast_capture_radius;
    capture_near_owners(kennel, now, radius, None)
}

/// Re-capture companions near their owner that moved past the threshold
/// since their last capture, plus any not yet recorded.
pub fn slow_capture_pass<P: Partition>(kennel: &mut Kennel<P>, now: DateTime<Utc>) -> usize {
    let radius = kennel.config.schedule.slow_capture_radius;
    let threshold = kennel.config.schedule.movement_threshold_sq;
    capture_near_owners(kennel, now, radius, Some(threshold))
}

fn capture_near_owners<P: Partition>(
    kennel: &mut Kennel<P>,
    now: DateTime<Utc>,
    radius: f64,
    movement_threshold_sq: Option<f64>,
) -> usize {
    let config = &kennel.config;
    let mut written = 0;
    for shard in &mut kennel.shards {
        for presence in shard.partition.online_owners() {
            for (_, obj) in companions_near(shard, config, &kennel.dead, &presence, radius, None) {
                if let Some(threshold) = movement_threshold_sq {
                    let moved = shard
                        .store
                        .get(&obj.key)
                        .is_none_or(|r| r.position.distance_sq(&obj.position) > threshold);
                    if !moved {
                        continue;
                    }
                }
                match shard.capture_object(config, &obj, now) {
                    Ok(outcome) if outcome.written() => written += 1,
                    Ok(_) => {}
                    Err(e) => error!(key = %obj.key, partition = %shard.id(), error = %e, "Periodic capture failed"),
                }
            }
        }
    }
    KennelCounters::bump(&kennel.counters.captures, written);
    written
}

/// Propagate local deaths into the tombstone registry, purge expired dead
/// records and destroy loaded objects whose key is tombstoned.
pub fn dead_sweep<P: Partition>(kennel: &mut Kennel<P>, now: DateTime<Utc>, report: &mut TickReport) {
    let cutoff = now
        .checked_sub_signed(kennel.config.schedule.dead_retention())
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    for shard in &mut kennel.shards {
        for key in shard.store.keys() {
            if kennel.dead.contains(&key) {
                let had_snapshot = shard.store.get(&key).is_some_and(|r| r.snapshot.is_some());
                if shard.store.mark_dead(&key, now) || had_snapshot {
                    report.dead_cleared += 1;
                }
                continue;
            }

            let record_dead = shard.store.get(&key).is_some_and(|r| !r.alive);
            let loaded_dead = shard.partition.object(key).is_some_and(|o| !o.alive);
            if record_dead || loaded_dead {
                if shard.store.mark_dead(&key, now) {
                    report.marked_dead += 1;
                }
                if grant_tombstone(&kennel.dead, &kennel.counters, key) {
                    report.tombstoned += 1;
                }
            }
        }

        let purged = shard.store.purge_dead_before(cutoff);
        report.purged += purged.len();

        for obj in shard.partition.loaded_objects() {
            if kennel.dead.contains(&obj.key) && shard.partition.destroy(obj.key) {
                info!(key = %obj.key, partition = %shard.id(), "Destroyed loaded tombstoned companion");
                report.reaped += 1;
            }
        }
    }

    KennelCounters::bump(&kennel.counters.purged, report.purged);
    KennelCounters::bump(&kennel.counters.reaped, report.reaped);
}
