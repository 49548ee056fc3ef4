//! Engine event hooks.
//!
//! The host calls these when its partitions report that an object loaded,
//! that an owner interacted with a companion, or that something took damage.
//! They keep the stores current between scheduled captures and enforce the
//! friendly-fire and immortality rules.

use tracing::debug;

use crate::engine::Partition;
use crate::error::{MenagerieError, Result};
use crate::kennel::Kennel;
use crate::metrics::KennelCounters;
use crate::types::{CompanionKind, EntityKey, OwnerId, PartitionId};

/// Who or what dealt damage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attacker {
    /// A player.
    Player(OwnerId),
    /// Another loaded object, identified by key.
    Object(EntityKey),
    /// Falling, fire, drowning and the like.
    Environment,
}

/// A damage event about to be applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamageEvent {
    /// The object being hit.
    pub victim: EntityKey,
    /// The source.
    pub attacker: Attacker,
    /// Raw amount before the engine's armor math.
    pub amount: f32,
}

/// What the engine should do with a damage event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageVerdict {
    /// Apply normally.
    Allow,
    /// Drop the damage entirely.
    Cancel,
    /// Drop the damage and set health to one.
    SurviveAtOne,
}

fn shard_index<P: Partition>(kennel: &Kennel<P>, partition: &PartitionId) -> Result<usize> {
    kennel
        .shard_index(partition)
        .ok_or_else(|| MenagerieError::UnknownPartition(partition.clone()))
}

/// An object finished loading in `partition`. Owned companions are captured;
/// tombstoned ones are destroyed on the spot. Returns whether a record was
/// written.
///
/// # Errors
/// `UnknownPartition`, or capture failures from the engine.
pub fn on_entity_loaded<P: Partition>(kennel: &mut Kennel<P>, partition: &PartitionId, key: EntityKey) -> Result<bool> {
    let idx = shard_index(kennel, partition)?;
    if kennel.dead.contains(&key) {
        if kennel.shards[idx].partition.destroy(key) {
            KennelCounters::bump(&kennel.counters.reaped, 1);
            debug!(%key, %partition, "Destroyed tombstoned companion on load");
        }
        return Ok(false);
    }
    let Some(object) = kennel.shards[idx].partition.object(key) else {
        return Ok(false);
    };
    if !object.alive || object.owner().is_none() || kennel.config.kind_of(&object.species).is_none() {
        return Ok(false);
    }
    Ok(kennel.capture(idx, key)?.written())
}

/// `actor` interacted with companion `key`. Captures at most once per
/// debounce window per companion. Returns whether a record was written.
///
/// # Errors
/// `UnknownPartition`, or capture failures from the engine.
pub fn on_interaction<P: Partition>(
    kennel: &mut Kennel<P>,
    partition: &PartitionId,
    actor: OwnerId,
    key: EntityKey,
) -> Result<bool> {
    let idx = shard_index(kennel, partition)?;
    let Some(object) = kennel.shards[idx].partition.object(key) else {
        return Ok(false);
    };
    if !object.capability.is_owned_by(actor)
        || kennel.config.kind_of(&object.species).is_none()
        || kennel.dead.contains(&key)
    {
        return Ok(false);
    }

    let now = kennel.now();
    let debounce = kennel.config.schedule.interaction_debounce();
    if kennel.interactions.peek(&key).is_some_and(|last| now - *last < debounce) {
        return Ok(false);
    }
    kennel.interactions.put(key, now);
    Ok(kennel.capture(idx, key)?.written())
}

/// Decide what happens to damage aimed at a loaded object.
///
/// Non-companions are always `Allow`. With friendly fire disabled, hits from
/// the owner or from another companion of the same owner are cancelled and
/// both sides drop their targets. Immortal kinds never take lethal damage,
/// and pets that fall to the fight threshold stop fighting.
pub fn on_damage<P: Partition>(kennel: &mut Kennel<P>, partition: &PartitionId, event: DamageEvent) -> DamageVerdict {
    let Some(idx) = kennel.shard_index(partition) else {
        return DamageVerdict::Allow;
    };
    let config = &kennel.config;
    let shard = &mut kennel.shards[idx];
    let Some(victim) = shard.partition.object(event.victim) else {
        return DamageVerdict::Allow;
    };
    let (Some(kind), Some(owner)) = (config.kind_of(&victim.species), victim.owner()) else {
        return DamageVerdict::Allow;
    };

    if config.combat.disable_friendly_fire {
        match event.attacker {
            Attacker::Player(player) if player == owner => return DamageVerdict::Cancel,
            Attacker::Object(other) => {
                let same_owner = shard
                    .partition
                    .object(other)
                    .is_some_and(|o| o.owner() == Some(owner) && config.kind_of(&o.species).is_some());
                if same_owner {
                    shard.partition.set_target(event.victim, None);
                    shard.partition.set_target(other, None);
                    debug!(victim = %event.victim, attacker = %other, "Cancelled friendly fire");
                    return DamageVerdict::Cancel;
                }
            }
            _ => {}
        }
    }

    if !config.immortal(kind) {
        return DamageVerdict::Allow;
    }
    let remaining = victim.health - event.amount;
    if kind == CompanionKind::Pet && victim.max_health > 0.0 {
        let percent = remaining.max(0.0) / victim.max_health * 100.0;
        if percent <= config.health.fight_threshold_percent && victim.target.is_some() {
            shard.partition.set_target(event.victim, None);
        }
    }
    if remaining <= 0.0 {
        debug!(victim = %event.victim, "Lethal damage absorbed");
        DamageVerdict::SurviveAtOne
    } else {
        DamageVerdict::Allow
    }
}
