//! Owner-facing commands.
//!
//! Each [`Command`] runs as a short pipeline: cooldown check, target
//! resolution, per-target action with isolated failures, then feedback.
//! Nothing here returns an error to the caller. Every invocation yields a
//! [`CommandOutcome`] with a count (zero for no-ops and failures) and the
//! lines to show the invoking owner.

use ordered_float::OrderedFloat;
use rand::Rng;
use tracing::{info, warn};

use crate::engine::{ObjectState, Partition};
use crate::error::{MenagerieError, Result};
use crate::kennel::Kennel;
use crate::ownership::{release_plan, ReleasePlan};
use crate::relocation::relocate;
use crate::types::{CompanionKind, EntityKey, OwnerId, PartitionId, Position, UNNAMED};

/// Number of whistle sound variants.
const WHISTLE_VARIANTS: u8 = 3;

/// A command issued by an owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Relocate owned companions to the caller, optionally by name.
    Call {
        /// Pets or mounts.
        kind: CompanionKind,
        /// Exact name, case-insensitive. `None` calls all of them.
        name: Option<String>,
    },
    /// Register nearby owned companions.
    Find {
        /// Pets or mounts.
        kind: CompanionKind,
    },
    /// Show callable companions and where they were last seen.
    List {
        /// Pets or mounts.
        kind: CompanionKind,
    },
    /// Loaded/tracked/alive/dead tallies.
    Debug {
        /// Pets or mounts.
        kind: CompanionKind,
    },
    /// Release a nearby owned companion back to the wild.
    SetFree {
        /// Pets or mounts.
        kind: CompanionKind,
        /// Name of the companion.
        name: String,
    },
    /// Remove a nearby owned companion from the world.
    Dismiss {
        /// Pets or mounts.
        kind: CompanionKind,
        /// Name of the companion.
        name: String,
    },
    /// Make loaded pets stand and follow, nearest `count` only if given.
    Follow {
        /// Upper bound on pets processed.
        count: Option<usize>,
    },
    /// Make loaded pets sit.
    Sit,
    /// Call every pet, then make them follow.
    CallFollow,
}

/// Who issued a command, and from where.
#[derive(Debug, Clone, PartialEq)]
pub struct Invoker {
    /// The owner.
    pub owner: OwnerId,
    /// Partition the owner is in.
    pub partition: PartitionId,
    /// Owner's position in that partition.
    pub position: Position,
}

/// Sound the host should play after a successful call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundCue {
    /// Whistle variant `0..3`.
    Whistle(u8),
    /// The kind's own ambient sound.
    KindDefault(CompanionKind),
}

/// Result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// How many companions were affected.
    pub count: usize,
    /// Lines to show the owner, in order.
    pub feedback: Vec<String>,
    /// Sound to play, if any.
    pub sound: Option<SoundCue>,
}

impl CommandOutcome {
    fn message(count: usize, line: impl Into<String>) -> Self {
        Self {
            count,
            feedback: vec![line.into()],
            sound: None,
        }
    }

    fn say(&mut self, line: impl Into<String>) {
        self.feedback.push(line.into());
    }
}

/// Name matching for `call`, `setfree` and `dismiss`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameFilter(Option<String>);

impl NameFilter {
    /// Blank or absent matches everything; "Unknown" means unnamed.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            None => Self(None),
            Some(s) if s.eq_ignore_ascii_case("unknown") => Self(Some(UNNAMED.to_lowercase())),
            Some(s) => Self(Some(s.to_lowercase())),
        }
    }

    /// Whether the filter accepts every name.
    #[must_use]
    pub const fn is_all(&self) -> bool {
        self.0.is_none()
    }

    /// Case-insensitive comparison, with no name treated as "Noname".
    #[must_use]
    pub fn matches(&self, display_name: Option<&str>) -> bool {
        self.0
            .as_ref()
            .is_none_or(|want| display_name.unwrap_or(UNNAMED).to_lowercase() == *want)
    }
}

/// Pick the cue for a successful call.
#[must_use]
pub fn pick_sound(sounds_enabled: bool, kind: CompanionKind) -> SoundCue {
    if sounds_enabled {
        SoundCue::Whistle(rand::thread_rng().gen_range(0..WHISTLE_VARIANTS))
    } else {
        SoundCue::KindDefault(kind)
    }
}

/// Run `command` on behalf of `invoker`.
pub fn execute<P: Partition>(kennel: &mut Kennel<P>, invoker: &Invoker, command: Command) -> CommandOutcome {
    if kennel.shard_index(&invoker.partition).is_none() {
        warn!(partition = %invoker.partition, owner = %invoker.owner, "Command from unknown partition");
        return CommandOutcome::message(0, "An error occurred.");
    }
    match command {
        Command::Call { kind, name } => call(kennel, invoker, kind, name.as_deref()),
        Command::Find { kind } => find(kennel, invoker, kind),
        Command::List { kind } => list(kennel, invoker, kind),
        Command::Debug { kind } => debug_info(kennel, invoker, kind),
        Command::SetFree { kind, name } => set_free(kennel, invoker, kind, &name),
        Command::Dismiss { kind, name } => dismiss(kennel, invoker, kind, &name),
        Command::Follow { count } => follow(kennel, invoker, count),
        Command::Sit => sit(kennel, invoker),
        Command::CallFollow => {
            let mut outcome = call(kennel, invoker, CompanionKind::Pet, None);
            if outcome.count > 0 {
                let followed = follow(kennel, invoker, None);
                outcome.feedback.extend(followed.feedback);
            }
            outcome
        }
    }
}

// ---------------------------------------------------------------------------
// call
// ---------------------------------------------------------------------------

fn call<P: Partition>(
    kennel: &mut Kennel<P>,
    invoker: &Invoker,
    kind: CompanionKind,
    name: Option<&str>,
) -> CommandOutcome {
    let now = kennel.now();
    if kennel.whistle.is_on_cooldown(invoker.owner, now) {
        let secs = kennel.whistle.remaining_secs_ceil(invoker.owner, now);
        return CommandOutcome::message(0, format!("Whistle is on cooldown! {secs} seconds remaining."));
    }
    kennel.whistle.set_cooldown(invoker.owner, now);

    let owned = kennel.callable(invoker.owner, kind);
    if owned.is_empty() {
        return CommandOutcome::message(0, format!("No callable {} found!", kind.plural()));
    }

    let filter = NameFilter::parse(name);
    let targets: Vec<_> = owned
        .into_iter()
        .filter(|r| filter.matches(r.display_name.as_deref()))
        .collect();

    let mut outcome = CommandOutcome::default();
    let shown = name.map(str::trim).unwrap_or_default();
    if targets.is_empty() {
        outcome.say(format!("No {} found with name: {shown}", kind.noun()));
        outcome.say(format!("Use 'list' to see your callable {}.", kind.plural()));
        return outcome;
    }
    if !filter.is_all() {
        outcome.say(format!(
            "You have {} callable {} named '{shown}', attempting to call...",
            targets.len(),
            kind.noun_for(targets.len())
        ));
    }

    let mut failed = 0usize;
    for record in &targets {
        match relocate(kennel, record.key, &invoker.partition, invoker.position) {
            Ok(_) => outcome.count += 1,
            Err(e) => {
                warn!(key = %record.key, name = record.name(), error = %e, "Call failed for companion");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        outcome.say(format!("Failed to call {failed} {}.", kind.noun_for(failed)));
    }
    if outcome.count > 0 {
        outcome.say(format!("Called {} {}!", outcome.count, kind.noun_for(outcome.count)));
        outcome.sound = Some(pick_sound(kennel.config.whistle.sounds_enabled, kind));
    }
    info!(owner = %invoker.owner, %kind, called = outcome.count, failed, "Whistle");
    outcome
}

// ---------------------------------------------------------------------------
// find / list / debug
// ---------------------------------------------------------------------------

fn find<P: Partition>(kennel: &mut Kennel<P>, invoker: &Invoker, kind: CompanionKind) -> CommandOutcome {
    let Some(idx) = kennel.shard_index(&invoker.partition) else {
        return CommandOutcome::default();
    };
    let radius = kennel.config.commands.find_radius;
    let nearby: Vec<EntityKey> = kennel.shards[idx]
        .partition
        .objects_near(invoker.position, radius)
        .into_iter()
        .filter(|o| {
            o.alive
                && o.capability.is_owned_by(invoker.owner)
                && kennel.config.kind_of(&o.species) == Some(kind)
                && !kennel.dead.contains(&o.key)
        })
        .map(|o| o.key)
        .collect();

    let mut found = 0usize;
    for key in nearby {
        match kennel.capture(idx, key) {
            Ok(_) => found += 1,
            Err(e) => warn!(%key, error = %e, "Find could not capture companion"),
        }
    }

    if found > 0 {
        CommandOutcome::message(found, format!("Found and registered {found} {}!", kind.noun_for(found)))
    } else {
        CommandOutcome::message(
            0,
            format!(
                "No {} found to register. Make sure you have tamed {} nearby.",
                kind.plural(),
                kind.plural()
            ),
        )
    }
}

fn list<P: Partition>(kennel: &Kennel<P>, invoker: &Invoker, kind: CompanionKind) -> CommandOutcome {
    let mut records = kennel.callable(invoker.owner, kind);
    records.retain(|r| r.alive);
    records.sort_by_cached_key(|r| r.name().to_lowercase());

    let mut outcome = CommandOutcome::message(
        records.len(),
        format!("You have {} callable {}.", records.len(), kind.plural()),
    );
    if records.is_empty() {
        outcome.say("- None");
    }
    for record in &records {
        outcome.say(format!("- {} {}", record.name(), record.position));
    }
    outcome.say(format!(
        "Use 'find' to make nearby {} callable, and 'call <name>' to call them!",
        kind.plural()
    ));
    outcome
}

fn debug_info<P: Partition>(kennel: &Kennel<P>, invoker: &Invoker, kind: CompanionKind) -> CommandOutcome {
    let mut loaded: Vec<EntityKey> = kennel
        .shards
        .iter()
        .flat_map(|s| s.partition.loaded_objects())
        .filter(|o| o.capability.is_owned_by(invoker.owner) && kennel.config.kind_of(&o.species) == Some(kind))
        .map(|o| o.key)
        .collect();
    loaded.sort_unstable();
    loaded.dedup();

    let tracked = kennel.aggregate(invoker.owner, Some(kind));
    let alive = tracked.iter().filter(|r| r.alive).count();
    let title = match kind {
        CompanionKind::Pet => "Pet",
        CompanionKind::Mount => "Mount",
    };

    let mut outcome = CommandOutcome::message(1, format!("=== {title} Debug Info ==="));
    outcome.say(format!("Owner: {}", invoker.owner));
    outcome.say(format!("Currently loaded {}: {}", kind.plural(), loaded.len()));
    outcome.say(format!("Total tracked {}: {}", kind.plural(), tracked.len()));
    outcome.say(format!("- Alive: {alive}"));
    outcome.say(format!("- Dead: {} (will be cleaned up)", tracked.len() - alive));
    outcome
}

// ---------------------------------------------------------------------------
// setfree / dismiss
// ---------------------------------------------------------------------------

/// Nearest loaded companion named `name` within the interaction radius that
/// the invoker owns.
fn resolve_nearby<P: Partition>(
    kennel: &Kennel<P>,
    invoker: &Invoker,
    kind: CompanionKind,
    name: &str,
) -> Result<(usize, ObjectState)> {
    let idx = kennel
        .shard_index(&invoker.partition)
        .ok_or_else(|| MenagerieError::UnknownPartition(invoker.partition.clone()))?;
    let filter = NameFilter::parse(Some(name));
    let radius = kennel.config.commands.interaction_radius;
    let distance = |o: &ObjectState| OrderedFloat(o.position.distance_sq(&invoker.position));

    let mut candidates: Vec<ObjectState> = kennel.shards[idx]
        .partition
        .objects_near(invoker.position, radius)
        .into_iter()
        .filter(|o| {
            o.alive
                && kennel.config.kind_of(&o.species) == Some(kind)
                && filter.matches(o.display_name.as_deref())
        })
        .collect();
    candidates.sort_by_key(distance);

    if let Some(pos) = candidates.iter().position(|o| o.capability.is_owned_by(invoker.owner)) {
        return Ok((idx, candidates.swap_remove(pos)));
    }
    match candidates.first() {
        Some(other) => Err(MenagerieError::Unowned(other.key)),
        None => Err(MenagerieError::NotPerceivable { name: name.to_owned() }),
    }
}

fn forget<P: Partition>(kennel: &mut Kennel<P>, key: EntityKey) {
    for shard in &mut kennel.shards {
        shard.store.remove(&key);
    }
}

fn not_owned_nearby(kind: CompanionKind, name: &str, e: &MenagerieError) -> CommandOutcome {
    warn!(name, error = %e, "No owned companion in reach");
    let mut outcome = CommandOutcome::message(0, format!("No owned {} found with name: {name}", kind.noun()));
    outcome.say(format!("Stand near the {} and use 'list' to check its name.", kind.noun()));
    outcome
}

fn set_free<P: Partition>(kennel: &mut Kennel<P>, invoker: &Invoker, kind: CompanionKind, name: &str) -> CommandOutcome {
    let (idx, object) = match resolve_nearby(kennel, invoker, kind, name) {
        Ok(found) => found,
        Err(e) => return not_owned_nearby(kind, name, &e),
    };
    let plan = release_plan(kind, kennel.config.is_builtin_mount(&object.species));
    let shown = object.display_name.as_deref().unwrap_or(UNNAMED).to_owned();

    if let Err(e) = kennel.shards[idx].partition.release(object.key, plan) {
        warn!(key = %object.key, error = %e, "Release failed");
        return CommandOutcome::message(0, format!("Failed to set {shown} free."));
    }
    forget(kennel, object.key);
    info!(key = %object.key, owner = %invoker.owner, ?plan, "Companion set free");

    match plan {
        ReleasePlan::Destroy => CommandOutcome::message(1, format!("{shown} has been released from ownership.")),
        ReleasePlan::ClearTamed | ReleasePlan::StripOwnership => {
            CommandOutcome::message(1, format!("{shown} has been set free and is now wild!"))
        }
    }
}

fn dismiss<P: Partition>(kennel: &mut Kennel<P>, invoker: &Invoker, kind: CompanionKind, name: &str) -> CommandOutcome {
    let (idx, object) = match resolve_nearby(kennel, invoker, kind, name) {
        Ok(found) => found,
        Err(e) => return not_owned_nearby(kind, name, &e),
    };
    let shown = object.display_name.as_deref().unwrap_or(UNNAMED).to_owned();
    let partition = &mut kennel.shards[idx].partition;
    let dropped = if kind == CompanionKind::Mount {
        partition.drop_inventory(object.key)
    } else {
        0
    };
    partition.destroy(object.key);
    forget(kennel, object.key);
    info!(key = %object.key, owner = %invoker.owner, dropped, "Companion dismissed");
    CommandOutcome::message(1, format!("You dismissed {shown} from the world."))
}

// ---------------------------------------------------------------------------
// follow / sit
// ---------------------------------------------------------------------------

/// Registered pets of the invoker that are loaded, alive and still tamed by
/// them, with their shard index.
fn loaded_pets<P: Partition>(kennel: &Kennel<P>, owner: OwnerId) -> Vec<(usize, ObjectState)> {
    kennel
        .callable(owner, CompanionKind::Pet)
        .into_iter()
        .filter_map(|r| kennel.locate(r.key))
        .filter(|(_, o)| o.alive && o.capability.is_owned_by(owner))
        .collect()
}

fn follow<P: Partition>(kennel: &mut Kennel<P>, invoker: &Invoker, count: Option<usize>) -> CommandOutcome {
    let Some(here) = kennel.shard_index(&invoker.partition) else {
        return CommandOutcome::default();
    };
    let mut pets = loaded_pets(kennel, invoker.owner);
    if let Some(limit) = count {
        pets.sort_by_key(|(idx, o)| {
            OrderedFloat(if *idx == here {
                o.position.distance_sq(&invoker.position)
            } else {
                f64::INFINITY
            })
        });
        pets.truncate(limit);
    }

    let teleport_sq = kennel.config.commands.follow_teleport_distance.powi(2);
    let mut outcome = CommandOutcome::default();
    let mut failed = 0usize;
    for (idx, pet) in pets {
        let partition = &mut kennel.shards[idx].partition;
        partition.set_sitting(pet.key, false);
        partition.set_target(pet.key, None);
        if idx == here && pet.position.distance_sq(&invoker.position) > teleport_sq {
            if let Err(e) = partition.teleport(pet.key, invoker.position) {
                warn!(key = %pet.key, error = %e, "Follow teleport failed");
                failed += 1;
                continue;
            }
        }
        if let Err(e) = kennel.capture(idx, pet.key) {
            warn!(key = %pet.key, error = %e, "Follow capture failed");
        }
        outcome.count += 1;
    }

    if failed > 0 {
        outcome.say(format!("{failed} {} could not be found.", CompanionKind::Pet.noun_for(failed)));
    }
    if outcome.count == 0 && failed == 0 {
        outcome.say("No pets found to follow.");
    }
    outcome
}

fn sit<P: Partition>(kennel: &mut Kennel<P>, invoker: &Invoker) -> CommandOutcome {
    let pets = loaded_pets(kennel, invoker.owner);
    let mut outcome = CommandOutcome::default();
    for (idx, pet) in pets {
        let partition = &mut kennel.shards[idx].partition;
        partition.set_sitting(pet.key, true);
        partition.set_target(pet.key, None);
        if let Err(e) = kennel.capture(idx, pet.key) {
            warn!(key = %pet.key, error = %e, "Sit capture failed");
        }
        outcome.count += 1;
    }
    if outcome.count == 0 {
        outcome.say("No pets found to sit.");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_filter_matches_everything() {
        let filter = NameFilter::parse(Some("   "));
        assert!(filter.is_all());
        assert!(filter.matches(Some("Rex")));
        assert!(filter.matches(None));
    }

    #[test]
    fn names_compare_case_insensitively() {
        let filter = NameFilter::parse(Some("rEx"));
        assert!(filter.matches(Some("Rex")));
        assert!(!filter.matches(Some("Rexy")));
        assert!(!filter.matches(None));
    }

    #[test]
    fn unknown_and_noname_select_unnamed() {
        for raw in ["Unknown", "noname", "NONAME"] {
            let filter = NameFilter::parse(Some(raw));
            assert!(filter.matches(None), "{raw}");
            assert!(!filter.matches(Some("Rex")), "{raw}");
        }
    }

    #[test]
    fn sound_cue_respects_toggle() {
        assert_eq!(pick_sound(false, CompanionKind::Mount), SoundCue::KindDefault(CompanionKind::Mount));
        for _ in 0..32 {
            match pick_sound(true, CompanionKind::Pet) {
                SoundCue::Whistle(v) => assert!(v < WHISTLE_VARIANTS),
                SoundCue::KindDefault(_) => panic!("whistle expected"),
            }
        }
    }
}
