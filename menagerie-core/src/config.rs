//! Configuration for the companion registry.
//!
//! Maps directly to `menagerie.toml`. Every field has a default, so an empty
//! file yields a working setup.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{MenagerieError, Result};
use crate::types::CompanionKind;

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MenagerieConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Recall whistle.
    #[serde(default)]
    pub whistle: WhistleConfig,
    /// Pet allow-list and behavior.
    #[serde(default)]
    pub pets: PetConfig,
    /// Mount allow-list and behavior.
    #[serde(default)]
    pub mounts: MountConfig,
    /// Health thresholds.
    #[serde(default)]
    pub health: HealthConfig,
    /// Damage handling between companions.
    #[serde(default)]
    pub combat: CombatConfig,
    /// Tick cadences, radii and retention windows.
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Command radii.
    #[serde(default)]
    pub commands: CommandConfig,
    /// Persistence settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl MenagerieConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `MenagerieError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| MenagerieError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Render the configuration back to TOML.
    ///
    /// # Errors
    /// Returns `MenagerieError::Serialization` if encoding fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| MenagerieError::Serialization(e.to_string()))
    }

    /// Classify a species against the allow-lists. Pets win ties.
    #[must_use]
    pub fn kind_of(&self, species: &str) -> Option<CompanionKind> {
        if contains_ignore_case(&self.pets.species, species) {
            Some(CompanionKind::Pet)
        } else if contains_ignore_case(&self.mounts.species, species) {
            Some(CompanionKind::Mount)
        } else {
            None
        }
    }

    /// Whether `species` is a built-in mount family whose ownership tags
    /// can be stripped in place.
    #[must_use]
    pub fn is_builtin_mount(&self, species: &str) -> bool {
        contains_ignore_case(&self.mounts.builtin_families, species)
    }

    /// Whether pets of `species` hunt hostiles threatening their owner.
    #[must_use]
    pub fn is_aggressive(&self, species: &str) -> bool {
        contains_ignore_case(&self.pets.aggressive_species, species)
    }

    /// Regeneration toggle for a kind.
    #[must_use]
    pub const fn regen_enabled(&self, kind: CompanionKind) -> bool {
        match kind {
            CompanionKind::Pet => self.pets.regen,
            CompanionKind::Mount => self.mounts.regen,
        }
    }

    /// Immortality toggle for a kind.
    #[must_use]
    pub const fn immortal(&self, kind: CompanionKind) -> bool {
        match kind {
            CompanionKind::Pet => self.pets.immortal,
            CompanionKind::Mount => self.mounts.immortal,
        }
    }
}

fn contains_ignore_case(list: &[String], species: &str) -> bool {
    list.iter().any(|s| s.eq_ignore_ascii_case(species))
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Whether the scheduler runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Recall whistle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhistleConfig {
    /// Seconds between two calls by the same owner. Zero disables the cooldown.
    #[serde(default = "default_whistle_cooldown")]
    pub cooldown_seconds: u64,
    /// Pick a random whistle cue instead of the kind's default cue.
    #[serde(default = "default_true")]
    pub sounds_enabled: bool,
}

impl WhistleConfig {
    /// Cooldown window.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        seconds(self.cooldown_seconds)
    }
}

impl Default for WhistleConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: 5,
            sounds_enabled: true,
        }
    }
}

/// Pet settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PetConfig {
    /// Species tracked as pets.
    #[serde(default = "default_pet_species")]
    pub species: Vec<String>,
    /// Heal pets over time.
    #[serde(default = "default_true")]
    pub regen: bool,
    /// Lethal damage leaves pets at one health.
    #[serde(default = "default_true")]
    pub immortal: bool,
    /// Pets defend their owner against hostiles.
    #[serde(default = "default_true")]
    pub attack_hostiles: bool,
    /// Range within which pets engage hostiles.
    #[serde(default = "default_aggression_range")]
    pub aggression_range: f64,
    /// Species that actually engage.
    #[serde(default = "default_aggressive_species")]
    pub aggressive_species: Vec<String>,
}

impl Default for PetConfig {
    fn default() -> Self {
        Self {
            species: default_pet_species(),
            regen: true,
            immortal: true,
            attack_hostiles: true,
            aggression_range: 16.0,
            aggressive_species: default_aggressive_species(),
        }
    }
}

/// Mount settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// Species tracked as mounts.
    #[serde(default = "default_mount_species")]
    pub species: Vec<String>,
    /// Families whose ownership tags can be stripped on release.
    #[serde(default = "default_mount_species")]
    pub builtin_families: Vec<String>,
    /// Heal mounts over time.
    #[serde(default = "default_true")]
    pub regen: bool,
    /// Lethal damage leaves mounts at one health.
    #[serde(default = "default_true")]
    pub immortal: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            species: default_mount_species(),
            builtin_families: default_mount_species(),
            regen: true,
            immortal: true,
        }
    }
}

/// Health thresholds, in percent of max health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// At or below this, pets stop fighting.
    #[serde(default = "default_threshold")]
    pub fight_threshold_percent: f32,
    /// At or below this, mounts throw their riders.
    #[serde(default = "default_threshold")]
    pub carry_threshold_percent: f32,
    /// Health restored per regen pass.
    #[serde(default = "default_regen_step")]
    pub regen_step: f32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            fight_threshold_percent: 30.0,
            carry_threshold_percent: 30.0,
            regen_step: 1.0,
        }
    }
}

/// Damage handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatConfig {
    /// Cancel damage dealt by the owner or by a companion of the same owner.
    #[serde(default = "default_true")]
    pub disable_friendly_fire: bool,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            disable_friendly_fire: true,
        }
    }
}

/// Scheduler cadences (in ticks), pass radii and retention windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Cooldown cleanup cadence.
    #[serde(default = "default_cleanup_every")]
    pub cleanup_every: u64,
    /// Aggression pass cadence.
    #[serde(default = "default_aggression_every")]
    pub aggression_every: u64,
    /// Regeneration pass cadence.
    #[serde(default = "default_regen_every")]
    pub regen_every: u64,
    /// Unconditional capture cadence.
    #[serde(default = "default_fast_capture_every")]
    pub fast_capture_every: u64,
    /// Movement-gated capture cadence.
    #[serde(default = "default_slow_capture_every")]
    pub slow_capture_every: u64,
    /// Dead sweep cadence.
    #[serde(default = "default_dead_sweep_every")]
    pub dead_sweep_every: u64,
    /// Radius around owners for the aggression pass.
    #[serde(default = "default_wide_radius")]
    pub aggression_radius: f64,
    /// Radius around owners for the regeneration pass.
    #[serde(default = "default_wide_radius")]
    pub regen_radius: f64,
    /// Radius around owners for the unconditional capture.
    #[serde(default = "default_fast_capture_radius")]
    pub fast_capture_radius: f64,
    /// Radius around owners for the movement-gated capture.
    #[serde(default = "default_slow_capture_radius")]
    pub slow_capture_radius: f64,
    /// Squared distance a companion must move before a slow capture writes.
    #[serde(default = "default_movement_threshold_sq")]
    pub movement_threshold_sq: f64,
    /// Minimum milliseconds between two bucks of the same mount.
    #[serde(default = "default_buck_cooldown_ms")]
    pub buck_cooldown_ms: u64,
    /// Minimum milliseconds between two "too injured" messages to one rider.
    #[serde(default = "default_buck_message_ms")]
    pub buck_message_ms: u64,
    /// Hours a dead record is kept before it is purged.
    #[serde(default = "default_dead_retention_hours")]
    pub dead_retention_hours: u64,
    /// Minimum milliseconds between two interaction captures of one companion.
    #[serde(default = "default_interaction_debounce_ms")]
    pub interaction_debounce_ms: u64,
    /// Extra seconds a whistle cooldown entry is kept after it expires.
    #[serde(default = "default_whistle_grace_secs")]
    pub whistle_grace_secs: u64,
    /// Seconds a buck entry is kept.
    #[serde(default = "default_buck_retention_secs")]
    pub buck_retention_secs: u64,
    /// Seconds an interaction debounce entry is kept.
    #[serde(default = "default_interaction_retention_secs")]
    pub interaction_retention_secs: u64,
}

impl ScheduleConfig {
    /// Minimum time between two bucks of one mount.
    #[must_use]
    pub fn buck_cooldown(&self) -> Duration {
        millis(self.buck_cooldown_ms)
    }

    /// Minimum time between two "too injured" messages to one rider.
    #[must_use]
    pub fn buck_message_window(&self) -> Duration {
        millis(self.buck_message_ms)
    }

    /// How long a dead record is kept.
    #[must_use]
    pub fn dead_retention(&self) -> Duration {
        seconds(self.dead_retention_hours.saturating_mul(3600))
    }

    /// Minimum time between two interaction captures of one companion.
    #[must_use]
    pub fn interaction_debounce(&self) -> Duration {
        millis(self.interaction_debounce_ms)
    }

    /// Extra time a whistle entry is kept after expiring.
    #[must_use]
    pub fn whistle_grace(&self) -> Duration {
        seconds(self.whistle_grace_secs)
    }

    /// How long buck entries are kept.
    #[must_use]
    pub fn buck_retention(&self) -> Duration {
        seconds(self.buck_retention_secs)
    }

    /// How long interaction debounce entries are kept.
    #[must_use]
    pub fn interaction_retention(&self) -> Duration {
        seconds(self.interaction_retention_secs)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cleanup_every: 2400,
            aggression_every: 40,
            regen_every: 200,
            fast_capture_every: 200,
            slow_capture_every: 1200,
            dead_sweep_every: 6000,
            aggression_radius: 64.0,
            regen_radius: 64.0,
            fast_capture_radius: 16.0,
            slow_capture_radius: 32.0,
            movement_threshold_sq: 4.0,
            buck_cooldown_ms: 2000,
            buck_message_ms: 10_000,
            dead_retention_hours: 24,
            interaction_debounce_ms: 1000,
            whistle_grace_secs: 60,
            buck_retention_secs: 30,
            interaction_retention_secs: 300,
        }
    }
}

/// Command radii.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Radius for setfree/dismiss targeting.
    #[serde(default = "default_interaction_radius")]
    pub interaction_radius: f64,
    /// Radius for `find`.
    #[serde(default = "default_wide_radius")]
    pub find_radius: f64,
    /// Pets further than this are teleported by `follow`.
    #[serde(default = "default_follow_teleport_distance")]
    pub follow_teleport_distance: f64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            interaction_radius: 50.0,
            find_radius: 64.0,
            follow_teleport_distance: 100.0,
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Enable SQLite WAL journaling.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// Store and verify a CRC-32 per snapshot blob.
    #[serde(default = "default_true")]
    pub checksum_enabled: bool,
    /// Path of the tombstone file.
    #[serde(default = "default_dead_registry_path")]
    pub dead_registry_path: String,
}

impl PersistenceConfig {
    /// Where the tombstone file lives. A relative `dead_registry_path` is
    /// taken relative to `data_dir`.
    #[must_use]
    pub fn dead_registry_file(&self, data_dir: &std::path::Path) -> std::path::PathBuf {
        data_dir.join(&self.dead_registry_path)
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            wal_mode: true,
            checksum_enabled: true,
            dead_registry_path: default_dead_registry_path(),
        }
    }
}

fn seconds(s: u64) -> Duration {
    i64::try_from(s)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

fn millis(ms: u64) -> Duration {
    i64::try_from(ms)
        .ok()
        .and_then(Duration::try_milliseconds)
        .unwrap_or(Duration::MAX)
}

// ---------------------------------------------------------------------------
// Default value helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_whistle_cooldown() -> u64 { 5 }
fn default_aggression_range() -> f64 { 16.0 }
fn default_threshold() -> f32 { 30.0 }
fn default_regen_step() -> f32 { 1.0 }
fn default_cleanup_every() -> u64 { 2400 }
fn default_aggression_every() -> u64 { 40 }
fn default_regen_every() -> u64 { 200 }
fn default_fast_capture_every() -> u64 { 200 }
fn default_slow_capture_every() -> u64 { 1200 }
fn default_dead_sweep_every() -> u64 { 6000 }
fn default_wide_radius() -> f64 { 64.0 }
fn default_fast_capture_radius() -> f64 { 16.0 }
fn default_slow_capture_radius() -> f64 { 32.0 }
fn default_movement_threshold_sq() -> f64 { 4.0 }
fn default_buck_cooldown_ms() -> u64 { 2000 }
fn default_buck_message_ms() -> u64 { 10_000 }
fn default_dead_retention_hours() -> u64 { 24 }
fn default_interaction_debounce_ms() -> u64 { 1000 }
fn default_whistle_grace_secs() -> u64 { 60 }
fn default_buck_retention_secs() -> u64 { 30 }
fn default_interaction_retention_secs() -> u64 { 300 }
fn default_interaction_radius() -> f64 { 50.0 }
fn default_follow_teleport_distance() -> f64 { 100.0 }
fn default_dead_registry_path() -> String { "config/menagerie_dead_entities.txt".to_string() }

fn default_pet_species() -> Vec<String> {
    ["wolf", "cat", "parrot"].iter().map(|s| (*s).to_string()).collect()
}

fn default_aggressive_species() -> Vec<String> {
    vec!["wolf".to_string()]
}

fn default_mount_species() -> Vec<String> {
    ["horse", "donkey", "mule", "llama", "pig"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg = MenagerieConfig::from_toml("").expect("parse");
        assert_eq!(cfg.whistle.cooldown_seconds, 5);
        assert_eq!(cfg.schedule.dead_sweep_every, 6000);
        assert_eq!(cfg.schedule.dead_retention_hours, 24);
        assert!(cfg.combat.disable_friendly_fire);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg = MenagerieConfig::from_toml(
            "[whistle]\ncooldown_seconds = 0\n\n[pets]\nspecies = [\"fox\"]\n",
        )
        .expect("parse");
        assert_eq!(cfg.whistle.cooldown_seconds, 0);
        assert!(cfg.whistle.sounds_enabled);
        assert_eq!(cfg.kind_of("Fox"), Some(CompanionKind::Pet));
        assert_eq!(cfg.kind_of("wolf"), None);
        assert_eq!(cfg.pets.aggression_range, 16.0);
    }

    #[test]
    fn species_classification() {
        let cfg = MenagerieConfig::default();
        assert_eq!(cfg.kind_of("wolf"), Some(CompanionKind::Pet));
        assert_eq!(cfg.kind_of("HORSE"), Some(CompanionKind::Mount));
        assert_eq!(cfg.kind_of("zombie"), None);
        assert!(cfg.is_builtin_mount("pig"));
        assert!(!cfg.is_builtin_mount("dragon"));
        assert!(cfg.is_aggressive("wolf"));
        assert!(!cfg.is_aggressive("cat"));
    }

    #[test]
    fn durations_saturate() {
        let mut cfg = MenagerieConfig::default();
        assert_eq!(cfg.schedule.dead_retention(), Duration::hours(24));
        assert_eq!(cfg.whistle.cooldown(), Duration::seconds(5));
        cfg.whistle.cooldown_seconds = u64::MAX;
        assert_eq!(cfg.whistle.cooldown(), Duration::MAX);
    }

    #[test]
    fn dead_registry_file_resolves_against_data_dir() {
        let base = std::path::Path::new("/srv/menagerie");
        let mut persistence = PersistenceConfig::default();
        assert_eq!(
            persistence.dead_registry_file(base),
            base.join("config").join("menagerie_dead_entities.txt")
        );

        persistence.dead_registry_path = "/var/lib/tombstones.txt".into();
        assert_eq!(
            persistence.dead_registry_file(base),
            std::path::PathBuf::from("/var/lib/tombstones.txt")
        );
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = MenagerieConfig::from_toml("whistle = 3").expect_err("should fail");
        assert!(matches!(err, MenagerieError::Config(_)));
    }

    #[test]
    fn toml_round_trip_preserves_values() {
        let mut cfg = MenagerieConfig::default();
        cfg.schedule.regen_every = 77;
        let text = cfg.to_toml().expect("encode");
        let back = MenagerieConfig::from_toml(&text).expect("decode");
        assert_eq!(back.schedule.regen_every, 77);
    }
}
