// Data-driven configuration for the forage simulation.
//
// All tunable parameters live in `ForageConfig`, loadable from JSON. The sim
// never uses magic numbers: snapshot cadences, worker sleep, the blacklist
// window, acceptance radius, slot layout, cargo size and the escalation
// ladder's teleport distance are all read from here.
//
// Missing JSON fields take their default value. Fields that are present but
// unusable (a zero acceptance radius, a zero interval, more than eight slots)
// are repaired by `sanitized()`, which reports each substitution once through
// `tracing::warn!` and carries on. Nothing here is fatal.
//
// See also: `sim.rs`, which sanitizes the config once at construction and
// schedules its periodic timers from it.

use crate::types::{MAX_SLOTS, OwnerId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors from loading a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Every tunable of the allocation service and the harvester state machine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForageConfig {
    /// Wall-clock length of one tick. Only the headless driver uses this;
    /// the sim itself is tick-based.
    pub tick_duration_ms: u64,

    /// Ticks between resource-node snapshots published to the worker.
    pub resource_snapshot_interval_ticks: u64,

    /// Ticks between drop-off station snapshots published to the worker.
    pub dropoff_snapshot_interval_ticks: u64,

    /// Ticks between sweeps that prune destroyed handles out of the
    /// registry's live collections.
    pub registry_prune_interval_ticks: u64,

    /// Upper bound on how long the worker waits for a request before looping.
    pub worker_sleep_ms: u64,

    /// Ticks between clears of every agent's blacklist and teleport markers.
    pub blacklist_clear_interval_ticks: u64,

    /// Ticks between idle checks (resume search, return partial cargo).
    pub idle_check_interval_ticks: u64,

    /// An agent this close to its goal counts as arrived, even when the
    /// movement request itself failed.
    pub acceptance_radius: f32,

    /// Harvesting slots per resource node, at most 8.
    pub max_slots_per_node: usize,

    /// Distance from a node's center to each of its slots.
    pub slot_radius: f32,

    /// Candidates requested per query.
    pub query_candidate_count: usize,

    /// Length of one harvest animation cycle.
    pub harvest_animation_ticks: u64,

    /// Time spent unloading at a station.
    pub drop_off_ticks: u64,

    /// Per-resource-type cargo maximum of a newly spawned harvester.
    pub cargo_capacity: u32,

    /// Distance covered by a guarded teleport.
    pub teleport_step: f32,

    /// Distance a harvester covers per tick on the stock navigator.
    pub agent_speed: f32,

    /// The only owner whose drop-off stations may register.
    pub supported_owner: OwnerId,
}

impl Default for ForageConfig {
    fn default() -> Self {
        Self {
            tick_duration_ms: 10,
            resource_snapshot_interval_ticks: 50,
            dropoff_snapshot_interval_ticks: 100,
            registry_prune_interval_ticks: 1000,
            worker_sleep_ms: 10,
            blacklist_clear_interval_ticks: 3000,
            idle_check_interval_ticks: 200,
            acceptance_radius: 1.0,
            max_slots_per_node: MAX_SLOTS,
            slot_radius: 1.5,
            query_candidate_count: 4,
            harvest_animation_ticks: 20,
            drop_off_ticks: 10,
            cargo_capacity: 30,
            teleport_step: 3.0,
            agent_speed: 0.5,
            supported_owner: OwnerId(0),
        }
    }
}

impl ForageConfig {
    /// Parse a config from a JSON string. Missing fields use defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Return a copy with every unusable field replaced by its default,
    /// warning once per replaced field.
    pub fn sanitized(&self) -> Self {
        let defaults = Self::default();
        let mut out = self.clone();

        fix_interval(
            "resource_snapshot_interval_ticks",
            &mut out.resource_snapshot_interval_ticks,
            defaults.resource_snapshot_interval_ticks,
        );
        fix_interval(
            "dropoff_snapshot_interval_ticks",
            &mut out.dropoff_snapshot_interval_ticks,
            defaults.dropoff_snapshot_interval_ticks,
        );
        fix_interval(
            "registry_prune_interval_ticks",
            &mut out.registry_prune_interval_ticks,
            defaults.registry_prune_interval_ticks,
        );
        fix_interval(
            "worker_sleep_ms",
            &mut out.worker_sleep_ms,
            defaults.worker_sleep_ms,
        );
        fix_interval(
            "blacklist_clear_interval_ticks",
            &mut out.blacklist_clear_interval_ticks,
            defaults.blacklist_clear_interval_ticks,
        );
        fix_interval(
            "idle_check_interval_ticks",
            &mut out.idle_check_interval_ticks,
            defaults.idle_check_interval_ticks,
        );
        fix_interval(
            "harvest_animation_ticks",
            &mut out.harvest_animation_ticks,
            defaults.harvest_animation_ticks,
        );

        fix_distance(
            "acceptance_radius",
            &mut out.acceptance_radius,
            defaults.acceptance_radius,
        );
        fix_distance("slot_radius", &mut out.slot_radius, defaults.slot_radius);
        fix_distance(
            "teleport_step",
            &mut out.teleport_step,
            defaults.teleport_step,
        );
        fix_distance("agent_speed", &mut out.agent_speed, defaults.agent_speed);

        if out.max_slots_per_node == 0 || out.max_slots_per_node > MAX_SLOTS {
            let clamped = out.max_slots_per_node.clamp(1, MAX_SLOTS);
            warn!(
                field = "max_slots_per_node",
                value = out.max_slots_per_node,
                substituted = clamped,
                "config value out of range, clamping"
            );
            out.max_slots_per_node = clamped;
        }
        if out.query_candidate_count == 0 {
            warn!(
                field = "query_candidate_count",
                substituted = defaults.query_candidate_count,
                "config value unset, using default"
            );
            out.query_candidate_count = defaults.query_candidate_count;
        }
        if out.cargo_capacity == 0 {
            warn!(
                field = "cargo_capacity",
                substituted = defaults.cargo_capacity,
                "config value unset, using default"
            );
            out.cargo_capacity = defaults.cargo_capacity;
        }

        out
    }
}

fn fix_interval(field: &'static str, value: &mut u64, default: u64) {
    if *value == 0 {
        warn!(field, substituted = default, "config interval unset, using default");
        *value = default;
    }
}

fn fix_distance(field: &'static str, value: &mut f32, default: f32) {
    if !value.is_finite() || *value <= 0.0 {
        warn!(
            field,
            value = *value,
            substituted = default,
            "config distance unset or invalid, using default"
        );
        *value = default;
    }
}
