//! Mutations of plant aggregates, shared by the HTTP and MQTT surfaces, plus
//! startup ingestion of persisted plants.
//!
//! Every command runs under the shared write lock: the aggregate is cloned,
//! mutated, persisted, and only then swapped into the shared state. A failed
//! validation or a failed write leaves the in-memory plant untouched.

use anyhow::{Context, Result};
use growflow_engine::{EngineError, MetricsSnapshot, Phase, Plant, StoredPlant};
use thiserror::Error;
use time::{Date, OffsetDateTime};
use tracing::{error, info, warn};

use crate::db::Db;
use crate::state::{EventKind, SharedState};

#[derive(Debug, Clone, PartialEq)]
pub enum PlantCommand {
    ChangePhase { phase: Phase, notes: Option<String> },
    Water { volume_ml: i64, notes: Option<String> },
    QuickWater,
    SetCreatedDate(Date),
    SetDefaultWaterVolume(i64),
    AddNote(String),
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown plant '{0}'")]
    UnknownPlant(String),

    #[error("invalid strain: {0}")]
    InvalidStrain(String),

    #[error(transparent)]
    Rejected(#[from] EngineError),

    #[error("failed to persist plant state: {0:#}")]
    Persist(anyhow::Error),
}

impl PlantCommand {
    fn apply(&self, plant: &mut Plant, now: OffsetDateTime) -> Result<MetricsSnapshot, EngineError> {
        match self {
            PlantCommand::ChangePhase { phase, notes } => {
                plant.change_phase(*phase, notes.clone(), now)
            }
            PlantCommand::Water { volume_ml, notes } => {
                plant.add_watering(*volume_ml, notes.clone(), now)
            }
            PlantCommand::QuickWater => plant.quick_water(now),
            PlantCommand::SetCreatedDate(date) => plant.update_creation_date(*date, now),
            PlantCommand::SetDefaultWaterVolume(volume_ml) => {
                plant.update_default_water_volume(*volume_ml, now)
            }
            PlantCommand::AddNote(note) => plant.add_note(note, now),
        }
    }

    fn event_kind(&self) -> EventKind {
        match self {
            PlantCommand::ChangePhase { .. } => EventKind::Phase,
            PlantCommand::Water { .. } | PlantCommand::QuickWater => EventKind::Watering,
            PlantCommand::SetCreatedDate(_) | PlantCommand::SetDefaultWaterVolume(_) => {
                EventKind::Config
            }
            PlantCommand::AddNote(_) => EventKind::Note,
        }
    }

    fn describe(&self, plant_id: &str, snapshot: &MetricsSnapshot) -> String {
        match self {
            PlantCommand::ChangePhase { .. } => {
                format!("{plant_id}: phase {}", snapshot.current_phase)
            }
            PlantCommand::Water { volume_ml, .. } => format!("{plant_id}: watered {volume_ml} ml"),
            PlantCommand::QuickWater => format!(
                "{plant_id}: quick watered {} ml",
                snapshot.default_water_volume
            ),
            PlantCommand::SetCreatedDate(_) => {
                format!("{plant_id}: created date {}", snapshot.created_date)
            }
            PlantCommand::SetDefaultWaterVolume(volume_ml) => {
                format!("{plant_id}: default water volume {volume_ml} ml")
            }
            PlantCommand::AddNote(_) => format!("{plant_id}: note added"),
        }
    }
}

/// Parse a phase chosen by a user: a current-vocabulary token, or its
/// display label.
pub fn parse_phase_input(input: &str) -> Result<Phase, EngineError> {
    Phase::parse_current(input).or_else(|e| Phase::from_label(input).ok_or(e))
}

/// Apply `cmd` to one plant and persist the result.
pub async fn execute(
    shared: &SharedState,
    db: &Db,
    plant_id: &str,
    cmd: PlantCommand,
) -> Result<MetricsSnapshot, CommandError> {
    let mut st = shared.write().await;
    let now = st.now();

    let Some(mut next) = st.plants.get(plant_id).map(|slot| slot.plant.clone()) else {
        warn!(plant = %plant_id, "command for unknown plant");
        st.record_error(format!("{plant_id}: unknown plant"));
        return Err(CommandError::UnknownPlant(plant_id.to_string()));
    };

    let snapshot = match cmd.apply(&mut next, now) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(plant = %plant_id, error = %e, "command rejected");
            st.record_error(format!("{plant_id}: {e}"));
            return Err(e.into());
        }
    };

    if let Err(e) = db.save_plant(&next.to_stored()).await {
        error!(plant = %plant_id, "failed to persist plant state: {e:#}");
        st.record_error(format!("{plant_id}: persist failed: {e}"));
        return Err(CommandError::Persist(e));
    }

    if let Some(slot) = st.plants.get_mut(plant_id) {
        slot.plant = next;
    }
    st.record(cmd.event_kind(), cmd.describe(plant_id, &snapshot));
    Ok(snapshot)
}

/// Longest strain name accepted at runtime.
pub const MAX_STRAIN_CHARS: usize = 50;

/// Trim a strain name and check it: 1 to `MAX_STRAIN_CHARS` characters of
/// letters, digits, spaces, `-` or `_`.
pub fn validate_strain(input: &str) -> Result<String, CommandError> {
    let strain = input.trim();
    let chars = strain.chars().count();
    if chars == 0 || chars > MAX_STRAIN_CHARS {
        return Err(CommandError::InvalidStrain(format!(
            "must be 1 to {MAX_STRAIN_CHARS} characters"
        )));
    }
    if let Some(bad) = strain
        .chars()
        .find(|c| !(c.is_alphanumeric() || *c == ' ' || *c == '-' || *c == '_'))
    {
        return Err(CommandError::InvalidStrain(format!("'{bad}' is not allowed")));
    }
    Ok(strain.to_string())
}

/// Rename a plant's strain. Display metadata only: the state blob and the
/// metrics are untouched. Runs under the write lock like `execute`.
pub async fn set_strain(
    shared: &SharedState,
    db: &Db,
    plant_id: &str,
    input: &str,
) -> Result<String, CommandError> {
    let mut st = shared.write().await;
    if !st.plants.contains_key(plant_id) {
        warn!(plant = %plant_id, "strain update for unknown plant");
        st.record_error(format!("{plant_id}: unknown plant"));
        return Err(CommandError::UnknownPlant(plant_id.to_string()));
    }

    let strain = match validate_strain(input) {
        Ok(strain) => strain,
        Err(e) => {
            warn!(plant = %plant_id, error = %e, "strain rejected");
            st.record_error(format!("{plant_id}: {e}"));
            return Err(e);
        }
    };

    if let Err(e) = db.update_plant_strain(plant_id, &strain).await {
        error!(plant = %plant_id, "failed to persist strain: {e:#}");
        st.record_error(format!("{plant_id}: persist failed: {e}"));
        return Err(CommandError::Persist(e));
    }

    if let Some(slot) = st.plants.get_mut(plant_id) {
        slot.strain = Some(strain.clone());
    }
    info!(plant = %plant_id, %strain, "strain updated");
    st.record(EventKind::Config, format!("{plant_id}: strain {strain}"));
    Ok(strain)
}

/// Ingest every stored plant into the shared state, writing migrated blobs
/// back. A plant whose history cannot be ingested is reported and left out;
/// the others still load. Returns the number of plants loaded.
pub async fn load_plants(db: &Db, shared: &SharedState, today: Date) -> Result<usize> {
    let rows = db.load_plants().await?;
    let mut loaded = 0;

    for row in rows {
        let stored: StoredPlant = match serde_json::from_str(&row.state_json)
            .with_context(|| format!("bad state_json for plant '{}'", row.plant_id))
        {
            Ok(stored) => stored,
            Err(e) => {
                error!(plant = %row.plant_id, "{e:#}");
                shared.write().await.record_error(format!("{e:#}"));
                continue;
            }
        };

        let result = match Plant::from_stored(stored, today) {
            Ok(result) => result,
            Err(e) => {
                error!(plant = %row.plant_id, error = %e, "cannot ingest stored plant");
                shared
                    .write()
                    .await
                    .record_error(format!("{}: cannot ingest stored plant: {e}", row.plant_id));
                continue;
            }
        };

        if result.needs_rewrite {
            db.save_plant(&result.plant.to_stored())
                .await
                .with_context(|| format!("failed to rewrite migrated plant '{}'", row.plant_id))?;
            info!(plant = %row.plant_id, "rewrote migrated plant state");
        }

        info!(
            plant = %row.plant_id,
            phase = %result.plant.current_phase(),
            updated_at = %row.updated_at,
            "plant loaded"
        );
        shared
            .write()
            .await
            .insert_plant(row.name, row.strain, result.plant);
        loaded += 1;
    }

    Ok(loaded)
}

// ===========================================================================
// Tests
// ===========================================================================
