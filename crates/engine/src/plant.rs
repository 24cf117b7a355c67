//! Plant aggregate: one phase ledger and one watering ledger, the mutating
//! entry points collaborators call, and the snapshot each mutation returns.
//!
//! The current phase is never stored separately; it is always the phase of
//! the last ledger event. Every mutation either succeeds completely or
//! leaves the aggregate untouched.

use time::{Date, OffsetDateTime};
use tracing::{debug, info, warn};

use crate::dates;
use crate::error::{EngineError, Result};
use crate::notes::{NoteEntry, NoteLedger};
use crate::phase_ledger::{PhaseEvent, PhaseLedger};
use crate::snapshot::MetricsSnapshot;
use crate::stored::{StoredNote, StoredPhaseEvent, StoredPlant, StoredWatering};
use crate::taxonomy::{self, Phase};
use crate::watering::{self, WateringEvent, WateringLedger, DEFAULT_WATER_VOLUME_ML};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plant {
    plant_id: String,
    phase_ledger: PhaseLedger,
    watering_ledger: WateringLedger,
    notes: NoteLedger,
    default_water_volume: u32,
}

/// Result of ingesting a stored blob.
#[derive(Debug)]
pub struct Loaded {
    pub plant: Plant,
    /// The blob changed during ingestion (legacy tokens, collapsed runs, a
    /// repaired creation date, re-derived fields) and should be written back.
    /// Ingestion never removes an entry that was not collapsed into its
    /// predecessor.
    pub needs_rewrite: bool,
}

impl Plant {
    /// New plant with a one-event phase ledger. A creation date after
    /// `today` is clamped to `today`.
    pub fn create(
        plant_id: impl Into<String>,
        created_date: Date,
        initial_phase: Phase,
        default_water_volume: i64,
        today: Date,
    ) -> Result<Self> {
        let plant_id = plant_id.into();
        if !initial_phase.is_current() {
            return Err(EngineError::InvalidPhase {
                token: initial_phase.as_str().to_string(),
            });
        }
        let default_water_volume = watering::validate_volume(default_water_volume)?;
        let created_date = clamp_creation_date(&plant_id, created_date, today);

        info!(plant = %plant_id, %created_date, phase = %initial_phase, "plant created");
        Ok(Self {
            phase_ledger: PhaseLedger::initialize(created_date, initial_phase),
            watering_ledger: WateringLedger::new(),
            notes: NoteLedger::new(),
            default_water_volume,
            plant_id,
        })
    }

    /// Ingest a persisted blob, migrating superseded phase tokens.
    ///
    /// Entries with an unreadable date, timestamp, volume or recorded phase
    /// are kept exactly as stored; the calculators skip them. The one repair
    /// is a first phase event without a readable date, which takes the stored
    /// `created_date` (or `today`).
    ///
    /// An unknown phase token in the phase ledger is fatal: guessing would
    /// rewrite history irreversibly.
    pub fn from_stored(stored: StoredPlant, today: Date) -> Result<Loaded> {
        let plant_id = stored.plant_id.clone();

        let mut events = Vec::with_capacity(stored.phase_ledger.len());
        for raw in &stored.phase_ledger {
            let phase: Phase = raw.phase.parse()?;
            let event = PhaseEvent::from_stored_parts(raw.date.clone(), phase, raw.notes.clone());
            if event.date().is_none() {
                warn!(
                    plant = %plant_id,
                    phase = %raw.phase,
                    date = ?raw.date,
                    "phase event has missing or malformed date, keeping it as stored"
                );
            }
            events.push(event);
        }
        if let Some(first) = events.first_mut() {
            if first.date().is_none() {
                let created = stored_creation_date(&stored, today);
                warn!(plant = %plant_id, %created, "first phase event undated, using creation date");
                first.set_date(created);
            }
        }

        let mut phase_ledger = match PhaseLedger::from_events(events) {
            Some(ledger) => ledger,
            None => reinitialize_ledger(&stored, today)?,
        };
        if phase_ledger.migrate_legacy() {
            info!(plant = %plant_id, "migrated superseded phase tokens");
        }
        let collapsed = phase_ledger.consolidate();
        if collapsed > 0 {
            debug!(plant = %plant_id, collapsed, "consolidated phase ledger");
        }

        let waterings = stored
            .watering_ledger
            .iter()
            .map(|raw| {
                if watering::validate_volume(raw.volume_ml).is_err() {
                    warn!(
                        plant = %plant_id,
                        timestamp = %raw.timestamp,
                        volume_ml = raw.volume_ml,
                        "watering entry has out-of-range volume, keeping it as stored"
                    );
                }
                let phase_at_time = raw
                    .phase_at_time
                    .as_deref()
                    .map(|token| migrate_recorded_phase(&plant_id, token));
                WateringEvent::from_stored_parts(
                    raw.timestamp.clone(),
                    raw.volume_ml,
                    phase_at_time,
                    raw.notes.clone(),
                )
            })
            .collect();

        let notes = stored
            .notes
            .iter()
            .map(|raw| NoteEntry::from_stored_parts(raw.timestamp.clone(), raw.note.clone()))
            .collect();

        let default_water_volume = watering::validate_volume(stored.default_water_volume)
            .unwrap_or_else(|_| {
                warn!(
                    plant = %plant_id,
                    stored = stored.default_water_volume,
                    "default water volume out of range, using {DEFAULT_WATER_VOLUME_ML}"
                );
                DEFAULT_WATER_VOLUME_ML
            });

        let plant = Plant {
            plant_id,
            phase_ledger,
            watering_ledger: WateringLedger::from_events(waterings),
            notes: NoteLedger::from_entries(notes),
            default_water_volume,
        };
        let needs_rewrite = plant.to_stored() != stored;
        Ok(Loaded {
            plant,
            needs_rewrite,
        })
    }

    pub fn to_stored(&self) -> StoredPlant {
        StoredPlant {
            plant_id: self.plant_id.clone(),
            created_date: dates::format_date(self.created_date()),
            current_phase: self.current_phase().as_str().to_string(),
            phase_ledger: self
                .phase_ledger
                .events()
                .iter()
                .map(|e| StoredPhaseEvent {
                    date: e.raw_date().map(str::to_string),
                    phase: e.phase.as_str().to_string(),
                    notes: e.notes.clone(),
                })
                .collect(),
            watering_ledger: self
                .watering_ledger
                .events()
                .iter()
                .map(|e| StoredWatering {
                    timestamp: e.raw_timestamp().to_string(),
                    volume_ml: e.raw_volume_ml(),
                    phase_at_time: e.raw_phase_at_time().map(str::to_string),
                    notes: e.notes.clone(),
                })
                .collect(),
            default_water_volume: i64::from(self.default_water_volume),
            notes: self
                .notes
                .entries()
                .iter()
                .map(|n| StoredNote {
                    timestamp: n.raw_timestamp().to_string(),
                    note: n.note.clone(),
                })
                .collect(),
        }
    }

    // -- Accessors ----------------------------------------------------------

    pub fn plant_id(&self) -> &str {
        &self.plant_id
    }

    pub fn current_phase(&self) -> Phase {
        self.phase_ledger.current_phase()
    }

    pub fn created_date(&self) -> Date {
        self.phase_ledger.creation_date()
    }

    pub fn default_water_volume(&self) -> u32 {
        self.default_water_volume
    }

    pub fn phase_ledger(&self) -> &PhaseLedger {
        &self.phase_ledger
    }

    pub fn watering_ledger(&self) -> &WateringLedger {
        &self.watering_ledger
    }

    /// Owned copy of the phase ledger for inspection surfaces.
    pub fn phase_history(&self) -> Vec<PhaseEvent> {
        self.phase_ledger.events().to_vec()
    }

    /// Owned copy of the watering ledger for inspection surfaces.
    pub fn watering_history(&self) -> Vec<WateringEvent> {
        self.watering_ledger.events().to_vec()
    }

    pub fn note_ledger(&self) -> &NoteLedger {
        &self.notes
    }

    pub fn note_history(&self) -> Vec<NoteEntry> {
        self.notes.entries().to_vec()
    }

    // -- Mutations ----------------------------------------------------------

    /// Transition to `new_phase` effective today. Selecting the current phase
    /// is a no-op, not an error.
    pub fn change_phase(
        &mut self,
        new_phase: Phase,
        notes: Option<String>,
        now: OffsetDateTime,
    ) -> Result<MetricsSnapshot> {
        let previous = self.current_phase();
        if self
            .phase_ledger
            .append_transition(new_phase, now.date(), notes)?
        {
            info!(plant = %self.plant_id, from = %previous, to = %new_phase, "phase changed");
        } else {
            debug!(plant = %self.plant_id, phase = %new_phase, "phase unchanged");
        }
        Ok(self.snapshot(now))
    }

    pub fn add_watering(
        &mut self,
        volume_ml: i64,
        notes: Option<String>,
        now: OffsetDateTime,
    ) -> Result<MetricsSnapshot> {
        let phase = self.current_phase();
        self.watering_ledger
            .append(volume_ml, now, Some(phase), notes)?;
        info!(plant = %self.plant_id, volume_ml, %phase, "watering recorded");
        Ok(self.snapshot(now))
    }

    /// Record a watering with the plant's default volume.
    pub fn quick_water(&mut self, now: OffsetDateTime) -> Result<MetricsSnapshot> {
        let phase = self.current_phase();
        self.watering_ledger
            .quick_water(self.default_water_volume, now, Some(phase))?;
        info!(
            plant = %self.plant_id,
            volume_ml = self.default_water_volume,
            %phase,
            "quick watering recorded"
        );
        Ok(self.snapshot(now))
    }

    /// Correct the plant's start date. A future date is clamped to today; a
    /// date past the first transition is rejected.
    pub fn update_creation_date(
        &mut self,
        new_date: Date,
        now: OffsetDateTime,
    ) -> Result<MetricsSnapshot> {
        let new_date = clamp_creation_date(&self.plant_id, new_date, now.date());
        self.phase_ledger.set_creation_date(new_date)?;
        info!(plant = %self.plant_id, created_date = %new_date, "creation date updated");
        Ok(self.snapshot(now))
    }

    pub fn update_default_water_volume(
        &mut self,
        volume_ml: i64,
        now: OffsetDateTime,
    ) -> Result<MetricsSnapshot> {
        self.default_water_volume = watering::validate_volume(volume_ml)?;
        info!(plant = %self.plant_id, volume_ml, "default water volume updated");
        Ok(self.snapshot(now))
    }

    /// Attach a free-standing note, timestamped `now`.
    pub fn add_note(&mut self, note: &str, now: OffsetDateTime) -> Result<MetricsSnapshot> {
        let entry = self.notes.append(note, now)?;
        info!(plant = %self.plant_id, chars = entry.note.chars().count(), "note added");
        Ok(self.snapshot(now))
    }

    pub fn snapshot(&self, now: OffsetDateTime) -> MetricsSnapshot {
        MetricsSnapshot::compute(self, now)
    }
}

fn clamp_creation_date(plant_id: &str, requested: Date, today: Date) -> Date {
    if requested > today {
        warn!(plant = %plant_id, %requested, %today, "creation date in the future, using today");
        today
    } else {
        requested
    }
}

fn stored_creation_date(stored: &StoredPlant, today: Date) -> Date {
    dates::parse_date(&stored.created_date).unwrap_or_else(|_| {
        warn!(
            plant = %stored.plant_id,
            created_date = %stored.created_date,
            "unreadable created_date, using today"
        );
        today
    })
}

/// Current-vocabulary token for a recorded phase. Unknown tokens are kept.
fn migrate_recorded_phase(plant_id: &str, token: &str) -> String {
    match taxonomy::migrate(token) {
        Ok(phase) => phase.as_str().to_string(),
        Err(e) => {
            warn!(plant = %plant_id, error = %e, "keeping unknown phase_at_time as stored");
            token.to_string()
        }
    }
}

fn reinitialize_ledger(stored: &StoredPlant, today: Date) -> Result<PhaseLedger> {
    let created = stored_creation_date(stored, today);
    let phase = if stored.current_phase.trim().is_empty() {
        warn!(plant = %stored.plant_id, "no current_phase stored, using early_veg");
        Phase::EarlyVeg
    } else {
        stored.current_phase.parse()?
    };
    warn!(plant = %stored.plant_id, "phase ledger empty, re-initializing");
    Ok(PhaseLedger::initialize(created, phase))
}

// ===========================================================================
// Tests
// ===========================================================================
