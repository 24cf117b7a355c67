//! Ordered log of phase transitions for one plant.
//!
//! The ledger is never empty: it is created with the plant's creation date
//! and initial phase, and grows only by appending transitions. Events are in
//! non-decreasing date order and no two adjacent events share a phase.
//!
//! Events loaded from storage keep their date text as written. An event
//! whose date cannot be read still holds its place in the sequence (and can
//! be the current phase); only date arithmetic passes over it.

use serde::Serialize;
use time::Date;

use crate::dates::{format_date, parse_date};
use crate::error::{EngineError, Result};
use crate::taxonomy::Phase;

/// "The plant entered `phase` on `date`."
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseEvent {
    #[serde(rename = "date", skip_serializing_if = "Option::is_none")]
    date_text: Option<String>,
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl PhaseEvent {
    pub fn new(date: Date, phase: Phase) -> Self {
        Self {
            date_text: Some(format_date(date)),
            phase,
            notes: None,
        }
    }

    /// An event exactly as it was stored; the date is not validated.
    pub(crate) fn from_stored_parts(
        date_text: Option<String>,
        phase: Phase,
        notes: Option<String>,
    ) -> Self {
        Self {
            date_text,
            phase,
            notes,
        }
    }

    /// `None` when the stored date is missing or unreadable.
    pub fn date(&self) -> Option<Date> {
        self.date_text.as_deref().and_then(|d| parse_date(d).ok())
    }

    pub fn raw_date(&self) -> Option<&str> {
        self.date_text.as_deref()
    }

    pub(crate) fn set_date(&mut self, date: Date) {
        self.date_text = Some(format_date(date));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseLedger {
    events: Vec<PhaseEvent>,
    created: Date,
}

impl PhaseLedger {
    pub fn initialize(creation_date: Date, initial_phase: Phase) -> Self {
        Self {
            events: vec![PhaseEvent::new(creation_date, initial_phase)],
            created: creation_date,
        }
    }

    /// Build a ledger from already-recorded events. Returns `None` for an
    /// empty list or when the first event has no readable date. A list where
    /// every date is readable is stably sorted by date; otherwise the given
    /// order is kept. Nothing is collapsed or migrated here.
    pub fn from_events(mut events: Vec<PhaseEvent>) -> Option<Self> {
        if events.iter().all(|e| e.date().is_some()) {
            events.sort_by_key(PhaseEvent::date);
        }
        let created = events.first()?.date()?;
        Some(Self { events, created })
    }

    pub fn events(&self) -> &[PhaseEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn first(&self) -> &PhaseEvent {
        &self.events[0]
    }

    pub fn last(&self) -> &PhaseEvent {
        &self.events[self.events.len() - 1]
    }

    pub fn creation_date(&self) -> Date {
        self.created
    }

    pub fn current_phase(&self) -> Phase {
        self.last().phase
    }

    /// Latest readable date in the ledger.
    pub fn last_known_date(&self) -> Date {
        self.events
            .iter()
            .rev()
            .find_map(PhaseEvent::date)
            .unwrap_or(self.created)
    }

    /// Number of events whose date cannot be read.
    pub fn undated_count(&self) -> usize {
        self.events.iter().filter(|e| e.date().is_none()).count()
    }

    /// Record that the plant entered `new_phase` on `effective_date`.
    ///
    /// Returns `Ok(false)` without touching the ledger when `new_phase` is
    /// already the current phase.
    pub fn append_transition(
        &mut self,
        new_phase: Phase,
        effective_date: Date,
        notes: Option<String>,
    ) -> Result<bool> {
        if !new_phase.is_current() {
            return Err(EngineError::InvalidPhase {
                token: new_phase.as_str().to_string(),
            });
        }
        if new_phase == self.current_phase() {
            return Ok(false);
        }
        let last = self.last_known_date();
        if effective_date < last {
            return Err(EngineError::TransitionBeforeLast {
                requested: effective_date,
                last,
            });
        }
        let mut event = PhaseEvent::new(effective_date, new_phase);
        event.notes = notes;
        self.events.push(event);
        Ok(true)
    }

    /// Rewrite superseded tokens into the current vocabulary, then collapse
    /// any runs the rewrite produced. Returns whether anything changed.
    pub fn migrate_legacy(&mut self) -> bool {
        let mut changed = false;
        for event in &mut self.events {
            let migrated = event.phase.current();
            if migrated != event.phase {
                event.phase = migrated;
                changed = true;
            }
        }
        if changed {
            self.consolidate();
        }
        changed
    }

    /// Collapse consecutive events with the same phase, keeping the earliest
    /// event of each run. A kept event without a readable date takes the
    /// date of the first dated duplicate it absorbs. Returns the number of
    /// events removed.
    pub fn consolidate(&mut self) -> usize {
        let before = self.events.len();
        self.events.dedup_by(|later, kept| {
            if later.phase != kept.phase {
                return false;
            }
            if kept.date().is_none() && later.date().is_some() {
                kept.date_text = later.date_text.take();
            }
            true
        });
        before - self.events.len()
    }

    /// Correct the date of the first event. The corrected date may not move
    /// past the next dated event.
    pub fn set_creation_date(&mut self, new_date: Date) -> Result<()> {
        if let Some(next) = self.events.iter().skip(1).find_map(PhaseEvent::date) {
            if new_date > next {
                return Err(EngineError::CreationDateAfterTransition {
                    requested: new_date,
                    next,
                });
            }
        }
        if let Some(first) = self.events.first_mut() {
            first.set_date(new_date);
        }
        self.created = new_date;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
