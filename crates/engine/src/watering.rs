//! Append-only watering log for one plant. Insertion order is the log order;
//! it is assumed monotonic in time and never re-sorted.

use serde::Serialize;
use time::OffsetDateTime;

use crate::dates;
use crate::error::{EngineError, Result};
use crate::taxonomy::Phase;

pub const MIN_VOLUME_ML: i64 = 1;
pub const MAX_VOLUME_ML: i64 = 10_000;
pub const DEFAULT_WATER_VOLUME_ML: u32 = 500;

/// Reject volumes outside `[MIN_VOLUME_ML, MAX_VOLUME_ML]`.
pub fn validate_volume(volume_ml: i64) -> Result<u32> {
    if !(MIN_VOLUME_ML..=MAX_VOLUME_ML).contains(&volume_ml) {
        return Err(EngineError::InvalidVolume { volume_ml });
    }
    u32::try_from(volume_ml).map_err(|_| EngineError::InvalidVolume { volume_ml })
}

/// One watering session.
///
/// Entries read from storage are kept exactly as written so that a
/// malformed historical entry survives a load/save cycle unchanged: the
/// timestamp stays in its RFC 3339 text form, the volume as the stored
/// integer and the phase as the stored token. Metrics skip an entry for any
/// figure that needs a field it cannot read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WateringEvent {
    timestamp: String,
    volume_ml: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    phase_at_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl WateringEvent {
    pub fn new(
        timestamp: OffsetDateTime,
        volume_ml: i64,
        phase_at_time: Option<Phase>,
        notes: Option<String>,
    ) -> Result<Self> {
        let volume_ml = validate_volume(volume_ml)?;
        Ok(Self {
            timestamp: dates::format_timestamp(timestamp)?,
            volume_ml: i64::from(volume_ml),
            phase_at_time: phase_at_time.map(|p| p.as_str().to_string()),
            notes,
        })
    }

    /// Rebuild an entry read from storage without re-validating any field.
    pub(crate) fn from_stored_parts(
        timestamp: String,
        volume_ml: i64,
        phase_at_time: Option<String>,
        notes: Option<String>,
    ) -> Self {
        Self {
            timestamp,
            volume_ml,
            phase_at_time,
            notes,
        }
    }

    pub fn raw_timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Parsed timestamp, or `None` if the stored text is malformed.
    pub fn timestamp(&self) -> Option<OffsetDateTime> {
        dates::parse_timestamp(&self.timestamp)
    }

    pub fn raw_volume_ml(&self) -> i64 {
        self.volume_ml
    }

    /// The volume, or `None` if the stored value is outside the valid range.
    pub fn volume_ml(&self) -> Option<u32> {
        validate_volume(self.volume_ml).ok()
    }

    pub fn raw_phase_at_time(&self) -> Option<&str> {
        self.phase_at_time.as_deref()
    }

    /// The recorded phase, or `None` if absent or not a known token.
    pub fn phase_at_time(&self) -> Option<Phase> {
        self.phase_at_time.as_deref().and_then(|t| t.parse().ok())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WateringLedger {
    events: Vec<WateringEvent>,
}

impl WateringLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_events(events: Vec<WateringEvent>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &[WateringEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Record a watering session. The ledger is unchanged on error.
    pub fn append(
        &mut self,
        volume_ml: i64,
        timestamp: OffsetDateTime,
        phase_at_time: Option<Phase>,
        notes: Option<String>,
    ) -> Result<&WateringEvent> {
        let event = WateringEvent::new(timestamp, volume_ml, phase_at_time, notes)?;
        self.events.push(event);
        Ok(&self.events[self.events.len() - 1])
    }

    /// `append` with the plant's configured default volume.
    pub fn quick_water(
        &mut self,
        default_volume: u32,
        timestamp: OffsetDateTime,
        phase_at_time: Option<Phase>,
    ) -> Result<&WateringEvent> {
        self.append(i64::from(default_volume), timestamp, phase_at_time, None)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    // -- validate_volume ----------------------------------------------------

    #[test]
    fn volume_bounds_inclusive() {
        assert_eq!(validate_volume(1).unwrap(), 1);
        assert_eq!(validate_volume(10_000).unwrap(), 10_000);
    }

    #[test]
    fn volume_zero_rejected() {
        assert_eq!(
            validate_volume(0),
            Err(EngineError::InvalidVolume { volume_ml: 0 })
        );
    }

    #[test]
    fn volume_negative_rejected() {
        assert!(validate_volume(-250).is_err());
    }

    #[test]
    fn volume_above_max_rejected() {
        assert!(validate_volume(10_001).is_err());
    }

    // -- append -------------------------------------------------------------

    #[test]
    fn append_records_event() {
        let mut ledger = WateringLedger::new();
        let ts = datetime!(2024-01-10 09:00:00 UTC);
        let event = ledger
            .append(750, ts, Some(Phase::EarlyVeg), Some("with cal-mag".into()))
            .unwrap();
        assert_eq!(event.volume_ml(), Some(750));
        assert_eq!(event.phase_at_time(), Some(Phase::EarlyVeg));
        assert_eq!(event.timestamp(), Some(ts));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn append_invalid_volume_leaves_ledger_unchanged() {
        let mut ledger = WateringLedger::new();
        let err = ledger
            .append(0, datetime!(2024-01-10 09:00:00 UTC), None, None)
            .unwrap_err();
        assert_eq!(err, EngineError::InvalidVolume { volume_ml: 0 });
        assert!(ledger.is_empty());
    }

    #[test]
    fn append_keeps_insertion_order() {
        let mut ledger = WateringLedger::new();
        ledger
            .append(100, datetime!(2024-01-10 09:00:00 UTC), None, None)
            .unwrap();
        ledger
            .append(200, datetime!(2024-01-09 09:00:00 UTC), None, None)
            .unwrap();
        let volumes: Vec<i64> = ledger.events().iter().map(WateringEvent::raw_volume_ml).collect();
        assert_eq!(volumes, vec![100, 200]);
    }

    #[test]
    fn quick_water_uses_default_volume() {
        let mut ledger = WateringLedger::new();
        let event = ledger
            .quick_water(DEFAULT_WATER_VOLUME_ML, datetime!(2024-01-10 09:00:00 UTC), None)
            .unwrap();
        assert_eq!(event.volume_ml(), Some(500));
        assert!(event.notes.is_none());
    }

    // -- timestamps ---------------------------------------------------------

    #[test]
    fn malformed_stored_timestamp_is_none() {
        let event = WateringEvent::from_stored_parts("not a time".into(), 300, None, None);
        assert_eq!(event.timestamp(), None);
        assert_eq!(event.raw_timestamp(), "not a time");
    }

    #[test]
    fn out_of_range_stored_volume_is_none_but_kept() {
        let event = WateringEvent::from_stored_parts(
            "2024-01-10T09:00:00Z".into(),
            12_000,
            Some("mystery_phase".into()),
            None,
        );
        assert_eq!(event.volume_ml(), None);
        assert_eq!(event.raw_volume_ml(), 12_000);
        assert_eq!(event.phase_at_time(), None);
        assert_eq!(event.raw_phase_at_time(), Some("mystery_phase"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["volume_ml"], 12_000);
        assert_eq!(json["phase_at_time"], "mystery_phase");
    }

    #[test]
    fn event_json_shape() {
        let event = WateringEvent::new(
            datetime!(2024-01-10 09:00:00 UTC),
            400,
            Some(Phase::EarlyFlower),
            None,
        )
        .unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["timestamp"], "2024-01-10T09:00:00Z");
        assert_eq!(json["volume_ml"], 400);
        assert_eq!(json["phase_at_time"], "early_flower");
        assert!(json.get("notes").is_none());
    }
}
