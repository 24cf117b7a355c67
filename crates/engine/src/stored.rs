//! Persisted shape of one plant's state blob.
//!
//! Every field is kept in its raw text form so that older or partially
//! corrupt blobs still deserialize; validation happens in
//! [`Plant::from_stored`](crate::plant::Plant::from_stored).

use serde::{Deserialize, Serialize};

use crate::watering::DEFAULT_WATER_VOLUME_ML;

fn default_water_volume() -> i64 {
    i64::from(DEFAULT_WATER_VOLUME_ML)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPlant {
    pub plant_id: String,
    #[serde(default)]
    pub created_date: String,
    #[serde(default)]
    pub current_phase: String,
    #[serde(default)]
    pub phase_ledger: Vec<StoredPhaseEvent>,
    #[serde(default)]
    pub watering_ledger: Vec<StoredWatering>,
    #[serde(default = "default_water_volume")]
    pub default_water_volume: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<StoredNote>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPhaseEvent {
    #[serde(default)]
    pub date: Option<String>,
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredWatering {
    #[serde(default)]
    pub timestamp: String,
    pub volume_ml: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_at_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredNote {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub note: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_blob_fills_defaults() {
        let stored: StoredPlant = serde_json::from_str(r#"{"plant_id":"p1"}"#).unwrap();
        assert_eq!(stored.default_water_volume, 500);
        assert!(stored.phase_ledger.is_empty());
        assert!(stored.watering_ledger.is_empty());
        assert!(stored.notes.is_empty());
        assert_eq!(stored.created_date, "");
    }

    #[test]
    fn empty_notes_omitted_on_write() {
        let stored: StoredPlant = serde_json::from_str(r#"{"plant_id":"p1"}"#).unwrap();
        let json = serde_json::to_value(&stored).unwrap();
        assert!(json.get("notes").is_none());
    }

    #[test]
    fn phase_event_without_date_deserializes() {
        let ev: StoredPhaseEvent = serde_json::from_str(r#"{"phase":"mid_veg"}"#).unwrap();
        assert_eq!(ev.date, None);
        assert_eq!(ev.phase, "mid_veg");
    }

    #[test]
    fn watering_optional_fields_omitted_on_write() {
        let w = StoredWatering {
            timestamp: "2024-01-01T08:00:00Z".into(),
            volume_ml: 500,
            phase_at_time: None,
            notes: None,
        };
        let json = serde_json::to_value(&w).unwrap();
        assert!(json.get("phase_at_time").is_none());
        assert!(json.get("notes").is_none());
    }
}
