use growflow_engine::Plant;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::RwLock;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

/// The single coordination point for every plant aggregate. Writers hold the
/// write lock for the whole mutate-persist-swap sequence.
pub type SharedState = Arc<RwLock<HubState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct HubState {
    pub started_at: Instant,
    pub mqtt_connected: bool,
    pub utc_offset: UtcOffset,
    pub plants: BTreeMap<String, PlantSlot>,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Debug, Clone)]
pub struct PlantSlot {
    pub name: String,
    pub strain: Option<String>,
    pub plant: Plant,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Phase,
    Watering,
    Note,
    Config,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub plants: Vec<String>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl HubState {
    pub fn new(utc_offset: UtcOffset) -> Self {
        Self {
            started_at: Instant::now(),
            mqtt_connected: false,
            utc_offset,
            plants: BTreeMap::new(),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Wall-clock time in the configured local offset. This is the only
    /// place the hub reads the clock for engine calls.
    pub fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.utc_offset)
    }

    pub fn insert_plant(&mut self, name: String, strain: Option<String>, plant: Plant) {
        self.plants.insert(
            plant.plant_id().to_string(),
            PlantSlot {
                name,
                strain,
                plant,
            },
        );
    }

    pub fn record(&mut self, kind: EventKind, detail: String) {
        self.push_event(kind, detail);
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot, newest events first.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mqtt_connected: self.mqtt_connected,
            plants: self.plants.keys().cloned().collect(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: self.now(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use growflow_engine::Phase;
    use time::macros::date;

    fn plant(id: &str) -> Plant {
        Plant::create(id, date!(2024 - 01 - 01), Phase::EarlyVeg, 500, date!(2024 - 01 - 01))
            .unwrap()
    }

    #[test]
    fn event_ring_is_bounded() {
        let mut st = HubState::new(UtcOffset::UTC);
        for i in 0..(MAX_EVENTS + 25) {
            st.record_system(format!("event {i}"));
        }
        assert_eq!(st.events.len(), MAX_EVENTS);
        assert_eq!(st.events.front().unwrap().detail, "event 25");
    }

    #[test]
    fn status_lists_plants_and_newest_event_first() {
        let mut st = HubState::new(UtcOffset::UTC);
        st.insert_plant("B".into(), None, plant("b"));
        st.insert_plant("A".into(), None, plant("a"));
        st.record(EventKind::Phase, "first".into());
        st.record_error("second".into());

        let status = st.to_status();
        assert_eq!(status.plants, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(status.events[0].detail, "second");
        assert_eq!(status.events[0].kind, EventKind::Error);
    }

    #[test]
    fn now_uses_configured_offset() {
        let offset = UtcOffset::from_hms(2, 0, 0).unwrap();
        let st = HubState::new(offset);
        assert_eq!(st.now().offset(), offset);
    }

    #[test]
    fn event_json_shape() {
        let mut st = HubState::new(UtcOffset::UTC);
        st.record(EventKind::Watering, "p1 watered 500 ml".into());
        let json = serde_json::to_value(&st.events[0]).unwrap();
        assert_eq!(json["kind"], "watering");
        assert!(json["ts"].is_string());
    }
}
