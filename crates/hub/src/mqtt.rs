use anyhow::{Context, Result};
use growflow_engine::MetricsSnapshot;
use rumqttc::{AsyncClient, QoS};
use serde::Deserialize;

use crate::commands::{parse_phase_input, PlantCommand};

// ---------------------------------------------------------------------------
// MQTT message types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct WaterMsg {
    pub(crate) volume_ml: i64,
    #[serde(default)]
    pub(crate) notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

/// Topics the hub subscribes to under `prefix`.
pub(crate) fn subscriptions(prefix: &str) -> [String; 3] {
    [
        format!("{prefix}/+/phase/set"),
        format!("{prefix}/+/water"),
        format!("{prefix}/+/note"),
    ]
}

pub(crate) fn metrics_topic(prefix: &str, plant_id: &str) -> String {
    format!("{prefix}/{plant_id}/metrics")
}

/// Extract plant_id from "<prefix>/<plant_id>/<suffix>".
fn extract_plant_id<'a>(topic: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    let id = topic
        .strip_prefix(prefix)?
        .strip_prefix('/')?
        .strip_suffix(suffix)?
        .strip_suffix('/')?;
    if id.is_empty() || id.contains('/') {
        None
    } else {
        Some(id)
    }
}

/// Parse a phase payload: a phase token or display label.
pub(crate) fn parse_phase_command(payload: &[u8]) -> Result<PlantCommand, String> {
    let s = String::from_utf8_lossy(payload);
    let phase = parse_phase_input(s.trim()).map_err(|e| e.to_string())?;
    Ok(PlantCommand::ChangePhase { phase, notes: None })
}

/// Parse a water payload. Empty means "quick water with the default volume".
pub(crate) fn parse_water_command(payload: &[u8]) -> Result<PlantCommand, String> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(PlantCommand::QuickWater);
    }
    let msg: WaterMsg =
        serde_json::from_slice(payload).map_err(|e| format!("bad water json: {e}"))?;
    Ok(PlantCommand::Water {
        volume_ml: msg.volume_ml,
        notes: msg.notes,
    })
}

/// Parse a note payload: the note text itself.
pub(crate) fn parse_note_command(payload: &[u8]) -> Result<PlantCommand, String> {
    let note = std::str::from_utf8(payload).map_err(|e| format!("note is not utf-8: {e}"))?;
    Ok(PlantCommand::AddNote(note.to_string()))
}

/// Route an incoming publish to a plant command. `None` means the topic is
/// not one of ours.
pub(crate) fn parse_command<'a>(
    topic: &'a str,
    payload: &[u8],
    prefix: &str,
) -> Option<(&'a str, Result<PlantCommand, String>)> {
    if let Some(plant_id) = extract_plant_id(topic, prefix, "phase/set") {
        Some((plant_id, parse_phase_command(payload)))
    } else if let Some(plant_id) = extract_plant_id(topic, prefix, "note") {
        Some((plant_id, parse_note_command(payload)))
    } else {
        extract_plant_id(topic, prefix, "water").map(|id| (id, parse_water_command(payload)))
    }
}

// ---------------------------------------------------------------------------
// Metrics publishing
// ---------------------------------------------------------------------------

/// Publishes flat snapshots as retained messages on `<prefix>/<id>/metrics`.
#[derive(Clone)]
pub struct MetricsPublisher {
    client: AsyncClient,
    prefix: String,
}

impl MetricsPublisher {
    pub fn new(client: AsyncClient, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    pub async fn publish(&self, plant_id: &str, snapshot: &MetricsSnapshot) -> Result<()> {
        let payload = serde_json::to_vec(&snapshot.to_flat())
            .context("failed to serialize metrics snapshot")?;
        let topic = metrics_topic(&self.prefix, plant_id);
        self.client
            .publish(topic.as_str(), QoS::AtLeastOnce, true, payload)
            .await
            .with_context(|| format!("failed to publish {topic}"))?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
