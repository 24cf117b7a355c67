//! TOML config file loading, validation, and database seeding for plants.

use anyhow::{bail, Context, Result};
use growflow_engine::dates;
use growflow_engine::watering::{DEFAULT_WATER_VOLUME_ML, MAX_VOLUME_ML, MIN_VOLUME_ML};
use growflow_engine::{Phase, Plant};
use serde::Deserialize;
use std::collections::HashSet;
use time::{Date, UtcOffset};
use tracing::{info, warn};

use crate::db::Db;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hub: HubSettings,
    #[serde(default)]
    pub plants: Vec<PlantEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    /// Seconds between metric republishes. Day counters roll over on these
    /// ticks without any mutation.
    pub refresh_interval_sec: i64,
    pub mqtt_prefix: String,
    /// Local offset used to decide what "today" is.
    pub utc_offset_hours: i64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            refresh_interval_sec: 60,
            mqtt_prefix: "growflow".to_string(),
            utc_offset_hours: 0,
        }
    }
}

fn default_initial_phase() -> String {
    Phase::EarlyVeg.as_str().to_string()
}

fn default_water_volume() -> i64 {
    i64::from(DEFAULT_WATER_VOLUME_ML)
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlantEntry {
    pub plant_id: String,
    pub name: String,
    #[serde(default)]
    pub strain: Option<String>,
    pub created_date: String,
    #[serde(default = "default_initial_phase")]
    pub initial_phase: String,
    #[serde(default = "default_water_volume")]
    pub default_water_volume: i64,
}

/// What `apply` did to the database.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub created: usize,
    pub kept: usize,
    pub removed: usize,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_hub(&mut errors);
        self.validate_plants(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_hub(&self, errors: &mut Vec<String>) {
        let h = &self.hub;
        if h.refresh_interval_sec <= 0 {
            errors.push(format!(
                "hub: refresh_interval_sec must be positive, got {}",
                h.refresh_interval_sec
            ));
        }
        if h.mqtt_prefix.trim().is_empty() {
            errors.push("hub: mqtt_prefix is empty".to_string());
        } else if h.mqtt_prefix.contains(['+', '#']) {
            errors.push(format!(
                "hub: mqtt_prefix '{}' must not contain MQTT wildcards",
                h.mqtt_prefix
            ));
        }
        if !(-12..=14).contains(&h.utc_offset_hours) {
            errors.push(format!(
                "hub: utc_offset_hours {} out of range [-12, 14]",
                h.utc_offset_hours
            ));
        }
    }

    fn validate_plants(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<&str> = HashSet::new();

        for (i, p) in self.plants.iter().enumerate() {
            let ctx = || {
                if p.plant_id.is_empty() {
                    format!("plants[{i}]")
                } else {
                    format!("plant '{}'", p.plant_id)
                }
            };

            // ── Identity ────────────────────────────────────────
            if p.plant_id.trim().is_empty() {
                errors.push(format!("{}: plant_id is empty", ctx()));
            } else if p.plant_id.contains(['/', '+', '#']) {
                errors.push(format!(
                    "{}: plant_id must not contain '/', '+' or '#'",
                    ctx()
                ));
            } else if !seen_ids.insert(&p.plant_id) {
                errors.push(format!("{}: duplicate plant_id", ctx()));
            }

            if p.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            }

            // ── Lifecycle seed ──────────────────────────────────
            if dates::parse_date(&p.created_date).is_err() {
                errors.push(format!(
                    "{}: created_date '{}' is not a YYYY-MM-DD date",
                    ctx(),
                    p.created_date
                ));
            }
            if let Err(e) = Phase::parse_current(&p.initial_phase) {
                errors.push(format!("{}: initial_phase: {e}", ctx()));
            }

            // ── Watering ────────────────────────────────────────
            if !(MIN_VOLUME_ML..=MAX_VOLUME_ML).contains(&p.default_water_volume) {
                errors.push(format!(
                    "{}: default_water_volume {} out of range [{MIN_VOLUME_ML}, {MAX_VOLUME_ML}]",
                    ctx(),
                    p.default_water_volume
                ));
            }
        }
    }
}

impl HubSettings {
    pub fn utc_offset(&self) -> Result<UtcOffset> {
        let hours = i8::try_from(self.utc_offset_hours)
            .with_context(|| format!("utc_offset_hours {} out of range", self.utc_offset_hours))?;
        UtcOffset::from_hms(hours, 0, 0)
            .with_context(|| format!("utc_offset_hours {hours} out of range"))
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Seed the database from config.
///
/// Plants not yet stored are created from their config entry. Plants already
/// stored keep their persisted history; only the name is refreshed, plus the
/// strain when the entry sets one.
/// Stored plants that no longer appear in the config are deleted along with
/// their history.
pub async fn apply(config: &Config, db: &Db, today: Date) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();

    for p in &config.plants {
        if db.plant_exists(&p.plant_id).await? {
            db.update_plant_metadata(&p.plant_id, &p.name, p.strain.as_deref())
                .await?;
            report.kept += 1;
            continue;
        }

        let created_date = dates::parse_date(&p.created_date)
            .with_context(|| format!("plant '{}': bad created_date", p.plant_id))?;
        let initial_phase = Phase::parse_current(&p.initial_phase)
            .with_context(|| format!("plant '{}': bad initial_phase", p.plant_id))?;
        let plant = Plant::create(
            p.plant_id.as_str(),
            created_date,
            initial_phase,
            p.default_water_volume,
            today,
        )
        .with_context(|| format!("failed to create plant '{}'", p.plant_id))?;

        db.insert_plant(&p.name, p.strain.as_deref(), &plant.to_stored())
            .await
            .with_context(|| format!("failed to seed plant '{}'", p.plant_id))?;
        report.created += 1;
    }

    let configured: HashSet<&str> = config.plants.iter().map(|p| p.plant_id.as_str()).collect();
    for plant_id in db.plant_ids().await? {
        if !configured.contains(plant_id.as_str()) {
            warn!(plant = %plant_id, "plant removed from config, deleting its history");
            db.delete_plant(&plant_id).await?;
            report.removed += 1;
        }
    }

    info!(
        created = report.created,
        kept = report.kept,
        removed = report.removed,
        "config applied"
    );

    Ok(report)
}

// ===========================================================================
// Tests
// ===========================================================================
