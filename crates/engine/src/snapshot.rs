//! The metrics snapshot: every derived figure for one plant at one instant,
//! recomputed from the ledgers on demand and never stored.

use std::collections::BTreeMap;

use serde::Serialize;
use time::{Date, OffsetDateTime};

use crate::dates;
use crate::phase_metrics;
use crate::plant::Plant;
use crate::taxonomy::{Category, Phase};
use crate::watering_metrics::{self as wm, WateringPattern, WateringStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseDays {
    pub phase: Phase,
    pub days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub plant_id: String,
    pub current_phase: Phase,
    #[serde(with = "crate::dates::iso_date")]
    pub created_date: Date,
    /// `None` when the current phase's run has no readable date.
    #[serde(serialize_with = "crate::dates::iso_date::serialize_option")]
    pub phase_start_date: Option<Date>,
    pub days_since_planted: i64,
    pub days_in_current_phase: Option<i64>,
    /// One entry per current phase, in lifecycle order.
    pub days_in_phase: Vec<PhaseDays>,
    pub total_veg_days: i64,
    pub total_flower_days: i64,
    pub total_post_harvest_days: i64,

    #[serde(with = "time::serde::rfc3339::option")]
    pub last_watering: Option<OffsetDateTime>,
    pub days_since_watering: Option<i64>,
    pub water_this_week: u64,
    pub avg_water_per_session: f64,
    pub watering_frequency: f64,
    pub total_watering_sessions: usize,
    pub default_water_volume: u32,
    pub watering_status: WateringStatus,
    pub watering_pattern: WateringPattern,
}

impl MetricsSnapshot {
    pub fn compute(plant: &Plant, now: OffsetDateTime) -> Self {
        let today = now.date();
        let phases = plant.phase_ledger();
        let waterings = plant.watering_ledger();

        let days_in_phase = Phase::ALL_CURRENT
            .into_iter()
            .map(|phase| PhaseDays {
                phase,
                days: phase_metrics::days_in_phase(phases, phase, today),
            })
            .collect();

        let days_since_watering = wm::days_since_watering(waterings, now);
        let watering_frequency = wm::watering_frequency_days(waterings, wm::FREQUENCY_SESSIONS);

        Self {
            plant_id: plant.plant_id().to_string(),
            current_phase: plant.current_phase(),
            created_date: plant.created_date(),
            phase_start_date: phase_metrics::current_phase_start(phases),
            days_since_planted: phase_metrics::days_since_planted(phases, today),
            days_in_current_phase: phase_metrics::days_in_current_phase(phases, today),
            days_in_phase,
            total_veg_days: phase_metrics::total_days_in_category(phases, Category::Veg, today),
            total_flower_days: phase_metrics::total_days_in_category(
                phases,
                Category::Flower,
                today,
            ),
            total_post_harvest_days: phase_metrics::total_days_in_category(
                phases,
                Category::PostHarvest,
                today,
            ),
            last_watering: wm::last_watering(waterings),
            days_since_watering,
            water_this_week: wm::volume_in_window(waterings, now, wm::WEEK_WINDOW_DAYS),
            avg_water_per_session: wm::average_volume_per_session(waterings, wm::AVERAGE_SESSIONS),
            watering_frequency,
            total_watering_sessions: waterings.len(),
            default_water_volume: plant.default_water_volume(),
            watering_status: WateringStatus::from_days_since(days_since_watering),
            watering_pattern: WateringPattern::from_frequency(watering_frequency),
        }
    }

    pub fn days_in(&self, phase: Phase) -> i64 {
        self.days_in_phase
            .iter()
            .find(|d| d.phase == phase)
            .map_or(0, |d| d.days)
    }

    /// Flatten into the metric-name → value map presentation surfaces poll.
    pub fn to_flat(&self) -> BTreeMap<String, MetricValue> {
        let mut out = BTreeMap::new();
        let mut put = |key: &str, value: MetricValue| {
            out.insert(key.to_string(), value);
        };

        put("plant_id", MetricValue::Text(self.plant_id.clone()));
        put("current_phase", MetricValue::Text(self.current_phase.as_str().into()));
        put("current_phase_label", MetricValue::Text(self.current_phase.label().into()));
        put("created_date", MetricValue::Text(dates::format_date(self.created_date)));
        put(
            "phase_start_date",
            self.phase_start_date
                .map_or(MetricValue::Missing, |d| MetricValue::Text(dates::format_date(d))),
        );
        put("days_since_planted", MetricValue::Count(self.days_since_planted));
        put(
            "days_in_current_phase",
            self.days_in_current_phase
                .map_or(MetricValue::Missing, MetricValue::Count),
        );
        for entry in &self.days_in_phase {
            put(
                &format!("days_in_{}", entry.phase.as_str()),
                MetricValue::Count(entry.days),
            );
        }
        put("total_veg_days", MetricValue::Count(self.total_veg_days));
        put("total_flower_days", MetricValue::Count(self.total_flower_days));
        put("total_post_harvest_days", MetricValue::Count(self.total_post_harvest_days));

        put(
            "last_watering",
            self.last_watering
                .and_then(|ts| dates::format_timestamp(ts).ok())
                .map_or(MetricValue::Missing, MetricValue::Text),
        );
        put(
            "days_since_watering",
            self.days_since_watering
                .map_or(MetricValue::Missing, MetricValue::Count),
        );
        put(
            "water_this_week",
            MetricValue::Count(i64::try_from(self.water_this_week).unwrap_or(i64::MAX)),
        );
        put("avg_water_per_session", MetricValue::Amount(self.avg_water_per_session));
        put("watering_frequency", MetricValue::Amount(self.watering_frequency));
        put(
            "total_watering_sessions",
            MetricValue::Count(i64::try_from(self.total_watering_sessions).unwrap_or(i64::MAX)),
        );
        put(
            "default_water_volume",
            MetricValue::Count(i64::from(self.default_water_volume)),
        );
        put("watering_status", MetricValue::Text(self.watering_status.as_str().into()));
        put("watering_pattern", MetricValue::Text(self.watering_pattern.as_str().into()));
        out
    }
}

/// One value in the flat snapshot. `Missing` serializes as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Count(i64),
    Amount(f64),
    Text(String),
    Missing,
}
