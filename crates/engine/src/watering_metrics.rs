//! Watering figures derived by replaying the watering ledger. Pure
//! functions; `now` is always passed in.
//!
//! Entries whose stored timestamp does not parse are skipped (with a warning)
//! by every figure that needs a time, and entries whose stored volume is out
//! of range by every figure that needs a volume, so one corrupt entry never
//! blanks the whole snapshot.

use serde::Serialize;
use time::{Date, Duration, OffsetDateTime};
use tracing::warn;

use crate::watering::{WateringEvent, WateringLedger};

/// Window for the weekly volume figure.
pub const WEEK_WINDOW_DAYS: i64 = 7;

/// Sessions averaged by `average_volume_per_session`.
pub const AVERAGE_SESSIONS: usize = 10;

/// Sessions considered by `watering_frequency_days`.
pub const FREQUENCY_SESSIONS: usize = 5;

fn usable_timestamp(event: &WateringEvent) -> Option<OffsetDateTime> {
    let ts = event.timestamp();
    if ts.is_none() {
        warn!(
            timestamp = event.raw_timestamp(),
            volume_ml = event.raw_volume_ml(),
            "skipping watering entry with malformed timestamp"
        );
    }
    ts
}

fn usable_volume(event: &WateringEvent) -> Option<u32> {
    let volume = event.volume_ml();
    if volume.is_none() {
        warn!(
            timestamp = event.raw_timestamp(),
            volume_ml = event.raw_volume_ml(),
            "skipping watering entry with out-of-range volume"
        );
    }
    volume
}

fn usable_timestamp_and_volume(event: &WateringEvent) -> Option<(OffsetDateTime, u32)> {
    let ts = usable_timestamp(event)?;
    Some((ts, usable_volume(event)?))
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn tail(events: &[WateringEvent], n: usize) -> &[WateringEvent] {
    &events[events.len().saturating_sub(n)..]
}

/// Most recent watering with a readable timestamp.
pub fn last_watering(ledger: &WateringLedger) -> Option<OffsetDateTime> {
    ledger.events().iter().rev().find_map(usable_timestamp)
}

/// Calendar days between the last watering and `now`, both taken in `now`'s
/// offset. `None` when the plant has never been watered.
pub fn days_since_watering(ledger: &WateringLedger, now: OffsetDateTime) -> Option<i64> {
    let last = last_watering(ledger)?;
    let last_day = last.to_offset(now.offset()).date();
    Some((now.date() - last_day).whole_days())
}

/// Total volume of entries at or after `now - window_days`.
pub fn volume_in_window(ledger: &WateringLedger, now: OffsetDateTime, window_days: i64) -> u64 {
    let since = now - Duration::days(window_days);
    ledger
        .events()
        .iter()
        .filter_map(usable_timestamp_and_volume)
        .filter(|(ts, _)| *ts >= since)
        .map(|(_, volume)| u64::from(volume))
        .sum()
}

/// Mean volume of the last `n` sessions, one decimal. `0.0` when no
/// readable volume is among them.
pub fn average_volume_per_session(ledger: &WateringLedger, n: usize) -> f64 {
    let volumes: Vec<u32> = tail(ledger.events(), n)
        .iter()
        .filter_map(usable_volume)
        .collect();
    if volumes.is_empty() {
        return 0.0;
    }
    let total: u64 = volumes.iter().map(|v| u64::from(*v)).sum();
    round1(total as f64 / volumes.len() as f64)
}

/// Mean calendar-day gap between consecutive sessions among the last `n`,
/// one decimal. Every session's day is taken in the offset of the most
/// recent one. Same-day refills (gap of zero days) are not counted. `0.0`
/// when no usable gap exists.
pub fn watering_frequency_days(ledger: &WateringLedger, n: usize) -> f64 {
    let times: Vec<OffsetDateTime> = tail(ledger.events(), n)
        .iter()
        .filter_map(usable_timestamp)
        .collect();
    let Some(offset) = times.last().map(|ts| ts.offset()) else {
        return 0.0;
    };
    let days: Vec<Date> = times.iter().map(|ts| ts.to_offset(offset).date()).collect();

    let gaps: Vec<i64> = days
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).whole_days())
        .filter(|gap| *gap > 0)
        .collect();

    if gaps.is_empty() {
        return 0.0;
    }
    round1(gaps.iter().sum::<i64>() as f64 / gaps.len() as f64)
}

// ---------------------------------------------------------------------------
// Classifications shown next to the raw figures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WateringStatus {
    NeverWatered,
    Good,
    DueSoon,
    Overdue,
}

impl WateringStatus {
    pub fn from_days_since(days: Option<i64>) -> Self {
        match days {
            None => WateringStatus::NeverWatered,
            Some(d) if d > 5 => WateringStatus::Overdue,
            Some(d) if d > 3 => WateringStatus::DueSoon,
            Some(_) => WateringStatus::Good,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            WateringStatus::NeverWatered => "never_watered",
            WateringStatus::Good => "good",
            WateringStatus::DueSoon => "due_soon",
            WateringStatus::Overdue => "overdue",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WateringPattern {
    NotEnoughData,
    MultipleDaily,
    Every1To2Days,
    Every3To4Days,
    WeeklyOrLess,
}

impl WateringPattern {
    pub fn from_frequency(days: f64) -> Self {
        if days <= 0.0 {
            WateringPattern::NotEnoughData
        } else if days < 1.0 {
            WateringPattern::MultipleDaily
        } else if days <= 2.0 {
            WateringPattern::Every1To2Days
        } else if days <= 4.0 {
            WateringPattern::Every3To4Days
        } else {
            WateringPattern::WeeklyOrLess
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            WateringPattern::NotEnoughData => "not_enough_data",
            WateringPattern::MultipleDaily => "multiple_daily",
            WateringPattern::Every1To2Days => "every_1_2_days",
            WateringPattern::Every3To4Days => "every_3_4_days",
            WateringPattern::WeeklyOrLess => "weekly_or_less",
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
