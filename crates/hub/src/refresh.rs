//! Periodic metric refresh: recomputes every plant's snapshot against the
//! current time and republishes it, so day counters roll over at midnight
//! without any mutation.

use std::time::Duration;

use growflow_engine::MetricsSnapshot;
use time::OffsetDateTime;
use tracing::{debug, error, info};

use crate::mqtt::MetricsPublisher;
use crate::state::{HubState, SharedState};

/// Snapshot every plant at `now`, in plant_id order.
pub fn snapshots_at(st: &HubState, now: OffsetDateTime) -> Vec<(String, MetricsSnapshot)> {
    st.plants
        .iter()
        .map(|(id, slot)| (id.clone(), slot.plant.snapshot(now)))
        .collect()
}

/// Recompute and publish every snapshot. Returns how many were published.
pub async fn refresh_all(shared: &SharedState, publisher: &MetricsPublisher) -> usize {
    // Compute under the read lock, publish after releasing it.
    let snapshots = {
        let st = shared.read().await;
        snapshots_at(&st, st.now())
    };

    let mut published = 0;
    for (plant_id, snapshot) in &snapshots {
        match publisher.publish(plant_id, snapshot).await {
            Ok(()) => published += 1,
            Err(e) => {
                error!(plant = %plant_id, "refresh: {e:#}");
                shared
                    .write()
                    .await
                    .record_error(format!("{plant_id}: metrics publish failed: {e}"));
            }
        }
    }
    debug!(published, total = snapshots.len(), "metrics refreshed");
    published
}

/// Run the refresh loop. Intended to be `tokio::spawn`-ed from main.
pub async fn run(shared: SharedState, publisher: MetricsPublisher, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    info!(interval_sec = interval.as_secs(), "refresh loop started");

    loop {
        ticker.tick().await;
        refresh_all(&shared, &publisher).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use growflow_engine::{Phase, Plant};
    use rumqttc::AsyncClient;
    use std::sync::Arc;
    use time::macros::{date, datetime};
    use time::UtcOffset;
    use tokio::sync::RwLock;

    fn test_state() -> HubState {
        let mut st = HubState::new(UtcOffset::UTC);
        for id in ["b", "a"] {
            let plant = Plant::create(id, date!(2024 - 01 - 01), Phase::EarlyVeg, 500, date!(2024 - 01 - 01))
                .unwrap();
            st.insert_plant(id.to_uppercase(), None, plant);
        }
        st
    }

    #[test]
    fn snapshots_at_covers_every_plant_in_order() {
        let snaps = snapshots_at(&test_state(), datetime!(2024-01-05 12:00 UTC));
        let ids: Vec<&str> = snaps.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn day_counters_roll_over_without_mutation() {
        let st = test_state();
        let before = snapshots_at(&st, datetime!(2024-01-05 23:59 UTC));
        let after = snapshots_at(&st, datetime!(2024-01-06 00:01 UTC));
        assert_eq!(before[0].1.days_in_current_phase, Some(4));
        assert_eq!(after[0].1.days_in_current_phase, Some(5));
    }

    #[tokio::test]
    async fn refresh_all_publishes_each_plant() {
        let opts = rumqttc::MqttOptions::new("test-refresh", "127.0.0.1", 1883);
        let (client, _el) = AsyncClient::new(opts, 10);
        let publisher = MetricsPublisher::new(client, "growflow");
        let shared: SharedState = Arc::new(RwLock::new(test_state()));

        assert_eq!(refresh_all(&shared, &publisher).await, 2);
    }
}
