//! Day counts derived by replaying a phase ledger. Pure functions; `today`
//! is always passed in.

use time::Date;
use tracing::warn;

use crate::phase_ledger::{PhaseEvent, PhaseLedger};
use crate::taxonomy::{Category, Phase};

/// Days spent in `target` across every run of it, counting superseded tokens
/// that migrate into `target` as the same phase. An open final run is
/// counted up to `today`.
pub fn days_in_phase(ledger: &PhaseLedger, target: Phase, today: Date) -> i64 {
    days_matching(ledger.events(), &target.synonyms(), today)
}

/// Run-sum over events whose phase is any of `targets`.
///
/// A run starts at the first matching event and ends at the first
/// non-matching event after it (or `today` if the ledger ends inside it).
/// Events without a readable date are skipped.
pub fn days_matching(events: &[PhaseEvent], targets: &[Phase], today: Date) -> i64 {
    let mut total = 0;
    let mut open_start: Option<Date> = None;

    for event in events {
        let Some(date) = event.date() else {
            warn!(
                phase = event.phase.as_str(),
                date = event.raw_date().unwrap_or(""),
                "skipping phase event without a readable date"
            );
            continue;
        };
        let matches = targets.contains(&event.phase);
        match (matches, open_start) {
            (true, None) => open_start = Some(date),
            (false, Some(start)) => {
                total += (date - start).whole_days();
                open_start = None;
            }
            _ => {}
        }
    }

    if let Some(start) = open_start {
        total += (today - start).whole_days();
    }
    total
}

/// Start date of the trailing run of the current phase: the earliest
/// readable date in that run. `None` when no event in the run has one.
pub fn current_phase_start(ledger: &PhaseLedger) -> Option<Date> {
    let current = ledger.current_phase();
    ledger
        .events()
        .iter()
        .rev()
        .take_while(|e| e.phase == current)
        .filter_map(PhaseEvent::date)
        .last()
}

pub fn days_in_current_phase(ledger: &PhaseLedger, today: Date) -> Option<i64> {
    current_phase_start(ledger).map(|start| (today - start).whole_days())
}

pub fn total_days_in_category(ledger: &PhaseLedger, category: Category, today: Date) -> i64 {
    category
        .phases()
        .iter()
        .map(|phase| days_in_phase(ledger, *phase, today))
        .sum()
}

pub fn days_since_planted(ledger: &PhaseLedger, today: Date) -> i64 {
    (today - ledger.creation_date()).whole_days()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn ledger(events: &[(Date, Phase)]) -> PhaseLedger {
        PhaseLedger::from_events(
            events
                .iter()
                .map(|(d, p)| PhaseEvent::new(*d, *p))
                .collect(),
        )
        .unwrap()
    }

    fn veg_then_flower() -> PhaseLedger {
        ledger(&[
            (date!(2024 - 01 - 01), Phase::EarlyVeg),
            (date!(2024 - 01 - 15), Phase::MidLateVeg),
            (date!(2024 - 02 - 10), Phase::EarlyFlower),
        ])
    }

    // -- days_in_phase ------------------------------------------------------

    #[test]
    fn closed_run_counts_until_next_event() {
        let l = veg_then_flower();
        assert_eq!(days_in_phase(&l, Phase::EarlyVeg, date!(2024 - 03 - 01)), 14);
        assert_eq!(days_in_phase(&l, Phase::MidLateVeg, date!(2024 - 03 - 01)), 26);
    }

    #[test]
    fn open_run_counts_until_today() {
        let l = veg_then_flower();
        assert_eq!(
            days_in_phase(&l, Phase::EarlyFlower, date!(2024 - 03 - 01)),
            20
        );
    }

    #[test]
    fn phase_never_entered_is_zero() {
        let l = veg_then_flower();
        assert_eq!(days_in_phase(&l, Phase::Curing, date!(2024 - 03 - 01)), 0);
    }

    #[test]
    fn single_event_ledger_counts_to_today() {
        let l = PhaseLedger::initialize(date!(2024 - 01 - 01), Phase::EarlyVeg);
        assert_eq!(days_in_phase(&l, Phase::EarlyVeg, date!(2024 - 01 - 11)), 10);
    }

    #[test]
    fn single_event_ledger_today_is_zero() {
        let l = PhaseLedger::initialize(date!(2024 - 01 - 01), Phase::EarlyVeg);
        assert_eq!(days_in_phase(&l, Phase::EarlyVeg, date!(2024 - 01 - 01)), 0);
    }

    #[test]
    fn repeated_runs_are_summed() {
        let l = ledger(&[
            (date!(2024 - 01 - 01), Phase::EarlyVeg),
            (date!(2024 - 01 - 05), Phase::MidLateVeg),
            (date!(2024 - 01 - 10), Phase::EarlyVeg),
        ]);
        // 4 days in the first run, 5 in the open second run.
        assert_eq!(days_in_phase(&l, Phase::EarlyVeg, date!(2024 - 01 - 15)), 9);
    }

    #[test]
    fn unmigrated_legacy_tokens_count_toward_target() {
        let l = ledger(&[
            (date!(2024 - 01 - 01), Phase::EarlyVeg),
            (date!(2024 - 01 - 10), Phase::MidVeg),
            (date!(2024 - 01 - 20), Phase::LateVeg),
            (date!(2024 - 02 - 01), Phase::EarlyFlower),
        ]);
        assert_eq!(
            days_in_phase(&l, Phase::MidLateVeg, date!(2024 - 02 - 15)),
            22
        );
    }

    #[test]
    fn days_matching_with_exact_targets_ignores_synonyms() {
        let l = ledger(&[
            (date!(2024 - 01 - 01), Phase::MidVeg),
            (date!(2024 - 01 - 10), Phase::LateVeg),
        ]);
        assert_eq!(
            days_matching(l.events(), &[Phase::MidVeg], date!(2024 - 01 - 20)),
            9
        );
    }

    // -- days_in_current_phase ----------------------------------------------

    #[test]
    fn current_phase_days_from_last_transition() {
        let l = veg_then_flower();
        assert_eq!(days_in_current_phase(&l, date!(2024 - 02 - 15)), Some(5));
        assert_eq!(current_phase_start(&l), Some(date!(2024 - 02 - 10)));
    }

    #[test]
    fn current_phase_run_spans_unconsolidated_duplicates() {
        let l = ledger(&[
            (date!(2024 - 01 - 01), Phase::EarlyVeg),
            (date!(2024 - 01 - 10), Phase::MidLateVeg),
            (date!(2024 - 01 - 20), Phase::MidLateVeg),
        ]);
        assert_eq!(current_phase_start(&l), Some(date!(2024 - 01 - 10)));
        assert_eq!(days_in_current_phase(&l, date!(2024 - 01 - 25)), Some(15));
    }

    #[test]
    fn current_phase_earlier_run_not_counted() {
        let l = ledger(&[
            (date!(2024 - 01 - 01), Phase::EarlyVeg),
            (date!(2024 - 01 - 05), Phase::MidLateVeg),
            (date!(2024 - 01 - 10), Phase::EarlyVeg),
        ]);
        assert_eq!(days_in_current_phase(&l, date!(2024 - 01 - 12)), Some(2));
    }

    #[test]
    fn undated_current_phase_has_no_start() {
        let l = PhaseLedger::from_events(vec![
            PhaseEvent::new(date!(2024 - 01 - 01), Phase::EarlyVeg),
            PhaseEvent::from_stored_parts(None, Phase::EarlyFlower, None),
        ])
        .unwrap();
        assert_eq!(l.current_phase(), Phase::EarlyFlower);
        assert_eq!(current_phase_start(&l), None);
        assert_eq!(days_in_current_phase(&l, date!(2024 - 01 - 20)), None);
    }

    #[test]
    fn undated_event_is_skipped_in_run_sum() {
        let l = PhaseLedger::from_events(vec![
            PhaseEvent::new(date!(2024 - 01 - 01), Phase::EarlyVeg),
            PhaseEvent::from_stored_parts(Some("??".into()), Phase::MidLateVeg, None),
            PhaseEvent::new(date!(2024 - 01 - 20), Phase::EarlyFlower),
        ])
        .unwrap();
        let today = date!(2024 - 01 - 30);
        assert_eq!(days_in_phase(&l, Phase::EarlyVeg, today), 19);
        assert_eq!(days_in_phase(&l, Phase::MidLateVeg, today), 0);
        assert_eq!(days_in_phase(&l, Phase::EarlyFlower, today), 10);
    }

    // -- categories ---------------------------------------------------------

    #[test]
    fn category_totals_sum_member_phases() {
        let l = ledger(&[
            (date!(2024 - 01 - 01), Phase::EarlyVeg),
            (date!(2024 - 01 - 15), Phase::MidLateVeg),
            (date!(2024 - 02 - 10), Phase::EarlyFlower),
            (date!(2024 - 03 - 10), Phase::Flushing),
            (date!(2024 - 03 - 20), Phase::Drying),
        ]);
        let today = date!(2024 - 03 - 25);
        assert_eq!(total_days_in_category(&l, Category::Veg, today), 40);
        assert_eq!(total_days_in_category(&l, Category::Flower, today), 39);
        assert_eq!(total_days_in_category(&l, Category::PostHarvest, today), 5);
    }

    #[test]
    fn days_since_planted_from_first_event() {
        let l = veg_then_flower();
        assert_eq!(days_since_planted(&l, date!(2024 - 01 - 31)), 30);
    }
}
