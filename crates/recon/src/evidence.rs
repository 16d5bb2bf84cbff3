use std::collections::BTreeMap;

use crate::model::{ReconcileSummary, RowOutcome};

/// Compute summary statistics from per-id outcomes of one reconcile run.
pub fn compute_summary(outcomes: &[RowOutcome], current: usize, fetched: usize) -> ReconcileSummary {
    let mut outcome_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut written = 0;
    let mut active = 0;
    let mut inactive = 0;

    for outcome in outcomes {
        *outcome_counts.entry(outcome.to_string()).or_insert(0) += 1;

        match outcome {
            RowOutcome::Created | RowOutcome::Reactivated | RowOutcome::Refreshed => {
                written += 1;
                active += 1;
            }
            RowOutcome::Deactivated | RowOutcome::StillInactive => {
                written += 1;
                inactive += 1;
            }
            RowOutcome::Skipped | RowOutcome::Untouched => {}
        }
    }

    ReconcileSummary {
        current,
        fetched,
        written,
        active,
        inactive,
        outcome_counts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts() {
        let outcomes = vec![
            RowOutcome::Created,
            RowOutcome::Created,
            RowOutcome::Refreshed,
            RowOutcome::Deactivated,
            RowOutcome::StillInactive,
            RowOutcome::Skipped,
        ];
        let summary = compute_summary(&outcomes, 3, 4);
        assert_eq!(summary.current, 3);
        assert_eq!(summary.fetched, 4);
        assert_eq!(summary.written, 5);
        assert_eq!(summary.active, 3);
        assert_eq!(summary.inactive, 2);
        assert_eq!(summary.outcome_counts["created"], 2);
        assert_eq!(summary.outcome_counts["skipped"], 1);
        assert!(!summary.outcome_counts.contains_key("reactivated"));
    }
}
