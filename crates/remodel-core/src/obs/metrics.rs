use std::cell::RefCell;

thread_local! {
    static STATE: RefCell<MetricsState> = RefCell::new(MetricsState::default());
}

///
/// MetricsState
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MetricsState {
    pub models_added: u64,
    pub models_removed: u64,
    pub value_changes: u64,
    pub beans_created: u64,
    pub beans_deleted: u64,
    pub commands_queued: u64,
    pub commands_applied: u64,
    pub gc_sweeps: u64,
    pub gc_rejected: u64,
    pub listener_panics: u64,
}

///
/// MetricsReport
///
/// Point-in-time snapshot for endpoint/test plumbing.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MetricsReport {
    pub counters: MetricsState,
}

pub(crate) fn with_state_mut<R>(f: impl FnOnce(&mut MetricsState) -> R) -> R {
    STATE.with_borrow_mut(f)
}

/// Snapshot the current metrics state.
#[must_use]
pub fn metrics_report() -> MetricsReport {
    MetricsReport {
        counters: STATE.with_borrow(Clone::clone),
    }
}

/// Reset all counters (tests).
pub fn reset_all() {
    STATE.with_borrow_mut(|state| *state = MetricsState::default());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obs::{self, MetricsEvent};

    #[test]
    fn record_accumulates_and_reset_clears() {
        reset_all();

        obs::record(MetricsEvent::ModelAdded);
        obs::record(MetricsEvent::CommandsQueued(3));
        obs::record(MetricsEvent::GcSweep { rejected: 2 });

        let report = metrics_report();
        assert_eq!(report.counters.models_added, 1);
        assert_eq!(report.counters.commands_queued, 3);
        assert_eq!(report.counters.gc_sweeps, 1);
        assert_eq!(report.counters.gc_rejected, 2);

        reset_all();
        assert_eq!(metrics_report(), MetricsReport::default());
    }
}
