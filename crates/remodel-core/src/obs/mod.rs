//! Observability counters.
//!
//! Core synchronization logic MUST NOT reach into the metrics state
//! directly; all instrumentation flows through [`MetricsEvent`] and
//! [`record`]. State is thread-local with an explicit reset for tests.

pub mod metrics;

pub use metrics::{MetricsReport, metrics_report, reset_all};

///
/// MetricsEvent
///

#[derive(Clone, Copy, Debug)]
pub enum MetricsEvent {
    ModelAdded,
    ModelRemoved,
    ValueChanged,
    BeanCreated,
    BeanDeleted,
    CommandsQueued(u64),
    CommandsApplied(u64),
    GcSweep { rejected: u64 },
    ListenerPanicked,
}

/// Record one instrumentation event into the thread-local metrics state.
pub fn record(event: MetricsEvent) {
    metrics::with_state_mut(|m| match event {
        MetricsEvent::ModelAdded => m.models_added += 1,
        MetricsEvent::ModelRemoved => m.models_removed += 1,
        MetricsEvent::ValueChanged => m.value_changes += 1,
        MetricsEvent::BeanCreated => m.beans_created += 1,
        MetricsEvent::BeanDeleted => m.beans_deleted += 1,
        MetricsEvent::CommandsQueued(n) => m.commands_queued += n,
        MetricsEvent::CommandsApplied(n) => m.commands_applied += n,
        MetricsEvent::GcSweep { rejected } => {
            m.gc_sweeps += 1;
            m.gc_rejected += rejected;
        }
        MetricsEvent::ListenerPanicked => m.listener_panics += 1,
    });
}
