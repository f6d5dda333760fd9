use crate::{
    command::Command,
    obs::{self, MetricsEvent},
};

///
/// CommandQueue
///
/// Outbound commands for local mutations accumulate here until the transport
/// flushes them as one ordered batch. Batching policy (timing, coalescing
/// across flushes) is a transport concern; this core only guarantees
/// accumulate-and-flush semantics in mutation order.
///

#[derive(Debug, Default)]
pub struct CommandQueue {
    queued: Vec<Command>,
}

impl CommandQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, command: Command) {
        obs::record(MetricsEvent::CommandsQueued(1));
        self.queued.push(command);
    }

    /// Take the accumulated batch, leaving the queue empty.
    pub fn flush(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.queued)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Drop everything without sending (session reset).
    pub fn clear(&mut self) {
        self.queued.clear();
    }
}
