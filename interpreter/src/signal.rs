use blocks::BlockId;
use tracing::trace;

/// Lifecycle notifications for an editor or other observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    StackStarted(BlockId),
    StackStopped(BlockId),
    BlockGlowOn(BlockId),
    BlockGlowOff(BlockId),
}

/// Signals raised since the last drain, in order.
///
/// Every dispatch adds a glow pair, so the queue grows for as long as threads
/// run. Whoever owns it must drain it regularly.
#[derive(Debug, Default)]
pub struct Signals {
    queue: Vec<Signal>,
}

impl Signals {
    pub fn emit(&mut self, signal: Signal) {
        trace!(?signal, "signal");
        self.queue.push(signal);
    }

    pub fn drain(&mut self) -> Vec<Signal> {
        std::mem::take(&mut self.queue)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
