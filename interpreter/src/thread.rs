use std::any::Any;
use std::fmt;

use blocks::BlockId;

use crate::yield_timers::DeadlineId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Running,
    /// Waiting on a deadline, or for the sequencer to clear the yield.
    Yielded,
    /// The current block finished; the sequencer re-arms or retires the thread.
    Done,
}

/// One entry of a thread's call stack.
pub struct Frame {
    pub block_id: BlockId,
    state: Option<Box<dyn Any>>,
    /// Set when control left this block but will come back to it: the block
    /// yielded, or its substack ran out. Re-entering reuses the frame.
    parked: bool,
}

impl Frame {
    fn new(block_id: BlockId) -> Self {
        Frame {
            block_id,
            state: None,
            parked: false,
        }
    }

    /// Per-invocation state for the block, created on first use.
    pub fn state<T: Default + 'static>(&mut self) -> &mut T {
        typed_state(&mut self.state)
    }

    pub(crate) fn take_state(&mut self) -> Option<Box<dyn Any>> {
        self.state.take()
    }

    pub(crate) fn restore_state(&mut self, state: Option<Box<dyn Any>>) {
        self.state = state;
    }

    pub fn is_parked(&self) -> bool {
        self.parked
    }
}

/// Downcast a state slot, replacing its contents if they hold another type.
pub(crate) fn typed_state<T: Default + 'static>(slot: &mut Option<Box<dyn Any>>) -> &mut T {
    if !slot.as_ref().is_some_and(|s| s.is::<T>()) {
        *slot = Some(Box::new(T::default()));
    }
    slot.as_mut()
        .and_then(|s| s.downcast_mut::<T>())
        .expect("state type checked above")
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("block_id", &self.block_id)
            .field("has_state", &self.state.is_some())
            .field("parked", &self.parked)
            .finish()
    }
}

/// A logical program running one stack.
#[derive(Debug)]
pub struct Thread {
    top_block: BlockId,
    next_block: Option<BlockId>,
    frames: Vec<Frame>,
    status: ThreadStatus,
    deadline: Option<DeadlineId>,
}

impl Thread {
    pub fn new(top_block: BlockId) -> Self {
        Thread {
            next_block: Some(top_block.clone()),
            top_block,
            frames: Vec::new(),
            status: ThreadStatus::Running,
            deadline: None,
        }
    }

    pub fn top_block(&self) -> &BlockId {
        &self.top_block
    }

    pub fn next_block(&self) -> Option<&BlockId> {
        self.next_block.as_ref()
    }

    pub fn status(&self) -> ThreadStatus {
        self.status
    }

    pub fn deadline(&self) -> Option<DeadlineId> {
        self.deadline
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Block ids on the call stack, outermost first.
    pub fn stack(&self) -> impl Iterator<Item = &BlockId> {
        self.frames.iter().map(|f| &f.block_id)
    }

    pub fn is_finished(&self) -> bool {
        self.status == ThreadStatus::Done && self.next_block.is_none() && self.frames.is_empty()
    }

    /// Whether `id` is this thread's root, its next block, or on its stack.
    pub fn references(&self, id: &str) -> bool {
        self.top_block == id
            || self.next_block.as_deref() == Some(id)
            || self.frames.iter().any(|f| f.block_id == id)
    }

    pub(crate) fn set_status(&mut self, status: ThreadStatus) {
        self.status = status;
    }

    pub(crate) fn set_next_block(&mut self, next: Option<BlockId>) {
        self.next_block = next;
    }

    pub(crate) fn set_deadline(&mut self, deadline: Option<DeadlineId>) {
        self.deadline = deadline;
    }

    /// Enter `block_id`. A parked frame for the same block is resumed instead
    /// of pushing a new one, which keeps loop state alive across iterations.
    pub(crate) fn push_block(&mut self, block_id: &BlockId) {
        match self.frames.last_mut() {
            Some(top) if top.parked && top.block_id == *block_id => top.parked = false,
            _ => self.frames.push(Frame::new(block_id.clone())),
        }
    }

    pub(crate) fn top_frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    pub(crate) fn top_frame_is(&self, block_id: &str) -> bool {
        self.frames.last().is_some_and(|f| f.block_id == block_id)
    }

    /// Leave the current block for good.
    pub(crate) fn pop_frame(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// Park the current block so the next dispatch of it resumes this frame.
    pub(crate) fn park_top(&mut self) {
        if let Some(top) = self.frames.last_mut() {
            top.parked = true;
        }
    }

    /// Return control to the enclosing block.
    pub(crate) fn pop_to_parent(&mut self) {
        if let Some(top) = self.frames.last_mut() {
            top.parked = true;
            self.next_block = Some(top.block_id.clone());
        }
    }

    /// End the thread where it stands.
    pub(crate) fn stop(&mut self) {
        self.frames.clear();
        self.next_block = None;
        self.status = ThreadStatus::Done;
    }
}
