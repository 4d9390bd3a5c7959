use std::any::Any;
use std::time::Duration;

use blocks::{Block, BlockGraph, BlockId, SUBSTACK};
use tracing::debug;

use crate::signal::{Signal, Signals};
use crate::thread::{Thread, ThreadStatus, typed_state};
use crate::yield_timers::{DeadlineId, YieldTimers};

/// Everything a primitive may do to the scheduler while its block runs.
pub struct BlockUtility<'a> {
    thread: &'a mut Thread,
    block_id: &'a BlockId,
    graph: &'a BlockGraph,
    timers: &'a mut YieldTimers,
    signals: &'a mut Signals,
    /// Other active threads, split around the current one.
    before: &'a [Thread],
    after: &'a [Thread],
    spawned: &'a mut Vec<Thread>,
    state: Option<Box<dyn Any>>,
    redirected: bool,
    completed: bool,
    registered: Vec<DeadlineId>,
}

/// What a dispatch did besides running the primitive body.
pub(crate) struct StepEffects {
    pub state: Option<Box<dyn Any>>,
    pub redirected: bool,
    pub completed: bool,
    pub registered: Vec<DeadlineId>,
}

impl<'a> BlockUtility<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        thread: &'a mut Thread,
        block_id: &'a BlockId,
        graph: &'a BlockGraph,
        timers: &'a mut YieldTimers,
        signals: &'a mut Signals,
        before: &'a [Thread],
        after: &'a [Thread],
        spawned: &'a mut Vec<Thread>,
        state: Option<Box<dyn Any>>,
    ) -> Self {
        BlockUtility {
            thread,
            block_id,
            graph,
            timers,
            signals,
            before,
            after,
            spawned,
            state,
            redirected: false,
            completed: false,
            registered: Vec::new(),
        }
    }

    pub(crate) fn into_effects(self) -> StepEffects {
        StepEffects {
            state: self.state,
            redirected: self.redirected,
            completed: self.completed,
            registered: self.registered,
        }
    }

    pub fn block_id(&self) -> &BlockId {
        self.block_id
    }

    pub fn block(&self) -> Option<&Block> {
        self.graph.get(self.block_id)
    }

    /// Root of the stack the calling thread runs.
    pub fn top_block(&self) -> &BlockId {
        self.thread.top_block()
    }

    /// Suspend the calling thread. Pair with `timeout` to resume after a
    /// delay; without one the thread resumes this block on a later round.
    pub fn yield_thread(&mut self) {
        self.thread.set_status(ThreadStatus::Yielded);
    }

    /// Finish the current block now.
    pub fn done(&mut self) {
        if self.completed {
            return;
        }
        complete_block(self.thread, self.block_id, self.graph, self.signals);
        self.completed = true;
    }

    /// Ask to be woken once `delay` has passed. The calling thread waits on
    /// the returned deadline.
    pub fn timeout(
        &mut self,
        callback: impl FnOnce(&mut Wakeup<'_>) + 'static,
        delay: Duration,
    ) -> DeadlineId {
        let id = self.timers.timeout(Box::new(callback), delay);
        self.thread.set_deadline(Some(id));
        self.registered.push(id);
        id
    }

    /// State that survives repeated dispatches of this block, such as a loop
    /// counter.
    pub fn stack_frame<T: Default + 'static>(&mut self) -> &mut T {
        typed_state(&mut self.state)
    }

    /// Continue into this block's `SUBSTACK` body instead of its next block.
    /// Returns false when the body is empty.
    pub fn start_substack(&mut self) -> bool {
        self.start_substack_named(SUBSTACK)
    }

    /// Continue into the body plugged into the named slot.
    pub fn start_substack_named(&mut self, slot: &str) -> bool {
        match self.graph.slot(self.block_id, slot) {
            Some(first) => {
                self.thread.set_next_block(Some(first.clone()));
                self.redirected = true;
                true
            }
            None => false,
        }
    }

    /// Start a thread for every stack whose top block satisfies `predicate`
    /// and is not already running. Returns how many were started.
    pub fn start_hats(&mut self, mut predicate: impl FnMut(&Block) -> bool) -> usize {
        let graph = self.graph;
        let mut started = 0;
        for root in graph.stacks() {
            let Some(block) = graph.get(root) else {
                continue;
            };
            if !predicate(block) || self.is_running(root) {
                continue;
            }
            debug!(stack = %root, from = %self.block_id, "hat matched");
            self.spawned.push(Thread::new(root.clone()));
            started += 1;
        }
        started
    }

    /// End the calling thread after this block.
    pub fn stop_thread(&mut self) {
        if let Some(id) = self.thread.deadline() {
            self.timers.reject(id);
            self.thread.set_deadline(None);
        }
        self.signals.emit(Signal::BlockGlowOff(self.block_id.clone()));
        self.thread.stop();
        self.completed = true;
    }

    fn is_running(&self, root: &str) -> bool {
        self.thread.top_block() == root
            || self
                .before
                .iter()
                .chain(self.after.iter())
                .chain(self.spawned.iter())
                .any(|t| t.top_block() == root)
    }
}

/// Capability surface handed to a deadline callback.
pub struct Wakeup<'a> {
    thread: &'a mut Thread,
    graph: &'a BlockGraph,
    signals: &'a mut Signals,
    completed: bool,
}

impl<'a> Wakeup<'a> {
    pub(crate) fn new(thread: &'a mut Thread, graph: &'a BlockGraph, signals: &'a mut Signals) -> Self {
        Wakeup {
            thread,
            graph,
            signals,
            completed: false,
        }
    }

    /// The block that registered the deadline.
    pub fn block_id(&self) -> Option<&BlockId> {
        self.thread.frames().last().map(|f| &f.block_id)
    }

    pub fn thread(&self) -> &Thread {
        self.thread
    }

    /// Finish the waiting block and move on to whatever follows it now.
    pub fn done(&mut self) {
        if self.completed {
            return;
        }
        let Some(block_id) = self.block_id().cloned() else {
            return;
        };
        complete_block(self.thread, &block_id, self.graph, self.signals);
        self.completed = true;
    }
}

/// Pop `block_id` off the thread and point it at the block's current successor.
pub(crate) fn complete_block(
    thread: &mut Thread,
    block_id: &BlockId,
    graph: &BlockGraph,
    signals: &mut Signals,
) {
    if thread.top_frame_is(block_id) {
        thread.pop_frame();
    }
    thread.set_next_block(graph.next(block_id).cloned());
    thread.set_status(ThreadStatus::Done);
    signals.emit(Signal::BlockGlowOff(block_id.clone()));
}
