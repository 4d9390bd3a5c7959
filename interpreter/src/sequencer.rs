use std::time::Duration;

use blocks::BlockGraph;
use tracing::{debug, trace, warn};

use crate::clock::SharedClock;
use crate::config::RuntimeConfig;
use crate::primitives::util::{Wakeup, complete_block};
use crate::primitives::{Arguments, BlockUtility, PrimitiveTable};
use crate::signal::{Signal, Signals};
use crate::thread::{Thread, ThreadStatus};
use crate::timer::Timer;
use crate::yield_timers::YieldTimers;

/// Everything a scheduler pass borrows from the runtime.
pub struct StepContext<'a> {
    pub graph: &'a BlockGraph,
    pub primitives: &'a PrimitiveTable,
    pub timers: &'a mut YieldTimers,
    pub signals: &'a mut Signals,
}

/// Steps threads round-robin within a per-tick time budget.
pub struct Sequencer {
    timer: Timer,
    work_time: Duration,
    max_rounds: Option<usize>,
}

impl Sequencer {
    pub fn new(clock: SharedClock, config: &RuntimeConfig) -> Self {
        Sequencer {
            timer: Timer::new(clock),
            work_time: config.work_time(),
            max_rounds: config.max_rounds_per_tick,
        }
    }

    /// Run rounds over `threads` until every thread is waiting, the budget is
    /// spent, or the round cap is hit. Finished threads are taken out of
    /// `threads` and returned.
    ///
    /// Threads started during a round are appended to `threads` and stepped in
    /// that same round.
    pub fn step_threads(&mut self, threads: &mut Vec<Thread>, ctx: &mut StepContext<'_>) -> Vec<Thread> {
        self.timer.start();
        let mut finished = Vec::new();
        let mut rounds = 0usize;
        let mut yielding = 0usize;

        while !threads.is_empty()
            && threads.len() > yielding
            && self.timer.time_elapsed() < self.work_time
            && self.max_rounds.is_none_or(|max| rounds < max)
        {
            yielding = 0;
            let mut i = 0;
            while i < threads.len() {
                let waiting = match threads[i].status() {
                    ThreadStatus::Running => {
                        step_thread(threads, i, ctx);
                        false
                    }
                    ThreadStatus::Yielded => resolve_yield(&mut threads[i], ctx),
                    ThreadStatus::Done => false,
                };
                if waiting {
                    yielding += 1;
                }
                settle(&mut threads[i]);
                i += 1;
            }
            rounds += 1;

            let (done, active): (Vec<_>, Vec<_>) =
                std::mem::take(threads).into_iter().partition(Thread::is_finished);
            *threads = active;
            finished.extend(done);
        }

        trace!(rounds, finished = finished.len(), active = threads.len(), "tick done");
        finished
    }
}

/// Poll a yielded thread. Returns true if the thread is still waiting for
/// this round.
fn resolve_yield(thread: &mut Thread, ctx: &mut StepContext<'_>) -> bool {
    let Some(id) = thread.deadline() else {
        thread.set_status(ThreadStatus::Running);
        return true;
    };
    if let Some(callback) = ctx.timers.resolve(id) {
        thread.set_deadline(None);
        thread.set_status(ThreadStatus::Running);
        let mut wakeup = Wakeup::new(thread, ctx.graph, ctx.signals);
        callback(&mut wakeup);
        return false;
    }
    if !ctx.timers.is_pending(id) {
        // The deadline is gone without firing; treat as a plain yield.
        thread.set_deadline(None);
        thread.set_status(ThreadStatus::Running);
    }
    true
}

/// Re-arm a thread whose block just completed, popping back into the
/// enclosing block when its body has run out.
fn settle(thread: &mut Thread) {
    if thread.status() != ThreadStatus::Done {
        return;
    }
    if thread.next_block().is_none() && !thread.frames().is_empty() {
        thread.pop_to_parent();
    }
    if thread.next_block().is_some() {
        thread.set_status(ThreadStatus::Running);
    }
}

/// Execute one block on `threads[i]`.
fn step_thread(threads: &mut Vec<Thread>, i: usize, ctx: &mut StepContext<'_>) {
    let mut spawned = Vec::new();
    {
        let (before, rest) = threads.split_at_mut(i);
        let Some((thread, after)) = rest.split_first_mut() else {
            return;
        };
        dispatch(thread, before, after, &mut spawned, ctx);
    }
    for thread in spawned {
        debug!(stack = %thread.top_block(), "started stack");
        ctx.signals.emit(Signal::StackStarted(thread.top_block().clone()));
        threads.push(thread);
    }
}

fn dispatch(
    thread: &mut Thread,
    before: &[Thread],
    after: &[Thread],
    spawned: &mut Vec<Thread>,
    ctx: &mut StepContext<'_>,
) {
    let graph = ctx.graph;
    let Some(block_id) = thread.next_block().cloned() else {
        thread.set_status(ThreadStatus::Done);
        return;
    };
    let Some(block) = graph.get(&block_id) else {
        debug!(block = %block_id, "block no longer exists, leaving it");
        if thread.top_frame_is(&block_id) {
            thread.pop_frame();
        }
        thread.set_next_block(None);
        thread.set_status(ThreadStatus::Done);
        return;
    };

    ctx.signals.emit(Signal::BlockGlowOn(block_id.clone()));
    thread.push_block(&block_id);

    let opcode = block.opcode().unwrap_or_default();
    let Some(primitive) = ctx.primitives.get(opcode) else {
        warn!(opcode, block = %block_id, "no primitive for opcode, skipping block");
        complete_block(thread, &block_id, graph, ctx.signals);
        return;
    };

    let args = Arguments::new(graph.field_values(&block_id));
    let state = thread.top_frame_mut().and_then(|f| f.take_state());
    trace!(opcode, block = %block_id, "dispatch");

    let mut util = BlockUtility::new(
        thread,
        &block_id,
        graph,
        ctx.timers,
        ctx.signals,
        before,
        after,
        spawned,
        state,
    );
    let result = primitive.invoke(&args, &mut util);
    let effects = util.into_effects();

    if let Err(err) = result {
        warn!(opcode, block = %block_id, error = %err, "primitive failed");
        for id in &effects.registered {
            ctx.timers.reject(*id);
        }
        if thread
            .deadline()
            .is_some_and(|d| effects.registered.contains(&d))
        {
            thread.set_deadline(None);
        }
        spawned.clear();
        if thread.status() == ThreadStatus::Yielded {
            thread.set_status(ThreadStatus::Running);
        }
        if !effects.completed {
            complete_block(thread, &block_id, graph, ctx.signals);
        }
        return;
    }

    if effects.completed {
        return;
    }
    if thread.status() == ThreadStatus::Yielded {
        thread.park_top();
    } else if effects.redirected {
        thread.set_status(ThreadStatus::Done);
    } else {
        complete_block(thread, &block_id, graph, ctx.signals);
        return;
    }
    if let Some(frame) = thread.top_frame_mut().filter(|f| f.block_id == block_id) {
        frame.restore_state(effects.state);
    }
}
