use std::rc::Rc;

use blocks::{BlockGraph, BlockId, BlockRecord, MoveEvent, Mutation, Program, Value};
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::primitives::{PrimitivePackage, PrimitiveTable};
use crate::sequencer::{Sequencer, StepContext};
use crate::signal::{Signal, Signals};
use crate::thread::Thread;
use crate::yield_timers::YieldTimers;

/// Owns the program graph, the active threads, and the tick loop.
///
/// Lifecycle signals queue up until `take_signals` drains them.
pub struct Runtime {
    blocks: BlockGraph,
    primitives: PrimitiveTable,
    threads: Vec<Thread>,
    sequencer: Sequencer,
    timers: YieldTimers,
    signals: Signals,
    clock: SharedClock,
    config: RuntimeConfig,
    armed: bool,
    ticks: u64,
}

impl Runtime {
    /// Build a runtime from `packages`, registered in order.
    pub fn new(
        packages: impl IntoIterator<Item = Rc<dyn PrimitivePackage>>,
        clock: SharedClock,
        config: RuntimeConfig,
    ) -> Result<Self, RuntimeError> {
        let mut primitives = PrimitiveTable::new();
        for package in packages {
            primitives.register(package, config.strict_opcodes)?;
        }
        Ok(Runtime {
            blocks: BlockGraph::new(),
            primitives,
            threads: Vec::new(),
            sequencer: Sequencer::new(clock.clone(), &config),
            timers: YieldTimers::new(clock.clone()),
            signals: Signals::default(),
            clock,
            config,
            armed: false,
            ticks: 0,
        })
    }

    // --- Block mutations ---

    /// Route a mutation record to the graph. Threads touching blocks a
    /// `delete` removed are stopped.
    pub fn apply(&mut self, mutation: Mutation) -> Result<(), RuntimeError> {
        let removed = self.blocks.apply(mutation)?;
        self.stop_threads_on(&removed);
        Ok(())
    }

    pub fn load_program(&mut self, program: &Program) -> Result<(), RuntimeError> {
        for mutation in program.to_mutations() {
            self.apply(mutation)?;
        }
        debug!(
            blocks = self.blocks.len(),
            stacks = self.blocks.stacks().len(),
            "loaded program"
        );
        Ok(())
    }

    pub fn create_block(&mut self, record: BlockRecord, ephemeral: bool) -> Result<(), RuntimeError> {
        Ok(self.blocks.create_block(record, ephemeral)?)
    }

    pub fn change_block_field(&mut self, id: &str, field_name: &str, value: Value) {
        self.blocks.change_block_field(id, field_name, value);
    }

    pub fn move_block(&mut self, event: &MoveEvent) -> Result<(), RuntimeError> {
        Ok(self.blocks.move_block(event)?)
    }

    /// Delete a block and everything it owns. Threads that were running or
    /// about to run any removed block are stopped.
    pub fn delete_block(&mut self, id: &str) -> Vec<BlockId> {
        let removed = self.blocks.delete_block(id);
        self.stop_threads_on(&removed);
        removed
    }

    fn stop_threads_on(&mut self, removed: &[BlockId]) {
        if removed.is_empty() {
            return;
        }
        let mut i = 0;
        while i < self.threads.len() {
            if removed.iter().any(|r| self.threads[i].references(r)) {
                debug!(stack = %self.threads[i].top_block(), "stopping thread on deleted block");
                self.remove_thread(i);
            } else {
                i += 1;
            }
        }
    }

    // --- Thread control ---

    /// Stop everything, then start every stack topped by the start hat.
    /// Returns how many stacks were started.
    pub fn green_flag(&mut self) -> usize {
        self.stop_all();
        let roots: Vec<BlockId> = self
            .blocks
            .stacks()
            .iter()
            .filter(|root| self.blocks.opcode(root) == Some(self.config.start_hat_opcode.as_str()))
            .cloned()
            .collect();
        let mut started = 0;
        for root in &roots {
            if self.push_thread(root) {
                started += 1;
            }
        }
        info!(started, "green flag");
        started
    }

    /// Start the stack at `root`, or stop it if it is already running.
    /// Returns whether a thread is running for it afterwards.
    ///
    /// Only stack roots can be started: ephemeral preview blocks and blocks
    /// attached under a parent are refused with `UnknownStack`.
    pub fn toggle_stack(&mut self, root: &str) -> Result<bool, RuntimeError> {
        if let Some(i) = self.threads.iter().position(|t| t.top_block() == root) {
            self.remove_thread(i);
            return Ok(false);
        }
        if !self.blocks.is_stack(root) {
            return Err(RuntimeError::UnknownStack(root.to_string()));
        }
        Ok(self.push_thread(&root.to_string()))
    }

    pub fn stop_all(&mut self) {
        for thread in self.threads.drain(..) {
            self.signals.emit(Signal::StackStopped(thread.top_block().clone()));
        }
        self.timers.reject_all();
    }

    fn push_thread(&mut self, root: &BlockId) -> bool {
        if self.is_running(root) {
            return false;
        }
        debug!(stack = %root, "started stack");
        self.threads.push(Thread::new(root.clone()));
        self.signals.emit(Signal::StackStarted(root.clone()));
        true
    }

    fn remove_thread(&mut self, index: usize) {
        let thread = self.threads.remove(index);
        if let Some(deadline) = thread.deadline() {
            self.timers.reject(deadline);
        }
        debug!(stack = %thread.top_block(), "stopped stack");
        self.signals.emit(Signal::StackStopped(thread.top_block().clone()));
    }

    // --- Tick loop ---

    /// Arm the tick loop.
    pub fn start(&mut self) {
        self.armed = true;
    }

    pub fn stop(&mut self) {
        self.armed = false;
    }

    pub fn is_started(&self) -> bool {
        self.armed
    }

    /// One scheduler pass over the active threads.
    pub fn tick(&mut self) -> Result<(), RuntimeError> {
        if !self.armed {
            return Err(RuntimeError::NotStarted);
        }
        let mut ctx = StepContext {
            graph: &self.blocks,
            primitives: &self.primitives,
            timers: &mut self.timers,
            signals: &mut self.signals,
        };
        let finished = self.sequencer.step_threads(&mut self.threads, &mut ctx);
        for thread in finished {
            debug!(stack = %thread.top_block(), "stack finished");
            self.signals.emit(Signal::StackStopped(thread.top_block().clone()));
        }
        self.ticks += 1;
        Ok(())
    }

    /// Run `count` ticks, pacing them at the configured rate.
    pub fn run_ticks(&mut self, count: u64) -> Result<(), RuntimeError> {
        for _ in 0..count {
            self.paced_tick()?;
        }
        Ok(())
    }

    /// Tick until no threads remain or `max_ticks` have run. Returns the
    /// number of ticks run.
    pub fn run_until_idle(&mut self, max_ticks: u64) -> Result<u64, RuntimeError> {
        if !self.armed {
            return Err(RuntimeError::NotStarted);
        }
        let mut ran = 0;
        while !self.is_idle() && ran < max_ticks {
            self.paced_tick()?;
            ran += 1;
        }
        Ok(ran)
    }

    fn paced_tick(&mut self) -> Result<(), RuntimeError> {
        let started = self.clock.now();
        self.tick()?;
        let spent = self.clock.now().saturating_sub(started);
        self.clock.sleep(self.config.tick_interval().saturating_sub(spent));
        Ok(())
    }

    // --- Inspection ---

    pub fn blocks(&self) -> &BlockGraph {
        &self.blocks
    }

    pub fn primitives(&self) -> &PrimitiveTable {
        &self.primitives
    }

    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn is_running(&self, root: &str) -> bool {
        self.threads.iter().any(|t| t.top_block() == root)
    }

    pub fn is_idle(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn pending_deadlines(&self) -> usize {
        self.timers.len()
    }

    /// Signals raised since the last call, in order.
    ///
    /// Nothing else empties the queue. An embedder that keeps ticking must
    /// call this between ticks or the queue grows by two entries per block run.
    pub fn take_signals(&mut self) -> Vec<Signal> {
        self.signals.drain()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::clock::ManualClock;
    use crate::packages::{self, Control, OutputBuffer};
    use crate::primitives::{Primitive, primitive};

    fn runtime() -> Runtime {
        let config = RuntimeConfig {
            max_rounds_per_tick: Some(100),
            ..Default::default()
        };
        Runtime::new(
            packages::standard(OutputBuffer::new()),
            Rc::new(ManualClock::new()),
            config,
        )
        .unwrap()
    }

    struct Shadowing;

    impl PrimitivePackage for Shadowing {
        fn name(&self) -> &'static str {
            "shadowing"
        }

        fn primitives(self: Rc<Self>) -> HashMap<&'static str, Rc<dyn Primitive>> {
            HashMap::from([("control_wait", primitive(|_, _| Ok(())))])
        }
    }

    #[test]
    fn strict_config_refuses_colliding_packages() {
        let config = RuntimeConfig {
            strict_opcodes: true,
            ..Default::default()
        };
        let control: Rc<dyn PrimitivePackage> = Rc::new(Control);
        let shadowing: Rc<dyn PrimitivePackage> = Rc::new(Shadowing);
        let result = Runtime::new([control, shadowing], Rc::new(ManualClock::new()), config);
        assert!(matches!(result, Err(RuntimeError::DuplicateOpcode { .. })));
    }

    #[test]
    fn ticking_requires_start() {
        let mut rt = runtime();
        assert!(matches!(rt.tick(), Err(RuntimeError::NotStarted)));
        assert!(matches!(rt.run_until_idle(5), Err(RuntimeError::NotStarted)));
        rt.start();
        assert!(rt.tick().is_ok());
        rt.stop();
        assert!(!rt.is_started());
    }

    #[test]
    fn green_flag_starts_only_flag_stacks() {
        let mut rt = runtime();
        rt.create_block(BlockRecord::new("flag", "event_whenflagclicked"), false).unwrap();
        rt.create_block(BlockRecord::new("loose", "control_wait"), false).unwrap();

        assert_eq!(rt.green_flag(), 1);
        assert!(rt.is_running("flag"));
        assert!(!rt.is_running("loose"));
        assert_eq!(rt.take_signals(), [Signal::StackStarted("flag".into())]);
    }

    #[test]
    fn green_flag_restarts_running_stacks() {
        let mut rt = runtime();
        rt.create_block(BlockRecord::new("flag", "event_whenflagclicked"), false).unwrap();
        rt.green_flag();
        rt.take_signals();

        assert_eq!(rt.green_flag(), 1);
        assert_eq!(
            rt.take_signals(),
            [
                Signal::StackStopped("flag".into()),
                Signal::StackStarted("flag".into())
            ]
        );
        assert_eq!(rt.threads().len(), 1);
    }

    #[test]
    fn toggling_an_unknown_stack_fails() {
        let mut rt = runtime();
        assert!(matches!(
            rt.toggle_stack("nowhere"),
            Err(RuntimeError::UnknownStack(ref id)) if id == "nowhere"
        ));
    }

    #[test]
    fn toggling_refuses_previews_and_attached_blocks() {
        let output = OutputBuffer::new();
        let mut rt = Runtime::new(
            packages::standard(output.clone()),
            Rc::new(ManualClock::new()),
            RuntimeConfig::default(),
        )
        .unwrap();
        rt.create_block(BlockRecord::new("preview", "looks_say").with_value("MESSAGE", "palette"), true)
            .unwrap();
        rt.create_block(BlockRecord::new("top", "looks_say").with_value("MESSAGE", "top"), false)
            .unwrap();
        rt.create_block(BlockRecord::new("child", "looks_say").with_value("MESSAGE", "child"), false)
            .unwrap();
        rt.move_block(&MoveEvent::attach("child", "top")).unwrap();
        rt.start();

        for id in ["preview", "child"] {
            assert!(matches!(
                rt.toggle_stack(id),
                Err(RuntimeError::UnknownStack(ref got)) if got == id
            ));
        }
        rt.run_until_idle(5).unwrap();
        assert!(rt.is_idle());
        assert_eq!(output.contents(), "");

        assert!(rt.toggle_stack("top").unwrap());
        rt.run_until_idle(5).unwrap();
        assert_eq!(output.contents(), "top\nchild\n");
    }

    #[test]
    fn stopping_a_waiting_thread_rejects_its_deadline() {
        let mut rt = runtime();
        rt.create_block(BlockRecord::new("w", "control_wait").with_value("DURATION", 10.0), false)
            .unwrap();
        rt.start();
        assert!(rt.toggle_stack("w").unwrap());
        rt.tick().unwrap();
        assert_eq!(rt.pending_deadlines(), 1);

        assert!(!rt.toggle_stack("w").unwrap());
        assert_eq!(rt.pending_deadlines(), 0);
        assert!(rt.is_idle());
    }

    #[test]
    fn deleting_a_running_block_stops_its_thread() {
        let mut rt = runtime();
        rt.create_block(BlockRecord::new("top", "control_forever"), false).unwrap();
        rt.create_block(BlockRecord::new("other", "control_forever"), false).unwrap();
        rt.start();
        rt.toggle_stack("top").unwrap();
        rt.toggle_stack("other").unwrap();
        rt.tick().unwrap();
        rt.take_signals();

        assert_eq!(rt.delete_block("top"), ["top"]);
        assert_eq!(rt.take_signals(), [Signal::StackStopped("top".into())]);
        assert!(rt.is_running("other"));
        assert!(rt.delete_block("top").is_empty());
    }
}
