use std::io::Write;

use blocks::Program;
use tracing::info;

use crate::clock::SharedClock;
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::packages;
use crate::runtime::Runtime;
use crate::signal::Signal;

/// What happened during a green-flag run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    /// Threads started over the whole run, including broadcast receivers.
    pub threads_started: usize,
    /// False if threads were still active when the tick limit was reached.
    pub idle: bool,
}

/// Load `program` with the built-in packages, press the green flag, and tick
/// until nothing is running or `max_ticks` is reached.
pub fn run_program(
    program: &Program,
    output: impl Write + 'static,
    clock: SharedClock,
    config: RuntimeConfig,
    max_ticks: u64,
) -> Result<RunSummary, RuntimeError> {
    let mut runtime = Runtime::new(packages::standard(output), clock, config)?;
    runtime.load_program(program)?;
    runtime.start();
    runtime.green_flag();

    // Drain as we go so a long run does not hold every glow it produced.
    let mut threads_started = count_started(&runtime.take_signals());
    let mut ticks = 0;
    while !runtime.is_idle() && ticks < max_ticks {
        runtime.run_ticks(1)?;
        threads_started += count_started(&runtime.take_signals());
        ticks += 1;
    }
    runtime.stop();

    let summary = RunSummary {
        ticks,
        threads_started,
        idle: runtime.is_idle(),
    };
    info!(?summary, "run finished");
    Ok(summary)
}

fn count_started(signals: &[Signal]) -> usize {
    signals
        .iter()
        .filter(|s| matches!(s, Signal::StackStarted(_)))
        .count()
}
