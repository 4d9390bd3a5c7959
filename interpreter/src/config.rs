use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for the tick loop and the primitive table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Ticks per second.
    pub tick_rate_hz: u32,
    /// Share of each tick the sequencer may spend running blocks.
    pub work_fraction: f64,
    /// Upper bound on scheduler rounds per tick. Needed when the clock does not
    /// advance while a tick runs.
    pub max_rounds_per_tick: Option<usize>,
    /// Reject packages whose opcodes collide instead of letting the last one win.
    pub strict_opcodes: bool,
    /// Hat opcode started by the green flag.
    pub start_hat_opcode: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            tick_rate_hz: 60,
            work_fraction: 0.75,
            max_rounds_per_tick: None,
            strict_opcodes: false,
            start_hat_opcode: "event_whenflagclicked".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz.max(1)))
    }

    pub fn work_time(&self) -> Duration {
        self.tick_interval().mul_f64(self.work_fraction.clamp(0.0, 1.0))
    }
}
