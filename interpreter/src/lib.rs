pub mod clock;
pub mod config;
pub mod error;
pub mod execute;
pub mod packages;
pub mod primitives;
pub mod runtime;
pub mod sequencer;
pub mod signal;
pub mod thread;
pub mod timer;
pub mod yield_timers;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::RuntimeConfig;
pub use error::{PrimitiveError, RuntimeError};
pub use execute::{RunSummary, run_program};
pub use primitives::{Arguments, BlockUtility, Primitive, PrimitivePackage, PrimitiveTable, Wakeup, primitive};
pub use runtime::Runtime;
pub use signal::Signal;
pub use thread::{Thread, ThreadStatus};
