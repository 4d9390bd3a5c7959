use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use crate::error::PrimitiveError;
use crate::primitives::{Arguments, BlockUtility, Primitive, PrimitivePackage, primitive};

/// Loops, branches, waiting, and stopping.
pub struct Control;

#[derive(Default)]
struct LoopState {
    remaining: Option<i64>,
}

#[derive(Default)]
struct BranchState {
    entered: bool,
}

impl PrimitivePackage for Control {
    fn name(&self) -> &'static str {
        "control"
    }

    fn primitives(self: Rc<Self>) -> HashMap<&'static str, Rc<dyn Primitive>> {
        HashMap::from([
            ("control_repeat", primitive(repeat)),
            ("control_forever", primitive(forever)),
            ("control_if", primitive(if_then)),
            ("control_if_else", primitive(if_else)),
            ("control_wait", primitive(wait)),
            ("control_stop", primitive(stop)),
        ])
    }
}

/// Enters the body `TIMES` times, then moves on.
fn repeat(args: &Arguments, util: &mut BlockUtility<'_>) -> Result<(), PrimitiveError> {
    let times = args.number("TIMES").round() as i64;
    let enter = {
        let state = util.stack_frame::<LoopState>();
        let remaining = state.remaining.get_or_insert(times);
        *remaining -= 1;
        *remaining >= 0
    };
    if enter {
        util.start_substack();
    }
    Ok(())
}

fn forever(_args: &Arguments, util: &mut BlockUtility<'_>) -> Result<(), PrimitiveError> {
    // An empty body still has to give the other threads a turn.
    if !util.start_substack() {
        util.yield_thread();
    }
    Ok(())
}

fn if_then(args: &Arguments, util: &mut BlockUtility<'_>) -> Result<(), PrimitiveError> {
    if first_visit(util) && args.boolean("CONDITION") {
        util.start_substack();
    }
    Ok(())
}

fn if_else(args: &Arguments, util: &mut BlockUtility<'_>) -> Result<(), PrimitiveError> {
    if !first_visit(util) {
        return Ok(());
    }
    if args.boolean("CONDITION") {
        util.start_substack();
    } else {
        util.start_substack_named("SUBSTACK2");
    }
    Ok(())
}

/// False once the branch body has run and control came back to the block.
fn first_visit(util: &mut BlockUtility<'_>) -> bool {
    let state = util.stack_frame::<BranchState>();
    !std::mem::replace(&mut state.entered, true)
}

/// Waits `DURATION` seconds.
fn wait(args: &Arguments, util: &mut BlockUtility<'_>) -> Result<(), PrimitiveError> {
    let seconds = args.number("DURATION").max(0.0);
    let delay = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX);
    util.yield_thread();
    util.timeout(|wakeup| wakeup.done(), delay);
    Ok(())
}

fn stop(_args: &Arguments, util: &mut BlockUtility<'_>) -> Result<(), PrimitiveError> {
    util.stop_thread();
    Ok(())
}
