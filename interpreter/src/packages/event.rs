use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::error::PrimitiveError;
use crate::primitives::{Arguments, BlockUtility, Primitive, PrimitivePackage, primitive};

pub const FLAG_HAT: &str = "event_whenflagclicked";
pub const RECEIVE_HAT: &str = "event_whenbroadcastreceived";

/// Hats and broadcast.
pub struct Event;

impl PrimitivePackage for Event {
    fn name(&self) -> &'static str {
        "event"
    }

    fn primitives(self: Rc<Self>) -> HashMap<&'static str, Rc<dyn Primitive>> {
        HashMap::from([
            (FLAG_HAT, primitive(|_, _| Ok(()))),
            (RECEIVE_HAT, primitive(|_, _| Ok(()))),
            ("event_broadcast", primitive(broadcast)),
        ])
    }
}

/// Start every receive hat listening for `BROADCAST_INPUT`. Names compare
/// case-insensitively.
fn broadcast(args: &Arguments, util: &mut BlockUtility<'_>) -> Result<(), PrimitiveError> {
    let name = args.text("BROADCAST_INPUT");
    let started = util.start_hats(|block| {
        block.opcode() == Some(RECEIVE_HAT)
            && block
                .field_value("BROADCAST_OPTION")
                .is_some_and(|option| option.as_text().eq_ignore_ascii_case(&name))
    });
    debug!(message = %name, started, "broadcast");
    Ok(())
}
