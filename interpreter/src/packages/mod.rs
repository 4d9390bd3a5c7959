pub mod control;
pub mod event;
pub mod looks;

use std::io::Write;
use std::rc::Rc;

use crate::primitives::PrimitivePackage;

pub use control::Control;
pub use event::{Event, FLAG_HAT, RECEIVE_HAT};
pub use looks::{Looks, OutputBuffer};

/// The built-in packages, with `looks_say` writing to `output`.
pub fn standard(output: impl Write + 'static) -> Vec<Rc<dyn PrimitivePackage>> {
    let control: Rc<dyn PrimitivePackage> = Rc::new(Control);
    let event: Rc<dyn PrimitivePackage> = Rc::new(Event);
    let looks: Rc<dyn PrimitivePackage> = Rc::new(Looks::new(output));
    vec![control, event, looks]
}
