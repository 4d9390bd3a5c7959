use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;

use crate::primitives::{Primitive, PrimitivePackage, primitive};

/// Text output. `looks_say` writes one line per call to the package's sink.
pub struct Looks {
    out: RefCell<Box<dyn Write>>,
    said: Cell<usize>,
}

impl Looks {
    pub fn new(out: impl Write + 'static) -> Self {
        Looks {
            out: RefCell::new(Box::new(out)),
            said: Cell::new(0),
        }
    }

    /// Lines written so far.
    pub fn said(&self) -> usize {
        self.said.get()
    }
}

impl PrimitivePackage for Looks {
    fn name(&self) -> &'static str {
        "looks"
    }

    fn primitives(self: Rc<Self>) -> HashMap<&'static str, Rc<dyn Primitive>> {
        HashMap::from([(
            "looks_say",
            primitive(move |args, _| {
                let message = args.text("MESSAGE");
                writeln!(self.out.borrow_mut(), "{message}")?;
                self.said.set(self.said.get() + 1);
                Ok(())
            }),
        )])
    }
}

/// Shared in-memory sink, for capturing what a program says.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    bytes: Rc<RefCell<Vec<u8>>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.borrow()).into_owned()
    }
}

impl Write for OutputBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_clones_share_contents() {
        let buffer = OutputBuffer::new();
        let mut writer = buffer.clone();
        writeln!(writer, "hello").unwrap();
        assert_eq!(buffer.contents(), "hello\n");
    }
}
