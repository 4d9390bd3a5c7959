pub mod arguments;
pub mod util;

use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::error::{PrimitiveError, RuntimeError};

pub use arguments::Arguments;
pub use util::{BlockUtility, Wakeup};

/// Behaviour behind one opcode.
pub trait Primitive {
    fn invoke(&self, args: &Arguments, util: &mut BlockUtility<'_>) -> Result<(), PrimitiveError>;
}

impl<F> Primitive for F
where
    F: Fn(&Arguments, &mut BlockUtility<'_>) -> Result<(), PrimitiveError>,
{
    fn invoke(&self, args: &Arguments, util: &mut BlockUtility<'_>) -> Result<(), PrimitiveError> {
        self(args, util)
    }
}

/// Wrap a closure as a shareable primitive. Going through this function pins
/// the closure's signature to the one `Primitive` expects.
pub fn primitive<F>(f: F) -> Rc<dyn Primitive>
where
    F: Fn(&Arguments, &mut BlockUtility<'_>) -> Result<(), PrimitiveError> + 'static,
{
    Rc::new(f)
}

/// A named group of primitives.
///
/// Packages hand out primitives from an `Rc` of themselves so each closure can
/// hold on to the package instance and reach its private state.
pub trait PrimitivePackage {
    fn name(&self) -> &'static str;
    fn primitives(self: Rc<Self>) -> HashMap<&'static str, Rc<dyn Primitive>>;
}

struct Entry {
    primitive: Rc<dyn Primitive>,
    package: &'static str,
}

/// Opcode lookup table assembled from packages.
#[derive(Default)]
pub struct PrimitiveTable {
    entries: HashMap<String, Entry>,
}

impl PrimitiveTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every primitive `package` provides and return how many there were.
    ///
    /// An opcode that is already registered is replaced with a warning, or
    /// refused outright in strict mode. A refused package adds nothing.
    pub fn register(
        &mut self,
        package: Rc<dyn PrimitivePackage>,
        strict: bool,
    ) -> Result<usize, RuntimeError> {
        let name = package.name();
        let primitives = package.primitives();

        let mut opcodes: Vec<_> = primitives.keys().copied().collect();
        opcodes.sort_unstable();
        for opcode in &opcodes {
            if let Some(existing) = self.entries.get(*opcode) {
                if strict {
                    return Err(RuntimeError::DuplicateOpcode {
                        opcode: opcode.to_string(),
                        first: existing.package.to_string(),
                        second: name.to_string(),
                    });
                }
                warn!(
                    opcode = *opcode,
                    replaced = existing.package,
                    by = name,
                    "opcode registered twice, keeping the later one"
                );
            }
        }

        let count = primitives.len();
        for (opcode, primitive) in primitives {
            self.entries.insert(
                opcode.to_string(),
                Entry {
                    primitive,
                    package: name,
                },
            );
        }
        debug!(package = name, count, "registered primitives");
        Ok(count)
    }

    pub fn get(&self, opcode: &str) -> Option<Rc<dyn Primitive>> {
        self.entries.get(opcode).map(|e| Rc::clone(&e.primitive))
    }

    pub fn contains(&self, opcode: &str) -> bool {
        self.entries.contains_key(opcode)
    }

    /// Name of the package that currently owns `opcode`.
    pub fn package_of(&self, opcode: &str) -> Option<&'static str> {
        self.entries.get(opcode).map(|e| e.package)
    }

    pub fn opcodes(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        name: &'static str,
        opcodes: &'static [&'static str],
    }

    impl PrimitivePackage for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn primitives(self: Rc<Self>) -> HashMap<&'static str, Rc<dyn Primitive>> {
            self.opcodes
                .iter()
                .map(|op| (*op, primitive(|_, _| Ok(()))))
                .collect()
        }
    }

    fn pkg(name: &'static str, opcodes: &'static [&'static str]) -> Rc<dyn PrimitivePackage> {
        Rc::new(Fixed { name, opcodes })
    }

    #[test]
    fn later_package_wins_collisions() {
        let mut table = PrimitiveTable::new();
        assert_eq!(table.register(pkg("a", &["x", "y"]), false).unwrap(), 2);
        assert_eq!(table.register(pkg("b", &["y"]), false).unwrap(), 1);
        assert_eq!(table.len(), 2);
        assert_eq!(table.package_of("x"), Some("a"));
        assert_eq!(table.package_of("y"), Some("b"));
    }

    #[test]
    fn strict_mode_rejects_collisions_without_partial_registration() {
        let mut table = PrimitiveTable::new();
        table.register(pkg("a", &["y"]), true).unwrap();
        let err = table.register(pkg("b", &["new", "y"]), true).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::DuplicateOpcode { ref opcode, .. } if opcode == "y"
        ));
        assert!(!table.contains("new"));
        assert_eq!(table.package_of("y"), Some("a"));
    }
}
