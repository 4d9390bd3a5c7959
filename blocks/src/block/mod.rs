pub mod record;

use std::collections::BTreeMap;

use crate::value::Value;

/// Identifier of a block within a `BlockGraph`.
pub type BlockId = String;

/// Field holding the first block of a control block's nested body.
pub const SUBSTACK: &str = "SUBSTACK";

/// A node of the program graph.
/// Blocks are owned by the graph and refer to each other only by id.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: BlockId,
    /// Key into the primitive table. `None` while the block is still being built.
    pub opcode: Option<String>,
    /// The block that follows this one in its stack.
    pub next: Option<BlockId>,
    pub fields: BTreeMap<String, Field>,
}

/// A named input on a block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Field {
    pub name: String,
    /// Literal typed into the field.
    pub value: Option<Value>,
    /// Block plugged into this slot, e.g. the body referenced by `SUBSTACK`.
    pub block: Option<BlockId>,
    /// Inline editor blocks owned by this field, by id.
    pub shadows: Vec<BlockId>,
}

impl Block {
    pub fn opcode(&self) -> Option<&str> {
        self.opcode.as_deref()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn field_value(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).and_then(|f| f.value.as_ref())
    }

    /// Id of the first block plugged into the named slot.
    pub fn slot(&self, name: &str) -> Option<&BlockId> {
        self.fields.get(name).and_then(|f| f.block.as_ref())
    }

    /// Ids of every block this one structurally owns: the next block, slot
    /// bodies, and shadow blocks.
    pub fn owned_ids(&self) -> Vec<BlockId> {
        let mut ids = Vec::new();
        if let Some(next) = &self.next {
            ids.push(next.clone());
        }
        for field in self.fields.values() {
            if let Some(child) = &field.block {
                ids.push(child.clone());
            }
            ids.extend(field.shadows.iter().cloned());
        }
        ids
    }
}
