use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::block::{BlockId, SUBSTACK};
use crate::value::Value;

/// A block as carried by a `create` mutation or a program file.
/// Shadow blocks are nested inside the fields that own them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockRecord {
    pub id: BlockId,
    #[serde(default)]
    pub opcode: Option<String>,
    #[serde(default)]
    pub next: Option<BlockId>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldRecord {
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub block: Option<BlockId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shadows: Vec<BlockRecord>,
}

impl BlockRecord {
    pub fn new(id: impl Into<BlockId>, opcode: impl Into<String>) -> Self {
        BlockRecord {
            id: id.into(),
            opcode: Some(opcode.into()),
            next: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_next(mut self, next: impl Into<BlockId>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn with_value(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.entry(field.to_string()).or_default().value = Some(value.into());
        self
    }

    pub fn with_slot(mut self, field: &str, child: impl Into<BlockId>) -> Self {
        self.fields.entry(field.to_string()).or_default().block = Some(child.into());
        self
    }

    pub fn with_substack(self, child: impl Into<BlockId>) -> Self {
        self.with_slot(SUBSTACK, child)
    }

    pub fn with_shadow(mut self, field: &str, shadow: BlockRecord) -> Self {
        self.fields
            .entry(field.to_string())
            .or_default()
            .shadows
            .push(shadow);
        self
    }
}
