pub mod error;

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, trace};

use crate::block::record::BlockRecord;
use crate::block::{Block, BlockId, Field, SUBSTACK};
use crate::mutation::{MoveEvent, Mutation};
use crate::value::Value;

pub use error::GraphError;

/// The mutable program graph: every block by id, plus the ordered stack roots.
#[derive(Debug, Default)]
pub struct BlockGraph {
    blocks: HashMap<BlockId, Block>,
    /// Ids of top-level blocks, in creation order. Each appears at most once.
    stacks: Vec<BlockId>,
}

impl BlockGraph {
    pub fn new() -> Self {
        BlockGraph::default()
    }

    // --- Mutations ---

    /// Route a mutation record to the matching entry point. Returns the ids a
    /// `delete` removed, so callers can drop anything that still refers to
    /// them; other mutations remove nothing.
    pub fn apply(&mut self, mutation: Mutation) -> Result<Vec<BlockId>, GraphError> {
        match mutation {
            Mutation::Create { block, ephemeral } => self.create_block(block, ephemeral)?,
            Mutation::Change { id, name, value } => self.change_block_field(&id, &name, value),
            Mutation::Move(event) => self.move_block(&event)?,
            Mutation::Delete { id } => return Ok(self.delete_block(&id)),
        }
        Ok(Vec::new())
    }

    /// Insert a block and its nested shadow blocks. Unless `ephemeral`, the
    /// block becomes a stack root.
    pub fn create_block(&mut self, record: BlockRecord, ephemeral: bool) -> Result<(), GraphError> {
        let mut seen = HashSet::new();
        check_new_ids(&record, &self.blocks, &mut seen)?;

        let id = record.id.clone();
        self.insert_record(record);
        if !ephemeral {
            self.add_stack(&id);
        }
        trace!(block = %id, ephemeral, "created block");
        Ok(())
    }

    fn insert_record(&mut self, record: BlockRecord) {
        let mut fields = BTreeMap::new();
        for (name, field) in record.fields {
            let mut shadows = Vec::with_capacity(field.shadows.len());
            for shadow in field.shadows {
                shadows.push(shadow.id.clone());
                self.insert_record(shadow);
            }
            fields.insert(
                name.clone(),
                Field {
                    name,
                    value: field.value,
                    block: field.block,
                    shadows,
                },
            );
        }
        self.blocks.insert(
            record.id.clone(),
            Block {
                id: record.id,
                opcode: record.opcode,
                next: record.next,
                fields,
            },
        );
    }

    /// Overwrite a field's literal. Unknown blocks and fields are ignored.
    pub fn change_block_field(&mut self, id: &str, field_name: &str, value: Value) {
        let Some(field) = self
            .blocks
            .get_mut(id)
            .and_then(|b| b.fields.get_mut(field_name))
        else {
            debug!(block = id, field = field_name, "ignoring change to unknown field");
            return;
        };
        field.value = Some(value);
    }

    /// Re-parent a block.
    pub fn move_block(&mut self, event: &MoveEvent) -> Result<(), GraphError> {
        if !self.blocks.contains_key(&event.id) {
            return Err(GraphError::UnknownBlock(event.id.clone()));
        }
        if let Some(parent) = &event.new_parent {
            if !self.blocks.contains_key(parent) {
                return Err(GraphError::UnknownParent {
                    id: event.id.clone(),
                    parent: parent.clone(),
                });
            }
        }

        // Disconnect from the old parent, if it still exists.
        if let Some(old) = event.old_parent.as_ref().and_then(|p| self.blocks.get_mut(p)) {
            let in_slot = event
                .old_input
                .as_ref()
                .and_then(|input| old.fields.get_mut(input))
                .filter(|f| f.block.as_deref() == Some(event.id.as_str()));
            if let Some(field) = in_slot {
                field.block = None;
            } else if old.next.as_deref() == Some(event.id.as_str()) {
                old.next = None;
            }
        }

        match &event.new_parent {
            None => self.add_stack(&event.id),
            Some(parent_id) => {
                self.delete_stack(&event.id);
                let Some(parent) = self.blocks.get_mut(parent_id) else {
                    return Err(GraphError::UnknownParent {
                        id: event.id.clone(),
                        parent: parent_id.clone(),
                    });
                };
                match &event.new_input {
                    Some(input) => {
                        parent
                            .fields
                            .entry(input.clone())
                            .or_insert_with(|| Field {
                                name: input.clone(),
                                ..Default::default()
                            })
                            .block = Some(event.id.clone());
                    }
                    None => parent.next = Some(event.id.clone()),
                }
            }
        }
        trace!(block = %event.id, parent = ?event.new_parent, "moved block");
        Ok(())
    }

    /// Remove a block together with its next-chain, slot bodies, and shadow
    /// blocks. Returns every id removed; deleting an absent id removes nothing.
    pub fn delete_block(&mut self, id: &str) -> Vec<BlockId> {
        let mut removed = Vec::new();
        self.delete_into(id, &mut removed);
        if !removed.is_empty() {
            debug!(block = id, count = removed.len(), "deleted blocks");
        }
        removed
    }

    fn delete_into(&mut self, id: &str, removed: &mut Vec<BlockId>) {
        // Removing first keeps a malformed cycle from recursing forever.
        let Some(block) = self.blocks.remove(id) else {
            return;
        };
        self.delete_stack(id);
        removed.push(block.id.clone());
        for child in block.owned_ids() {
            self.delete_into(&child, removed);
        }
    }

    fn add_stack(&mut self, id: &str) {
        if !self.stacks.iter().any(|s| s == id) {
            self.stacks.push(id.to_string());
        }
    }

    fn delete_stack(&mut self, id: &str) {
        self.stacks.retain(|s| s != id);
    }

    // --- Traversal ---

    pub fn get(&self, id: &str) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.blocks.contains_key(id)
    }

    pub fn stacks(&self) -> &[BlockId] {
        &self.stacks
    }

    pub fn is_stack(&self, id: &str) -> bool {
        self.stacks.iter().any(|s| s == id)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The block after `id`, if both exist.
    pub fn next(&self, id: &str) -> Option<&BlockId> {
        self.blocks
            .get(id)
            .and_then(|b| b.next.as_ref())
            .filter(|next| self.blocks.contains_key(next.as_str()))
    }

    /// First block of `id`'s `SUBSTACK` body, if both exist.
    pub fn substack(&self, id: &str) -> Option<&BlockId> {
        self.slot(id, SUBSTACK)
    }

    /// First block plugged into the named slot of `id`, if both exist.
    pub fn slot(&self, id: &str, name: &str) -> Option<&BlockId> {
        self.blocks
            .get(id)
            .and_then(|b| b.slot(name))
            .filter(|child| self.blocks.contains_key(child.as_str()))
    }

    pub fn opcode(&self, id: &str) -> Option<&str> {
        self.blocks.get(id).and_then(|b| b.opcode())
    }

    /// Field values of `id` as a primitive sees them: each field's literal,
    /// or else the first literal on its first shadow block. Slot-only fields
    /// have no value and are left out.
    pub fn field_values(&self, id: &str) -> BTreeMap<String, Value> {
        let mut values = BTreeMap::new();
        let Some(block) = self.blocks.get(id) else {
            return values;
        };
        for (name, field) in &block.fields {
            let value = field.value.clone().or_else(|| {
                field
                    .shadows
                    .first()
                    .and_then(|s| self.blocks.get(s))
                    .and_then(|shadow| shadow.fields.values().find_map(|f| f.value.clone()))
            });
            if let Some(value) = value {
                values.insert(name.clone(), value);
            }
        }
        values
    }
}

fn check_new_ids(
    record: &BlockRecord,
    existing: &HashMap<BlockId, Block>,
    seen: &mut HashSet<BlockId>,
) -> Result<(), GraphError> {
    if existing.contains_key(&record.id) || !seen.insert(record.id.clone()) {
        return Err(GraphError::DuplicateBlock(record.id.clone()));
    }
    for field in record.fields.values() {
        for shadow in &field.shadows {
            check_new_ids(shadow, existing, seen)?;
        }
    }
    Ok(())
}
