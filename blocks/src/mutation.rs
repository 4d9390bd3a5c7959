use serde::{Deserialize, Serialize};

use crate::block::BlockId;
use crate::block::record::BlockRecord;
use crate::value::Value;

/// A normalized edit to the block graph, as produced by an editor adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Mutation {
    Create {
        block: BlockRecord,
        /// Palette previews are stored but never become runnable stacks.
        #[serde(default)]
        ephemeral: bool,
    },
    Change {
        id: BlockId,
        name: String,
        value: Value,
    },
    Move(MoveEvent),
    Delete {
        id: BlockId,
    },
}

/// Re-parenting of a block. A missing `new_parent` makes the block a stack root;
/// a missing `new_input` attaches it to the parent's `next` connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveEvent {
    pub id: BlockId,
    #[serde(default)]
    pub old_parent: Option<BlockId>,
    #[serde(default)]
    pub old_input: Option<String>,
    #[serde(default)]
    pub new_parent: Option<BlockId>,
    #[serde(default)]
    pub new_input: Option<String>,
}

impl Mutation {
    pub fn block_id(&self) -> &str {
        match self {
            Mutation::Create { block, .. } => &block.id,
            Mutation::Change { id, .. } => id,
            Mutation::Move(event) => &event.id,
            Mutation::Delete { id } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::Create { .. } => "create",
            Mutation::Change { .. } => "change",
            Mutation::Move(_) => "move",
            Mutation::Delete { .. } => "delete",
        }
    }
}

impl MoveEvent {
    pub fn attach(id: impl Into<BlockId>, parent: impl Into<BlockId>) -> Self {
        MoveEvent {
            id: id.into(),
            new_parent: Some(parent.into()),
            ..Default::default()
        }
    }

    pub fn attach_to_input(
        id: impl Into<BlockId>,
        parent: impl Into<BlockId>,
        input: impl Into<String>,
    ) -> Self {
        MoveEvent {
            id: id.into(),
            new_parent: Some(parent.into()),
            new_input: Some(input.into()),
            ..Default::default()
        }
    }

    pub fn detach(id: impl Into<BlockId>, parent: impl Into<BlockId>) -> Self {
        MoveEvent {
            id: id.into(),
            old_parent: Some(parent.into()),
            ..Default::default()
        }
    }

    pub fn detach_from_input(
        id: impl Into<BlockId>,
        parent: impl Into<BlockId>,
        input: impl Into<String>,
    ) -> Self {
        MoveEvent {
            id: id.into(),
            old_parent: Some(parent.into()),
            old_input: Some(input.into()),
            ..Default::default()
        }
    }
}
