use crate::block::BlockId;

/// Structural errors raised by the mutation entry points.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("block '{0}' already exists")]
    DuplicateBlock(BlockId),
    #[error("unknown block '{0}'")]
    UnknownBlock(BlockId),
    #[error("unknown parent block '{parent}' for '{id}'")]
    UnknownParent { id: BlockId, parent: BlockId },
}
