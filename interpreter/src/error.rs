use blocks::{BlockId, GraphError};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("opcode '{opcode}' is provided by both '{first}' and '{second}'")]
    DuplicateOpcode {
        opcode: String,
        first: String,
        second: String,
    },
    #[error("unknown stack '{0}'")]
    UnknownStack(BlockId),
    #[error("runtime has not been started")]
    NotStarted,
}

/// Failure inside a single primitive. Contained to the block that raised it.
#[derive(Debug, thiserror::Error)]
pub enum PrimitiveError {
    #[error("invalid argument {name}: {reason}")]
    InvalidArgument { name: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Custom(String),
}
