pub mod block;
pub mod graph;
pub mod mutation;
pub mod parser;
pub mod value;

pub use block::record::{BlockRecord, FieldRecord};
pub use block::{Block, BlockId, Field, SUBSTACK};
pub use graph::{BlockGraph, GraphError};
pub use mutation::{MoveEvent, Mutation};
pub use value::Value;

/// A loaded block program: the blocks it declares plus edits applied after them.
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// Declared blocks, with `next`/slot references between them.
    pub blocks: Vec<BlockRecord>,
    /// Mutations applied once the declared blocks are in place.
    pub mutations: Vec<Mutation>,
    /// The source file ID (for error reporting with codespan-reporting).
    pub source_id: usize,
}

impl Program {
    /// Flatten into the mutation sequence that builds this program: a
    /// `create` per block, a `move` per parent/child link, then the explicit
    /// mutations in order.
    pub fn to_mutations(&self) -> Vec<Mutation> {
        let mut out: Vec<Mutation> = self
            .blocks
            .iter()
            .map(|block| Mutation::Create {
                block: block.clone(),
                ephemeral: false,
            })
            .collect();

        for block in &self.blocks {
            if let Some(next) = &block.next {
                out.push(Mutation::Move(MoveEvent::attach(next.clone(), block.id.clone())));
            }
            for (name, field) in &block.fields {
                if let Some(child) = &field.block {
                    out.push(Mutation::Move(MoveEvent::attach_to_input(
                        child.clone(),
                        block.id.clone(),
                        name.clone(),
                    )));
                }
            }
        }

        out.extend(self.mutations.iter().cloned());
        out
    }
}
