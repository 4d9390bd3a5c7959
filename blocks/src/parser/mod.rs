pub mod error;

use std::collections::HashMap;
use std::ops::Range;

use serde::Deserialize;
use toml::Spanned;

pub use error::ParseError;

use crate::Program;
use crate::block::record::BlockRecord;
use crate::mutation::Mutation;

/// On-disk shape of a program. Unknown top-level tables are ignored so that
/// test files can carry their own expectations alongside the program.
#[derive(Deserialize)]
struct ProgramFile {
    #[serde(default)]
    blocks: Vec<Spanned<BlockRecord>>,
    #[serde(default)]
    mutations: Vec<Spanned<Mutation>>,
}

/// Parser entry point.
pub struct Parser {
    source: String,
    file_id: usize,
}

impl Parser {
    pub fn new(source: String, file_id: usize) -> Self {
        Parser { source, file_id }
    }

    /// Parse the TOML source into a checked Program.
    pub fn parse(&self) -> Result<Program, Vec<ParseError>> {
        let file: ProgramFile = toml::from_str(&self.source)
            .map_err(|e| vec![ParseError::from_toml(&e, self.file_id)])?;

        let errors = check_references(&file.blocks, self.file_id);
        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(Program {
            blocks: file.blocks.into_iter().map(Spanned::into_inner).collect(),
            mutations: file.mutations.into_iter().map(Spanned::into_inner).collect(),
            source_id: self.file_id,
        })
    }
}

/// Every id must be unique, every `next`/slot reference must name a listed
/// block, and no block may have two parents.
fn check_references(blocks: &[Spanned<BlockRecord>], file_id: usize) -> Vec<ParseError> {
    let mut errors = Vec::new();
    let mut declared: HashMap<&str, Range<usize>> = HashMap::new();

    for block in blocks {
        let span = block.span();
        let mut ids = Vec::new();
        collect_ids(block.get_ref(), &mut ids);
        for id in ids {
            if let Some(first) = declared.get(id) {
                errors.push(
                    ParseError::new(format!("duplicate block id '{}'", id), span.clone(), file_id)
                        .with_note(format!("first declared at bytes {}..{}", first.start, first.end)),
                );
            } else {
                declared.insert(id, span.clone());
            }
        }
    }

    let mut parents: HashMap<&str, &str> = HashMap::new();
    for block in blocks {
        let record = block.get_ref();
        let children = record
            .next
            .iter()
            .chain(record.fields.values().filter_map(|f| f.block.as_ref()));
        for child in children {
            if !declared.contains_key(child.as_str()) {
                errors.push(ParseError::new(
                    format!("block '{}' refers to unknown block '{}'", record.id, child),
                    block.span(),
                    file_id,
                ));
            } else if let Some(other) = parents.insert(child.as_str(), record.id.as_str()) {
                errors.push(
                    ParseError::new(
                        format!("block '{}' is attached to both '{}' and '{}'", child, other, record.id),
                        block.span(),
                        file_id,
                    )
                    .with_note("a block has at most one parent"),
                );
            }
        }
    }

    errors
}

fn collect_ids<'a>(record: &'a BlockRecord, out: &mut Vec<&'a str>) {
    out.push(&record.id);
    for field in record.fields.values() {
        for shadow in &field.shadows {
            collect_ids(shadow, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::MoveEvent;
    use crate::value::Value;

    const LOOP: &str = r#"
[[blocks]]
id = "flag"
opcode = "event_whenflagclicked"
next = "loop"

[[blocks]]
id = "loop"
opcode = "control_repeat"
fields.TIMES = { shadows = [{ id = "n", opcode = "math_number", fields.NUM = { value = 2 } }] }
fields.SUBSTACK = { block = "say" }

[[blocks]]
id = "say"
opcode = "looks_say"
fields.MESSAGE = { value = "hi" }

[[mutations]]
type = "change"
id = "say"
name = "MESSAGE"
value = "hello"
"#;

    fn parse(source: &str) -> Result<Program, Vec<ParseError>> {
        Parser::new(source.to_string(), 0).parse()
    }

    #[test]
    fn parses_blocks_and_mutations() {
        let program = parse(LOOP).expect("parse failed");
        assert_eq!(program.blocks.len(), 3);
        assert_eq!(program.blocks[1].fields["TIMES"].shadows[0].id, "n");
        assert_eq!(
            program.mutations,
            vec![Mutation::Change {
                id: "say".into(),
                name: "MESSAGE".into(),
                value: Value::Text("hello".into()),
            }]
        );
    }

    #[test]
    fn program_attaches_children_after_creating_them() {
        let program = parse(LOOP).unwrap();
        let mutations = program.to_mutations();
        assert_eq!(mutations.iter().filter(|m| m.kind() == "create").count(), 3);
        assert!(mutations.contains(&Mutation::Move(MoveEvent::attach("loop", "flag"))));
        assert!(mutations.contains(&Mutation::Move(MoveEvent::attach_to_input(
            "say", "loop", "SUBSTACK"
        ))));
        assert_eq!(mutations.last().map(Mutation::kind), Some("change"));
    }

    #[test]
    fn unsupported_value_types_fail_to_load() {
        let errs = parse("[[blocks]]\nid = \"x\"\nfields.A = { value = [1, 2] }\n").unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("Value"), "{}", errs[0].message);
    }

    #[test]
    fn dangling_references_are_reported() {
        let errs = parse("[[blocks]]\nid = \"x\"\nnext = \"ghost\"\n").unwrap_err();
        assert!(errs[0].message.contains("unknown block 'ghost'"));
    }

    #[test]
    fn duplicate_ids_are_reported() {
        let src = "[[blocks]]\nid = \"x\"\n\n[[blocks]]\nid = \"y\"\nfields.F = { shadows = [{ id = \"x\" }] }\n";
        let errs = parse(src).unwrap_err();
        assert!(errs[0].message.contains("duplicate block id 'x'"));
        assert_eq!(errs[0].notes.len(), 1);
    }

    #[test]
    fn two_parents_are_reported() {
        let src = "[[blocks]]\nid = \"a\"\nnext = \"c\"\n\n[[blocks]]\nid = \"b\"\nnext = \"c\"\n\n[[blocks]]\nid = \"c\"\n";
        let errs = parse(src).unwrap_err();
        assert!(errs[0].message.contains("attached to both"));
    }
}
