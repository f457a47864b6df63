//! Error kinds. A `FormatError` is fatal to the whole parse and never exposes a partial
//! graph; a `DecodeError` is fatal to the code block being decoded. An unrecognized
//! instruction is deliberately *not* an error — see `Instruction::Unrecognized`.

use thiserror::Error;

use crate::bytecode::{ProgramCounter, Word};

/// Malformed pickle. Every variant carries the byte offset at which the stream stopped
/// making sense.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
  #[error("truncated pickle at offset {offset}")]
  Truncated { offset: usize },

  #[error("invalid node count {count}")]
  InvalidNodeCount { count: i32 },

  #[error("invalid utf-8 in string at offset {offset}")]
  BadString { offset: usize },

  #[error("invalid numeric literal `{text}` at offset {offset}")]
  BadNumber { text: String, offset: usize },

  #[error("unknown type tag {tag} at offset {offset}")]
  UnknownTypeTag { tag: u8, offset: usize },

  #[error("reference to node {index} out of range 1..={count} at offset {offset}")]
  ReferenceOutOfRange { index: i32, count: usize, offset: usize },

  #[error("node {index} declared but never defined")]
  MissingNode { index: usize },

  #[error("record label at node {index} is not an arity")]
  NotAnArity { index: usize },

  #[error("record arity mismatch: {features} features vs {values} values")]
  RecordArityMismatch { features: usize, values: usize },
}

/// Format inconsistency inside a code block: an opcode at or below the highest
/// recognized value with no decode rule, or a malformed struct-construction sub-opcode.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
  #[error("unhandled opcode {opcode:#06x} at pc {pc}")]
  UnknownOpcode { opcode: Word, pc: ProgramCounter },

  #[error("unknown sub-opcode {sub_opcode} in struct construction at pc {pc}")]
  BadSubOpcode { sub_opcode: Word, pc: ProgramCounter },
}
