/*!
  The bytecode decoder. Decoding is a pure function of the word array, the code area's
  resolved constant pool, and the graph the pool points into; `InstructionIter` walks
  the array front to back, yielding `(pc, Instruction)` pairs that cover it exactly
  once, with no gaps and no overlaps.

  Failure comes in two strengths. An opcode at or below `MAX_OPCODE` that matches no
  rule, and a struct-construction sub-opcode outside {0..=3, 6}, are hard
  `DecodeError`s. Everything else that goes wrong mid-instruction — an operand read
  past the end of the array, a constant-pool index out of range, a malformed
  pattern-match table — demotes to a terminal `Unrecognized` instruction carrying the
  raw remaining words, as does any opcode above `MAX_OPCODE`. That keeps disassembly
  useful on code emitted with instruction-set extensions this decoder predates.
*/

use std::convert::TryFrom;

use crate::error::DecodeError;
use crate::term::{Graph, Term, TermRef};

use super::instruction::{ArithOp, Instruction, Operand, Register, RegisterClass};
use super::opcode::{is_create_struct, Opcode, MAX_OPCODE};
use super::{ProgramCounter, Word};

/// How an operand word is interpreted: three register classes, or a constant-pool
/// index resolved at decode time. Mirrors the sub-opcode numbering 0..=3.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum OperandKind {
  X, // argument/temp register
  Y, // local register
  G, // global/closure register
  K, // constant pool
}

enum Failure {
  /// Format inconsistency; aborts decoding of the code block.
  Hard(DecodeError),
  /// Internal inconsistency while decoding a recognized shape; demotes to a terminal
  /// `Unrecognized` instruction.
  Soft,
}

/// (additional words consumed beyond the opcode word, decoded instruction)
type Step = Result<(usize, Instruction), Failure>;

/// Lazily decodes a code area. Restartable: construct a new iterator over the same
/// inputs to decode again. After an `Unrecognized` instruction or an error, the
/// iterator is exhausted.
pub struct InstructionIter<'a> {
  graph: &'a Graph,
  words: &'a [Word],
  pool: &'a [TermRef],
  pc: ProgramCounter,
  done: bool,
}

impl<'a> InstructionIter<'a> {
  pub fn new(graph: &'a Graph, words: &'a [Word], pool: &'a [TermRef]) -> InstructionIter<'a> {
    InstructionIter {
      graph,
      words,
      pool,
      pc: 0,
      done: false
    }
  }
}

impl<'a> Iterator for InstructionIter<'a> {
  type Item = Result<(ProgramCounter, Instruction), DecodeError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.done || self.pc >= self.words.len() {
      return None;
    }

    let decoder = Decoder {
      graph: self.graph,
      words: self.words,
      pool: self.pool,
      pc: self.pc
    };

    match decoder.step() {
      Ok((extra, instruction)) => {
        let at = self.pc;
        self.pc += 1 + extra;
        Some(Ok((at, instruction)))
      }
      Err(Failure::Soft) => {
        self.done = true;
        let words = self.words[self.pc..].to_vec();
        Some(Ok((self.pc, Instruction::Unrecognized { words })))
      }
      Err(Failure::Hard(error)) => {
        self.done = true;
        Some(Err(error))
      }
    }
  }
}

/// One decode step, positioned at `pc`. All reads are bounds-checked; nothing here
/// mutates anything.
struct Decoder<'a> {
  graph: &'a Graph,
  words: &'a [Word],
  pool: &'a [TermRef],
  pc: ProgramCounter,
}

impl<'a> Decoder<'a> {
  // region Operand readers

  /// The operand word `delta` words past the opcode.
  fn word(&self, delta: usize) -> Result<Word, Failure> {
    self.words.get(self.pc + delta).copied().ok_or(Failure::Soft)
  }

  fn pool(&self, index: usize) -> Result<TermRef, Failure> {
    self.pool.get(index).copied().ok_or(Failure::Soft)
  }

  fn operand(&self, kind: OperandKind, delta: usize) -> Result<Operand, Failure> {
    let value = self.word(delta)?;
    let operand = match kind {
      OperandKind::X => Operand::Register(Register::argument(value)),
      OperandKind::Y => Operand::Register(Register::local(value)),
      OperandKind::G => {
        Operand::Register(Register { class: RegisterClass::Global, index: value })
      }
      OperandKind::K => Operand::Constant(self.pool(value as usize)?),
    };
    Ok(operand)
  }

  /// A branch target computed from a signed offset; targets cannot precede the
  /// start of the code.
  fn target(&self, base: i64, offset: i64) -> Result<ProgramCounter, Failure> {
    let target = base + offset;
    if target < 0 {
      return Err(Failure::Soft);
    }
    Ok(target as ProgramCounter)
  }

  // endregion

  // region Instruction shapes

  fn mov(&self, source: OperandKind, target: OperandKind, unify: bool) -> Step {
    Ok((2, Instruction::Move {
      source: self.operand(source, 1)?,
      target: self.operand(target, 2)?,
      unify
    }))
  }

  fn mov_mov(
    &self,
    s1: OperandKind,
    t1: OperandKind,
    s2: OperandKind,
    t2: OperandKind,
  ) -> Step {
    Ok((4, Instruction::MoveMove {
      first: (self.operand(s1, 1)?, self.operand(t1, 2)?),
      second: (self.operand(s2, 3)?, self.operand(t2, 4)?)
    }))
  }

  /// Call with `count` argument registers named inline after the function operand.
  fn call_inline(&self, count: usize) -> Step {
    let function = self.operand(OperandKind::K, 1)?;
    let mut args = Vec::with_capacity(count);
    for slot in 0..count {
      args.push(self.operand(OperandKind::X, 2 + slot)?);
    }
    Ok((1 + count, Instruction::Call { function, args, tail: false }))
  }

  fn call_builtin(&self) -> Step {
    let function = self.operand(OperandKind::K, 1)?;
    let count = self.word(2)? as usize;
    let mut args = Vec::with_capacity(count);
    for slot in 0..count {
      args.push(self.operand(OperandKind::X, 3 + slot)?);
    }
    Ok((2 + count, Instruction::Call { function, args, tail: false }))
  }

  /// General call: the count word sizes a synthesized X0..X(count-1) argument list.
  fn call(&self, kind: OperandKind, tail: bool) -> Step {
    let function = self.operand(kind, 1)?;
    let count = self.word(2)? as usize;
    let args = (0..count)
      .map(|index| Operand::Register(Register::argument(index as Word)))
      .collect();
    Ok((2, Instruction::Call { function, args, tail }))
  }

  /// Message send: a one-argument call whose argument is a freshly built, already
  /// normalized record. The word at offset 2 is both the constant-pool index of the
  /// message arity and the positional argument count; offset 3 belongs to the
  /// instruction but is not interpreted.
  fn send_msg(&self, kind: OperandKind, tail: bool) -> Step {
    let function = self.operand(kind, 1)?;
    let selector = self.word(2)? as usize;
    let arity = self.pool(selector)?;

    let (label, features) = match &self.graph[arity] {
      Term::Arity { label, features } => (*label, features),
      _ => return Err(Failure::Soft)
    };
    let fields = features
      .iter()
      .copied()
      .zip((0..selector).map(|index| Operand::Register(Register::argument(index as Word))))
      .collect();

    let message = Operand::Record { label, fields };
    Ok((3, Instruction::Call { function, args: vec![message], tail }))
  }

  /// Two-way branch. The offset words are unsigned; the opcode variant supplies the
  /// signs applied to the false-branch and else-branch offsets.
  fn cond_branch(&self, false_sign: i64, else_sign: i64) -> Step {
    let base = (self.pc + 4) as i64;
    let false_offset = self.word(2)? as i64 * false_sign;
    let else_offset = self.word(3)? as i64 * else_sign;
    Ok((3, Instruction::CondBranch {
      test: self.operand(OperandKind::X, 1)?,
      arms: vec![
        (Operand::Bool(true), self.target(base, 0)?),
        (Operand::Bool(false), self.target(base, false_offset)?),
      ],
      else_target: Some(self.target(base, else_offset)?)
    }))
  }

  fn equals_integer(&self) -> Step {
    let base = (self.pc + 4) as i64;
    let literal = self.word(2)? as i64;
    let else_offset = self.word(3)? as i64;
    Ok((3, Instruction::CondBranch {
      test: self.operand(OperandKind::X, 1)?,
      arms: vec![(Operand::Immediate(literal), self.target(base, 0)?)],
      else_target: Some(self.target(base, else_offset)?)
    }))
  }

  /// Multi-way pattern branch. The pool constant is a tuple of two-item tuples, each
  /// pairing a pattern with a relative offset; each target is `pc + 3 + offset`.
  fn pattern_match(&self, kind: OperandKind) -> Step {
    let test = self.operand(kind, 1)?;
    let table = self.pool(self.word(2)? as usize)?;

    let entries = match &self.graph[table] {
      Term::Tuple { items, .. } => items,
      _ => return Err(Failure::Soft)
    };

    let mut arms = Vec::with_capacity(entries.len());
    for entry in entries {
      let pair = match &self.graph[*entry] {
        Term::Tuple { items, .. } if items.len() == 2 => items,
        _ => return Err(Failure::Soft)
      };
      let offset = match &self.graph[pair[1]] {
        Term::Int(offset) => *offset,
        _ => return Err(Failure::Soft)
      };
      let target = self.target(self.pc as i64 + 3, offset)?;
      arms.push((Operand::Constant(pair[0]), target));
    }

    Ok((2, Instruction::CondBranch { test, arms, else_target: None }))
  }

  fn inline_arith(&self, op: ArithOp) -> Step {
    Ok((3, Instruction::InlineBinaryArith {
      lhs: self.operand(OperandKind::X, 1)?,
      op,
      rhs: self.operand(OperandKind::X, 2)?,
      target: self.operand(OperandKind::X, 3)?
    }))
  }

  fn inline_step(&self, op: ArithOp) -> Step {
    Ok((2, Instruction::InlineBinaryArith {
      lhs: self.operand(OperandKind::X, 1)?,
      op,
      rhs: Operand::Immediate(1),
      target: self.operand(OperandKind::X, 2)?
    }))
  }

  // endregion

  // region Struct construction

  /**
    The variable-length struct-construction family, `0x60..=0x7F`. The low two bits
    select what is built (abstraction, cons, tuple, record), the next three bits select
    the destination: six (class, is-unify) combinations; selectors 6 and 7 have no
    decode rule. Elements come from a 2-word sub-stream starting four words past the
    opcode: sub-opcodes 0..=3 read one operand of the corresponding class, sub-opcode 6
    expands its payload word into that many wildcard placeholders.
  */
  fn create_struct(&self, opcode: u8) -> Step {
    const ELEMENT_KINDS: [OperandKind; 4] =
      [OperandKind::X, OperandKind::Y, OperandKind::G, OperandKind::K];

    let (target_kind, unify) = match (opcode >> 2) & 0x07 {
      0 => (OperandKind::X, false),
      1 => (OperandKind::Y, false),
      2 => (OperandKind::X, true),
      3 => (OperandKind::Y, true),
      4 => (OperandKind::G, true),
      5 => (OperandKind::K, true),
      _ => {
        return Err(Failure::Hard(DecodeError::UnknownOpcode {
          opcode: opcode as Word,
          pc: self.pc
        }));
      }
    };
    let target = self.operand(target_kind, 3)?;

    let length = self.word(2)? as usize;
    let mut elements: Vec<Operand> = Vec::new();
    let mut collected = 0usize;
    let mut delta = 4usize;

    while collected < length {
      let sub_opcode = self.word(delta)?;
      match sub_opcode {
        0..=3 => {
          elements.push(self.operand(ELEMENT_KINDS[sub_opcode as usize], delta + 1)?);
          collected += 1;
        }
        6 => {
          let count = self.word(delta + 1)? as usize;
          if count == 0 {
            // Would never make progress toward the element count.
            return Err(Failure::Soft);
          }
          for _ in 0..count {
            elements.push(Operand::Wildcard);
          }
          collected += count;
        }
        _ => {
          return Err(Failure::Hard(DecodeError::BadSubOpcode {
            sub_opcode,
            pc: self.pc + delta
          }));
        }
      }
      delta += 2;
    }

    let source = match opcode & 0x03 {
      // Abstraction: pool code area plus the captured environment.
      0 => {
        let code_area = self.pool(self.word(1)? as usize)?;
        Operand::Closure { code_area, captures: elements }
      }

      // Cons cell: exactly the two collected elements.
      1 => {
        let mut pair = elements.drain(..);
        match (pair.next(), pair.next(), pair.next()) {
          (Some(head), Some(tail), None) => {
            Operand::Cons { head: Box::new(head), tail: Box::new(tail) }
          }
          _ => return Err(Failure::Soft)
        }
      }

      // Tuple: pool label plus the elements.
      2 => {
        let label = self.pool(self.word(1)? as usize)?;
        Operand::Tuple { label, items: elements }
      }

      // Record: the pool operand is an arity; normalize against it.
      _ => {
        let arity = self.pool(self.word(1)? as usize)?;
        let (label, features) = match &self.graph[arity] {
          Term::Arity { label, features } => (*label, features),
          _ => return Err(Failure::Soft)
        };
        let fields = features.iter().copied().zip(elements.into_iter()).collect();
        Operand::Record { label, fields }
      }
    };

    Ok((delta - 1, Instruction::Move { source, target, unify }))
  }

  // endregion

  fn step(&self) -> Step {
    use OperandKind::*;

    let word = self.words[self.pc];
    if word > MAX_OPCODE as Word {
      return Err(Failure::Soft);
    }
    let byte = word as u8;

    if is_create_struct(byte) {
      return self.create_struct(byte);
    }

    let opcode = Opcode::try_from(byte).map_err(|_| {
      Failure::Hard(DecodeError::UnknownOpcode { opcode: word, pc: self.pc })
    })?;

    match opcode {
      Opcode::Skip => Ok((0, Instruction::Skip)),

      Opcode::MoveXX => self.mov(X, X, false),
      Opcode::MoveXY => self.mov(X, Y, false),
      Opcode::MoveYX => self.mov(Y, X, false),
      Opcode::MoveYY => self.mov(Y, Y, false),
      Opcode::MoveGX => self.mov(G, X, false),
      Opcode::MoveGY => self.mov(G, Y, false),
      Opcode::MoveKX => self.mov(K, X, false),
      Opcode::MoveKY => self.mov(K, Y, false),

      Opcode::MoveMoveXYXY => self.mov_mov(X, Y, X, Y),
      Opcode::MoveMoveYXYX => self.mov_mov(Y, X, Y, X),
      Opcode::MoveMoveYXXY => self.mov_mov(Y, X, X, Y),
      Opcode::MoveMoveXYYX => self.mov_mov(X, Y, Y, X),

      Opcode::AllocateY => {
        let count = self.word(1)? as usize;
        let locals = (0..count).map(|index| Register::local(index as Word)).collect();
        Ok((1, Instruction::Allocate { locals }))
      }

      Opcode::CreateVarX => {
        Ok((1, Instruction::CreateVariable { target: self.operand(X, 1)? }))
      }
      Opcode::CreateVarY => {
        Ok((1, Instruction::CreateVariable { target: self.operand(Y, 1)? }))
      }
      Opcode::CreateVarMoveX => Ok((2, Instruction::CreateVariableMove {
        target: self.operand(X, 1)?,
        copy: self.operand(X, 2)?
      })),
      Opcode::CreateVarMoveY => Ok((2, Instruction::CreateVariableMove {
        target: self.operand(Y, 1)?,
        copy: self.operand(X, 2)?
      })),

      Opcode::SetupExceptionHandler => Ok((0, Instruction::SetupExceptionHandler)),
      Opcode::PopExceptionHandler => Ok((0, Instruction::PopExceptionHandler)),

      Opcode::CallK0 => self.call_inline(0),
      Opcode::CallK1 => self.call_inline(1),
      Opcode::CallK2 => self.call_inline(2),
      Opcode::CallK3 => self.call_inline(3),
      Opcode::CallK4 => self.call_inline(4),
      Opcode::CallK5 => self.call_inline(5),
      Opcode::CallBuiltin => self.call_builtin(),

      Opcode::CallX => self.call(X, false),
      Opcode::CallY => self.call(Y, false),
      Opcode::CallG => self.call(G, false),
      Opcode::CallK => self.call(K, false),
      Opcode::TailCallX => self.call(X, true),
      Opcode::TailCallY => self.call(Y, true),
      Opcode::TailCallG => self.call(G, true),
      Opcode::TailCallK => self.call(K, true),

      Opcode::SendMsgX => self.send_msg(X, false),
      Opcode::SendMsgY => self.send_msg(Y, false),
      Opcode::SendMsgG => self.send_msg(G, false),
      Opcode::SendMsgK => self.send_msg(K, false),
      Opcode::TailSendMsgX => self.send_msg(X, true),
      Opcode::TailSendMsgY => self.send_msg(Y, true),
      Opcode::TailSendMsgG => self.send_msg(G, true),
      Opcode::TailSendMsgK => self.send_msg(K, true),

      Opcode::Return => Ok((0, Instruction::Return)),

      Opcode::BranchForward => {
        let offset = self.word(1)? as i64;
        Ok((1, Instruction::Branch { target: self.target(self.pc as i64 + 2, offset)? }))
      }
      Opcode::BranchBackward => {
        let offset = self.word(1)? as i64;
        Ok((1, Instruction::Branch { target: self.target(self.pc as i64 + 2, -offset)? }))
      }

      Opcode::CondBranchPP => self.cond_branch(1, 1),
      Opcode::CondBranchPM => self.cond_branch(1, -1),
      Opcode::CondBranchMP => self.cond_branch(-1, 1),
      Opcode::CondBranchMM => self.cond_branch(-1, -1),

      Opcode::PatternMatchX => self.pattern_match(X),
      Opcode::PatternMatchY => self.pattern_match(Y),
      Opcode::PatternMatchG => self.pattern_match(G),

      Opcode::UnifyXX => self.mov(X, X, true),
      Opcode::UnifyXY => self.mov(X, Y, true),
      Opcode::UnifyXG => self.mov(X, G, true),
      Opcode::UnifyXK => self.mov(X, K, true),
      Opcode::UnifyYY => self.mov(Y, Y, true),
      Opcode::UnifyYG => self.mov(Y, G, true),
      Opcode::UnifyYK => self.mov(Y, K, true),
      Opcode::UnifyGG => self.mov(G, G, true),
      Opcode::UnifyGK => self.mov(G, K, true),
      Opcode::UnifyKK => self.mov(K, K, true),

      Opcode::EqualsInteger => self.equals_integer(),
      Opcode::InlineAdd => self.inline_arith(ArithOp::Add),
      Opcode::InlineSubtract => self.inline_arith(ArithOp::Subtract),
      Opcode::InlineIncrement => self.inline_step(ArithOp::Add),
      Opcode::InlineDecrement => self.inline_step(ArithOp::Subtract),

      Opcode::InlineGetClass => Ok((2, Instruction::InlineGetClass {
        source: self.operand(X, 1)?,
        target: self.operand(X, 2)?
      })),
    }
  }
}
