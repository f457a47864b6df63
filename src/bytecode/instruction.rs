//! Decoded instruction values. An `Instruction` carries only register references,
//! resolved terms, and program-counter targets; raw words survive decoding only inside
//! `Unrecognized`, which keeps them for diagnostic display.

use std::fmt::{Display, Formatter};

use strum_macros::Display as StrumDisplay;

use crate::term::TermRef;

use super::{ProgramCounter, Word};

/// Register storage classes addressed by instructions.
#[derive(StrumDisplay, Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum RegisterClass {
  /// Argument/temp registers, `X`.
  #[strum(serialize = "X")]
  Argument,
  /// Frame-local registers, `Y`.
  #[strum(serialize = "Y")]
  Local,
  /// Global/closure registers, `G`.
  #[strum(serialize = "G")]
  Global,
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Register {
  pub class: RegisterClass,
  pub index: Word,
}

impl Register {
  pub fn argument(index: Word) -> Register {
    Register { class: RegisterClass::Argument, index }
  }

  pub fn local(index: Word) -> Register {
    Register { class: RegisterClass::Local, index }
  }
}

impl Display for Register {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}{}", self.class, self.index)
  }
}

/// An instruction operand: a register, an already-resolved constant-pool term, an
/// inline literal, or a value synthesized by the struct-construction family. Built
/// composites nest operands rather than graph nodes, so decoding never touches the
/// immutable graph.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
  Register(Register),
  Constant(TermRef),
  Immediate(i64),
  Bool(bool),
  Wildcard,
  Cons {
    head: Box<Operand>,
    tail: Box<Operand>
  },
  Tuple {
    label: TermRef,
    items: Vec<Operand>
  },
  /// Already normalized: features paired with values.
  Record {
    label: TermRef,
    fields: Vec<(TermRef, Operand)>
  },
  /// A closure literal; the code area comes from the constant pool, the captured
  /// environment from the collected elements.
  Closure {
    code_area: TermRef,
    captures: Vec<Operand>
  },
}

#[derive(StrumDisplay, Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ArithOp {
  #[strum(serialize = "+")]
  Add,
  #[strum(serialize = "-")]
  Subtract,
}

/// One decoded instruction. Produced once per decode step and never mutated.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
  Skip,
  Move {
    source: Operand,
    target: Operand,
    /// Boxed-equality move (`=`) rather than assignment (`<-`).
    unify: bool,
  },
  /// Two moves packed into one instruction, each (source, target).
  MoveMove {
    first: (Operand, Operand),
    second: (Operand, Operand),
  },
  /// Declares `locals.len()` fresh local registers.
  Allocate { locals: Vec<Register> },
  /// Binds the target to a fresh unbound placeholder.
  CreateVariable { target: Operand },
  /// Variable creation fused with a move of the fresh binding into `copy`.
  CreateVariableMove {
    target: Operand,
    copy: Operand,
  },
  SetupExceptionHandler,
  PopExceptionHandler,
  Call {
    function: Operand,
    args: Vec<Operand>,
    tail: bool,
  },
  Return,
  Branch { target: ProgramCounter },
  /// Multi-way branch: `(pattern, target)` arms plus an optional else target.
  CondBranch {
    test: Operand,
    arms: Vec<(Operand, ProgramCounter)>,
    else_target: Option<ProgramCounter>,
  },
  InlineBinaryArith {
    lhs: Operand,
    op: ArithOp,
    rhs: Operand,
    target: Operand,
  },
  InlineGetClass {
    source: Operand,
    target: Operand,
  },
  /// Terminal decode outcome for opcodes beyond the known table; keeps the raw
  /// remainder of the word array.
  Unrecognized { words: Vec<Word> },
}
