/*!
  Opcodes of the virtual machine.

  The table is sparse: recognized values run from 0x00 to 0x90 with gaps, and the whole
  0x60..=0x7F range is the struct-construction family, whose low five bits are a mask
  rather than a dense code (see `is_create_struct`). Family members therefore do not
  appear as variants here; everything else maps one variant to one opcode value.

  A word above `MAX_OPCODE` is not an error: it decodes as one terminal `Unrecognized`
  instruction for forward compatibility. A word at or below `MAX_OPCODE` that matches
  neither a variant nor the struct-construction mask is a `DecodeError`.
*/

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::{Display as StrumDisplay, IntoStaticStr};

/// The highest recognized opcode value. The instruction set is believed complete up to
/// this value.
pub const MAX_OPCODE: u8 = 0x90;

/// The struct-construction family: opcode byte masked with `!0x1F` equal to `0x60`.
pub fn is_create_struct(opcode: u8) -> bool {
  opcode & !0x1F == 0x60
}

#[derive(
  StrumDisplay, IntoStaticStr, TryFromPrimitive, IntoPrimitive,
  Clone, Copy, Eq, PartialEq, Debug, Hash,
)]
#[repr(u8)]
pub enum Opcode {
  Skip                 = 0x00,

  // Register-to-register and constant-to-register moves.
  MoveXX               = 0x01,
  MoveXY               = 0x02,
  MoveYX               = 0x03,
  MoveYY               = 0x04,
  MoveGX               = 0x05,
  MoveGY               = 0x06,
  MoveKX               = 0x07,
  MoveKY               = 0x08,

  // Two moves packed in one instruction.
  MoveMoveXYXY         = 0x09,
  MoveMoveYXYX         = 0x0A,
  MoveMoveYXXY         = 0x0B,
  MoveMoveXYYX         = 0x0C,

  AllocateY            = 0x0D,

  CreateVarX           = 0x0F,
  CreateVarY           = 0x10,
  CreateVarMoveX       = 0x11,
  CreateVarMoveY       = 0x12,

  SetupExceptionHandler = 0x18,
  PopExceptionHandler  = 0x19,

  // Calls with 0..=5 inline argument registers, constant-pool target.
  CallK0               = 0x20,
  CallK1               = 0x21,
  CallK2               = 0x22,
  CallK3               = 0x23,
  CallK4               = 0x24,
  CallK5               = 0x25,
  CallBuiltin          = 0x26,
  // General calls: the argument count word sizes a synthesized X0..Xn-1 list.
  CallX                = 0x27,
  CallY                = 0x28,
  CallG                = 0x29,
  CallK                = 0x2A,
  TailCallX            = 0x2B,
  TailCallY            = 0x2C,
  TailCallG            = 0x2D,
  TailCallK            = 0x2E,

  SendMsgX             = 0x30,
  SendMsgY             = 0x31,
  SendMsgG             = 0x32,
  SendMsgK             = 0x33,
  TailSendMsgX         = 0x34,
  TailSendMsgY         = 0x35,
  TailSendMsgG         = 0x36,
  TailSendMsgK         = 0x37,

  Return               = 0x40,
  BranchForward        = 0x41,
  BranchBackward       = 0x42,

  // Two-way conditional branches; the two suffix letters give the signs applied to
  // the false-branch and else-branch offsets.
  CondBranchPP         = 0x43,
  CondBranchPM         = 0x44,
  CondBranchMP         = 0x45,
  CondBranchMM         = 0x46,

  PatternMatchX        = 0x47,
  PatternMatchY        = 0x48,
  PatternMatchG        = 0x49,

  // Boxed-equality moves.
  UnifyXX              = 0x50,
  UnifyXY              = 0x51,
  UnifyXG              = 0x52,
  UnifyXK              = 0x53,
  UnifyYY              = 0x54,
  UnifyYG              = 0x55,
  UnifyYK              = 0x56,
  UnifyGG              = 0x57,
  UnifyGK              = 0x58,
  UnifyKK              = 0x59,

  EqualsInteger        = 0x80,
  InlineAdd            = 0x81,
  InlineSubtract       = 0x82,
  InlineIncrement      = 0x83,
  InlineDecrement      = 0x84,

  InlineGetClass       = 0x90,
}

#[cfg(test)]
mod tests {
  use std::convert::TryFrom;

  use super::*;

  #[test]
  fn create_struct_mask_covers_exactly_0x60_to_0x7f() {
    for value in 0u8..=0xFF {
      assert_eq!(is_create_struct(value), (0x60..=0x7F).contains(&value));
    }
  }

  #[test]
  fn gaps_in_the_table_do_not_convert() {
    assert!(Opcode::try_from(0x0Eu8).is_err());
    assert!(Opcode::try_from(0x2Fu8).is_err());
    assert!(Opcode::try_from(0x85u8).is_err());
    assert_eq!(Opcode::try_from(0x90u8), Ok(Opcode::InlineGetClass));
  }
}
