/*!

  The VM uses a 16 bit big-endian word size. The word at the program counter is the
  opcode; each opcode determines how many further operand words belong to the
  instruction, so instructions are variable length but always a whole number of words.
  A program counter indexes the word array, never the raw bytes.

  Operand words are either register indices (argument/temp `X`, local `Y`, or
  global/closure `G`), constant pool indices resolved to terms at decode time, raw
  integers (lengths, counts, inline literals), or relative branch offsets. The
  struct-construction family additionally embeds a 2-word sub-stream of
  (sub-opcode, payload) steps after its fixed operands.

*/

mod decode;
mod instruction;
mod opcode;

pub use decode::InstructionIter;
pub use instruction::{ArithOp, Instruction, Operand, Register, RegisterClass};
pub use opcode::{is_create_struct, Opcode, MAX_OPCODE};

pub type Word = u16;
pub type ProgramCounter = usize;

/// Reframes a code area's byte blob as big-endian words. The pickle format guarantees
/// an even byte count (the code length field counts words).
pub fn code_words(bytes: &[u8]) -> Vec<Word> {
  bytes
    .chunks_exact(2)
    .map(|pair| Word::from_be_bytes([pair[0], pair[1]]))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn code_words_are_big_endian() {
    assert_eq!(code_words(&[0x00, 0x41, 0x01, 0x02]), vec![0x0041, 0x0102]);
  }
}
