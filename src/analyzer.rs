//! Builds the ordered instruction list and its internal cross-reference
//! graph for one chunk of source bytes.

use crate::decoder::{DecodedInstruction, Disassembler};
use crate::error::Result;

/// One decoded source instruction, annotated with how its relative
/// operand (if any) relates to the rest of the analyzed chunk.
pub struct AnalyzedInstruction {
  address_offset: usize,
  address: usize,
  decoded: DecodedInstruction,
  has_relative_target: bool,
  has_external_target: bool,
  is_internal_target: bool,
  absolute_target_address: usize,
  incoming: Option<Vec<usize>>,
  outgoing: Option<usize>,
}

impl AnalyzedInstruction {
  /// Byte offset of this instruction within the analyzed source buffer.
  pub fn address_offset(&self) -> usize {
    self.address_offset
  }

  /// Absolute runtime address of this instruction in the source.
  pub fn address(&self) -> usize {
    self.address
  }

  /// The underlying decoded instruction.
  pub fn decoded(&self) -> &DecodedInstruction {
    &self.decoded
  }

  /// True when this instruction encodes a PC-relative operand.
  pub fn has_relative_target(&self) -> bool {
    self.has_relative_target
  }

  /// True when the resolved absolute target lies outside the analyzed
  /// chunk.
  pub fn has_external_target(&self) -> bool {
    self.has_external_target
  }

  /// True when at least one instruction in the chunk targets this one.
  pub fn is_internal_target(&self) -> bool {
    self.is_internal_target
  }

  /// The resolved absolute target of this instruction's relative operand,
  /// or `0` if it has none.
  pub fn absolute_target_address(&self) -> usize {
    self.absolute_target_address
  }

  /// Indices of instructions in the chunk that target this one, if any.
  pub fn incoming(&self) -> Option<&[usize]> {
    self.incoming.as_deref()
  }

  /// The index of the instruction in the chunk that this one targets via
  /// a relative operand, if that target is internal to the chunk.
  pub fn outgoing(&self) -> Option<usize> {
    self.outgoing
  }
}

/// Decodes instructions sequentially starting at offset 0 until the
/// cumulative decoded length reaches or exceeds `bytes_to_analyze`, then
/// builds the cross-reference graph between them.
///
/// `bytes_to_analyze` is a minimum: the analyzer always finishes decoding
/// the instruction that crosses the threshold rather than splitting it.
/// `base_address` is the runtime address `buffer[0]` corresponds to, used
/// to resolve relative operands to absolute addresses. `initial_capacity`
/// sizes the returned list's backing allocation up front.
pub fn analyze_instructions(
  buffer: &[u8],
  bytes_to_analyze: usize,
  base_address: usize,
  initial_capacity: usize,
) -> Result<(Vec<AnalyzedInstruction>, usize)> {
  let mut instructions = Vec::with_capacity(initial_capacity);
  let mut disasm = Disassembler::new(buffer, base_address);
  let mut bytes_read = 0;

  while bytes_read < bytes_to_analyze {
    let address_offset = disasm.bytes_consumed();
    let decoded = disasm.decode_one()?;
    bytes_read += decoded.len();

    let has_relative_target = decoded.has_relative_target();
    let absolute_target_address = decoded.absolute_target().unwrap_or(0);

    instructions.push(AnalyzedInstruction {
      address_offset,
      address: base_address + address_offset,
      decoded,
      has_relative_target,
      has_external_target: has_relative_target,
      is_internal_target: false,
      absolute_target_address,
      incoming: None,
      outgoing: None,
    });
  }

  build_cross_references(&mut instructions);

  Ok((instructions, bytes_read))
}

/// For every ordered pair `(i, j)`, links `j`'s relative target to `i`
/// when `j`'s resolved absolute target equals `i`'s address. A target
/// that lands inside the chunk but not on an instruction boundary is, by
/// construction, never matched here and is therefore treated as external
/// — this is a deliberate simplification, not an oversight.
fn build_cross_references(instructions: &mut [AnalyzedInstruction]) {
  let len = instructions.len();

  for j in 0..len {
    if !instructions[j].has_relative_target {
      continue;
    }

    let target = instructions[j].absolute_target_address;
    let found = (0..len).find(|&i| instructions[i].address == target);

    if let Some(i) = found {
      instructions[j].outgoing = Some(i);
      instructions[j].has_external_target = false;

      instructions[i].incoming.get_or_insert_with(Vec::new).push(j);
      instructions[i].is_internal_target = true;
    }
  }
}
