//! Copies one analyzed instruction into the destination buffer, rewriting
//! its relative operand (if any) to account for the new address.
//!
//! Internal targets — operands whose absolute target lands on another
//! instruction inside the same chunk — cannot be resolved here: the
//! destination offset of that target instruction isn't known until every
//! instruction ahead of it has also been relocated, some of which may
//! expand. Those are copied with a zeroed placeholder field and recorded
//! normally in the translation map; [`crate::fixup::update_instructions_offsets`]
//! patches them once the whole chunk has been emitted.

use crate::analyzer::AnalyzedInstruction;
use crate::context::TranslationContext;
use crate::error::{Error, Result};
use crate::thunk;

/// Relocates one analyzed instruction into `ctx`'s destination buffer at
/// the current write position, and advances `ctx`'s read position past it.
pub fn relocate_instruction(ctx: &mut TranslationContext, inst: &AnalyzedInstruction) -> Result<()> {
  let result = if !inst.has_relative_target() {
    copy_verbatim(ctx, inst)
  } else if inst.decoded().is_relative_branch() {
    relocate_branch(ctx, inst)
  } else if inst.decoded().is_rip_relative_memory() {
    relocate_memory(ctx, inst)
  } else {
    // A relative operand that is neither a relocatable branch nor a
    // RIP-relative memory access — a relative `CALL` is the only case
    // that reaches here. Relocating it correctly needs an absolute-target
    // call thunk this core does not build; fail loudly instead of
    // copying a displacement that is now measured from the wrong address.
    Err(Error::Unreachable("relative call is out of scope for this core"))
  };

  ctx.advance_instruction(inst.decoded().len());
  result
}

/// Copies an instruction with no relative operand unchanged.
fn copy_verbatim(ctx: &mut TranslationContext, inst: &AnalyzedInstruction) -> Result<()> {
  ctx.emit(inst.address_offset(), inst.decoded().as_slice())
}

/// Relocates a branch instruction (`JMP`, `Jcc`, or one of the unenlargeable
/// mnemonics). Internal targets are deferred; external targets are either
/// re-encoded in place, when the recomputed displacement still fits the
/// original field width, or enlarged.
fn relocate_branch(ctx: &mut TranslationContext, inst: &AnalyzedInstruction) -> Result<()> {
  if inst.outgoing().is_some() {
    return emit_with_placeholder_field(ctx, inst, inst.decoded().imm_field().unwrap());
  }

  let here = ctx.next_destination_address();
  let (field_offset, field_size) = inst
    .decoded()
    .imm_field()
    .ok_or(Error::Unreachable("relative branch missing its immediate field"))?;
  let displacement = thunk::calc_relative_offset(
    inst.decoded().len() - field_offset,
    here + field_offset,
    inst.absolute_target_address(),
  );

  if thunk::fits_signed(displacement, (field_size * 8) as u32) {
    return emit_with_recomputed_field(ctx, inst, (field_offset, field_size), displacement);
  }

  if inst.decoded().is_unenlargeable_branch() {
    return emit_unenlargeable_synthesis(ctx, inst, here);
  }

  emit_enlarged_branch(ctx, inst, here)
}

/// Relocates a RIP-relative memory operand. Internal targets are deferred
/// the same way branches are; external targets are patched in place since
/// RIP-relative addressing has no enlarged form.
fn relocate_memory(ctx: &mut TranslationContext, inst: &AnalyzedInstruction) -> Result<()> {
  if inst.outgoing().is_some() {
    return emit_with_placeholder_field(ctx, inst, inst.decoded().disp_field().unwrap());
  }

  let here = ctx.next_destination_address();
  let (field_offset, field_size) = inst
    .decoded()
    .disp_field()
    .ok_or(Error::Unreachable("rip-relative instruction missing its displacement field"))?;
  let displacement = thunk::calc_relative_offset(
    inst.decoded().len() - field_offset,
    here + field_offset,
    inst.absolute_target_address(),
  );

  if !thunk::fits_signed(displacement, (field_size * 8) as u32) {
    return Err(Error::Unreachable("rip-relative displacement out of 32-bit range after relocation"));
  }

  emit_with_recomputed_field(ctx, inst, (field_offset, field_size), displacement)
}

/// Emits `inst` unchanged except for its relative field, which is zeroed.
/// The field's absolute position inside the destination is recorded in
/// `ctx`'s translation map under this instruction's source offset, so the
/// fix-up pass can find and patch it once the target's destination offset
/// is known.
fn emit_with_placeholder_field(
  ctx: &mut TranslationContext,
  inst: &AnalyzedInstruction,
  field: (usize, usize),
) -> Result<()> {
  let (field_offset, field_size) = field;
  let mut bytes = inst.decoded().as_slice().to_vec();
  bytes[field_offset..field_offset + field_size].fill(0);
  ctx.emit(inst.address_offset(), &bytes)
}

/// Emits `inst` with its relative field overwritten by `displacement`,
/// encoded at its original width.
fn emit_with_recomputed_field(
  ctx: &mut TranslationContext,
  inst: &AnalyzedInstruction,
  field: (usize, usize),
  displacement: i64,
) -> Result<()> {
  let (field_offset, field_size) = field;
  let mut bytes = inst.decoded().as_slice().to_vec();
  let encoded = thunk::encode_signed(displacement, (field_size * 8) as u32)?;
  bytes[field_offset..field_offset + field_size].copy_from_slice(&encoded);
  ctx.emit(inst.address_offset(), &bytes)
}

/// Enlarges a `JMP` or `Jcc` whose external target no longer fits the
/// original field width into its near (32-bit displacement) encoding.
fn emit_enlarged_branch(ctx: &mut TranslationContext, inst: &AnalyzedInstruction, here: usize) -> Result<()> {
  let target = inst.absolute_target_address();

  if inst.decoded().is_unconditional_jump() {
    return ctx.emit(inst.address_offset(), &thunk::encode_near_jmp(here, target));
  }

  let condition = inst
    .decoded()
    .condition_code()
    .ok_or(Error::Unreachable("enlargeable conditional branch missing a condition code"))?;
  ctx.emit(inst.address_offset(), &thunk::encode_near_jcc(here, target, condition))
}

/// Synthesizes the 9-byte short-branch sequence used when a `JCXZ`/`JECXZ`/
/// `JRCXZ`/`LOOP`/`LOOPE`/`LOOPNE` needs to reach an external target beyond
/// its 8-bit field, none of which have an encoding with a larger
/// displacement:
///
/// ```text
/// <original opcode> +2   ; branch taken: skip the short jmp below
/// JMP short +5            ; branch not taken: skip the near jmp below
/// JMP near <target>       ; branch taken lands here
/// ```
fn emit_unenlargeable_synthesis(ctx: &mut TranslationContext, inst: &AnalyzedInstruction, here: usize) -> Result<()> {
  let target = inst.absolute_target_address();
  let opcode = inst.decoded().as_slice()[0];

  ctx.emit(inst.address_offset(), &[opcode, 0x02])?;
  ctx.emit(inst.address_offset(), &[0xEB, 0x05])?;
  ctx.emit(inst.address_offset(), &thunk::encode_near_jmp(here + 4, target))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::analyzer::analyze_instructions;
  use matches::assert_matches;

  #[test]
  fn copies_non_relative_instructions_unchanged() {
    let code = [0x90, 0x90, 0x90];
    let (instructions, _) = analyze_instructions(&code, 3, 0x1000, 4).unwrap();
    let mut buffer = [0u8; 8];
    let mut ctx = TranslationContext::new(&mut buffer, 0x2000, &instructions);

    for inst in &instructions {
      relocate_instruction(&mut ctx, inst).unwrap();
    }

    assert_eq!(&buffer[..3], &[0x90, 0x90, 0x90]);
  }

  #[test]
  fn internal_target_branch_is_emitted_with_a_zeroed_placeholder() {
    // JMP +1 (over one NOP), NOP, RET
    let code = [0xEB, 0x01, 0x90, 0xC3];
    let (instructions, _) = analyze_instructions(&code, 4, 0x1000, 4).unwrap();
    let mut buffer = [0u8; 8];
    let mut ctx = TranslationContext::new(&mut buffer, 0x2000, &instructions);

    relocate_instruction(&mut ctx, &instructions[0]).unwrap();
    assert_eq!(&buffer[..2], &[0xEB, 0x00]);
  }

  #[test]
  fn external_short_jump_within_range_keeps_its_width() {
    let code = [0xEB, 0x10]; // JMP +16
    let (instructions, _) = analyze_instructions(&code, 2, 0x1000, 4).unwrap();
    let mut buffer = [0u8; 8];
    // Same address as the source: displacement is unchanged.
    let mut ctx = TranslationContext::new(&mut buffer, 0x1000, &instructions);

    relocate_instruction(&mut ctx, &instructions[0]).unwrap();
    assert_eq!(&buffer[..2], &[0xEB, 0x10]);
  }

  #[test]
  fn external_short_jump_out_of_range_enlarges_to_near_jmp() {
    let code = [0xEB, 0x10]; // JMP rel8 +16, target = 0x1012
    let (instructions, _) = analyze_instructions(&code, 2, 0x1000, 4).unwrap();
    let mut buffer = [0u8; 8];
    // Relocating far away forces the rel8 field out of range.
    let mut ctx = TranslationContext::new(&mut buffer, 0x9000_0000, &instructions);

    relocate_instruction(&mut ctx, &instructions[0]).unwrap();
    assert_eq!(buffer[0], 0xE9);
    assert_eq!(ctx.bytes_written(), 5);
  }

  #[test]
  fn unenlargeable_branch_out_of_range_synthesizes_nine_bytes() {
    let code = [0xE3, 0x10]; // JRCXZ rel8 +16 (bare 0xE3 in 64-bit mode)
    let (instructions, _) = analyze_instructions(&code, 2, 0x1000, 4).unwrap();
    let mut buffer = [0u8; 16];
    let mut ctx = TranslationContext::new(&mut buffer, 0x9000_0000, &instructions);

    relocate_instruction(&mut ctx, &instructions[0]).unwrap();
    assert_eq!(ctx.bytes_written(), 9);
    assert_eq!(&buffer[..4], &[0xE3, 0x02, 0xEB, 0x05]);
    assert_eq!(buffer[4], 0xE9);
  }

  #[test]
  fn rip_relative_external_target_is_patched_in_place() {
    // mov rax, [rip+0x10]
    let code = [0x48, 0x8B, 0x05, 0x10, 0x00, 0x00, 0x00];
    let (instructions, _) = analyze_instructions(&code, 7, 0x1000, 4).unwrap();
    let mut buffer = [0u8; 8];
    let mut ctx = TranslationContext::new(&mut buffer, 0x1000 + 0x100, &instructions);

    relocate_instruction(&mut ctx, &instructions[0]).unwrap();
    let disp = i32::from_le_bytes(buffer[3..7].try_into().unwrap());
    assert_eq!(disp, 0x10 - 0x100);
  }

  #[test]
  fn rip_relative_displacement_overflow_is_reported() {
    let code = [0x48, 0x8B, 0x05, 0x10, 0x00, 0x00, 0x00];
    let (instructions, _) = analyze_instructions(&code, 7, 0x1000, 4).unwrap();
    let mut buffer = [0u8; 8];
    let mut ctx = TranslationContext::new(&mut buffer, 0x1_0000_0000, &instructions);

    assert_matches!(
      relocate_instruction(&mut ctx, &instructions[0]),
      Err(Error::Unreachable(_))
    );
  }

  #[test]
  fn relative_call_is_rejected_instead_of_copied_with_a_stale_displacement() {
    // call rel32 (target is irrelevant here)
    let code = [0xE8, 0x00, 0x00, 0x00, 0x00];
    let (instructions, _) = analyze_instructions(&code, 5, 0x1000, 4).unwrap();
    let mut buffer = [0u8; 8];
    // Relocating to a different address than the source would silently
    // invalidate the call's displacement if it were copied verbatim.
    let mut ctx = TranslationContext::new(&mut buffer, 0x9000_0000, &instructions);

    assert_matches!(
      relocate_instruction(&mut ctx, &instructions[0]),
      Err(Error::Unreachable(_))
    );
  }
}
