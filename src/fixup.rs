//! The second pass: patches the relative field of every instruction whose
//! target was internal to the analyzed chunk, now that every instruction
//! ahead of it has been emitted and its destination offset is known.

use crate::analyzer::AnalyzedInstruction;
use crate::context::TranslationContext;
use crate::error::Result;
use crate::thunk;

/// Walks `instructions`, and for each one whose relative operand targets
/// another instruction in the same chunk, recomputes the displacement from
/// both instructions' final destination addresses and patches it into the
/// already-emitted bytes.
///
/// Must run after every instruction in the chunk has been passed through
/// [`crate::relocator::relocate_instruction`], since the translation map it
/// reads is only complete at that point.
pub fn update_instructions_offsets(
  ctx: &mut TranslationContext,
  instructions: &[AnalyzedInstruction],
) -> Result<()> {
  for inst in instructions {
    let target_index = match inst.outgoing() {
      Some(index) => index,
      None => continue,
    };
    let target = &instructions[target_index];

    let field = inst
      .decoded()
      .imm_field()
      .or_else(|| inst.decoded().disp_field())
      .expect("instruction with an outgoing edge must carry a relative field");
    let (field_offset, field_size) = field;

    let source_dest_offset = ctx.destination_offset_of(inst.address_offset())?;
    let target_dest_offset = ctx.destination_offset_of(target.address_offset())?;

    let field_address = ctx.destination_address() + source_dest_offset + field_offset;
    let target_address = ctx.destination_address() + target_dest_offset;

    let displacement = thunk::calc_relative_offset(
      inst.decoded().len() - field_offset,
      field_address,
      target_address,
    );
    let encoded = thunk::encode_signed(displacement, (field_size * 8) as u32)?;

    ctx.patch(source_dest_offset, field_offset, &encoded)?;
  }

  Ok(())
}
