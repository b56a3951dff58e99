//! A relocation core for x86/x64 inline hooking.
//!
//! This crate disassembles the first few instructions of a function and
//! produces a copy of them — a trampoline — that can execute correctly from
//! a different address, as is needed once the original prolog is
//! overwritten with a jump to a detour. Three steps are involved:
//!
//! - [`analyzer::analyze_instructions`] decodes the source bytes into an
//!   ordered instruction list and links any relative operand that targets
//!   another instruction in the same chunk.
//! - [`relocator::relocate_instruction`] copies each instruction into the
//!   destination buffer, rewriting relative branches and RIP-relative
//!   memory operands to account for the new address — enlarging a branch's
//!   encoding, or synthesizing a short-branch sequence, when the original
//!   field is too narrow to reach an external target from the new location.
//! - [`fixup::update_instructions_offsets`] runs once the whole chunk has
//!   been emitted, patching the relative field of any instruction whose
//!   target was internal to the chunk, now that every target's final
//!   destination offset is known.
//!
//! ## Scope
//!
//! This crate is the relocation core only: given source bytes, where they
//! will end up, and how much of them to move, it produces the relocated
//! bytes and the map between source and destination offsets. It does not
//! allocate executable memory, install a jump at the original address, or
//! provide a type-safe detour handle — those are the concerns of an
//! installer layered on top.

pub mod analyzer;
pub mod context;
pub mod decoder;
pub mod error;
pub mod fixup;
pub mod relocator;
pub mod thunk;

pub use crate::analyzer::{analyze_instructions, AnalyzedInstruction};
pub use crate::context::{TranslationContext, TranslationMapItem};
pub use crate::error::{Error, Result};
pub use crate::fixup::update_instructions_offsets;
pub use crate::relocator::relocate_instruction;

/// Relocates `bytes_to_relocate` bytes of `source`, which executes at
/// `source_address`, into `destination`, which will execute at
/// `destination_address`. Returns the translation map built along the way.
///
/// This ties the three passes together for the common case; callers that
/// need the intermediate [`AnalyzedInstruction`] list — to decide how many
/// bytes the trampoline needs to hold before allocating it, for instance —
/// should call [`analyzer::analyze_instructions`] directly instead.
pub fn relocate<'a>(
  source: &[u8],
  source_address: usize,
  bytes_to_relocate: usize,
  destination: &'a mut [u8],
  destination_address: usize,
) -> Result<Vec<TranslationMapItem>> {
  let (instructions, _bytes_read) =
    analyzer::analyze_instructions(source, bytes_to_relocate, source_address, instructions_hint(bytes_to_relocate))?;

  let mut ctx = TranslationContext::new(destination, destination_address, &instructions);
  for inst in &instructions {
    relocate_instruction(&mut ctx, inst)?;
  }
  update_instructions_offsets(&mut ctx, &instructions)?;

  Ok(ctx.translation_map().to_vec())
}

/// A rough instruction-count estimate used to size the analyzer's backing
/// allocation: x86/x64 instructions average well under 4 bytes in typical
/// function prologs.
fn instructions_hint(bytes_to_relocate: usize) -> usize {
  (bytes_to_relocate / 4).max(4)
}
