//! The mutable state threaded through one relocation call.

use crate::analyzer::AnalyzedInstruction;
use crate::error::{Error, Result};

/// One entry in the translation map: the correspondence between a source
/// byte offset and the destination offset of one emitted instruction. A
/// source instruction that expands into several destination instructions
/// contributes multiple items sharing the same `source_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationMapItem {
  /// Byte offset of the originating instruction in the source buffer.
  pub source_offset: usize,
  /// Byte offset of the emitted instruction in the destination buffer.
  pub destination_offset: usize,
}

/// Carries the destination buffer, running byte/instruction counts, and
/// the translation map through a relocation call.
///
/// Offsets are tracked as `usize` rather than truncated to a byte: the
/// distilled algorithm this is built from flags that truncation as an
/// assumption that chunks stay under 256 bytes, and states plainly that
/// widening it leaves the algorithm unchanged.
pub struct TranslationContext<'a> {
  destination: &'a mut [u8],
  destination_address: usize,
  bytes_read: usize,
  bytes_written: usize,
  instructions_read: usize,
  instructions: &'a [AnalyzedInstruction],
  translation_map: Vec<TranslationMapItem>,
}

impl<'a> TranslationContext<'a> {
  /// Creates a context for relocating `instructions` into `destination`.
  /// `destination_address` is the runtime address the destination buffer
  /// will execute at once installed, which may differ from the buffer's
  /// own address while it is still being staged.
  pub fn new(
    destination: &'a mut [u8],
    destination_address: usize,
    instructions: &'a [AnalyzedInstruction],
  ) -> Self {
    TranslationContext {
      destination,
      destination_address,
      bytes_read: 0,
      bytes_written: 0,
      instructions_read: 0,
      instructions,
      translation_map: Vec::new(),
    }
  }

  /// The analyzer output this relocation is working from.
  pub fn instructions(&self) -> &[AnalyzedInstruction] {
    self.instructions
  }

  /// The translation map built so far.
  pub fn translation_map(&self) -> &[TranslationMapItem] {
    &self.translation_map
  }

  /// Running count of source bytes processed.
  pub fn bytes_read(&self) -> usize {
    self.bytes_read
  }

  /// Running count of destination bytes written.
  pub fn bytes_written(&self) -> usize {
    self.bytes_written
  }

  /// Running count of source instructions processed.
  pub fn instructions_read(&self) -> usize {
    self.instructions_read
  }

  pub(crate) fn advance_instruction(&mut self, source_length: usize) {
    self.bytes_read += source_length;
    self.instructions_read += 1;
  }

  /// The runtime address the destination buffer will execute at.
  pub fn destination_address(&self) -> usize {
    self.destination_address
  }

  /// The runtime address the next emitted byte will occupy.
  pub fn next_destination_address(&self) -> usize {
    self.destination_address + self.bytes_written
  }

  /// Appends `bytes` at the current write position, range-checked against
  /// the destination's capacity, and records one translation-map entry
  /// associating `source_offset` with the chosen destination offset.
  ///
  /// This is the narrow "emit bytes at offset" helper the source material
  /// calls for: the original omits the capacity check and trusts the
  /// caller, but this core range-checks and reports [`Error::Overflow`]
  /// instead.
  pub fn emit(&mut self, source_offset: usize, bytes: &[u8]) -> Result<()> {
    let destination_offset = self.bytes_written;
    let end = destination_offset.checked_add(bytes.len()).ok_or(Error::Overflow)?;

    if end > self.destination.len() {
      return Err(Error::Overflow);
    }

    self.destination[destination_offset..end].copy_from_slice(bytes);
    self.bytes_written = end;
    self.translation_map.push(TranslationMapItem { source_offset, destination_offset });
    Ok(())
  }

  /// Overwrites `size` bytes at `destination_offset + field_offset` with
  /// `value`, range-checked against the destination's capacity. Used by
  /// the offset fix-up pass to patch an already-emitted instruction.
  pub fn patch(
    &mut self,
    destination_offset: usize,
    field_offset: usize,
    value: &[u8],
  ) -> Result<()> {
    let start = destination_offset.checked_add(field_offset).ok_or(Error::Overflow)?;
    let end = start.checked_add(value.len()).ok_or(Error::Overflow)?;

    if end > self.destination.len() {
      return Err(Error::Overflow);
    }

    self.destination[start..end].copy_from_slice(value);
    Ok(())
  }

  /// Returns the destination offset of the first emitted instruction
  /// whose recorded `source_offset` equals `source_offset`.
  ///
  /// Scanning for the *first* match is what makes this correct for
  /// rewritten branches that expand into several emitted instructions
  /// sharing one `source_offset`: callers resolving "where does this
  /// source instruction now live" want the head of that sequence.
  pub fn destination_offset_of(&self, source_offset: usize) -> Result<usize> {
    self
      .translation_map
      .iter()
      .find(|item| item.source_offset == source_offset)
      .map(|item| item.destination_offset)
      .ok_or(Error::NotFound)
  }
}
