//! Error types for the relocation core.

use std::error::Error as StdError;
use std::fmt;

/// The result of a relocation operation.
pub type Result<T> = std::result::Result<T, Error>;

/// A representation of all possible errors the core can report.
#[derive(Debug)]
pub enum Error {
  /// The decoder could not decode a complete instruction at the given
  /// address (malformed encoding, or the buffer ended mid-instruction).
  DecodeFailed,
  /// Growing the instruction list, an `incoming` edge list, or the
  /// translation map failed.
  OutOfMemory,
  /// A translation-map lookup during fix-up found no entry for the
  /// requested source offset.
  NotFound,
  /// The dispatcher reached a combination of operand kind and width the
  /// x86/x64 encoding cannot produce.
  Unreachable(&'static str),
  /// A write into the destination buffer would exceed its capacity.
  Overflow,
}

impl StdError for Error {}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Error::DecodeFailed => write!(f, "address contains invalid or truncated assembly"),
      Error::OutOfMemory => write!(f, "cannot allocate memory for analysis bookkeeping"),
      Error::NotFound => {
        write!(f, "translation map has no entry for the requested source offset")
      },
      Error::Unreachable(what) => write!(f, "reached an unreachable state: {}", what),
      Error::Overflow => write!(f, "write would exceed destination buffer capacity"),
    }
  }
}
