use thiserror::Error;

use crate::columns::{ColumnKind, LogColumn};

pub type Result<T> = std::result::Result<T, EngineError>;

/// Contract violations surfaced by the engine.
///
/// These are programmer errors: an out-of-range destination or a mismatched
/// buffer never occurs in a correct caller. Stale or out-of-range *row*
/// indices are not errors; those queries yield column defaults instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("destination range {offset}..{end} exceeds buffer length {len}")]
    DestinationOutOfBounds {
        offset: usize,
        end: usize,
        len: usize,
    },

    #[error("column {0:?} is not present in the destination buffer")]
    ColumnMissing(LogColumn),

    #[error("column {column:?} holds {expected:?} values but the destination stores {actual:?}")]
    ColumnTypeMismatch {
        column: LogColumn,
        expected: ColumnKind,
        actual: ColumnKind,
    },

    #[error("column {0:?} is not exposed by this buffer view")]
    ColumnNotInView(LogColumn),
}

/// Check that `[offset, offset + requested)` fits in a destination of `len`.
pub(crate) fn check_destination(len: usize, offset: usize, requested: usize) -> Result<()> {
    let end = offset + requested;
    if end > len {
        return Err(EngineError::DestinationOutOfBounds { offset, end, len });
    }
    Ok(())
}
