//! The column model shared by every log source.
//!
//! A column is identified by a [`LogColumn`] tag; its element type is fixed
//! per tag and carried by [`ColumnVec`], one typed vector per column. This
//! keeps bulk transfer between stages column-oriented and avoids boxing
//! individual cells.

use chrono::{DateTime, TimeDelta, Utc};

use logscope_types::{LogEntryIndex, LogLevel, LogLineIndex};

use crate::error::{check_destination, EngineError, Result};

/// Identifies one column of a log source.
///
/// Every source supports at least [`LogColumn::MINIMUM`]; sources may expose
/// more. `Index` is the row's position within *this* source,
/// `OriginalIndex` its position within the ultimate raw source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogColumn {
    Index,
    OriginalIndex,
    LogEntryIndex,
    LineNumber,
    OriginalLineNumber,
    RawContent,
    LogLevel,
    Timestamp,
    ElapsedTime,
    DeltaTime,
}

/// Element type stored by a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    LineIndex,
    EntryIndex,
    Number,
    Text,
    Level,
    Timestamp,
    Duration,
}

impl LogColumn {
    /// The minimum column set every source must serve.
    pub const MINIMUM: [LogColumn; 10] = [
        LogColumn::Index,
        LogColumn::OriginalIndex,
        LogColumn::LogEntryIndex,
        LogColumn::LineNumber,
        LogColumn::OriginalLineNumber,
        LogColumn::RawContent,
        LogColumn::LogLevel,
        LogColumn::Timestamp,
        LogColumn::ElapsedTime,
        LogColumn::DeltaTime,
    ];

    pub fn kind(self) -> ColumnKind {
        match self {
            Self::Index | Self::OriginalIndex => ColumnKind::LineIndex,
            Self::LogEntryIndex => ColumnKind::EntryIndex,
            Self::LineNumber | Self::OriginalLineNumber => ColumnKind::Number,
            Self::RawContent => ColumnKind::Text,
            Self::LogLevel => ColumnKind::Level,
            Self::Timestamp => ColumnKind::Timestamp,
            Self::ElapsedTime | Self::DeltaTime => ColumnKind::Duration,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::OriginalIndex => "original_index",
            Self::LogEntryIndex => "log_entry_index",
            Self::LineNumber => "line_number",
            Self::OriginalLineNumber => "original_line_number",
            Self::RawContent => "raw_content",
            Self::LogLevel => "log_level",
            Self::Timestamp => "timestamp",
            Self::ElapsedTime => "elapsed_time",
            Self::DeltaTime => "delta_time",
        }
    }
}

impl std::fmt::Display for LogColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed vector of cells for one column.
///
/// The variant must match the column's [`ColumnKind`]; mismatches are
/// reported as [`EngineError::ColumnTypeMismatch`] at the transfer boundary.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnVec {
    LineIndices(Vec<LogLineIndex>),
    EntryIndices(Vec<LogEntryIndex>),
    Numbers(Vec<i64>),
    Texts(Vec<String>),
    Levels(Vec<LogLevel>),
    Timestamps(Vec<Option<DateTime<Utc>>>),
    Durations(Vec<Option<TimeDelta>>),
}

impl ColumnVec {
    /// A vector of `len` default cells for the given kind.
    pub fn with_default(kind: ColumnKind, len: usize) -> Self {
        match kind {
            ColumnKind::LineIndex => Self::LineIndices(vec![LogLineIndex::INVALID; len]),
            ColumnKind::EntryIndex => Self::EntryIndices(vec![LogEntryIndex::INVALID; len]),
            ColumnKind::Number => Self::Numbers(vec![0; len]),
            ColumnKind::Text => Self::Texts(vec![String::new(); len]),
            ColumnKind::Level => Self::Levels(vec![LogLevel::None; len]),
            ColumnKind::Timestamp => Self::Timestamps(vec![None; len]),
            ColumnKind::Duration => Self::Durations(vec![None; len]),
        }
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            Self::LineIndices(_) => ColumnKind::LineIndex,
            Self::EntryIndices(_) => ColumnKind::EntryIndex,
            Self::Numbers(_) => ColumnKind::Number,
            Self::Texts(_) => ColumnKind::Text,
            Self::Levels(_) => ColumnKind::Level,
            Self::Timestamps(_) => ColumnKind::Timestamp,
            Self::Durations(_) => ColumnKind::Duration,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::LineIndices(v) => v.len(),
            Self::EntryIndices(v) => v.len(),
            Self::Numbers(v) => v.len(),
            Self::Texts(v) => v.len(),
            Self::Levels(v) => v.len(),
            Self::Timestamps(v) => v.len(),
            Self::Durations(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite `[start, start + count)` with default cells.
    pub fn fill_default(&mut self, start: usize, count: usize) -> Result<()> {
        check_destination(self.len(), start, count)?;
        match self {
            Self::LineIndices(v) => v[start..start + count].fill(LogLineIndex::INVALID),
            Self::EntryIndices(v) => v[start..start + count].fill(LogEntryIndex::INVALID),
            Self::Numbers(v) => v[start..start + count].fill(0),
            Self::Texts(v) => v[start..start + count].fill(String::new()),
            Self::Levels(v) => v[start..start + count].fill(LogLevel::None),
            Self::Timestamps(v) => v[start..start + count].fill(None),
            Self::Durations(v) => v[start..start + count].fill(None),
        }
        Ok(())
    }

    /// Grow or shrink to `len`, filling new cells with defaults.
    pub fn resize_default(&mut self, len: usize) {
        match self {
            Self::LineIndices(v) => v.resize(len, LogLineIndex::INVALID),
            Self::EntryIndices(v) => v.resize(len, LogEntryIndex::INVALID),
            Self::Numbers(v) => v.resize(len, 0),
            Self::Texts(v) => v.resize(len, String::new()),
            Self::Levels(v) => v.resize(len, LogLevel::None),
            Self::Timestamps(v) => v.resize(len, None),
            Self::Durations(v) => v.resize(len, None),
        }
    }

    pub fn line_indices(&self) -> Option<&[LogLineIndex]> {
        match self {
            Self::LineIndices(v) => Some(v),
            _ => None,
        }
    }

    pub fn line_indices_mut(&mut self) -> Option<&mut [LogLineIndex]> {
        match self {
            Self::LineIndices(v) => Some(v),
            _ => None,
        }
    }

    pub fn entry_indices(&self) -> Option<&[LogEntryIndex]> {
        match self {
            Self::EntryIndices(v) => Some(v),
            _ => None,
        }
    }

    pub fn entry_indices_mut(&mut self) -> Option<&mut [LogEntryIndex]> {
        match self {
            Self::EntryIndices(v) => Some(v),
            _ => None,
        }
    }

    pub fn numbers(&self) -> Option<&[i64]> {
        match self {
            Self::Numbers(v) => Some(v),
            _ => None,
        }
    }

    pub fn numbers_mut(&mut self) -> Option<&mut [i64]> {
        match self {
            Self::Numbers(v) => Some(v),
            _ => None,
        }
    }

    pub fn texts(&self) -> Option<&[String]> {
        match self {
            Self::Texts(v) => Some(v),
            _ => None,
        }
    }

    pub fn texts_mut(&mut self) -> Option<&mut [String]> {
        match self {
            Self::Texts(v) => Some(v),
            _ => None,
        }
    }

    pub fn levels(&self) -> Option<&[LogLevel]> {
        match self {
            Self::Levels(v) => Some(v),
            _ => None,
        }
    }

    pub fn levels_mut(&mut self) -> Option<&mut [LogLevel]> {
        match self {
            Self::Levels(v) => Some(v),
            _ => None,
        }
    }

    pub fn timestamps(&self) -> Option<&[Option<DateTime<Utc>>]> {
        match self {
            Self::Timestamps(v) => Some(v),
            _ => None,
        }
    }

    pub fn timestamps_mut(&mut self) -> Option<&mut [Option<DateTime<Utc>>]> {
        match self {
            Self::Timestamps(v) => Some(v),
            _ => None,
        }
    }

    pub fn durations(&self) -> Option<&[Option<TimeDelta>]> {
        match self {
            Self::Durations(v) => Some(v),
            _ => None,
        }
    }

    pub fn durations_mut(&mut self) -> Option<&mut [Option<TimeDelta>]> {
        match self {
            Self::Durations(v) => Some(v),
            _ => None,
        }
    }
}

/// Fail unless `dest` stores the element type of `column`.
pub(crate) fn check_kind(column: LogColumn, dest: &ColumnVec) -> Result<()> {
    if dest.kind() != column.kind() {
        return Err(EngineError::ColumnTypeMismatch {
            column,
            expected: column.kind(),
            actual: dest.kind(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimum_set_kinds() {
        for column in LogColumn::MINIMUM {
            let vec = ColumnVec::with_default(column.kind(), 3);
            assert_eq!(vec.kind(), column.kind());
            assert_eq!(vec.len(), 3);
        }
    }

    #[test]
    fn test_fill_default_range_checked() {
        let mut vec = ColumnVec::with_default(ColumnKind::Number, 4);
        if let ColumnVec::Numbers(v) = &mut vec {
            v.copy_from_slice(&[1, 2, 3, 4]);
        }
        vec.fill_default(1, 2).unwrap();
        assert_eq!(vec.numbers().unwrap(), &[1, 0, 0, 4]);

        let err = vec.fill_default(3, 2).unwrap_err();
        assert_eq!(
            err,
            EngineError::DestinationOutOfBounds {
                offset: 3,
                end: 5,
                len: 4
            }
        );
    }

    #[test]
    fn test_kind_mismatch() {
        let dest = ColumnVec::with_default(ColumnKind::Text, 1);
        let err = check_kind(LogColumn::Timestamp, &dest).unwrap_err();
        assert!(matches!(err, EngineError::ColumnTypeMismatch { .. }));
    }
}
