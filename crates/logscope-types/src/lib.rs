//! Shared types for logscope
//!
//! This crate contains the value types used across the logscope crates:
//! line/entry indices, log levels, parsed lines, source sections and the
//! modification events exchanged between pipeline stages.

use chrono::{DateTime, Utc};

// ============================================================================
// Indices
// ============================================================================

/// Index of a physical line within a log source.
///
/// Valid indices are non-negative; [`LogLineIndex::INVALID`] (-1) marks a
/// missing or not-yet-available line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogLineIndex(i64);

impl LogLineIndex {
    /// Sentinel for "no such line".
    pub const INVALID: LogLineIndex = LogLineIndex(-1);

    pub fn new(index: usize) -> Self {
        Self(index as i64)
    }

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// Raw value, -1 when invalid.
    pub fn value(self) -> i64 {
        self.0
    }

    /// The index as a vector offset, or `None` when invalid.
    pub fn to_usize(self) -> Option<usize> {
        if self.0 >= 0 { Some(self.0 as usize) } else { None }
    }
}

impl Default for LogLineIndex {
    fn default() -> Self {
        Self::INVALID
    }
}

impl From<usize> for LogLineIndex {
    fn from(index: usize) -> Self {
        Self::new(index)
    }
}

impl std::fmt::Display for LogLineIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.0)
        } else {
            write!(f, "#<invalid>")
        }
    }
}

/// Index of a logical (possibly multi-line) entry within a log source.
///
/// Valid indices are non-negative; [`LogEntryIndex::INVALID`] (-1) marks a
/// missing entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogEntryIndex(i64);

impl LogEntryIndex {
    /// Sentinel for "no such entry".
    pub const INVALID: LogEntryIndex = LogEntryIndex(-1);

    pub fn new(index: usize) -> Self {
        Self(index as i64)
    }

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }

    pub fn value(self) -> i64 {
        self.0
    }

    pub fn to_usize(self) -> Option<usize> {
        if self.0 >= 0 { Some(self.0 as usize) } else { None }
    }

    /// The next entry index. Advancing the invalid sentinel yields entry 0.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Default for LogEntryIndex {
    fn default() -> Self {
        Self::INVALID
    }
}

impl From<usize> for LogEntryIndex {
    fn from(index: usize) -> Self {
        Self::new(index)
    }
}

impl std::fmt::Display for LogEntryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "entry {}", self.0)
        } else {
            write!(f, "entry <invalid>")
        }
    }
}

// ============================================================================
// Log levels
// ============================================================================

/// Log severity level detected on a line.
///
/// `None` means the line carried no level marker at all; `Other` means a
/// marker was present but is not one of the recognized severities. Both are
/// treated as continuation markers by the multi-line grouper.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum LogLevel {
    #[default]
    None,
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
    Other,
}

impl LogLevel {
    /// Parse log level from common formats
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" | "trc" | "trce" => Self::Trace,
            "debug" | "dbg" | "debg" => Self::Debug,
            "info" | "inf" | "information" => Self::Info,
            "warn" | "warning" | "wrn" => Self::Warning,
            "error" | "err" | "erro" => Self::Error,
            "fatal" | "panic" | "critical" | "crit" | "ftl" => Self::Fatal,
            "" => Self::None,
            _ => Self::Other,
        }
    }

    /// Whether this is one of the recognized severities (not `None`/`Other`).
    pub fn is_severity(self) -> bool {
        !matches!(self, Self::None | Self::Other)
    }

    /// Ordinal for minimum-level comparisons.
    pub fn ordinal(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Trace => 1,
            Self::Debug => 2,
            Self::Other => 3, // unrecognized markers sort with info
            Self::Info => 3,
            Self::Warning => 4,
            Self::Error => 5,
            Self::Fatal => 6,
        }
    }

    /// Short display string (3 chars)
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "   ",
            Self::Trace => "TRC",
            Self::Debug => "DBG",
            Self::Info => "INF",
            Self::Warning => "WRN",
            Self::Error => "ERR",
            Self::Fatal => "FTL",
            Self::Other => "???",
        }
    }
}

// ============================================================================
// Lines
// ============================================================================

/// A single parsed physical line of a log source.
#[derive(Clone, Debug, PartialEq)]
pub struct LogLine {
    /// Position of this line within the originating source.
    pub source_index: LogLineIndex,

    /// The logical entry this line belongs to.
    pub entry_index: LogEntryIndex,

    /// Original raw line content.
    pub raw: String,

    /// Detected log level.
    pub level: LogLevel,

    /// Parsed timestamp (if available).
    pub timestamp: Option<DateTime<Utc>>,
}

impl LogLine {
    /// Create a new line with minimal fields
    pub fn new(source_index: LogLineIndex, raw: impl Into<String>) -> Self {
        Self {
            source_index,
            entry_index: LogEntryIndex::INVALID,
            raw: raw.into(),
            level: LogLevel::None,
            timestamp: None,
        }
    }
}

// ============================================================================
// Sections & modifications
// ============================================================================

/// A half-open range `[index, index + count)` of source lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct LogSourceSection {
    pub index: LogLineIndex,
    pub count: usize,
}

impl LogSourceSection {
    pub fn new(index: usize, count: usize) -> Self {
        Self {
            index: LogLineIndex::new(index),
            count,
        }
    }

    pub fn empty() -> Self {
        Self {
            index: LogLineIndex::new(0),
            count: 0,
        }
    }

    /// First contained line index as a vector offset (0 when invalid).
    pub fn begin(&self) -> usize {
        self.index.to_usize().unwrap_or(0)
    }

    /// One past the last contained line index.
    pub fn end(&self) -> usize {
        self.begin() + self.count
    }

    /// The last contained line, or invalid for an empty section.
    pub fn last(&self) -> LogLineIndex {
        if self.count == 0 {
            LogLineIndex::INVALID
        } else {
            LogLineIndex::new(self.end() - 1)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn contains(&self, index: LogLineIndex) -> bool {
        match index.to_usize() {
            Some(i) => i >= self.begin() && i < self.end(),
            None => false,
        }
    }

    /// Smallest section containing both inputs.
    pub fn minimum_bounding(a: LogSourceSection, b: LogSourceSection) -> LogSourceSection {
        if a.is_empty() {
            return b;
        }
        if b.is_empty() {
            return a;
        }
        let begin = a.begin().min(b.begin());
        let end = a.end().max(b.end());
        LogSourceSection::new(begin, end - begin)
    }
}

impl std::fmt::Display for LogSourceSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.begin(), self.end())
    }
}

/// A change to a log source, delivered to listeners in production order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogModification {
    /// The source was cleared; all previously reported lines are gone.
    Reset,
    /// The given section of lines was appended.
    Appended(LogSourceSection),
    /// The given section of lines was retracted.
    Removed(LogSourceSection),
}

impl LogModification {
    pub fn appended(index: usize, count: usize) -> Self {
        Self::Appended(LogSourceSection::new(index, count))
    }

    pub fn removed(index: usize, count: usize) -> Self {
        Self::Removed(LogSourceSection::new(index, count))
    }

    /// Split an `Appended` into chunks of at most `max_batch` lines covering
    /// the same range. `Reset` and `Removed` are never split.
    pub fn split(self, max_batch: usize) -> Vec<LogModification> {
        match self {
            Self::Appended(section) if section.count > max_batch && max_batch > 0 => {
                let mut parts = Vec::with_capacity(section.count.div_ceil(max_batch));
                let mut begin = section.begin();
                let end = section.end();
                while begin < end {
                    let count = max_batch.min(end - begin);
                    parts.push(Self::appended(begin, count));
                    begin += count;
                }
                parts
            }
            other => vec![other],
        }
    }
}

impl std::fmt::Display for LogModification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reset => write!(f, "reset"),
            Self::Appended(section) => write!(f, "appended {section}"),
            Self::Removed(section) => write!(f, "removed {section}"),
        }
    }
}

// ============================================================================
// Source metadata
// ============================================================================

/// Why a source currently exposes no entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmptyReason {
    /// The underlying source does not exist (yet).
    SourceDoesNotExist,
    /// The underlying source exists but cannot be read.
    SourceCannotBeAccessed,
    /// The source has lines but none survived the active filter.
    NoEntriesMatchFilter,
}

/// Coarse classification of the source's content.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    PlainText,
    Json,
    Mixed,
}
