//! Incremental log-viewing pipeline for logscope
//!
//! This crate provides the engine behind a log viewer: listener-notifying,
//! column-oriented log sources and the derived stages that keep views over a
//! mutable upstream log up to date.
//!
//! A pipeline is composed of log sources. [`InMemoryLogSource`] is the
//! reference raw source; [`MultiLineGrouper`] fuses continuation lines into
//! logical entries; [`FilteredLogSource`] exposes the subsequence of rows
//! matching line- and entry-level predicates. Every stage is itself a
//! [`LogSource`]: it serves random-access column queries, publishes typed
//! properties, and notifies listeners of appends, removals and resets.

mod buffer;
mod columns;
mod error;
mod fanout;
mod filter;
mod filtered;
mod grouper;
mod memory;
mod parser;
mod properties;
mod source;
mod stage;

pub use buffer::{ColumnarBuffer, ColumnarBufferView};
pub use columns::{ColumnKind, ColumnVec, LogColumn};
pub use error::{EngineError, Result};
pub use fanout::ListenerFanout;
pub use filter::{AcceptAll, AnyLineMatches, CompiledFilter, EntryFilter, FilterPresets, LineFilter};
pub use filtered::FilteredLogSource;
pub use grouper::MultiLineGrouper;
pub use memory::InMemoryLogSource;
pub use parser::LogLineParser;
pub use properties::{LogProperty, PropertyBag, PropertyValue};
pub use source::{section_rows, ListenerId, LogSource, LogSourceListener, QueryOptions};
pub use stage::PipelineStage;

// Re-export types used in our public API
pub use logscope_types::{
    EmptyReason, LogEntryIndex, LogFormat, LogLevel, LogLine, LogLineIndex, LogModification,
    LogSourceSection,
};
