//! The log source contract.
//!
//! A log source is a random-access, listener-notifying, column-oriented
//! sequence of log entries. Pipeline stages implement this trait for their
//! output while listening to another source as their input.

use std::sync::Arc;
use std::time::Duration;

use logscope_types::{LogLineIndex, LogModification, LogSourceSection};

use crate::buffer::ColumnarBuffer;
use crate::columns::{ColumnVec, LogColumn};
use crate::error::Result;
use crate::properties::{LogProperty, PropertyBag, PropertyValue};

/// Handle identifying one listener registration, returned by
/// [`LogSource::add_listener`] and consumed by [`LogSource::remove_listener`].
pub type ListenerId = u64;

/// Per-query options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryOptions {
    /// When false, sources that cache column values must bypass the cache.
    pub cache_allowed: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            cache_allowed: true,
        }
    }
}

/// Receives modification events from a log source.
///
/// Callbacks may arrive on any runtime thread and must be non-blocking:
/// enqueue the event and return.
pub trait LogSourceListener: Send + Sync {
    fn on_log_modified(&self, modification: LogModification);
}

/// A random-access, column-oriented log source.
///
/// Row-index queries never fail: out-of-range rows yield the column's
/// default value. Destination-shape violations (offset overflow, missing or
/// mistyped column) are contract violations and return an error.
pub trait LogSource: Send + Sync {
    /// The columns this source serves; a superset of [`LogColumn::MINIMUM`],
    /// stable for the source's lifetime.
    fn columns(&self) -> Vec<LogColumn>;

    /// The properties this source answers, including ancestor properties.
    fn properties(&self) -> Vec<LogProperty>;

    /// Current value of one property, or its default. Non-blocking.
    fn get_property(&self, property: LogProperty) -> PropertyValue;

    /// Forward a property write to the underlying writable source.
    /// A no-op on read-only descriptors.
    fn set_property(&self, property: LogProperty, value: PropertyValue);

    /// Atomic snapshot copy of all current properties into `dest`.
    fn copy_properties(&self, dest: &mut PropertyBag);

    /// Number of rows this source currently exposes.
    fn count(&self) -> usize;

    /// Fill `dest[dest_offset..dest_offset + rows.len()]` with the cells of
    /// `column` at the given rows.
    fn get_column(
        &self,
        rows: &[LogLineIndex],
        column: LogColumn,
        dest: &mut ColumnVec,
        dest_offset: usize,
        options: QueryOptions,
    ) -> Result<()>;

    /// Multi-column variant of [`get_column`](Self::get_column): fills each
    /// column present in `dest`.
    fn get_entries(
        &self,
        rows: &[LogLineIndex],
        dest: &mut ColumnarBuffer,
        dest_offset: usize,
        options: QueryOptions,
    ) -> Result<()> {
        for column in dest.column_tags() {
            let vec = dest
                .column_mut(column)
                .expect("column listed by the buffer it came from");
            self.get_column(rows, column, vec, dest_offset, options)?;
        }
        Ok(())
    }

    /// Translate a row index of the ultimate raw source into this source's
    /// row space. Identity for raw sources; derived sources override.
    fn original_line_index_of(&self, original: LogLineIndex) -> LogLineIndex {
        match original.to_usize() {
            Some(i) if i < self.count() => original,
            _ => LogLineIndex::INVALID,
        }
    }

    /// Register for modification callbacks. The listener is primed with a
    /// `Reset` and then receives appends coalesced to at most one callback
    /// per `max_wait` window and at most `max_batch` lines per callback.
    fn add_listener(
        &self,
        listener: Arc<dyn LogSourceListener>,
        max_wait: Duration,
        max_batch: usize,
    ) -> ListenerId;

    /// Drop a registration. Idempotent.
    fn remove_listener(&self, id: ListenerId);
}

/// Materialize a section into its row indices.
pub fn section_rows(section: LogSourceSection) -> Vec<LogLineIndex> {
    (section.begin()..section.end())
        .map(LogLineIndex::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_rows() {
        let rows = section_rows(LogSourceSection::new(3, 2));
        assert_eq!(rows, vec![LogLineIndex::new(3), LogLineIndex::new(4)]);
        assert!(section_rows(LogSourceSection::empty()).is_empty());
    }

    #[test]
    fn test_query_options_default() {
        assert!(QueryOptions::default().cache_allowed);
    }
}
