//! Multi-line entry grouping.
//!
//! [`MultiLineGrouper`] assigns [`LogEntryIndex`] values to source rows by
//! fusing continuation lines (no timestamp, no recognized severity) into the
//! preceding entry. Its rows map 1:1 to input lines; only `LogEntryIndex`,
//! `Timestamp` and `LogLevel` are rewritten, everything else passes through.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use logscope_types::{
    LogEntryIndex, LogLineIndex, LogModification, LogSourceSection,
};

use crate::buffer::ColumnarBuffer;
use crate::columns::{check_kind, ColumnVec, LogColumn};
use crate::error::{check_destination, Result};
use crate::properties::{LogProperty, PropertyBag, PropertyValue};
use crate::source::{section_rows, ListenerId, LogSource, LogSourceListener, QueryOptions};
use crate::stage::{spawn_loop, PipelineStage, StageCore};

/// Source lines processed per scheduling tick.
const BATCH_SIZE: usize = 10_000;

/// Entry assignment for one source row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct LogEntryInfo {
    entry_index: LogEntryIndex,
    first_line: LogLineIndex,
}

struct GrouperState {
    /// One slot per processed source row; slot `i` describes row `i`.
    indices: Vec<LogEntryInfo>,
    /// The entry currently being extended, invalid when the next line must
    /// start a new entry.
    current_entry: LogEntryIndex,
    current_first_line: LogLineIndex,
    /// Next source row to process.
    watermark: usize,
    /// Known extent of the source.
    full_section: LogSourceSection,
    /// Rows changed since the last caught-up flush.
    dirty: bool,
}

impl GrouperState {
    fn new() -> Self {
        Self {
            indices: Vec::new(),
            current_entry: LogEntryIndex::INVALID,
            current_first_line: LogLineIndex::INVALID,
            watermark: 0,
            full_section: LogSourceSection::empty(),
            dirty: false,
        }
    }

    /// The entry index for the next start-line. Continues after a rollback
    /// from whatever remains in `indices`.
    fn next_entry_index(&self) -> LogEntryIndex {
        if self.current_entry.is_valid() {
            self.current_entry.next()
        } else {
            self.indices
                .last()
                .map(|info| info.entry_index.next())
                .unwrap_or_else(|| LogEntryIndex::new(0))
        }
    }
}

/// A derived source that groups consecutive source lines into logical
/// entries.
///
/// A line starts a new entry when it carries a timestamp or a recognized
/// severity; any other line continues the entry before it. All rows of an
/// entry answer `Timestamp`/`LogLevel` queries with the start line's values.
pub struct MultiLineGrouper {
    core: StageCore,
    state: Mutex<GrouperState>,
}

impl MultiLineGrouper {
    /// Subscribe to `source`. Call [`start`](Self::start) to launch the
    /// processing task, or drive [`PipelineStage::run_once`] directly.
    pub fn new(source: Arc<dyn LogSource>, max_wait: Duration) -> Arc<Self> {
        Arc::new(Self {
            core: StageCore::new(
                source,
                &[LogProperty::PercentageProcessed, LogProperty::LogEntryCount],
                max_wait,
                BATCH_SIZE,
            ),
            state: Mutex::new(GrouperState::new()),
        })
    }

    /// Launch the repeating processing task on the current runtime.
    pub fn start(self: &Arc<Self>) {
        self.core
            .set_task(spawn_loop(self.clone(), self.core.cancel_token()));
    }

    /// Deregister from the source, stop processing, release the index
    /// vector. Terminal.
    pub fn dispose(&self) {
        self.core.dispose();
        *self.state.lock() = GrouperState::new();
    }

    fn handle_reset(&self) {
        *self.state.lock() = GrouperState::new();
        self.core.listeners.reset();
        self.state.lock().dirty = true;
    }

    fn handle_removed(&self, section: LogSourceSection) {
        let cut = section.begin();
        let removed = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if cut >= state.full_section.end() {
                // retraction of rows this stage never knew about
                return;
            }
            let old = state.indices.len();
            state.indices.truncate(cut);
            state.watermark = state.watermark.min(cut);
            state.full_section = LogSourceSection::new(0, cut.min(state.full_section.end()));
            // the next processed line must open a fresh entry
            state.current_entry = LogEntryIndex::INVALID;
            state.current_first_line = LogLineIndex::INVALID;
            state.dirty = true;
            old.saturating_sub(cut)
        };
        if removed > 0 {
            self.core.listeners.invalidate(cut, removed);
        }
    }

    fn handle_appended(&self, section: LogSourceSection) {
        let rows = section_rows(section);
        let mut buffer = ColumnarBuffer::new(
            rows.len(),
            &[LogColumn::Index, LogColumn::Timestamp, LogColumn::LogLevel],
        );
        if let Err(err) =
            self.core
                .source
                .get_entries(&rows, &mut buffer, 0, QueryOptions::default())
        {
            error!(%err, %section, "failed to fetch appended section, will retry");
            self.core.pending.push_front(LogModification::Appended(section));
            return;
        }
        let source_indices = buffer
            .column(LogColumn::Index)
            .and_then(|c| c.line_indices())
            .unwrap_or(&[])
            .to_vec();
        let timestamps = buffer
            .column(LogColumn::Timestamp)
            .and_then(|c| c.timestamps())
            .unwrap_or(&[])
            .to_vec();
        let levels = buffer
            .column(LogColumn::LogLevel)
            .and_then(|c| c.levels())
            .unwrap_or(&[])
            .to_vec();

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.indices.len() != state.watermark {
            error!(
                indices = state.indices.len(),
                watermark = state.watermark,
                "index vector out of step with watermark, re-aligning"
            );
            state.watermark = state.indices.len();
        }
        for offset in 0..rows.len() {
            let absolute = section.begin() + offset;
            if absolute < state.watermark {
                // replay of an already processed section
                continue;
            }
            if source_indices[offset] != LogLineIndex::new(absolute) {
                // the source shrank after queueing this append; a removal
                // is on its way
                debug!(row = absolute, "appended row vanished from the source");
                break;
            }
            let is_start = timestamps[offset].is_some() || levels[offset].is_severity();
            if !is_start && state.current_entry.is_valid() {
                let info = LogEntryInfo {
                    entry_index: state.current_entry,
                    first_line: state.current_first_line,
                };
                state.indices.push(info);
            } else {
                let entry_index = state.next_entry_index();
                state.current_entry = entry_index;
                state.current_first_line = LogLineIndex::new(absolute);
                state.indices.push(LogEntryInfo {
                    entry_index,
                    first_line: state.current_first_line,
                });
            }
            state.watermark = absolute + 1;
            state.dirty = true;
        }
        state.full_section = LogSourceSection::minimum_bounding(state.full_section, section);
    }

    fn publish(&self) {
        let (count, watermark, total) = {
            let state = self.state.lock();
            (
                state.indices.len(),
                state.watermark,
                state.full_section.count,
            )
        };
        let percentage = self.core.processed_percentage(watermark, total);
        {
            let mut properties = self.core.properties.write();
            properties.set(
                LogProperty::PercentageProcessed,
                PropertyValue::Percentage(percentage),
            );
            properties.set(LogProperty::LogEntryCount, PropertyValue::Count(count as i64));
        }
        self.core.listeners.on_read(count);

        let caught_up = {
            let state = self.state.lock();
            state.watermark >= state.full_section.end() && self.core.pending.is_empty()
        };
        if caught_up {
            let flush = {
                let mut state = self.state.lock();
                std::mem::take(&mut state.dirty)
            };
            if flush {
                self.core.listeners.flush();
            }
        }
    }
}

impl PipelineStage for MultiLineGrouper {
    fn run_once(&self, cancel: &CancellationToken) -> Duration {
        if self.core.is_disposed() {
            return self.core.max_wait;
        }
        let mut remaining = BATCH_SIZE;
        while remaining > 0 && !cancel.is_cancelled() {
            let Some(modification) = self.core.pending.pop() else {
                break;
            };
            match modification {
                LogModification::Reset => self.handle_reset(),
                LogModification::Removed(section) => self.handle_removed(section),
                LogModification::Appended(section) => {
                    let section = if section.count > remaining {
                        let head = LogSourceSection::new(section.begin(), remaining);
                        let rest = LogSourceSection::new(
                            section.begin() + remaining,
                            section.count - remaining,
                        );
                        self.core
                            .pending
                            .push_front(LogModification::Appended(rest));
                        head
                    } else {
                        section
                    };
                    remaining -= section.count;
                    self.handle_appended(section);
                }
            }
        }
        self.publish();
        if self.core.pending.is_empty() {
            self.core.max_wait
        } else {
            Duration::ZERO
        }
    }
}

impl LogSource for MultiLineGrouper {
    fn columns(&self) -> Vec<LogColumn> {
        self.core.source.columns()
    }

    fn properties(&self) -> Vec<LogProperty> {
        self.core.property_union()
    }

    fn get_property(&self, property: LogProperty) -> PropertyValue {
        self.core.property(property)
    }

    fn set_property(&self, property: LogProperty, value: PropertyValue) {
        self.core.forward_set_property(property, value);
    }

    fn copy_properties(&self, dest: &mut PropertyBag) {
        self.core.copy_properties_into(dest);
    }

    fn count(&self) -> usize {
        if self.core.is_disposed() {
            return 0;
        }
        self.state.lock().indices.len()
    }

    fn get_column(
        &self,
        rows: &[LogLineIndex],
        column: LogColumn,
        dest: &mut ColumnVec,
        dest_offset: usize,
        options: QueryOptions,
    ) -> Result<()> {
        check_destination(dest.len(), dest_offset, rows.len())?;
        check_kind(column, dest)?;
        if self.core.is_disposed() {
            return dest.fill_default(dest_offset, rows.len());
        }
        match column {
            // all rows of an entry answer with the start line's values
            LogColumn::Timestamp | LogColumn::LogLevel => {
                let translated: Vec<LogLineIndex> = {
                    let state = self.state.lock();
                    rows.iter()
                        .map(|row| {
                            row.to_usize()
                                .and_then(|r| state.indices.get(r))
                                .map(|info| info.first_line)
                                .unwrap_or(LogLineIndex::INVALID)
                        })
                        .collect()
                };
                self.core
                    .source
                    .get_column(&translated, column, dest, dest_offset, options)
            }
            LogColumn::LogEntryIndex => {
                let state = self.state.lock();
                let out = dest.entry_indices_mut().expect("kind checked");
                for (i, row) in rows.iter().enumerate() {
                    out[dest_offset + i] = row
                        .to_usize()
                        .and_then(|r| state.indices.get(r))
                        .map(|info| info.entry_index)
                        .unwrap_or(LogEntryIndex::INVALID);
                }
                Ok(())
            }
            // the grouper preserves the row set
            _ => self
                .core
                .source
                .get_column(rows, column, dest, dest_offset, options),
        }
    }

    fn original_line_index_of(&self, original: LogLineIndex) -> LogLineIndex {
        if self.core.is_disposed() {
            return LogLineIndex::INVALID;
        }
        // rows are preserved 1:1
        self.core.source.original_line_index_of(original)
    }

    fn add_listener(
        &self,
        listener: Arc<dyn LogSourceListener>,
        max_wait: Duration,
        max_batch: usize,
    ) -> ListenerId {
        self.core.listeners.add(listener, max_wait, max_batch)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.core.listeners.remove(id);
    }
}

impl Drop for MultiLineGrouper {
    fn drop(&mut self) {
        self.core.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::ColumnKind;
    use crate::memory::InMemoryLogSource;
    use chrono::{DateTime, TimeZone, Utc};
    use logscope_types::{LogLevel, LogLine};
    use parking_lot::Mutex as PlMutex;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, minute, 0).unwrap()
    }

    fn line(raw: &str, timestamp: Option<DateTime<Utc>>, level: LogLevel) -> LogLine {
        LogLine {
            timestamp,
            level,
            ..LogLine::new(LogLineIndex::INVALID, raw)
        }
    }

    fn drain(stage: &Arc<MultiLineGrouper>) {
        let cancel = CancellationToken::new();
        while stage.run_once(&cancel).is_zero() {}
    }

    fn entry_indices(stage: &Arc<MultiLineGrouper>, rows: usize) -> Vec<LogEntryIndex> {
        let indices: Vec<LogLineIndex> = (0..rows).map(LogLineIndex::new).collect();
        let mut dest = ColumnVec::with_default(ColumnKind::EntryIndex, rows);
        stage
            .get_column(
                &indices,
                LogColumn::LogEntryIndex,
                &mut dest,
                0,
                QueryOptions::default(),
            )
            .unwrap();
        dest.entry_indices().unwrap().to_vec()
    }

    fn fused_source() -> (Arc<InMemoryLogSource>, Arc<MultiLineGrouper>) {
        let source = Arc::new(InMemoryLogSource::new());
        source.push(line("10:00 INFO a", Some(ts(0)), LogLevel::Info));
        source.push(line("  at foo", None, LogLevel::None));
        source.push(line("10:01 WARN b", Some(ts(1)), LogLevel::Warning));
        let grouper = MultiLineGrouper::new(source.clone(), Duration::ZERO);
        (source, grouper)
    }

    #[test]
    fn test_basic_fuse() {
        let (_source, grouper) = fused_source();
        drain(&grouper);

        assert_eq!(grouper.count(), 3);
        assert_eq!(
            entry_indices(&grouper, 3),
            vec![
                LogEntryIndex::new(0),
                LogEntryIndex::new(0),
                LogEntryIndex::new(1),
            ]
        );
        assert_eq!(
            grouper.get_property(LogProperty::LogEntryCount),
            PropertyValue::Count(3)
        );

        // the continuation row answers with its entry's start timestamp
        let mut dest = ColumnVec::with_default(ColumnKind::Timestamp, 1);
        grouper
            .get_column(
                &[LogLineIndex::new(1)],
                LogColumn::Timestamp,
                &mut dest,
                0,
                QueryOptions::default(),
            )
            .unwrap();
        assert_eq!(dest.timestamps().unwrap(), &[Some(ts(0))]);
    }

    #[test]
    fn test_level_translated_raw_content_passed_through() {
        let (_source, grouper) = fused_source();
        drain(&grouper);

        let mut levels = ColumnVec::with_default(ColumnKind::Level, 3);
        grouper
            .get_column(
                &(0..3).map(LogLineIndex::new).collect::<Vec<_>>(),
                LogColumn::LogLevel,
                &mut levels,
                0,
                QueryOptions::default(),
            )
            .unwrap();
        assert_eq!(
            levels.levels().unwrap(),
            &[LogLevel::Info, LogLevel::Info, LogLevel::Warning]
        );

        let mut raw = ColumnVec::with_default(ColumnKind::Text, 1);
        grouper
            .get_column(
                &[LogLineIndex::new(1)],
                LogColumn::RawContent,
                &mut raw,
                0,
                QueryOptions::default(),
            )
            .unwrap();
        assert_eq!(raw.texts().unwrap(), &["  at foo".to_string()]);
    }

    #[test]
    fn test_out_of_range_rows_yield_invalid_entry() {
        let (_source, grouper) = fused_source();
        drain(&grouper);
        assert_eq!(
            entry_indices(&grouper, 4)[3],
            LogEntryIndex::INVALID
        );
    }

    #[test]
    fn test_consecutive_starts_get_distinct_entries() {
        let source = Arc::new(InMemoryLogSource::new());
        source.push(line("ERROR boom", None, LogLevel::Error));
        source.push(line("ERROR again", None, LogLevel::Error));
        source.push(line("  trace", None, LogLevel::None));
        let grouper = MultiLineGrouper::new(source, Duration::ZERO);
        drain(&grouper);

        assert_eq!(
            entry_indices(&grouper, 3),
            vec![
                LogEntryIndex::new(0),
                LogEntryIndex::new(1),
                LogEntryIndex::new(1),
            ]
        );
    }

    #[test]
    fn test_leading_continuation_opens_entry_zero() {
        let source = Arc::new(InMemoryLogSource::new());
        source.push(line("  dangling continuation", None, LogLevel::None));
        source.push(line("INFO first real entry", None, LogLevel::Info));
        let grouper = MultiLineGrouper::new(source, Duration::ZERO);
        drain(&grouper);

        assert_eq!(
            entry_indices(&grouper, 2),
            vec![LogEntryIndex::new(0), LogEntryIndex::new(1)]
        );
    }

    #[test]
    fn test_removal_rewinds_and_continues_entry_numbering() {
        let source = Arc::new(InMemoryLogSource::new());
        source.push(line("INFO a", None, LogLevel::Info));
        source.push(line("  cont", None, LogLevel::None));
        source.push(line("WARN b", None, LogLevel::Warning));
        let grouper = MultiLineGrouper::new(source.clone(), Duration::ZERO);
        drain(&grouper);
        assert_eq!(grouper.count(), 3);

        // retract the continuation and everything after it
        source.remove_from(1);
        drain(&grouper);
        assert_eq!(grouper.count(), 1);

        // re-append: the first line after the cut starts a fresh entry
        source.push(line("  new cont", None, LogLevel::None));
        drain(&grouper);
        assert_eq!(
            entry_indices(&grouper, 2),
            vec![LogEntryIndex::new(0), LogEntryIndex::new(1)]
        );
    }

    #[test]
    fn test_reset_empties_everything() {
        let (source, grouper) = fused_source();
        drain(&grouper);
        assert_eq!(grouper.count(), 3);

        source.clear();
        drain(&grouper);
        assert_eq!(grouper.count(), 0);
        assert_eq!(
            grouper.get_property(LogProperty::LogEntryCount),
            PropertyValue::Count(0)
        );
        assert_eq!(entry_indices(&grouper, 1), vec![LogEntryIndex::INVALID]);
    }

    #[test]
    fn test_listener_sees_appends_removal_reset() {
        #[derive(Default)]
        struct Recorder {
            events: PlMutex<Vec<LogModification>>,
        }
        impl LogSourceListener for Recorder {
            fn on_log_modified(&self, modification: LogModification) {
                self.events.lock().push(modification);
            }
        }

        let (source, grouper) = fused_source();
        let recorder = Arc::new(Recorder::default());
        grouper.add_listener(recorder.clone(), Duration::ZERO, 1000);
        drain(&grouper);
        assert_eq!(
            std::mem::take(&mut *recorder.events.lock()),
            vec![LogModification::Reset, LogModification::appended(0, 3)]
        );

        source.remove_from(2);
        drain(&grouper);
        assert_eq!(
            std::mem::take(&mut *recorder.events.lock()),
            vec![LogModification::removed(2, 1)]
        );

        source.clear();
        drain(&grouper);
        assert_eq!(
            std::mem::take(&mut *recorder.events.lock()),
            vec![LogModification::Reset]
        );
    }

    #[test]
    fn test_percentage_reaches_one_when_caught_up() {
        let (_source, grouper) = fused_source();
        drain(&grouper);
        assert_eq!(
            grouper.get_property(LogProperty::PercentageProcessed),
            PropertyValue::Percentage(1.0)
        );
    }

    #[test]
    fn test_disposed_stage_serves_defaults() {
        let (_source, grouper) = fused_source();
        drain(&grouper);
        grouper.dispose();

        assert_eq!(grouper.count(), 0);
        assert_eq!(entry_indices(&grouper, 2), vec![LogEntryIndex::INVALID; 2]);
        assert_eq!(
            grouper.get_property(LogProperty::LogEntryCount),
            PropertyValue::Count(0)
        );
    }
}
