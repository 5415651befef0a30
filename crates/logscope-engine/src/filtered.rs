//! Filtered view over a log source.
//!
//! [`FilteredLogSource`] exposes the monotone subsequence of source rows
//! whose lines pass a [`LineFilter`] and whose logical entries pass an
//! [`EntryFilter`]. Lines of the entry currently being collected are staged
//! until the next entry boundary (or until the stage catches up with the
//! source), then committed as a whole.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use logscope_types::{
    EmptyReason, LogEntryIndex, LogLine, LogLineIndex, LogModification, LogSourceSection,
};

use crate::buffer::ColumnarBuffer;
use crate::columns::{check_kind, ColumnKind, ColumnVec, LogColumn};
use crate::error::{check_destination, Result};
use crate::filter::{EntryFilter, LineFilter};
use crate::properties::{LogProperty, PropertyBag, PropertyValue};
use crate::source::{ListenerId, LogSource, LogSourceListener, QueryOptions};
use crate::stage::{spawn_loop, PipelineStage, StageCore};

/// Source rows processed per scheduling tick.
const BATCH_SIZE: usize = 10_000;

/// Columns fetched from the source while filtering.
const FETCH_COLUMNS: [LogColumn; 5] = [
    LogColumn::Index,
    LogColumn::LogEntryIndex,
    LogColumn::RawContent,
    LogColumn::LogLevel,
    LogColumn::Timestamp,
];

struct FilterState {
    /// Exposed source rows, strictly increasing.
    indices: Vec<LogLineIndex>,
    /// Output entry index per exposed source row.
    entry_indices: HashMap<usize, LogEntryIndex>,
    /// Next source row to process.
    watermark: usize,
    /// Output entry counter; the next accepted entry takes this value.
    next_entry: usize,
    /// Surviving lines of the source entry currently being collected.
    staged: Vec<LogLine>,
    /// Known extent of the source.
    full_section: LogSourceSection,
    max_characters: usize,
    /// Output changed since the last caught-up flush.
    dirty: bool,
}

impl FilterState {
    fn new() -> Self {
        Self {
            indices: Vec::new(),
            entry_indices: HashMap::new(),
            watermark: 0,
            next_entry: 0,
            staged: Vec::new(),
            full_section: LogSourceSection::empty(),
            max_characters: 0,
            dirty: false,
        }
    }

    /// Commit the staged lines as one entry. Does not clear the staging
    /// buffer; the caller decides based on whether this is an entry boundary
    /// or a catch-up commit.
    fn commit_staged(&mut self, entry_filter: &dyn EntryFilter) {
        if self.staged.is_empty() {
            return;
        }
        let last_staged = self.staged.last().map(|line| line.source_index);
        if self.indices.last().copied() == last_staged {
            // the entry was already committed in full; a retried commit must
            // not insert duplicates
            return;
        }
        if !entry_filter.passes(&self.staged) {
            return;
        }
        // a previously committed prefix of this entry keeps its output index
        let existing = self.staged.iter().find_map(|line| {
            line.source_index
                .to_usize()
                .and_then(|i| self.entry_indices.get(&i))
                .copied()
        });
        let entry_index = match existing {
            Some(index) => index,
            None => {
                let index = LogEntryIndex::new(self.next_entry);
                self.next_entry += 1;
                index
            }
        };
        let mut appended = false;
        for line in &self.staged {
            let source_index = line.source_index;
            if self.indices.last().is_some_and(|last| *last >= source_index) {
                continue;
            }
            self.indices.push(source_index);
            if let Some(i) = source_index.to_usize() {
                self.entry_indices.insert(i, entry_index);
            }
            self.max_characters = self.max_characters.max(line.raw.chars().count());
            appended = true;
        }
        if appended {
            self.dirty = true;
        }
    }
}

/// A derived source exposing only the rows that satisfy the line and entry
/// filters of this view.
pub struct FilteredLogSource {
    core: StageCore,
    state: Mutex<FilterState>,
    /// Reusable fetch buffer; only the processing task touches it.
    fetch: Mutex<ColumnarBuffer>,
    line_filter: Arc<dyn LineFilter>,
    entry_filter: Arc<dyn EntryFilter>,
}

impl FilteredLogSource {
    /// Subscribe to `source`. Call [`start`](Self::start) to launch the
    /// processing task, or drive [`PipelineStage::run_once`] directly.
    pub fn new(
        source: Arc<dyn LogSource>,
        line_filter: Arc<dyn LineFilter>,
        entry_filter: Arc<dyn EntryFilter>,
        max_wait: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: StageCore::new(
                source,
                &[
                    LogProperty::PercentageProcessed,
                    LogProperty::LogEntryCount,
                    LogProperty::EmptyReason,
                    LogProperty::MaxCharactersPerLine,
                ],
                max_wait,
                BATCH_SIZE,
            ),
            state: Mutex::new(FilterState::new()),
            fetch: Mutex::new(ColumnarBuffer::new(0, &FETCH_COLUMNS)),
            line_filter,
            entry_filter,
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
        *self.state.lock() = FilterState::new();
    }

    fn handle_reset(&self) {
        let mut state = self.state.lock();
        *state = FilterState::new();
        state.dirty = true;
        drop(state);
        self.core.listeners.reset();
    }

    fn handle_removed(&self, section: LogSourceSection) {
        let cut_source = section.begin();
        let (cut_local, removed) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.full_section =
                LogSourceSection::new(0, cut_source.min(state.full_section.end()));
            state.watermark = state.watermark.min(cut_source);

            let cut_local = state
                .indices
                .partition_point(|index| index.to_usize().is_some_and(|i| i < cut_source));
            let removed = state.indices.len() - cut_local;
            for index in state.indices.drain(cut_local..) {
                if let Some(i) = index.to_usize() {
                    state.entry_indices.remove(&i);
                }
            }
            // the output entry counter resumes after the last preserved entry
            state.next_entry = state
                .indices
                .last()
                .and_then(|index| index.to_usize())
                .and_then(|i| state.entry_indices.get(&i))
                .and_then(|entry| entry.to_usize())
                .map(|entry| entry + 1)
                .unwrap_or(0);
            // re-seed the staging buffer so no line of a retracted entry
            // survives
            state
                .staged
                .retain(|line| line.source_index.to_usize().is_some_and(|i| i < cut_source));
            state.dirty = true;
            (cut_local, removed)
        };
        if removed > 0 {
            self.core.listeners.invalidate(cut_local, removed);
        }
    }

    fn handle_appended(&self, section: LogSourceSection) {
        let mut state = self.state.lock();
        state.full_section = LogSourceSection::minimum_bounding(state.full_section, section);
    }

    /// Filter one batch of source rows starting at the watermark.
    fn process_batch(&self, cancel: &CancellationToken) {
        let (watermark, end) = {
            let state = self.state.lock();
            (state.watermark, state.full_section.end())
        };
        if watermark >= end {
            return;
        }
        let count = (end - watermark).min(BATCH_SIZE);
        let rows: Vec<LogLineIndex> = (watermark..watermark + count).map(LogLineIndex::new).collect();

        let mut fetch = self.fetch.lock();
        if fetch.row_count() < count {
            fetch.resize(count);
        }
        let mut view = fetch.view(&FETCH_COLUMNS);
        if let Err(err) =
            view.read_entries(&*self.core.source, &rows, 0, QueryOptions::default())
        {
            debug!(%err, "failed to fetch source rows, will retry");
            return;
        }
        let source_indices = view
            .column(LogColumn::Index)
            .and_then(|c| c.line_indices())
            .unwrap_or(&[])
            .to_vec();
        let entry_indices = view
            .column(LogColumn::LogEntryIndex)
            .and_then(|c| c.entry_indices())
            .unwrap_or(&[])
            .to_vec();
        let raws = view
            .column(LogColumn::RawContent)
            .and_then(|c| c.texts())
            .unwrap_or(&[])
            .to_vec();
        let levels = view
            .column(LogColumn::LogLevel)
            .and_then(|c| c.levels())
            .unwrap_or(&[])
            .to_vec();
        let timestamps = view
            .column(LogColumn::Timestamp)
            .and_then(|c| c.timestamps())
            .unwrap_or(&[])
            .to_vec();
        drop(fetch);

        let mut guard = self.state.lock();
        let state = &mut *guard;
        for offset in 0..count {
            if cancel.is_cancelled() {
                break;
            }
            let absolute = watermark + offset;
            if absolute < state.watermark {
                continue;
            }
            if source_indices[offset] != LogLineIndex::new(absolute) {
                // the source shrank after this batch was sized; the matching
                // removal is still queued
                debug!(row = absolute, "source row vanished mid-batch");
                break;
            }
            let line = LogLine {
                source_index: LogLineIndex::new(absolute),
                entry_index: entry_indices[offset],
                raw: raws[offset].clone(),
                level: levels[offset],
                timestamp: timestamps[offset],
            };
            let same_entry = state
                .staged
                .first()
                .is_none_or(|first| first.entry_index == line.entry_index);
            if !same_entry {
                // entry boundary: settle the collected entry, then start over
                state.commit_staged(&*self.entry_filter);
                state.staged.clear();
            }
            if self.line_filter.passes(&line) {
                state.staged.push(line);
            }
            state.watermark = absolute + 1;
        }
    }

    fn publish(&self) {
        let caught_up = {
            let state = self.state.lock();
            state.watermark >= state.full_section.end()
        } && self.core.pending.is_empty();

        if caught_up {
            // settle the trailing entry; keep it staged so a later
            // continuation line still sees the whole entry
            let mut state = self.state.lock();
            state.commit_staged(&*self.entry_filter);
        }

        let (count, watermark, total, max_characters) = {
            let state = self.state.lock();
            (
                state.indices.len(),
                state.watermark,
                state.full_section.count,
                state.max_characters,
            )
        };
        let percentage = self.core.processed_percentage(watermark, total);
        let empty_reason = if count == 0 {
            self.core
                .source
                .get_property(LogProperty::EmptyReason)
                .as_empty_reason()
                .or(if self.core.source.count() > 0 {
                    Some(EmptyReason::NoEntriesMatchFilter)
                } else {
                    None
                })
        } else {
            None
        };
        {
            let mut properties = self.core.properties.write();
            properties.set(
                LogProperty::PercentageProcessed,
                PropertyValue::Percentage(percentage),
            );
            properties.set(LogProperty::LogEntryCount, PropertyValue::Count(count as i64));
            properties.set(
                LogProperty::EmptyReason,
                PropertyValue::EmptyReason(empty_reason),
            );
            properties.set(
                LogProperty::MaxCharactersPerLine,
                PropertyValue::Count(max_characters as i64),
            );
        }
        self.core.listeners.on_read(count);

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

impl PipelineStage for FilteredLogSource {
    fn run_once(&self, cancel: &CancellationToken) -> Duration {
        if self.core.is_disposed() {
            return self.core.max_wait;
        }
        while let Some(modification) = self.core.pending.pop() {
            match modification {
                LogModification::Reset => self.handle_reset(),
                LogModification::Removed(section) => self.handle_removed(section),
                LogModification::Appended(section) => self.handle_appended(section),
            }
        }
        self.process_batch(cancel);
        self.publish();

        let behind = {
            let state = self.state.lock();
            state.watermark < state.full_section.end()
        };
        if behind || !self.core.pending.is_empty() {
            Duration::ZERO
        } else {
            self.core.max_wait
        }
    }
}

impl LogSource for FilteredLogSource {
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
            LogColumn::Index => {
                let state = self.state.lock();
                let out = dest.line_indices_mut().expect("kind checked");
                for (i, row) in rows.iter().enumerate() {
                    out[dest_offset + i] = match row.to_usize() {
                        Some(r) if r < state.indices.len() => *row,
                        _ => LogLineIndex::INVALID,
                    };
                }
                Ok(())
            }
            LogColumn::LineNumber => {
                let state = self.state.lock();
                let out = dest.numbers_mut().expect("kind checked");
                for (i, row) in rows.iter().enumerate() {
                    out[dest_offset + i] = match row.to_usize() {
                        Some(r) if r < state.indices.len() => r as i64 + 1,
                        _ => 0,
                    };
                }
                Ok(())
            }
            LogColumn::OriginalIndex => {
                let state = self.state.lock();
                let out = dest.line_indices_mut().expect("kind checked");
                for (i, row) in rows.iter().enumerate() {
                    out[dest_offset + i] = self.translate(&state, *row);
                }
                Ok(())
            }
            LogColumn::LogEntryIndex => {
                let state = self.state.lock();
                let out = dest.entry_indices_mut().expect("kind checked");
                for (i, row) in rows.iter().enumerate() {
                    out[dest_offset + i] = self
                        .translate(&state, *row)
                        .to_usize()
                        .and_then(|source_row| state.entry_indices.get(&source_row))
                        .copied()
                        .unwrap_or(LogEntryIndex::INVALID);
                }
                Ok(())
            }
            LogColumn::DeltaTime => {
                // one batched timestamp query over interleaved
                // (predecessor, row) pairs
                let interleaved: Vec<LogLineIndex> = {
                    let state = self.state.lock();
                    rows.iter()
                        .flat_map(|row| {
                            let predecessor = match row.to_usize() {
                                Some(r) if r > 0 => self.translate(&state, LogLineIndex::new(r - 1)),
                                _ => LogLineIndex::INVALID,
                            };
                            [predecessor, self.translate(&state, *row)]
                        })
                        .collect()
                };
                let mut timestamps =
                    ColumnVec::with_default(ColumnKind::Timestamp, interleaved.len());
                self.core.source.get_column(
                    &interleaved,
                    LogColumn::Timestamp,
                    &mut timestamps,
                    0,
                    options,
                )?;
                let timestamps = timestamps.timestamps().expect("built as timestamps");
                let out = dest.durations_mut().expect("kind checked");
                for i in 0..rows.len() {
                    out[dest_offset + i] = match (timestamps[2 * i], timestamps[2 * i + 1]) {
                        (Some(previous), Some(current)) => Some(current - previous),
                        _ => None,
                    };
                }
                Ok(())
            }
            _ => {
                let translated: Vec<LogLineIndex> = {
                    let state = self.state.lock();
                    rows.iter().map(|row| self.translate(&state, *row)).collect()
                };
                self.core
                    .source
                    .get_column(&translated, column, dest, dest_offset, options)
            }
        }
    }

    fn original_line_index_of(&self, original: LogLineIndex) -> LogLineIndex {
        if self.core.is_disposed() {
            return LogLineIndex::INVALID;
        }
        let state = self.state.lock();
        state
            .indices
            .iter()
            .position(|index| *index == original)
            .map(LogLineIndex::new)
            .unwrap_or(LogLineIndex::INVALID)
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

impl FilteredLogSource {
    /// Map a local row to its source row, or invalid when out of range.
    fn translate(&self, state: &FilterState, row: LogLineIndex) -> LogLineIndex {
        row.to_usize()
            .and_then(|r| state.indices.get(r))
            .copied()
            .unwrap_or(LogLineIndex::INVALID)
    }
}

impl Drop for FilteredLogSource {
    fn drop(&mut self) {
        self.core.dispose();
    }
}
