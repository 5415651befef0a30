//! A push-based in-memory log source.
//!
//! [`InMemoryLogSource`] is the reference [`LogSource`] implementation and
//! the head of a pipeline in tests and embedded use: callers push raw lines
//! (parsed on the way in) or pre-built [`LogLine`]s, retract a suffix, or
//! clear the source; listeners see the corresponding modifications. Each
//! physical line is its own logical entry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use logscope_types::{LogEntryIndex, LogFormat, LogLine, LogLineIndex};

use crate::columns::{check_kind, ColumnVec, LogColumn};
use crate::error::{check_destination, Result};
use crate::fanout::ListenerFanout;
use crate::parser::LogLineParser;
use crate::properties::{LogProperty, PropertyBag, PropertyValue};
use crate::source::{ListenerId, LogSource, LogSourceListener, QueryOptions};

struct Store {
    lines: Vec<LogLine>,
    json_lines: usize,
    size_bytes: u64,
    start_timestamp: Option<DateTime<Utc>>,
    end_timestamp: Option<DateTime<Utc>>,
    max_characters: usize,
}

impl Store {
    fn new() -> Self {
        Self {
            lines: Vec::new(),
            json_lines: 0,
            size_bytes: 0,
            start_timestamp: None,
            end_timestamp: None,
            max_characters: 0,
        }
    }

    fn format(&self) -> Option<LogFormat> {
        if self.lines.is_empty() {
            None
        } else if self.json_lines == self.lines.len() {
            Some(LogFormat::Json)
        } else if self.json_lines == 0 {
            Some(LogFormat::PlainText)
        } else {
            Some(LogFormat::Mixed)
        }
    }

    /// Recompute the derived extremes after a retraction.
    fn rescan(&mut self) {
        self.start_timestamp = self.lines.iter().find_map(|l| l.timestamp);
        self.end_timestamp = self.lines.iter().rev().find_map(|l| l.timestamp);
        self.max_characters = self.lines.iter().map(|l| l.raw.chars().count()).max().unwrap_or(0);
    }
}

/// An always-caught-up log source backed by a vector of parsed lines.
pub struct InMemoryLogSource {
    store: RwLock<Store>,
    properties: RwLock<PropertyBag>,
    listeners: ListenerFanout,
}

impl Default for InMemoryLogSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLogSource {
    pub fn new() -> Self {
        let mut bag = PropertyBag::with_defaults(&LogProperty::MINIMUM);
        bag.set(LogProperty::MaxCharactersPerLine, PropertyValue::Count(0));
        // an empty in-memory source is already fully processed
        bag.set(LogProperty::PercentageProcessed, PropertyValue::Percentage(1.0));
        Self {
            store: RwLock::new(Store::new()),
            properties: RwLock::new(bag),
            listeners: ListenerFanout::new(),
        }
    }

    /// Parse and append one raw line.
    pub fn push_line(&self, raw: &str) {
        let line = LogLineParser::parse(LogLineIndex::INVALID, raw);
        self.push(line);
    }

    /// Parse and append several raw lines.
    pub fn push_lines(&self, raws: &[&str]) {
        for raw in raws {
            let line = LogLineParser::parse(LogLineIndex::INVALID, raw);
            self.append(line);
        }
        self.publish();
    }

    /// Append a pre-built line; its indices are assigned by the source.
    pub fn push(&self, line: LogLine) {
        self.append(line);
        self.publish();
    }

    fn append(&self, mut line: LogLine) {
        let mut store = self.store.write();
        let index = store.lines.len();
        line.source_index = LogLineIndex::new(index);
        line.entry_index = LogEntryIndex::new(index);
        if LogLineParser::is_json_line(&line.raw) {
            store.json_lines += 1;
        }
        store.size_bytes += line.raw.len() as u64 + 1;
        if store.start_timestamp.is_none() {
            store.start_timestamp = line.timestamp;
        }
        if line.timestamp.is_some() {
            store.end_timestamp = line.timestamp;
        }
        store.max_characters = store.max_characters.max(line.raw.chars().count());
        store.lines.push(line);
    }

    /// Retract every line at or past `index`.
    pub fn remove_from(&self, index: usize) {
        let removed = {
            let mut guard = self.store.write();
            let store = &mut *guard;
            if index >= store.lines.len() {
                0
            } else {
                let removed = store.lines.len() - index;
                for line in &store.lines[index..] {
                    if LogLineParser::is_json_line(&line.raw) {
                        store.json_lines -= 1;
                    }
                    store.size_bytes -= line.raw.len() as u64 + 1;
                }
                store.lines.truncate(index);
                store.rescan();
                removed
            }
        };
        if removed > 0 {
            self.recompute_properties();
            self.listeners.invalidate(index, removed);
        }
    }

    /// Drop all lines.
    pub fn clear(&self) {
        {
            let mut store = self.store.write();
            *store = Store::new();
        }
        self.recompute_properties();
        self.listeners.reset();
    }

    pub fn len(&self) -> usize {
        self.store.read().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self) {
        self.recompute_properties();
        let count = self.len();
        self.listeners.on_read(count);
        // an in-memory source is caught up after every mutation
        self.listeners.flush();
    }

    fn recompute_properties(&self) {
        let mut snapshot = PropertyBag::new();
        {
            let store = self.store.read();
            snapshot.set(LogProperty::PercentageProcessed, PropertyValue::Percentage(1.0));
            snapshot.set(
                LogProperty::LogEntryCount,
                PropertyValue::Count(store.lines.len() as i64),
            );
            snapshot.set(LogProperty::EmptyReason, PropertyValue::EmptyReason(None));
            snapshot.set(
                LogProperty::StartTimestamp,
                PropertyValue::Timestamp(store.start_timestamp),
            );
            snapshot.set(
                LogProperty::EndTimestamp,
                PropertyValue::Timestamp(store.end_timestamp),
            );
            snapshot.set(LogProperty::Size, PropertyValue::Size(Some(store.size_bytes)));
            snapshot.set(LogProperty::Format, PropertyValue::Format(store.format()));
            snapshot.set(
                LogProperty::MaxCharactersPerLine,
                PropertyValue::Count(store.max_characters as i64),
            );
        }
        let mut properties = self.properties.write();
        snapshot.copy_to(&mut properties);
    }
}

impl LogSource for InMemoryLogSource {
    fn columns(&self) -> Vec<LogColumn> {
        LogColumn::MINIMUM.to_vec()
    }

    fn properties(&self) -> Vec<LogProperty> {
        self.properties.read().properties()
    }

    fn get_property(&self, property: LogProperty) -> PropertyValue {
        self.properties.read().get_or_default(property)
    }

    fn set_property(&self, _property: LogProperty, _value: PropertyValue) {
        // every property of this source derives from its content
    }

    fn copy_properties(&self, dest: &mut PropertyBag) {
        self.properties.read().copy_to(dest);
    }

    fn count(&self) -> usize {
        self.len()
    }

    fn get_column(
        &self,
        rows: &[LogLineIndex],
        column: LogColumn,
        dest: &mut ColumnVec,
        dest_offset: usize,
        _options: QueryOptions,
    ) -> Result<()> {
        check_destination(dest.len(), dest_offset, rows.len())?;
        check_kind(column, dest)?;
        let store = self.store.read();
        let lines = &store.lines;
        let line_at = |row: &LogLineIndex| row.to_usize().and_then(|i| lines.get(i));

        match column {
            LogColumn::Index | LogColumn::OriginalIndex => {
                let out = dest.line_indices_mut().expect("kind checked");
                for (i, row) in rows.iter().enumerate() {
                    out[dest_offset + i] = match line_at(row) {
                        Some(line) => line.source_index,
                        None => LogLineIndex::INVALID,
                    };
                }
            }
            LogColumn::LogEntryIndex => {
                let out = dest.entry_indices_mut().expect("kind checked");
                for (i, row) in rows.iter().enumerate() {
                    out[dest_offset + i] = match line_at(row) {
                        Some(line) => line.entry_index,
                        None => LogEntryIndex::INVALID,
                    };
                }
            }
            LogColumn::LineNumber | LogColumn::OriginalLineNumber => {
                let out = dest.numbers_mut().expect("kind checked");
                for (i, row) in rows.iter().enumerate() {
                    out[dest_offset + i] = match line_at(row) {
                        Some(line) => line.source_index.value() + 1,
                        None => 0,
                    };
                }
            }
            LogColumn::RawContent => {
                let out = dest.texts_mut().expect("kind checked");
                for (i, row) in rows.iter().enumerate() {
                    out[dest_offset + i] = match line_at(row) {
                        Some(line) => line.raw.clone(),
                        None => String::new(),
                    };
                }
            }
            LogColumn::LogLevel => {
                let out = dest.levels_mut().expect("kind checked");
                for (i, row) in rows.iter().enumerate() {
                    out[dest_offset + i] = line_at(row).map(|l| l.level).unwrap_or_default();
                }
            }
            LogColumn::Timestamp => {
                let out = dest.timestamps_mut().expect("kind checked");
                for (i, row) in rows.iter().enumerate() {
                    out[dest_offset + i] = line_at(row).and_then(|l| l.timestamp);
                }
            }
            LogColumn::ElapsedTime => {
                let out = dest.durations_mut().expect("kind checked");
                let start = store.start_timestamp;
                for (i, row) in rows.iter().enumerate() {
                    out[dest_offset + i] = match (line_at(row).and_then(|l| l.timestamp), start) {
                        (Some(ts), Some(start)) => Some(ts - start),
                        _ => None,
                    };
                }
            }
            LogColumn::DeltaTime => {
                let out = dest.durations_mut().expect("kind checked");
                for (i, row) in rows.iter().enumerate() {
                    out[dest_offset + i] = match row.to_usize() {
                        Some(r) if r > 0 => match (
                            lines.get(r).and_then(|l| l.timestamp),
                            lines.get(r - 1).and_then(|l| l.timestamp),
                        ) {
                            (Some(cur), Some(prev)) => Some(cur - prev),
                            _ => None,
                        },
                        _ => None,
                    };
                }
            }
        }
        Ok(())
    }

    fn add_listener(
        &self,
        listener: Arc<dyn LogSourceListener>,
        max_wait: Duration,
        max_batch: usize,
    ) -> ListenerId {
        self.listeners.add(listener, max_wait, max_batch)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.remove(id);
    }
}
