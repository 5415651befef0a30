//! Column-oriented entry buffer.
//!
//! [`ColumnarBuffer`] is the unit by which stages exchange rows: a fixed row
//! count with one typed vector per declared column. Storage is per-column
//! rather than per-row so bulk transfer touches contiguous memory.

use logscope_types::LogLineIndex;

use crate::columns::{ColumnVec, LogColumn};
use crate::error::{check_destination, EngineError, Result};
use crate::source::{LogSource, QueryOptions};

/// A row-count × column-set container of log entry data.
pub struct ColumnarBuffer {
    rows: usize,
    columns: Vec<(LogColumn, ColumnVec)>,
}

impl ColumnarBuffer {
    /// Create a buffer of `rows` default-filled rows over the given columns.
    ///
    /// Duplicate column tags are collapsed to one vector.
    pub fn new(rows: usize, columns: &[LogColumn]) -> Self {
        let mut storage: Vec<(LogColumn, ColumnVec)> = Vec::with_capacity(columns.len());
        for &column in columns {
            if storage.iter().any(|(tag, _)| *tag == column) {
                continue;
            }
            storage.push((column, ColumnVec::with_default(column.kind(), rows)));
        }
        Self {
            rows,
            columns: storage,
        }
    }

    /// A buffer over the minimum column set.
    pub fn minimal(rows: usize) -> Self {
        Self::new(rows, &LogColumn::MINIMUM)
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column_tags(&self) -> Vec<LogColumn> {
        self.columns.iter().map(|(tag, _)| *tag).collect()
    }

    pub fn has_column(&self, column: LogColumn) -> bool {
        self.columns.iter().any(|(tag, _)| *tag == column)
    }

    pub fn column(&self, column: LogColumn) -> Option<&ColumnVec> {
        self.columns
            .iter()
            .find(|(tag, _)| *tag == column)
            .map(|(_, vec)| vec)
    }

    pub fn column_mut(&mut self, column: LogColumn) -> Option<&mut ColumnVec> {
        self.columns
            .iter_mut()
            .find(|(tag, _)| *tag == column)
            .map(|(_, vec)| vec)
    }

    /// Grow or shrink every column to `rows`, default-filling new cells.
    pub fn resize(&mut self, rows: usize) {
        for (_, vec) in &mut self.columns {
            vec.resize_default(rows);
        }
        self.rows = rows;
    }

    /// Write each column's default into `[start, start + count)`.
    pub fn fill_default(&mut self, start: usize, count: usize) -> Result<()> {
        check_destination(self.rows, start, count)?;
        for (_, vec) in &mut self.columns {
            vec.fill_default(start, count)?;
        }
        Ok(())
    }

    /// Fetch `source_rows.len()` cells of `column` from `source` into this
    /// buffer starting at `dest_start`.
    pub fn copy_from(
        &mut self,
        column: LogColumn,
        dest_start: usize,
        source: &dyn LogSource,
        source_rows: &[LogLineIndex],
        options: QueryOptions,
    ) -> Result<()> {
        check_destination(self.rows, dest_start, source_rows.len())?;
        let vec = self
            .column_mut(column)
            .ok_or(EngineError::ColumnMissing(column))?;
        source.get_column(source_rows, column, vec, dest_start, options)
    }

    /// A read-write restriction of this buffer to a subset of its columns,
    /// sharing storage with the parent.
    pub fn view(&mut self, columns: &[LogColumn]) -> ColumnarBufferView<'_> {
        ColumnarBufferView {
            allowed: columns
                .iter()
                .copied()
                .filter(|c| self.has_column(*c))
                .collect(),
            buffer: self,
        }
    }
}

/// Restriction of a [`ColumnarBuffer`] to a subset of its columns.
pub struct ColumnarBufferView<'a> {
    buffer: &'a mut ColumnarBuffer,
    allowed: Vec<LogColumn>,
}

impl ColumnarBufferView<'_> {
    pub fn row_count(&self) -> usize {
        self.buffer.row_count()
    }

    pub fn column_tags(&self) -> Vec<LogColumn> {
        self.allowed.clone()
    }

    pub fn column(&self, column: LogColumn) -> Option<&ColumnVec> {
        if !self.allowed.contains(&column) {
            return None;
        }
        self.buffer.column(column)
    }

    pub fn column_mut(&mut self, column: LogColumn) -> Result<&mut ColumnVec> {
        if !self.allowed.contains(&column) {
            return Err(EngineError::ColumnNotInView(column));
        }
        self.buffer
            .column_mut(column)
            .ok_or(EngineError::ColumnMissing(column))
    }

    /// Default-fill the exposed columns only.
    pub fn fill_default(&mut self, start: usize, count: usize) -> Result<()> {
        check_destination(self.buffer.rows, start, count)?;
        for column in self.allowed.clone() {
            if let Some(vec) = self.buffer.column_mut(column) {
                vec.fill_default(start, count)?;
            }
        }
        Ok(())
    }

    pub fn copy_from(
        &mut self,
        column: LogColumn,
        dest_start: usize,
        source: &dyn LogSource,
        source_rows: &[LogLineIndex],
        options: QueryOptions,
    ) -> Result<()> {
        if !self.allowed.contains(&column) {
            return Err(EngineError::ColumnNotInView(column));
        }
        self.buffer
            .copy_from(column, dest_start, source, source_rows, options)
    }

    /// Fetch every exposed column for `source_rows` in one pass.
    pub fn read_entries(
        &mut self,
        source: &dyn LogSource,
        source_rows: &[LogLineIndex],
        dest_start: usize,
        options: QueryOptions,
    ) -> Result<()> {
        for column in self.allowed.clone() {
            self.buffer
                .copy_from(column, dest_start, source, source_rows, options)?;
        }
        Ok(())
    }
}
