//! Typed source properties.
//!
//! Every log source answers property queries over a fixed descriptor set.
//! Stages recompute a snapshot per processing tick and publish it in bulk so
//! concurrent readers observe either the old or the new snapshot, never a
//! partial merge.

use chrono::{DateTime, Utc};

use logscope_types::{EmptyReason, LogFormat};

/// Identifies one property of a log source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogProperty {
    /// Fraction of the underlying source this view has processed, in `[0, 1]`.
    PercentageProcessed,
    /// Number of rows this source currently exposes.
    LogEntryCount,
    /// Why the source is empty, when it is.
    EmptyReason,
    /// Timestamp of the first entry, when known.
    StartTimestamp,
    /// Timestamp of the last entry, when known.
    EndTimestamp,
    /// Size of the underlying content in bytes, when known.
    Size,
    /// Detected content format.
    Format,
    /// Length of the longest line exposed by this source.
    MaxCharactersPerLine,
}

impl LogProperty {
    /// The minimum property set every source must answer.
    pub const MINIMUM: [LogProperty; 7] = [
        LogProperty::PercentageProcessed,
        LogProperty::LogEntryCount,
        LogProperty::EmptyReason,
        LogProperty::StartTimestamp,
        LogProperty::EndTimestamp,
        LogProperty::Size,
        LogProperty::Format,
    ];

    pub fn default_value(self) -> PropertyValue {
        match self {
            Self::PercentageProcessed => PropertyValue::Percentage(0.0),
            Self::LogEntryCount => PropertyValue::Count(0),
            Self::EmptyReason => PropertyValue::EmptyReason(None),
            Self::StartTimestamp | Self::EndTimestamp => PropertyValue::Timestamp(None),
            Self::Size => PropertyValue::Size(None),
            Self::Format => PropertyValue::Format(None),
            Self::MaxCharactersPerLine => PropertyValue::Count(0),
        }
    }
}

/// The value of one property.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PropertyValue {
    Percentage(f64),
    Count(i64),
    EmptyReason(Option<EmptyReason>),
    Timestamp(Option<DateTime<Utc>>),
    Size(Option<u64>),
    Format(Option<LogFormat>),
}

impl PropertyValue {
    pub fn as_percentage(&self) -> Option<f64> {
        match self {
            Self::Percentage(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<i64> {
        match self {
            Self::Count(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(v) => *v,
            _ => None,
        }
    }

    pub fn as_empty_reason(&self) -> Option<EmptyReason> {
        match self {
            Self::EmptyReason(v) => *v,
            _ => None,
        }
    }
}

/// A value store over a fixed set of property descriptors.
///
/// The descriptor set is small, so lookups are a linear scan over an inline
/// vector; insertion order is preserved for display.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PropertyBag {
    values: Vec<(LogProperty, PropertyValue)>,
}

impl PropertyBag {
    /// An empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// A bag holding each given property at its default value.
    pub fn with_defaults(properties: &[LogProperty]) -> Self {
        let mut bag = Self::new();
        for &property in properties {
            bag.set(property, property.default_value());
        }
        bag
    }

    pub fn properties(&self) -> Vec<LogProperty> {
        self.values.iter().map(|(p, _)| *p).collect()
    }

    pub fn contains(&self, property: LogProperty) -> bool {
        self.values.iter().any(|(p, _)| *p == property)
    }

    pub fn get(&self, property: LogProperty) -> Option<PropertyValue> {
        self.values
            .iter()
            .find(|(p, _)| *p == property)
            .map(|(_, v)| *v)
    }

    /// Current value, or the descriptor default when unset.
    pub fn get_or_default(&self, property: LogProperty) -> PropertyValue {
        self.get(property).unwrap_or(property.default_value())
    }

    /// Insert or overwrite one value.
    pub fn set(&mut self, property: LogProperty, value: PropertyValue) {
        if let Some(slot) = self.values.iter_mut().find(|(p, _)| *p == property) {
            slot.1 = value;
        } else {
            self.values.push((property, value));
        }
    }

    /// Bulk-copy every value into `dest`, overwriting matching descriptors.
    ///
    /// Callers holding a lock around this call get an atomic snapshot.
    pub fn copy_to(&self, dest: &mut PropertyBag) {
        for (property, value) in &self.values {
            dest.set(*property, *value);
        }
    }
}
