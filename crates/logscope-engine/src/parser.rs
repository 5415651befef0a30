use chrono::{DateTime, Utc};
use serde_json::Value;

use logscope_types::{LogLevel, LogLine, LogLineIndex};

/// Severity keywords, strongest first. A marker token must equal one of
/// these (case-insensitive) once its surrounding punctuation is stripped,
/// so `[ERROR]`, `error:` and `ERR` all match but `terror` does not.
const SEVERITY_KEYWORDS: [(&str, LogLevel); 13] = [
    ("FATAL", LogLevel::Fatal),
    ("PANIC", LogLevel::Fatal),
    ("CRITICAL", LogLevel::Fatal),
    ("CRIT", LogLevel::Fatal),
    ("ERROR", LogLevel::Error),
    ("ERR", LogLevel::Error),
    ("WARNING", LogLevel::Warning),
    ("WARN", LogLevel::Warning),
    ("INFO", LogLevel::Info),
    ("DEBUG", LogLevel::Debug),
    ("DBG", LogLevel::Debug),
    ("TRACE", LogLevel::Trace),
    ("TRC", LogLevel::Trace),
];

/// Level markers sit near the front of a line; tokens past this point are
/// message content and are not inspected.
const MARKER_SCAN_TOKENS: usize = 6;

/// JSON field names that commonly carry the level.
const JSON_LEVEL_KEYS: [&str; 8] = [
    "level",
    "lvl",
    "severity",
    "log.level",
    "loglevel",
    "log_level",
    "Level",
    "LEVEL",
];

/// Log parser for extracting structure from raw log lines
pub struct LogLineParser;

impl LogLineParser {
    /// Parse a raw line into a [`LogLine`]
    pub fn parse(source_index: LogLineIndex, raw: &str) -> LogLine {
        let mut line = LogLine::new(source_index, raw);

        let (timestamp, content) = Self::split_timestamp(raw);
        line.timestamp = timestamp;

        line.level = match Self::level_from_json(content) {
            Some(level) => level,
            None => Self::level_from_text(content),
        };

        line
    }

    /// Whether the (timestamp-stripped) content is a JSON log line.
    pub fn is_json_line(raw: &str) -> bool {
        let (_, content) = Self::split_timestamp(raw);
        let trimmed = content.trim();
        trimmed.starts_with('{') && serde_json::from_str::<Value>(trimmed).is_ok()
    }

    /// Split a leading RFC3339 timestamp token off the line, if present.
    fn split_timestamp(raw: &str) -> (Option<DateTime<Utc>>, &str) {
        let trimmed = raw.trim_start();
        let (token, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((token, rest)) => (token, rest),
            None => (trimmed, ""),
        };
        match DateTime::parse_from_rfc3339(token) {
            Ok(timestamp) => (Some(timestamp.with_timezone(&Utc)), rest.trim_start()),
            Err(_) => (None, raw),
        }
    }

    /// Extract a level from a JSON log line, or `None` when the content is
    /// not JSON. A JSON line without a recognizable level field yields
    /// `Some(LogLevel::None)`.
    fn level_from_json(content: &str) -> Option<LogLevel> {
        let trimmed = content.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        let value: Value = serde_json::from_str(trimmed).ok()?;
        let object = value.as_object()?;
        let level = JSON_LEVEL_KEYS
            .iter()
            .find_map(|key| object.get(*key))
            .and_then(Self::level_from_json_value)
            .unwrap_or(LogLevel::None);
        Some(level)
    }

    fn level_from_json_value(value: &Value) -> Option<LogLevel> {
        match value {
            Value::String(s) => Some(LogLevel::parse(s)),
            // numeric levels follow the common 10-per-severity convention
            Value::Number(n) => n.as_u64().map(|n| match n {
                0..=10 => LogLevel::Trace,
                11..=20 => LogLevel::Debug,
                21..=30 => LogLevel::Info,
                31..=40 => LogLevel::Warning,
                41..=50 => LogLevel::Error,
                _ => LogLevel::Fatal,
            }),
            _ => None,
        }
    }

    /// Detect a severity marker among the leading tokens of a plain-text
    /// line.
    fn level_from_text(content: &str) -> LogLevel {
        content
            .split_whitespace()
            .take(MARKER_SCAN_TOKENS)
            .find_map(Self::marker_level)
            .unwrap_or(LogLevel::None)
    }

    /// The severity a single token denotes, if any.
    fn marker_level(token: &str) -> Option<LogLevel> {
        let stripped = token.trim_matches(|c: char| !c.is_ascii_alphanumeric());
        if stripped.is_empty() {
            return None;
        }
        SEVERITY_KEYWORDS
            .iter()
            .find(|(keyword, _)| stripped.eq_ignore_ascii_case(keyword))
            .map(|(_, level)| *level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_prefix() {
        let line = LogLineParser::parse(
            LogLineIndex::new(0),
            "2024-01-15T10:30:00.123456789Z some log message",
        );
        assert!(line.timestamp.is_some());
        assert_eq!(line.level, LogLevel::None);

        // offset timestamps work too, not just Zulu time
        let line = LogLineParser::parse(
            LogLineIndex::new(1),
            "2024-01-15T10:30:00+01:00 WARN something",
        );
        assert!(line.timestamp.is_some());
        assert_eq!(line.level, LogLevel::Warning);
    }

    #[test]
    fn test_parse_json_log() {
        let line = LogLineParser::parse(
            LogLineIndex::new(0),
            r#"{"level":"error","msg":"something failed","time":"2024-01-15"}"#,
        );
        assert_eq!(line.level, LogLevel::Error);
        assert!(LogLineParser::is_json_line(line.raw.as_str()));
    }

    #[test]
    fn test_parse_json_numeric_and_unrecognized_levels() {
        let line = LogLineParser::parse(LogLineIndex::new(0), r#"{"level":30,"msg":"x"}"#);
        assert_eq!(line.level, LogLevel::Info);

        let line = LogLineParser::parse(LogLineIndex::new(1), r#"{"level":"notice","msg":"x"}"#);
        assert_eq!(line.level, LogLevel::Other);

        let line = LogLineParser::parse(LogLineIndex::new(2), r#"{"msg":"no level here"}"#);
        assert_eq!(line.level, LogLevel::None);
    }

    #[test]
    fn test_parse_text_marker_styles() {
        for raw in [
            "[ERROR] something went wrong",
            "ERROR: something went wrong",
            "12:30:01 ERROR something went wrong",
            "error - something went wrong",
        ] {
            let line = LogLineParser::parse(LogLineIndex::new(0), raw);
            assert_eq!(line.level, LogLevel::Error, "for {raw:?}");
        }
    }

    #[test]
    fn test_marker_must_be_a_whole_token() {
        // severities embedded in words or deep in the message do not count
        let line = LogLineParser::parse(LogLineIndex::new(0), "terrors and warnings abound");
        assert_eq!(line.level, LogLevel::None);

        let line = LogLineParser::parse(
            LogLineIndex::new(1),
            "one two three four five six seven ERROR",
        );
        assert_eq!(line.level, LogLevel::None);
    }

    #[test]
    fn test_continuation_line_has_no_level() {
        let line = LogLineParser::parse(LogLineIndex::new(1), "  at frob::nicate (lib.rs:42)");
        assert_eq!(line.level, LogLevel::None);
        assert!(line.timestamp.is_none());
    }

    #[test]
    fn test_parse_multibyte_utf8_no_panic() {
        // box-drawing characters are 3 bytes each
        let line = LogLineParser::parse(
            LogLineIndex::new(0),
            "─────────────────────────────────────────",
        );
        assert!(line.timestamp.is_none());

        let line2 = LogLineParser::parse(
            LogLineIndex::new(1),
            "2024-01-15T10:30:00Z ╭────────────────────────────╮",
        );
        assert!(line2.timestamp.is_some());
    }
}
