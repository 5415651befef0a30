use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

use logscope_types::{LogLevel, LogLine};

/// Decides whether a single physical line survives filtering.
pub trait LineFilter: Send + Sync {
    fn passes(&self, line: &LogLine) -> bool;
}

/// Decides whether a whole logical entry (its surviving lines, in source
/// order) is exposed.
pub trait EntryFilter: Send + Sync {
    fn passes(&self, lines: &[LogLine]) -> bool;
}

/// Accepts every line and every entry.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl LineFilter for AcceptAll {
    fn passes(&self, _line: &LogLine) -> bool {
        true
    }
}

impl EntryFilter for AcceptAll {
    fn passes(&self, _lines: &[LogLine]) -> bool {
        true
    }
}

/// Adapts a [`LineFilter`]: the entry passes when any of its lines passes.
pub struct AnyLineMatches<F: LineFilter>(pub F);

impl<F: LineFilter> EntryFilter for AnyLineMatches<F> {
    fn passes(&self, lines: &[LogLine]) -> bool {
        lines.iter().any(|line| self.0.passes(line))
    }
}

impl LineFilter for Arc<dyn LineFilter> {
    fn passes(&self, line: &LogLine) -> bool {
        (**self).passes(line)
    }
}

impl EntryFilter for Arc<dyn EntryFilter> {
    fn passes(&self, lines: &[LogLine]) -> bool {
        (**self).passes(lines)
    }
}

/// Compiled filter for log lines
#[derive(Clone)]
pub struct CompiledFilter {
    /// Regex pattern (if any)
    regex: Option<Regex>,

    /// Original pattern string
    pattern: String,

    /// Log levels to include (empty = all)
    levels: HashSet<LogLevel>,

    /// Whether to invert match
    invert: bool,

    /// Case sensitivity
    case_insensitive: bool,
}

impl CompiledFilter {
    /// Create a new filter from a pattern string
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = if pattern.is_empty() {
            None
        } else {
            Some(Regex::new(pattern)?)
        };

        Ok(Self {
            regex,
            pattern: pattern.to_string(),
            levels: HashSet::new(),
            invert: false,
            case_insensitive: false,
        })
    }

    /// Create a case-insensitive filter
    pub fn new_case_insensitive(pattern: &str) -> Result<Self, regex::Error> {
        let regex = if pattern.is_empty() {
            None
        } else {
            // Prepend (?i) for case insensitive matching
            Some(Regex::new(&format!("(?i){}", pattern))?)
        };

        Ok(Self {
            regex,
            pattern: pattern.to_string(),
            levels: HashSet::new(),
            invert: false,
            case_insensitive: true,
        })
    }

    /// Set log levels to filter by
    pub fn with_levels(mut self, levels: HashSet<LogLevel>) -> Self {
        self.levels = levels;
        self
    }

    /// Invert the match
    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    /// Check if a line matches this filter
    pub fn matches(&self, line: &LogLine) -> bool {
        // Check log level filter
        if !self.levels.is_empty() && !self.levels.contains(&line.level) {
            return self.invert;
        }

        // Check regex pattern
        let text_match = match &self.regex {
            Some(re) => re.is_match(&line.raw),
            None => true,
        };

        if self.invert { !text_match } else { text_match }
    }

    /// Find all match positions in a string (for highlighting)
    pub fn find_matches(&self, text: &str) -> Vec<(usize, usize)> {
        match &self.regex {
            Some(re) => re.find_iter(text).map(|m| (m.start(), m.end())).collect(),
            None => Vec::new(),
        }
    }

    /// Get the original pattern
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Check if filter is empty (matches everything)
    pub fn is_empty(&self) -> bool {
        self.regex.is_none() && self.levels.is_empty()
    }

    /// Check if filter has a text pattern
    pub fn has_pattern(&self) -> bool {
        self.regex.is_some()
    }

    /// Check if filter is case insensitive
    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }
}

impl LineFilter for CompiledFilter {
    fn passes(&self, line: &LogLine) -> bool {
        self.matches(line)
    }
}

impl std::fmt::Debug for CompiledFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFilter")
            .field("pattern", &self.pattern)
            .field("levels", &self.levels)
            .field("invert", &self.invert)
            .finish()
    }
}

/// Quick filter presets
pub struct FilterPresets;

impl FilterPresets {
    /// Filter for errors only
    pub fn errors_only() -> CompiledFilter {
        let mut levels = HashSet::new();
        levels.insert(LogLevel::Error);
        levels.insert(LogLevel::Fatal);
        CompiledFilter::new("").unwrap().with_levels(levels)
    }

    /// Filter for warnings and above
    pub fn warnings_and_above() -> CompiledFilter {
        let mut levels = HashSet::new();
        levels.insert(LogLevel::Warning);
        levels.insert(LogLevel::Error);
        levels.insert(LogLevel::Fatal);
        CompiledFilter::new("").unwrap().with_levels(levels)
    }

    /// Filter for a minimum severity
    pub fn min_level(min: LogLevel) -> CompiledFilter {
        let levels = [
            LogLevel::Trace,
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warning,
            LogLevel::Error,
            LogLevel::Fatal,
        ]
        .into_iter()
        .filter(|level| level.ordinal() >= min.ordinal())
        .collect();
        CompiledFilter::new("").unwrap().with_levels(levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logscope_types::LogLineIndex;

    fn line(raw: &str, level: LogLevel) -> LogLine {
        let mut line = LogLine::new(LogLineIndex::new(0), raw);
        line.level = level;
        line
    }

    #[test]
    fn test_regex_filter() {
        let filter = CompiledFilter::new("error").unwrap();
        assert!(filter.matches(&line("an error occurred", LogLevel::None)));
        assert!(!filter.matches(&line("everything is fine", LogLevel::None)));
    }

    #[test]
    fn test_case_insensitive_filter() {
        let filter = CompiledFilter::new_case_insensitive("ERROR").unwrap();
        assert!(filter.is_case_insensitive());
        assert!(filter.matches(&line("an error occurred", LogLevel::None)));
    }

    #[test]
    fn test_level_filter() {
        let filter = FilterPresets::errors_only();
        assert!(filter.matches(&line("test", LogLevel::Error)));
        assert!(!filter.matches(&line("test", LogLevel::Info)));
    }

    #[test]
    fn test_min_level_filter() {
        let filter = FilterPresets::min_level(LogLevel::Warning);
        assert!(filter.matches(&line("x", LogLevel::Fatal)));
        assert!(filter.matches(&line("x", LogLevel::Warning)));
        assert!(!filter.matches(&line("x", LogLevel::Debug)));
        assert!(!filter.matches(&line("x", LogLevel::None)));
    }

    #[test]
    fn test_inverted_filter() {
        let filter = CompiledFilter::new("noise").unwrap().inverted();
        assert!(!filter.matches(&line("noise here", LogLevel::None)));
        assert!(filter.matches(&line("signal", LogLevel::None)));
    }

    #[test]
    fn test_find_matches() {
        let filter = CompiledFilter::new("error").unwrap();
        let matches = filter.find_matches("an error occurred, another error here");
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn test_any_line_matches_entry_filter() {
        let entry_filter = AnyLineMatches(CompiledFilter::new("boom").unwrap());
        let entry = vec![
            line("first", LogLevel::Info),
            line("then boom", LogLevel::None),
        ];
        assert!(entry_filter.passes(&entry));
        assert!(!entry_filter.passes(&entry[..1].to_vec()));
        assert!(!entry_filter.passes(&[]));
    }
}
