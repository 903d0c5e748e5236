//! Core domain types, filter transitions, and the aggregation engine.

pub mod types {
    use serde::{Deserialize, Serialize};

    /// Seconds since the Unix epoch, as reported by the log service.
    pub type Timestamp = i64;

    #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    pub struct Level(pub String);

    impl Level {
        pub fn new(name: impl Into<String>) -> Self {
            Self(name.into())
        }

        pub fn as_str(&self) -> &str {
            &self.0
        }
    }

    impl std::fmt::Display for Level {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    /// One log message as returned by the service.
    ///
    /// `name` on the wire is a composite `prefix:logger:line` identifier; the
    /// prefix is the level string the server stamps when writing the line and
    /// is discarded on parse.
    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct LogRecord {
        #[serde(rename = "ts")]
        pub timestamp: Timestamp,
        #[serde(rename = "name")]
        pub raw_name: String,
        #[serde(rename = "msg")]
        pub message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub detail: Option<Vec<String>>,
    }

    impl LogRecord {
        pub fn has_detail(&self) -> bool {
            self.detail.is_some()
        }
    }

    /// Logger path and source line parsed out of a composite `raw_name`.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct SourceRef {
        pub logger: String,
        pub line: String,
    }

    impl SourceRef {
        /// Parse `prefix:logger:line`. Returns `None` when the name has fewer
        /// than three segments; extra segments beyond the third are ignored.
        pub fn parse(raw_name: &str) -> Option<Self> {
            let mut segments = raw_name.split(':');
            let _prefix = segments.next()?;
            let logger = segments.next()?;
            let line = segments.next()?;
            Some(Self { logger: logger.to_string(), line: line.to_string() })
        }
    }

    /// A record that passed the filter pass, stamped with its source level
    /// and the fields derived from `raw_name`.
    #[derive(Clone, Debug, PartialEq, Eq, Serialize)]
    pub struct VisibleRecord {
        pub timestamp: Timestamp,
        pub level: Level,
        pub logger: String,
        pub line: String,
        pub message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub detail: Option<Vec<String>>,
    }

    impl VisibleRecord {
        pub fn has_detail(&self) -> bool {
            self.detail.is_some()
        }
    }
}

pub mod filters {
    use serde::{Deserialize, Serialize};

    use crate::loglens_core::types::LogRecord;

    /// Saved filters plus the transient text being typed.
    ///
    /// A filter string lives in `active` or `inactive`, never both; toggling
    /// moves it between them. Duplicate strings are allowed and, being plain
    /// values, indistinguishable: toggle and delete act on every entry with
    /// the matching text.
    #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct FilterSet {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub active: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub inactive: Vec<String>,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub current: String,
    }

    impl FilterSet {
        pub fn set_current(&mut self, text: impl Into<String>) {
            self.current = text.into();
        }

        pub fn clear_current(&mut self) {
            self.current.clear();
        }

        /// Append the current text to the active set and clear it. A
        /// whitespace-only current text leaves everything untouched,
        /// including the text itself.
        pub fn save_current(&mut self) {
            if self.current.trim().is_empty() {
                return;
            }
            let text = std::mem::take(&mut self.current);
            self.active.push(text);
        }

        /// Move `text` to whichever of active/inactive does not own it.
        /// Unknown text is a no-op.
        pub fn toggle(&mut self, text: &str) {
            if let Some(count) = drain_matching(&mut self.active, text) {
                extend_with(&mut self.inactive, text, count);
            } else if let Some(count) = drain_matching(&mut self.inactive, text) {
                extend_with(&mut self.active, text, count);
            }
        }

        /// Remove `text` from whichever set owns it.
        pub fn delete(&mut self, text: &str) {
            self.active.retain(|filter| filter != text);
            self.inactive.retain(|filter| filter != text);
        }

        pub fn is_active(&self, text: &str) -> bool {
            self.active.iter().any(|filter| filter == text)
        }

        /// Active filters plus the current text when it trims non-empty. The
        /// untrimmed text is what matches, mirroring what a save would keep.
        pub fn effective(&self) -> Vec<&str> {
            let mut filters: Vec<&str> = self.active.iter().map(String::as_str).collect();
            if !self.current.trim().is_empty() {
                filters.push(self.current.as_str());
            }
            filters
        }
    }

    fn drain_matching(set: &mut Vec<String>, text: &str) -> Option<usize> {
        let before = set.len();
        set.retain(|filter| filter != text);
        let removed = before - set.len();
        (removed > 0).then_some(removed)
    }

    fn extend_with(set: &mut Vec<String>, text: &str, count: usize) {
        set.extend(std::iter::repeat_with(|| text.to_string()).take(count));
    }

    /// A record passes an empty filter list unconditionally. Otherwise any
    /// filter must be a case-sensitive substring of the message or the raw
    /// name; only when neither matched, and the record carries detail lines,
    /// a match inside the detail rescues it.
    pub fn matches_record(filters: &[&str], record: &LogRecord) -> bool {
        if filters.is_empty() {
            return true;
        }
        let direct = filters.iter().any(|filter| {
            record.message.contains(filter) || record.raw_name.contains(filter)
        });
        if direct {
            return true;
        }
        match &record.detail {
            Some(lines) => lines
                .iter()
                .any(|line| filters.iter().any(|filter| line.contains(filter))),
            None => false,
        }
    }
}

pub mod state {
    use std::collections::{BTreeMap, BTreeSet};

    use chrono::NaiveDate;
    use serde::{Deserialize, Serialize};
    use tracing::warn;

    use crate::loglens_core::filters::{matches_record, FilterSet};
    use crate::loglens_core::types::{Level, LogRecord, SourceRef, Timestamp, VisibleRecord};

    pub const DEFAULT_TIMEZONE: &str = "UTC";
    pub const DATE_PARAM_FORMAT: &str = "%Y-%m-%d";

    /// The day, timezone, and severity levels the operator is looking at.
    /// Levels drive both which batches get fetched and which are shown.
    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ViewSelection {
        pub day: NaiveDate,
        pub timezone: String,
        #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
        pub levels: BTreeSet<Level>,
    }

    impl ViewSelection {
        pub fn new(day: NaiveDate) -> Self {
            Self { day, timezone: DEFAULT_TIMEZONE.to_string(), levels: BTreeSet::new() }
        }

        /// Calendar date string the retrieval request carries.
        pub fn date_param(&self) -> String {
            self.day.format(DATE_PARAM_FORMAT).to_string()
        }
    }

    /// All viewer state: selection, the per-level message store, filters,
    /// and the expanded-timestamp set. Mutations are the explicit transition
    /// methods below; the store is only ever written through
    /// `replace_messages`.
    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ViewerState {
        pub selection: ViewSelection,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        messages: BTreeMap<Level, Vec<LogRecord>>,
        #[serde(default)]
        pub filters: FilterSet,
        #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
        expanded: BTreeSet<Timestamp>,
    }

    impl ViewerState {
        pub fn new(day: NaiveDate) -> Self {
            Self {
                selection: ViewSelection::new(day),
                messages: BTreeMap::new(),
                filters: FilterSet::default(),
                expanded: BTreeSet::new(),
            }
        }

        pub fn set_day(&mut self, day: NaiveDate) {
            self.selection.day = day;
        }

        pub fn set_timezone(&mut self, timezone: impl Into<String>) {
            self.selection.timezone = timezone.into();
        }

        pub fn toggle_level(&mut self, level: Level) {
            if !self.selection.levels.remove(&level) {
                self.selection.levels.insert(level);
            }
        }

        /// Wholesale-replace the stored batch for one level. An absent key
        /// means the level was never successfully loaded this session.
        pub fn replace_messages(&mut self, level: Level, records: Vec<LogRecord>) {
            self.messages.insert(level, records);
        }

        pub fn toggle_expanded(&mut self, timestamp: Timestamp) {
            if !self.expanded.remove(&timestamp) {
                self.expanded.insert(timestamp);
            }
        }

        pub fn is_expanded(&self, timestamp: Timestamp) -> bool {
            self.expanded.contains(&timestamp)
        }

        /// Flatten the stored batches for the selected levels, apply the
        /// effective filters, stamp and derive presentation fields, and sort
        /// ascending by timestamp.
        ///
        /// Equal timestamps keep level-name order, then the order of the
        /// level's batch: levels iterate in `BTreeMap` key order and the sort
        /// is stable. Records whose name cannot be parsed are dropped.
        pub fn visible_records(&self) -> Vec<VisibleRecord> {
            let filters = self.filters.effective();
            let mut result = Vec::new();
            for level in &self.selection.levels {
                let Some(records) = self.messages.get(level) else {
                    continue;
                };
                for record in records {
                    if !matches_record(&filters, record) {
                        continue;
                    }
                    let Some(source) = SourceRef::parse(&record.raw_name) else {
                        warn!(name = %record.raw_name, level = %level, "skipping record with malformed name");
                        continue;
                    };
                    result.push(VisibleRecord {
                        timestamp: record.timestamp,
                        level: level.clone(),
                        logger: source.logger,
                        line: source.line,
                        message: record.message.clone(),
                        detail: record.detail.clone(),
                    });
                }
            }
            result.sort_by_key(|record| record.timestamp);
            result
        }
    }
}

pub use filters::FilterSet;
pub use state::{ViewSelection, ViewerState, DATE_PARAM_FORMAT, DEFAULT_TIMEZONE};
pub use types::{Level, LogRecord, SourceRef, Timestamp, VisibleRecord};
