//! Per-level fetch coordination.
//!
//! One load issues one retrieval per selected severity level and lets every
//! request settle on its own: a success replaces that level's stored batch, a
//! failure surfaces a level-and-date-scoped notification, and neither blocks
//! the siblings. Overlapping loads are allowed; nothing is deduplicated or
//! cancelled, so the last fetch to settle for a level wins.

use std::sync::atomic::{AtomicUsize, Ordering};

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{info, warn};

use crate::loglens_core::state::ViewSelection;
use crate::loglens_core::types::{Level, LogRecord};

pub const SELECT_LEVELS_NOTICE: &str = "Please select at least one log level to view";

/// Parameters of one per-level retrieval request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageQuery {
    pub level: Level,
    pub date: String,
    pub timezone: String,
}

#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn fetch_messages(&self, query: &MessageQuery) -> Result<Vec<LogRecord>, String>;
}

impl<T> Transport for &T
where
    T: Transport + ?Sized,
{
    async fn fetch_messages(&self, query: &MessageQuery) -> Result<Vec<LogRecord>, String> {
        (*self).fetch_messages(query).await
    }
}

pub trait StateSink {
    fn selection(&self) -> Result<ViewSelection, String>;
    fn replace_messages(&self, level: Level, records: Vec<LogRecord>) -> Result<(), String>;
}

impl<T> StateSink for &T
where
    T: StateSink + ?Sized,
{
    fn selection(&self) -> Result<ViewSelection, String> {
        (*self).selection()
    }

    fn replace_messages(&self, level: Level, records: Vec<LogRecord>) -> Result<(), String> {
        (*self).replace_messages(level, records)
    }
}

/// User-visible, non-blocking notifications.
pub trait Notifier {
    fn info(&self, text: &str);
    fn error(&self, text: &str);
}

impl<T> Notifier for &T
where
    T: Notifier + ?Sized,
{
    fn info(&self, text: &str) {
        (*self).info(text)
    }

    fn error(&self, text: &str) {
        (*self).error(text)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("state error: {0}")]
    State(String),
}

/// What one load invocation did. `requested` is zero when the load was
/// rejected for an empty level selection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub requested: usize,
    pub loaded: Vec<Level>,
    pub failed: Vec<Level>,
}

impl LoadReport {
    pub fn rejected(&self) -> bool {
        self.requested == 0
    }
}

pub struct FetchCoordinator<S, T, N> {
    state: S,
    transport: T,
    notifier: N,
    in_flight: AtomicUsize,
}

impl<S, T, N> FetchCoordinator<S, T, N>
where
    S: StateSink,
    T: Transport,
    N: Notifier,
{
    pub fn new(state: S, transport: T, notifier: N) -> Self {
        Self { state, transport, notifier, in_flight: AtomicUsize::new(0) }
    }

    /// Fetches outstanding across all loads on this coordinator.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Issue one retrieval per selected level and apply each settlement as
    /// it arrives. The in-flight counter is raised by the number of requests
    /// up front and dropped exactly once per settled request, in whatever
    /// order they complete.
    pub async fn load(&self) -> Result<LoadReport, FetchError> {
        let selection = self.state.selection().map_err(FetchError::State)?;
        let levels: Vec<Level> = selection.levels.iter().cloned().collect();
        if levels.is_empty() {
            self.notifier.info(SELECT_LEVELS_NOTICE);
            return Ok(LoadReport::default());
        }

        let date = selection.date_param();
        self.in_flight.fetch_add(levels.len(), Ordering::SeqCst);

        let mut pending: FuturesUnordered<_> = levels
            .iter()
            .map(|level| {
                let query = MessageQuery {
                    level: level.clone(),
                    date: date.clone(),
                    timezone: selection.timezone.clone(),
                };
                async move {
                    let result = self.transport.fetch_messages(&query).await;
                    (query.level, result)
                }
            })
            .collect();

        let mut report =
            LoadReport { requested: levels.len(), loaded: Vec::new(), failed: Vec::new() };
        while let Some((level, result)) = pending.next().await {
            match result {
                Ok(records) => match self.state.replace_messages(level.clone(), records) {
                    Ok(()) => report.loaded.push(level),
                    Err(error) => {
                        warn!(level = %level, %error, "failed to store fetched batch");
                        self.notifier.error(&format!("Failed to store {level} logs: {error}"));
                        report.failed.push(level);
                    }
                },
                Err(error) => {
                    warn!(level = %level, date = %date, %error, "level fetch failed");
                    self.notifier.error(&format!("Failed to load {level} logs for date {date}"));
                    report.failed.push(level);
                }
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        info!(
            requested = report.requested,
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            date = %date,
            "load settled"
        );
        Ok(report)
    }
}
