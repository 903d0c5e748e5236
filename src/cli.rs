use std::{
    collections::BTreeMap,
    env,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use chrono::{DateTime, Local, NaiveDate};
use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};

use crate::colors::{ansi_color, level_color, ANSI_RESET, KNOWN_LEVELS};
use crate::loglens_client::HttpTransport;
use crate::loglens_core::state::{ViewSelection, ViewerState, DATE_PARAM_FORMAT, DEFAULT_TIMEZONE};
use crate::loglens_core::types::{Level, LogRecord, Timestamp};
use crate::loglens_fetch::{
    FetchCoordinator, FetchError, LoadReport, MessageQuery, Notifier, StateSink, Transport,
};

const DEFAULT_SERVER: &str = "http://127.0.0.1:5000";
const CONFIG_FILE_NAME: &str = "loglens.json";
const DT_DISPLAY_FORMAT: &str = "%d/%m/%y %H:%M:%S";

pub type DynError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(name = "loglens", version, about = "Browse per-level application log batches")]
struct Cli {
    #[arg(long)]
    server: Option<String>,
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Day to load, `YYYY-MM-DD`. Defaults to today.
    #[arg(long)]
    date: Option<NaiveDate>,
    #[arg(long)]
    timezone: Option<String>,
    /// Severity level to fetch and show. Repeatable.
    #[arg(long = "level")]
    levels: Vec<String>,
    /// Saved filter applied to the view. Repeatable.
    #[arg(long = "filter")]
    filters: Vec<String>,
    /// Transient filter text, applied without being saved.
    #[arg(long)]
    query: Option<String>,
    /// Timestamp whose detail lines should be expanded. Repeatable.
    #[arg(long = "expand")]
    expand: Vec<Timestamp>,
    #[arg(long, action = clap::ArgAction::SetTrue)]
    expand_all: bool,
    /// List the level names the server has enabled, then exit.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    list_levels: bool,
    /// Use a built-in offline transport instead of the log service.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    demo: bool,
    #[arg(long, action = clap::ArgAction::SetTrue)]
    no_color: bool,
}

#[derive(Debug, Clone)]
struct Config {
    server: String,
    token: Option<String>,
    timezone: String,
    levels: Vec<String>,
    filters: Vec<String>,
}

#[derive(Debug, Default, Clone)]
struct PartialConfig {
    server: Option<String>,
    token: Option<String>,
    timezone: Option<String>,
    levels: Option<Vec<String>>,
    filters: Option<Vec<String>>,
}

impl PartialConfig {
    fn merge(&mut self, other: PartialConfig) {
        if other.server.is_some() {
            self.server = other.server;
        }
        if other.token.is_some() {
            self.token = other.token;
        }
        if other.timezone.is_some() {
            self.timezone = other.timezone;
        }
        if other.levels.is_some() {
            self.levels = other.levels;
        }
        if other.filters.is_some() {
            self.filters = other.filters;
        }
    }
}

impl Config {
    fn from_partial(partial: PartialConfig) -> Self {
        Self {
            server: partial.server.unwrap_or_else(|| DEFAULT_SERVER.to_string()),
            token: partial.token,
            timezone: partial.timezone.unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
            levels: partial.levels.unwrap_or_default(),
            filters: partial.filters.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    #[serde(alias = "url", alias = "baseUrl")]
    server: Option<String>,
    #[serde(alias = "auth_token", alias = "authToken")]
    token: Option<String>,
    #[serde(alias = "tz")]
    timezone: Option<String>,
    levels: Option<Vec<String>>,
    filters: Option<Vec<String>>,
}

impl FileConfig {
    fn into_partial(self) -> PartialConfig {
        PartialConfig {
            server: self.server,
            token: self.token,
            timezone: self.timezone,
            levels: self.levels,
            filters: self.filters,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    ParseFile { path: PathBuf, source: serde_json::Error },
    #[error("config file not found: {path}")]
    MissingConfig { path: PathBuf },
}

fn cli_overrides(cli: &Cli) -> PartialConfig {
    PartialConfig {
        server: cli.server.clone(),
        token: cli.token.clone(),
        timezone: cli.timezone.clone(),
        levels: (!cli.levels.is_empty()).then(|| cli.levels.clone()),
        filters: (!cli.filters.is_empty()).then(|| cli.filters.clone()),
    }
}

fn env_overrides(env: &BTreeMap<String, String>) -> PartialConfig {
    let mut partial = PartialConfig::default();
    if let Some(server) = env.get("LOGLENS_SERVER") {
        partial.server = Some(server.clone());
    }
    if let Some(token) = env.get("LOGLENS_TOKEN").or_else(|| env.get("LOGLENS_AUTH_TOKEN")) {
        if !token.trim().is_empty() {
            partial.token = Some(token.clone());
        }
    }
    if let Some(timezone) = env.get("LOGLENS_TIMEZONE") {
        partial.timezone = Some(timezone.clone());
    }
    if let Some(levels) = env.get("LOGLENS_LEVELS") {
        let parsed = parse_list(levels);
        if !parsed.is_empty() {
            partial.levels = Some(parsed);
        }
    }
    if let Some(filters) = env.get("LOGLENS_FILTERS") {
        let parsed = parse_list(filters);
        if !parsed.is_empty() {
            partial.filters = Some(parsed);
        }
    }
    partial
}

fn parse_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty()).map(str::to_string).collect()
}

fn load_config_file(path: &Path) -> Result<PartialConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    let parsed: FileConfig = serde_json::from_str(&contents)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })?;
    Ok(parsed.into_partial())
}

fn find_config_path(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            break;
        }
    }
    None
}

fn resolve_config(
    cli: &Cli,
    cwd: &Path,
    env: &BTreeMap<String, String>,
) -> Result<(Config, Option<PathBuf>), ConfigError> {
    let mut partial = PartialConfig::default();

    let config_path = if let Some(path) = &cli.config {
        if !path.is_file() {
            return Err(ConfigError::MissingConfig { path: path.clone() });
        }
        Some(path.clone())
    } else {
        find_config_path(cwd)
    };

    if let Some(path) = config_path.as_ref() {
        let file_partial = load_config_file(path)?;
        partial.merge(file_partial);
    }

    partial.merge(env_overrides(env));
    partial.merge(cli_overrides(cli));

    Ok((Config::from_partial(partial), config_path))
}

#[derive(Debug, thiserror::Error)]
enum ViewerError {
    #[error("viewer state lock poisoned")]
    Poisoned,
}

/// The viewer state shared between the coordinator and the renderer.
#[derive(Clone)]
struct SharedViewer {
    inner: Arc<RwLock<ViewerState>>,
}

impl SharedViewer {
    fn new(state: ViewerState) -> Self {
        Self { inner: Arc::new(RwLock::new(state)) }
    }

    fn snapshot(&self) -> Result<ViewerState, ViewerError> {
        let state = self.inner.read().map_err(|_| ViewerError::Poisoned)?;
        Ok(state.clone())
    }

    fn update<F>(&self, mutate: F) -> Result<(), ViewerError>
    where
        F: FnOnce(&mut ViewerState),
    {
        let mut state = self.inner.write().map_err(|_| ViewerError::Poisoned)?;
        mutate(&mut state);
        Ok(())
    }
}

impl StateSink for SharedViewer {
    fn selection(&self) -> Result<ViewSelection, String> {
        let state = self.inner.read().map_err(|_| ViewerError::Poisoned.to_string())?;
        Ok(state.selection.clone())
    }

    fn replace_messages(&self, level: Level, records: Vec<LogRecord>) -> Result<(), String> {
        let mut state = self.inner.write().map_err(|_| ViewerError::Poisoned.to_string())?;
        state.replace_messages(level, records);
        Ok(())
    }
}

struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn info(&self, text: &str) {
        eprintln!("notice: {text}");
    }

    fn error(&self, text: &str) {
        eprintln!("error: {text}");
    }
}

/// Offline transport producing a deterministic batch per level, shaped like
/// the log service's responses. Levels get slightly staggered timestamps so
/// a merged view interleaves.
struct DemoTransport;

impl Transport for DemoTransport {
    async fn fetch_messages(&self, query: &MessageQuery) -> Result<Vec<LogRecord>, String> {
        demo_batch(query)
    }
}

fn demo_batch(query: &MessageQuery) -> Result<Vec<LogRecord>, String> {
    let day = NaiveDate::parse_from_str(&query.date, DATE_PARAM_FORMAT)
        .map_err(|error| error.to_string())?;
    let morning = day.and_hms_opt(8, 30, 0).expect("valid wall clock");
    let base = morning.and_utc().timestamp();
    let level = query.level.as_str();
    let stagger = match level {
        "ERROR" => 7,
        "WARN" => 5,
        "INFO" => 3,
        _ => 1,
    };
    let name = |logger: &str, line: u32| format!("{level}:{logger}:{line}");

    let mut records = vec![
        LogRecord {
            timestamp: base + stagger,
            raw_name: name("app.http", 31),
            message: "GET /api/status handled in 12ms".to_string(),
            detail: None,
        },
        LogRecord {
            timestamp: base + 95 + stagger,
            raw_name: name("app.sync.worker", 210),
            message: "sync cycle finished (14 items)".to_string(),
            detail: None,
        },
        LogRecord {
            timestamp: base + 640 + stagger,
            raw_name: name("app.billing", 58),
            message: "invoice 1042 processed".to_string(),
            detail: None,
        },
    ];
    if level == "ERROR" {
        records.push(LogRecord {
            timestamp: base + 340 + stagger,
            raw_name: name("app.billing", 77),
            message: "invoice 1043 failed: missing customer".to_string(),
            detail: Some(vec![
                "Traceback (most recent call last):".to_string(),
                "  File \"billing.py\", line 77, in process".to_string(),
                "KeyError: 'customer'".to_string(),
            ]),
        });
    }
    Ok(records)
}

fn format_timestamp(timestamp: Timestamp) -> String {
    match DateTime::from_timestamp(timestamp, 0) {
        Some(instant) => instant.format(DT_DISPLAY_FORMAT).to_string(),
        None => timestamp.to_string(),
    }
}

fn render_records(state: &ViewerState, use_color: bool, out: &mut impl Write) -> io::Result<()> {
    writeln!(
        out,
        "{:<17} {:<6} {:<32} {:>5}  {}",
        "Date/Time", "Level", "Logger", "Line", "Message"
    )?;
    let visible = state.visible_records();
    for record in &visible {
        let level_cell = format!("{:<6}", record.level.as_str());
        let level_cell = if use_color {
            format!("{}{level_cell}{ANSI_RESET}", ansi_color(level_color(record.level.as_str())))
        } else {
            level_cell
        };
        let marker = if record.has_detail() {
            if state.is_expanded(record.timestamp) {
                "v "
            } else {
                "> "
            }
        } else {
            ""
        };
        writeln!(
            out,
            "{:<17} {level_cell} {:<32} {:>5}  {marker}{}",
            format_timestamp(record.timestamp),
            record.logger,
            record.line,
            record.message
        )?;
        if state.is_expanded(record.timestamp) {
            for line in record.detail.iter().flatten() {
                writeln!(out, "{:<65}{line}", "")?;
            }
        }
    }
    info!(records = visible.len(), "rendered view");
    Ok(())
}

async fn run_load<T>(viewer: &SharedViewer, transport: T) -> Result<LoadReport, FetchError>
where
    T: Transport,
{
    let coordinator = FetchCoordinator::new(viewer.clone(), transport, StderrNotifier);
    coordinator.load().await
}

pub async fn run() -> Result<(), DynError> {
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    let cli = Cli::parse();
    let cwd = env::current_dir()?;
    let env_map: BTreeMap<String, String> = env::vars().collect();
    let (config, config_path) = resolve_config(&cli, &cwd, &env_map)?;

    if let Some(path) = &config_path {
        info!(path = %path.display(), "loaded config file");
    }
    info!(
        server = %config.server,
        timezone = %config.timezone,
        levels = ?config.levels,
        filters = config.filters.len(),
        auth_configured = config.token.is_some(),
        "resolved config"
    );

    if cli.list_levels {
        let transport = HttpTransport::new(&config.server, config.token.clone())?;
        let levels = transport.fetch_levels().await?;
        let mut out = io::stdout().lock();
        for level in levels {
            writeln!(out, "{level}")?;
        }
        return Ok(());
    }

    let day = cli.date.unwrap_or_else(|| Local::now().date_naive());
    let mut state = ViewerState::new(day);
    state.set_timezone(config.timezone.clone());
    let mut levels = config.levels.clone();
    if levels.is_empty() && cli.demo {
        levels = KNOWN_LEVELS.iter().map(|level| level.to_string()).collect();
        info!("no levels selected, demo mode defaults to all known levels");
    }
    for level in &levels {
        state.toggle_level(Level::new(level.clone()));
    }
    for filter in &config.filters {
        state.filters.set_current(filter.clone());
        state.filters.save_current();
    }
    if let Some(query) = &cli.query {
        state.filters.set_current(query.clone());
    }

    let viewer = SharedViewer::new(state);
    let report = if cli.demo {
        run_load(&viewer, DemoTransport).await?
    } else {
        let transport = HttpTransport::new(&config.server, config.token.clone())?;
        if !transport.is_authenticated() {
            warn!("no auth token configured; requests go out unauthenticated");
        }
        run_load(&viewer, transport).await?
    };

    if report.rejected() {
        return Ok(());
    }
    if !report.failed.is_empty() {
        warn!(failed = ?report.failed, "some levels did not load; showing prior data where present");
    }

    viewer.update(|state| {
        let mut expand: Vec<Timestamp> = cli.expand.clone();
        if cli.expand_all {
            expand.extend(
                state
                    .visible_records()
                    .iter()
                    .filter(|record| record.has_detail())
                    .map(|record| record.timestamp),
            );
        }
        for timestamp in expand {
            if !state.is_expanded(timestamp) {
                state.toggle_expanded(timestamp);
            }
        }
    })?;

    let snapshot = viewer.snapshot()?;
    let mut out = io::stdout().lock();
    render_records(&snapshot, !cli.no_color, &mut out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::parse_from([
            "loglens",
            "--server",
            "http://10.0.0.1:5000",
            "--token",
            "secret",
            "--date",
            "2024-03-11",
            "--timezone",
            "Europe/Berlin",
            "--level",
            "ERROR",
            "--level",
            "WARN",
            "--filter",
            "disk",
            "--query",
            "invoice",
            "--expand",
            "1700000000",
            "--no-color",
        ]);

        assert_eq!(cli.server.as_deref(), Some("http://10.0.0.1:5000"));
        assert_eq!(cli.token.as_deref(), Some("secret"));
        assert_eq!(cli.date, NaiveDate::from_ymd_opt(2024, 3, 11));
        assert_eq!(cli.timezone.as_deref(), Some("Europe/Berlin"));
        assert_eq!(cli.levels, vec!["ERROR".to_string(), "WARN".to_string()]);
        assert_eq!(cli.filters, vec!["disk".to_string()]);
        assert_eq!(cli.query.as_deref(), Some("invoice"));
        assert_eq!(cli.expand, vec![1_700_000_000]);
        assert!(!cli.expand_all);
        assert!(!cli.demo);
        assert!(cli.no_color);
    }

    #[test]
    fn resolves_config_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        let child = root.join("nested");
        fs::create_dir_all(&child).expect("create nested dir");

        let config_path = root.join(CONFIG_FILE_NAME);
        fs::write(
            &config_path,
            r#"{
  "server": "http://10.0.0.1:5000",
  "timezone": "US/Eastern",
  "levels": ["DEBUG"],
  "filters": ["disk"]
}"#,
        )
        .expect("write config");

        let mut env_map = BTreeMap::new();
        env_map.insert("LOGLENS_TIMEZONE".to_string(), "Europe/Berlin".to_string());
        env_map.insert("LOGLENS_LEVELS".to_string(), "ERROR, WARN".to_string());
        env_map.insert("LOGLENS_TOKEN".to_string(), "   ".to_string());

        let cli = Cli {
            server: Some("http://0.0.0.0:5000".to_string()),
            token: None,
            config: None,
            date: None,
            timezone: None,
            levels: Vec::new(),
            filters: Vec::new(),
            query: None,
            expand: Vec::new(),
            expand_all: false,
            list_levels: false,
            demo: false,
            no_color: false,
        };

        let (config, resolved_path) = resolve_config(&cli, &child, &env_map).unwrap();

        assert_eq!(resolved_path.as_deref(), Some(config_path.as_path()));
        assert_eq!(config.server, "http://0.0.0.0:5000");
        assert_eq!(config.timezone, "Europe/Berlin");
        assert_eq!(config.levels, vec!["ERROR".to_string(), "WARN".to_string()]);
        assert_eq!(config.filters, vec!["disk".to_string()]);
        assert!(config.token.is_none());
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let cli = Cli::parse_from(["loglens", "--config", "/definitely/not/here.json"]);
        let err = resolve_config(&cli, Path::new("/tmp"), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingConfig { .. }));
    }

    #[test]
    fn parse_list_trims_and_drops_empties() {
        assert_eq!(parse_list("ERROR, WARN ,,  "), vec!["ERROR".to_string(), "WARN".to_string()]);
        assert!(parse_list("  ").is_empty());
    }

    #[test]
    fn demo_batches_are_deterministic_and_staggered() {
        let query = MessageQuery {
            level: Level::new("ERROR"),
            date: "2024-03-11".to_string(),
            timezone: "UTC".to_string(),
        };
        let first = demo_batch(&query).expect("batch");
        let second = demo_batch(&query).expect("batch");
        assert_eq!(first, second);
        assert!(first.iter().any(|record| record.has_detail()));
        assert!(first.iter().all(|record| record.raw_name.starts_with("ERROR:")));

        let warn_query = MessageQuery { level: Level::new("WARN"), ..query.clone() };
        let warn = demo_batch(&warn_query).expect("batch");
        assert!(warn.iter().all(|record| !record.has_detail()));
        assert_ne!(first[0].timestamp, warn[0].timestamp);

        let bad_date = MessageQuery { date: "11/03/2024".to_string(), ..query };
        assert!(demo_batch(&bad_date).is_err());
    }

    #[test]
    fn timestamps_render_in_utc() {
        assert_eq!(format_timestamp(1_700_000_000), "14/11/23 22:13:20");
        assert_eq!(format_timestamp(0), "01/01/70 00:00:00");
    }

    #[test]
    fn render_includes_detail_only_when_expanded() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 11).expect("valid date");
        let mut state = ViewerState::new(day);
        state.toggle_level(Level::new("ERROR"));
        state.replace_messages(
            Level::new("ERROR"),
            vec![LogRecord {
                timestamp: 100,
                raw_name: "ERROR:app.billing:77".to_string(),
                message: "invoice failed".to_string(),
                detail: Some(vec!["KeyError: 'customer'".to_string()]),
            }],
        );

        let mut collapsed = Vec::new();
        render_records(&state, false, &mut collapsed).expect("render");
        let collapsed = String::from_utf8(collapsed).expect("utf8");
        assert!(collapsed.contains("> invoice failed"));
        assert!(!collapsed.contains("KeyError"));

        state.toggle_expanded(100);
        let mut expanded = Vec::new();
        render_records(&state, false, &mut expanded).expect("render");
        let expanded = String::from_utf8(expanded).expect("utf8");
        assert!(expanded.contains("v invoice failed"));
        assert!(expanded.contains("KeyError: 'customer'"));
    }

    #[test]
    fn shared_viewer_feeds_the_coordinator_seam() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 11).expect("valid date");
        let mut state = ViewerState::new(day);
        state.toggle_level(Level::new("WARN"));
        let viewer = SharedViewer::new(state);

        let selection = viewer.selection().expect("selection");
        assert_eq!(selection.date_param(), "2024-03-11");
        assert!(selection.levels.contains(&Level::new("WARN")));

        viewer
            .replace_messages(
                Level::new("WARN"),
                vec![LogRecord {
                    timestamp: 1,
                    raw_name: "WARN:w:1".to_string(),
                    message: "low".to_string(),
                    detail: None,
                }],
            )
            .expect("replace");
        assert_eq!(viewer.snapshot().expect("snapshot").visible_records().len(), 1);
    }
}
