use chrono::NaiveDate;
use loglens::loglens_core::state::ViewerState;
use loglens::loglens_core::types::{Level, LogRecord};

fn main() {
    divan::main();
}

fn make_batch(level: &str, len: usize) -> Vec<LogRecord> {
    (0..len)
        .map(|idx| {
            let detail = (idx % 10 == 0).then(|| {
                vec![
                    "Traceback (most recent call last):".to_string(),
                    format!("  File \"worker.py\", line {idx}, in handle"),
                    "KeyError: 'customer'".to_string(),
                ]
            });
            LogRecord {
                timestamp: idx as i64,
                raw_name: format!("{level}:app.worker.pool:{}", idx % 400),
                message: format!(
                    "request_id={idx:08x} path=/api/v1/items duration_ms={} msg=The quick brown fox jumps over the lazy dog",
                    idx % 100
                ),
                detail,
            }
        })
        .collect()
}

fn make_viewer(levels: &[&str], len: usize) -> ViewerState {
    let day = NaiveDate::from_ymd_opt(2024, 3, 11).expect("valid date");
    let mut state = ViewerState::new(day);
    for level in levels {
        state.toggle_level(Level::new(*level));
        state.replace_messages(Level::new(*level), make_batch(level, len));
    }
    state
}

#[divan::bench(args = [256usize, 2048usize, 8192usize])]
fn visible_unfiltered(bencher: divan::Bencher, len: usize) {
    let state = make_viewer(&["DEBUG", "ERROR", "INFO", "WARN"], len);

    bencher.counter(len * 4).bench(|| {
        divan::black_box(state.visible_records().len());
    });
}

#[divan::bench(args = [256usize, 2048usize, 8192usize])]
fn visible_filter_miss(bencher: divan::Bencher, len: usize) {
    let mut state = make_viewer(&["DEBUG", "ERROR", "INFO", "WARN"], len);
    state.filters.set_current("does-not-exist");

    bencher.counter(len * 4).bench(|| {
        divan::black_box(state.visible_records().len());
    });
}

#[divan::bench(args = [256usize, 2048usize, 8192usize])]
fn visible_filter_hit_on_message(bencher: divan::Bencher, len: usize) {
    let mut state = make_viewer(&["DEBUG", "ERROR", "INFO", "WARN"], len);
    state.filters.set_current("quick brown fox");

    bencher.counter(len * 4).bench(|| {
        divan::black_box(state.visible_records().len());
    });
}

#[divan::bench(args = [2048usize, 8192usize])]
fn visible_filter_detail_fallback(bencher: divan::Bencher, len: usize) {
    let mut state = make_viewer(&["ERROR"], len);
    state.filters.set_current("KeyError");

    bencher.counter(len).bench(|| {
        divan::black_box(state.visible_records().len());
    });
}
