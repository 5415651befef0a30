//! End-to-end pipeline tests: raw source -> grouper -> filter with the
//! stage loops running on the tokio runtime.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::timeout;

use logscope_engine::{
    AcceptAll, ColumnKind, ColumnVec, CompiledFilter, FilteredLogSource, InMemoryLogSource,
    LogColumn, LogEntryIndex, LogLineIndex, LogModification, LogProperty, LogSource,
    LogSourceListener, MultiLineGrouper, PropertyValue, QueryOptions,
};

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<LogModification>>,
}

impl LogSourceListener for Recorder {
    fn on_log_modified(&self, modification: LogModification) {
        self.events.lock().push(modification);
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("pipeline did not settle in time");
}

fn entry_indices(source: &dyn LogSource, rows: usize) -> Vec<LogEntryIndex> {
    let indices: Vec<LogLineIndex> = (0..rows).map(LogLineIndex::new).collect();
    let mut dest = ColumnVec::with_default(ColumnKind::EntryIndex, rows);
    source
        .get_column(
            &indices,
            LogColumn::LogEntryIndex,
            &mut dest,
            0,
            QueryOptions::default(),
        )
        .unwrap();
    dest.entry_indices().unwrap().to_vec()
}

#[tokio::test]
async fn pipeline_groups_and_filters_incrementally() {
    init_tracing();
    let source = Arc::new(InMemoryLogSource::new());
    let grouper = MultiLineGrouper::new(source.clone(), Duration::from_millis(5));
    grouper.start();
    let filtered = FilteredLogSource::new(
        grouper.clone(),
        Arc::new(CompiledFilter::new("payment").unwrap()),
        Arc::new(AcceptAll),
        Duration::from_millis(5),
    );
    filtered.start();

    source.push_lines(&[
        "2024-01-15T10:30:00Z INFO payment accepted",
        "  order=42",
        "2024-01-15T10:30:01Z INFO unrelated",
        "2024-01-15T10:30:02Z ERROR payment rejected",
    ]);

    // rows 0 and 3 match; row 1 is a continuation of a matching entry but
    // does not itself contain the pattern
    wait_until(|| filtered.count() == 2).await;
    assert_eq!(
        entry_indices(&*filtered, 2),
        vec![LogEntryIndex::new(0), LogEntryIndex::new(1)]
    );
    assert_eq!(
        filtered.get_property(LogProperty::PercentageProcessed),
        PropertyValue::Percentage(1.0)
    );
    assert_eq!(entry_indices(&*grouper, 2), vec![LogEntryIndex::new(0); 2]);

    // late appends flow through both stages
    source.push_line("2024-01-15T10:30:03Z WARN payment retried");
    wait_until(|| filtered.count() == 3).await;

    filtered.dispose();
    grouper.dispose();
}

#[tokio::test]
async fn pipeline_survives_removal_and_reset() {
    init_tracing();
    let source = Arc::new(InMemoryLogSource::new());
    let grouper = MultiLineGrouper::new(source.clone(), Duration::from_millis(5));
    grouper.start();
    let filtered = FilteredLogSource::new(
        grouper.clone(),
        Arc::new(AcceptAll),
        Arc::new(AcceptAll),
        Duration::from_millis(5),
    );
    filtered.start();

    let recorder = Arc::new(Recorder::default());
    filtered.add_listener(recorder.clone(), Duration::ZERO, 1000);

    source.push_lines(&["INFO a", "  cont", "WARN b", "ERROR c"]);
    wait_until(|| filtered.count() == 4).await;

    source.remove_from(2);
    wait_until(|| filtered.count() == 2).await;
    assert!(recorder
        .events
        .lock()
        .iter()
        .any(|event| *event == LogModification::removed(2, 2)));

    source.clear();
    wait_until(|| filtered.count() == 0).await;
    assert_eq!(
        filtered.get_property(LogProperty::LogEntryCount),
        PropertyValue::Count(0)
    );

    source.push_lines(&["INFO fresh start"]);
    wait_until(|| filtered.count() == 1).await;

    filtered.dispose();
    grouper.dispose();

    // disposed stages stop observing their sources
    source.push_lines(&["INFO ignored"]);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(filtered.count(), 0);
}
