//! End-to-end tests: connectors loaded from JSON5, run through the
//! orchestrator against an instrumented protocol client.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;

use hwsight_engine::compute::{self, ComputeContext};
use hwsight_engine::model::{
    Compute, DuplicateColumn, MatchingLines, Translate, TranslationRef, TranslationTable,
};
use hwsight_engine::{
    CancelSignal, Connector, EngineError, FailureReason, HostContext, JobOrchestrator, JobRequest,
    JobStatus, NoScripts, OrchestratorSettings, PhaseKind, ProtocolClient, ProtocolError, Source,
    SourceExecutor, SourceTable, StandardDocuments,
};

/// One protocol call: the command it ran and when.
#[derive(Debug, Clone)]
struct Window {
    command: String,
    start: Instant,
    end: Instant,
}

/// Answers `osCommand` sources by echoing their command line as a row.
///
/// `hang ...` blocks until cancelled, `pair ...` returns two rows, and
/// everything else takes `delay`.
struct Instrumented {
    delay: Duration,
    calls: AtomicUsize,
    windows: Mutex<Vec<Window>>,
}

impl Instrumented {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicUsize::new(0),
            windows: Mutex::new(Vec::new()),
        })
    }

    fn windows(&self) -> Vec<Window> {
        self.windows.lock().unwrap().clone()
    }

    fn window(&self, command: &str) -> Window {
        self.windows()
            .into_iter()
            .find(|w| w.command == command)
            .unwrap_or_else(|| panic!("no call for {command}"))
    }
}

#[async_trait]
impl ProtocolClient for Instrumented {
    async fn execute(
        &self,
        source: &Source,
        _host: &HostContext,
        cancel: &CancelSignal,
    ) -> Result<SourceTable, ProtocolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let command = source
            .kind
            .query()
            .and_then(|q| q.get_str("commandLine"))
            .unwrap_or_default()
            .to_string();
        let start = Instant::now();

        if command.starts_with("hang") {
            let mut cancel = cancel.clone();
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProtocolError::Cancelled),
                _ = tokio::time::sleep(Duration::from_secs(30)) => {}
            }
        } else {
            tokio::time::sleep(self.delay).await;
        }

        self.windows.lock().unwrap().push(Window {
            command: command.clone(),
            start,
            end: Instant::now(),
        });

        if let Some(arg) = command.strip_prefix("pair ") {
            return Ok(SourceTable::from_csv(format!("{arg};a;\n{arg};b;")));
        }
        Ok(SourceTable::from_csv(format!("{command};")))
    }
}

fn orchestrator(client: Arc<Instrumented>, settings: OrchestratorSettings) -> JobOrchestrator {
    JobOrchestrator::new(SourceExecutor::new(client), settings)
}

fn request(connector: &Arc<Connector>, monitor: &str, phase: PhaseKind) -> JobRequest {
    JobRequest::new(
        Arc::clone(connector),
        monitor,
        phase,
        Arc::new(HostContext::new("server-01")),
    )
}

fn load(json5: &str) -> Arc<Connector> {
    Arc::new(Connector::from_json5(json5).unwrap())
}

#[test]
fn test_loop_source_runs_in_the_wave_after_its_table() {
    let connector = load(
        r#"{
            id: "Devices",
            monitors: { device: { discovery: { sources: {
                deviceDetail: {
                    type: "snmpGet",
                    oid: "1.3.6.1.4.1.$1",
                    executeForEachEntryOf: { source: "deviceList" },
                },
                deviceList: { type: "snmpTable", oid: "1.3.6.1.4.1", selectColumns: "ID" },
            } } } },
        }"#,
    );

    let plan = connector
        .phase("device", PhaseKind::Discovery)
        .unwrap()
        .plan();
    assert_eq!(
        plan.waves(),
        &[
            vec!["monitors.device.discovery.sources.deviceList".to_string()],
            vec!["monitors.device.discovery.sources.deviceDetail".to_string()],
        ]
    );
}

#[test]
fn test_cycle_fails_at_load() {
    let result = Connector::from_json5(
        r#"{
            id: "Loop",
            monitors: { m: { collect: { sources: {
                a: { type: "copy", from: "b" },
                b: { type: "osCommand", commandLine: "read ${source::a}" },
            } } } },
        }"#,
    );
    match result {
        Err(EngineError::DependencyCycle { keys }) => {
            assert!(keys.iter().any(|k| k.ends_with(".a")));
            assert!(keys.iter().any(|k| k.ends_with(".b")));
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
}

#[tokio::test]
async fn test_waves_never_overlap() {
    let connector = load(
        r#"{
            id: "Waves",
            monitors: { m: { collect: { sources: {
                first: { type: "osCommand", commandLine: "first" },
                second: { type: "osCommand", commandLine: "second ${source::first}" },
                third: { type: "osCommand", commandLine: "third ${source::second}" },
                side: { type: "osCommand", commandLine: "side" },
            } } } },
        }"#,
    );
    let client = Instrumented::new(Duration::from_millis(20));
    let (_tx, rx) = watch::channel(false);

    let report = orchestrator(client.clone(), OrchestratorSettings::default())
        .run(request(&connector, "m", PhaseKind::Collect), rx)
        .await
        .unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.waves_completed, 3);
    let first = client.window("first");
    let side = client.window("side");
    let second = client.window("second first");
    let third = client.window("third second first");
    assert!(second.start >= first.end && second.start >= side.end);
    assert!(third.start >= second.end);
    assert_eq!(
        report
            .results
            .table("monitors.m.collect.sources.third")
            .unwrap()
            .rows()[0][0],
        "third second first"
    );
}

#[tokio::test]
async fn test_serialized_source_runs_alone() {
    let connector = load(
        r#"{
            id: "Serial",
            monitors: { m: { simple: { sources: {
                a: { type: "osCommand", commandLine: "a" },
                exclusive: { type: "osCommand", commandLine: "exclusive", forceSerialization: true },
                b: { type: "osCommand", commandLine: "b" },
            } } } },
        }"#,
    );
    let client = Instrumented::new(Duration::from_millis(30));
    let (_tx, rx) = watch::channel(false);

    let report = orchestrator(client.clone(), OrchestratorSettings::default())
        .run(request(&connector, "m", PhaseKind::Simple), rx)
        .await
        .unwrap();
    assert!(report.is_completed());
    assert_eq!(report.waves_total, 1);

    let exclusive = client.window("exclusive");
    for other in ["a", "b"] {
        let window = client.window(other);
        let disjoint = window.end <= exclusive.start || window.start >= exclusive.end;
        assert!(disjoint, "{other} overlapped the serialized source");
    }
}

#[tokio::test]
async fn test_worker_pool_bounds_concurrency() {
    let connector = load(
        r#"{
            id: "Pool",
            monitors: { m: { simple: { sources: {
                s1: { type: "osCommand", commandLine: "s1" },
                s2: { type: "osCommand", commandLine: "s2" },
                s3: { type: "osCommand", commandLine: "s3" },
                s4: { type: "osCommand", commandLine: "s4" },
            } } } },
        }"#,
    );
    let client = Instrumented::new(Duration::from_millis(20));
    let (_tx, rx) = watch::channel(false);
    let settings = OrchestratorSettings {
        max_workers: 1,
        ..OrchestratorSettings::default()
    };

    orchestrator(client.clone(), settings)
        .run(request(&connector, "m", PhaseKind::Simple), rx)
        .await
        .unwrap();

    let mut windows = client.windows();
    windows.sort_by_key(|w| w.start);
    for pair in windows.windows(2) {
        assert!(pair[1].start >= pair[0].end);
    }
}

#[tokio::test]
async fn test_timeout_keeps_completed_waves() {
    let connector = load(
        r#"{
            id: "Slow",
            monitors: { m: { collect: { sources: {
                quick: { type: "osCommand", commandLine: "quick" },
                stuck: { type: "osCommand", commandLine: "hang ${source::quick}" },
            } } } },
        }"#,
    );
    let client = Instrumented::new(Duration::from_millis(5));
    let (_tx, rx) = watch::channel(false);
    let settings = OrchestratorSettings {
        strategy_timeout: Duration::from_millis(150),
        ..OrchestratorSettings::default()
    };

    let started = Instant::now();
    let report = orchestrator(client, settings)
        .run(request(&connector, "m", PhaseKind::Collect), rx)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.status, JobStatus::Failed(FailureReason::Timeout));
    assert_eq!(report.waves_completed, 1);
    assert_eq!(
        report
            .results
            .table("monitors.m.collect.sources.quick")
            .unwrap()
            .rows()[0][0],
        "quick"
    );
    let stuck = report.results.table("monitors.m.collect.sources.stuck");
    assert!(stuck.is_none_or(SourceTable::is_empty));
    assert!(!report.results.errors("monitors.m.collect.sources.stuck").is_empty());
}

#[tokio::test]
async fn test_interrupt_stops_the_run() {
    let connector = load(
        r#"{
            id: "Interrupt",
            monitors: { m: { collect: { sources: {
                stuck: { type: "osCommand", commandLine: "hang" },
                after: { type: "copy", from: "stuck" },
            } } } },
        }"#,
    );
    let client = Instrumented::new(Duration::ZERO);
    let (tx, rx) = watch::channel(false);
    let orchestrator = orchestrator(client, OrchestratorSettings::default());
    let request = request(&connector, "m", PhaseKind::Collect);

    let run = tokio::spawn(async move { orchestrator.run(request, rx).await });
    tokio::time::sleep(Duration::from_millis(30)).await;
    tx.send_replace(true);

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.status, JobStatus::Failed(FailureReason::Interrupted));
    assert_eq!(report.waves_completed, 0);
    assert!(!report.results.contains("monitors.m.collect.sources.after"));
}

#[tokio::test]
async fn test_for_each_list_invokes_once_per_row() {
    let connector = load(
        r#"{
            id: "ForEach",
            monitors: { m: { collect: { sources: {
                ids: { type: "static", value: "c0;\nc1;\nc2;\nc3;" },
                detail: {
                    type: "osCommand",
                    commandLine: "pair $1",
                    executeForEachEntryOf: { source: "ids", concatMethod: "list" },
                },
            } } } },
        }"#,
    );
    let client = Instrumented::new(Duration::ZERO);
    let (_tx, rx) = watch::channel(false);

    let report = orchestrator(client.clone(), OrchestratorSettings::default())
        .run(request(&connector, "m", PhaseKind::Collect), rx)
        .await
        .unwrap();

    assert_eq!(client.calls.load(Ordering::SeqCst), 4);
    let detail = report
        .results
        .table("monitors.m.collect.sources.detail")
        .unwrap();
    assert_eq!(detail.row_count(), 8);
    assert_eq!(detail.rows()[7], vec!["c3", "b"]);
}

#[tokio::test]
async fn test_failed_source_degrades_to_empty_for_dependents() {
    let connector = load(
        r#"{
            id: "Degrade",
            monitors: { m: { collect: { sources: {
                remote: { type: "wbem", query: "SELECT * FROM CIM_Disk" },
                local: { type: "copy", from: "remote", computes: [{ type: "add", column: 1, value: 1 }] },
            } } } },
        }"#,
    );
    let executor = SourceExecutor::new(Arc::new(hwsight_engine::NoProtocol));
    let orchestrator = JobOrchestrator::new(executor, OrchestratorSettings::default());
    let (_tx, rx) = watch::channel(false);

    let report = orchestrator
        .run(request(&connector, "m", PhaseKind::Collect), rx)
        .await
        .unwrap();

    assert!(report.is_completed());
    assert!(report.results.table("monitors.m.collect.sources.remote").unwrap().is_empty());
    assert_eq!(report.results.errors("monitors.m.collect.sources.remote").len(), 1);
    assert!(report.results.table("monitors.m.collect.sources.local").unwrap().is_empty());
    assert!(report.results.errors("monitors.m.collect.sources.local").is_empty());
}

fn compute_fixture() -> (Connector, HostContext, HashMap<String, SourceTable>) {
    let connector = Connector::from_json5(
        r#"{ id: "C", monitors: { m: { simple: { sources: { s: { type: "static", value: "x;" } } } } } }"#,
    )
    .unwrap();
    (connector, HostContext::new("h"), HashMap::new())
}

async fn apply(compute: &Compute, table: SourceTable) -> SourceTable {
    let (connector, host, tables) = compute_fixture();
    let ctx = ComputeContext {
        connector: &connector,
        source_key: "monitors.m.simple.sources.s",
        host: &host,
        tables: &tables,
        scripts: &NoScripts,
        documents: &StandardDocuments,
    };
    compute::apply(compute, table, &ctx).await.unwrap()
}

fn table(data: &[&[&str]]) -> SourceTable {
    SourceTable::from_rows(
        data.iter()
            .map(|row| row.iter().map(|c| c.to_string()).collect())
            .collect(),
    )
}

#[tokio::test]
async fn test_duplicate_column() {
    let compute = Compute::DuplicateColumn(DuplicateColumn { column: 2 });
    let result = apply(&compute, table(&[&["a", "b", "c"]])).await;
    assert_eq!(result.rows(), table(&[&["a", "b", "b", "c"]]).rows());
}

#[tokio::test]
async fn test_translate_passes_unmapped_values_through() {
    let compute = Compute::Translate(Translate {
        column: 1,
        translation_table: TranslationRef::Inline(TranslationTable::new([
            ("0", "ok"),
            ("1", "failed"),
        ])),
    });
    let result = apply(&compute, table(&[&["0"], &["1"], &["2"]])).await;
    assert_eq!(result.rows(), table(&[&["ok"], &["failed"], &["2"]]).rows());

    // Translating again only changes values that are themselves keys.
    let again = apply(&compute, result.clone()).await;
    assert_eq!(again.rows(), result.rows());
}

#[tokio::test]
async fn test_every_compute_leaves_the_empty_table_empty() {
    let computes: Vec<Compute> = json5::from_str(
        r#"[
            { type: "add", column: 1, value: "$9" },
            { type: "divide", column: 3, value: 0 },
            { type: "duplicateColumn", column: 7 },
            { type: "translate", column: 1, translationTable: { "a": "b" } },
            { type: "arrayTranslate", column: 1, translationTable: { "a": "b" } },
            { type: "perBitTranslation", column: 1, bitList: "0,1", bitTranslationTable: { "0,1": "x" } },
            { type: "substring", column: 1, start: 1, length: 2 },
            { type: "extract", column: 1, subColumn: 2, subSeparators: "," },
            { type: "extractPropertyFromWbemPath", column: 1, property: "Name" },
            { type: "leftConcat", column: 1, value: "x" },
            { type: "rightConcat", column: 1, value: "x" },
            { type: "replace", column: 1, existingValue: "a", newValue: "b" },
            { type: "convert", column: 1, conversion: "hex2Dec" },
            { type: "keepColumns", columnNumbers: "1,2" },
            { type: "keepOnlyMatchingLines", column: 1, regExp: "a" },
            { type: "excludeMatchingLines", column: 1, valueList: "a,b" },
            { type: "json2Csv", entryKey: "/", properties: "a" },
            { type: "xml2Csv", recordTag: "/r", properties: "a" },
            { type: "awk", script: "{ print }" },
        ]"#,
    )
    .unwrap();

    for compute in &computes {
        let result = apply(compute, SourceTable::empty()).await;
        assert!(result.is_empty(), "{} changed the empty table", compute.kind());
    }
}

#[tokio::test]
async fn test_keep_and_exclude_partition_the_rows() {
    let original = table(&[
        &["disk0", "OK"],
        &["disk1", "Failed"],
        &["disk2", "ok"],
        &["fan0", "Degraded"],
    ]);
    let predicate = MatchingLines {
        column: 2,
        reg_exp: Some("^ok$".to_string()),
        value_list: None,
    };

    let kept = apply(&Compute::KeepOnlyMatchingLines(predicate.clone()), original.clone()).await;
    let excluded = apply(&Compute::ExcludeMatchingLines(predicate), original.clone()).await;

    assert_eq!(kept.row_count() + excluded.row_count(), original.row_count());
    for row in original.rows() {
        let in_kept = kept.rows().contains(row);
        let in_excluded = excluded.rows().contains(row);
        assert!(in_kept != in_excluded, "{row:?} must be in exactly one side");
    }
}
