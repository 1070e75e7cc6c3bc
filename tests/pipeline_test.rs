use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

use lightkeeper::audit::invoker::{AuditInvoker, InvokeError, InvokerSettings};
use lightkeeper::audit::orchestrator::{AuditOrchestrator, OrchestrationError};
use lightkeeper::audit::{AuditScore, DeviceType, FailureStage, PageConfig, PageFilter};
use lightkeeper::notify::{NotificationContext, NotificationSink, Severity};
use lightkeeper::process::runner::{CommandSpec, ProcessOutput, ProcessRunner, RunError};
use lightkeeper::store::db::SqliteStore;
use lightkeeper::store::{Store, StoreError};

// ============================================================================
// Fakes
// ============================================================================

#[derive(Clone)]
enum Behavior {
    /// Write the report, then exit 0.
    Report(Value),
    /// Write a partial report, then exit with the code.
    Exit(i32),
    /// Write a partial report, then never finish.
    Hang,
}

#[derive(Default)]
struct FakeLighthouse {
    by_url: HashMap<String, Behavior>,
    delay: Duration,
    calls: Mutex<Vec<CommandSpec>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeLighthouse {
    fn with(mut self, url: &str, behavior: Behavior) -> Self {
        self.by_url.insert(url.to_string(), behavior);
        self
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runner handle shared between the invoker and the test body.
struct SharedFake(Arc<FakeLighthouse>);

impl ProcessRunner for SharedFake {
    async fn run(
        &self,
        command: &CommandSpec,
        _timeout: Duration,
    ) -> Result<ProcessOutput, RunError> {
        let this = &self.0;
        this.calls.lock().unwrap().push(command.clone());
        let now = this.running.fetch_add(1, Ordering::SeqCst) + 1;
        this.peak.fetch_max(now, Ordering::SeqCst);
        let _running = RunningGuard(&this.running);

        let url = command.args[0].clone();
        let output_path = command
            .arg_value("--output-path=")
            .expect("output path flag")
            .to_string();
        let behavior = this
            .by_url
            .get(&url)
            .cloned()
            .unwrap_or_else(|| Behavior::Report(report_for(&url, 0.87, 0.92)));

        if !this.delay.is_zero() {
            tokio::time::sleep(this.delay).await;
        }

        match behavior {
            Behavior::Report(report) => {
                std::fs::write(&output_path, report.to_string()).unwrap();
                Ok(ProcessOutput {
                    exit_code: Some(0),
                    success: true,
                    stderr: String::new(),
                })
            }
            Behavior::Exit(code) => {
                std::fs::write(&output_path, "{\"partial\":").unwrap();
                Ok(ProcessOutput {
                    exit_code: Some(code),
                    success: false,
                    stderr: "Runtime error encountered: CHROME_LAUNCH_FAILED".to_string(),
                })
            }
            Behavior::Hang => {
                std::fs::write(&output_path, "{\"partial\":").unwrap();
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<(Severity, String, NotificationContext)>>,
}

impl RecordingSink {
    fn with_severity(&self, severity: Severity) -> Vec<(String, NotificationContext)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _, _)| *s == severity)
            .map(|(_, m, c)| (m.clone(), c.clone()))
            .collect()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, severity: Severity, message: &str, context: &NotificationContext) {
        self.events
            .lock()
            .unwrap()
            .push((severity, message.to_string(), context.clone()));
    }
}

/// Reads from SQLite but refuses every score insert.
struct ReadOnlyStore(Arc<SqliteStore>);

impl Store for ReadOnlyStore {
    fn find_pages(&self, filter: &PageFilter) -> Result<Vec<PageConfig>, StoreError> {
        self.0.find_pages(filter)
    }

    fn find_page_by_id(&self, id: &str) -> Result<Option<PageConfig>, StoreError> {
        self.0.find_page_by_id(id)
    }

    fn insert_score(&self, _score: &AuditScore) -> Result<String, StoreError> {
        Err(StoreError::Unavailable("disk full".to_string()))
    }

    fn find_scores_by_page(&self, page_id: &str) -> Result<Vec<AuditScore>, StoreError> {
        self.0.find_scores_by_page(page_id)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn report_for(url: &str, performance: f64, seo: f64) -> Value {
    json!({
        "finalUrl": url,
        "categories": {
            "performance": { "score": performance },
            "seo": { "score": seo }
        },
        "audits": {
            "first-contentful-paint": { "numericValue": 1234.9 },
            "speed-index": { "numericValue": 2100.2 },
            "largest-contentful-paint": { "numericValue": 2500.0 },
            "interactive": { "numericValue": 3100.7 },
            "total-blocking-time": { "numericValue": 150.0 },
            "cumulative-layout-shift": { "numericValue": 0.123456 }
        }
    })
}

fn page(n: i64, url: &str, device: DeviceType) -> PageConfig {
    PageConfig {
        id: format!("page-{n}"),
        created_at: Utc::now() + ChronoDuration::milliseconds(n),
        url: url.to_string(),
        name: format!("Page {n}"),
        env: "prod".to_string(),
        device,
        benchmark_score: 0,
        threshold_percentage: 0,
        enabled: true,
        auth: None,
    }
}

struct Harness {
    db: Arc<SqliteStore>,
    sink: Arc<RecordingSink>,
    fake: Arc<FakeLighthouse>,
    artifacts: TempDir,
    orchestrator: AuditOrchestrator<SharedFake>,
}

impl Harness {
    fn new(fake: FakeLighthouse, pages: &[PageConfig], max_concurrent: usize) -> Self {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        for p in pages {
            db.insert_page(p).unwrap();
        }
        Self::with_store(fake, db.clone(), db, max_concurrent)
    }

    fn with_store(
        fake: FakeLighthouse,
        db: Arc<SqliteStore>,
        store: Arc<dyn Store>,
        max_concurrent: usize,
    ) -> Self {
        let artifacts = TempDir::new().unwrap();
        let fake = Arc::new(fake);
        let sink = Arc::new(RecordingSink::default());
        let invoker = AuditInvoker::new(
            SharedFake(fake.clone()),
            InvokerSettings {
                binary: "lighthouse".to_string(),
                artifact_dir: artifacts.path().to_path_buf(),
                timeout: Duration::from_secs(5),
            },
        );
        let orchestrator =
            AuditOrchestrator::new(store, sink.clone(), invoker, max_concurrent);
        Self {
            db,
            sink,
            fake,
            artifacts,
            orchestrator,
        }
    }

    fn artifact_count(&self) -> usize {
        std::fs::read_dir(self.artifacts.path()).unwrap().count()
    }

    fn scores(&self, page_id: &str) -> Vec<AuditScore> {
        self.db.find_scores_by_page(page_id).unwrap()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_mobile_audit_end_to_end() {
    let p = page(1, "https://a.test/", DeviceType::Mobile);
    let h = Harness::new(FakeLighthouse::default(), &[p.clone()], 2);

    let result = h
        .orchestrator
        .run_batch(PageFilter {
            url: Some("https://a.test/".to_string()),
            device: Some(DeviceType::Mobile),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(result.attempted, 1);
    assert_eq!(result.succeeded, 1);
    assert_eq!(result.failed, 0);
    assert!(!result.cancelled);

    let scores = h.scores(&p.id);
    assert_eq!(scores.len(), 1);
    let score = &scores[0];
    assert_eq!(score.psi_score, 87);
    assert_eq!(score.seo_score, 92);
    assert_eq!(score.url, "https://a.test/");
    assert_eq!(score.device, DeviceType::Mobile);
    assert_eq!(score.metrics.first_contentful_paint, 1234);
    assert_eq!(score.metrics.time_to_interactive, 3100);
    assert_eq!(score.metrics.cumulative_layout_shift, 0.1235);

    let calls = h.fake.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].has_arg("--form-factor=mobile"));
    assert!(calls[0].has_arg("--output=json"));
    drop(calls);

    assert_eq!(h.artifact_count(), 0);
    assert!(h.sink.events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_desktop_uses_preset() {
    let p = page(1, "https://d.test/", DeviceType::Desktop);
    let h = Harness::new(FakeLighthouse::default(), &[p.clone()], 1);

    let score = h.orchestrator.run_one(&p.id).await.unwrap();
    assert_eq!(score.device, DeviceType::Desktop);
    assert!(h.fake.calls.lock().unwrap()[0].has_arg("--preset=desktop"));
}

#[tokio::test]
async fn test_process_failure_is_not_persisted() {
    let p = page(1, "https://b.test/", DeviceType::Desktop);
    let fake = FakeLighthouse::default().with("https://b.test/", Behavior::Exit(1));
    let h = Harness::new(fake, &[p.clone()], 1);

    let err = h.orchestrator.run_one(&p.id).await.unwrap_err();
    match err {
        OrchestrationError::Invoke(InvokeError::ProcessFailed { exit_code, stderr }) => {
            assert_eq!(exit_code, Some(1));
            assert!(stderr.contains("CHROME_LAUNCH_FAILED"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert!(h.scores(&p.id).is_empty());
    assert_eq!(h.artifact_count(), 0);

    let errors = h.sink.with_severity(Severity::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].1.page_id.as_deref(), Some("page-1"));
    assert_eq!(errors[0].1.stage, Some(FailureStage::Invoke));
}

#[tokio::test]
async fn test_batch_counts_each_page_once() {
    let pages = vec![
        page(1, "https://ok1.test/", DeviceType::Mobile),
        page(2, "https://bad.test/", DeviceType::Mobile),
        page(3, "https://ok2.test/", DeviceType::Desktop),
        page(4, "https://garbled.test/", DeviceType::Mobile),
    ];
    let fake = FakeLighthouse::default()
        .with("https://bad.test/", Behavior::Exit(2))
        .with(
            "https://garbled.test/",
            Behavior::Report(json!({ "finalUrl": "https://garbled.test/" })),
        );
    let h = Harness::new(fake, &pages, 2);

    let result = h.orchestrator.run_batch(PageFilter::default()).await.unwrap();

    assert_eq!(result.attempted, 4);
    assert_eq!(result.succeeded, 2);
    assert_eq!(result.failed, 2);
    assert_eq!(result.attempted, result.succeeded + result.failed);
    assert!(!result.cancelled);

    let mut failed: Vec<_> = result
        .failures
        .iter()
        .map(|f| (f.page_id.as_str(), f.stage))
        .collect();
    failed.sort();
    assert_eq!(
        failed,
        vec![("page-2", FailureStage::Invoke), ("page-4", FailureStage::Parse)]
    );

    assert_eq!(h.scores("page-1").len(), 1);
    assert_eq!(h.scores("page-3").len(), 1);
    assert!(h.scores("page-2").is_empty());
    assert!(h.scores("page-4").is_empty());
    assert_eq!(h.sink.with_severity(Severity::Error).len(), 2);
    assert_eq!(h.artifact_count(), 0);
}

#[tokio::test]
async fn test_no_matching_pages() {
    let p = page(1, "https://a.test/", DeviceType::Mobile);
    let h = Harness::new(FakeLighthouse::default(), &[p], 2);

    let err = h
        .orchestrator
        .run_batch(PageFilter {
            env: Some("staging".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestrationError::NoMatchingPages));
    assert_eq!(h.fake.call_count(), 0);
    assert!(h.scores("page-1").is_empty());
}

#[tokio::test]
async fn test_disabled_pages_are_skipped() {
    let mut off = page(2, "https://off.test/", DeviceType::Mobile);
    off.enabled = false;
    let on = page(1, "https://on.test/", DeviceType::Mobile);
    let h = Harness::new(FakeLighthouse::default(), &[on, off.clone()], 2);

    // Asking for the disabled page alone matches nothing.
    let err = h
        .orchestrator
        .run_batch(PageFilter {
            url: Some(off.url.clone()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::NoMatchingPages));

    let result = h.orchestrator.run_batch(PageFilter::default()).await.unwrap();
    assert_eq!(result.attempted, 1);
    assert_eq!(h.fake.call_count(), 1);
    assert!(h.scores(&off.id).is_empty());
}

#[tokio::test]
async fn test_persist_failure() {
    let p = page(1, "https://a.test/", DeviceType::Mobile);
    let db = Arc::new(SqliteStore::open_in_memory().unwrap());
    db.insert_page(&p).unwrap();
    let store = Arc::new(ReadOnlyStore(db.clone()));
    let h = Harness::with_store(FakeLighthouse::default(), db, store, 1);

    let err = h.orchestrator.run_one(&p.id).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::PersistFailed(_)));
    assert_eq!(err.stage(), FailureStage::Persist);

    let result = h.orchestrator.run_batch(PageFilter::default()).await.unwrap();
    assert_eq!(result.failed, 1);
    assert_eq!(result.failures[0].stage, FailureStage::Persist);
    assert!(h.scores(&p.id).is_empty());
}

#[tokio::test]
async fn test_concurrency_cap() {
    let pages: Vec<_> = (1..=6)
        .map(|n| page(n, &format!("https://p{n}.test/"), DeviceType::Mobile))
        .collect();
    let fake = FakeLighthouse::default().delayed(Duration::from_millis(50));
    let h = Harness::new(fake, &pages, 2);

    let result = h.orchestrator.run_batch(PageFilter::default()).await.unwrap();

    assert_eq!(result.succeeded, 6);
    assert_eq!(h.fake.call_count(), 6);
    assert_eq!(h.fake.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancellation_cleans_up() {
    let pages: Vec<_> = (1..=3)
        .map(|n| page(n, &format!("https://slow{n}.test/"), DeviceType::Mobile))
        .collect();
    let mut fake = FakeLighthouse::default();
    for p in &pages {
        fake = fake.with(&p.url, Behavior::Hang);
    }
    let h = Harness::new(fake, &pages, 2);

    let (stop_tx, stop_rx) = watch::channel(false);
    let batch = h.orchestrator.run_batch_until(PageFilter::default(), stop_rx);
    let stopper = async {
        // Let the first two audits start and write their partial reports.
        while h.fake.call_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        stop_tx.send_replace(true);
    };
    let (result, ()) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(batch, stopper)
    })
    .await
    .expect("batch did not stop");
    let result = result.unwrap();

    assert!(result.cancelled);
    assert_eq!(result.attempted, 3);
    assert_eq!(result.succeeded, 0);
    assert!(result
        .failures
        .iter()
        .all(|f| f.stage == FailureStage::Cancelled));
    assert_eq!(h.artifact_count(), 0);
    assert_eq!(h.fake.running.load(Ordering::SeqCst), 0);
    for p in &pages {
        assert!(h.scores(&p.id).is_empty());
    }
}

#[tokio::test]
async fn test_run_one_stops_on_signal() {
    let p = page(1, "https://slow.test/", DeviceType::Desktop);
    let fake = FakeLighthouse::default().with(&p.url, Behavior::Hang);
    let h = Harness::new(fake, &[p.clone()], 1);

    let (stop_tx, stop_rx) = watch::channel(false);
    let audit = h.orchestrator.run_one_until(&p.id, stop_rx);
    let stopper = async {
        while h.fake.call_count() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        stop_tx.send_replace(true);
    };
    let (outcome, ()) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(audit, stopper)
    })
    .await
    .expect("single audit did not stop");

    assert!(matches!(outcome, Err(OrchestrationError::Cancelled)));
    assert_eq!(h.artifact_count(), 0);
    assert_eq!(h.fake.running.load(Ordering::SeqCst), 0);
    assert!(h.scores(&p.id).is_empty());
}

#[tokio::test]
async fn test_run_one_unknown_page() {
    let h = Harness::new(FakeLighthouse::default(), &[], 1);
    let err = h.orchestrator.run_one("nope").await.unwrap_err();
    assert!(matches!(err, OrchestrationError::PageNotFound(id) if id == "nope"));
    assert_eq!(h.fake.call_count(), 0);
}

#[tokio::test]
async fn test_unsupported_device_never_spawns() {
    let p = page(1, "https://tablet.test/", DeviceType::Unsupported("tablet".to_string()));
    let h = Harness::new(FakeLighthouse::default(), &[p.clone()], 1);

    let result = h.orchestrator.run_batch(PageFilter::default()).await.unwrap();
    assert_eq!(result.failed, 1);
    assert_eq!(result.failures[0].stage, FailureStage::Invoke);
    assert!(result.failures[0].reason.contains("tablet"));
    assert_eq!(h.fake.call_count(), 0);
}

#[tokio::test]
async fn test_below_benchmark_warns() {
    let mut p = page(1, "https://slow.test/", DeviceType::Mobile);
    p.benchmark_score = 90;
    p.threshold_percentage = 10;
    let mut fast = page(2, "https://fast.test/", DeviceType::Mobile);
    fast.benchmark_score = 90;
    fast.threshold_percentage = 10;

    let fake = FakeLighthouse::default()
        .with(&p.url, Behavior::Report(report_for(&p.url, 0.75, 0.9)))
        .with(&fast.url, Behavior::Report(report_for(&fast.url, 0.81, 0.9)));
    let h = Harness::new(fake, &[p.clone(), fast], 2);

    let result = h.orchestrator.run_batch(PageFilter::default()).await.unwrap();
    assert_eq!(result.succeeded, 2);

    // Floor is 90 * 90 / 100 = 81: 75 warns, 81 does not.
    let warnings = h.sink.with_severity(Severity::Warning);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].1.page_id.as_deref(), Some(p.id.as_str()));
    assert!(warnings[0].0.contains("75"));
    // A low score is still a stored result.
    assert_eq!(h.scores(&p.id).len(), 1);
}

#[tokio::test]
async fn test_history_is_oldest_first() {
    let p = page(1, "https://a.test/", DeviceType::Mobile);
    let h = Harness::new(FakeLighthouse::default(), &[p.clone()], 1);

    let first = h.orchestrator.run_one(&p.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = h.orchestrator.run_one(&p.id).await.unwrap();

    let history = h.orchestrator.history(&p.id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, first.id);
    assert_eq!(history[1].id, second.id);
}
