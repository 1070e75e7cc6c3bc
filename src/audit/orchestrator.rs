use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::invoker::{AuditInvoker, InvokeError};
use super::parser::{parse_report, ParseError};
use super::{AuditScore, FailureStage, PageConfig, PageFailure, PageFilter, RunResult, ScoreStamp};
use crate::notify::{NotificationContext, NotificationSink, Severity};
use crate::process::runner::ProcessRunner;
use crate::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("no enabled pages match the given filter")]
    NoMatchingPages,

    #[error("page {0} not found")]
    PageNotFound(String),

    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("audit completed but could not be saved: {0}")]
    PersistFailed(#[source] StoreError),

    #[error(transparent)]
    Store(StoreError),

    #[error("audit cancelled")]
    Cancelled,
}

impl OrchestrationError {
    pub fn stage(&self) -> FailureStage {
        match self {
            OrchestrationError::Parse(_) => FailureStage::Parse,
            OrchestrationError::PersistFailed(_) | OrchestrationError::Store(_) => {
                FailureStage::Persist
            }
            OrchestrationError::Cancelled => FailureStage::Cancelled,
            _ => FailureStage::Invoke,
        }
    }
}

/// Drives audits: page selection, invocation, scoring and persistence.
pub struct AuditOrchestrator<R> {
    store: Arc<dyn Store>,
    sink: Arc<dyn NotificationSink>,
    invoker: AuditInvoker<R>,
    max_concurrent: usize,
}

impl<R: ProcessRunner> AuditOrchestrator<R> {
    pub fn new(
        store: Arc<dyn Store>,
        sink: Arc<dyn NotificationSink>,
        invoker: AuditInvoker<R>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            sink,
            invoker,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Audit every enabled page matching `filter`.
    pub async fn run_batch(&self, filter: PageFilter) -> Result<RunResult, OrchestrationError> {
        // The sender lives until the batch is done, so the signal never fires.
        let (_stop_tx, stop_rx) = watch::channel(false);
        self.run_batch_until(filter, stop_rx).await
    }

    /// Like [`run_batch`](Self::run_batch), but stops when `stop` turns true.
    ///
    /// Pages not yet started are recorded as cancelled; in-flight audits are
    /// dropped, which kills their process and removes their report file.
    pub async fn run_batch_until(
        &self,
        mut filter: PageFilter,
        stop: watch::Receiver<bool>,
    ) -> Result<RunResult, OrchestrationError> {
        filter.enabled_only = true;

        let pages = self
            .store
            .find_pages(&filter)
            .map_err(OrchestrationError::Store)?;
        if pages.is_empty() {
            warn!("No pages found for filter {:?}", filter);
            return Err(OrchestrationError::NoMatchingPages);
        }

        let started = Instant::now();
        info!(
            "Running audits for {} pages (max {} concurrent)",
            pages.len(),
            self.max_concurrent
        );

        let outcomes: Vec<(PageConfig, Result<AuditScore, OrchestrationError>)> =
            stream::iter(pages)
                .map(|page| {
                    let stop = stop.clone();
                    async move {
                        let outcome = self.audit_until_stopped(&page, stop).await;
                        (page, outcome)
                    }
                })
                .buffer_unordered(self.max_concurrent)
                .collect()
                .await;

        let mut result = RunResult::default();
        for (page, outcome) in outcomes {
            match outcome {
                Ok(_) => result.record_success(),
                Err(e) => {
                    if matches!(e, OrchestrationError::Cancelled) {
                        result.cancelled = true;
                    }
                    result.record_failure(PageFailure {
                        page_id: page.id,
                        url: page.url,
                        stage: e.stage(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Batch finished in {:.1}s: {} attempted, {} succeeded, {} failed{}",
            started.elapsed().as_secs_f64(),
            result.attempted,
            result.succeeded,
            result.failed,
            if result.cancelled { " (cancelled)" } else { "" }
        );
        Ok(result)
    }

    /// Audit a single page by id; failures go straight back to the caller.
    pub async fn run_one(&self, page_id: &str) -> Result<AuditScore, OrchestrationError> {
        let (_stop_tx, stop_rx) = watch::channel(false);
        self.run_one_until(page_id, stop_rx).await
    }

    /// Like [`run_one`](Self::run_one), but gives up with `Cancelled` once
    /// `stop` turns true.
    pub async fn run_one_until(
        &self,
        page_id: &str,
        stop: watch::Receiver<bool>,
    ) -> Result<AuditScore, OrchestrationError> {
        let page = self
            .store
            .find_page_by_id(page_id)
            .map_err(OrchestrationError::Store)?
            .ok_or_else(|| OrchestrationError::PageNotFound(page_id.to_string()))?;
        self.audit_until_stopped(&page, stop).await
    }

    /// Stored scores for a page, oldest first.
    pub fn history(&self, page_id: &str) -> Result<Vec<AuditScore>, StoreError> {
        self.store.find_scores_by_page(page_id)
    }

    async fn audit_until_stopped(
        &self,
        page: &PageConfig,
        mut stop: watch::Receiver<bool>,
    ) -> Result<AuditScore, OrchestrationError> {
        if *stop.borrow() {
            return Err(OrchestrationError::Cancelled);
        }
        tokio::select! {
            outcome = self.audit_page(page) => outcome,
            _ = stop_requested(&mut stop) => {
                warn!("Audit for {} cancelled", page.url);
                Err(OrchestrationError::Cancelled)
            }
        }
    }

    async fn audit_page(&self, page: &PageConfig) -> Result<AuditScore, OrchestrationError> {
        let started = Instant::now();
        let outcome = self.execute(page).await;
        match &outcome {
            Ok(score) => {
                info!(
                    "saved audit for {} (performance {}, seo {}) in {:.1}s",
                    page.url,
                    score.psi_score,
                    score.seo_score,
                    started.elapsed().as_secs_f64()
                );
                self.check_benchmark(page, score);
            }
            Err(e) => self.report_failure(page, e),
        }
        outcome
    }

    async fn execute(&self, page: &PageConfig) -> Result<AuditScore, OrchestrationError> {
        let report = self.invoker.invoke(page).await?;
        let score = parse_report(&report, page, ScoreStamp::now())?;
        self.store
            .insert_score(&score)
            .map_err(OrchestrationError::PersistFailed)?;
        Ok(score)
    }

    fn report_failure(&self, page: &PageConfig, e: &OrchestrationError) {
        let stage = e.stage();
        error!(
            "audit failed for {} at {} stage: {}",
            page.url,
            stage.as_str(),
            e
        );
        self.sink.notify(
            Severity::Error,
            &format!("audit failed for {}: {}", page.url, e),
            &NotificationContext::for_page(page).with_stage(stage),
        );
    }

    fn check_benchmark(&self, page: &PageConfig, score: &AuditScore) {
        if page.benchmark_score == 0 {
            return;
        }
        let floor = page.score_floor();
        if u32::from(score.psi_score) < floor {
            let message = format!(
                "performance score {} for {} is below benchmark {} (-{}% tolerance, floor {})",
                score.psi_score, page.url, page.benchmark_score, page.threshold_percentage, floor
            );
            warn!("{}", message);
            self.sink.notify(
                Severity::Warning,
                &message,
                &NotificationContext::for_page(page),
            );
        }
    }
}

/// Resolves once `stop` is set; never resolves if its sender is gone.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let stopped = stop.wait_for(|stopped| *stopped).await.is_ok();
    if !stopped {
        std::future::pending::<()>().await;
    }
}
