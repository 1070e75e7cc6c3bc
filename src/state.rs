use std::sync::Arc;
use tokio::sync::watch;

use crate::audit::invoker::{AuditInvoker, InvokerSettings};
use crate::audit::orchestrator::AuditOrchestrator;
use crate::config::LightkeeperConfig;
use crate::notify::NotificationSink;
use crate::process::runner::TokioProcessRunner;
use crate::store::db::SqliteStore;
use crate::store::Store;

pub type SharedState = Arc<AppState>;
pub type Orchestrator = AuditOrchestrator<TokioProcessRunner>;

pub struct AppState {
    pub config: LightkeeperConfig,
    pub store: Arc<SqliteStore>,
    pub orchestrator: Orchestrator,
    pub shutdown_tx: watch::Sender<bool>,
}

impl AppState {
    pub fn new(
        config: LightkeeperConfig,
        store: Arc<SqliteStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let invoker = AuditInvoker::new(TokioProcessRunner, InvokerSettings::from_config(&config));
        let orchestrator = AuditOrchestrator::new(
            store.clone() as Arc<dyn Store>,
            sink,
            invoker,
            config.max_concurrent_audits,
        );
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            store,
            orchestrator,
            shutdown_tx,
        }
    }

    /// Receiver that turns true once shutdown starts.
    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn begin_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}
