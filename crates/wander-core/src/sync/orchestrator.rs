//! Sync orchestrator - the façade the rest of the application talks to.
//!
//! State machine: `Idle → Syncing → {Succeeded|Failed} → Idle`, published
//! on a watch channel any number of readers can subscribe to. At most one
//! sync runs at a time; a request while one is in flight is rejected
//! immediately rather than queued.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{AttractionSyncEngine, SyncError, SyncReport, SyncResult};
use crate::net::ReachabilityMonitor;

/// Orchestrator tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// How long a terminal status stays visible before auto-resetting to
    /// `Idle`
    pub status_reset_after: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            status_reset_after: Duration::from_secs(3),
        }
    }
}

/// Observable sync state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Syncing,
    Succeeded(SyncReport),
    Failed(SyncError),
}

impl SyncStatus {
    const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Failed(_))
    }
}

/// Serializes sync passes and exposes their state.
pub struct SyncOrchestrator {
    engine: Arc<AttractionSyncEngine>,
    reachability: Arc<ReachabilityMonitor>,
    config: OrchestratorConfig,
    status_tx: watch::Sender<SyncStatus>,
    in_flight: AtomicBool,
    initial_sync_done: AtomicBool,
    /// Bumped on every terminal publish; lets the delayed reset tell
    /// whether a newer sync already replaced the status it would clear
    generation: Arc<AtomicU64>,
}

impl SyncOrchestrator {
    pub fn new(
        engine: Arc<AttractionSyncEngine>,
        reachability: Arc<ReachabilityMonitor>,
        config: OrchestratorConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::Idle);
        Self {
            engine,
            reachability,
            config,
            status_tx,
            in_flight: AtomicBool::new(false),
            initial_sync_done: AtomicBool::new(false),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current sync status
    pub fn status(&self) -> SyncStatus {
        self.status_tx.borrow().clone()
    }

    /// Subscribe to sync state changes
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Run a delta (or first-time full) sync pass
    pub async fn sync(&self) -> SyncResult<SyncReport> {
        self.run(false).await
    }

    /// Run a forced full sync, under the same single-flight guard
    pub async fn force_full_sync(&self) -> SyncResult<SyncReport> {
        self.run(true).await
    }

    /// Watch reachability and trigger exactly one initial sync per process
    /// lifetime when the device first comes (or already is) online. Later
    /// reconnects do not re-trigger; subsequent syncs are caller-initiated,
    /// which keeps flapping networks from causing sync storms.
    pub fn spawn_reachability_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut rx = self.reachability.subscribe();

        tokio::spawn(async move {
            loop {
                let online = *rx.borrow_and_update();
                if online && !this.initial_sync_done.swap(true, Ordering::SeqCst) {
                    tracing::info!("Network available; running initial sync");
                    if let Err(error) = this.sync().await {
                        tracing::warn!("Initial sync failed: {error}");
                    }
                }
                if this.initial_sync_done.load(Ordering::SeqCst) {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    async fn run(&self, full: bool) -> SyncResult<SyncReport> {
        // Single-flight: reject, don't queue. The caller retries later or
        // waits for the status channel to go idle.
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(SyncError::AlreadyRunning);
        }

        let result = self.run_guarded(full).await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn run_guarded(&self, full: bool) -> SyncResult<SyncReport> {
        if !self.reachability.is_online() {
            self.publish_terminal(SyncStatus::Failed(SyncError::Offline));
            return Err(SyncError::Offline);
        }

        self.status_tx.send_replace(SyncStatus::Syncing);

        let result = if full {
            self.engine.force_full_sync().await
        } else {
            self.engine.perform_sync().await
        };

        match &result {
            Ok(report) => self.publish_terminal(SyncStatus::Succeeded(*report)),
            Err(error) => self.publish_terminal(SyncStatus::Failed(error.clone())),
        }

        result
    }

    /// Publish a terminal status and schedule the auto-reset back to idle.
    fn publish_terminal(&self, status: SyncStatus) {
        debug_assert!(status.is_terminal());
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.status_tx.send_replace(status);

        let tx = self.status_tx.clone();
        let counter = Arc::clone(&self.generation);
        let delay = self.config.status_reset_after;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Only clear the status this task was scheduled for
            if counter.load(Ordering::SeqCst) == generation {
                tx.send_if_modified(|status| {
                    if status.is_terminal() {
                        *status = SyncStatus::Idle;
                        true
                    } else {
                        false
                    }
                });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockCatalogApi;
    use crate::db::Database;
    use crate::models::{AttractionId, RemoteAttraction};
    use crate::sync::ReviewSyncEngine;
    use chrono::Utc;

    fn remote(name: &str) -> RemoteAttraction {
        RemoteAttraction {
            id: AttractionId::new(),
            name: name.to_string(),
            description: "somewhere".to_string(),
            category: "museum".to_string(),
            latitude: 54.6,
            longitude: -5.9,
            image_url: None,
            updated_at: Utc::now(),
            is_published: true,
        }
    }

    fn orchestrator(
        api: Arc<MockCatalogApi>,
        online: bool,
    ) -> (Arc<SyncOrchestrator>, Arc<ReachabilityMonitor>) {
        let db = Database::open_in_memory().unwrap();
        let reviews = Arc::new(ReviewSyncEngine::new(
            api.clone(),
            Arc::new(db.reviews()),
            Arc::new(db.meta()),
        ));
        let engine = Arc::new(AttractionSyncEngine::new(
            api,
            Arc::new(db.attractions()),
            Arc::new(db.meta()),
            reviews,
        ));
        let reachability = Arc::new(ReachabilityMonitor::new(online));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            engine,
            Arc::clone(&reachability),
            OrchestratorConfig {
                status_reset_after: Duration::from_millis(20),
            },
        ));
        (orchestrator, reachability)
    }

    #[tokio::test]
    async fn offline_sync_fails_with_distinct_category() {
        let api = Arc::new(MockCatalogApi::new());
        let (orchestrator, _reachability) = orchestrator(api.clone(), false);

        let error = orchestrator.sync().await.unwrap_err();
        assert_eq!(error, SyncError::Offline);
        assert_eq!(
            orchestrator.status(),
            SyncStatus::Failed(SyncError::Offline)
        );
        assert_eq!(api.attraction_fetches(), 0);
    }

    #[tokio::test]
    async fn terminal_status_auto_resets_to_idle() {
        let api = Arc::new(MockCatalogApi::new());
        api.set_attractions(vec![remote("A")]);
        let (orchestrator, _reachability) = orchestrator(api, true);

        let report = orchestrator.sync().await.unwrap();
        assert_eq!(orchestrator.status(), SyncStatus::Succeeded(report));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(orchestrator.status(), SyncStatus::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_sync_is_rejected_not_queued() {
        let api = Arc::new(MockCatalogApi::new());
        api.set_response_delay(Duration::from_millis(50));
        let (orchestrator, _reachability) = orchestrator(api, true);

        let background = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.sync().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let error = orchestrator.sync().await.unwrap_err();
        assert_eq!(error, SyncError::AlreadyRunning);

        // The in-flight sync is unaffected by the rejected request
        assert!(background.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn reconnect_triggers_exactly_one_initial_sync() {
        let api = Arc::new(MockCatalogApi::new());
        api.set_attractions(vec![remote("A")]);
        let (orchestrator, reachability) = orchestrator(api.clone(), false);

        let watcher = orchestrator.spawn_reachability_watcher();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(api.attraction_fetches(), 0);

        reachability.set_online(true);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(api.attraction_fetches(), 1);

        // Flapping does not re-trigger
        reachability.set_online(false);
        reachability.set_online(true);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(api.attraction_fetches(), 1);

        watcher.await.unwrap();
    }

    #[tokio::test]
    async fn force_full_sync_respects_the_guard() {
        let api = Arc::new(MockCatalogApi::new());
        api.set_attractions(vec![remote("A")]);
        let (orchestrator, _reachability) = orchestrator(api, true);

        let report = orchestrator.force_full_sync().await.unwrap();
        assert_eq!(report.added, 1);
    }
}
