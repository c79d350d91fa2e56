//! Application State
//!
//! Shared state passed to all API handlers.

use crate::migration_job::MigrationJobActor;
use crate::observability::MetricsState;
use etcd_client::Client;
use kameo::prelude::*;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tagging_core::backend::WideColumnStore;
use tagging_core::legacy::LegacyTagSource;
use tagging_core::registry::GroupRegistry;
use tagging_core::{
    BucketedStore, BulkOperations, Migrator, PaginatedReader, RegistrySyncCoordinator, TaggingConfig,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: TaggingConfig,
    pub store: BucketedStore,
    pub reader: PaginatedReader,
    pub coordinator: RegistrySyncCoordinator,
    pub bulk: BulkOperations,
    pub migrator: Migrator,
    pub migration_job: ActorRef<MigrationJobActor>,
    /// Present when running against etcd; probed by the liveness check
    pub etcd_client: Option<Client>,
    pub metrics_state: Option<MetricsState>,
    pub readiness: Arc<AtomicBool>,
}

impl AppState {
    /// Wire the tagging services over the given collaborators and spawn the
    /// migration job actor. Must be called inside a tokio runtime.
    pub fn new(
        backend: Arc<dyn WideColumnStore>,
        registry: Arc<dyn GroupRegistry>,
        legacy: Arc<dyn LegacyTagSource>,
        config: TaggingConfig,
    ) -> Self {
        let store = BucketedStore::new(backend);
        let reader = PaginatedReader::new(store.clone(), config.clone());
        let coordinator = RegistrySyncCoordinator::new(store.clone(), registry, config.clone());
        let bulk = BulkOperations::new(store.clone(), coordinator.clone(), config.clone());
        let migrator = Migrator::new(legacy, store.clone(), coordinator.clone(), config.clone());
        let migration_job = MigrationJobActor::spawn(MigrationJobActor::new(migrator.clone()));

        Self {
            config,
            store,
            reader,
            coordinator,
            bulk,
            migrator,
            migration_job,
            etcd_client: None,
            metrics_state: None,
            readiness: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_etcd(mut self, client: Client) -> Self {
        self.etcd_client = Some(client);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsState) -> Self {
        self.metrics_state = Some(metrics);
        self
    }
}
