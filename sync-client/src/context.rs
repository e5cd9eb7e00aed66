//! Application-level wiring.
//!
//! [`SyncContext`] builds a coordinator from configuration, restores the
//! persisted queue and starts background sync. Applications hold one per
//! process and share the coordinator from it.

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::backend::Backend;
use crate::config::{SyncConfig, TableSyncConfig};
use crate::coordinator::SyncCoordinator;
use crate::error::SyncError;
use crate::periodic::spawn_periodic_sync;
use crate::store::QueueStore;
use sync_core::CustomResolver;
use sync_types::Record;

/// A running coordinator plus its background task.
pub struct SyncContext<B: Backend> {
    coordinator: Arc<SyncCoordinator<B>>,
    periodic: Option<JoinHandle<()>>,
}

impl<B: Backend> SyncContext<B> {
    /// Start building a context around `backend`.
    pub fn builder(backend: B) -> SyncContextBuilder<B> {
        SyncContextBuilder {
            backend,
            config: SyncConfig::default(),
            tables: Vec::new(),
            resolvers: Vec::new(),
            store: None,
            periodic: true,
        }
    }

    /// The shared coordinator.
    pub fn coordinator(&self) -> &Arc<SyncCoordinator<B>> {
        &self.coordinator
    }

    /// Stop background sync and disconnect.
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.periodic.take() {
            handle.abort();
        }
        self.coordinator.disconnect().await;
        tracing::info!("sync context shut down");
    }
}

impl<B: Backend> Drop for SyncContext<B> {
    fn drop(&mut self) {
        if let Some(handle) = self.periodic.take() {
            handle.abort();
        }
    }
}

/// Builder for [`SyncContext`].
pub struct SyncContextBuilder<B: Backend> {
    backend: B,
    config: SyncConfig,
    tables: Vec<TableSyncConfig>,
    resolvers: Vec<(String, CustomResolver)>,
    store: Option<Arc<dyn QueueStore>>,
    periodic: bool,
}

impl<B: Backend> SyncContextBuilder<B> {
    /// Coordinator-wide configuration.
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Add one table.
    pub fn table(mut self, table: TableSyncConfig) -> Self {
        self.tables.push(table);
        self
    }

    /// Add several tables, e.g. from a configuration file.
    pub fn tables(mut self, tables: impl IntoIterator<Item = TableSyncConfig>) -> Self {
        self.tables.extend(tables);
        self
    }

    /// Register a named conflict resolver.
    pub fn resolver<F>(mut self, name: &str, resolver: F) -> Self
    where
        F: Fn(&Record, &Record) -> Record + Send + Sync + 'static,
    {
        self.resolvers.push((name.to_string(), Arc::new(resolver)));
        self
    }

    /// Persist the offline queue.
    pub fn store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Enable or disable background sync (default: enabled).
    pub fn periodic_sync(mut self, enabled: bool) -> Self {
        self.periodic = enabled;
        self
    }

    /// Configure tables, restore the persisted queue and start background
    /// sync. Does not connect.
    pub async fn start(self) -> Result<SyncContext<B>, SyncError> {
        let mut coordinator = SyncCoordinator::new(self.backend, self.config);
        if let Some(store) = self.store {
            coordinator = coordinator.with_store(store);
        }
        for (name, resolver) in self.resolvers {
            coordinator.register_resolver(&name, move |local: &Record, remote: &Record| {
                resolver(local, remote)
            });
        }
        for table in self.tables {
            coordinator.configure_sync_for_table(table)?;
        }
        coordinator.restore_queue().await?;

        let coordinator = Arc::new(coordinator);
        let periodic = self
            .periodic
            .then(|| spawn_periodic_sync(Arc::clone(&coordinator)));

        tracing::info!(
            tables = coordinator.table_configs().len(),
            queued = coordinator.queue_size(),
            "sync context started"
        );
        Ok(SyncContext {
            coordinator,
            periodic,
        })
    }
}
