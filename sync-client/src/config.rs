//! Configuration for the sync coordinator.
//!
//! [`SyncConfig`] holds coordinator-wide knobs and is built in code.
//! [`TableSyncConfig`] is per table and deserializes from TOML:
//!
//! ```toml
//! [[sync.tables]]
//! table = "tasks"
//! realtime = true
//! cache_strategy = "aggressive"
//! conflict_resolution = { custom = "importance" }
//! sync_interval_ms = 5000
//! foreign_keys = [{ field = "projectId", parent_table = "projects" }]
//! ```

use serde::Deserialize;
use std::time::Duration;
use sync_core::{
    ForeignKey, TieBreak, DEFAULT_MAX_ATTEMPTS, DEFAULT_MIN_SPACING, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_TIE_BREAK,
};

/// Default number of queued operations replayed per batch.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Coordinator-wide configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Operations replayed (and changes pulled) per batch.
    pub batch_size: usize,
    /// Offline queue capacity.
    pub queue_capacity: usize,
    /// Failed attempts allowed per operation.
    pub max_attempts: u32,
    /// Minimum spacing between sync passes of one table.
    pub min_sync_spacing: Duration,
    /// Wait between retries of a failed write the caller is awaiting.
    pub retry_backoff: Duration,
    /// Default freshness window for cached selects without `ttl_seconds`.
    pub default_cache_ttl: Duration,
    /// Last-write-wins tie-break.
    pub tie_break: TieBreak,
    /// Start with traffic paused until migrations finish.
    pub start_paused: bool,
}

impl SyncConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the replay batch size (minimum 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the offline queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the retry budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the minimum spacing between sync passes.
    pub fn with_min_sync_spacing(mut self, spacing: Duration) -> Self {
        self.min_sync_spacing = spacing;
        self
    }

    /// Set the retry backoff.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the default cache freshness window.
    pub fn with_default_cache_ttl(mut self, ttl: Duration) -> Self {
        self.default_cache_ttl = ttl;
        self
    }

    /// Set the last-write-wins tie-break.
    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Start with traffic paused.
    pub fn with_start_paused(mut self, paused: bool) -> Self {
        self.start_paused = paused;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_sync_spacing: DEFAULT_MIN_SPACING,
            retry_backoff: Duration::from_millis(50),
            default_cache_ttl: Duration::from_secs(60),
            tie_break: DEFAULT_TIE_BREAK,
            start_paused: false,
        }
    }
}

/// How eagerly selects use the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    /// Serve cached reads while they are fresh.
    Aggressive,
    /// Always read remotely when connected.
    #[default]
    Lazy,
}

/// Conflict strategy as named in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Later `updatedAt` wins.
    #[default]
    LastWriteWins,
    /// Remote always wins.
    ServerWins,
    /// Field-level merge.
    FieldMerge,
    /// A resolver registered under this name.
    Custom(String),
}

/// Per-table sync configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TableSyncConfig {
    /// Table name.
    pub table: String,
    /// Sync periodically in the background.
    #[serde(default)]
    pub realtime: bool,
    /// Cache strategy for selects.
    #[serde(default)]
    pub cache_strategy: CacheStrategy,
    /// Conflict strategy.
    #[serde(default)]
    pub conflict_resolution: ConflictResolution,
    /// Background sync period in milliseconds (default: 30000).
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
    /// Override of the coordinator's batch size, for both pulls and replay
    /// batches that start with a write to this table.
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Foreign keys checked before writes leave the client.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    /// Array fields merged as sets under field merge.
    #[serde(default)]
    pub set_valued_fields: Vec<String>,
}

fn default_sync_interval_ms() -> u64 {
    30_000
}

impl TableSyncConfig {
    /// Configuration for `table` with default values.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            realtime: false,
            cache_strategy: CacheStrategy::default(),
            conflict_resolution: ConflictResolution::default(),
            sync_interval_ms: default_sync_interval_ms(),
            batch_size: None,
            foreign_keys: Vec::new(),
            set_valued_fields: Vec::new(),
        }
    }

    /// Enable or disable background sync.
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Set the cache strategy.
    pub fn with_cache_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.cache_strategy = strategy;
        self
    }

    /// Set the conflict strategy.
    pub fn with_conflict_resolution(mut self, resolution: ConflictResolution) -> Self {
        self.conflict_resolution = resolution;
        self
    }

    /// Override the coordinator's batch size for this table.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size.max(1));
        self
    }

    /// Set the background sync period.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Add a foreign key.
    pub fn with_foreign_key(mut self, field: &str, parent_table: &str) -> Self {
        self.foreign_keys.push(ForeignKey::new(field, parent_table));
        self
    }

    /// Mark array fields as sets for field merge.
    pub fn with_set_valued_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_valued_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Background sync period.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.max(1))
    }
}

/// The `[sync]` section of a configuration file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SyncSettings {
    /// Tables to sync.
    #[serde(default)]
    pub tables: Vec<TableSyncConfig>,
}
