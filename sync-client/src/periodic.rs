//! Background sync for realtime tables.
//!
//! Runs periodically and syncs every realtime table whose interval has
//! elapsed. Table configuration is read again on every tick, so tables
//! configured (or switched to realtime) after the task starts are picked up.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};

use crate::backend::Backend;
use crate::coordinator::SyncCoordinator;
use crate::error::SyncError;

/// How often configuration is checked while no table is realtime.
const IDLE_TICK: Duration = Duration::from_millis(250);

/// Spawn the background sync task.
///
/// Returns a handle that can be used to abort the task. The task runs until
/// aborted, idling while no configured table is realtime.
pub fn spawn_periodic_sync<B: Backend>(
    coordinator: Arc<SyncCoordinator<B>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = IDLE_TICK;
        let mut timer = ticker(tick);
        let mut last_run: HashMap<String, Instant> = HashMap::new();
        tracing::info!("Periodic sync started");

        loop {
            timer.tick().await;

            let tables = realtime_tables(&coordinator);
            last_run.retain(|table, _| tables.iter().any(|(t, _)| t == table));

            let wanted = tables
                .iter()
                .map(|(_, every)| *every)
                .min()
                .unwrap_or(IDLE_TICK);
            if wanted != tick {
                tracing::info!(
                    "Periodic sync: {} realtime tables, tick now {:?}",
                    tables.len(),
                    wanted
                );
                tick = wanted;
                timer = ticker(tick);
            }

            let now = Instant::now();
            for (table, every) in &tables {
                if let Some(at) = last_run.get(table) {
                    if now.duration_since(*at) < *every {
                        continue;
                    }
                }
                last_run.insert(table.clone(), now);

                match coordinator.sync(Some(table)).await {
                    Ok(()) => tracing::debug!("Periodic sync: {} up to date", table),
                    Err(SyncError::NotConnected | SyncError::MigrationInProgress) => {
                        tracing::debug!("Periodic sync: skipped {} (offline or paused)", table);
                    }
                    Err(e) => tracing::warn!("Periodic sync of {} failed: {}", table, e),
                }
            }
        }
    })
}

/// Realtime tables and their sync periods, as currently configured.
fn realtime_tables<B: Backend>(coordinator: &SyncCoordinator<B>) -> Vec<(String, Duration)> {
    coordinator
        .table_configs()
        .into_iter()
        .filter(|c| c.realtime)
        .map(|c| {
            let every = c.sync_interval();
            (c.table, every)
        })
        .collect()
}

fn ticker(period: Duration) -> Interval {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}
