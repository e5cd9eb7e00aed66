//! Migration runner.
//!
//! Applies migration units to a SQLite database, one transaction per unit,
//! and records every apply and rollback in an append-only ledger table.
//! A single-row lock table keeps two runners from migrating the same
//! database at once.
//!
//! Migrations run with foreign key enforcement off; violations are checked
//! with `PRAGMA foreign_key_check` once a run finishes.

use chrono::Utc;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::Connection;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{MigrationError, MigrationResult};
use crate::lint::check_sql;
use crate::parse::{parse_migration_file, MigrationUnit};
use crate::report::{
    AppliedMigration, CreatedMigration, DownReport, MigrationFailure, MigrationStatus,
    PlannedMigration, RollbackReport, UpOptions, UpReport, ValidateOptions, ValidationReport,
};
use crate::source::{dependency_matches, discover, migration_files};

const LEDGER_TABLE: &str = "_strata_migrations";
const LOCK_TABLE: &str = "_strata_migration_lock";

/// Body of a freshly created migration file.
const TEMPLATE: &str = "-- Up\n\n-- Down\n";

/// How long ordinary statements wait on another connection's write.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS _strata_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    version INTEGER NOT NULL,
    checksum TEXT NOT NULL,
    action TEXT NOT NULL CHECK (action IN ('apply', 'rollback')),
    executed_at TEXT NOT NULL,
    execution_ms INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS _strata_migration_lock (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    owner TEXT NOT NULL,
    acquired_at INTEGER NOT NULL
);
"#;

/// Default age after which a lock is considered abandoned.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(600);

/// Runner settings.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Locks older than this may be taken over.
    pub lock_timeout: Duration,
    /// Where `up(UpOptions { backup: true, .. })` writes its backups.
    pub backup_dir: PathBuf,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            backup_dir: PathBuf::from("backups"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Apply,
    Rollback,
}

impl Action {
    fn as_str(self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Rollback => "rollback",
        }
    }
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    name: String,
    version: i64,
    checksum: String,
    action: String,
    executed_at: String,
}

#[derive(sqlx::FromRow)]
struct LockRow {
    owner: String,
    acquired_at: i64,
}

#[derive(sqlx::FromRow)]
struct ForeignKeyViolation {
    #[sqlx(rename = "table")]
    table_name: String,
    rowid: Option<i64>,
    parent: String,
}

#[derive(sqlx::FromRow)]
struct SchemaObject {
    #[sqlx(rename = "type")]
    kind: String,
    name: String,
    sql: Option<String>,
}

/// Applies, rolls back and inspects migrations for one database.
pub struct MigrationRunner {
    pool: SqlitePool,
    migrations_dir: PathBuf,
    options: RunnerOptions,
}

impl MigrationRunner {
    /// Open (or create) the database at `database`, reading migrations from
    /// `migrations_dir`.
    pub async fn connect(
        database: &Path,
        migrations_dir: impl Into<PathBuf>,
    ) -> MigrationResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        Ok(Self::with_pool(pool, migrations_dir))
    }

    /// Create a runner over an in-memory database (for testing).
    pub async fn in_memory(migrations_dir: impl Into<PathBuf>) -> MigrationResult<Self> {
        let options = SqliteConnectOptions::from_str(":memory:")?.foreign_keys(false);

        // A single connection that never expires: the database lives in it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self::with_pool(pool, migrations_dir))
    }

    fn with_pool(pool: SqlitePool, migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            migrations_dir: migrations_dir.into(),
            options: RunnerOptions::default(),
        }
    }

    /// Replace the runner settings.
    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Directory migrations are read from.
    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Applied and pending migrations.
    pub async fn status(&self) -> MigrationResult<MigrationStatus> {
        let units = discover(&self.migrations_dir).await?;
        let applied = self.applied().await?;
        let pending = pending(&units, &applied)
            .into_iter()
            .map(|u| u.name.clone())
            .collect();

        Ok(MigrationStatus {
            current: applied.last().map(|a| a.name.clone()),
            pending,
            applied,
        })
    }

    /// Apply every pending migration in order.
    ///
    /// A failing unit is rolled back, reported in [`UpReport::errors`] and
    /// stops the run; units before it stay applied.
    pub async fn up(&self, options: UpOptions) -> MigrationResult<UpReport> {
        let started = Instant::now();
        let units = discover(&self.migrations_dir).await?;
        let applied = self.applied().await?;
        verify_checksums(&units, &applied)?;

        let pending = pending(&units, &applied);
        if let Some(empty) = pending.iter().find(|u| !u.has_up()) {
            return Err(MigrationError::Parse {
                name: empty.name.clone(),
                reason: "empty -- Up section".to_string(),
            });
        }

        let mut report = UpReport::default();
        if options.dry_run {
            report.preview = pending
                .iter()
                .map(|u| PlannedMigration {
                    name: u.name.clone(),
                    sql: u.up_sql.clone(),
                })
                .collect();
            report.execution_time_ms = elapsed_ms(started);
            return Ok(report);
        }

        if pending.is_empty() {
            tracing::info!("database is up to date");
            report.execution_time_ms = elapsed_ms(started);
            return Ok(report);
        }

        let owner = self.acquire_lock().await?;
        let result = self.apply_locked(&units, options.backup, &mut report).await;
        self.release_lock(&owner).await;
        result?;

        report.execution_time_ms = elapsed_ms(started);
        tracing::info!(
            applied = report.applied.len(),
            errors = report.errors.len(),
            "migration run finished in {}ms",
            report.execution_time_ms
        );
        Ok(report)
    }

    /// Apply what is pending once the lock is held. The ledger is read again
    /// since another runner may have migrated while this one waited.
    async fn apply_locked(
        &self,
        units: &[MigrationUnit],
        backup: bool,
        report: &mut UpReport,
    ) -> MigrationResult<()> {
        let applied = self.applied().await?;
        verify_checksums(units, &applied)?;
        let pending = pending(units, &applied);

        if backup {
            if let Some(first) = pending.first() {
                let file = format!("pre_{}_{}.db", first.name, Utc::now().format("%Y%m%d%H%M%S"));
                let path = self.options.backup_dir.join(file);
                self.backup(&path).await?;
                report.backup = Some(path);
            }
        }

        for unit in pending {
            match self.apply_unit(unit).await {
                Ok(ms) => {
                    tracing::info!("applied {} ({}ms)", unit.name, ms);
                    report.applied.push(unit.name.clone());
                }
                Err(e) => {
                    tracing::error!("{}", e);
                    report.errors.push(MigrationFailure {
                        name: Some(unit.name.clone()),
                        error: e.to_string(),
                    });
                    break;
                }
            }
        }

        for violation in self.foreign_key_violations().await? {
            tracing::warn!("{}", violation);
            report.errors.push(MigrationFailure {
                name: None,
                error: violation,
            });
        }
        Ok(())
    }

    async fn apply_unit(&self, unit: &MigrationUnit) -> MigrationResult<u64> {
        let started = Instant::now();
        let mut tx = self.pool.begin().await?;
        sqlx::raw_sql(&unit.up_sql)
            .execute(&mut *tx)
            .await
            .map_err(|source| MigrationError::Failed {
                name: unit.name.clone(),
                source,
            })?;
        let ms = elapsed_ms(started);
        record(&mut *tx, unit, Action::Apply, ms).await?;
        tx.commit().await?;
        Ok(ms)
    }

    async fn revert_unit(&self, unit: &MigrationUnit) -> MigrationResult<u64> {
        let down_sql = unit
            .down_sql
            .as_deref()
            .ok_or_else(|| MigrationError::NotReversible(unit.name.clone()))?;

        let started = Instant::now();
        let mut tx = self.pool.begin().await?;
        sqlx::raw_sql(down_sql)
            .execute(&mut *tx)
            .await
            .map_err(|source| MigrationError::Failed {
                name: unit.name.clone(),
                source,
            })?;
        let ms = elapsed_ms(started);
        record(&mut *tx, unit, Action::Rollback, ms).await?;
        tx.commit().await?;
        tracing::info!("rolled back {} ({}ms)", unit.name, ms);
        Ok(ms)
    }

    /// Roll back the most recently applied migration. Fails with
    /// [`MigrationError::ChecksumMismatch`] if its file changed since it ran.
    pub async fn down(&self) -> MigrationResult<DownReport> {
        let started = Instant::now();
        if self.applied().await?.is_empty() {
            return Err(MigrationError::NothingToRollBack);
        }
        let units = discover(&self.migrations_dir).await?;

        let owner = self.acquire_lock().await?;
        let result = self.down_locked(&units).await;
        self.release_lock(&owner).await;

        Ok(DownReport {
            rolled_back: result?,
            execution_time_ms: elapsed_ms(started),
        })
    }

    async fn down_locked(&self, units: &[MigrationUnit]) -> MigrationResult<String> {
        let applied = self.applied().await?;
        let latest = applied.last().ok_or(MigrationError::NothingToRollBack)?;
        verify_checksums(units, std::slice::from_ref(latest))?;
        let unit = find_unit(units, &latest.name)?;
        if !unit.is_reversible() {
            return Err(MigrationError::NotReversible(unit.name.clone()));
        }
        self.revert_unit(unit).await?;
        Ok(unit.name.clone())
    }

    /// Roll back, newest first, until `version` is the latest applied
    /// migration. Version `0` rolls back everything.
    ///
    /// Every migration to be rolled back is checked for Down SQL and an
    /// unchanged checksum before any of them runs.
    pub async fn rollback_to(&self, version: u32) -> MigrationResult<RollbackReport> {
        let units = discover(&self.migrations_dir).await?;

        let owner = self.acquire_lock().await?;
        let result = self.rollback_locked(&units, version).await;
        self.release_lock(&owner).await;
        result
    }

    async fn rollback_locked(
        &self,
        units: &[MigrationUnit],
        version: u32,
    ) -> MigrationResult<RollbackReport> {
        let applied = self.applied().await?;
        let keep = if version == 0 {
            0
        } else {
            applied
                .iter()
                .rposition(|a| a.version == version)
                .map(|i| i + 1)
                .ok_or(MigrationError::UnknownVersion(version))?
        };

        verify_checksums(units, &applied[keep..])?;
        let targets = applied[keep..]
            .iter()
            .rev()
            .map(|a| find_unit(units, &a.name))
            .collect::<MigrationResult<Vec<_>>>()?;
        if let Some(unit) = targets.iter().find(|u| !u.is_reversible()) {
            return Err(MigrationError::NotReversible(unit.name.clone()));
        }

        let mut report = RollbackReport::default();
        for unit in targets {
            if let Err(e) = self.revert_unit(unit).await {
                tracing::error!(
                    rolled_back = report.rolled_back.len(),
                    "rollback to version {} stopped: {}",
                    version,
                    e
                );
                return Err(e);
            }
            report.rolled_back.push(unit.name.clone());
        }
        Ok(report)
    }

    /// Check one migration without changing the database.
    ///
    /// `name` is the file name or its stem.
    pub async fn validate(
        &self,
        name: &str,
        options: ValidateOptions,
    ) -> MigrationResult<ValidationReport> {
        let files = migration_files(&self.migrations_dir).await?;
        let wanted = name.strip_suffix(".sql").unwrap_or(name);
        let file = files
            .iter()
            .find(|f| f.name == wanted)
            .ok_or_else(|| MigrationError::NotFound(name.to_string()))?;
        let contents = tokio::fs::read_to_string(&file.path)
            .await
            .map_err(|e| MigrationError::io(&file.path, e))?;

        let mut report = ValidationReport::default();
        let unit = match parse_migration_file(&file.name, &contents) {
            Ok(unit) => unit,
            Err(e) => {
                report.errors.push(e.to_string());
                return Ok(report);
            }
        };

        if !unit.has_up() {
            report.errors.push("-- Up section is empty".to_string());
        }
        if !unit.is_reversible() {
            report
                .warnings
                .push("no -- Down section; the migration cannot be rolled back".to_string());
        }
        if unit.legacy {
            report
                .warnings
                .push("no -- Up / -- Down markers; Down SQL was generated".to_string());
        }
        report
            .errors
            .extend(check_sql(&unit.up_sql).into_iter().map(|p| format!("Up: {p}")));
        if let Some(down_sql) = &unit.down_sql {
            report
                .errors
                .extend(check_sql(down_sql).into_iter().map(|p| format!("Down: {p}")));
        }

        for dependency in &unit.dependencies {
            if !files
                .iter()
                .any(|f| dependency_matches(dependency, f.version, &f.name))
            {
                report
                    .errors
                    .push(format!("depends on unknown migration {dependency}"));
            }
        }

        let applied = self.applied().await?;
        if let Some(recorded) = applied.iter().find(|a| a.name == unit.name) {
            if recorded.checksum != unit.checksum {
                report.errors.push(format!(
                    "file changed since it was applied (recorded {}, on disk {})",
                    recorded.checksum, unit.checksum
                ));
            }
        }

        if options.schema_check && unit.has_up() {
            self.schema_check(&unit, &mut report).await?;
        }

        report.valid = report.errors.is_empty();
        Ok(report)
    }

    async fn schema_check(
        &self,
        unit: &MigrationUnit,
        report: &mut ValidationReport,
    ) -> MigrationResult<()> {
        let mut tx = self.pool.begin().await?;
        let before = schema(&mut *tx).await?;

        if let Err(e) = sqlx::raw_sql(&unit.up_sql).execute(&mut *tx).await {
            report.errors.push(format!("Up failed: {e}"));
        } else if let Some(down_sql) = &unit.down_sql {
            if let Err(e) = sqlx::raw_sql(down_sql).execute(&mut *tx).await {
                report.errors.push(format!("Down failed: {e}"));
            } else if schema(&mut *tx).await? != before {
                report
                    .warnings
                    .push("Down does not restore the schema Up started from".to_string());
            }
        }

        tx.rollback().await?;
        Ok(())
    }

    /// Write an empty migration file with the next version number.
    pub async fn create(&self, name: &str) -> MigrationResult<CreatedMigration> {
        let slug = sanitize_name(name);
        if slug.is_empty() {
            return Err(MigrationError::InvalidName(name.to_string()));
        }

        let files = migration_files(&self.migrations_dir).await?;
        let version = files.iter().map(|f| f.version).max().unwrap_or(0) + 1;
        let filename = format!("{version:03}_{slug}.sql");
        let path = self.migrations_dir.join(&filename);

        tokio::fs::create_dir_all(&self.migrations_dir)
            .await
            .map_err(|e| MigrationError::io(&self.migrations_dir, e))?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => MigrationError::AlreadyExists(path.clone()),
                _ => MigrationError::io(&path, e),
            })?;
        file.write_all(TEMPLATE.as_bytes())
            .await
            .map_err(|e| MigrationError::io(&path, e))?;

        tracing::info!("created {}", path.display());
        Ok(CreatedMigration {
            filename,
            path,
            version,
        })
    }

    /// Copy the whole database to `path`.
    pub async fn backup(&self, path: &Path) -> MigrationResult<()> {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(MigrationError::AlreadyExists(path.to_path_buf()));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MigrationError::io(parent, e))?;
        }

        sqlx::query("VACUUM INTO ?1")
            .bind(path.to_string_lossy().into_owned())
            .execute(&self.pool)
            .await?;
        tracing::info!("backed up database to {}", path.display());
        Ok(())
    }

    /// Replace the schema and data with the contents of a backup file.
    ///
    /// The migration ledger comes from the backup too; the lock table does
    /// not.
    pub async fn restore(&self, path: &Path) -> MigrationResult<()> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| MigrationError::io(path, e))?
        {
            return Err(MigrationError::io(
                path,
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        }

        let owner = self.acquire_lock().await?;
        let result = self.restore_locked(path).await;
        self.release_lock(&owner).await;
        let objects = result?;

        tracing::info!(objects, "restored database from {}", path.display());
        Ok(())
    }

    async fn restore_locked(&self, path: &Path) -> MigrationResult<usize> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("ATTACH DATABASE ?1 AS backup")
            .bind(path.to_string_lossy().into_owned())
            .execute(&mut *conn)
            .await?;

        let copied = copy_from_backup(&mut conn).await;
        let detached = sqlx::query("DETACH DATABASE backup")
            .execute(&mut *conn)
            .await;

        let copied = copied?;
        detached?;
        Ok(copied)
    }

    /// Clear the migration lock regardless of who holds it.
    ///
    /// Returns whether a lock was held.
    pub async fn force_unlock(&self) -> MigrationResult<bool> {
        self.ensure_schema().await?;
        let result = sqlx::query("DELETE FROM _strata_migration_lock WHERE id = 1")
            .execute(&self.pool)
            .await?;
        let cleared = result.rows_affected() > 0;
        if cleared {
            tracing::warn!("migration lock cleared by force");
        }
        Ok(cleared)
    }

    async fn ensure_schema(&self) -> MigrationResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> MigrationResult<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1")
                .bind(table)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    /// Applied migrations, oldest first, folded from the ledger.
    async fn applied(&self) -> MigrationResult<Vec<AppliedMigration>> {
        if !self.table_exists(LEDGER_TABLE).await? {
            return Ok(Vec::new());
        }

        let rows: Vec<LedgerRow> = sqlx::query_as(
            "SELECT name, version, checksum, action, executed_at FROM _strata_migrations ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut applied: Vec<AppliedMigration> = Vec::new();
        for row in rows {
            if row.action == Action::Rollback.as_str() {
                if let Some(i) = applied.iter().rposition(|a| a.name == row.name) {
                    applied.remove(i);
                }
            } else {
                applied.push(AppliedMigration {
                    name: row.name,
                    version: u32::try_from(row.version).unwrap_or_default(),
                    checksum: row.checksum,
                    executed_at: row.executed_at,
                });
            }
        }
        Ok(applied)
    }

    /// Take the migration lock, replacing one older than the lock timeout.
    /// Returns the owner id to release it with.
    ///
    /// Never waits: the attempt runs with a zero busy timeout, and a database
    /// busy with another connection's write counts as a held lock.
    pub(crate) async fn acquire_lock(&self) -> MigrationResult<String> {
        let owner = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        let timeout = i64::try_from(self.options.lock_timeout.as_secs()).unwrap_or(i64::MAX);
        let stale_before = now.saturating_sub(timeout);

        let mut conn = self.pool.acquire().await?;
        sqlx::query("PRAGMA busy_timeout = 0").execute(&mut *conn).await?;

        let attempt = match try_lock(&mut conn, &owner, now, stale_before).await {
            Err(e) if is_busy(&e) => {
                tracing::debug!("database busy while taking migration lock: {}", e);
                Ok(false)
            }
            other => other,
        };
        let holder = match attempt {
            Ok(false) => lock_holder(&mut conn).await,
            _ => None,
        };

        let restore = format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT.as_millis());
        if let Err(e) = sqlx::query(&restore).execute(&mut *conn).await {
            tracing::warn!("closing connection after failed busy timeout reset: {}", e);
            let _ = conn.close().await;
        }

        if attempt? {
            tracing::info!(owner = %owner, "migration lock acquired");
            return Ok(owner);
        }

        let (owner, since) = holder.map_or_else(
            || (String::from("unknown"), now),
            |row| (row.owner, row.acquired_at),
        );
        tracing::warn!(owner = %owner, since, "migration lock is held");
        Err(MigrationError::LockHeld { owner, since })
    }

    pub(crate) async fn release_lock(&self, owner: &str) {
        let result = sqlx::query("DELETE FROM _strata_migration_lock WHERE id = 1 AND owner = ?1")
            .bind(owner)
            .execute(&self.pool)
            .await;
        match result {
            Ok(_) => tracing::debug!(owner = %owner, "migration lock released"),
            Err(e) => tracing::error!(owner = %owner, "failed to release migration lock: {}", e),
        }
    }

    async fn foreign_key_violations(&self) -> MigrationResult<Vec<String>> {
        let rows: Vec<ForeignKeyViolation> = sqlx::query_as("PRAGMA foreign_key_check")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|v| match v.rowid {
                Some(rowid) => format!(
                    "foreign key violation: {} row {} references missing {}",
                    v.table_name, rowid, v.parent
                ),
                None => format!(
                    "foreign key violation: {} references missing {}",
                    v.table_name, v.parent
                ),
            })
            .collect())
    }
}

async fn record(
    conn: &mut SqliteConnection,
    unit: &MigrationUnit,
    action: Action,
    execution_ms: u64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO _strata_migrations (name, version, checksum, action, executed_at, execution_ms)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(&unit.name)
    .bind(i64::from(unit.version))
    .bind(&unit.checksum)
    .bind(action.as_str())
    .bind(Utc::now().to_rfc3339())
    .bind(i64::try_from(execution_ms).unwrap_or(i64::MAX))
    .execute(conn)
    .await?;
    Ok(())
}

/// Tables, indexes, triggers and views in `main`, excluding SQLite internals.
async fn schema(conn: &mut SqliteConnection) -> Result<Vec<(String, String, Option<String>)>, sqlx::Error> {
    let objects: Vec<SchemaObject> = sqlx::query_as(
        "SELECT type, name, sql FROM main.sqlite_master WHERE name NOT LIKE 'sqlite%' ORDER BY type, name",
    )
    .fetch_all(conn)
    .await?;
    Ok(objects.into_iter().map(|o| (o.kind, o.name, o.sql)).collect())
}

/// Rebuild `main` from the database attached as `backup`, in one
/// transaction. Returns how many schema objects were recreated.
async fn copy_from_backup(conn: &mut SqliteConnection) -> MigrationResult<usize> {
    let mut tx = conn.begin().await?;

    let existing: Vec<SchemaObject> = sqlx::query_as(
        "SELECT type, name, sql FROM main.sqlite_master \
         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite%' AND name != ?1",
    )
    .bind(LOCK_TABLE)
    .fetch_all(&mut *tx)
    .await?;
    // Views first: they may reference the tables.
    for kind in ["view", "table"] {
        for object in existing.iter().filter(|o| o.kind == kind) {
            let statement = format!(
                "DROP {} IF EXISTS main.{}",
                kind.to_uppercase(),
                quote_ident(&object.name)
            );
            sqlx::query(&statement).execute(&mut *tx).await?;
        }
    }

    let objects: Vec<SchemaObject> = sqlx::query_as(
        "SELECT type, name, sql FROM backup.sqlite_master \
         WHERE sql IS NOT NULL AND name NOT LIKE 'sqlite%' AND name != ?1",
    )
    .bind(LOCK_TABLE)
    .fetch_all(&mut *tx)
    .await?;

    let mut created = 0;
    for kind in ["table", "index", "trigger", "view"] {
        for object in objects.iter().filter(|o| o.kind == kind) {
            let Some(sql) = &object.sql else { continue };
            sqlx::raw_sql(sql).execute(&mut *tx).await?;
            if kind == "table" {
                let copy = format!(
                    "INSERT INTO main.{name} SELECT * FROM backup.{name}",
                    name = quote_ident(&object.name)
                );
                sqlx::query(&copy).execute(&mut *tx).await?;
            }
            created += 1;
        }
    }

    tx.commit().await?;
    Ok(created)
}

/// One attempt at the lock row. True if this owner now holds it.
async fn try_lock(
    conn: &mut SqliteConnection,
    owner: &str,
    now: i64,
    stale_before: i64,
) -> Result<bool, sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(&mut *conn).await?;
    let result = sqlx::query(
        r#"
        INSERT INTO _strata_migration_lock (id, owner, acquired_at) VALUES (1, ?1, ?2)
        ON CONFLICT(id) DO UPDATE SET owner = excluded.owner, acquired_at = excluded.acquired_at
        WHERE _strata_migration_lock.acquired_at < ?3
        "#,
    )
    .bind(owner)
    .bind(now)
    .bind(stale_before)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Current lock row. A read that fails (busy, or no lock table yet) gives
/// `None`.
async fn lock_holder(conn: &mut SqliteConnection) -> Option<LockRow> {
    sqlx::query_as("SELECT owner, acquired_at FROM _strata_migration_lock WHERE id = 1")
        .fetch_optional(&mut *conn)
        .await
        .unwrap_or_else(|e| {
            tracing::debug!("could not read migration lock holder: {}", e);
            None
        })
}

/// SQLITE_BUSY or SQLITE_LOCKED, extended codes included.
fn is_busy(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db) = err else {
        return false;
    };
    db.code()
        .and_then(|code| code.parse::<i32>().ok())
        .map_or(false, |code| matches!(code & 0xff, 5 | 6))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn pending<'a>(units: &'a [MigrationUnit], applied: &[AppliedMigration]) -> Vec<&'a MigrationUnit> {
    units
        .iter()
        .filter(|u| !applied.iter().any(|a| a.name == u.name))
        .collect()
}

fn verify_checksums(units: &[MigrationUnit], applied: &[AppliedMigration]) -> MigrationResult<()> {
    for record in applied {
        match units.iter().find(|u| u.name == record.name) {
            Some(unit) if unit.checksum != record.checksum => {
                return Err(MigrationError::ChecksumMismatch {
                    name: record.name.clone(),
                    recorded: record.checksum.clone(),
                    actual: unit.checksum.clone(),
                });
            }
            Some(_) => {}
            None => tracing::warn!("applied migration {} has no file on disk", record.name),
        }
    }
    Ok(())
}

fn find_unit<'a>(units: &'a [MigrationUnit], name: &str) -> MigrationResult<&'a MigrationUnit> {
    units
        .iter()
        .find(|u| u.name == name)
        .ok_or_else(|| MigrationError::MissingFile(name.to_string()))
}

/// Lowercase, with runs of anything but letters and digits turned into `_`.
fn sanitize_name(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
