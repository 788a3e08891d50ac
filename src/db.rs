use crate::config::Config;
use crate::error::{AppError, AppResult};
use anyhow::Result;
use libsql::{Builder, Connection, Database as LibsqlDatabase};
use std::ops::Deref;
use std::path::Path;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

const SYSTEM_MIGRATIONS: &[(&str, &str)] =
    &[("system/000_migrations_table.sql", include_str!("migrations/system/000_migrations_table.sql"))];

const MIGRATIONS: &[(&str, &str)] = &[("001_accounts.sql", include_str!("migrations/001_accounts.sql"))];

/// Process-wide store handle. Constructed once at startup and passed to handlers
/// through `AppState`. The single connection lives behind a mutex: reads go
/// through [`Database::read`], writes through [`Database::begin`].
pub struct Database {
    db: LibsqlDatabase,
    conn: Mutex<Connection>,
    turso_url: Option<String>,
    turso_auth_token: Option<String>,
}

/// Exclusive use of the connection outside any transaction.
pub struct ReadGuard<'a> {
    conn: MutexGuard<'a, Connection>,
}

/// Exclusive use of the connection inside an open `BEGIN IMMEDIATE`.
pub struct WriteGuard<'a> {
    conn: MutexGuard<'a, Connection>,
}

impl Deref for ReadGuard<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Deref for WriteGuard<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Database {
    pub fn is_replica(turso_url: &Option<String>, turso_auth_token: &Option<String>) -> bool {
        turso_url.is_some() && turso_auth_token.is_some()
    }

    pub async fn sync(&self) -> Result<()> {
        if Self::is_replica(&self.turso_url, &self.turso_auth_token) {
            let _conn = self.lock().await?;
            self.db
                .sync()
                .await
                .map_err(|e| anyhow::anyhow!("sync failed: {}", e))?;
        }
        Ok(())
    }

    async fn is_migration_applied(conn: &Connection, name: &str) -> Result<bool> {
        let query = "SELECT 1 FROM _migrations WHERE name = ?";
        match conn.query(query, libsql::params![name]).await {
            Ok(mut rows) => Ok(rows.next().await?.is_some()),
            Err(e) => {
                if e.to_string().contains("no such table") {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn record_migration(conn: &Connection, name: &str) -> Result<()> {
        let query = r#"
            INSERT INTO _migrations (name, applied_at)
            VALUES (?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        "#;
        conn.execute(query, libsql::params![name]).await?;
        Ok(())
    }

    async fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
        if Self::is_migration_applied(conn, name).await? {
            tracing::debug!("migration {} already applied, skipping", name);
            return Ok(());
        }

        tracing::info!(migration = name, "applying migration");
        conn.execute_batch(sql)
            .await
            .map_err(|e| anyhow::anyhow!("failed to execute migration {name}: {e}"))?;

        Self::record_migration(conn, name).await?;
        Ok(())
    }

    pub async fn new(cfg: &Config, data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(cfg.app.get_db());
        let turso_url = cfg.app.turso_url.clone();
        let turso_auth_token = cfg.app.turso_auth_token.clone();

        let db = match (&turso_url, &turso_auth_token) {
            (Some(url), Some(token)) => {
                tracing::info!("[db] running in synced database mode (offline writes)");
                let sync_interval = Duration::from_secs(cfg.app.sync_interval_seconds);
                Builder::new_synced_database(&path, url.clone(), token.clone())
                    .sync_interval(sync_interval)
                    .build()
                    .await?
            }
            _ => Builder::new_local(&path).build().await?,
        };

        Self::setup(db, turso_url, turso_auth_token).await
    }

    /// Opens a plain local database. `":memory:"` gives a throwaway store.
    pub async fn open_local(path: impl AsRef<Path>) -> Result<Self> {
        let db = Builder::new_local(path.as_ref()).build().await?;
        Self::setup(db, None, None).await
    }

    async fn setup(
        db: LibsqlDatabase,
        turso_url: Option<String>,
        turso_auth_token: Option<String>,
    ) -> Result<Self> {
        let conn = db.connect()?;
        conn.query("SELECT 1", ()).await?;
        conn.execute("PRAGMA foreign_keys = ON", ()).await?;

        let feature_migrations = [
            crate::catalog::migrations(),
            crate::roster::migrations(),
            crate::circulation::migrations(),
        ];
        let all = SYSTEM_MIGRATIONS
            .iter()
            .chain(MIGRATIONS.iter())
            .chain(feature_migrations.iter().flat_map(|m| m.iter()));

        for (filename, sql) in all {
            Self::run_migration(&conn, filename, sql).await?;
        }

        Ok(Database {
            db,
            conn: Mutex::new(conn),
            turso_url,
            turso_auth_token,
        })
    }

    async fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        let conn = self.conn.lock().await;
        // a writer dropped mid-transaction leaves it open
        if !conn.is_autocommit() {
            tracing::warn!("abandoned transaction found, rolling back");
            conn.execute("ROLLBACK", ()).await?;
        }
        Ok(conn)
    }

    /// Waits for any running transaction to end, so reads only see committed rows.
    pub async fn read(&self) -> AppResult<ReadGuard<'_>> {
        Ok(ReadGuard { conn: self.lock().await? })
    }

    /// Takes the connection and opens an immediate transaction. The caller
    /// must hand the outcome to [`Database::finish`] together with the guard.
    pub async fn begin(&self) -> AppResult<WriteGuard<'_>> {
        let conn = self.lock().await?;
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        Ok(WriteGuard { conn })
    }

    /// Commits on `Ok`, rolls back on `Err` or on a failed commit.
    pub async fn finish<T>(&self, tx: WriteGuard<'_>, result: AppResult<T>) -> AppResult<T> {
        match result {
            Ok(value) => match tx.execute("COMMIT", ()).await {
                Ok(_) => Ok(value),
                Err(e) => {
                    rollback(&tx).await;
                    Err(AppError::Database(e))
                }
            },
            Err(e) => {
                rollback(&tx).await;
                Err(e)
            }
        }
    }

    pub async fn exists(&self, table: &str, id: i32) -> AppResult<bool> {
        let conn = self.read().await?;
        row_exists(&conn, table, id).await
    }
}

async fn rollback(conn: &Connection) {
    if let Err(e) = conn.execute("ROLLBACK", ()).await {
        tracing::error!(error = %e, "failed to roll back transaction");
    }
}

/// Number of rows in `table` matching `column = id`.
pub async fn count_rows(conn: &Connection, table: &str, column: &str, id: i32) -> AppResult<i64> {
    let query = format!("SELECT COUNT(*) FROM {table} WHERE {column} = ?");
    let mut rows = conn.query(&query, libsql::params![id]).await?;
    match rows.next().await? {
        Some(row) => Ok(row.get(0)?),
        None => Ok(0),
    }
}

pub async fn row_exists(conn: &Connection, table: &str, id: i32) -> AppResult<bool> {
    Ok(count_rows(conn, table, "id", id).await? > 0)
}
