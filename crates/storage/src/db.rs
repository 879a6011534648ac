use clinicbooks_core::{Clinic, ClinicId};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;

pub type DbPool = Pool<Sqlite>;

/// How long a connection waits on another writer's lock before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Opens (creating if needed) the database at `path` and brings the schema up to date.
pub async fn create_db(path: &Path, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    open_db(path, max_connections, DEFAULT_BUSY_TIMEOUT).await
}

/// [`create_db`] with an explicit busy timeout.
///
/// Pragmas are set on the connect options so every pooled connection gets them.
pub async fn open_db(
    path: &Path,
    max_connections: u32,
    busy_timeout: Duration,
) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(busy_timeout)
        .pragma("cache_size", "-32000");

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    tracing::debug!(path = %path.display(), max_connections, ?busy_timeout, "database ready");
    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS clinics (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            location TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS upload_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            status TEXT NOT NULL DEFAULT 'pending',
            file_names TEXT NOT NULL,
            file_count INTEGER NOT NULL,
            records_count INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            clinics_affected TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS financial_records (
            clinic_id INTEGER NOT NULL,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL CHECK (month BETWEEN 1 AND 12),
            date TEXT NOT NULL,
            line_items TEXT NOT NULL,
            total_income_cents INTEGER NOT NULL,
            total_cogs_cents INTEGER NOT NULL,
            gross_profit_cents INTEGER NOT NULL,
            total_expenses_cents INTEGER NOT NULL,
            net_ordinary_income_cents INTEGER NOT NULL,
            net_income_cents INTEGER NOT NULL,
            current_version INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (clinic_id, year, month),
            FOREIGN KEY (clinic_id) REFERENCES clinics(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS record_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            clinic_id INTEGER NOT NULL,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            version INTEGER NOT NULL,
            snapshot TEXT NOT NULL,
            upload_id INTEGER,
            change_kind TEXT NOT NULL,
            rolled_back_from INTEGER,
            created_at TEXT NOT NULL,
            FOREIGN KEY (clinic_id) REFERENCES clinics(id),
            FOREIGN KEY (upload_id) REFERENCES upload_history(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_record_versions_key ON record_versions (clinic_id, year, month, version)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_record_versions_upload ON record_versions (upload_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Inserts the configured clinics. Existing rows are left untouched.
pub async fn seed_clinics(pool: &DbPool, clinics: &[Clinic]) -> Result<(), sqlx::Error> {
    for clinic in clinics {
        sqlx::query("INSERT OR IGNORE INTO clinics (id, name, location) VALUES (?, ?, ?)")
            .bind(clinic.id.0)
            .bind(&clinic.name)
            .bind(&clinic.location)
            .execute(pool)
            .await?;
    }

    Ok(())
}

pub async fn get_clinics(pool: &DbPool) -> Result<Vec<Clinic>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (i64, String, String)>(
        "SELECT id, name, location FROM clinics ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, name, location)| Clinic {
            id: ClinicId(id),
            name,
            location,
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tempfile::TempDir;

    /// A fresh on-disk database with clinics 1 to 3. Keep the `TempDir` alive.
    pub async fn test_db() -> (TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("test.db"), 4).await.unwrap();
        seed_clinics(
            &pool,
            &[
                Clinic::new(1, "Northside", "Austin"),
                Clinic::new(2, "Lakeview", "Dallas"),
                Clinic::new(3, "Riverside", "Houston"),
            ],
        )
        .await
        .unwrap();
        (dir, pool)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::test_db;
    use super::*;

    #[tokio::test]
    async fn migrations_are_repeatable() {
        let (_dir, pool) = test_db().await;
        run_migrations(&pool).await.unwrap();
        assert_eq!(get_clinics(&pool).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn seeding_never_overwrites() {
        let (_dir, pool) = test_db().await;
        seed_clinics(&pool, &[Clinic::new(1, "Renamed", "Elsewhere")])
            .await
            .unwrap();
        let clinics = get_clinics(&pool).await.unwrap();
        assert_eq!(clinics[0].name, "Northside");
        assert_eq!(clinics[0].location, "Austin");
    }

    #[tokio::test]
    async fn creates_missing_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested.db");
        assert!(!path.exists());
        let pool = create_db(&path, 1).await.unwrap();
        assert!(path.exists());
        pool.close().await;
    }
}
