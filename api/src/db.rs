use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Postgres, Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;
use crate::models::ListeningRecord;

const PG_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS listening_history (
        id BIGSERIAL PRIMARY KEY,
        track_name TEXT NOT NULL,
        artist_name TEXT,
        album_name TEXT,
        played_at TIMESTAMPTZ,
        ms_played BIGINT,
        platform TEXT,
        track_uri TEXT
    )
"#;

const SQLITE_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS listening_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        track_name TEXT NOT NULL,
        artist_name TEXT,
        album_name TEXT,
        played_at TEXT,
        ms_played INTEGER,
        platform TEXT,
        track_uri TEXT
    )
"#;

// played_at is bound as text and parsed by Postgres itself
const PG_INSERT: &str = r#"
    INSERT INTO listening_history
        (track_name, artist_name, album_name, played_at, ms_played, platform, track_uri)
    VALUES ($1, $2, $3, CAST($4 AS TIMESTAMPTZ), $5, $6, $7)
"#;

const SQLITE_INSERT: &str = r#"
    INSERT INTO listening_history
        (track_name, artist_name, album_name, played_at, ms_played, platform, track_uri)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#;

/// Handle to the listening-history store.
///
/// Postgres in production; SQLite for local files (`sqlite://...` URLs) and tests.
#[derive(Debug, Clone)]
pub enum Pool {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

/// One chunk's transaction. Dropping it without committing rolls it back.
pub enum ChunkTransaction {
    Postgres(Transaction<'static, Postgres>),
    Sqlite(Transaction<'static, Sqlite>),
}

pub async fn init_db(config: &Config) -> Result<Pool> {
    let pool = if config.database_url.starts_with("sqlite:") {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .context("invalid sqlite DATABASE_URL")?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;
        Pool::Sqlite(pool)
    } else {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&config.database_url)
            .await?;
        Pool::Postgres(pool)
    };

    pool.ensure_schema()
        .await
        .context("failed to create listening_history table")?;

    Ok(pool)
}

impl Pool {
    /// Create `listening_history` if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        match self {
            Pool::Postgres(pool) => {
                sqlx::query(PG_SCHEMA).execute(pool).await?;
            }
            Pool::Sqlite(pool) => {
                sqlx::query(SQLITE_SCHEMA).execute(pool).await?;
            }
        }
        Ok(())
    }

    /// Acquire a connection and open a transaction on it.
    pub async fn begin(&self) -> Result<ChunkTransaction, sqlx::Error> {
        match self {
            Pool::Postgres(pool) => Ok(ChunkTransaction::Postgres(pool.begin().await?)),
            Pool::Sqlite(pool) => Ok(ChunkTransaction::Sqlite(pool.begin().await?)),
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Pool::Postgres(_) => "postgres",
            Pool::Sqlite(_) => "sqlite",
        }
    }

    pub async fn close(&self) {
        match self {
            Pool::Postgres(pool) => pool.close().await,
            Pool::Sqlite(pool) => pool.close().await,
        }
    }
}

impl ChunkTransaction {
    pub async fn insert(&mut self, record: &ListeningRecord) -> Result<(), sqlx::Error> {
        match self {
            ChunkTransaction::Postgres(tx) => {
                sqlx::query(PG_INSERT)
                    .bind(&record.track_name)
                    .bind(&record.artist_name)
                    .bind(&record.album_name)
                    .bind(&record.played_at)
                    .bind(record.ms_played)
                    .bind(&record.platform)
                    .bind(&record.track_uri)
                    .execute(&mut **tx)
                    .await?;
            }
            ChunkTransaction::Sqlite(tx) => {
                sqlx::query(SQLITE_INSERT)
                    .bind(&record.track_name)
                    .bind(&record.artist_name)
                    .bind(&record.album_name)
                    .bind(&record.played_at)
                    .bind(record.ms_played)
                    .bind(&record.platform)
                    .bind(&record.track_uri)
                    .execute(&mut **tx)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn commit(self) -> Result<(), sqlx::Error> {
        match self {
            ChunkTransaction::Postgres(tx) => tx.commit().await,
            ChunkTransaction::Sqlite(tx) => tx.commit().await,
        }
    }

    pub async fn rollback(self) -> Result<(), sqlx::Error> {
        match self {
            ChunkTransaction::Postgres(tx) => tx.rollback().await,
            ChunkTransaction::Sqlite(tx) => tx.rollback().await,
        }
    }
}

#[cfg(test)]
impl Pool {
    /// Single-connection in-memory SQLite store with the schema in place.
    ///
    /// Every `sqlite::memory:` connection is its own database, so the pool
    /// must never open a second one.
    pub async fn sqlite_in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let pool = Pool::Sqlite(pool);
        pool.ensure_schema().await?;
        Ok(pool)
    }

    /// All stored rows in insertion order.
    pub async fn stored_records(&self) -> Vec<ListeningRecord> {
        let Pool::Sqlite(pool) = self else {
            panic!("stored_records is only available on sqlite test stores");
        };
        sqlx::query_as::<_, ListeningRecord>(
            r#"
            SELECT track_name, artist_name, album_name, played_at, ms_played, platform, track_uri
            FROM listening_history
            ORDER BY id
            "#,
        )
        .fetch_all(pool)
        .await
        .unwrap()
    }

    /// Make every insert of `track_name` fail with a store error.
    pub async fn fail_inserts_of(&self, track_name: &str) {
        let Pool::Sqlite(pool) = self else {
            panic!("fail_inserts_of is only available on sqlite test stores");
        };
        let trigger = format!(
            r#"
            CREATE TRIGGER fail_insert BEFORE INSERT ON listening_history
            WHEN NEW.track_name = '{}'
            BEGIN
                SELECT RAISE(ABORT, 'insert rejected by test trigger');
            END
            "#,
            track_name.replace('\'', "''")
        );
        sqlx::query(&trigger).execute(pool).await.unwrap();
    }

    /// Let inserts of `track_name` succeed but make their transaction fail
    /// at commit, through a deferred foreign key to a missing parent row.
    pub async fn fail_commits_with(&self, track_name: &str) {
        let Pool::Sqlite(pool) = self else {
            panic!("fail_commits_with is only available on sqlite test stores");
        };
        sqlx::query("CREATE TABLE commit_guard_parent (id INTEGER PRIMARY KEY)")
            .execute(pool)
            .await
            .unwrap();
        sqlx::query(
            r#"
            CREATE TABLE commit_guard (
                parent_id INTEGER NOT NULL
                    REFERENCES commit_guard_parent (id) DEFERRABLE INITIALLY DEFERRED
            )
            "#,
        )
        .execute(pool)
        .await
        .unwrap();
        let trigger = format!(
            r#"
            CREATE TRIGGER fail_commit AFTER INSERT ON listening_history
            WHEN NEW.track_name = '{}'
            BEGIN
                INSERT INTO commit_guard (parent_id) VALUES (1);
            END
            "#,
            track_name.replace('\'', "''")
        );
        sqlx::query(&trigger).execute(pool).await.unwrap();
    }
}
