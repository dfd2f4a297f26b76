use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

use crate::engine::{FeedStats, ModelStore, StatsStore, TrackerSnapshot};
use crate::types::DrawRecord;

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Initialize database with schema
    pub async fn new(db_path: &str) -> Result<Self> {
        info!("Initializing SQLite database at: {}", db_path);

        let options = SqliteConnectOptions::from_str(db_path)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.create_schema().await?;

        info!("Database initialized successfully");
        Ok(db)
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS model_store (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS engine_stats (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                correct_count INTEGER NOT NULL,
                incorrect_count INTEGER NOT NULL,
                window_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_stats (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                correct_count INTEGER NOT NULL,
                incorrect_count INTEGER NOT NULL,
                correct_streak INTEGER NOT NULL,
                incorrect_streak INTEGER NOT NULL,
                max_correct_streak INTEGER NOT NULL,
                max_incorrect_streak INTEGER NOT NULL,
                window_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS draws (
                issue TEXT PRIMARY KEY,
                num INTEGER NOT NULL,
                predicted INTEGER,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_draws_created_at ON draws(created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a draw; duplicate issues are ignored (the feed can replay).
    pub async fn insert_draw(&self, issue: &str, num: u8, predicted: Option<u8>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO draws (issue, num, predicted, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(issue)
        .bind(num as i64)
        .bind(predicted.map(|p| p as i64))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Latest draws, oldest first.
    pub async fn recent_draws(&self, limit: i64) -> Result<Vec<DrawRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT issue, num, predicted, created_at
            FROM draws
            ORDER BY created_at DESC, issue DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut draws = Vec::with_capacity(rows.len());
        for row in rows {
            let created_at_str: String = row.get("created_at");
            draws.push(DrawRecord {
                issue: row.get("issue"),
                num: row.get::<i64, _>("num") as u8,
                predicted: row.get::<Option<i64>, _>("predicted").map(|p| p as u8),
                created_at: DateTime::parse_from_rfc3339(&created_at_str)?.with_timezone(&Utc),
            });
        }
        draws.reverse();
        Ok(draws)
    }

    /// The last three accepted draw values in arrival order, if present.
    pub async fn last_three(&self) -> Result<Option<[u8; 3]>> {
        let draws = self.recent_draws(3).await?;
        if draws.len() < 3 {
            return Ok(None);
        }
        Ok(Some([draws[0].num, draws[1].num, draws[2].num]))
    }

    pub async fn load_feed_stats(&self) -> Result<Option<FeedStats>> {
        let row = sqlx::query(
            r#"
            SELECT correct_count, incorrect_count, correct_streak, incorrect_streak,
                   max_correct_streak, max_incorrect_streak, window_json
            FROM feed_stats WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let window_json: String = row.get("window_json");
                Ok(Some(FeedStats {
                    correct_count: row.get::<i64, _>("correct_count") as u64,
                    incorrect_count: row.get::<i64, _>("incorrect_count") as u64,
                    correct_streak: row.get::<i64, _>("correct_streak") as u64,
                    incorrect_streak: row.get::<i64, _>("incorrect_streak") as u64,
                    max_correct_streak: row.get::<i64, _>("max_correct_streak") as u64,
                    max_incorrect_streak: row.get::<i64, _>("max_incorrect_streak") as u64,
                    acc_history: serde_json::from_str(&window_json)?,
                }))
            }
            None => Ok(None),
        }
    }

    pub async fn upsert_feed_stats(&self, stats: &FeedStats) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO feed_stats (
                id, correct_count, incorrect_count, correct_streak, incorrect_streak,
                max_correct_streak, max_incorrect_streak, window_json, updated_at
            )
            VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                correct_count = excluded.correct_count,
                incorrect_count = excluded.incorrect_count,
                correct_streak = excluded.correct_streak,
                incorrect_streak = excluded.incorrect_streak,
                max_correct_streak = excluded.max_correct_streak,
                max_incorrect_streak = excluded.max_incorrect_streak,
                window_json = excluded.window_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(stats.correct_count as i64)
        .bind(stats.incorrect_count as i64)
        .bind(stats.correct_streak as i64)
        .bind(stats.incorrect_streak as i64)
        .bind(stats.max_correct_streak as i64)
        .bind(stats.max_incorrect_streak as i64)
        .bind(serde_json::to_string(&stats.acc_history)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ModelStore for Database {
    async fn load_latest_model(&self) -> Result<Option<String>> {
        let row = sqlx::query("SELECT payload FROM model_store WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("payload")))
    }

    async fn upsert_model(&self, payload: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO model_store (id, payload, updated_at)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StatsStore for Database {
    async fn load_global_stats(&self) -> Result<Option<TrackerSnapshot>> {
        let row = sqlx::query(
            "SELECT correct_count, incorrect_count, window_json FROM engine_stats WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let window_json: String = row.get("window_json");
                Ok(Some(TrackerSnapshot {
                    correct_count: row.get::<i64, _>("correct_count") as u64,
                    incorrect_count: row.get::<i64, _>("incorrect_count") as u64,
                    window: serde_json::from_str(&window_json)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn upsert_global_stats(&self, snapshot: &TrackerSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO engine_stats (id, correct_count, incorrect_count, window_json, updated_at)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                correct_count = excluded.correct_count,
                incorrect_count = excluded.incorrect_count,
                window_json = excluded.window_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(snapshot.correct_count as i64)
        .bind(snapshot.incorrect_count as i64)
        .bind(serde_json::to_string(&snapshot.window)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
