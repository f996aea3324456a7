//! Persistent counters and flags
//!
//! Key/value style surface used by the player for play statistics, ActiveVC
//! markers and per-room toggles. No cross-key transactions are needed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use voxq_common::{MediaKind, RoomId, UserId};

use crate::error::Result;

/// Persisted record that a room had a live call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveMarker {
    pub room_id: RoomId,
    pub kind: MediaKind,
    pub since: DateTime<Utc>,
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Bump the global play count, returning the new total
    async fn increment_play_count(&self) -> Result<i64>;

    /// Bump a user's play count, returning the new value
    async fn increment_user_plays(&self, user: UserId) -> Result<i64>;

    async fn total_plays(&self) -> Result<i64>;
    async fn user_plays(&self, user: UserId) -> Result<i64>;

    async fn mark_active(&self, room: RoomId, kind: MediaKind) -> Result<()>;
    async fn clear_active(&self, room: RoomId) -> Result<()>;
    async fn active_markers(&self) -> Result<Vec<ActiveMarker>>;

    /// Whether the inactivity sweeper may end the room; on by default
    async fn autoend(&self, room: RoomId) -> Result<bool>;
    async fn set_autoend(&self, room: RoomId, enabled: bool) -> Result<()>;
}

/// SQLite-backed [`StateStore`]
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn increment_play_count(&self) -> Result<i64> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO counters (name, value) VALUES ('total_plays', 1)
            ON CONFLICT(name) DO UPDATE SET value = value + 1
            RETURNING value
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(value)
    }

    async fn increment_user_plays(&self, user: UserId) -> Result<i64> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO user_stats (user_id, plays, updated_at) VALUES (?, 1, CURRENT_TIMESTAMP)
            ON CONFLICT(user_id) DO UPDATE SET
                plays = plays + 1,
                updated_at = CURRENT_TIMESTAMP
            RETURNING plays
            "#,
        )
        .bind(user.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(value)
    }

    async fn total_plays(&self) -> Result<i64> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT value FROM counters WHERE name = 'total_plays'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.unwrap_or(0))
    }

    async fn user_plays(&self, user: UserId) -> Result<i64> {
        let value: Option<i64> = sqlx::query_scalar("SELECT plays FROM user_stats WHERE user_id = ?")
            .bind(user.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value.unwrap_or(0))
    }

    async fn mark_active(&self, room: RoomId, kind: MediaKind) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO active_vc (room_id, kind, since) VALUES (?, ?, ?)
            ON CONFLICT(room_id) DO UPDATE SET kind = excluded.kind, since = excluded.since
            "#,
        )
        .bind(room.get())
        .bind(kind.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_active(&self, room: RoomId) -> Result<()> {
        sqlx::query("DELETE FROM active_vc WHERE room_id = ?")
            .bind(room.get())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn active_markers(&self) -> Result<Vec<ActiveMarker>> {
        let rows: Vec<(i64, String, DateTime<Utc>)> =
            sqlx::query_as("SELECT room_id, kind, since FROM active_vc ORDER BY room_id")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(room_id, kind, since)| {
                Ok(ActiveMarker {
                    room_id: RoomId::new(room_id),
                    kind: kind.parse()?,
                    since,
                })
            })
            .collect()
    }

    async fn autoend(&self, room: RoomId) -> Result<bool> {
        let value: Option<bool> = sqlx::query_scalar("SELECT autoend FROM room_flags WHERE room_id = ?")
            .bind(room.get())
            .fetch_optional(&self.pool)
            .await?;
        Ok(value.unwrap_or(true))
    }

    async fn set_autoend(&self, room: RoomId, enabled: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO room_flags (room_id, autoend) VALUES (?, ?)
            ON CONFLICT(room_id) DO UPDATE SET autoend = excluded.autoend
            "#,
        )
        .bind(room.get())
        .bind(enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
