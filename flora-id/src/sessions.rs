//! Chat session store
//!
//! Append-only turn log per session. A batch of turns gets consecutive
//! sequence numbers inside a single `INSERT .. SELECT` statement, so a
//! question and its answer land next to each other even when another
//! request appends to the same session concurrently. Turns are never
//! updated or deleted.

use crate::types::{ChatTurn, EnsembleResult, Role};
use async_trait::async_trait;
use flora_common::{Error, Result};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

/// Fresh opaque session identifier
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Keep a caller-supplied id, or start a new session
pub fn resolve_session_id(requested: Option<&str>) -> String {
    requested
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(new_session_id)
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Append turns at the end of the session, contiguous and in order
    async fn append(&self, session_id: &str, turns: &[ChatTurn]) -> Result<()>;

    /// All turns in append order (empty for an unknown session)
    async fn read(&self, session_id: &str) -> Result<Vec<ChatTurn>>;

    async fn exists(&self, session_id: &str) -> Result<bool>;
}

pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn append(&self, session_id: &str, turns: &[ChatTurn]) -> Result<()> {
        if turns.is_empty() {
            return Ok(());
        }

        let rows = turns
            .iter()
            .map(|turn| {
                let ensemble = turn
                    .ensemble
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                Ok((turn, ensemble, turn.timestamp.to_rfc3339()))
            })
            .collect::<Result<Vec<_>>>()?;

        // SQLite evaluates the whole SELECT before inserting into the same
        // table, so every branch sees the same MAX(seq)
        let mut builder = QueryBuilder::<Sqlite>::new(
            "INSERT INTO chat_turns (session_id, seq, role, text, ensemble, created_at) ",
        );
        for (offset, (turn, ensemble, created_at)) in rows.iter().enumerate() {
            if offset > 0 {
                builder.push(" UNION ALL ");
            }
            builder
                .push("SELECT ")
                .push_bind(session_id)
                .push(", COALESCE(MAX(seq), 0) + ")
                .push_bind(offset as i64 + 1)
                .push(", ")
                .push_bind(turn.role.as_str())
                .push(", ")
                .push_bind(turn.text.as_str())
                .push(", ")
                .push_bind(ensemble.as_deref())
                .push(", ")
                .push_bind(created_at.as_str())
                .push(" FROM chat_turns WHERE session_id = ")
                .push_bind(session_id);
        }
        builder.build().execute(&self.pool).await?;

        Ok(())
    }

    async fn read(&self, session_id: &str) -> Result<Vec<ChatTurn>> {
        let rows = sqlx::query(
            r#"
            SELECT role, text, ensemble, created_at
            FROM chat_turns
            WHERE session_id = ?
            ORDER BY seq
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let role: String = row.get("role");
                let role = Role::parse(&role)
                    .ok_or_else(|| Error::corrupt("chat_turns", format!("unknown role {:?}", role)))?;

                let ensemble: Option<String> = row.get("ensemble");
                let ensemble = ensemble
                    .map(|json| serde_json::from_str::<EnsembleResult>(&json))
                    .transpose()
                    .map_err(|e| Error::corrupt("chat_turns", e))?;

                let created_at: String = row.get("created_at");
                let timestamp = chrono::DateTime::parse_from_rfc3339(&created_at)
                    .map_err(|e| Error::corrupt("chat_turns", e))?
                    .with_timezone(&chrono::Utc);

                Ok(ChatTurn {
                    role,
                    text: row.get("text"),
                    ensemble,
                    timestamp,
                })
            })
            .collect()
    }

    async fn exists(&self, session_id: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM chat_turns WHERE session_id = ? LIMIT 1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_database_pool, init_memory_pool};

    #[test]
    fn test_session_id_resolution() {
        assert_eq!(resolve_session_id(Some("abc")), "abc");
        let fresh = resolve_session_id(Some("   "));
        assert!(Uuid::parse_str(&fresh).is_ok());
        assert_ne!(resolve_session_id(None), resolve_session_id(None));
    }

    #[tokio::test]
    async fn test_turns_read_back_in_append_order() {
        let store = SqliteSessionStore::new(init_memory_pool().await.unwrap());
        store
            .append(
                "s1",
                &[
                    ChatTurn::user("bu ne"),
                    ChatTurn::assistant("Gül", Some(EnsembleResult::default())),
                ],
            )
            .await
            .unwrap();
        store.append("s2", &[ChatTurn::user("başka")]).await.unwrap();
        store.append("s1", &[ChatTurn::user("sulama?")]).await.unwrap();
        store.append("s1", &[]).await.unwrap();

        let turns = store.read("s1").await.unwrap();
        let texts: Vec<_> = turns.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["bu ne", "Gül", "sulama?"]);
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].ensemble, Some(EnsembleResult::default()));
        assert!(turns[0].ensemble.is_none());
    }

    #[tokio::test]
    async fn test_unknown_session_is_empty() {
        let store = SqliteSessionStore::new(init_memory_pool().await.unwrap());
        assert!(store.read("nope").await.unwrap().is_empty());
        assert!(!store.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_every_turn() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = init_database_pool(&dir.path().join("flora.db")).await.unwrap();
        let store = std::sync::Arc::new(SqliteSessionStore::new(pool));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .append(
                            "shared",
                            &[
                                ChatTurn::user(format!("q{}", i)),
                                ChatTurn::assistant(format!("a{}", i), None),
                            ],
                        )
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let turns = store.read("shared").await.unwrap();
        assert_eq!(turns.len(), 16);
        // Every question is directly followed by its own answer
        for pair in turns.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert_eq!(pair[0].text[1..], pair[1].text[1..]);
        }
    }
}
