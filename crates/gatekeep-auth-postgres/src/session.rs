//! Session storage for PostgreSQL.
//!
//! Sessions live in the `gatekeep_session` table. A partial unique index
//! keeps at most one active row per `token_id`, and a check constraint keeps
//! `expires_at > created_at`.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::query_scalar::query_scalar;
use sqlx_core::row::Row;
use sqlx_postgres::{PgRow, Postgres};
use time::OffsetDateTime;

use gatekeep_auth::session::{Session, SessionData, SessionStorage};
use gatekeep_auth::{AuthError, AuthResult};

use crate::{PgPool, StorageError, StorageResult};

/// Schema statements, applied in order by [`PostgresSessionStorage::migrate`].
pub const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS gatekeep_session (
        session_id     TEXT PRIMARY KEY,
        user_id        TEXT NOT NULL,
        created_at     TIMESTAMPTZ NOT NULL,
        last_accessed  TIMESTAMPTZ NOT NULL,
        expires_at     TIMESTAMPTZ NOT NULL,
        ip_address     TEXT NOT NULL,
        user_agent     TEXT NOT NULL,
        is_active      BOOLEAN NOT NULL DEFAULT TRUE,
        remember_me    BOOLEAN NOT NULL DEFAULT FALSE,
        data           JSONB NOT NULL DEFAULT '{}'::jsonb,
        token_id       TEXT,
        last_sso_check TIMESTAMPTZ,
        CONSTRAINT gatekeep_session_expiry CHECK (expires_at > created_at)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS gatekeep_session_user_active
        ON gatekeep_session (user_id, last_accessed)
        WHERE is_active
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS gatekeep_session_token_active
        ON gatekeep_session (token_id)
        WHERE is_active AND token_id IS NOT NULL
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS gatekeep_session_expires
        ON gatekeep_session (expires_at)
    "#,
];

const SELECT_COLUMNS: &str = "session_id, user_id, created_at, last_accessed, expires_at, \
     ip_address, user_agent, is_active, remember_me, data, token_id, last_sso_check";

/// PostgreSQL-backed [`SessionStorage`].
#[derive(Debug, Clone)]
pub struct PostgresSessionStorage {
    pool: Arc<PgPool>,
}

impl PostgresSessionStorage {
    /// Create new storage with an existing connection pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create new storage by connecting to the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> StorageResult<Self> {
        use sqlx_core::pool::PoolOptions;
        let pool = PoolOptions::<Postgres>::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the session table and its indexes if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if a schema statement fails.
    pub async fn migrate(&self) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        for statement in MIGRATIONS {
            query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        tracing::info!("Session schema is up to date");
        Ok(())
    }

    async fn insert_capped_tx(
        &self,
        session: &Session,
        max_active: usize,
        now: OffsetDateTime,
    ) -> StorageResult<Vec<String>> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent logins of one user until commit
        query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&session.user_id)
            .execute(&mut *tx)
            .await?;

        if let Some(token_id) = &session.token_id {
            query(
                r#"
                UPDATE gatekeep_session SET is_active = FALSE
                WHERE token_id = $1 AND is_active AND expires_at <= $2
                "#,
            )
            .bind(token_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let active: Vec<String> = query_scalar(
            r#"
            SELECT session_id FROM gatekeep_session
            WHERE user_id = $1 AND is_active AND expires_at > $2
            ORDER BY last_accessed ASC, session_id ASC
            "#,
        )
        .bind(&session.user_id)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let overflow = (active.len() + 1).saturating_sub(max_active.max(1));
        let evicted: Vec<String> = active.into_iter().take(overflow).collect();
        if !evicted.is_empty() {
            query("UPDATE gatekeep_session SET is_active = FALSE WHERE session_id = ANY($1)")
                .bind(&evicted)
                .execute(&mut *tx)
                .await?;
        }

        insert_row(&mut tx, session).await?;
        tx.commit().await?;
        Ok(evicted)
    }

    async fn replace_tx(&self, old_session_id: &str, replacement: &Session) -> AuthResult<()> {
        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;

        let ended = query(
            "UPDATE gatekeep_session SET is_active = FALSE WHERE session_id = $1 AND is_active",
        )
        .bind(old_session_id)
        .execute(&mut *tx)
        .await
        .map_err(StorageError::from)?;
        if ended.rows_affected() == 0 {
            // dropping the transaction rolls it back
            return Err(AuthError::SessionNotFound);
        }

        insert_row(&mut tx, replacement).await?;
        tx.commit().await.map_err(StorageError::from)?;
        Ok(())
    }
}

async fn insert_row(
    tx: &mut sqlx_core::transaction::Transaction<'_, Postgres>,
    session: &Session,
) -> StorageResult<()> {
    query(
        r#"
        INSERT INTO gatekeep_session (
            session_id, user_id, created_at, last_accessed, expires_at,
            ip_address, user_agent, is_active, remember_me, data, token_id, last_sso_check
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(&session.session_id)
    .bind(&session.user_id)
    .bind(session.created_at)
    .bind(session.last_accessed)
    .bind(session.expires_at)
    .bind(&session.ip_address)
    .bind(&session.user_agent)
    .bind(session.is_active)
    .bind(session.remember_me)
    .bind(serde_json::Value::Object(session.data.clone()))
    .bind(&session.token_id)
    .bind(session.last_sso_check)
    .execute(&mut **tx)
    .await
    .map_err(StorageError::from_insert)?;
    Ok(())
}

/// Column values of one `gatekeep_session` row.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub created_at: OffsetDateTime,
    pub last_accessed: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub ip_address: String,
    pub user_agent: String,
    pub is_active: bool,
    pub remember_me: bool,
    pub data: serde_json::Value,
    pub token_id: Option<String>,
    pub last_sso_check: Option<OffsetDateTime>,
}

impl SessionRecord {
    fn from_row(row: &PgRow) -> StorageResult<Self> {
        Ok(Self {
            session_id: row.try_get("session_id")?,
            user_id: row.try_get("user_id")?,
            created_at: row.try_get("created_at")?,
            last_accessed: row.try_get("last_accessed")?,
            expires_at: row.try_get("expires_at")?,
            ip_address: row.try_get("ip_address")?,
            user_agent: row.try_get("user_agent")?,
            is_active: row.try_get("is_active")?,
            remember_me: row.try_get("remember_me")?,
            data: row.try_get("data")?,
            token_id: row.try_get("token_id")?,
            last_sso_check: row.try_get("last_sso_check")?,
        })
    }

    /// Converts the row into a [`Session`].
    ///
    /// # Errors
    ///
    /// Returns `StorageError::CorruptRow` if `data` is not a JSON object.
    pub fn into_session(self) -> StorageResult<Session> {
        let data: SessionData = match self.data {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => SessionData::new(),
            other => {
                return Err(StorageError::corrupt_row(format!(
                    "session {} has non-object data: {other}",
                    gatekeep_auth::session::short_id(&self.session_id)
                )));
            }
        };
        Ok(Session {
            session_id: self.session_id,
            user_id: self.user_id,
            created_at: self.created_at,
            last_accessed: self.last_accessed,
            expires_at: self.expires_at,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            is_active: self.is_active,
            remember_me: self.remember_me,
            data,
            token_id: self.token_id,
            last_sso_check: self.last_sso_check,
        })
    }
}

fn row_to_session(row: &PgRow) -> StorageResult<Session> {
    SessionRecord::from_row(row)?.into_session()
}

#[async_trait]
impl SessionStorage for PostgresSessionStorage {
    async fn insert_capped(
        &self,
        session: &Session,
        max_active: usize,
        now: OffsetDateTime,
    ) -> AuthResult<Vec<String>> {
        Ok(self.insert_capped_tx(session, max_active, now).await?)
    }

    async fn find(&self, session_id: &str) -> AuthResult<Option<Session>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM gatekeep_session WHERE session_id = $1");
        let row = query(&sql)
            .bind(session_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(row.as_ref().map(row_to_session).transpose()?)
    }

    async fn find_active_by_token(
        &self,
        token_id: &str,
        now: OffsetDateTime,
    ) -> AuthResult<Option<Session>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM gatekeep_session \
             WHERE token_id = $1 AND is_active AND expires_at > $2"
        );
        let row = query(&sql)
            .bind(token_id)
            .bind(now)
            .fetch_optional(&*self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(row.as_ref().map(row_to_session).transpose()?)
    }

    async fn touch(
        &self,
        session_id: &str,
        last_accessed: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> AuthResult<bool> {
        let result = query(
            r#"
            UPDATE gatekeep_session SET last_accessed = $2, expires_at = $3
            WHERE session_id = $1 AND is_active AND expires_at > $2
            "#,
        )
        .bind(session_id)
        .bind(last_accessed)
        .bind(expires_at)
        .execute(&*self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_data(&self, session_id: &str, data: &SessionData) -> AuthResult<bool> {
        let result =
            query("UPDATE gatekeep_session SET data = $2 WHERE session_id = $1 AND is_active")
                .bind(session_id)
                .bind(serde_json::Value::Object(data.clone()))
                .execute(&*self.pool)
                .await
                .map_err(StorageError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_sso_checked(&self, session_id: &str, at: OffsetDateTime) -> AuthResult<bool> {
        let result = query(
            "UPDATE gatekeep_session SET last_sso_check = $2 WHERE session_id = $1 AND is_active",
        )
        .bind(session_id)
        .bind(at)
        .execute(&*self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn deactivate(&self, session_id: &str) -> AuthResult<bool> {
        let result = query(
            "UPDATE gatekeep_session SET is_active = FALSE WHERE session_id = $1 AND is_active",
        )
        .bind(session_id)
        .execute(&*self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn deactivate_user(&self, user_id: &str) -> AuthResult<Vec<String>> {
        let ids: Vec<String> = query_scalar(
            r#"
            UPDATE gatekeep_session SET is_active = FALSE
            WHERE user_id = $1 AND is_active
            RETURNING session_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(ids)
    }

    async fn list_active(&self, user_id: &str, now: OffsetDateTime) -> AuthResult<Vec<Session>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM gatekeep_session \
             WHERE user_id = $1 AND is_active AND expires_at > $2 \
             ORDER BY last_accessed DESC"
        );
        let rows = query(&sql)
            .bind(user_id)
            .bind(now)
            .fetch_all(&*self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(rows
            .iter()
            .map(row_to_session)
            .collect::<StorageResult<Vec<_>>>()?)
    }

    async fn replace(&self, old_session_id: &str, replacement: &Session) -> AuthResult<()> {
        self.replace_tx(old_session_id, replacement).await
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> AuthResult<u64> {
        let result = query("DELETE FROM gatekeep_session WHERE NOT is_active OR expires_at <= $1")
            .bind(now)
            .execute(&*self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// Tests
// =============================================================================
