use crate::errors::{AppError, ResultExt};
use crate::models::{
    Broadcast, BroadcastRecipient, Lead, LeadChange, NewBroadcast, NewLead, Segment,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgConnection};

/// Source of per-invocation database sessions.
///
/// Handlers open exactly one session per call and never share it. Dropping a
/// session releases its connection, so early returns and `?` cannot leak one.
#[async_trait]
pub trait Gateway: Send + Sync + 'static {
    type Session: CrmStore;

    async fn open(&self) -> Result<Self::Session, AppError>;
}

/// Statements the two handlers run against one open session.
///
/// Single-statement writes are committed as they execute. The broadcast insert
/// is the only multi-statement write and commits once, after the last
/// recipient row.
#[async_trait]
pub trait CrmStore: Send + Sized {
    async fn find_lead(&mut self, id: i64) -> Result<Option<Lead>, AppError>;

    /// Newest first; `stage` narrows to one stage.
    async fn list_leads(&mut self, stage: Option<&str>) -> Result<Vec<Lead>, AppError>;

    async fn insert_lead(
        &mut self,
        owner: i64,
        lead: &NewLead,
        now: DateTime<Utc>,
    ) -> Result<Lead, AppError>;

    /// Applies `changes` and stamps `updated_at`. `None` when no row has `id`.
    async fn update_lead(
        &mut self,
        id: i64,
        changes: &[LeadChange],
        now: DateTime<Utc>,
    ) -> Result<Option<Lead>, AppError>;

    async fn find_broadcast(&mut self, id: i64) -> Result<Option<Broadcast>, AppError>;

    /// Newest first, at most `limit` rows.
    async fn list_broadcasts(&mut self, limit: i64) -> Result<Vec<Broadcast>, AppError>;

    /// Ids of the leads a segment currently selects.
    async fn segment_lead_ids(&mut self, segment: &Segment) -> Result<Vec<i64>, AppError>;

    /// Inserts the broadcast as a draft plus one pending recipient per lead id,
    /// atomically. On error nothing is committed.
    async fn insert_broadcast(
        &mut self,
        owner: i64,
        broadcast: &NewBroadcast,
        lead_ids: &[i64],
    ) -> Result<(Broadcast, Vec<BroadcastRecipient>), AppError>;

    async fn update_broadcast_status(
        &mut self,
        id: i64,
        status: &str,
    ) -> Result<Option<Broadcast>, AppError>;

    /// Graceful shutdown of the session. Failures are logged, not returned.
    async fn close(self);
}

/// Opens a fresh PostgreSQL connection for every invocation. No pooling.
#[derive(Debug, Clone)]
pub struct PgGateway {
    database_url: String,
}

impl PgGateway {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// Opens one throwaway connection and runs `SELECT 1`.
    pub async fn check(&self) -> anyhow::Result<()> {
        let mut conn = PgConnection::connect(&self.database_url).await?;
        sqlx::query("SELECT 1").execute(&mut conn).await?;
        conn.close().await?;
        Ok(())
    }
}

#[async_trait]
impl Gateway for PgGateway {
    type Session = PgSession;

    async fn open(&self) -> Result<PgSession, AppError> {
        let conn = PgConnection::connect(&self.database_url)
            .await
            .context("opening database connection")?;
        tracing::debug!("Database connection opened");
        Ok(PgSession { conn })
    }
}

/// One live connection, owned by a single invocation.
pub struct PgSession {
    pub(crate) conn: PgConnection,
}
