use crate::db::{CrmStore, PgSession};
use crate::errors::{AppError, ResultExt};
use crate::models::{
    Broadcast, BroadcastRecipient, Lead, LeadChange, NewBroadcast, NewLead, Segment,
    BROADCAST_DRAFT, RECIPIENT_PENDING,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Connection, Postgres, QueryBuilder};

// Projections cast to the types the row structs decode, so tables built with
// SERIAL/INTEGER ids or TIMESTAMP (without time zone) columns read the same as
// BIGINT/TIMESTAMPTZ ones.
const LEAD_COLUMNS: &str = "id::bigint AS id, user_id::bigint AS user_id, name, username, \
                            telegram_id::bigint AS telegram_id, stage, value::numeric AS value, \
                            notes, last_contact::timestamptz AS last_contact, \
                            created_at::timestamptz AS created_at, \
                            updated_at::timestamptz AS updated_at";
const BROADCAST_COLUMNS: &str = "id::bigint AS id, user_id::bigint AS user_id, name, message, \
                                 target_segment, status, created_at::timestamptz AS created_at";
const RECIPIENT_COLUMNS: &str = "id::bigint AS id, broadcast_id::bigint AS broadcast_id, \
                                 lead_id::bigint AS lead_id, status";

/// Builds `UPDATE leads SET ... WHERE id = $n RETURNING ...`.
///
/// Column names come from `LeadChange::column`, a closed set; every value is a
/// bound parameter.
pub fn build_lead_update(
    id: i64,
    changes: &[LeadChange],
    now: DateTime<Utc>,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new("UPDATE leads SET ");
    {
        let mut set = qb.separated(", ");
        for change in changes {
            set.push(format!("{} = ", change.column()));
            match change {
                LeadChange::Name(v) | LeadChange::Stage(v) => {
                    set.push_bind_unseparated(v.clone());
                }
                LeadChange::Username(v) | LeadChange::Notes(v) => {
                    set.push_bind_unseparated(v.clone());
                }
                LeadChange::TelegramId(v) => {
                    set.push_bind_unseparated(*v);
                }
                LeadChange::Value(v) => {
                    set.push_bind_unseparated(v.clone());
                }
            }
        }
        set.push("updated_at = ");
        set.push_bind_unseparated(now);
    }
    qb.push(" WHERE id = ");
    qb.push_bind(id);
    qb.push(" RETURNING ");
    qb.push(LEAD_COLUMNS);
    qb
}

#[async_trait]
impl CrmStore for PgSession {
    async fn find_lead(&mut self, id: i64) -> Result<Option<Lead>, AppError> {
        sqlx::query_as::<_, Lead>(&format!("SELECT {} FROM leads WHERE id = $1", LEAD_COLUMNS))
            .bind(id)
            .fetch_optional(&mut self.conn)
            .await
            .with_context(|| format!("fetching lead {}", id))
    }

    async fn list_leads(&mut self, stage: Option<&str>) -> Result<Vec<Lead>, AppError> {
        match stage {
            Some(stage) => sqlx::query_as::<_, Lead>(&format!(
                "SELECT {} FROM leads WHERE stage = $1 ORDER BY created_at DESC",
                LEAD_COLUMNS
            ))
            .bind(stage)
            .fetch_all(&mut self.conn)
            .await
            .context("listing leads by stage"),
            None => sqlx::query_as::<_, Lead>(&format!(
                "SELECT {} FROM leads ORDER BY created_at DESC",
                LEAD_COLUMNS
            ))
            .fetch_all(&mut self.conn)
            .await
            .context("listing leads"),
        }
    }

    async fn insert_lead(
        &mut self,
        owner: i64,
        lead: &NewLead,
        now: DateTime<Utc>,
    ) -> Result<Lead, AppError> {
        // The row is only kept once it has decoded.
        let mut tx = self.conn.begin().await.context("starting lead transaction")?;

        let row = sqlx::query_as::<_, Lead>(&format!(
            r#"
            INSERT INTO leads (user_id, name, username, telegram_id, stage, value, notes, last_contact)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            LEAD_COLUMNS
        ))
        .bind(owner)
        .bind(&lead.name)
        .bind(&lead.username)
        .bind(lead.telegram_id)
        .bind(&lead.stage)
        .bind(&lead.value)
        .bind(&lead.notes)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .context("inserting lead")?;

        tx.commit().await.context("committing lead")?;

        Ok(row)
    }

    async fn update_lead(
        &mut self,
        id: i64,
        changes: &[LeadChange],
        now: DateTime<Utc>,
    ) -> Result<Option<Lead>, AppError> {
        let mut qb = build_lead_update(id, changes, now);
        qb.build_query_as::<Lead>()
            .fetch_optional(&mut self.conn)
            .await
            .with_context(|| format!("updating lead {}", id))
    }

    async fn find_broadcast(&mut self, id: i64) -> Result<Option<Broadcast>, AppError> {
        sqlx::query_as::<_, Broadcast>(&format!(
            "SELECT {} FROM broadcasts WHERE id = $1",
            BROADCAST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut self.conn)
        .await
        .with_context(|| format!("fetching broadcast {}", id))
    }

    async fn list_broadcasts(&mut self, limit: i64) -> Result<Vec<Broadcast>, AppError> {
        sqlx::query_as::<_, Broadcast>(&format!(
            "SELECT {} FROM broadcasts ORDER BY created_at DESC LIMIT $1",
            BROADCAST_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&mut self.conn)
        .await
        .context("listing broadcasts")
    }

    async fn segment_lead_ids(&mut self, segment: &Segment) -> Result<Vec<i64>, AppError> {
        let query = match segment {
            Segment::All => sqlx::query_scalar::<_, i64>("SELECT id::bigint FROM leads"),
            Segment::Stage(stage) => {
                sqlx::query_scalar::<_, i64>("SELECT id::bigint FROM leads WHERE stage = $1")
                    .bind(stage)
            }
        };
        query
            .fetch_all(&mut self.conn)
            .await
            .with_context(|| format!("resolving segment '{}'", segment.as_str()))
    }

    async fn insert_broadcast(
        &mut self,
        owner: i64,
        broadcast: &NewBroadcast,
        lead_ids: &[i64],
    ) -> Result<(Broadcast, Vec<BroadcastRecipient>), AppError> {
        // Dropping `tx` on an early return rolls everything back.
        let mut tx = self.conn.begin().await.context("starting broadcast transaction")?;

        let row = sqlx::query_as::<_, Broadcast>(&format!(
            r#"
            INSERT INTO broadcasts (user_id, name, message, target_segment, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            BROADCAST_COLUMNS
        ))
        .bind(owner)
        .bind(&broadcast.name)
        .bind(&broadcast.message)
        .bind(broadcast.segment.as_str())
        .bind(BROADCAST_DRAFT)
        .fetch_one(&mut *tx)
        .await
        .context("inserting broadcast")?;

        let mut recipients = Vec::with_capacity(lead_ids.len());
        for lead_id in lead_ids {
            let recipient = sqlx::query_as::<_, BroadcastRecipient>(&format!(
                r#"
                INSERT INTO broadcast_recipients (broadcast_id, lead_id, status)
                VALUES ($1, $2, $3)
                RETURNING {}
                "#,
                RECIPIENT_COLUMNS
            ))
            .bind(row.id)
            .bind(lead_id)
            .bind(RECIPIENT_PENDING)
            .fetch_one(&mut *tx)
            .await
            .with_context(|| format!("adding lead {} to broadcast {}", lead_id, row.id))?;
            recipients.push(recipient);
        }

        tx.commit().await.context("committing broadcast")?;

        Ok((row, recipients))
    }

    async fn update_broadcast_status(
        &mut self,
        id: i64,
        status: &str,
    ) -> Result<Option<Broadcast>, AppError> {
        sqlx::query_as::<_, Broadcast>(&format!(
            "UPDATE broadcasts SET status = $1 WHERE id = $2 RETURNING {}",
            BROADCAST_COLUMNS
        ))
        .bind(status)
        .bind(id)
        .fetch_optional(&mut self.conn)
        .await
        .with_context(|| format!("updating broadcast {}", id))
    }

    async fn close(self) {
        if let Err(e) = self.conn.close().await {
            tracing::warn!("Failed to close database connection cleanly: {}", e);
        } else {
            tracing::debug!("Database connection closed");
        }
    }
}
