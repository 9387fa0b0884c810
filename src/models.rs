use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::FromRow;

/// Stage given to leads created without one.
pub const DEFAULT_STAGE: &str = "new";
/// Status every broadcast starts in.
pub const BROADCAST_DRAFT: &str = "draft";
/// Status every fanned-out recipient starts in.
pub const RECIPIENT_PENDING: &str = "pending";
/// Segment name selecting every lead regardless of stage.
pub const SEGMENT_ALL: &str = "all";
/// Upper bound on the broadcast listing.
pub const BROADCAST_LIST_LIMIT: i64 = 100;

// ============ Database Models ============

/// A CRM contact record progressing through sales stages.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Lead {
    /// Unique identifier for the lead.
    pub id: i64,
    /// Owner of the record.
    pub user_id: i64,
    /// Display name, always present.
    pub name: String,
    /// Telegram username (e.g. "@alexivanov").
    pub username: Option<String>,
    /// Numeric Telegram account id.
    pub telegram_id: Option<i64>,
    /// Free-form pipeline stage ("new", "contact", "deal", ...).
    pub stage: String,
    /// Expected deal value.
    #[serde(serialize_with = "serialize_money")]
    pub value: BigDecimal,
    /// Free-form notes.
    pub notes: Option<String>,
    /// Last time the lead was contacted; set at creation.
    pub last_contact: Option<DateTime<Utc>>,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
    /// Timestamp of last update.
    pub updated_at: Option<DateTime<Utc>>,
}

/// A named outbound message campaign targeting a segment of leads.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Broadcast {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub message: String,
    /// Segment name as submitted ("all" or a lead stage).
    pub target_segment: String,
    /// Open status string; "draft" at creation.
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// One lead's delivery record for one broadcast.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct BroadcastRecipient {
    pub id: i64,
    pub broadcast_id: i64,
    pub lead_id: i64,
    pub status: String,
}

/// Body of a successful broadcast POST: the stored row plus the fan-out size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedBroadcast {
    #[serde(flatten)]
    pub broadcast: Broadcast,
    pub recipients_count: usize,
}

/// Writes an amount as a string with at least two decimal places, so a
/// NUMERIC(_, 2) column reads back as "1500.50" or "0.00" whatever scale the
/// driver decoded it with.
fn serialize_money<S: Serializer>(value: &BigDecimal, serializer: S) -> Result<S::Ok, S::Error> {
    let normalized = value.normalized();
    let shown = if normalized.as_bigint_and_exponent().1 < 2 {
        normalized.with_scale(2)
    } else {
        normalized
    };
    serializer.serialize_str(&shown.to_string())
}

// ============ Request Payloads ============

/// Deserializes a field that may be absent, explicitly null, or set.
///
/// Used with `#[serde(default)]`: absent stays `None`, `null` becomes
/// `Some(None)`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// POST /leads body. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateLeadRequest {
    pub name: Option<String>,
    pub username: Option<String>,
    pub telegram_id: Option<i64>,
    pub stage: Option<String>,
    pub value: Option<BigDecimal>,
    pub notes: Option<String>,
}

/// A validated lead ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLead {
    pub name: String,
    pub username: Option<String>,
    pub telegram_id: Option<i64>,
    pub stage: String,
    pub value: BigDecimal,
    pub notes: Option<String>,
}

impl CreateLeadRequest {
    /// Applies defaults; `Err` carries the name of the missing required field.
    pub fn validate(self) -> Result<NewLead, &'static str> {
        let name = self.name.ok_or("name")?;

        Ok(NewLead {
            name,
            username: self.username,
            telegram_id: self.telegram_id,
            stage: self.stage.unwrap_or_else(|| DEFAULT_STAGE.to_string()),
            value: self.value.unwrap_or_else(|| BigDecimal::from(0)),
            notes: self.notes,
        })
    }
}

/// PUT /leads/{id} body.
///
/// Only allow-listed columns are representable here; anything else the caller
/// sends is dropped during deserialization. Nullable columns distinguish
/// "absent" from "set to null".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateLeadRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub username: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub telegram_id: Option<Option<i64>>,
    pub stage: Option<String>,
    pub value: Option<BigDecimal>,
    #[serde(default, deserialize_with = "present")]
    pub notes: Option<Option<String>>,
}

/// A single column assignment in a lead update.
#[derive(Debug, Clone, PartialEq)]
pub enum LeadChange {
    Name(String),
    Username(Option<String>),
    TelegramId(Option<i64>),
    Stage(String),
    Value(BigDecimal),
    Notes(Option<String>),
}

impl LeadChange {
    /// Column written by this change. The set of names is closed.
    pub fn column(&self) -> &'static str {
        match self {
            LeadChange::Name(_) => "name",
            LeadChange::Username(_) => "username",
            LeadChange::TelegramId(_) => "telegram_id",
            LeadChange::Stage(_) => "stage",
            LeadChange::Value(_) => "value",
            LeadChange::Notes(_) => "notes",
        }
    }
}

impl UpdateLeadRequest {
    /// Changes in allow-list order: name, username, telegram_id, stage, value, notes.
    pub fn into_changes(self) -> Vec<LeadChange> {
        let mut changes = Vec::new();
        if let Some(v) = self.name {
            changes.push(LeadChange::Name(v));
        }
        if let Some(v) = self.username {
            changes.push(LeadChange::Username(v));
        }
        if let Some(v) = self.telegram_id {
            changes.push(LeadChange::TelegramId(v));
        }
        if let Some(v) = self.stage {
            changes.push(LeadChange::Stage(v));
        }
        if let Some(v) = self.value {
            changes.push(LeadChange::Value(v));
        }
        if let Some(v) = self.notes {
            changes.push(LeadChange::Notes(v));
        }
        changes
    }
}

/// Audience selector for a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    All,
    Stage(String),
}

impl Segment {
    pub fn parse(raw: &str) -> Self {
        if raw == SEGMENT_ALL {
            Segment::All
        } else {
            Segment::Stage(raw.to_string())
        }
    }

    /// Value stored in `broadcasts.target_segment`.
    pub fn as_str(&self) -> &str {
        match self {
            Segment::All => SEGMENT_ALL,
            Segment::Stage(stage) => stage,
        }
    }
}

/// POST /broadcasts body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateBroadcastRequest {
    pub name: Option<String>,
    pub message: Option<String>,
    pub target_segment: Option<String>,
}

/// A validated broadcast ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBroadcast {
    pub name: String,
    pub message: String,
    pub segment: Segment,
}

impl CreateBroadcastRequest {
    /// Checks `name` then `message`; `Err` names the first one missing.
    pub fn validate(self) -> Result<NewBroadcast, &'static str> {
        let name = self.name.ok_or("name")?;
        let message = self.message.ok_or("message")?;
        let segment = self
            .target_segment
            .as_deref()
            .map(Segment::parse)
            .unwrap_or(Segment::All);

        Ok(NewBroadcast {
            name,
            message,
            segment,
        })
    }
}

/// PUT /broadcasts/{id} body; `status` is the only recognized field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateBroadcastRequest {
    pub status: Option<String>,
}
