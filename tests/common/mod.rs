//! In-memory gateway used by the integration tests.
//!
//! Mirrors the PostgreSQL store closely enough for handler tests: rows live in
//! a shared `MemoryState`, broadcast inserts are staged and committed at the
//! end, and every session records when it is opened and released.
#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, TimeZone, Utc};
use crm_api::db::{CrmStore, Gateway};
use crm_api::envelope::InvocationContext;
use crm_api::errors::AppError;
use crm_api::models::{
    Broadcast, BroadcastRecipient, Lead, LeadChange, NewBroadcast, NewLead, Segment,
    BROADCAST_DRAFT, RECIPIENT_PENDING,
};
use std::sync::{Arc, Mutex, MutexGuard};

/// What `UPDATE leads SET <column> = ...` does to a stored row.
fn apply(change: &LeadChange, lead: &mut Lead) {
    match change {
        LeadChange::Name(v) => lead.name = v.clone(),
        LeadChange::Username(v) => lead.username = v.clone(),
        LeadChange::TelegramId(v) => lead.telegram_id = *v,
        LeadChange::Stage(v) => lead.stage = v.clone(),
        LeadChange::Value(v) => lead.value = v.clone(),
        LeadChange::Notes(v) => lead.notes = v.clone(),
    }
}

fn in_segment(segment: &Segment, stage: &str) -> bool {
    match segment {
        Segment::All => true,
        Segment::Stage(wanted) => wanted == stage,
    }
}

#[derive(Debug)]
pub struct MemoryState {
    pub leads: Vec<Lead>,
    pub broadcasts: Vec<Broadcast>,
    pub recipients: Vec<BroadcastRecipient>,
    pub opened: usize,
    pub released: usize,
    /// Makes the n-th (0-based) recipient insert of every broadcast fail.
    pub fail_recipient_at: Option<usize>,
    /// Makes `open` fail as if the database were down.
    pub unreachable: bool,
    next_id: i64,
    clock: DateTime<Utc>,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            leads: Vec::new(),
            broadcasts: Vec::new(),
            recipients: Vec::new(),
            opened: 0,
            released: 0,
            fail_recipient_at: None,
            unreachable: false,
            next_id: 0,
            clock: Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap(),
        }
    }
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Strictly increasing timestamps so ordering by `created_at` is stable.
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += Duration::seconds(1);
        self.clock
    }
}

#[derive(Clone, Default)]
pub struct MemoryGateway {
    pub state: Arc<Mutex<MemoryState>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    /// Inserts a lead directly, bypassing the handler.
    pub fn seed_lead(&self, name: &str, stage: &str) -> i64 {
        let mut state = self.state();
        let id = state.next_id();
        let created_at = state.tick();
        state.leads.push(Lead {
            id,
            user_id: 1,
            name: name.to_string(),
            username: None,
            telegram_id: None,
            stage: stage.to_string(),
            value: BigDecimal::from(0),
            notes: None,
            last_contact: Some(created_at),
            created_at,
            updated_at: Some(created_at),
        });
        id
    }

    /// Inserts a broadcast directly, bypassing the handler.
    pub fn seed_broadcast(&self, name: &str) -> i64 {
        let mut state = self.state();
        let id = state.next_id();
        let created_at = state.tick();
        state.broadcasts.push(Broadcast {
            id,
            user_id: 1,
            name: name.to_string(),
            message: format!("{} message", name),
            target_segment: "all".to_string(),
            status: BROADCAST_DRAFT.to_string(),
            created_at,
        });
        id
    }

    pub fn lead(&self, id: i64) -> Option<Lead> {
        self.state().leads.iter().find(|l| l.id == id).cloned()
    }

    pub fn recipients_of(&self, broadcast_id: i64) -> Vec<BroadcastRecipient> {
        self.state()
            .recipients
            .iter()
            .filter(|r| r.broadcast_id == broadcast_id)
            .cloned()
            .collect()
    }

    /// (opened, released) session counters.
    pub fn sessions(&self) -> (usize, usize) {
        let state = self.state();
        (state.opened, state.released)
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    type Session = MemorySession;

    async fn open(&self) -> Result<MemorySession, AppError> {
        let mut state = self.state();
        if state.unreachable {
            return Err(AppError::DatabaseError(sqlx::Error::PoolTimedOut));
        }
        state.opened += 1;
        Ok(MemorySession {
            state: self.state.clone(),
        })
    }
}

pub struct MemorySession {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySession {
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.released += 1;
        }
    }
}

#[async_trait]
impl CrmStore for MemorySession {
    async fn find_lead(&mut self, id: i64) -> Result<Option<Lead>, AppError> {
        Ok(self.lock().leads.iter().find(|l| l.id == id).cloned())
    }

    async fn list_leads(&mut self, stage: Option<&str>) -> Result<Vec<Lead>, AppError> {
        let mut leads: Vec<Lead> = self
            .lock()
            .leads
            .iter()
            .filter(|l| stage.map_or(true, |s| l.stage == s))
            .cloned()
            .collect();
        leads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(leads)
    }

    async fn insert_lead(
        &mut self,
        owner: i64,
        lead: &NewLead,
        now: DateTime<Utc>,
    ) -> Result<Lead, AppError> {
        let mut state = self.lock();
        let id = state.next_id();
        let created_at = state.tick();
        let row = Lead {
            id,
            user_id: owner,
            name: lead.name.clone(),
            username: lead.username.clone(),
            telegram_id: lead.telegram_id,
            stage: lead.stage.clone(),
            value: lead.value.clone(),
            notes: lead.notes.clone(),
            last_contact: Some(now),
            created_at,
            updated_at: Some(created_at),
        };
        state.leads.push(row.clone());
        Ok(row)
    }

    async fn update_lead(
        &mut self,
        id: i64,
        changes: &[LeadChange],
        now: DateTime<Utc>,
    ) -> Result<Option<Lead>, AppError> {
        let mut state = self.lock();
        let Some(lead) = state.leads.iter_mut().find(|l| l.id == id) else {
            return Ok(None);
        };
        for change in changes {
            apply(change, lead);
        }
        lead.updated_at = Some(now);
        Ok(Some(lead.clone()))
    }

    async fn find_broadcast(&mut self, id: i64) -> Result<Option<Broadcast>, AppError> {
        Ok(self.lock().broadcasts.iter().find(|b| b.id == id).cloned())
    }

    async fn list_broadcasts(&mut self, limit: i64) -> Result<Vec<Broadcast>, AppError> {
        let mut broadcasts = self.lock().broadcasts.clone();
        broadcasts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        broadcasts.truncate(limit as usize);
        Ok(broadcasts)
    }

    async fn segment_lead_ids(&mut self, segment: &Segment) -> Result<Vec<i64>, AppError> {
        Ok(self
            .lock()
            .leads
            .iter()
            .filter(|l| in_segment(segment, &l.stage))
            .map(|l| l.id)
            .collect())
    }

    async fn insert_broadcast(
        &mut self,
        owner: i64,
        broadcast: &NewBroadcast,
        lead_ids: &[i64],
    ) -> Result<(Broadcast, Vec<BroadcastRecipient>), AppError> {
        let mut state = self.lock();
        let id = state.next_id();
        let created_at = state.tick();
        let row = Broadcast {
            id,
            user_id: owner,
            name: broadcast.name.clone(),
            message: broadcast.message.clone(),
            target_segment: broadcast.segment.as_str().to_string(),
            status: BROADCAST_DRAFT.to_string(),
            created_at,
        };

        let mut staged = Vec::with_capacity(lead_ids.len());
        for (index, lead_id) in lead_ids.iter().enumerate() {
            if state.fail_recipient_at == Some(index) {
                return Err(AppError::DatabaseError(sqlx::Error::Protocol(format!(
                    "simulated failure inserting recipient {}",
                    lead_id
                ))));
            }
            let recipient_id = state.next_id();
            staged.push(BroadcastRecipient {
                id: recipient_id,
                broadcast_id: id,
                lead_id: *lead_id,
                status: RECIPIENT_PENDING.to_string(),
            });
        }

        state.broadcasts.push(row.clone());
        state.recipients.extend(staged.iter().cloned());
        Ok((row, staged))
    }

    async fn update_broadcast_status(
        &mut self,
        id: i64,
        status: &str,
    ) -> Result<Option<Broadcast>, AppError> {
        let mut state = self.lock();
        let Some(broadcast) = state.broadcasts.iter_mut().find(|b| b.id == id) else {
            return Ok(None);
        };
        broadcast.status = status.to_string();
        Ok(Some(broadcast.clone()))
    }

    async fn close(self) {}
}

pub fn ctx(function_name: &str) -> InvocationContext {
    InvocationContext::new(function_name, 1)
}
