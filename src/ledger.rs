//! Append-only ledger store
//!
//! The single source of truth for money movement. Events are appended,
//! queried, and (for offline deposits) flipped to synced exactly once.
//! Every other mutation path is rejected at the storage layer so a
//! programming error elsewhere cannot silently corrupt history.

use crate::error::CoreError;
use crate::models::{EventKind, GpsFix, LedgerEvent};
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::error;
use uuid::Uuid;

/// Input for a ledger append; everything else is assigned by the store
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub kind: EventKind,
    pub contributor_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub amount: i64,
    pub reference_id: String,
    pub gps: Option<GpsFix>,
    pub device_id: Option<String>,
    pub synced: bool,
    pub created_by: Uuid,
}

/// Query filter for ledger reads
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub contributor_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub kind: Option<EventKind>,
    pub synced: Option<bool>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// Most-recent-first ordering (default is oldest first)
    pub descending: bool,
}

/// Append-only event table with reference-id uniqueness.
///
/// Held inside the core store's write lock; callers never touch events
/// directly.
#[derive(Debug, Default)]
pub struct Ledger {
    events: Vec<LedgerEvent>,
    by_id: HashMap<Uuid, usize>,
    references: HashSet<String>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, assigning its id, sequence number and timestamp.
    pub fn append(&mut self, new: NewEvent) -> Result<LedgerEvent> {
        if new.amount < 0 {
            return Err(CoreError::Validation(
                "ledger event amount cannot be negative".to_string(),
            ));
        }
        if self.references.contains(&new.reference_id) {
            return Err(CoreError::Validation(format!(
                "reference id already exists: {}",
                new.reference_id
            )));
        }

        let event = LedgerEvent {
            id: Uuid::new_v4(),
            seq: self.events.len() as u64 + 1,
            kind: new.kind,
            contributor_id: new.contributor_id,
            agent_id: new.agent_id,
            amount: new.amount,
            reference_id: new.reference_id,
            gps: new.gps,
            device_id: new.device_id,
            synced: new.synced,
            synced_at: if new.synced { Some(Utc::now()) } else { None },
            created_at: Utc::now(),
            created_by: new.created_by,
        };

        self.references.insert(event.reference_id.clone());
        self.by_id.insert(event.id, self.events.len());
        self.events.push(event.clone());

        Ok(event)
    }

    pub fn get(&self, event_id: Uuid) -> Option<&LedgerEvent> {
        self.by_id.get(&event_id).map(|&i| &self.events[i])
    }

    /// Filtered read over the event stream, ordered by sequence number
    /// (creation order) ascending unless descending is requested.
    pub fn query(&self, filter: &EventFilter) -> Vec<LedgerEvent> {
        let mut matches: Vec<LedgerEvent> = self
            .events
            .iter()
            .filter(|ev| {
                filter
                    .contributor_id
                    .map_or(true, |id| ev.contributor_id == Some(id))
                    && filter.agent_id.map_or(true, |id| ev.agent_id == Some(id))
                    && filter.kind.map_or(true, |k| ev.kind == k)
                    && filter.synced.map_or(true, |s| ev.synced == s)
                    && filter.created_after.map_or(true, |t| ev.created_at > t)
                    && filter.created_before.map_or(true, |t| ev.created_at <= t)
            })
            .cloned()
            .collect();

        if filter.descending {
            matches.reverse();
        }
        matches
    }

    pub fn iter(&self) -> impl Iterator<Item = &LedgerEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The single sanctioned transition: flip an offline deposit to synced.
    /// No other field ever changes after append.
    pub(crate) fn mark_synced(&mut self, event_id: Uuid) -> Result<LedgerEvent> {
        let idx = *self
            .by_id
            .get(&event_id)
            .ok_or_else(|| CoreError::NotFound(format!("ledger event {}", event_id)))?;

        let event = &mut self.events[idx];
        if !event.synced {
            event.synced = true;
            event.synced_at = Some(Utc::now());
        }
        Ok(event.clone())
    }

    /// Rejected unconditionally. A call landing here is a programming bug;
    /// corrections are expressed as a REVERSAL event, never an update.
    pub fn update(&self, event_id: Uuid) -> Result<()> {
        error!(%event_id, "attempted update of an immutable ledger event");
        Err(CoreError::Immutability(
            "use reversal + re-entry for corrections".to_string(),
        ))
    }

    /// Rejected unconditionally; ledger events are never deleted.
    pub fn delete(&self, event_id: Uuid) -> Result<()> {
        error!(%event_id, "attempted delete of an immutable ledger event");
        Err(CoreError::Immutability(
            "ledger events cannot be deleted".to_string(),
        ))
    }
}

/// Generate a globally unique human-readable reference id,
/// e.g. `DEP-1735689600000-3FA84C1B`.
pub(crate) fn reference_id(prefix: &str) -> String {
    let tag = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("{}-{}-{}", prefix, Utc::now().timestamp_millis(), tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposit(amount: i64, reference: &str) -> NewEvent {
        NewEvent {
            kind: EventKind::Deposit,
            contributor_id: Some(Uuid::new_v4()),
            agent_id: Some(Uuid::new_v4()),
            amount,
            reference_id: reference.to_string(),
            gps: None,
            device_id: None,
            synced: true,
            created_by: Uuid::new_v4(),
        }
    }

    #[test]
    fn append_assigns_monotonic_sequence() {
        let mut ledger = Ledger::new();
        let a = ledger.append(deposit(100, "DEP-1")).unwrap();
        let b = ledger.append(deposit(200, "DEP-2")).unwrap();
        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
    }

    #[test]
    fn append_rejects_negative_amount() {
        let mut ledger = Ledger::new();
        let err = ledger.append(deposit(-5, "DEP-1")).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn append_rejects_reference_collision() {
        let mut ledger = Ledger::new();
        ledger.append(deposit(100, "DEP-1")).unwrap();
        let err = ledger.append(deposit(200, "DEP-1")).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn update_and_delete_are_rejected() {
        let mut ledger = Ledger::new();
        let ev = ledger.append(deposit(100, "DEP-1")).unwrap();
        assert!(matches!(
            ledger.update(ev.id).unwrap_err(),
            CoreError::Immutability(_)
        ));
        assert!(matches!(
            ledger.delete(ev.id).unwrap_err(),
            CoreError::Immutability(_)
        ));
    }

    #[test]
    fn query_filters_and_orders() {
        let mut ledger = Ledger::new();
        let contributor = Uuid::new_v4();
        let mut ev = deposit(100, "DEP-1");
        ev.contributor_id = Some(contributor);
        ledger.append(ev).unwrap();
        ledger.append(deposit(200, "DEP-2")).unwrap();

        let mine = ledger.query(&EventFilter {
            contributor_id: Some(contributor),
            ..Default::default()
        });
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].amount, 100);

        let newest_first = ledger.query(&EventFilter {
            descending: true,
            ..Default::default()
        });
        assert_eq!(newest_first[0].reference_id, "DEP-2");
    }

    #[test]
    fn mark_synced_is_idempotent() {
        let mut ledger = Ledger::new();
        let mut ev = deposit(100, "DEP-1");
        ev.synced = false;
        let ev = ledger.append(ev).unwrap();
        assert!(ev.synced_at.is_none());

        let first = ledger.mark_synced(ev.id).unwrap();
        assert!(first.synced);
        let stamped = first.synced_at;
        let second = ledger.mark_synced(ev.id).unwrap();
        assert_eq!(second.synced_at, stamped);
    }
}
