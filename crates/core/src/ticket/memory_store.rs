//! In-memory ticket replica.
//!
//! Mirrors the SQLite store's constraints and search semantics so a client
//! can keep a local copy, fed by a full snapshot and then by broadcast
//! events. It never syncs back; concurrent edits are not reconciled.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::types::check_cancellation;
use super::{NewTicket, StatusCounts, Ticket, TicketError, TicketStatus, TicketStore};
use crate::events::TicketEvent;
use crate::search::{matcher, SearchPage, TicketQuery, TicketSearch};

#[derive(Default)]
struct MirrorState {
    records: BTreeMap<i64, Ticket>,
    by_invoice: HashMap<String, i64>,
    by_status: HashMap<TicketStatus, BTreeSet<i64>>,
    next_id: i64,
}

impl MirrorState {
    fn index(&mut self, ticket: Ticket) {
        self.by_invoice.insert(ticket.invoice_id.clone(), ticket.id);
        self.by_status
            .entry(ticket.status)
            .or_default()
            .insert(ticket.id);
        self.next_id = self.next_id.max(ticket.id);
        self.records.insert(ticket.id, ticket);
    }

    fn unindex(&mut self, id: i64) -> Option<Ticket> {
        let ticket = self.records.remove(&id)?;
        if self.by_invoice.get(&ticket.invoice_id) == Some(&id) {
            self.by_invoice.remove(&ticket.invoice_id);
        }
        if let Some(ids) = self.by_status.get_mut(&ticket.status) {
            ids.remove(&id);
        }
        Some(ticket)
    }

    fn invoice_taken(&self, invoice_id: &str, except: Option<i64>) -> bool {
        self.by_invoice
            .get(invoice_id)
            .is_some_and(|owner| Some(*owner) != except)
    }

    /// Replace a record, dropping any other record that claimed its invoice.
    fn upsert(&mut self, ticket: Ticket) {
        self.unindex(ticket.id);
        if let Some(stale) = self.by_invoice.get(&ticket.invoice_id).copied() {
            self.unindex(stale);
        }
        self.index(ticket);
    }
}

/// In-memory ticket store with the same constraints as the SQLite store.
#[derive(Default)]
pub struct MemoryTicketStore {
    state: RwLock<MirrorState>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a replica from a full snapshot.
    pub fn from_snapshot(tickets: Vec<Ticket>) -> Result<Self, TicketError> {
        let store = Self::new();
        store.load_snapshot(tickets)?;
        Ok(store)
    }

    /// Replace the entire contents with `tickets`.
    pub fn load_snapshot(&self, tickets: Vec<Ticket>) -> Result<(), TicketError> {
        let mut fresh = MirrorState::default();
        for ticket in tickets {
            fresh.upsert(ticket);
        }
        *self.write()? = fresh;
        Ok(())
    }

    /// Apply a broadcast event from the authoritative store.
    pub fn apply_event(&self, event: &TicketEvent) -> Result<(), TicketError> {
        let mut state = self.write()?;
        match event {
            TicketEvent::Created(ticket) | TicketEvent::Updated(ticket) => {
                state.upsert(ticket.clone());
            }
            TicketEvent::Deleted { id } => {
                state.unindex(*id);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.read().map(|state| state.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MirrorState>, TicketError> {
        self.state
            .read()
            .map_err(|_| TicketError::Storage("ticket mirror lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MirrorState>, TicketError> {
        self.state
            .write()
            .map_err(|_| TicketError::Storage("ticket mirror lock poisoned".to_string()))
    }
}

impl TicketStore for MemoryTicketStore {
    fn get(&self, id: i64) -> Result<Option<Ticket>, TicketError> {
        Ok(self.read()?.records.get(&id).cloned())
    }

    fn list_all(&self) -> Result<Vec<Ticket>, TicketError> {
        let state = self.read()?;
        Ok(matcher::run(&TicketQuery::all(), state.records.values()).tickets)
    }

    fn insert(&self, ticket: NewTicket) -> Result<Ticket, TicketError> {
        check_cancellation(ticket.status, ticket.cancellation_reason.as_deref())?;

        let mut state = self.write()?;
        if state.invoice_taken(&ticket.invoice_id, None) {
            return Err(TicketError::DuplicateInvoice(ticket.invoice_id));
        }

        let id = state.next_id + 1;
        let ticket = ticket.into_ticket(id);
        state.index(ticket.clone());
        Ok(ticket)
    }

    fn update(&self, ticket: &Ticket) -> Result<Ticket, TicketError> {
        check_cancellation(ticket.status, ticket.cancellation_reason.as_deref())?;

        let mut state = self.write()?;
        let created_at = match state.records.get(&ticket.id) {
            Some(existing) => existing.created_at,
            None => return Err(TicketError::NotFound(ticket.id)),
        };
        if state.invoice_taken(&ticket.invoice_id, Some(ticket.id)) {
            return Err(TicketError::DuplicateInvoice(ticket.invoice_id.clone()));
        }

        let stored = Ticket {
            created_at,
            ..ticket.clone()
        };
        state.unindex(ticket.id);
        state.index(stored.clone());
        Ok(stored)
    }

    fn delete(&self, id: i64) -> Result<Ticket, TicketError> {
        self.write()?.unindex(id).ok_or(TicketError::NotFound(id))
    }

    fn count_by_status(&self) -> Result<StatusCounts, TicketError> {
        let state = self.read()?;
        let mut counts = StatusCounts::default();
        for (status, ids) in &state.by_status {
            counts.add(*status, ids.len() as u64);
        }
        Ok(counts)
    }
}

impl TicketSearch for MemoryTicketStore {
    fn search(&self, query: &TicketQuery) -> Result<SearchPage, TicketError> {
        let state = self.read()?;

        // The status index narrows the scan when status is the only filter.
        if let Some(status) = query.status.filter(|_| query.status_only()) {
            let candidates = state
                .by_status
                .get(&status)
                .into_iter()
                .flatten()
                .filter_map(|id| state.records.get(id));
            return Ok(matcher::run(query, candidates));
        }

        Ok(matcher::run(query, state.records.values()))
    }
}
