//! Ticket lifecycle: validation, status transitions and change events.
//!
//! Every mutation goes through [`LifecycleManager`]. It validates input,
//! merges it with the stored record, persists the result and publishes a
//! [`TicketEvent`]. Mutations are serialized, so subscribers see events in
//! the order changes were applied.

mod requests;

pub use requests::{CreateTicketRequest, StatusPayload, TicketPatch};

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::events::{EventPublisher, TicketEvent};
use crate::schedule::{now_millis, ScheduleZone};
use crate::search::{SearchPage, TicketQuery};
use crate::ticket::{
    check_cancellation, NewTicket, StatusCounts, Ticket, TicketError, TicketStatus, TicketStore,
};
use crate::user::UserDirectory;

pub struct LifecycleManager {
    store: Arc<dyn TicketStore>,
    users: Arc<dyn UserDirectory>,
    publisher: Arc<dyn EventPublisher>,
    zone: ScheduleZone,
    /// Held across read, merge, write and publish of every mutation.
    write_gate: Mutex<()>,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn TicketStore>,
        users: Arc<dyn UserDirectory>,
        publisher: Arc<dyn EventPublisher>,
        zone: ScheduleZone,
    ) -> Self {
        Self {
            store,
            users,
            publisher,
            zone,
            write_gate: Mutex::new(()),
        }
    }

    /// Zone used to interpret schedule input and calendar dates.
    pub fn zone(&self) -> &ScheduleZone {
        &self.zone
    }

    pub fn get(&self, id: i64) -> Result<Ticket, TicketError> {
        self.store.get(id)?.ok_or(TicketError::NotFound(id))
    }

    pub fn list_all(&self) -> Result<Vec<Ticket>, TicketError> {
        self.store.list_all()
    }

    pub fn search(&self, query: &TicketQuery) -> Result<SearchPage, TicketError> {
        self.store.search(query)
    }

    pub fn status_counts(&self) -> Result<StatusCounts, TicketError> {
        self.store.count_by_status()
    }

    /// Create a ticket. Status defaults to `pending`.
    pub fn create(&self, request: CreateTicketRequest) -> Result<Ticket, TicketError> {
        let invoice_id = required(request.invoice_id, "invoiceId")?;
        let client_name = required(request.client_name, "clientName")?;
        let scheduled_at = match request.scheduled_at.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => self.parse_scheduled(raw)?,
            _ => return Err(TicketError::Validation("scheduledAt is required".to_string())),
        };
        let status = match request.status.as_deref() {
            Some(raw) => parse_status(raw)?,
            None => TicketStatus::Pending,
        };
        let cancellation_reason = if status == TicketStatus::Cancelled {
            normalize(request.cancellation_reason)
        } else {
            None
        };
        check_cancellation(status, cancellation_reason.as_deref())?;

        let _gate = self.gate()?;
        let ticket = self.store.insert(NewTicket {
            invoice_id,
            client_name,
            scheduled_at,
            description: request.description.unwrap_or_default(),
            status,
            dispatcher_id: request.dispatcher_id,
            dispatcher_name: self.username_for(request.dispatcher_id)?,
            supervisor_id: request.supervisor_id,
            supervisor_name: self.username_for(request.supervisor_id)?,
            notes: normalize(request.notes),
            cancellation_reason,
            created_at: now_millis(),
        })?;

        info!(
            ticket_id = ticket.id,
            invoice_id = %ticket.invoice_id,
            status = %ticket.status,
            "Ticket created"
        );
        self.publish(TicketEvent::Created(ticket.clone()));
        Ok(ticket)
    }

    /// Move a ticket to a new status.
    ///
    /// Cancelling requires a non-blank reason. Any status may follow any
    /// other; leaving `cancelled` drops the stored reason.
    pub fn set_status(&self, id: i64, payload: StatusPayload) -> Result<Ticket, TicketError> {
        let status = parse_status(&payload.status)?;
        let reason = normalize(payload.cancellation_reason);
        if status == TicketStatus::Cancelled && reason.is_none() {
            return Err(TicketError::Validation(
                "cancellationReason is required when cancelling".to_string(),
            ));
        }

        self.update(
            id,
            TicketPatch {
                status: Some(status.as_str().to_string()),
                cancellation_reason: reason.map(Some),
                description: payload.description,
                ..TicketPatch::default()
            },
        )
    }

    /// Apply a partial update. Only fields present in `patch` change.
    pub fn update(&self, id: i64, patch: TicketPatch) -> Result<Ticket, TicketError> {
        let status = patch.status.as_deref().map(parse_status).transpose()?;
        let scheduled_at = patch
            .scheduled_at
            .as_deref()
            .map(|raw| self.parse_scheduled(raw))
            .transpose()?;

        let _gate = self.gate()?;
        let current = self.store.get(id)?.ok_or(TicketError::NotFound(id))?;
        let next = self.merge(&current, patch, status, scheduled_at)?;
        let saved = self.store.update(&next)?;

        if saved.status != current.status {
            info!(
                ticket_id = saved.id,
                invoice_id = %saved.invoice_id,
                from = %current.status,
                to = %saved.status,
                "Ticket status changed"
            );
        } else {
            info!(ticket_id = saved.id, invoice_id = %saved.invoice_id, "Ticket updated");
        }
        self.publish(TicketEvent::Updated(saved.clone()));
        Ok(saved)
    }

    /// Permanently delete a ticket.
    pub fn delete(&self, id: i64) -> Result<Ticket, TicketError> {
        let _gate = self.gate()?;
        let removed = self.store.delete(id)?;
        info!(ticket_id = id, invoice_id = %removed.invoice_id, "Ticket deleted");
        self.publish(TicketEvent::Deleted { id });
        Ok(removed)
    }

    fn merge(
        &self,
        current: &Ticket,
        patch: TicketPatch,
        status: Option<TicketStatus>,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<Ticket, TicketError> {
        let mut next = current.clone();

        if let Some(invoice_id) = patch.invoice_id {
            next.invoice_id = required(Some(invoice_id), "invoiceId")?;
        }
        if let Some(client_name) = patch.client_name {
            next.client_name = required(Some(client_name), "clientName")?;
        }
        if let Some(scheduled_at) = scheduled_at {
            next.scheduled_at = scheduled_at;
        }
        if let Some(description) = patch.description {
            next.description = description;
        }
        if let Some(dispatcher_id) = patch.dispatcher_id {
            next.dispatcher_id = dispatcher_id;
            next.dispatcher_name = self.username_for(dispatcher_id)?;
        }
        if let Some(supervisor_id) = patch.supervisor_id {
            next.supervisor_id = supervisor_id;
            next.supervisor_name = self.username_for(supervisor_id)?;
        }
        if let Some(notes) = patch.notes {
            next.notes = normalize(notes);
        }

        next.status = status.unwrap_or(current.status);
        next.cancellation_reason = if next.status == TicketStatus::Cancelled {
            match patch.cancellation_reason {
                Some(reason) => normalize(reason),
                None => current.cancellation_reason.clone(),
            }
        } else {
            None
        };
        check_cancellation(next.status, next.cancellation_reason.as_deref())?;

        next.updated_at = next_updated_at(current.updated_at);
        Ok(next)
    }

    fn parse_scheduled(&self, raw: &str) -> Result<DateTime<Utc>, TicketError> {
        self.zone
            .parse_scheduled(raw)
            .map_err(|e| TicketError::Validation(format!("scheduledAt: {}", e)))
    }

    /// Cached username for a user id. Unknown ids resolve to no name.
    fn username_for(&self, id: Option<i64>) -> Result<Option<String>, TicketError> {
        match id {
            Some(id) => {
                let name = self
                    .users
                    .username_of(id)
                    .map_err(|e| TicketError::Storage(e.to_string()))?;
                if name.is_none() {
                    debug!(user_id = id, "Referenced user does not exist, caching no name");
                }
                Ok(name)
            }
            None => Ok(None),
        }
    }

    fn gate(&self) -> Result<MutexGuard<'_, ()>, TicketError> {
        self.write_gate
            .lock()
            .map_err(|_| TicketError::Storage("ticket write gate poisoned".to_string()))
    }

    /// Publish failures never fail the mutation that triggered them.
    fn publish(&self, event: TicketEvent) {
        let name = event.event_name();
        let ticket_id = event.ticket_id();
        match self.publisher.publish(event) {
            Ok(receivers) => debug!(event = name, ticket_id, receivers, "Event published"),
            Err(e) => warn!(event = name, ticket_id, error = %e, "Failed to publish ticket event"),
        }
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, TicketError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| TicketError::Validation(format!("{} is required", field)))
}

fn parse_status(raw: &str) -> Result<TicketStatus, TicketError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(TicketError::Validation("status is required".to_string()));
    }
    raw.parse()
}

/// Trim, treating blank text as absent.
fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `updated_at` strictly increases even when two writes share a millisecond.
fn next_updated_at(previous: DateTime<Utc>) -> DateTime<Utc> {
    now_millis().max(previous + TimeDelta::milliseconds(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BroadcastError, TicketBroadcaster};
    use crate::ticket::SqliteTicketStore;
    use crate::user::{NewUser, Role, SqliteUserStore, UserStore};
    use tokio::sync::broadcast::error::TryRecvError;

    struct Fixture {
        manager: LifecycleManager,
        users: Arc<SqliteUserStore>,
        broadcaster: TicketBroadcaster,
    }

    fn fixture_with_zone(zone: ScheduleZone) -> Fixture {
        let store = Arc::new(SqliteTicketStore::in_memory().unwrap());
        let users = Arc::new(SqliteUserStore::in_memory().unwrap());
        users.seed_defaults("admin123").unwrap();
        let broadcaster = TicketBroadcaster::new(64);
        let manager =
            LifecycleManager::new(store, users.clone(), Arc::new(broadcaster.clone()), zone);
        Fixture {
            manager,
            users,
            broadcaster,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_zone(ScheduleZone::naive_local())
    }

    fn request(invoice: &str) -> CreateTicketRequest {
        CreateTicketRequest {
            invoice_id: Some(invoice.to_string()),
            client_name: Some("Acme".to_string()),
            scheduled_at: Some("2024-05-01".to_string()),
            ..CreateTicketRequest::default()
        }
    }

    struct FailingPublisher;

    impl EventPublisher for FailingPublisher {
        fn publish(&self, _event: TicketEvent) -> Result<usize, BroadcastError> {
            Err(BroadcastError::Closed)
        }
    }

    #[test]
    fn test_create_defaults_to_pending() {
        let f = fixture();
        let created = f.manager.create(request("F-1")).unwrap();

        let fetched = f.manager.get(created.id).unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.status, TicketStatus::Pending);
        assert_eq!(fetched.invoice_id, "F-1");
        assert_eq!(fetched.client_name, "Acme");
        assert_eq!(fetched.scheduled_at.to_rfc3339(), "2024-05-01T00:00:00+00:00");
        assert_eq!(fetched.created_at, fetched.updated_at);
    }

    #[test]
    fn test_create_requires_fields() {
        let f = fixture();
        for req in [
            CreateTicketRequest {
                invoice_id: None,
                ..request("x")
            },
            CreateTicketRequest {
                invoice_id: Some("  ".to_string()),
                ..request("x")
            },
            CreateTicketRequest {
                client_name: None,
                ..request("F-2")
            },
            CreateTicketRequest {
                scheduled_at: None,
                ..request("F-3")
            },
            CreateTicketRequest {
                scheduled_at: Some("mañana".to_string()),
                ..request("F-4")
            },
        ] {
            assert!(matches!(f.manager.create(req), Err(TicketError::Validation(_))));
        }
        assert!(f.manager.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_create_rejects_invalid_status() {
        let f = fixture();
        let result = f.manager.create(CreateTicketRequest {
            status: Some("shipped".to_string()),
            ..request("F-1")
        });
        assert_eq!(
            result,
            Err(TicketError::Validation("invalid status: shipped".to_string()))
        );
    }

    #[test]
    fn test_create_cancelled_requires_reason() {
        let f = fixture();
        let result = f.manager.create(CreateTicketRequest {
            status: Some("cancelled".to_string()),
            ..request("F-1")
        });
        assert!(matches!(result, Err(TicketError::Validation(_))));

        let created = f
            .manager
            .create(CreateTicketRequest {
                status: Some("cancelled".to_string()),
                cancellation_reason: Some("sin stock".to_string()),
                ..request("F-1")
            })
            .unwrap();
        assert_eq!(created.cancellation_reason.as_deref(), Some("sin stock"));
    }

    #[test]
    fn test_duplicate_invoice() {
        let f = fixture();
        f.manager.create(request("F-1")).unwrap();

        let result = f.manager.create(request("F-1"));
        assert_eq!(result, Err(TicketError::DuplicateInvoice("F-1".to_string())));

        let page = f.manager.search(&TicketQuery::new().with_text("F-1")).unwrap();
        assert_eq!(page.total, 1);
    }

    #[test]
    fn test_usernames_cached_at_write_time() {
        let f = fixture();
        let created = f
            .manager
            .create(CreateTicketRequest {
                dispatcher_id: Some(2),
                supervisor_id: Some(99),
                ..request("F-1")
            })
            .unwrap();
        assert_eq!(created.dispatcher_name.as_deref(), Some("despachador"));
        // Unknown users are not an error, the name is just absent.
        assert_eq!(created.supervisor_id, Some(99));
        assert_eq!(created.supervisor_name, None);

        let other = f
            .users
            .create(NewUser {
                username: "pedro".to_string(),
                display_name: "Pedro".to_string(),
                role: Role::Dispatcher,
                password: "x".to_string(),
            })
            .unwrap();
        let updated = f
            .manager
            .update(
                created.id,
                TicketPatch {
                    dispatcher_id: Some(Some(other.id)),
                    ..TicketPatch::default()
                },
            )
            .unwrap();
        assert_eq!(updated.dispatcher_name.as_deref(), Some("pedro"));

        // Deactivating the user keeps the cached name.
        f.users.deactivate(other.id).unwrap();
        assert_eq!(
            f.manager.get(created.id).unwrap().dispatcher_name.as_deref(),
            Some("pedro")
        );

        let cleared = f
            .manager
            .update(
                created.id,
                TicketPatch {
                    dispatcher_id: Some(None),
                    ..TicketPatch::default()
                },
            )
            .unwrap();
        assert_eq!(cleared.dispatcher_id, None);
        assert_eq!(cleared.dispatcher_name, None);
    }

    #[test]
    fn test_cancel_without_reason_leaves_ticket_unchanged() {
        let f = fixture();
        let created = f.manager.create(request("F-1")).unwrap();
        let mut rx = f.broadcaster.subscribe();

        for payload in [
            StatusPayload::new("cancelled"),
            StatusPayload::new("cancelled").with_reason("   "),
        ] {
            assert!(matches!(
                f.manager.set_status(created.id, payload),
                Err(TicketError::Validation(_))
            ));
        }
        assert!(matches!(
            f.manager.update(created.id, TicketPatch::status("cancelled")),
            Err(TicketError::Validation(_))
        ));

        assert_eq!(f.manager.get(created.id).unwrap(), created);
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[test]
    fn test_update_bumps_updated_at() {
        let f = fixture();
        let created = f.manager.create(request("F-1")).unwrap();

        let updated = f
            .manager
            .update(created.id, TicketPatch::status("completed"))
            .unwrap();
        let fetched = f.manager.get(created.id).unwrap();

        assert_eq!(fetched.status, TicketStatus::Completed);
        assert!(fetched.updated_at > created.updated_at);
        assert_eq!(fetched, updated);
        assert_eq!(fetched.created_at, created.created_at);
    }

    #[test]
    fn test_update_only_touches_given_fields() {
        let f = fixture();
        let created = f
            .manager
            .create(CreateTicketRequest {
                notes: Some("portón azul".to_string()),
                description: Some("20 bloques".to_string()),
                ..request("F-1")
            })
            .unwrap();

        let updated = f
            .manager
            .update(
                created.id,
                TicketPatch {
                    client_name: Some("Acme Norte".to_string()),
                    ..TicketPatch::default()
                },
            )
            .unwrap();
        assert_eq!(updated.client_name, "Acme Norte");
        assert_eq!(updated.notes.as_deref(), Some("portón azul"));
        assert_eq!(updated.description, "20 bloques");
        assert_eq!(updated.invoice_id, "F-1");
    }

    #[test]
    fn test_update_missing_ticket() {
        let f = fixture();
        assert_eq!(
            f.manager.update(42, TicketPatch::status("completed")),
            Err(TicketError::NotFound(42))
        );
    }

    #[test]
    fn test_leaving_cancelled_clears_reason() {
        let f = fixture();
        let created = f.manager.create(request("F-1")).unwrap();
        f.manager
            .set_status(created.id, StatusPayload::new("cancelled").with_reason("lluvia"))
            .unwrap();

        let reopened = f
            .manager
            .set_status(
                created.id,
                StatusPayload::new("pending").with_description("faltan 5 sacos"),
            )
            .unwrap();
        assert_eq!(reopened.status, TicketStatus::Pending);
        assert_eq!(reopened.cancellation_reason, None);
        assert_eq!(reopened.description, "faltan 5 sacos");
    }

    #[test]
    fn test_any_status_can_follow_any_other() {
        let f = fixture();
        let created = f.manager.create(request("F-1")).unwrap();
        for status in ["completed", "pending", "in_progress", "completed", "in_progress"] {
            let ticket = f
                .manager
                .set_status(created.id, StatusPayload::new(status))
                .unwrap();
            assert_eq!(ticket.status.as_str(), status);
        }
    }

    #[test]
    fn test_delete_missing_emits_nothing() {
        let f = fixture();
        let mut rx = f.broadcaster.subscribe();

        assert_eq!(f.manager.delete(7), Err(TicketError::NotFound(7)));
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[test]
    fn test_delete_emits_event() {
        let f = fixture();
        let created = f.manager.create(request("F-1")).unwrap();
        let mut rx = f.broadcaster.subscribe();

        f.manager.delete(created.id).unwrap();
        assert_eq!(rx.try_recv().unwrap(), TicketEvent::Deleted { id: created.id });
        assert!(matches!(f.manager.get(created.id), Err(TicketError::NotFound(_))));
    }

    #[test]
    fn test_cancel_flow_broadcasts_once() {
        let f = fixture();
        let created = f
            .manager
            .create(CreateTicketRequest {
                status: Some("in_progress".to_string()),
                ..request("F-1")
            })
            .unwrap();
        let mut rx = f.broadcaster.subscribe();

        assert!(f
            .manager
            .set_status(created.id, StatusPayload::new("cancelled"))
            .is_err());

        let cancelled = f
            .manager
            .set_status(
                created.id,
                StatusPayload::new("cancelled").with_reason("client refused"),
            )
            .unwrap();
        assert_eq!(cancelled.status, TicketStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("client refused"));

        assert_eq!(rx.try_recv().unwrap(), TicketEvent::Updated(cancelled));
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[test]
    fn test_publisher_failure_does_not_fail_mutation() {
        let manager = LifecycleManager::new(
            Arc::new(SqliteTicketStore::in_memory().unwrap()),
            Arc::new(SqliteUserStore::in_memory().unwrap()),
            Arc::new(FailingPublisher),
            ScheduleZone::naive_local(),
        );

        let created = manager.create(request("F-1")).unwrap();
        manager
            .set_status(created.id, StatusPayload::new("completed"))
            .unwrap();
        manager.delete(created.id).unwrap();
    }

    #[test]
    fn test_utc_offset_zone() {
        let f = fixture_with_zone(ScheduleZone::utc_offset_hours(-4));
        let created = f
            .manager
            .create(CreateTicketRequest {
                scheduled_at: Some("2024-05-01T08:00".to_string()),
                ..request("F-1")
            })
            .unwrap();
        assert_eq!(created.scheduled_at.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn test_five_digit_year_rejected_and_listing_still_works() {
        let f = fixture();
        let existing = f.manager.create(request("F-1")).unwrap();

        let result = f.manager.create(CreateTicketRequest {
            scheduled_at: Some("+10000-01-01T00:00".to_string()),
            ..request("F-2")
        });
        assert!(matches!(result, Err(TicketError::Validation(_))));

        let moved = f.manager.update(
            existing.id,
            TicketPatch {
                scheduled_at: Some("+10000-01-01".to_string()),
                ..TicketPatch::default()
            },
        );
        assert!(matches!(moved, Err(TicketError::Validation(_))));

        assert_eq!(f.manager.list_all().unwrap(), vec![existing]);
        assert_eq!(f.manager.search(&TicketQuery::all()).unwrap().total, 1);
    }

    #[test]
    fn test_status_counts() {
        let f = fixture();
        f.manager.create(request("F-1")).unwrap();
        f.manager
            .create(CreateTicketRequest {
                status: Some("in_progress".to_string()),
                ..request("F-2")
            })
            .unwrap();
        let counts = f.manager.status_counts().unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.in_progress, 1);
    }
}
