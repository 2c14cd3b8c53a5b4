//! SQLite-backed ticket store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{ffi, params, Connection, OptionalExtension, Row, ToSql};

use super::{NewTicket, StatusCounts, Ticket, TicketError, TicketStatus, TicketStore};
use crate::schedule::{from_storage_string, to_storage_string};
use crate::search::{sql, SearchPage, TicketQuery, TicketSearch};

const COLUMNS: &str = "id, invoice_id, client_name, scheduled_at, description, status, \
     dispatcher_id, dispatcher_name, supervisor_id, supervisor_name, notes, \
     cancellation_reason, created_at, updated_at";

/// SQLite-backed ticket store.
pub struct SqliteTicketStore {
    conn: Mutex<Connection>,
}

impl SqliteTicketStore {
    /// Open or create the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, TicketError> {
        let conn = Connection::open(path).map_err(storage)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(storage)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite ticket store (useful for testing).
    pub fn in_memory() -> Result<Self, TicketError> {
        let conn = Connection::open_in_memory().map_err(storage)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), TicketError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS despachos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                invoice_id TEXT NOT NULL UNIQUE,
                client_name TEXT NOT NULL,
                scheduled_at TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'in_progress', 'completed', 'cancelled')),
                dispatcher_id INTEGER,
                dispatcher_name TEXT,
                supervisor_id INTEGER,
                supervisor_name TEXT,
                notes TEXT,
                cancellation_reason TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                CHECK (
                    (status = 'cancelled' AND length(trim(cancellation_reason)) > 0)
                    OR (status <> 'cancelled' AND cancellation_reason IS NULL)
                )
            );

            CREATE INDEX IF NOT EXISTS idx_despachos_status ON despachos(status);
            CREATE INDEX IF NOT EXISTS idx_despachos_scheduled_at ON despachos(scheduled_at DESC);
            CREATE INDEX IF NOT EXISTS idx_despachos_dispatcher ON despachos(dispatcher_id);

            CREATE TABLE IF NOT EXISTS customers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                phone TEXT,
                address TEXT,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
            "#,
        )
        .map_err(storage)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, TicketError> {
        self.conn
            .lock()
            .map_err(|_| TicketError::Storage("ticket database lock poisoned".to_string()))
    }

    fn row_to_ticket(row: &Row) -> rusqlite::Result<Ticket> {
        let status: String = row.get(5)?;
        let status = status
            .parse::<TicketStatus>()
            .map_err(|e| conversion_error(5, e))?;

        Ok(Ticket {
            id: row.get(0)?,
            invoice_id: row.get(1)?,
            client_name: row.get(2)?,
            scheduled_at: timestamp_column(row, 3)?,
            description: row.get(4)?,
            status,
            dispatcher_id: row.get(6)?,
            dispatcher_name: row.get(7)?,
            supervisor_id: row.get(8)?,
            supervisor_name: row.get(9)?,
            notes: row.get(10)?,
            cancellation_reason: row.get(11)?,
            created_at: timestamp_column(row, 12)?,
            updated_at: timestamp_column(row, 13)?,
        })
    }

    fn fetch(conn: &Connection, id: i64) -> Result<Option<Ticket>, TicketError> {
        conn.query_row(
            &format!("SELECT {} FROM despachos WHERE id = ?", COLUMNS),
            params![id],
            Self::row_to_ticket,
        )
        .optional()
        .map_err(storage)
    }

    fn query_tickets(
        conn: &Connection,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<Ticket>, TicketError> {
        let mut stmt = conn.prepare(sql).map_err(storage)?;
        let rows = stmt
            .query_map(params, Self::row_to_ticket)
            .map_err(storage)?;

        let mut tickets = Vec::new();
        for row_result in rows {
            tickets.push(row_result.map_err(storage)?);
        }
        Ok(tickets)
    }
}

impl TicketStore for SqliteTicketStore {
    fn get(&self, id: i64) -> Result<Option<Ticket>, TicketError> {
        let conn = self.lock()?;
        Self::fetch(&conn, id)
    }

    fn list_all(&self) -> Result<Vec<Ticket>, TicketError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM despachos {}",
            COLUMNS,
            sql::order_by_clause(&TicketQuery::all())
        );
        Self::query_tickets(&conn, &sql, &[])
    }

    fn insert(&self, ticket: NewTicket) -> Result<Ticket, TicketError> {
        let conn = self.lock()?;
        let created_at = to_storage_string(&ticket.created_at);

        conn.execute(
            "INSERT INTO despachos (invoice_id, client_name, scheduled_at, description, status, \
             dispatcher_id, dispatcher_name, supervisor_id, supervisor_name, notes, \
             cancellation_reason, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                ticket.invoice_id,
                ticket.client_name,
                to_storage_string(&ticket.scheduled_at),
                ticket.description,
                ticket.status.as_str(),
                ticket.dispatcher_id,
                ticket.dispatcher_name,
                ticket.supervisor_id,
                ticket.supervisor_name,
                ticket.notes,
                ticket.cancellation_reason,
                created_at,
                created_at,
            ],
        )
        .map_err(|e| write_error(e, &ticket.invoice_id))?;

        let id = conn.last_insert_rowid();
        Ok(ticket.into_ticket(id))
    }

    fn update(&self, ticket: &Ticket) -> Result<Ticket, TicketError> {
        let conn = self.lock()?;

        let changed = conn
            .execute(
                "UPDATE despachos SET invoice_id = ?, client_name = ?, scheduled_at = ?, \
                 description = ?, status = ?, dispatcher_id = ?, dispatcher_name = ?, \
                 supervisor_id = ?, supervisor_name = ?, notes = ?, cancellation_reason = ?, \
                 updated_at = ? WHERE id = ?",
                params![
                    ticket.invoice_id,
                    ticket.client_name,
                    to_storage_string(&ticket.scheduled_at),
                    ticket.description,
                    ticket.status.as_str(),
                    ticket.dispatcher_id,
                    ticket.dispatcher_name,
                    ticket.supervisor_id,
                    ticket.supervisor_name,
                    ticket.notes,
                    ticket.cancellation_reason,
                    to_storage_string(&ticket.updated_at),
                    ticket.id,
                ],
            )
            .map_err(|e| write_error(e, &ticket.invoice_id))?;

        if changed == 0 {
            return Err(TicketError::NotFound(ticket.id));
        }

        Self::fetch(&conn, ticket.id)?.ok_or(TicketError::NotFound(ticket.id))
    }

    fn delete(&self, id: i64) -> Result<Ticket, TicketError> {
        let conn = self.lock()?;

        let ticket = Self::fetch(&conn, id)?.ok_or(TicketError::NotFound(id))?;

        conn.execute("DELETE FROM despachos WHERE id = ?", params![id])
            .map_err(storage)?;

        Ok(ticket)
    }

    fn count_by_status(&self) -> Result<StatusCounts, TicketError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM despachos GROUP BY status")
            .map_err(storage)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(storage)?;

        let mut counts = StatusCounts::default();
        for row_result in rows {
            let (status, count) = row_result.map_err(storage)?;
            let status = status.parse::<TicketStatus>()?;
            counts.add(status, u64::try_from(count).unwrap_or(0));
        }
        Ok(counts)
    }
}

impl TicketSearch for SqliteTicketStore {
    fn search(&self, query: &TicketQuery) -> Result<SearchPage, TicketError> {
        let conn = self.lock()?;

        let (where_clause, params) = sql::build_where_clause(query);
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM despachos {}", where_clause),
                param_refs.as_slice(),
                |row| row.get(0),
            )
            .map_err(storage)?;

        let (limit, offset) = sql::page_params(query);
        let mut all_params = param_refs;
        all_params.push(&limit);
        all_params.push(&offset);

        let sql = format!(
            "SELECT {} FROM despachos {} {} LIMIT ? OFFSET ?",
            COLUMNS,
            where_clause,
            sql::order_by_clause(query)
        );
        let tickets = Self::query_tickets(&conn, &sql, all_params.as_slice())?;

        Ok(SearchPage::new(
            tickets,
            usize::try_from(total).unwrap_or(0),
            query,
        ))
    }
}

fn storage(e: rusqlite::Error) -> TicketError {
    TicketError::Storage(e.to_string())
}

fn write_error(e: rusqlite::Error, invoice_id: &str) -> TicketError {
    if let rusqlite::Error::SqliteFailure(ref err, ref message) = e {
        match err.extended_code {
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                return TicketError::DuplicateInvoice(invoice_id.to_string());
            }
            ffi::SQLITE_CONSTRAINT_CHECK => {
                return TicketError::Validation(format!(
                    "ticket rejected by store: {}",
                    message.as_deref().unwrap_or("check constraint failed")
                ));
            }
            _ => {}
        }
    }
    storage(e)
}

fn conversion_error<E>(column: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

fn timestamp_column(row: &Row, column: usize) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    let value: String = row.get(column)?;
    from_storage_string(&value).map_err(|e| conversion_error(column, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::now_millis;
    use chrono::{TimeDelta, TimeZone, Utc};

    fn create_test_store() -> SqliteTicketStore {
        SqliteTicketStore::in_memory().unwrap()
    }

    fn new_ticket(invoice: &str) -> NewTicket {
        NewTicket {
            invoice_id: invoice.to_string(),
            client_name: "Ferretería Central".to_string(),
            scheduled_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
            description: "10 sacos de cemento".to_string(),
            status: TicketStatus::Pending,
            dispatcher_id: Some(2),
            dispatcher_name: Some("despachador".to_string()),
            supervisor_id: None,
            supervisor_name: None,
            notes: None,
            cancellation_reason: None,
            created_at: now_millis(),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let store = create_test_store();
        let created = store.insert(new_ticket("F-100")).unwrap();
        assert!(created.id > 0);

        let fetched = store.get(created.id).unwrap().unwrap();
        assert_eq!(fetched, created);
    }

    #[test]
    fn test_get_missing() {
        let store = create_test_store();
        assert!(store.get(42).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_invoice_rejected() {
        let store = create_test_store();
        store.insert(new_ticket("F-1")).unwrap();

        let result = store.insert(new_ticket("F-1"));
        assert_eq!(result, Err(TicketError::DuplicateInvoice("F-1".to_string())));
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_cancelled_without_reason_rejected_by_schema() {
        let store = create_test_store();
        let mut ticket = new_ticket("F-2");
        ticket.status = TicketStatus::Cancelled;

        assert!(matches!(
            store.insert(ticket),
            Err(TicketError::Validation(_))
        ));
    }

    #[test]
    fn test_invalid_status_rejected_by_schema() {
        let store = create_test_store();
        let conn = store.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO despachos (invoice_id, client_name, scheduled_at, status, created_at, updated_at) \
             VALUES ('F-9', 'X', '2024-01-01T00:00:00.000Z', 'shipped', '', '')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_update_overwrites_fields() {
        let store = create_test_store();
        let mut ticket = store.insert(new_ticket("F-3")).unwrap();

        ticket.status = TicketStatus::Cancelled;
        ticket.cancellation_reason = Some("cliente rechazó".to_string());
        ticket.updated_at = ticket.updated_at + TimeDelta::milliseconds(5);
        let updated = store.update(&ticket).unwrap();

        assert_eq!(updated.status, TicketStatus::Cancelled);
        assert_eq!(updated.cancellation_reason.as_deref(), Some("cliente rechazó"));
        assert_eq!(updated.updated_at, ticket.updated_at);
        assert_eq!(updated.created_at, ticket.created_at);
    }

    #[test]
    fn test_update_missing() {
        let store = create_test_store();
        let ticket = new_ticket("F-4").into_ticket(77);
        assert_eq!(store.update(&ticket), Err(TicketError::NotFound(77)));
    }

    #[test]
    fn test_update_to_taken_invoice() {
        let store = create_test_store();
        store.insert(new_ticket("F-5")).unwrap();
        let mut other = store.insert(new_ticket("F-6")).unwrap();

        other.invoice_id = "F-5".to_string();
        assert_eq!(
            store.update(&other),
            Err(TicketError::DuplicateInvoice("F-5".to_string()))
        );
    }

    #[test]
    fn test_delete() {
        let store = create_test_store();
        let ticket = store.insert(new_ticket("F-7")).unwrap();

        let removed = store.delete(ticket.id).unwrap();
        assert_eq!(removed.id, ticket.id);
        assert!(store.get(ticket.id).unwrap().is_none());
        assert_eq!(store.delete(ticket.id), Err(TicketError::NotFound(ticket.id)));
    }

    #[test]
    fn test_count_by_status() {
        let store = create_test_store();
        store.insert(new_ticket("F-1")).unwrap();
        store.insert(new_ticket("F-2")).unwrap();
        let mut busy = new_ticket("F-3");
        busy.status = TicketStatus::InProgress;
        store.insert(busy).unwrap();

        let counts = store.count_by_status().unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.in_progress, 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_search_filters_and_pages() {
        let store = create_test_store();
        for i in 0..12 {
            let mut ticket = new_ticket(&format!("F-{:03}", i));
            ticket.scheduled_at = Utc.with_ymd_and_hms(2024, 1, 1 + i, 8, 0, 0).unwrap();
            store.insert(ticket).unwrap();
        }

        let page = store
            .search(&TicketQuery::new().with_text("f-00").with_limit(5))
            .unwrap();
        assert_eq!(page.total, 10);
        assert_eq!(page.tickets.len(), 5);
        assert!(page.has_more);
        assert_eq!(page.tickets[0].invoice_id, "F-009");
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("despachos.db");

        let id = {
            let store = SqliteTicketStore::new(&path).unwrap();
            store.insert(new_ticket("F-1")).unwrap().id
        };

        let store = SqliteTicketStore::new(&path).unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().invoice_id, "F-1");
    }

    #[test]
    fn test_unknown_user_ids_are_stored() {
        let store = create_test_store();
        let mut ticket = new_ticket("F-8");
        ticket.dispatcher_id = Some(99);
        ticket.dispatcher_name = None;
        ticket.supervisor_id = Some(98);
        let created = store.insert(ticket).unwrap();

        let fetched = store.get(created.id).unwrap().unwrap();
        assert_eq!(fetched.dispatcher_id, Some(99));
        assert_eq!(fetched.dispatcher_name, None);
        assert_eq!(fetched.supervisor_id, Some(98));

        let mut reassigned = fetched;
        reassigned.supervisor_id = Some(12345);
        reassigned.updated_at = reassigned.updated_at + TimeDelta::milliseconds(1);
        assert_eq!(store.update(&reassigned).unwrap().supervisor_id, Some(12345));
    }
}
