//! Dispatch tickets and their storage backends.

mod memory_store;
mod sqlite_store;
mod store;
mod types;

pub use memory_store::MemoryTicketStore;
pub use sqlite_store::SqliteTicketStore;
pub use store::{TicketError, TicketStore};
pub use types::{NewTicket, StatusCounts, Ticket, TicketStatus};

pub(crate) use types::check_cancellation;
