//! Users of the dispatch desk and their storage.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteUserStore;
pub use store::{UserDirectory, UserError, UserStore};
pub use types::{NewUser, Role, User, UserPatch};
