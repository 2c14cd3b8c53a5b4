pub mod auth;
pub mod config;
pub mod events;
pub mod lifecycle;
pub mod schedule;
pub mod search;
pub mod ticket;
pub mod user;

pub use auth::{
    hash_secret, verify_secret, AuthError, CredentialVerifier, Credentials, DirectoryVerifier,
    SessionUser,
};
pub use config::{
    load_config, load_config_from_str, load_config_or_default, validate_config, AuthConfig,
    Config, ConfigError, DatabaseConfig, RealtimeConfig, SanitizedConfig, ScheduleConfig,
    ServerConfig, TimezoneMode,
};
pub use events::{BroadcastError, EventPublisher, TicketBroadcaster, TicketEvent};
pub use lifecycle::{CreateTicketRequest, LifecycleManager, StatusPayload, TicketPatch};
pub use schedule::{parse_date, ScheduleError, ScheduleZone};
pub use search::{SearchPage, SortDirection, SortField, TicketQuery, TicketSearch};
pub use ticket::{
    MemoryTicketStore, NewTicket, SqliteTicketStore, StatusCounts, Ticket, TicketError,
    TicketStatus, TicketStore,
};
pub use user::{NewUser, Role, SqliteUserStore, User, UserDirectory, UserError, UserPatch, UserStore};
