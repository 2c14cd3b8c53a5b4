//! SQLite-backed user store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{ffi, params, Connection, OptionalExtension, Row};
use tracing::info;

use super::{NewUser, Role, User, UserDirectory, UserError, UserPatch, UserStore};
use crate::auth::hash_secret;
use crate::schedule::{from_storage_string, now_millis, to_storage_string};

const COLUMNS: &str =
    "id, username, display_name, role, password_secret, is_active, created_at, last_login_at";

const DEFAULT_ACCOUNTS: [(&str, &str, Role); 2] = [
    ("supervisor", "Supervisor Principal", Role::Supervisor),
    ("despachador", "Despachador Principal", Role::Dispatcher),
];

pub struct SqliteUserStore {
    conn: Mutex<Connection>,
}

impl SqliteUserStore {
    /// Open or create the users table in the database at `path`.
    pub fn new(path: &Path) -> Result<Self, UserError> {
        let conn = Connection::open(path).map_err(storage)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(storage)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, UserError> {
        let conn = Connection::open_in_memory().map_err(storage)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), UserError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('dispatcher', 'supervisor')),
                password_secret TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                last_login_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
            "#,
        )
        .map_err(storage)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, UserError> {
        self.conn
            .lock()
            .map_err(|_| UserError::Storage("user database lock poisoned".to_string()))
    }

    fn row_to_user(row: &Row) -> rusqlite::Result<User> {
        let role: String = row.get(3)?;
        let role = role.parse::<Role>().map_err(|e| conversion_error(3, e))?;
        let created_at: String = row.get(6)?;
        let last_login_at: Option<String> = row.get(7)?;

        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            display_name: row.get(2)?,
            role,
            password_secret: row.get(4)?,
            is_active: row.get(5)?,
            created_at: from_storage_string(&created_at).map_err(|e| conversion_error(6, e))?,
            last_login_at: last_login_at
                .map(|value| from_storage_string(&value))
                .transpose()
                .map_err(|e| conversion_error(7, e))?,
        })
    }

    fn fetch(conn: &Connection, id: i64) -> Result<Option<User>, UserError> {
        conn.query_row(
            &format!("SELECT {} FROM users WHERE id = ?", COLUMNS),
            params![id],
            Self::row_to_user,
        )
        .optional()
        .map_err(storage)
    }

    fn insert(conn: &Connection, user: &NewUser) -> Result<i64, UserError> {
        conn.execute(
            "INSERT INTO users (username, display_name, role, password_secret, is_active, created_at) \
             VALUES (?, ?, ?, ?, 1, ?)",
            params![
                user.username.trim(),
                user.display_name.trim(),
                user.role.as_str(),
                hash_secret(&user.password),
                to_storage_string(&now_millis()),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                UserError::DuplicateUsername(user.username.trim().to_string())
            }
            other => storage(other),
        })?;
        Ok(conn.last_insert_rowid())
    }
}

impl UserDirectory for SqliteUserStore {
    fn username_of(&self, id: i64) -> Result<Option<String>, UserError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT username FROM users WHERE id = ?",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .map_err(storage)
    }
}

impl UserStore for SqliteUserStore {
    fn get(&self, id: i64) -> Result<Option<User>, UserError> {
        let conn = self.lock()?;
        Self::fetch(&conn, id)
    }

    fn find_by_username(&self, username: &str) -> Result<Option<User>, UserError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM users WHERE username = ?", COLUMNS),
            params![username],
            Self::row_to_user,
        )
        .optional()
        .map_err(storage)
    }

    fn list(&self, role: Option<Role>) -> Result<Vec<User>, UserError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM users WHERE (?1 IS NULL OR role = ?1) ORDER BY id",
                COLUMNS
            ))
            .map_err(storage)?;
        let rows = stmt
            .query_map(params![role.map(|r| r.as_str())], Self::row_to_user)
            .map_err(storage)?;

        let mut users = Vec::new();
        for row_result in rows {
            users.push(row_result.map_err(storage)?);
        }
        Ok(users)
    }

    fn create(&self, user: NewUser) -> Result<User, UserError> {
        user.validate()?;
        let conn = self.lock()?;
        let id = Self::insert(&conn, &user)?;
        info!(user_id = id, username = %user.username, role = %user.role, "User created");
        Self::fetch(&conn, id)?.ok_or(UserError::NotFound(id))
    }

    fn update(&self, id: i64, patch: UserPatch) -> Result<User, UserError> {
        if let Some(name) = &patch.display_name {
            if name.trim().is_empty() {
                return Err(UserError::Validation("displayName cannot be empty".to_string()));
            }
        }
        if patch.password.as_deref() == Some("") {
            return Err(UserError::Validation("password cannot be empty".to_string()));
        }

        let conn = self.lock()?;
        let mut user = Self::fetch(&conn, id)?.ok_or(UserError::NotFound(id))?;

        if let Some(name) = patch.display_name {
            user.display_name = name.trim().to_string();
        }
        if let Some(role) = patch.role {
            user.role = role;
        }
        if let Some(active) = patch.is_active {
            user.is_active = active;
        }
        if let Some(password) = patch.password {
            user.password_secret = hash_secret(&password);
        }

        conn.execute(
            "UPDATE users SET display_name = ?, role = ?, is_active = ?, password_secret = ? WHERE id = ?",
            params![
                user.display_name,
                user.role.as_str(),
                user.is_active,
                user.password_secret,
                id
            ],
        )
        .map_err(storage)?;

        Ok(user)
    }

    fn deactivate(&self, id: i64) -> Result<User, UserError> {
        let user = self.update(
            id,
            UserPatch {
                is_active: Some(false),
                ..UserPatch::default()
            },
        )?;
        info!(user_id = id, username = %user.username, "User deactivated");
        Ok(user)
    }

    fn record_login(&self, id: i64) -> Result<User, UserError> {
        let conn = self.lock()?;
        let now = now_millis();
        let changed = conn
            .execute(
                "UPDATE users SET last_login_at = ? WHERE id = ?",
                params![to_storage_string(&now), id],
            )
            .map_err(storage)?;
        if changed == 0 {
            return Err(UserError::NotFound(id));
        }
        Self::fetch(&conn, id)?.ok_or(UserError::NotFound(id))
    }

    fn seed_defaults(&self, password: &str) -> Result<usize, UserError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .map_err(storage)?;
        if count > 0 {
            return Ok(0);
        }

        for (username, display_name, role) in DEFAULT_ACCOUNTS {
            Self::insert(
                &conn,
                &NewUser {
                    username: username.to_string(),
                    display_name: display_name.to_string(),
                    role,
                    password: password.to_string(),
                },
            )?;
        }
        info!(count = DEFAULT_ACCOUNTS.len(), "Seeded default users");
        Ok(DEFAULT_ACCOUNTS.len())
    }
}

fn storage(e: rusqlite::Error) -> UserError {
    UserError::Storage(e.to_string())
}

fn conversion_error<E>(column: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}
