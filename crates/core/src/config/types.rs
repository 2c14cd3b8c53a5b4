use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::schedule::ScheduleZone;

/// Directory and file name used under the platform data directory.
const APP_DIR_NAME: &str = "vencedora-despachos";
const DB_FILE_NAME: &str = "vencedora-despachos.db";

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    3000
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Single-file store in the per-user data directory
/// (`%APPDATA%` on Windows, `~/Library/Application Support` on macOS,
/// `$XDG_DATA_HOME` on Linux).
fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR_NAME).join(DB_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(DB_FILE_NAME))
}

/// How scheduled times and calendar-date filters map onto stored instants.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimezoneMode {
    /// Wall-clock time is stored verbatim, as if it were UTC.
    #[default]
    NaiveLocal,
    /// Wall-clock time is local to a fixed offset and stored as real UTC.
    UtcOffset,
}

/// Scheduling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub timezone: TimezoneMode,
    /// Hours east of UTC, only used with `utc_offset` (Venezuela is -4).
    #[serde(default = "default_offset_hours")]
    pub offset_hours: i32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: TimezoneMode::default(),
            offset_hours: default_offset_hours(),
        }
    }
}

fn default_offset_hours() -> i32 {
    -4
}

impl ScheduleConfig {
    /// Resolve the zone used to interpret calendar dates.
    pub fn zone(&self) -> ScheduleZone {
        match self.timezone {
            TimezoneMode::NaiveLocal => ScheduleZone::naive_local(),
            TimezoneMode::UtcOffset => ScheduleZone::utc_offset_hours(self.offset_hours),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Shared password accepted for every active user. Off unless set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_password: Option<String>,
    /// Create unknown users as dispatchers on first login.
    #[serde(default)]
    pub auto_provision: bool,
    /// Password given to the seed accounts when the user table is empty.
    #[serde(default = "default_seed_password")]
    pub seed_password: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            fallback_password: None,
            auto_provision: false,
            seed_password: default_seed_password(),
        }
    }
}

fn default_seed_password() -> String {
    "admin123".to_string()
}

/// Realtime event channel configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_channel_capacity() -> usize {
    256
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub schedule: ScheduleConfig,
    pub auth: SanitizedAuthConfig,
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAuthConfig {
    pub fallback_password_enabled: bool,
    pub auto_provision: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            schedule: config.schedule.clone(),
            auth: SanitizedAuthConfig {
                fallback_password_enabled: config.auth.fallback_password.is_some(),
                auto_provision: config.auth.auto_provision,
            },
            realtime: config.realtime.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
        assert_eq!(config.schedule.timezone, TimezoneMode::NaiveLocal);
        assert_eq!(config.auth.seed_password, "admin123");
        assert!(!config.auth.auto_provision);
    }

    #[test]
    fn test_default_db_path_file_name() {
        let config = Config::default();
        assert!(config.database.path.ends_with(DB_FILE_NAME));
    }

    #[test]
    fn test_deserialize_with_custom_database_path() {
        let toml = r#"
[database]
path = "/data/despachos.sqlite"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.database.path.to_str().unwrap(),
            "/data/despachos.sqlite"
        );
    }

    #[test]
    fn test_sanitized_config_hides_fallback_password() {
        let toml = r#"
[auth]
fallback_password = "letmein"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let sanitized = SanitizedConfig::from(&config);
        assert!(sanitized.auth.fallback_password_enabled);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("letmein"));
        assert!(!json.contains("admin123"));
    }

    #[test]
    fn test_schedule_zone_offset() {
        let schedule = ScheduleConfig {
            timezone: TimezoneMode::UtcOffset,
            offset_hours: -4,
        };
        assert_eq!(schedule.zone().offset().local_minus_utc(), -4 * 3600);

        let naive = ScheduleConfig::default();
        assert_eq!(naive.zone().offset().local_minus_utc(), 0);
    }
}
