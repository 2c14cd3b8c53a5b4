use super::{types::Config, ConfigError, TimezoneMode};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Realtime channel capacity is not 0
/// - Fixed UTC offset is a real-world offset
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.realtime.channel_capacity == 0 {
        return Err(ConfigError::ValidationError(
            "realtime.channel_capacity cannot be 0".to_string(),
        ));
    }

    if config.schedule.timezone == TimezoneMode::UtcOffset
        && !(-12..=14).contains(&config.schedule.offset_hours)
    {
        return Err(ConfigError::ValidationError(format!(
            "schedule.offset_hours must be between -12 and 14, got {}",
            config.schedule.offset_hours
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ScheduleConfig, ServerConfig};

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let config = Config {
            server: ServerConfig {
                host: "0.0.0.0".parse().unwrap(),
                port: 0,
            },
            ..Config::default()
        };
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_offset_out_of_range() {
        let config = Config {
            schedule: ScheduleConfig {
                timezone: TimezoneMode::UtcOffset,
                offset_hours: 20,
            },
            ..Config::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_offset_ignored_for_naive_local() {
        let config = Config {
            schedule: ScheduleConfig {
                timezone: TimezoneMode::NaiveLocal,
                offset_hours: 20,
            },
            ..Config::default()
        };
        assert!(validate_config(&config).is_ok());
    }
}
