//! Environment variable parsing helpers.

use std::str::FromStr;
use std::time::Duration;

use super::ConfigError;

/// Variable value, or `default` when unset.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Variable value; `None` when unset or empty.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

/// `1`, `true`, `yes` and `on` are true; `0`, `false`, `no` and `off` are
/// false; anything else is an error.
pub fn env_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    let Some(value) = env_opt(key) else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Parse {
            key: key.into(),
            value,
            error: "expected a boolean (1/0, true/false)".into(),
        }),
    }
}

/// Parse a variable with `FromStr`, or return `default` when unset.
pub fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(v) => v.trim().parse().map_err(|e: T::Err| ConfigError::Parse {
            key: key.into(),
            value: v,
            error: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Parse a duration such as `250ms`, `30s`, `2m`, `1h` or `1d`.
///
/// A bare number is seconds. `off` and `0` are zero.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim().to_ascii_lowercase();
    if s.is_empty() || s == "off" || s == "0" {
        return Ok(Duration::ZERO);
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (num_str, unit) = s.split_at(split);
    let num: u64 = num_str
        .parse()
        .map_err(|_| format!("invalid duration: {}", s))?;

    let duration = match unit {
        "" | "s" => Duration::from_secs(num),
        "ms" => Duration::from_millis(num),
        "m" => Duration::from_secs(num * 60),
        "h" => Duration::from_secs(num * 3600),
        "d" => Duration::from_secs(num * 86400),
        _ => return Err(format!("invalid duration unit: {}", unit)),
    };
    Ok(duration)
}

/// Parse a duration variable, or `default` when unset.
pub fn env_duration(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    match env_opt(key) {
        Some(value) => parse_duration(&value).map_err(|error| ConfigError::Parse {
            key: key.into(),
            value,
            error,
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("off").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("").unwrap(), Duration::ZERO);

        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1H").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("120").unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn test_parse_duration_errors() {
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("s").is_err());
    }

    #[test]
    fn test_env_helpers() {
        std::env::set_var("TOKIO_DISPATCH_TEST_BOOL", "yes");
        std::env::set_var("TOKIO_DISPATCH_TEST_NUM", "42");
        std::env::set_var("TOKIO_DISPATCH_TEST_BAD", "forty");

        assert!(env_bool("TOKIO_DISPATCH_TEST_BOOL", false).unwrap());
        assert!(env_bool("TOKIO_DISPATCH_TEST_BAD", false).is_err());
        assert!(env_bool("TOKIO_DISPATCH_TEST_UNSET", true).unwrap());
        assert_eq!(env_parse("TOKIO_DISPATCH_TEST_NUM", 0usize).unwrap(), 42);
        assert!(env_parse("TOKIO_DISPATCH_TEST_BAD", 0usize).is_err());
        assert_eq!(env_parse("TOKIO_DISPATCH_TEST_UNSET", 7usize).unwrap(), 7);

        std::env::remove_var("TOKIO_DISPATCH_TEST_BOOL");
        std::env::remove_var("TOKIO_DISPATCH_TEST_NUM");
        std::env::remove_var("TOKIO_DISPATCH_TEST_BAD");
    }
}
