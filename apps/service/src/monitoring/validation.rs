//! Validation of monitor configuration before it is scheduled.

use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use url::Url;

use crate::checkers::CheckerRegistry;
use crate::checkers::dns::SUPPORTED_RECORD_TYPES;
use crate::checkers::http::parse_status_entry;
use crate::conditions::{ConditionError, ConditionExpressionGroup, Operator, operators::ALL_OPERATORS};
use crate::database::models::Monitor;

/// Shortest allowed check interval
pub const MIN_INTERVAL: Duration = Duration::from_secs(20);
/// Longest allowed check interval (24 days)
pub const MAX_INTERVAL: Duration = Duration::from_secs(2_073_600);

/// Limits a monitor's timing fields must respect
#[derive(Debug, Clone, Copy)]
pub struct IntervalBounds {
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub max_timeout: Duration,
}

impl Default for IntervalBounds {
    fn default() -> Self {
        Self { min_interval: MIN_INTERVAL, max_interval: MAX_INTERVAL, max_timeout: Duration::from_secs(300) }
    }
}

/// Validate a monitor against the registry and timing bounds
pub fn validate_monitor(monitor: &Monitor, registry: &CheckerRegistry, bounds: &IntervalBounds) -> Result<()> {
    let checker = registry
        .get(&monitor.monitor_type)
        .ok_or_else(|| anyhow!("Unsupported monitor type: {}", monitor.monitor_type))?;

    validate_interval("Interval", monitor.interval(), bounds)?;
    if monitor.retry_interval_seconds != 0 {
        validate_interval("Retry interval", monitor.retry_interval(), bounds)?;
    }
    if let Some(timeout) = monitor.timeout_seconds {
        if timeout == 0 {
            bail!("Timeout must be greater than 0 seconds");
        }
        if Duration::from_secs(timeout) > bounds.max_timeout {
            bail!("Timeout must be at most {} seconds", bounds.max_timeout.as_secs());
        }
    }
    if monitor.parent == Some(monitor.id) {
        bail!("Monitor cannot be its own parent");
    }

    validate_target(monitor)?;

    if checker.supports_conditions() {
        validate_conditions(monitor, checker.condition_variables())?;
    }
    Ok(())
}

fn validate_interval(label: &str, interval: Duration, bounds: &IntervalBounds) -> Result<()> {
    if interval < bounds.min_interval {
        bail!("{label} must be at least {} seconds", bounds.min_interval.as_secs());
    }
    if interval > bounds.max_interval {
        bail!("{label} must be at most {} seconds", bounds.max_interval.as_secs());
    }
    Ok(())
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow!("{field} is required"))
}

/// Protocol specific target fields for the built-in monitor types
fn validate_target(monitor: &Monitor) -> Result<()> {
    let target = &monitor.target;

    match monitor.monitor_type.as_str() {
        "http" | "keyword" | "json-query" => {
            validate_http_url(required(target.url.as_deref(), "URL")?)?;
            for entry in &target.accepted_status_codes {
                if parse_status_entry(entry).is_none() {
                    bail!("Invalid accepted status code '{entry}'");
                }
            }
            if monitor.monitor_type == "keyword" {
                required(target.keyword.as_deref(), "Keyword")?;
            }
            if monitor.monitor_type == "json-query" {
                required(target.expected_value.as_deref(), "Expected value")?;
            }
        }
        "port" => {
            required(target.hostname.as_deref(), "Hostname")?;
            match target.port {
                Some(port) if port > 0 => {}
                _ => bail!("Port is required"),
            }
        }
        "dns" => {
            required(target.hostname.as_deref(), "Hostname")?;
            if let Some(record_type) = target.dns_resolve_type.as_deref() {
                if !SUPPORTED_RECORD_TYPES.contains(&record_type.trim().to_ascii_uppercase().as_str()) {
                    bail!("Unsupported DNS record type: {record_type}");
                }
            }
        }
        "mqtt" => {
            required(target.hostname.as_deref(), "Hostname")?;
            required(target.mqtt_topic.as_deref(), "MQTT topic")?;
        }
        "sqlite" => {
            required(target.database_connection_string.as_deref(), "Connection string")?;
        }
        "remote-probe" => {
            required(target.hostname.as_deref(), "Hostname")?;
        }
        _ => {}
    }
    Ok(())
}

fn validate_http_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw).map_err(|e| {
        if raw.contains("://") {
            anyhow!("Invalid URL: {e}")
        } else {
            anyhow!("URL must include scheme (http:// or https://)")
        }
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => bail!("Invalid scheme '{other}'. Must be http or https"),
    }
    if url.host_str().is_none() {
        bail!("URL must have a valid host");
    }
    Ok(())
}

/// Strict check of the stored condition tree against what the checker exposes
fn validate_conditions(monitor: &Monitor, variables: &[crate::conditions::ConditionVariable]) -> Result<()> {
    let Some(group) = ConditionExpressionGroup::parse_strict(&monitor.conditions)? else {
        return Ok(());
    };

    for expression in group.expressions() {
        let operator = Operator::from_id(&expression.operator).ok_or_else(|| ConditionError::UnknownOperator {
            operator: expression.operator.clone(),
            expected: ALL_OPERATORS.iter().map(|op| op.id()).collect::<Vec<_>>().join(","),
        })?;

        let variable = variables
            .iter()
            .find(|v| v.id == expression.variable)
            .ok_or_else(|| anyhow!("Unknown condition variable '{}' for {} monitors", expression.variable, monitor.monitor_type))?;

        if !variable.operators.contains(&operator) {
            bail!("Operator '{}' is not allowed for variable '{}'", operator, variable.id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckersConfig;
    use crate::database::models::MonitorTarget;

    fn registry() -> CheckerRegistry {
        CheckerRegistry::with_defaults(&CheckersConfig::default()).unwrap()
    }

    fn http_monitor(url: &str) -> Monitor {
        Monitor::new("api", "http").with_target(MonitorTarget { url: Some(url.into()), ..Default::default() })
    }

    fn check(monitor: &Monitor) -> Result<()> {
        validate_monitor(monitor, &registry(), &IntervalBounds::default())
    }

    #[test]
    fn test_valid_http_monitor() {
        assert!(check(&http_monitor("https://example.com/health")).is_ok());
    }

    #[test]
    fn test_rejects_unknown_type_and_bad_urls() {
        assert!(check(&Monitor::new("x", "gopher")).is_err());
        assert!(check(&http_monitor("example.com")).unwrap_err().to_string().contains("scheme"));
        assert!(check(&http_monitor("ftp://example.com")).is_err());
    }

    #[test]
    fn test_interval_bounds() {
        assert!(check(&http_monitor("https://example.com").with_interval(10, 60)).is_err());
        assert!(check(&http_monitor("https://example.com").with_interval(60, 5)).is_err());
        assert!(check(&http_monitor("https://example.com").with_interval(3_000_000, 60)).is_err());
        assert!(check(&http_monitor("https://example.com").with_interval(20, 0)).is_ok());

        let mut monitor = http_monitor("https://example.com");
        monitor.timeout_seconds = Some(0);
        assert!(check(&monitor).is_err());
    }

    #[test]
    fn test_required_target_fields() {
        assert!(check(&Monitor::new("db", "port")).is_err());
        let port = Monitor::new("db", "port").with_target(MonitorTarget {
            hostname: Some("db.internal".into()),
            port: Some(5432),
            ..Default::default()
        });
        assert!(check(&port).is_ok());
        assert!(check(&Monitor::new("feed", "mqtt")).is_err());
        assert!(check(&Monitor::new("edge", "group")).is_ok());
    }

    fn dns_monitor(conditions: &str) -> Monitor {
        Monitor::new("resolver", "dns")
            .with_target(MonitorTarget { hostname: Some("example.com".into()), ..Default::default() })
            .with_conditions(conditions)
    }

    #[test]
    fn test_conditions_checked_against_declared_variables() {
        assert!(check(&dns_monitor(
            r#"[{"type":"expression","variable":"records","operator":"contains","value":"1.1.1.1"}]"#
        ))
        .is_ok());

        let err = check(&dns_monitor(
            r#"[{"type":"expression","variable":"ttl","operator":"equals","value":"60"}]"#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("Unknown condition variable 'ttl'"));

        let err = check(&dns_monitor(
            r#"[{"type":"expression","variable":"records","operator":"starts_with","value":"1"}]"#,
        ))
        .unwrap_err();
        assert_eq!(err.to_string(), "Operator 'starts_with' is not allowed for variable 'records'");

        let err = check(&dns_monitor(
            r#"[{"type":"expression","variable":"record","operator":"like","value":"1"}]"#,
        ))
        .unwrap_err();
        assert!(err.to_string().starts_with("Unexpected expression operator ID 'like'"));

        assert!(check(&dns_monitor(r#"[{"type":"group","children":[]}]"#)).is_err());
    }

    #[test]
    fn test_conditions_ignored_for_types_without_support() {
        let monitor = http_monitor("https://example.com").with_conditions("[{\"type\":\"banana\"}]");
        assert!(check(&monitor).is_ok());
    }
}
