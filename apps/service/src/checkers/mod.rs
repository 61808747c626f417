//! Protocol-specific checkers and the registry that resolves them by monitor type.

pub mod dns;
pub mod group;
pub mod http;
pub mod mqtt;
pub mod remote_probe;
pub mod sql;
pub mod tcp;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::conditions::{ConditionError, ConditionVariable};
use crate::config::CheckersConfig;
use crate::database::Database;
use crate::database::models::Monitor;
use crate::monitoring::types::CheckOutcome;

pub use dns::DnsChecker;
pub use group::GroupChecker;
pub use http::{HttpChecker, HttpMode};
pub use mqtt::MqttChecker;
pub use remote_probe::RemoteProbeChecker;
pub use sql::SqlChecker;
pub use tcp::TcpChecker;

/// Why a check failed. The display text ends up verbatim in the heartbeat message.
#[derive(Debug, Error)]
pub enum CheckError {
    /// Routine protocol failure (connection refused, unexpected status, keyword missing)
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Condition(#[from] ConditionError),

    #[error("Timeout after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Check panicked: {0}")]
    Panicked(String),

    #[error("Unknown monitor type: {0}")]
    UnknownType(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CheckError {
    pub fn failed(msg: impl Into<String>) -> Self {
        CheckError::Failed(msg.into())
    }
}

/// Collaborators and limits handed to every check
#[derive(Clone)]
pub struct CheckContext {
    pub database: Arc<dyn Database>,
    /// Budget for this check's protocol I/O
    pub timeout: Duration,
}

/// One protocol's way of performing a single check
#[async_trait]
pub trait Checker: Send + Sync {
    /// Monitor type this checker is registered under by default
    fn name(&self) -> &'static str;

    /// Variables this checker places into the condition context
    fn condition_variables(&self) -> &'static [ConditionVariable] {
        &[]
    }

    fn supports_conditions(&self) -> bool {
        !self.condition_variables().is_empty()
    }

    /// Perform one check. Every failure is an `Err`.
    async fn check(&self, monitor: &Monitor, ctx: &CheckContext) -> Result<CheckOutcome, CheckError>;
}

/// Maps a monitor's `type` string to its checker
#[derive(Clone, Default)]
pub struct CheckerRegistry {
    checkers: HashMap<String, Arc<dyn Checker>>,
}

impl CheckerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in monitor type
    pub fn with_defaults(config: &CheckersConfig) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(HttpChecker::new(HttpMode::Status, &config.user_agent)?);
        registry.register(HttpChecker::new(HttpMode::Keyword, &config.user_agent)?);
        registry.register(HttpChecker::new(HttpMode::JsonQuery, &config.user_agent)?);
        registry.register(TcpChecker);
        registry.register(DnsChecker);
        registry.register(MqttChecker);
        registry.register(SqlChecker);
        registry.register(GroupChecker);
        registry.register(RemoteProbeChecker::new(
            &config.remote_probe_api_url,
            config.remote_probe_token.clone(),
            &config.user_agent,
        )?);
        Ok(registry)
    }

    /// Register a checker under its own name, replacing any previous one
    pub fn register(&mut self, checker: impl Checker + 'static) -> &mut Self {
        let name = checker.name().to_string();
        self.insert(name, Arc::new(checker))
    }

    /// Register a checker under an explicit monitor type
    pub fn insert(&mut self, monitor_type: impl Into<String>, checker: Arc<dyn Checker>) -> &mut Self {
        self.checkers.insert(monitor_type.into(), checker);
        self
    }

    pub fn get(&self, monitor_type: &str) -> Option<Arc<dyn Checker>> {
        self.checkers.get(monitor_type).cloned()
    }

    pub fn contains(&self, monitor_type: &str) -> bool {
        self.checkers.contains_key(monitor_type)
    }

    /// Registered monitor types, sorted
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.checkers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

/// Look up `path` in a JSON document.
///
/// Accepts a JSON pointer (`/data/0/status`), a dotted path (`data[0].status`,
/// optionally prefixed with `$.`), or an empty path / `$` for the whole document.
pub fn json_lookup<'a>(document: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let path = path.trim();
    if path.is_empty() || path == "$" {
        return Some(document);
    }
    if path.starts_with('/') {
        return document.pointer(path);
    }

    let dotted = path.strip_prefix("$.").or_else(|| path.strip_prefix('$')).unwrap_or(path);
    let mut pointer = String::new();
    for segment in dotted.split('.').filter(|s| !s.is_empty()) {
        let mut parts = segment.split('[');
        if let Some(key) = parts.next().filter(|k| !k.is_empty()) {
            pointer.push('/');
            pointer.push_str(&key.replace('~', "~0").replace('/', "~1"));
        }
        for index in parts {
            pointer.push('/');
            pointer.push_str(index.trim_end_matches(']'));
        }
    }
    document.pointer(&pointer)
}

/// String form of a JSON value as shown to users: strings unquoted, everything else as JSON
pub fn json_to_display(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_covers_builtin_types() {
        let registry = CheckerRegistry::with_defaults(&CheckersConfig::default()).unwrap();
        assert_eq!(
            registry.types(),
            vec!["dns", "group", "http", "json-query", "keyword", "mqtt", "port", "remote-probe", "sqlite"]
        );
        assert!(registry.get("mqtt").unwrap().supports_conditions());
        assert!(!registry.get("http").unwrap().supports_conditions());
        assert!(registry.get("ftp").is_none());
    }

    #[test]
    fn test_json_lookup_paths() {
        let doc = serde_json::json!({"data": [{"status": "ok", "load": 0.5}], "a/b": 1});
        assert_eq!(json_lookup(&doc, "/data/0/status"), Some(&serde_json::json!("ok")));
        assert_eq!(json_lookup(&doc, "data[0].load"), Some(&serde_json::json!(0.5)));
        assert_eq!(json_lookup(&doc, "$.data[0].status"), Some(&serde_json::json!("ok")));
        assert_eq!(json_lookup(&doc, "a/b"), Some(&serde_json::json!(1)));
        assert_eq!(json_lookup(&doc, "$"), Some(&doc));
        assert_eq!(json_lookup(&doc, "data[3]"), None);
        assert_eq!(json_to_display(&serde_json::json!("ok")), "ok");
        assert_eq!(json_to_display(&serde_json::json!(0.5)), "0.5");
    }

    #[test]
    fn test_error_messages_surface_verbatim() {
        assert_eq!(CheckError::failed("ECONNREFUSED").to_string(), "ECONNREFUSED");
        assert_eq!(CheckError::Timeout(Duration::from_secs(48)).to_string(), "Timeout after 48s");
        assert_eq!(
            CheckError::from(ConditionError::MissingContextVariable("record".into())).to_string(),
            "Variable missing in context: record"
        );
    }
}
