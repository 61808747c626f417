use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::{CheckContext, CheckError, Checker, json_lookup, json_to_display};
use crate::conditions::{ConditionError, Operator, operators::ALL_OPERATORS};
use crate::database::models::Monitor;
use crate::monitoring::types::CheckOutcome;

/// Accepted status codes when a monitor does not configure any
pub const DEFAULT_ACCEPTED_STATUS_CODES: &[&str] = &["200-299"];

const EXCERPT_LEN: usize = 50;

/// What an HTTP check verifies beyond the status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMode {
    /// Status code only (`http`)
    Status,
    /// Body must contain (or, inverted, not contain) a keyword (`keyword`)
    Keyword,
    /// A value in the JSON body is compared to an expected value (`json-query`)
    JsonQuery,
}

/// HTTP/HTTPS checker
pub struct HttpChecker {
    client: reqwest::Client,
    mode: HttpMode,
}

impl HttpChecker {
    pub fn new(mode: HttpMode, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client, mode })
    }
}

#[async_trait]
impl Checker for HttpChecker {
    fn name(&self) -> &'static str {
        match self.mode {
            HttpMode::Status => "http",
            HttpMode::Keyword => "keyword",
            HttpMode::JsonQuery => "json-query",
        }
    }

    async fn check(&self, monitor: &Monitor, ctx: &CheckContext) -> Result<CheckOutcome, CheckError> {
        let url = monitor
            .target
            .url
            .as_deref()
            .ok_or_else(|| CheckError::failed("Monitor has no URL configured"))?;

        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .timeout(ctx.timeout)
            .send()
            .await
            .map_err(|e| request_error(&e, ctx.timeout))?;
        let ping = start.elapsed().as_millis() as u64;

        let status = response.status();
        let msg = format!("{} - {}", status.as_u16(), status.canonical_reason().unwrap_or("Unknown"));
        if !status_accepted(status.as_u16(), &monitor.target.accepted_status_codes) {
            return Err(CheckError::Failed(format!("Request failed with status code {}", status.as_u16())));
        }

        match self.mode {
            HttpMode::Status => Ok(CheckOutcome::up(msg).with_ping(ping)),
            HttpMode::Keyword => {
                let body = response.text().await.map_err(|e| request_error(&e, ctx.timeout))?;
                let keyword = monitor.target.keyword.as_deref().unwrap_or_default();
                let msg = match_keyword(&msg, &body, keyword, monitor.target.invert_keyword)?;
                Ok(CheckOutcome::up(msg).with_ping(ping))
            }
            HttpMode::JsonQuery => {
                let body = response.text().await.map_err(|e| request_error(&e, ctx.timeout))?;
                let document: Value = serde_json::from_str(&body)
                    .map_err(|e| CheckError::Failed(format!("Response is not valid JSON: {e}")))?;
                let (msg, response) = evaluate_json_query(
                    &document,
                    monitor.target.json_path.as_deref().unwrap_or_default(),
                    monitor.target.json_path_operator.as_deref(),
                    monitor.target.expected_value.as_deref().unwrap_or_default(),
                )?;
                Ok(CheckOutcome::up(msg).with_ping(ping).with_response(response))
            }
        }
    }
}

fn request_error(error: &reqwest::Error, timeout: Duration) -> CheckError {
    if error.is_timeout() {
        CheckError::Timeout(timeout)
    } else if error.is_connect() {
        CheckError::Failed(format!("Connection failed: {error}"))
    } else {
        CheckError::Failed(error.to_string())
    }
}

/// Whether `code` matches any accepted entry. Entries are single codes
/// (`"404"`) or inclusive ranges (`"200-299"`).
pub fn status_accepted(code: u16, accepted: &[String]) -> bool {
    if accepted.is_empty() {
        return DEFAULT_ACCEPTED_STATUS_CODES.iter().any(|entry| status_matches(code, entry));
    }
    accepted.iter().any(|entry| status_matches(code, entry))
}

fn status_matches(code: u16, entry: &str) -> bool {
    match parse_status_entry(entry) {
        Some((low, high)) => (low..=high).contains(&code),
        None => false,
    }
}

/// Parse an accepted status code entry into an inclusive range
pub fn parse_status_entry(entry: &str) -> Option<(u16, u16)> {
    let entry = entry.trim();
    match entry.split_once('-') {
        Some((low, high)) => {
            let (low, high) = (low.trim().parse().ok()?, high.trim().parse().ok()?);
            (low <= high).then_some((low, high))
        }
        None => entry.parse().ok().map(|code| (code, code)),
    }
}

/// Keyword match on a response body. Returns the heartbeat message on success.
pub fn match_keyword(msg: &str, body: &str, keyword: &str, invert: bool) -> Result<String, CheckError> {
    let found = body.contains(keyword);
    if found != invert {
        return Ok(format!("{msg}, keyword {} found", if found { "is" } else { "not" }));
    }

    Err(CheckError::Failed(format!(
        "{msg}, but keyword is {} in [{}]",
        if found { "present" } else { "not" },
        excerpt(body)
    )))
}

/// Body text with markup and whitespace collapsed, shortened for messages
fn excerpt(body: &str) -> String {
    let mut text = String::with_capacity(body.len());
    let mut in_tag = false;
    for c in body.chars() {
        match c {
            '<' => {
                in_tag = true;
                text.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if in_tag => {}
            c => text.push(c),
        }
    }

    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.chars().count() > EXCERPT_LEN {
        let short: String = text.chars().take(EXCERPT_LEN - 3).collect();
        format!("{short}...")
    } else {
        text
    }
}

/// Resolve a json-query operator, accepting the symbolic spellings too
fn json_query_operator(raw: Option<&str>) -> Result<Operator, ConditionError> {
    let raw = raw.map(str::trim).filter(|r| !r.is_empty()).unwrap_or("equals");
    let id = match raw {
        "==" => "equals",
        "!=" => "not_equals",
        "<" => "lt",
        "<=" => "lte",
        ">" => "gt",
        ">=" => "gte",
        other => other,
    };
    Operator::from_id(id).ok_or_else(|| ConditionError::UnknownOperator {
        operator: raw.to_string(),
        expected: ALL_OPERATORS.iter().map(|op| op.id()).collect::<Vec<_>>().join(","),
    })
}

/// Compare the value at `path` with `expected`.
///
/// Returns the heartbeat message and the stringified value on success.
pub fn evaluate_json_query(
    document: &Value,
    path: &str,
    operator: Option<&str>,
    expected: &str,
) -> Result<(String, String), CheckError> {
    let operator = json_query_operator(operator)?;
    let found = json_lookup(document, path)
        .ok_or_else(|| CheckError::Failed(format!("JSON query '{path}' matched nothing")))?;
    let response = json_to_display(found);

    let actual = if operator.is_numeric() {
        response.trim().parse::<f64>().ok().and_then(serde_json::Number::from_f64).map(Value::Number)
            .unwrap_or(Value::Null)
    } else {
        Value::String(response.clone())
    };

    if operator.test(&actual, &Value::String(expected.to_string())) {
        Ok((format!("JSON query passes (comparing {response} {operator} {expected})"), response))
    } else {
        Err(CheckError::Failed(format!(
            "JSON query does not pass (comparing {response} {operator} {expected})"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_code_ranges() {
        assert!(status_accepted(200, &[]));
        assert!(status_accepted(299, &[]));
        assert!(!status_accepted(301, &[]));
        let accepted = vec!["200-299".to_string(), "404".to_string()];
        assert!(status_accepted(404, &accepted));
        assert!(!status_accepted(500, &accepted));
        assert_eq!(parse_status_entry("300-200"), None);
        assert_eq!(parse_status_entry(" 301 "), Some((301, 301)));
        assert_eq!(parse_status_entry("abc"), None);
    }

    #[test]
    fn test_keyword_found_and_missing() {
        assert_eq!(match_keyword("200 - OK", "hello world", "world", false).unwrap(), "200 - OK, keyword is found");
        assert_eq!(match_keyword("200 - OK", "hello", "world", true).unwrap(), "200 - OK, keyword not found");

        let err = match_keyword("200 - OK", "<h1>Maintenance</h1>\n<p>back soon</p>", "Welcome", false).unwrap_err();
        assert_eq!(err.to_string(), "200 - OK, but keyword is not in [Maintenance back soon]");

        let err = match_keyword("200 - OK", "error page", "error", true).unwrap_err();
        assert_eq!(err.to_string(), "200 - OK, but keyword is present in [error page]");
    }

    #[test]
    fn test_keyword_excerpt_is_shortened() {
        let body = "x".repeat(80);
        let err = match_keyword("200 - OK", &body, "y", false).unwrap_err().to_string();
        assert!(err.ends_with(&format!("[{}...]", "x".repeat(47))));
    }

    #[test]
    fn test_json_query_string_and_numeric() {
        let doc = json!({"status": "ok", "queue": {"depth": 12}});

        let (msg, response) = evaluate_json_query(&doc, "status", None, "ok").unwrap();
        assert_eq!(response, "ok");
        assert_eq!(msg, "JSON query passes (comparing ok equals ok)");

        assert!(evaluate_json_query(&doc, "/queue/depth", Some("<"), "20").is_ok());
        let err = evaluate_json_query(&doc, "queue.depth", Some("gt"), "20").unwrap_err();
        assert_eq!(err.to_string(), "JSON query does not pass (comparing 12 gt 20)");

        assert!(matches!(
            evaluate_json_query(&doc, "status", Some("~="), "ok"),
            Err(CheckError::Condition(ConditionError::UnknownOperator { .. }))
        ));
        assert!(evaluate_json_query(&doc, "missing", None, "ok").is_err());
    }
}
