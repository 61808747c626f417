use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use super::{CheckContext, CheckError, Checker};
use crate::database::models::Monitor;
use crate::monitoring::types::CheckOutcome;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const REQUEST_TIMED_OUT: &str = "request timed out";

/// Error body returned by the measurement API
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub params: BTreeMap<String, Value>,
}

impl ApiErrorBody {
    /// `"<type> <message>."` followed by one `key: value` line per parameter
    pub fn format(&self) -> String {
        let mut formatted = format!("{} {}.", self.kind, self.message);
        for (key, value) in &self.params {
            let value = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
            formatted.push_str(&format!("\n{key}: {value}"));
        }
        formatted
    }
}

/// Failure of a single API call
#[derive(Debug, Clone)]
pub enum ApiError {
    RateLimited(ApiErrorBody),
    Api(ApiErrorBody),
    Transport(String),
}

impl ApiError {
    /// Message for a call that failed twice
    pub fn describe(&self, action: &str) -> String {
        match self {
            ApiError::RateLimited(body) => format!("{action}: rate limit exceeded. {}", body.format()),
            ApiError::Api(body) => format!("{action}: {}", body.format()),
            ApiError::Transport(e) => format!("{action}: {e}"),
        }
    }
}

/// Run `call`; if it fails, run it exactly once more and return whatever that yields
pub async fn retry_once<T, F, Fut>(mut call: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    match call().await {
        Ok(value) => Ok(value),
        Err(first) => {
            debug!(error = ?first, "Remote probe API call failed, retrying once");
            call().await
        }
    }
}

fn transport_error(error: reqwest::Error) -> ApiError {
    if error.is_timeout() {
        ApiError::Transport(REQUEST_TIMED_OUT.to_string())
    } else {
        ApiError::Transport(error.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct CreatedMeasurement {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Measurement {
    status: String,
    #[serde(default)]
    results: Vec<ProbeResult>,
}

#[derive(Debug, Deserialize)]
struct ProbeResult {
    result: ProbeOutput,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProbeOutput {
    raw_output: String,
    stats: Option<ProbeStats>,
    timings: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProbeStats {
    avg: Option<f64>,
}

/// Ping measurement from a remote probe network
pub struct RemoteProbeChecker {
    client: reqwest::Client,
    api_base: Url,
    token: Option<String>,
}

impl RemoteProbeChecker {
    pub fn new(api_base: &str, token: Option<String>, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client, api_base: Url::parse(api_base)?, token: token.filter(|t| !t.is_empty()) })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.api_base.join(path).map_err(|e| ApiError::Transport(e.to_string()))
    }

    /// Send one API request bounded by what is left before `deadline`
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        deadline: Instant,
    ) -> Result<T, ApiError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ApiError::Transport(REQUEST_TIMED_OUT.to_string()));
        }
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.timeout(remaining).send().await.map_err(transport_error)?;
        let status = response.status();

        if status.is_success() {
            return response.json::<T>().await.map_err(transport_error);
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        let mut error: ApiErrorBody = serde_json::from_value(body["error"].clone()).unwrap_or_default();
        if error.kind.is_empty() {
            error.kind = "api_error".to_string();
            error.message = status.to_string();
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            Err(ApiError::RateLimited(error))
        } else {
            Err(ApiError::Api(error))
        }
    }

    async fn create_measurement(&self, monitor: &Monitor, target: &str, deadline: Instant) -> Result<String, ApiError> {
        let mut location = json!({ "magic": monitor.target.probe_location.as_deref().unwrap_or("world") });
        if location["magic"].as_str().is_some_and(str::is_empty) {
            location["magic"] = json!("world");
        }
        let mut options = json!({ "protocol": if monitor.target.port.is_some() { "TCP" } else { "ICMP" } });
        if let Some(port) = monitor.target.port {
            options["port"] = json!(port);
        }
        let body = json!({
            "type": "ping",
            "target": target,
            "inProgressUpdates": false,
            "limit": 1,
            "locations": [location],
            "measurementOptions": options,
        });

        let url = self.endpoint("v1/measurements")?;
        let created: CreatedMeasurement = self.send(self.client.post(url).json(&body), deadline).await?;
        Ok(created.id)
    }

    /// Poll until the measurement leaves the in-progress state or `deadline` passes
    async fn await_measurement(&self, id: &str, deadline: Instant) -> Result<Measurement, ApiError> {
        let url = self.endpoint(&format!("v1/measurements/{id}"))?;
        loop {
            let measurement: Measurement = self.send(self.client.get(url.clone()), deadline).await?;
            if measurement.status != "in-progress" {
                return Ok(measurement);
            }
            if Instant::now() + POLL_INTERVAL >= deadline {
                return Err(ApiError::Transport("measurement did not finish in time".to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl Checker for RemoteProbeChecker {
    fn name(&self) -> &'static str {
        "remote-probe"
    }

    async fn check(&self, monitor: &Monitor, ctx: &CheckContext) -> Result<CheckOutcome, CheckError> {
        let target = monitor
            .target
            .hostname
            .as_deref()
            .ok_or_else(|| CheckError::failed("Monitor has no hostname configured"))?;
        let deadline = Instant::now() + ctx.timeout;

        let id = retry_once(|| self.create_measurement(monitor, target, deadline))
            .await
            .map_err(|e| CheckError::Failed(e.describe("Failed to create measurement")))?;

        let measurement = retry_once(|| self.await_measurement(&id, deadline))
            .await
            .map_err(|e| CheckError::Failed(e.describe(&format!("Failed to fetch measurement ({id})"))))?;

        let output = measurement
            .results
            .into_iter()
            .next()
            .map(|r| r.result)
            .ok_or_else(|| CheckError::Failed(format!("Measurement {id} returned no results")))?;

        if output.timings.is_empty() {
            return Err(CheckError::Failed(format!("Failed: {}", output.raw_output)));
        }

        let avg = output.stats.and_then(|s| s.avg).unwrap_or(0.0);
        Ok(CheckOutcome::up(format!("{avg:.2} ms average"))
            .with_ping(avg.round() as u64)
            .with_value(avg)
            .with_response(output.raw_output))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn rate_limited() -> ApiError {
        ApiError::RateLimited(ApiErrorBody {
            kind: "too_many_requests".into(),
            message: "Too many requests. Please retry in 60 seconds".into(),
            params: BTreeMap::new(),
        })
    }

    #[tokio::test]
    async fn test_retry_once_recovers_from_single_failure() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result = retry_once(|| async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 { Err(rate_limited()) } else { Ok(7) }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_once_gives_up_after_second_failure() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<(), ApiError> = retry_once(|| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::Transport("connection reset".into()))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            result.unwrap_err().describe("Failed to create measurement"),
            "Failed to create measurement: connection reset"
        );
    }

    #[tokio::test]
    async fn test_unresponsive_api_is_bounded_by_check_timeout() {
        // accepts connections but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                open.push(stream);
            }
        });

        let checker = RemoteProbeChecker::new(&format!("http://{addr}/"), None, "uptime-engine-test").unwrap();
        let monitor = Monitor::new("probe", "remote-probe").with_target(crate::database::models::MonitorTarget {
            hostname: Some("example.com".into()),
            ..Default::default()
        });
        let ctx = CheckContext {
            database: std::sync::Arc::new(crate::database::MemoryDatabase::new()),
            timeout: Duration::from_millis(500),
        };

        let start = Instant::now();
        let err = checker.check(&monitor, &ctx).await.unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(3), "took {:?}", start.elapsed());
        assert_eq!(err.to_string(), "Failed to create measurement: request timed out");
    }

    #[test]
    fn test_error_formatting_distinguishes_rate_limits() {
        assert_eq!(
            rate_limited().describe("Failed to create measurement"),
            "Failed to create measurement: rate limit exceeded. too_many_requests Too many requests. Please retry in 60 seconds."
        );

        let mut params = BTreeMap::new();
        params.insert("target".to_string(), json!("\"target\" must be a valid domain"));
        let api = ApiError::Api(ApiErrorBody { kind: "validation_error".into(), message: "Parameter validation failed".into(), params });
        assert_eq!(
            api.describe("Failed to fetch measurement (abc)"),
            "Failed to fetch measurement (abc): validation_error Parameter validation failed.\ntarget: \"target\" must be a valid domain"
        );
    }
}
