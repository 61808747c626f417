use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Instant;

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfig, ResolverConfig};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::{Resolver, TokioResolver};
use serde_json::Value;

use super::{CheckContext, CheckError, Checker};
use crate::conditions::{
    ConditionContext, ConditionExpressionGroup, ConditionVariable, DEFAULT_ARRAY_OPERATORS,
    DEFAULT_STRING_OPERATORS, evaluate_optional,
};
use crate::database::models::Monitor;
use crate::monitoring::types::CheckOutcome;

pub const SUPPORTED_RECORD_TYPES: &[&str] =
    &["A", "AAAA", "CAA", "CNAME", "MX", "NS", "PTR", "SOA", "SRV", "TXT"];

const DNS_VARIABLES: &[ConditionVariable] = &[
    // first answer
    ConditionVariable::new("record", DEFAULT_STRING_OPERATORS),
    // every answer
    ConditionVariable::new("records", DEFAULT_ARRAY_OPERATORS),
];

/// DNS record checker
pub struct DnsChecker;

#[async_trait]
impl Checker for DnsChecker {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn condition_variables(&self) -> &'static [ConditionVariable] {
        DNS_VARIABLES
    }

    async fn check(&self, monitor: &Monitor, ctx: &CheckContext) -> Result<CheckOutcome, CheckError> {
        let hostname = monitor
            .target
            .hostname
            .as_deref()
            .ok_or_else(|| CheckError::failed("Monitor has no hostname configured"))?;
        let record_type = parse_record_type(monitor.target.dns_resolve_type.as_deref().unwrap_or("A"))?;
        let resolver = build_resolver(monitor, ctx)?;

        let start = Instant::now();
        let records = match resolver.lookup(hostname, record_type).await {
            Ok(lookup) => lookup
                .record_iter()
                .filter(|record| record.record_type() == record_type)
                .map(|record| record.data().to_string())
                .collect(),
            Err(e) if e.is_no_records_found() => Vec::new(),
            Err(e) => return Err(CheckError::Failed(format!("DNS lookup failed: {e}"))),
        };
        let ping = start.elapsed().as_millis() as u64;

        evaluate_records(monitor, records).map(|outcome| outcome.with_ping(ping))
    }
}

fn parse_record_type(raw: &str) -> Result<RecordType, CheckError> {
    let raw = raw.trim().to_ascii_uppercase();
    if !SUPPORTED_RECORD_TYPES.contains(&raw.as_str()) {
        return Err(CheckError::Failed(format!("Unsupported DNS record type: {raw}")));
    }
    RecordType::from_str(&raw).map_err(|e| CheckError::Failed(format!("Invalid DNS record type {raw}: {e}")))
}

/// Resolver against the monitor's server, or the system configuration when none is set
fn build_resolver(monitor: &Monitor, ctx: &CheckContext) -> Result<TokioResolver, CheckError> {
    let mut builder = match monitor.target.dns_resolve_server.as_deref().map(str::trim) {
        Some(server) if !server.is_empty() => {
            let addr = parse_server(server, monitor.target.port.unwrap_or(53))?;
            let config = ResolverConfig::from_parts(None, vec![], vec![NameServerConfig::new(addr, Protocol::Udp)]);
            Resolver::builder_with_config(config, TokioConnectionProvider::default())
        }
        _ => Resolver::builder_tokio()
            .map_err(|e| CheckError::Failed(format!("Failed to read system DNS configuration: {e}")))?,
    };

    let options = builder.options_mut();
    options.timeout = ctx.timeout;
    options.attempts = 1;
    options.cache_size = 0;
    Ok(builder.build())
}

fn parse_server(server: &str, default_port: u16) -> Result<SocketAddr, CheckError> {
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok(addr);
    }
    server
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, default_port))
        .map_err(|_| CheckError::Failed(format!("Invalid DNS resolver address: {server}")))
}

/// Turn resolved records into an outcome, applying the monitor's conditions
pub fn evaluate_records(monitor: &Monitor, records: Vec<String>) -> Result<CheckOutcome, CheckError> {
    if records.is_empty() {
        return Err(CheckError::failed("No records found"));
    }

    let msg = records.join(" | ");
    let conditions = ConditionExpressionGroup::from_monitor(monitor)?;
    let context = ConditionContext::new()
        .with("record", records[0].clone())
        .with("records", Value::Array(records.into_iter().map(Value::String).collect()));

    if evaluate_optional(conditions.as_ref(), &context)? {
        Ok(CheckOutcome::up(msg))
    } else {
        Err(CheckError::Failed(format!("DNS records did not meet the specified conditions ({msg})")))
    }
}
