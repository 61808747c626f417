use std::time::{Duration, Instant};

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, SubscribeReasonCode};
use serde_json::Value;
use tokio::time::timeout;

use super::{CheckContext, CheckError, Checker, json_lookup, json_to_display};
use crate::conditions::{
    ConditionContext, ConditionExpressionGroup, ConditionVariable, DEFAULT_STRING_OPERATORS,
    evaluate_expression_group,
};
use crate::database::models::Monitor;
use crate::monitoring::types::CheckOutcome;

const DEFAULT_PORT: u16 = 1883;

const MQTT_VARIABLES: &[ConditionVariable] = &[
    ConditionVariable::new("topic", DEFAULT_STRING_OPERATORS),
    ConditionVariable::new("message", DEFAULT_STRING_OPERATORS),
    ConditionVariable::new("json_value", DEFAULT_STRING_OPERATORS),
];

/// Subscribes to a topic and judges the first message received
pub struct MqttChecker;

#[async_trait]
impl Checker for MqttChecker {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn condition_variables(&self) -> &'static [ConditionVariable] {
        MQTT_VARIABLES
    }

    async fn check(&self, monitor: &Monitor, ctx: &CheckContext) -> Result<CheckOutcome, CheckError> {
        let hostname = monitor
            .target
            .hostname
            .as_deref()
            .ok_or_else(|| CheckError::failed("Monitor has no hostname configured"))?;
        let topic = monitor
            .target
            .mqtt_topic
            .as_deref()
            .ok_or_else(|| CheckError::failed("Monitor has no MQTT topic configured"))?;

        let start = Instant::now();
        let (received_topic, payload) = receive_one(monitor, hostname, topic, ctx.timeout).await?;
        let ping = start.elapsed().as_millis() as u64;

        evaluate_message(monitor, &received_topic, &payload).map(|outcome| outcome.with_ping(ping))
    }
}

/// Connect, subscribe and wait for the first publish on the subscription
async fn receive_one(
    monitor: &Monitor,
    hostname: &str,
    topic: &str,
    budget: Duration,
) -> Result<(String, String), CheckError> {
    let host = hostname
        .split_once("://")
        .map_or(hostname, |(_, rest)| rest)
        .trim_end_matches('/');
    let client_id = format!("uptime-engine_{:08x}", rand::random::<u32>());

    let mut options = MqttOptions::new(client_id, host, monitor.target.port.unwrap_or(DEFAULT_PORT));
    options.set_keep_alive(Duration::from_secs(5));
    if let Some(username) = monitor.target.mqtt_username.as_deref().filter(|u| !u.is_empty()) {
        options.set_credentials(username, monitor.target.mqtt_password.clone().unwrap_or_default());
    }

    let (client, mut eventloop) = AsyncClient::new(options, 10);
    client
        .subscribe(topic, QoS::AtMostOnce)
        .await
        .map_err(|_| CheckError::failed("Cannot subscribe topic"))?;

    let received = timeout(budget, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Ok((publish.topic, String::from_utf8_lossy(&publish.payload).into_owned()));
                }
                Ok(Event::Incoming(Packet::SubAck(ack)))
                    if ack.return_codes.iter().any(|code| matches!(code, SubscribeReasonCode::Failure)) =>
                {
                    return Err(CheckError::failed("Cannot subscribe topic"));
                }
                Ok(_) => {}
                Err(e) => return Err(CheckError::Failed(format!("MQTT connection failed: {e}"))),
            }
        }
    })
    .await;

    let _ = client.try_disconnect();
    received.map_err(|_| CheckError::failed("Timeout, Message not received"))?
}

/// Judge a received message. Conditions take precedence over the legacy
/// `keyword` / `json-query` check types.
pub fn evaluate_message(monitor: &Monitor, topic: &str, payload: &str) -> Result<CheckOutcome, CheckError> {
    let summary = format!("Topic: {topic}; Message: {payload}");

    if let Some(conditions) = ConditionExpressionGroup::from_monitor(monitor)? {
        let mut context = ConditionContext::new().with("topic", topic).with("message", payload);
        if let Some(value) = json_value(monitor, payload) {
            context.insert("json_value", value);
        }

        return if evaluate_expression_group(&conditions, &context)? {
            Ok(CheckOutcome::up(summary).with_response(payload))
        } else {
            Err(CheckError::Failed(format!("Conditions not met - {summary}")))
        };
    }

    let check_type = monitor.target.mqtt_check_type.as_deref().filter(|t| !t.is_empty()).unwrap_or("keyword");
    match check_type {
        "keyword" => {
            let expected = monitor.target.mqtt_success_message.as_deref().unwrap_or_default();
            if payload.contains(expected) {
                Ok(CheckOutcome::up(summary).with_response(payload))
            } else {
                Err(CheckError::Failed(format!("Message Mismatch - {summary}")))
            }
        }
        "json-query" => {
            let document: Value = serde_json::from_str(payload)
                .map_err(|e| CheckError::Failed(format!("Message is not valid JSON: {e}")))?;
            let path = monitor.target.json_path.as_deref().unwrap_or_default();
            let value = json_lookup(&document, path).map(json_to_display).unwrap_or_default();
            let expected = monitor.target.expected_value.as_deref().unwrap_or_default();

            if value == expected {
                Ok(CheckOutcome::up("Message received, expected value is found").with_response(payload))
            } else {
                Err(CheckError::Failed(format!(
                    "Message received but value is not equal to expected value, value was: [{value}]"
                )))
            }
        }
        _ => Err(CheckError::failed("Unknown MQTT Check Type")),
    }
}

/// `json_path` applied to the payload, when both are present and the payload is JSON
fn json_value(monitor: &Monitor, payload: &str) -> Option<String> {
    let path = monitor.target.json_path.as_deref()?;
    let document: Value = serde_json::from_str(payload).ok()?;
    json_lookup(&document, path).map(json_to_display)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::MonitorTarget;

    fn mqtt_monitor(target: MonitorTarget, conditions: &str) -> Monitor {
        Monitor::new("sensor feed", "mqtt").with_target(target).with_conditions(conditions)
    }

    #[test]
    fn test_topic_condition() {
        let monitor = mqtt_monitor(
            MonitorTarget { mqtt_topic: Some("sensors/#".into()), ..Default::default() },
            r#"[{"type":"expression","variable":"topic","operator":"equals","value":"sensors/temp"}]"#,
        );

        let outcome = evaluate_message(&monitor, "sensors/temp", "21.5").unwrap();
        assert_eq!(outcome.status, crate::monitoring::types::MonitorStatus::Up);
        assert_eq!(outcome.msg, "Topic: sensors/temp; Message: 21.5");

        let err = evaluate_message(&monitor, "sensors/humidity", "40").unwrap_err();
        assert_eq!(err.to_string(), "Conditions not met - Topic: sensors/humidity; Message: 40");
    }

    #[test]
    fn test_json_value_condition() {
        let monitor = mqtt_monitor(
            MonitorTarget { json_path: Some("state.power".into()), ..Default::default() },
            r#"[{"type":"expression","variable":"json_value","operator":"equals","value":"on"}]"#,
        );
        assert!(evaluate_message(&monitor, "plug/1", r#"{"state":{"power":"on"}}"#).is_ok());
        assert!(evaluate_message(&monitor, "plug/1", r#"{"state":{"power":"off"}}"#).is_err());

        let err = evaluate_message(&monitor, "plug/1", "not json").unwrap_err();
        assert_eq!(err.to_string(), "Variable missing in context: json_value");
    }

    #[test]
    fn test_legacy_keyword_mode() {
        let monitor = mqtt_monitor(
            MonitorTarget {
                mqtt_topic: Some("status".into()),
                mqtt_success_message: Some("online".into()),
                ..Default::default()
            },
            "[]",
        );
        assert!(evaluate_message(&monitor, "status", "node online").is_ok());
        let err = evaluate_message(&monitor, "status", "offline").unwrap_err();
        assert_eq!(err.to_string(), "Message Mismatch - Topic: status; Message: offline");
    }

    #[test]
    fn test_legacy_json_query_mode() {
        let monitor = mqtt_monitor(
            MonitorTarget {
                mqtt_check_type: Some("json-query".into()),
                json_path: Some("battery".into()),
                expected_value: Some("100".into()),
                ..Default::default()
            },
            "[]",
        );
        let outcome = evaluate_message(&monitor, "bat", r#"{"battery":100}"#).unwrap();
        assert_eq!(outcome.msg, "Message received, expected value is found");

        let err = evaluate_message(&monitor, "bat", r#"{"battery":12}"#).unwrap_err();
        assert_eq!(err.to_string(), "Message received but value is not equal to expected value, value was: [12]");

        let mut monitor = monitor;
        monitor.target.mqtt_check_type = Some("xml".into());
        assert_eq!(evaluate_message(&monitor, "bat", "{}").unwrap_err().to_string(), "Unknown MQTT Check Type");
    }
}
