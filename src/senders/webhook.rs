//! Webhook sender implementations
//!
//! Two concrete channel types ship with the engine: a chat webhook (Slack
//! compatible incoming-webhook payload) and a generic webhook that posts
//! the serialized alert event to an arbitrary URL. Both perform exactly one
//! bounded outbound call per attempt and translate every fault into a
//! descriptive [`SendResult`] error.

use crate::events::{AlertEvent, AlertKind, Severity};
use crate::senders::{ChannelSender, SendResult};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Channel type tag of [`ChatWebhookSender`]
pub const CHAT_WEBHOOK_TYPE: &str = "chat_webhook";

/// Channel type tag of [`GenericWebhookSender`]
pub const GENERIC_WEBHOOK_TYPE: &str = "generic_webhook";

/// Fixed bound on every outbound delivery call
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Deep link back to the monitored service, when a dashboard URL is configured
fn deep_link(dashboard_url: Option<&str>, service_id: i64) -> Option<String> {
    dashboard_url.map(|base| format!("{}/services/{}", base.trim_end_matches('/'), service_id))
}

/// Map a transport-level fault to a clear error string
fn transport_failure(provider: &str, error: &reqwest::Error) -> SendResult {
    if error.is_timeout() {
        SendResult::failure(format!(
            "{} request timed out after {}s",
            provider,
            SEND_TIMEOUT.as_secs()
        ))
    } else {
        SendResult::failure(format!("{} request failed: {}", provider, error))
    }
}

/// Translate an HTTP response into a send outcome
///
/// Provider rate limiting (429) is distinguished from other failures and
/// carries the `Retry-After` hint when one was provided.
fn evaluate_response(provider: &str, response: &reqwest::Response) -> SendResult {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let hint = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok());
        return match hint {
            Some(hint) => SendResult::failure(format!(
                "{} rate limited the request (retry after {})",
                provider, hint
            )),
            None => SendResult::failure(format!("{} rate limited the request", provider)),
        };
    }

    if status.is_success() {
        SendResult::success()
    } else {
        SendResult::failure(format!("{} returned status {}", provider, status))
    }
}

/// Configuration blob for the chat webhook channel type
#[derive(Debug, Clone, Deserialize)]
struct ChatWebhookConfig {
    webhook_url: String,
    #[serde(default)]
    dashboard_url: Option<String>,
}

/// Sender for chat webhooks (Slack-compatible incoming webhooks)
pub struct ChatWebhookSender {
    client: Client,
}

impl Default for ChatWebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatWebhookSender {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    /// Headline for the chat message, distinguishing the two event kinds
    fn headline(event: &AlertEvent) -> String {
        let subject = match &event.dependency_name {
            Some(dependency) => format!("{} (dependency of {})", dependency, event.service_name),
            None => event.service_name.clone(),
        };

        match event.kind {
            AlertKind::StatusChange => {
                if event.is_recovery() {
                    format!("{} recovered", subject)
                } else {
                    format!("{} is unhealthy", subject)
                }
            }
            AlertKind::PollError => format!("Health polling failed for {}", event.service_name),
        }
    }

    /// Build the Slack-compatible payload for one alert event
    fn build_payload(event: &AlertEvent, link: Option<&str>) -> serde_json::Value {
        let color = match event.severity {
            Severity::Warning => "warning",
            Severity::Critical => "danger",
        };

        let text = match event.kind {
            AlertKind::StatusChange => {
                if event.is_recovery() {
                    "Health check reported a transition back to healthy.".to_string()
                } else {
                    "Health check reported a transition from healthy to unhealthy.".to_string()
                }
            }
            AlertKind::PollError => event
                .error
                .clone()
                .unwrap_or_else(|| "Unknown polling error".to_string()),
        };

        let mut fields = vec![serde_json::json!({
            "title": "Service",
            "value": event.service_name,
            "short": true
        })];
        if let Some(dependency) = &event.dependency_name {
            fields.push(serde_json::json!({
                "title": "Dependency",
                "value": dependency,
                "short": true
            }));
        }
        fields.push(serde_json::json!({
            "title": "Severity",
            "value": format!("{:?}", event.severity).to_lowercase(),
            "short": true
        }));
        fields.push(serde_json::json!({
            "title": "Time",
            "value": event.timestamp.to_rfc3339(),
            "short": true
        }));

        let headline = Self::headline(event);
        let mut attachment = serde_json::json!({
            "color": color,
            "title": headline,
            "text": text,
            "fields": fields
        });
        if let Some(link) = link {
            attachment["title_link"] = serde_json::Value::String(link.to_string());
        }

        serde_json::json!({
            "text": headline,
            "attachments": [attachment]
        })
    }
}

impl ChannelSender for ChatWebhookSender {
    fn channel_type(&self) -> &str {
        CHAT_WEBHOOK_TYPE
    }

    fn send<'a>(
        &'a self,
        event: &'a AlertEvent,
        config: &'a str,
    ) -> Pin<Box<dyn Future<Output = SendResult> + Send + 'a>> {
        Box::pin(async move {
            let config: ChatWebhookConfig = match serde_json::from_str(config) {
                Ok(config) => config,
                Err(e) => {
                    return SendResult::config_failure(format!(
                        "invalid chat webhook configuration: {}",
                        e
                    ));
                }
            };
            if config.webhook_url.is_empty() {
                return SendResult::config_failure(
                    "chat webhook configuration is missing webhook_url".to_string(),
                );
            }

            let link = deep_link(config.dashboard_url.as_deref(), event.service_id);
            let payload = Self::build_payload(event, link.as_deref());

            let response = self
                .client
                .post(&config.webhook_url)
                .json(&payload)
                .send()
                .await;

            match response {
                Ok(response) => evaluate_response("chat webhook", &response),
                Err(e) => transport_failure("chat webhook", &e),
            }
        })
    }
}

/// Configuration blob for the generic webhook channel type
#[derive(Debug, Clone, Deserialize)]
struct GenericWebhookConfig {
    url: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: Option<HashMap<String, String>>,
    #[serde(default)]
    dashboard_url: Option<String>,
}

/// Sender that posts the serialized alert event to an arbitrary URL
pub struct GenericWebhookSender {
    client: Client,
}

impl Default for GenericWebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

impl GenericWebhookSender {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    /// Parse the configured HTTP method; only body-carrying methods are allowed
    fn parse_method(method: Option<&str>) -> Result<Method, String> {
        match method.unwrap_or("POST").to_ascii_uppercase().as_str() {
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "PATCH" => Ok(Method::PATCH),
            other => Err(format!(
                "unsupported method '{}' in generic webhook configuration",
                other
            )),
        }
    }

    /// Validate configured extra headers up front
    fn parse_headers(headers: &HashMap<String, String>) -> Result<HeaderMap, String> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::try_from(name.as_str()).map_err(|_| {
                format!(
                    "invalid header name '{}' in generic webhook configuration",
                    name
                )
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                format!(
                    "invalid value for header '{}' in generic webhook configuration",
                    name
                )
            })?;
            map.insert(name, value);
        }
        Ok(map)
    }

    /// Body sent to the webhook: the serialized event plus an optional deep link
    fn build_payload(event: &AlertEvent, link: Option<&str>) -> Result<serde_json::Value, String> {
        let mut payload = serde_json::to_value(event)
            .map_err(|e| format!("failed to serialize alert event: {}", e))?;
        if let (Some(link), Some(object)) = (link, payload.as_object_mut()) {
            object.insert(
                "link".to_string(),
                serde_json::Value::String(link.to_string()),
            );
        }
        Ok(payload)
    }
}

impl ChannelSender for GenericWebhookSender {
    fn channel_type(&self) -> &str {
        GENERIC_WEBHOOK_TYPE
    }

    fn send<'a>(
        &'a self,
        event: &'a AlertEvent,
        config: &'a str,
    ) -> Pin<Box<dyn Future<Output = SendResult> + Send + 'a>> {
        Box::pin(async move {
            let config: GenericWebhookConfig = match serde_json::from_str(config) {
                Ok(config) => config,
                Err(e) => {
                    return SendResult::config_failure(format!(
                        "invalid generic webhook configuration: {}",
                        e
                    ));
                }
            };
            if config.url.is_empty() {
                return SendResult::config_failure(
                    "generic webhook configuration is missing url".to_string(),
                );
            }

            let method = match Self::parse_method(config.method.as_deref()) {
                Ok(method) => method,
                Err(e) => return SendResult::config_failure(e),
            };
            let headers = match &config.headers {
                Some(headers) => match Self::parse_headers(headers) {
                    Ok(headers) => headers,
                    Err(e) => return SendResult::config_failure(e),
                },
                None => HeaderMap::new(),
            };

            let link = deep_link(config.dashboard_url.as_deref(), event.service_id);
            let payload = match Self::build_payload(event, link.as_deref()) {
                Ok(payload) => payload,
                Err(e) => return SendResult::config_failure(e),
            };

            let response = self
                .client
                .request(method, &config.url)
                .headers(headers)
                .json(&payload)
                .send()
                .await;

            match response {
                Ok(response) => evaluate_response("generic webhook", &response),
                Err(e) => transport_failure("generic webhook", &e),
            }
        })
    }
}

/// Mock sender for testing and development
///
/// Returns scripted results in order, cycling after the last one, and
/// records every call so tests can assert on invocation counts and the
/// event/config pair a channel received.
pub struct MockSender {
    channel_type: String,
    responses: Vec<SendResult>,
    current_index: std::sync::Mutex<usize>,
    calls: std::sync::Mutex<Vec<(AlertEvent, String)>>,
}

impl MockSender {
    /// Create a mock sender with a scripted sequence of results
    pub fn with_responses(channel_type: &str, responses: Vec<SendResult>) -> Self {
        Self {
            channel_type: channel_type.to_string(),
            responses,
            current_index: std::sync::Mutex::new(0),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Mock sender that always succeeds
    pub fn succeeding(channel_type: &str) -> Self {
        Self::with_responses(channel_type, vec![SendResult::success()])
    }

    /// Mock sender that always fails transiently with the given message
    pub fn failing(channel_type: &str, error: &str) -> Self {
        Self::with_responses(channel_type, vec![SendResult::failure(error)])
    }

    /// Mock sender that always reports a configuration failure
    pub fn misconfigured(channel_type: &str, error: &str) -> Self {
        Self::with_responses(channel_type, vec![SendResult::config_failure(error)])
    }

    /// Number of times send() has been called
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// The (event, config) pair of the most recent call
    pub fn last_call(&self) -> Option<(AlertEvent, String)> {
        self.calls.lock().unwrap().last().cloned()
    }
}

impl ChannelSender for MockSender {
    fn channel_type(&self) -> &str {
        &self.channel_type
    }

    fn send<'a>(
        &'a self,
        event: &'a AlertEvent,
        config: &'a str,
    ) -> Pin<Box<dyn Future<Output = SendResult> + Send + 'a>> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push((event.clone(), config.to_string()));

            let mut index = self.current_index.lock().unwrap();
            let response = self.responses[*index % self.responses.len()].clone();
            *index += 1;
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn down_event() -> AlertEvent {
        AlertEvent::status_change(
            7,
            "billing".to_string(),
            Some(42),
            Some("postgres".to_string()),
            true,
            false,
            Utc::now(),
        )
    }

    #[test]
    fn test_deep_link_formatting() {
        assert_eq!(
            deep_link(Some("https://status.example.com"), 7).as_deref(),
            Some("https://status.example.com/services/7")
        );
        // Trailing slash on the base URL does not double up.
        assert_eq!(
            deep_link(Some("https://status.example.com/"), 7).as_deref(),
            Some("https://status.example.com/services/7")
        );
        assert_eq!(deep_link(None, 7), None);
    }

    #[test]
    fn test_chat_headline_distinguishes_kinds() {
        assert_eq!(
            ChatWebhookSender::headline(&down_event()),
            "postgres (dependency of billing) is unhealthy"
        );

        let recovered = AlertEvent::status_change(
            7,
            "billing".to_string(),
            None,
            None,
            false,
            true,
            Utc::now(),
        );
        assert_eq!(ChatWebhookSender::headline(&recovered), "billing recovered");

        let poll_error =
            AlertEvent::poll_error(7, "billing".to_string(), "dns".to_string(), Utc::now());
        assert_eq!(
            ChatWebhookSender::headline(&poll_error),
            "Health polling failed for billing"
        );
    }

    #[test]
    fn test_chat_payload_shape() {
        let payload = ChatWebhookSender::build_payload(
            &down_event(),
            Some("https://status.example.com/services/7"),
        );

        assert_eq!(payload["attachments"][0]["color"], "danger");
        assert_eq!(
            payload["attachments"][0]["title_link"],
            "https://status.example.com/services/7"
        );
        let fields = payload["attachments"][0]["fields"].as_array().unwrap();
        assert!(fields.iter().any(|f| f["value"] == "postgres"));
        assert!(fields.iter().any(|f| f["value"] == "critical"));
    }

    #[test]
    fn test_chat_payload_recovery_is_warning_colored() {
        let recovered = AlertEvent::status_change(
            7,
            "billing".to_string(),
            None,
            None,
            false,
            true,
            Utc::now(),
        );
        let payload = ChatWebhookSender::build_payload(&recovered, None);

        assert_eq!(payload["attachments"][0]["color"], "warning");
        assert!(payload["attachments"][0]
            .as_object()
            .map(|a| !a.contains_key("title_link"))
            .unwrap_or(false));
    }

    #[test]
    fn test_chat_payload_poll_error_carries_error_text() {
        let poll_error = AlertEvent::poll_error(
            7,
            "billing".to_string(),
            "connection refused".to_string(),
            Utc::now(),
        );
        let payload = ChatWebhookSender::build_payload(&poll_error, None);

        assert_eq!(payload["attachments"][0]["text"], "connection refused");
    }

    #[tokio::test]
    async fn test_chat_sender_rejects_malformed_config() {
        let sender = ChatWebhookSender::new();
        let result = sender.send(&down_event(), "not json").await;

        assert!(!result.success);
        // Malformed configuration can never succeed on retry.
        assert!(!result.retryable);
        assert!(result
            .error
            .unwrap()
            .contains("invalid chat webhook configuration"));
    }

    #[tokio::test]
    async fn test_chat_sender_rejects_missing_url() {
        let sender = ChatWebhookSender::new();
        let result = sender.send(&down_event(), "{}").await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("webhook_url"));
    }

    #[tokio::test]
    async fn test_chat_sender_rejects_empty_url() {
        let sender = ChatWebhookSender::new();
        let result = sender.send(&down_event(), r#"{"webhook_url": ""}"#).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("webhook_url"));
    }

    #[test]
    fn test_generic_method_parsing() {
        assert_eq!(
            GenericWebhookSender::parse_method(None).unwrap(),
            Method::POST
        );
        assert_eq!(
            GenericWebhookSender::parse_method(Some("put")).unwrap(),
            Method::PUT
        );
        assert_eq!(
            GenericWebhookSender::parse_method(Some("PATCH")).unwrap(),
            Method::PATCH
        );
        assert!(GenericWebhookSender::parse_method(Some("DELETE")).is_err());
    }

    #[test]
    fn test_generic_header_validation() {
        let mut headers = HashMap::new();
        headers.insert("X-Token".to_string(), "secret".to_string());
        assert!(GenericWebhookSender::parse_headers(&headers).is_ok());

        let mut bad = HashMap::new();
        bad.insert("bad header".to_string(), "x".to_string());
        let err = GenericWebhookSender::parse_headers(&bad).unwrap_err();
        assert!(err.contains("invalid header name"));
    }

    #[test]
    fn test_generic_payload_is_event_plus_link() {
        let payload = GenericWebhookSender::build_payload(
            &down_event(),
            Some("https://status.example.com/services/7"),
        )
        .unwrap();

        assert_eq!(payload["kind"], "status_change");
        assert_eq!(payload["service_id"], 7);
        assert_eq!(payload["dependency_id"], 42);
        assert_eq!(payload["link"], "https://status.example.com/services/7");
    }

    #[tokio::test]
    async fn test_generic_sender_rejects_unsupported_method() {
        let sender = GenericWebhookSender::new();
        let config = r#"{"url": "https://example.com/hook", "method": "DELETE"}"#;
        let result = sender.send(&down_event(), config).await;

        assert!(!result.success);
        assert!(!result.retryable);
        assert!(result.error.unwrap().contains("unsupported method"));
    }

    #[tokio::test]
    async fn test_generic_sender_rejects_malformed_config() {
        let sender = GenericWebhookSender::new();
        let result = sender.send(&down_event(), "[]").await;

        assert!(!result.success);
        assert!(result
            .error
            .unwrap()
            .contains("invalid generic webhook configuration"));
    }

    #[tokio::test]
    async fn test_mock_sender_cycles_responses_and_tracks_calls() {
        let sender = MockSender::with_responses(
            "chat_webhook",
            vec![SendResult::failure("first"), SendResult::success()],
        );
        let event = down_event();

        let first = sender.send(&event, "{}").await;
        assert!(!first.success);

        let second = sender.send(&event, "{}").await;
        assert!(second.success);

        // Cycles back to the first scripted result.
        let third = sender.send(&event, "{}").await;
        assert!(!third.success);

        assert_eq!(sender.call_count(), 3);
        let (last_event, last_config) = sender.last_call().unwrap();
        assert_eq!(last_event, event);
        assert_eq!(last_config, "{}");
    }
}
