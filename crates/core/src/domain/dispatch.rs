// Dispatch Options

use serde::{Deserialize, Serialize};

/// Options bag for a single dispatch
///
/// `queue_name` is interpreted by the QueueManager. Everything else is passed
/// through to the backend untouched; backends ignore fields they do not know.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOptions {
    /// Overrides the configured default queue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<String>,

    /// Total delivery attempts the backend may make (1 = no redelivery)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,

    /// Base delay between attempts in ms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,

    /// Delay before the first delivery in ms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,

    /// Higher is delivered first (backend-specific)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    /// Backend-specific tuning fields
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DispatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.backoff_ms = Some(backoff_ms);
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_fields_pass_through() {
        let options: DispatchOptions = serde_json::from_value(json!({
            "queueName": "sms",
            "attempts": 3,
            "removeOnComplete": true
        }))
        .unwrap();

        assert_eq!(options.queue_name.as_deref(), Some("sms"));
        assert_eq!(options.attempts, Some(3));
        assert_eq!(options.extra.get("removeOnComplete"), Some(&json!(true)));
    }

    #[test]
    fn test_builder() {
        let options = DispatchOptions::new()
            .on_queue("emails")
            .with_attempts(5)
            .with_backoff_ms(250)
            .with_priority(10)
            .with_extra("lifo", json!(true));

        assert_eq!(options.queue_name.as_deref(), Some("emails"));
        assert_eq!(options.backoff_ms, Some(250));
        assert_eq!(options.priority, Some(10));
        assert_eq!(options.extra.len(), 1);
    }
}
