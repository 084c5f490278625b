//! JSON payloads exchanged with the service desk.

use serde::{Deserialize, Serialize};

/// Sent to `canteen/service/urge` when the urge button is pressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrgeRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub action: String,
    pub table: u32,
}

impl UrgeRequest {
    pub fn new(table: u32) -> Self {
        Self {
            kind: "service".to_string(),
            action: "urge".to_string(),
            table,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Received on `canteen/service/notify`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceNotice {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub action: String,
    pub table: u32,
    /// Optional text from the service desk
    #[serde(default)]
    pub message: Option<String>,
}

impl ServiceNotice {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// A pickup notice addressed to `table`.
    pub fn is_pickup_for(&self, table: u32) -> bool {
        self.action == "notify" && self.table == table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urge_request_json() {
        assert_eq!(
            UrgeRequest::new(1).to_json().unwrap(),
            r#"{"type":"service","action":"urge","table":1}"#
        );
    }

    #[test]
    fn test_service_notice_parse() {
        let notice = ServiceNotice::parse(r#"{"type": "service", "action": "notify", "table": 1}"#).unwrap();
        assert_eq!(notice.kind.as_deref(), Some("service"));
        assert!(notice.is_pickup_for(1));
        assert!(!notice.is_pickup_for(2));

        let notice = ServiceNotice::parse(r#"{"action":"notify","table":3,"message":"ready"}"#).unwrap();
        assert_eq!(notice.message.as_deref(), Some("ready"));
        assert!(notice.is_pickup_for(3));
    }

    #[test]
    fn test_service_notice_rejects_garbage() {
        assert!(ServiceNotice::parse("table 1 ready").is_err());
        assert!(ServiceNotice::parse(r#"{"action":"notify"}"#).is_err());

        let other = ServiceNotice::parse(r#"{"action":"cancel","table":1}"#).unwrap();
        assert!(!other.is_pickup_for(1));
    }
}
