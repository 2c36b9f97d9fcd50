//! JSON events carried in WebSocket text frames.
//!
//! ```text
//! client -> server  {"event":"send_frame","data":{"dataURL":"data:image/png;base64,..."}}
//! server -> client  {"event":"processed_frame","data":{"url":"data:image/jpeg;base64,..."}}
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    SendFrame(SendFrame),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendFrame {
    #[serde(rename = "dataURL")]
    pub data_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    ProcessedFrame(ProcessedFrame),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedFrame {
    pub url: String,
}

impl ClientEvent {
    pub fn send_frame(data_url: impl Into<String>) -> Self {
        Self::SendFrame(SendFrame {
            data_url: data_url.into(),
        })
    }
}

impl ServerEvent {
    pub fn processed_frame(url: impl Into<String>) -> Self {
        Self::ProcessedFrame(ProcessedFrame { url: url.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let event = ClientEvent::send_frame("data:image/png;base64,AAAA");
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"event":"send_frame","data":{"dataURL":"data:image/png;base64,AAAA"}}"#
        );

        let event = ServerEvent::processed_frame("data:image/jpeg;base64,BBBB");
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"event":"processed_frame","data":{"url":"data:image/jpeg;base64,BBBB"}}"#
        );
    }

    #[test]
    fn test_payload_without_data_url_is_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"send_frame","data":{}}"#).is_err());
        assert!(serde_json::from_str::<ClientEvent>(
            r#"{"event":"send_frame","data":{"dataURL":42}}"#
        )
        .is_err());
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"other","data":{}}"#).is_err());
    }
}
