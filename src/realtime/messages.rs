//! Frames of the `graphql-ws` subscription protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    ConnectionInit {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Start {
        id: String,
        payload: StartPayload,
    },
    Stop {
        id: String,
    },
}

impl ClientFrame {
    pub fn connection_init() -> Self {
        ClientFrame::ConnectionInit { payload: None }
    }

    pub fn to_json(&self) -> Result<String, TransportError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartPayload {
    /// JSON-encoded `{query, variables}`.
    pub data: String,
    pub extensions: StartExtensions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartExtensions {
    pub authorization: SubscriptionAuthorization,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionAuthorization {
    pub host: String,
    #[serde(rename = "Authorization")]
    pub authorization: String,
}

impl StartPayload {
    pub fn new(
        query: &str,
        variables: &Value,
        host: &str,
        id_token: &str,
    ) -> Result<Self, TransportError> {
        let data = serde_json::to_string(&serde_json::json!({
            "query": query,
            "variables": variables,
        }))?;
        Ok(Self {
            data,
            extensions: StartExtensions {
                authorization: SubscriptionAuthorization {
                    host: host.to_string(),
                    authorization: id_token.to_string(),
                },
            },
        })
    }
}

/// Frames received from the server. Unknown types parse as [`ServerFrame::Unknown`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    ConnectionAck {
        #[serde(default)]
        payload: Option<Value>,
    },
    ConnectionError {
        #[serde(default)]
        payload: Option<Value>,
    },
    /// Keep-alive.
    Ka,
    StartAck {
        id: String,
    },
    Data {
        id: String,
        #[serde(default)]
        payload: Value,
    },
    Error {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        payload: Option<Value>,
    },
    Complete {
        id: String,
    },
    #[serde(other)]
    Unknown,
}

impl ServerFrame {
    pub fn parse(text: &str) -> Result<Self, TransportError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::ConnectionAck { .. } => "connection_ack",
            ServerFrame::ConnectionError { .. } => "connection_error",
            ServerFrame::Ka => "ka",
            ServerFrame::StartAck { .. } => "start_ack",
            ServerFrame::Data { .. } => "data",
            ServerFrame::Error { .. } => "error",
            ServerFrame::Complete { .. } => "complete",
            ServerFrame::Unknown => "unknown",
        }
    }
}

/// Human-readable summary of an error payload.
pub fn describe_payload(payload: &Option<Value>) -> String {
    let Some(payload) = payload else {
        return "no details".to_string();
    };
    payload
        .get("errors")
        .and_then(|e| e.as_array())
        .and_then(|errors| errors.first())
        .and_then(|first| {
            first
                .get("message")
                .or_else(|| first.get("errorType"))
                .and_then(|m| m.as_str())
        })
        .map(str::to_string)
        .unwrap_or_else(|| payload.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_init_shape() {
        assert_eq!(
            ClientFrame::connection_init().to_json().unwrap(),
            r#"{"type":"connection_init"}"#
        );
    }

    #[test]
    fn test_start_frame_shape() {
        let payload = StartPayload::new(
            "subscription { onUpdate }",
            &serde_json::json!({"deviceId": "d1"}),
            "api.example.com",
            "id-token",
        )
        .unwrap();
        let frame: Value = serde_json::from_str(
            &ClientFrame::Start {
                id: "sub-1".to_string(),
                payload,
            }
            .to_json()
            .unwrap(),
        )
        .unwrap();

        assert_eq!(frame["type"], "start");
        assert_eq!(frame["id"], "sub-1");
        assert_eq!(
            frame["payload"]["extensions"]["authorization"]["Authorization"],
            "id-token"
        );
        let data: Value = serde_json::from_str(frame["payload"]["data"].as_str().unwrap()).unwrap();
        assert_eq!(data["variables"]["deviceId"], "d1");
    }

    #[test]
    fn test_parse_server_frames() {
        assert_eq!(ServerFrame::parse(r#"{"type":"ka"}"#).unwrap(), ServerFrame::Ka);
        assert!(matches!(
            ServerFrame::parse(r#"{"type":"connection_ack","payload":{"connectionTimeoutMs":300000}}"#).unwrap(),
            ServerFrame::ConnectionAck { payload: Some(_) }
        ));
        assert_eq!(
            ServerFrame::parse(r#"{"type":"data","id":"s1","payload":{"data":{"x":1}}}"#)
                .unwrap()
                .kind(),
            "data"
        );
        assert_eq!(
            ServerFrame::parse(r#"{"type":"something_new","foo":1}"#).unwrap(),
            ServerFrame::Unknown
        );
        assert!(ServerFrame::parse("not json").is_err());
    }

    #[test]
    fn test_describe_payload() {
        let payload = Some(serde_json::json!({"errors":[{"errorType":"UnauthorizedException","message":"Token has expired."}]}));
        assert_eq!(describe_payload(&payload), "Token has expired.");
        assert_eq!(describe_payload(&None), "no details");
    }
}
