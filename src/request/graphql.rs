//! `{query, variables}` request and `{data, errors?}` response bodies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub variables: Value,
}

impl GraphqlRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: Value::Null,
        }
    }

    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = variables;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GraphqlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Option<Vec<GraphqlError>>,
}

impl GraphqlResponse {
    /// Embedded errors, if the response carries a non-empty list.
    pub fn take_errors(&mut self) -> Option<Vec<GraphqlError>> {
        self.errors.take().filter(|errors| !errors.is_empty())
    }
}

/// One entry of an embedded error list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(default, rename = "errorType", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphqlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            error_type: None,
            extensions: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_omits_null_variables() {
        let body = serde_json::to_string(&GraphqlRequest::new("{ devices }")).unwrap();
        assert_eq!(body, r#"{"query":"{ devices }"}"#);

        let body = serde_json::to_value(
            GraphqlRequest::new("query($id: ID!) { device(id: $id) }")
                .with_variables(serde_json::json!({"id": "d1"})),
        )
        .unwrap();
        assert_eq!(body["variables"]["id"], "d1");
    }

    #[test]
    fn test_response_with_errors() {
        let mut response: GraphqlResponse = serde_json::from_str(
            r#"{"data":null,"errors":[{"message":"Device offline","errorType":"DeviceError","path":["setState"]}]}"#,
        )
        .unwrap();
        let errors = response.take_errors().unwrap();
        assert_eq!(errors[0].message, "Device offline");
        assert_eq!(errors[0].error_type.as_deref(), Some("DeviceError"));
    }

    #[test]
    fn test_empty_error_list_is_success() {
        let mut response: GraphqlResponse =
            serde_json::from_str(r#"{"data":{"ok":true},"errors":[]}"#).unwrap();
        assert!(response.take_errors().is_none());
        assert_eq!(response.data.unwrap()["ok"], true);
    }
}
