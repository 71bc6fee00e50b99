//! Gremlin-server wire frames.
//!
//! The graph speaks the sessionless string-eval protocol over websocket:
//! one JSON request frame per call, one or more JSON response frames back
//! (206 partial-content frames accumulate until a terminal 200/204).
//! Everything is parsed here, once; upstream code never touches raw JSON.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::error::GraphError;

/// Terminal success.
pub const STATUS_SUCCESS: u16 = 200;
/// Terminal success with no result data.
pub const STATUS_NO_CONTENT: u16 = 204;
/// Non-terminal chunk; more frames follow for the same request.
pub const STATUS_PARTIAL_CONTENT: u16 = 206;

/// One outgoing eval call.
#[derive(Debug, Clone)]
pub struct GremlinRequest {
    pub request_id: Uuid,
    pub gremlin: String,
    pub bindings: Map<String, Value>,
    /// Server-side evaluation cap in milliseconds; `None` leaves the
    /// server default in place (bulk load and drop-all pass a large
    /// explicit value instead).
    pub evaluation_timeout_ms: Option<u64>,
}

impl GremlinRequest {
    pub fn new(gremlin: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            gremlin: gremlin.into(),
            bindings: Map::new(),
            evaluation_timeout_ms: None,
        }
    }

    pub fn bind(mut self, name: &str, value: Value) -> Self {
        self.bindings.insert(name.to_string(), value);
        self
    }

    pub fn with_evaluation_timeout_ms(mut self, ms: u64) -> Self {
        self.evaluation_timeout_ms = Some(ms);
        self
    }

    /// Serialize to the request envelope the server expects.
    pub fn to_frame(&self) -> Value {
        let mut args = Map::new();
        args.insert("gremlin".to_string(), Value::String(self.gremlin.clone()));
        args.insert("language".to_string(), json!("gremlin-groovy"));
        args.insert("bindings".to_string(), Value::Object(self.bindings.clone()));
        if let Some(ms) = self.evaluation_timeout_ms {
            args.insert("evaluationTimeout".to_string(), json!(ms));
        }

        json!({
            "requestId": self.request_id.to_string(),
            "op": "eval",
            "processor": "",
            "args": Value::Object(args),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    #[serde(rename = "requestId")]
    request_id: String,
    status: ResponseStatus,
    #[serde(default)]
    result: ResponseResult,
}

#[derive(Debug, Deserialize)]
struct ResponseStatus {
    code: u16,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseResult {
    #[serde(default)]
    data: Option<Value>,
}

/// One parsed response frame.
#[derive(Debug)]
pub struct ResponseFrame {
    pub request_id: String,
    pub code: u16,
    pub message: String,
    pub data: Vec<Value>,
}

impl ResponseFrame {
    /// Parse a raw text frame. Typed GraphSON wrappers (`@type`/`@value`)
    /// are unwrapped here so the rest of the client sees plain JSON.
    pub fn parse(text: &str) -> Result<Self, GraphError> {
        let envelope: ResponseEnvelope = serde_json::from_str(text)
            .map_err(|e| GraphError::Fatal(format!("malformed response frame: {e}")))?;

        let data = match envelope.result.data {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => match unwrap_graphson(value) {
                Value::Array(items) => items,
                other => vec![other],
            },
        };

        Ok(Self {
            request_id: envelope.request_id,
            code: envelope.status.code,
            message: envelope.status.message,
            data,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.code != STATUS_PARTIAL_CONTENT
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.code,
            STATUS_SUCCESS | STATUS_NO_CONTENT | STATUS_PARTIAL_CONTENT
        )
    }
}

/// Recursively strip GraphSON type wrappers: `{"@type": t, "@value": v}`
/// becomes `v`. Lists and maps are unwrapped element-wise; `g:Map` pair
/// lists become JSON objects.
pub fn unwrap_graphson(value: Value) -> Value {
    match value {
        Value::Object(mut obj) => {
            if obj.contains_key("@type") && obj.contains_key("@value") {
                let typ = obj
                    .get("@type")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let inner = obj.remove("@value").unwrap_or(Value::Null);
                if typ == "g:Map" {
                    // g:Map serializes as a flat [k1, v1, k2, v2, ...] list.
                    if let Value::Array(items) = inner {
                        let mut map = Map::new();
                        let mut iter = items.into_iter();
                        while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                            let key = match unwrap_graphson(k) {
                                Value::String(s) => s,
                                other => other.to_string(),
                            };
                            map.insert(key, unwrap_graphson(v));
                        }
                        return Value::Object(map);
                    }
                    return Value::Null;
                }
                unwrap_graphson(inner)
            } else {
                Value::Object(
                    obj.into_iter()
                        .map(|(k, v)| (k, unwrap_graphson(v)))
                        .collect(),
                )
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(unwrap_graphson).collect()),
        other => other,
    }
}

/// Coerce a scalar result (element id, count) into a string id.
pub fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Coerce a scalar result into a count.
pub fn value_to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// `valueMap()` wraps vertex property values in single-element lists;
/// edge properties come back bare. Accept both.
pub fn unwrap_prop(value: &Value) -> Value {
    match value {
        Value::Array(items) if items.len() == 1 => items[0].clone(),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_frame_shape() {
        let req = GremlinRequest::new("g.inject(0)")
            .bind("x", json!(1))
            .with_evaluation_timeout_ms(2_000_000);
        let frame = req.to_frame();
        assert_eq!(frame["op"], "eval");
        assert_eq!(frame["args"]["gremlin"], "g.inject(0)");
        assert_eq!(frame["args"]["bindings"]["x"], 1);
        assert_eq!(frame["args"]["evaluationTimeout"], 2_000_000u64);
    }

    #[test]
    fn test_parse_success_frame() {
        let text = r#"{
            "requestId": "41d2e28a-20a4-4ab0-b379-d810dede3786",
            "status": {"code": 200, "message": "", "attributes": {}},
            "result": {"data": ["edge-1", "edge-2"], "meta": {}}
        }"#;
        let frame = ResponseFrame::parse(text).unwrap();
        assert!(frame.is_terminal());
        assert!(frame.is_success());
        assert_eq!(frame.data.len(), 2);
    }

    #[test]
    fn test_parse_no_content_frame() {
        let text = r#"{
            "requestId": "41d2e28a-20a4-4ab0-b379-d810dede3786",
            "status": {"code": 204, "message": ""},
            "result": {"data": null}
        }"#;
        let frame = ResponseFrame::parse(text).unwrap();
        assert!(frame.is_terminal());
        assert!(frame.data.is_empty());
    }

    #[test]
    fn test_partial_frame_is_not_terminal() {
        let text = r#"{
            "requestId": "x",
            "status": {"code": 206, "message": ""},
            "result": {"data": [1, 2, 3]}
        }"#;
        let frame = ResponseFrame::parse(text).unwrap();
        assert!(!frame.is_terminal());
        assert_eq!(frame.data.len(), 3);
    }

    #[test]
    fn test_unwrap_typed_scalars() {
        let typed = json!({"@type": "g:Int64", "@value": 42});
        assert_eq!(unwrap_graphson(typed), json!(42));
    }

    #[test]
    fn test_unwrap_typed_map() {
        let typed = json!({
            "@type": "g:Map",
            "@value": ["sender", {"@type": "g:Int64", "@value": 7}, "receiver", Value::Null]
        });
        let plain = unwrap_graphson(typed);
        assert_eq!(plain["sender"], json!(7));
        assert_eq!(plain["receiver"], Value::Null);
    }

    #[test]
    fn test_unwrap_prop_accepts_both_shapes() {
        assert_eq!(unwrap_prop(&json!(["only"])), json!("only"));
        assert_eq!(unwrap_prop(&json!("bare")), json!("bare"));
        assert_eq!(unwrap_prop(&json!([1, 2])), json!([1, 2]));
    }
}
