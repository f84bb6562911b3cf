use serde::Deserialize;
use serde_json::{Value, json};

/// Encode one outgoing frame. Serialization happens at the call site, so
/// the io task only ever moves finished text.
#[must_use]
pub fn encode_frame(
    id: u64,
    method: &str,
    params: Option<Value>,
    session_id: Option<&str>,
) -> String {
    let mut frame = serde_json::Map::new();
    frame.insert("id".to_owned(), json!(id));
    frame.insert("method".to_owned(), json!(method));
    if let Some(params) = params {
        frame.insert("params".to_owned(), params);
    }
    if let Some(session) = session_id {
        frame.insert("sessionId".to_owned(), json!(session));
    }
    Value::Object(frame).to_string()
}

/// Error payload inside a reply.
#[derive(Debug, Clone, Deserialize)]
pub struct WireError {
    pub code: i64,
    pub message: String,
}

/// A reply to a command. Extra fields (`sessionId`) are irrelevant once the
/// id is matched and are ignored.
#[derive(Debug, Deserialize)]
pub struct Reply {
    pub id: u64,
    #[serde(default)]
    pub result: Value,
    pub error: Option<WireError>,
}

impl Reply {
    /// Collapse the result/error pair into one outcome.
    ///
    /// # Errors
    ///
    /// Returns the browser's error payload when one is present.
    pub fn outcome(self) -> Result<Value, WireError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result),
        }
    }
}

/// An event pushed by the browser.
#[derive(Debug, Clone, Deserialize)]
pub struct CdpEvent {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// One inbound frame. Replies carry an `id`; events carry a `method` and
/// no `id` — serde's untagged matching does the sorting, and anything that
/// fits neither shape fails to parse and is dropped by the router.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WireIn {
    Reply(Reply),
    Event(CdpEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_frame_has_only_the_given_fields() {
        let frame = encode_frame(7, "Target.getTargets", None, None);
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["id"], 7);
        assert_eq!(v["method"], "Target.getTargets");
        assert!(v.get("params").is_none());
        assert!(v.get("sessionId").is_none());
    }

    #[test]
    fn encoded_frame_carries_params_and_session() {
        let frame = encode_frame(
            2,
            "Runtime.evaluate",
            Some(json!({"expression": "location.href"})),
            Some("SESS1"),
        );
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["params"]["expression"], "location.href");
        assert_eq!(v["sessionId"], "SESS1");
    }

    #[test]
    fn inbound_reply_sorts_as_reply() {
        let frame: WireIn =
            serde_json::from_str(r#"{"id": 3, "result": {"frameId": "F"}}"#).unwrap();
        match frame {
            WireIn::Reply(reply) => {
                assert_eq!(reply.id, 3);
                assert_eq!(reply.outcome().unwrap()["frameId"], "F");
            }
            WireIn::Event(_) => panic!("expected a reply"),
        }
    }

    #[test]
    fn inbound_error_reply_yields_the_payload() {
        let frame: WireIn = serde_json::from_str(
            r#"{"id": 4, "error": {"code": -32000, "message": "No target with given id found"}}"#,
        )
        .unwrap();
        match frame {
            WireIn::Reply(reply) => {
                let err = reply.outcome().unwrap_err();
                assert_eq!(err.code, -32000);
                assert!(err.message.contains("No target"));
            }
            WireIn::Event(_) => panic!("expected a reply"),
        }
    }

    #[test]
    fn reply_without_result_defaults_to_null() {
        let frame: WireIn = serde_json::from_str(r#"{"id": 9}"#).unwrap();
        match frame {
            WireIn::Reply(reply) => assert_eq!(reply.outcome().unwrap(), Value::Null),
            WireIn::Event(_) => panic!("expected a reply"),
        }
    }

    #[test]
    fn inbound_event_sorts_as_event() {
        let frame: WireIn = serde_json::from_str(
            r#"{"method": "Inspector.targetCrashed", "params": {}, "sessionId": "S"}"#,
        )
        .unwrap();
        match frame {
            WireIn::Event(event) => {
                assert_eq!(event.method, "Inspector.targetCrashed");
                assert_eq!(event.session_id.as_deref(), Some("S"));
            }
            WireIn::Reply(_) => panic!("expected an event"),
        }
    }

    #[test]
    fn event_without_params_defaults_to_null() {
        let frame: WireIn =
            serde_json::from_str(r#"{"method": "Page.frameNavigated"}"#).unwrap();
        match frame {
            WireIn::Event(event) => assert_eq!(event.params, Value::Null),
            WireIn::Reply(_) => panic!("expected an event"),
        }
    }

    #[test]
    fn shapeless_frames_fail_to_parse() {
        assert!(serde_json::from_str::<WireIn>("{}").is_err());
        assert!(serde_json::from_str::<WireIn>(r#"{"params": {}}"#).is_err());
    }
}
