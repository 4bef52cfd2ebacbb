//! Wire protocol: newline-delimited UTF-8 JSON objects.
//!
//! ```text
//! host → device   {"id": 7, "command": "set_light", "color": "purple", "brightness": 100}
//! device → host   {"id": 7, "status": "ok", "result": null}
//! device → host   {"event": "rfid_detected", "tag": "001"}
//! ```
//!
//! A message carrying `"id"` is a response; one carrying `"event"` (and no
//! `"id"`) is a push event.  Anything else is a protocol error.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::app::pipeline::{TriggerEvent, tag_code};
use crate::drivers::light::LightCommand;
use crate::error::ProtocolError;

/// Push event announcing a detected tag.
pub const EVENT_RFID_DETECTED: &str = "rfid_detected";

/// Correlation id.  Strictly increasing per link, never reused.
pub type CorrelationId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandName {
    ReadRfid,
    SetLight,
    GetStatus,
}

/// A command body, before a correlation id is attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub command: CommandName,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl Request {
    pub fn new(command: CommandName) -> Self {
        Self {
            command,
            params: Map::new(),
        }
    }

    pub fn get_status() -> Self {
        Self::new(CommandName::GetStatus)
    }

    pub fn read_rfid() -> Self {
        Self::new(CommandName::ReadRfid)
    }

    pub fn set_light(light: LightCommand) -> Self {
        let mut req = Self::new(CommandName::SetLight);
        req.params
            .insert("color".into(), Value::from(light.color.as_str()));
        req.params
            .insert("brightness".into(), Value::from(light.brightness));
        req
    }
}

/// Outgoing line: a request with its correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: CorrelationId,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: CorrelationId,
    pub status: Status,
    #[serde(default, alias = "data")]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    pub fn ok(id: CorrelationId, result: Value) -> Self {
        Self {
            id,
            status: Status::Ok,
            result,
            message: None,
        }
    }

    pub fn error(id: CorrelationId, message: impl Into<String>) -> Self {
        Self {
            id,
            status: Status::Error,
            result: Value::Null,
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

/// Unsolicited device message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    pub event: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl PushEvent {
    pub fn rfid_detected(tag: &str) -> Self {
        let mut payload = Map::new();
        payload.insert("tag".into(), Value::from(tag));
        Self {
            event: EVENT_RFID_DETECTED.into(),
            payload,
        }
    }

    /// Tag carried by a detection event (`tag`, or `rfid` on older firmware).
    pub fn tag(&self) -> Option<&str> {
        self.payload
            .get("tag")
            .or_else(|| self.payload.get("rfid"))
            .and_then(Value::as_str)
    }
}

/// Any inbound line after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Response(Response),
    Push(PushEvent),
}

/// Demultiplex one inbound line.
pub fn classify(line: &str) -> Result<Inbound, ProtocolError> {
    let value: Value = serde_json::from_str(line)?;
    let Value::Object(map) = value else {
        return Err(ProtocolError::Malformed("not a JSON object".into()));
    };
    if map.contains_key("id") {
        let response = serde_json::from_value(Value::Object(map))?;
        Ok(Inbound::Response(response))
    } else if map.contains_key("event") {
        let event = serde_json::from_value(Value::Object(map))?;
        Ok(Inbound::Push(event))
    } else {
        Err(ProtocolError::Unrecognized)
    }
}

/// Firmware details returned by `get_status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub firmware_version: String,
    pub rfid_enabled: bool,
    pub lights_enabled: bool,
}

impl DeviceInfo {
    /// Parse a `get_status` result; unknown shapes yield defaults.
    pub fn from_result(result: &Value) -> Self {
        serde_json::from_value(result.clone()).unwrap_or_default()
    }
}

/// Turn a push event into a trigger.  `Ok(None)` for non-detection events.
pub fn trigger_from_push(
    event: &PushEvent,
    observed_at_ms: u64,
) -> Result<Option<TriggerEvent>, ProtocolError> {
    if event.event != EVENT_RFID_DETECTED {
        return Ok(None);
    }
    let raw = event
        .tag()
        .ok_or_else(|| ProtocolError::Malformed("detection without tag".into()))?;
    Ok(Some(TriggerEvent::new(tag_code(raw)?, observed_at_ms)))
}

/// Turn a `read_rfid` response into a trigger.  `Ok(None)` when no tag is
/// present (`{"rfid": null}`).
pub fn trigger_from_read(
    response: &Response,
    observed_at_ms: u64,
) -> Result<Option<TriggerEvent>, ProtocolError> {
    if !response.is_ok() {
        return Ok(None);
    }
    let raw = match &response.result {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map
            .get("rfid")
            .or_else(|| map.get("tag"))
            .and_then(Value::as_str),
        _ => None,
    };
    match raw {
        Some(raw) if !raw.trim().is_empty() => {
            Ok(Some(TriggerEvent::new(tag_code(raw)?, observed_at_ms)))
        }
        _ => Ok(None),
    }
}
