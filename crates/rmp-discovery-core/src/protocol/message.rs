//! Protocol messages.
//!
//! Every message is a flat JSON object carrying a `connType` plus a set of
//! fields that depend on the type. Unknown fields are carried through
//! untouched so that CONF can forward arbitrary adapter settings.

use std::fmt;

use serde_json::{Map, Value};

use crate::error::CodecError;
use crate::types::{parse_timeout, GlobalId};

pub const CONN_TYPE: &str = "connType";
pub const GLOBAL_ID: &str = "global_id";
pub const LOCAL_ID: &str = "local_id";
pub const DEV_IP: &str = "dev_ip";
pub const DEV_HW_ADDR: &str = "dev_hw_addr";
pub const DEV_TYPE: &str = "type";
pub const HOST: &str = "host";
pub const TIMEOUT: &str = "timeout";
pub const PING_MSG: &str = "ping_msg";
pub const ERROR: &str = "error";

/// Payload of a discovery probe.
pub const PING: &str = "ping";
/// Payload of a discovery probe answer.
pub const PONG: &str = "pong";

/// Message discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConnType {
    Hello,
    Conf,
    Ping,
    KeepAlive,
    Value,
    Unknown(String),
}

impl ConnType {
    /// Parse a wire value. Matching is case-insensitive.
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "hello" => ConnType::Hello,
            "conf" => ConnType::Conf,
            "ping" => ConnType::Ping,
            "keepalive" | "keep_alive" => ConnType::KeepAlive,
            "value" => ConnType::Value,
            _ => ConnType::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ConnType::Hello => "hello",
            ConnType::Conf => "conf",
            ConnType::Ping => "ping",
            ConnType::KeepAlive => "keepalive",
            ConnType::Value => "value",
            ConnType::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for ConnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    conn_type: ConnType,
    fields: Map<String, Value>,
}

impl Message {
    pub fn new(conn_type: ConnType) -> Self {
        Self {
            conn_type,
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn conn_type(&self) -> &ConnType {
        &self.conn_type
    }

    /// All fields except `connType`.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        if key == CONN_TYPE {
            return;
        }
        self.fields.insert(key.to_string(), value.into());
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Required string field.
    pub fn require_str(&self, key: &'static str) -> Result<&str, CodecError> {
        match self.fields.get(key) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(CodecError::InvalidField {
                field: key,
                message: format!("expected string, got {}", other),
            }),
            None => Err(CodecError::MissingField(key)),
        }
    }

    /// Optional string field; `null` and `""` count as absent.
    pub fn optional_str(&self, key: &'static str) -> Result<Option<&str>, CodecError> {
        match self.fields.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(CodecError::InvalidField {
                field: key,
                message: format!("expected string, got {}", other),
            }),
        }
    }

    /// Optional identifier field.
    ///
    /// Accepts integers and numeric strings. `null`, `""` and `0` count as
    /// absent since `0` is never assigned.
    pub fn optional_id(&self, key: &'static str) -> Result<Option<GlobalId>, CodecError> {
        let id = match self.fields.get(key) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
            Some(Value::String(s)) => s.trim().parse::<GlobalId>().ok(),
            Some(_) => None,
        };

        match id {
            Some(0) => Ok(None),
            Some(id) if id > 0 => Ok(Some(id)),
            _ => Err(CodecError::InvalidField {
                field: key,
                message: "expected a positive integer".to_string(),
            }),
        }
    }

    pub fn global_id(&self) -> Result<Option<GlobalId>, CodecError> {
        self.optional_id(GLOBAL_ID)
    }

    /// Timeout in seconds, if present and well-formed.
    pub fn timeout(&self) -> Option<u64> {
        self.fields.get(TIMEOUT).and_then(parse_timeout)
    }

    /// Convert to the JSON object sent on the wire.
    pub fn to_value(&self) -> Value {
        let mut object = Map::with_capacity(self.fields.len() + 1);
        object.insert(
            CONN_TYPE.to_string(),
            Value::String(self.conn_type.as_str().to_string()),
        );
        for (key, value) in &self.fields {
            object.insert(key.clone(), value.clone());
        }
        Value::Object(object)
    }

    /// Build from a decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        let Value::Object(mut fields) = value else {
            return Err(CodecError::NotAnObject);
        };

        let conn_type = match fields.remove(CONN_TYPE) {
            Some(Value::String(raw)) => ConnType::parse(&raw),
            Some(other) => {
                return Err(CodecError::InvalidField {
                    field: CONN_TYPE,
                    message: format!("expected string, got {}", other),
                })
            }
            None => return Err(CodecError::MissingField(CONN_TYPE)),
        };

        Ok(Self { conn_type, fields })
    }
}

/// Builders for the messages exchanged by devices and gateways.
pub struct Messages;

impl Messages {
    /// Discovery probe sent by devices looking for a gateway.
    pub fn probe() -> Message {
        Message::new(ConnType::Ping).with(PING_MSG, PING)
    }

    /// True if `msg` answers a discovery probe.
    pub fn is_pong(msg: &Message) -> bool {
        *msg.conn_type() == ConnType::Ping && msg.get_str(PING_MSG) == Some(PONG)
    }

    /// Registration request. `global_id` is set when reconnecting.
    pub fn hello(
        local_id: &str,
        hw_address: &str,
        ip: Option<&str>,
        device_type: &str,
        host: Option<GlobalId>,
        global_id: Option<GlobalId>,
    ) -> Message {
        let mut msg = Message::new(ConnType::Hello)
            .with(LOCAL_ID, local_id)
            .with(DEV_HW_ADDR, hw_address)
            .with(DEV_TYPE, device_type);
        if let Some(ip) = ip {
            msg.insert(DEV_IP, ip);
        }
        if let Some(host) = host {
            msg.insert(HOST, host);
        }
        if let Some(id) = global_id {
            msg.insert(GLOBAL_ID, id);
        }
        msg
    }

    /// Adapter configuration push for a registered device.
    pub fn conf(global_id: GlobalId, adapter_conf: &Map<String, Value>) -> Message {
        let mut msg = Message::new(ConnType::Conf);
        for (key, value) in adapter_conf {
            msg.insert(key, value.clone());
        }
        msg.with(GLOBAL_ID, global_id)
    }

    /// Liveness heartbeat.
    pub fn keep_alive(global_id: GlobalId, timeout_secs: u64) -> Message {
        Message::new(ConnType::KeepAlive)
            .with(GLOBAL_ID, global_id)
            .with(TIMEOUT, timeout_secs)
    }

    /// Gateway acknowledgement of a CONF.
    pub fn ack(global_id: GlobalId) -> Message {
        Message::new(ConnType::Ping).with(GLOBAL_ID, global_id)
    }

    /// Gateway refusal; always carries `global_id: 0`.
    pub fn refusal(reason: impl fmt::Display) -> Message {
        Message::new(ConnType::Ping)
            .with(GLOBAL_ID, 0)
            .with(ERROR, reason.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_conn_type_parse_is_case_insensitive() {
        assert_eq!(ConnType::parse("HELLO"), ConnType::Hello);
        assert_eq!(ConnType::parse("Conf"), ConnType::Conf);
        assert_eq!(ConnType::parse("keepalive"), ConnType::KeepAlive);
        assert_eq!(
            ConnType::parse("bogus"),
            ConnType::Unknown("bogus".to_string())
        );
    }

    #[test]
    fn test_from_value_requires_conn_type() {
        let err = Message::from_value(json!({"local_id": "a"})).unwrap_err();
        assert!(matches!(err, CodecError::MissingField(CONN_TYPE)));

        let err = Message::from_value(json!([1, 2])).unwrap_err();
        assert!(matches!(err, CodecError::NotAnObject));
    }

    #[test]
    fn test_to_value_includes_conn_type() {
        let msg = Messages::keep_alive(101, 30);
        assert_eq!(
            msg.to_value(),
            json!({"connType": "keepalive", "global_id": 101, "timeout": 30})
        );
    }

    #[test]
    fn test_optional_id_variants() {
        let msg = Message::from_value(json!({"connType": "hello", "global_id": 0})).unwrap();
        assert_eq!(msg.global_id().unwrap(), None);

        let msg = Message::from_value(json!({"connType": "hello", "global_id": "101"})).unwrap();
        assert_eq!(msg.global_id().unwrap(), Some(101));

        let msg = Message::from_value(json!({"connType": "hello", "global_id": -4})).unwrap();
        assert!(msg.global_id().is_err());

        let msg = Message::from_value(json!({"connType": "hello", "host": ""})).unwrap();
        assert_eq!(msg.optional_id(HOST).unwrap(), None);
    }

    #[test]
    fn test_conn_type_cannot_be_overwritten_by_field() {
        let msg = Message::new(ConnType::Conf).with(CONN_TYPE, "hello");
        assert_eq!(msg.conn_type(), &ConnType::Conf);
        assert!(msg.fields().is_empty());
    }

    #[test]
    fn test_conf_builder_forwards_adapter_settings() {
        let conf = json!({"pinset": [4, 5], "timeout": 30});
        let msg = Messages::conf(100, conf.as_object().unwrap());

        assert_eq!(msg.conn_type(), &ConnType::Conf);
        assert_eq!(msg.global_id().unwrap(), Some(100));
        assert_eq!(msg.get("pinset"), Some(&json!([4, 5])));
        assert_eq!(msg.timeout(), Some(30));
    }

    #[test]
    fn test_probe_and_pong() {
        let probe = Messages::probe();
        assert!(!Messages::is_pong(&probe));

        let pong = probe.with(PING_MSG, PONG);
        assert!(Messages::is_pong(&pong));
    }
}
