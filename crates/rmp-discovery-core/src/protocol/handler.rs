//! Transport-agnostic message handler.
//!
//! Both gateways feed decoded messages into [`ProtocolHandler::handle`] and
//! send back whatever it returns. All state lives in the registry and the
//! allocator, so the handler is cheap to clone into every connection task.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use super::message::{
    ConnType, Message, Messages, DEV_HW_ADDR, DEV_IP, DEV_TYPE, GLOBAL_ID, HOST, LOCAL_ID,
    PING, PING_MSG, PONG, TIMEOUT,
};
use crate::error::{CodecError, HandlerError};
use crate::registry::{DeviceRegistry, IdAllocator, Lookup};
use crate::types::{normalize_hw_address, parse_timeout, DeviceRecord, GlobalId};

/// Interval between discovery attempts on the client side.
pub const DISCOVERY_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Window in which a repeated HELLO is taken as a retransmission.
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(5 * 2);

/// Nested adapter settings some devices send inside CONF.
const ADAPTER_CONF: &str = "adapter_conf";

/// Why a registration was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    UnknownId,
    HwMismatch,
    LocalIdMismatch,
    Declined,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Rejection::UnknownId => "unknown id",
            Rejection::HwMismatch => "hw mismatch",
            Rejection::LocalIdMismatch => "id mismatch",
            Rejection::Declined => "Declined",
        })
    }
}

/// Identity fields of a HELLO.
struct Hello {
    local_id: String,
    hw_address: String,
    ip: Option<String>,
    device_type: Option<String>,
    host: Option<GlobalId>,
    global_id: Option<GlobalId>,
}

impl Hello {
    fn from_message(msg: &Message) -> Result<Self, CodecError> {
        Ok(Self {
            local_id: msg.require_str(LOCAL_ID)?.to_string(),
            hw_address: normalize_hw_address(msg.require_str(DEV_HW_ADDR)?),
            ip: msg.optional_str(DEV_IP)?.map(str::to_string),
            device_type: msg.optional_str(DEV_TYPE)?.map(str::to_string),
            host: msg.optional_id(HOST)?,
            global_id: msg.global_id()?,
        })
    }

    fn reply(&self, outcome: Result<GlobalId, Rejection>) -> Message {
        let mut reply = match outcome {
            Ok(id) => Messages::ack(id),
            Err(rejection) => Messages::refusal(rejection),
        };
        reply.insert(LOCAL_ID, self.local_id.as_str());
        reply.insert(DEV_HW_ADDR, self.hw_address.as_str());
        if let Some(ip) = &self.ip {
            reply.insert(DEV_IP, ip.as_str());
        }
        reply
    }
}

/// Shared message dispatcher.
#[derive(Debug, Clone)]
pub struct ProtocolHandler {
    registry: Arc<DeviceRegistry>,
    allocator: Arc<IdAllocator>,
    grace_window: Duration,
}

impl ProtocolHandler {
    pub fn new(registry: Arc<DeviceRegistry>, allocator: Arc<IdAllocator>) -> Self {
        Self {
            registry,
            allocator,
            grace_window: DEFAULT_GRACE_WINDOW,
        }
    }

    pub fn with_grace_window(mut self, grace_window: Duration) -> Self {
        self.grace_window = grace_window;
        self
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Handle one message and return the reply to send, if any.
    ///
    /// Never fails: errors are logged and the message is dropped.
    pub async fn handle(&self, msg: Message) -> Option<Message> {
        let conn_type = msg.conn_type().clone();
        debug!(conn_type = %conn_type, fields = ?msg.fields(), "handling message");

        match self.dispatch(msg).await {
            Ok(reply) => reply,
            Err(HandlerError::Storage(e)) => {
                error!(conn_type = %conn_type, error = %e, "storage failure while handling message");
                None
            }
            Err(e) => {
                warn!(conn_type = %conn_type, error = %e, "dropping message");
                None
            }
        }
    }

    async fn dispatch(&self, msg: Message) -> Result<Option<Message>, HandlerError> {
        match msg.conn_type() {
            ConnType::Hello => self.handle_hello(&msg).await.map(Some),
            ConnType::Conf => self.handle_conf(msg).await.map(Some),
            ConnType::Ping => self.handle_ping(msg).await,
            ConnType::KeepAlive => {
                self.handle_keep_alive(&msg).await?;
                Ok(None)
            }
            ConnType::Value => Ok(None),
            ConnType::Unknown(other) => Err(HandlerError::UnimplementedConnType(other.clone())),
        }
    }

    async fn handle_hello(&self, msg: &Message) -> Result<Message, HandlerError> {
        let hello = Hello::from_message(msg)?;

        let outcome = match hello.global_id {
            Some(global_id) => self.reconnect(&hello, global_id).await?,
            None => self.register(&hello).await?,
        };

        if let Err(rejection) = outcome {
            warn!(
                local_id = %hello.local_id,
                hw_address = %hello.hw_address,
                reason = %rejection,
                "registration refused"
            );
        }

        Ok(hello.reply(outcome))
    }

    async fn reconnect(
        &self,
        hello: &Hello,
        global_id: GlobalId,
    ) -> Result<Result<GlobalId, Rejection>, HandlerError> {
        let Some(record) = self.registry.find_by_id(global_id).await else {
            return Ok(Err(Rejection::UnknownId));
        };
        if record.hw_address != hello.hw_address {
            return Ok(Err(Rejection::HwMismatch));
        }
        if record.local_id != hello.local_id {
            return Ok(Err(Rejection::LocalIdMismatch));
        }

        let now = Utc::now();
        self.registry.touch(global_id, now).await;
        if let Some(timeout) = record.configured_timeout() {
            self.registry.watch(global_id, timeout, now).await?;
        }

        info!(global_id, local_id = %hello.local_id, "device reconnected");
        Ok(Ok(global_id))
    }

    async fn register(&self, hello: &Hello) -> Result<Result<GlobalId, Rejection>, HandlerError> {
        let device_type = hello
            .device_type
            .clone()
            .ok_or(CodecError::MissingField(DEV_TYPE))?;
        let now = Utc::now();

        let lookup = self
            .registry
            .find_or_insert_with(&hello.local_id, &hello.hw_address, || DeviceRecord {
                global_id: self.allocator.next(),
                local_id: hello.local_id.clone(),
                hw_address: hello.hw_address.clone(),
                ip: hello.ip.clone(),
                device_type,
                host: hello.host,
                adapter_conf: Map::new(),
                monitored: false,
                last_contact: now,
            })
            .await?;

        match lookup {
            Lookup::Inserted(record) => {
                info!(
                    global_id = record.global_id,
                    local_id = %record.local_id,
                    device_type = %record.device_type,
                    "registered new device"
                );
                Ok(Ok(record.global_id))
            }
            Lookup::Existing(record) => {
                let silence = now
                    .signed_duration_since(record.last_contact)
                    .to_std()
                    .unwrap_or_default();
                if silence < self.grace_window {
                    debug!(
                        global_id = record.global_id,
                        "repeated HELLO within grace window, resending id"
                    );
                    self.registry.touch(record.global_id, now).await;
                    Ok(Ok(record.global_id))
                } else {
                    Ok(Err(Rejection::Declined))
                }
            }
        }
    }

    async fn handle_conf(&self, msg: Message) -> Result<Message, HandlerError> {
        let global_id = msg
            .global_id()?
            .ok_or(CodecError::MissingField(GLOBAL_ID))?;

        let mut conf = msg.into_fields();
        conf.remove(GLOBAL_ID);
        if let Some(Value::Object(nested)) = conf.remove(ADAPTER_CONF) {
            conf.extend(nested);
        }
        let timeout = conf.get(TIMEOUT).and_then(parse_timeout);

        let now = Utc::now();
        if !self.registry.merge_adapter_conf(global_id, conf, now).await? {
            warn!(global_id, "CONF for unknown device");
            return Ok(Messages::refusal(Rejection::UnknownId));
        }

        match timeout {
            Some(timeout) if timeout > 0 => {
                self.registry.watch(global_id, timeout, now).await?;
                info!(global_id, timeout, "device configured, monitoring");
            }
            _ => info!(global_id, "device configured"),
        }

        Ok(Messages::ack(global_id))
    }

    async fn handle_ping(&self, mut msg: Message) -> Result<Option<Message>, HandlerError> {
        if msg.get_str(PING_MSG) == Some(PING) {
            msg.insert(PING_MSG, PONG);
            return Ok(Some(msg));
        }

        if msg.get(TIMEOUT).is_some() {
            if let Some(global_id) = msg.global_id()? {
                self.heartbeat(global_id).await;
            }
        }

        Ok(None)
    }

    async fn handle_keep_alive(&self, msg: &Message) -> Result<(), HandlerError> {
        let global_id = msg
            .global_id()?
            .ok_or(CodecError::MissingField(GLOBAL_ID))?;
        self.heartbeat(global_id).await;
        Ok(())
    }

    async fn heartbeat(&self, global_id: GlobalId) {
        if self.registry.heartbeat(global_id, Utc::now()).await {
            debug!(global_id, "heartbeat");
        } else {
            warn!(global_id, "heartbeat from unknown device");
        }
    }
}
