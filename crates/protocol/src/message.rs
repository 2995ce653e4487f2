//! The logical wire message and its constructors.

use crate::value::EngineValue;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The command carried by a request message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Session handshake; always carries `id = -1`.
    Init,
    /// Register a new table with the engine.
    CreateTable,
    /// Derive a new view from a registered table.
    CreateView,
    /// Invoke a method on a registered table.
    CallTableMethod,
    /// Invoke a method on a registered view.
    CallViewMethod,
}

/// Error payload carried by an error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Error code for categorization.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl WireError {
    /// Create a new wire error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// The id used by the `init` handshake message.
pub const INIT_ID: i64 = -1;

const fn is_false(v: &bool) -> bool {
    !*v
}

/// A single logical wire message.
///
/// Requests carry `cmd` plus command-specific fields; responses carry
/// exactly one of `data` / `error` and echo the request `id`. Server push
/// notifications reuse the subscribing request's id. `binary_length` is
/// present if and only if a raw binary payload follows on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Request/response correlation key.
    pub id: i64,

    /// Command, present on requests only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Command>,

    /// Name of the table or view this message targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,

    /// Method name, required for method-call commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Ordered positional arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<EngineValue>,

    /// Whether this request establishes a subscription.
    #[serde(default, skip_serializing_if = "is_false")]
    pub subscribe: bool,

    /// Callback correlation id, present when subscribing or unsubscribing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<u32>,

    /// Response payload. Mutually exclusive with `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EngineValue>,

    /// Response error. Mutually exclusive with `data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,

    /// Announced length of the binary payload that follows, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_length: Option<u64>,
}

impl Message {
    fn bare(id: i64) -> Self {
        Self {
            id,
            cmd: None,
            target_name: None,
            method: None,
            args: Vec::new(),
            subscribe: false,
            callback_id: None,
            data: None,
            error: None,
            binary_length: None,
        }
    }

    /// The session handshake request.
    #[must_use]
    pub fn init() -> Self {
        Self {
            cmd: Some(Command::Init),
            ..Self::bare(INIT_ID)
        }
    }

    /// A `create_table` request. `args[0]` is the initial data or schema;
    /// `args[1]` is the options mapping.
    #[must_use]
    pub fn create_table(
        id: i64,
        name: impl Into<String>,
        data_or_schema: EngineValue,
        options: EngineValue,
    ) -> Self {
        Self {
            cmd: Some(Command::CreateTable),
            target_name: Some(name.into()),
            args: vec![data_or_schema, options],
            ..Self::bare(id)
        }
    }

    /// A `create_view` request. `args[0]` is the view configuration;
    /// `args[1]` names the view, or is null to let the server pick a name.
    #[must_use]
    pub fn create_view(
        id: i64,
        table_name: impl Into<String>,
        view_name: Option<String>,
        config: EngineValue,
    ) -> Self {
        Self {
            cmd: Some(Command::CreateView),
            target_name: Some(table_name.into()),
            args: vec![
                config,
                view_name.map_or(EngineValue::Null, EngineValue::Str),
            ],
            ..Self::bare(id)
        }
    }

    /// A `call_table_method` request.
    #[must_use]
    pub fn table_method(
        id: i64,
        target: impl Into<String>,
        method: impl Into<String>,
        args: Vec<EngineValue>,
    ) -> Self {
        Self {
            cmd: Some(Command::CallTableMethod),
            target_name: Some(target.into()),
            method: Some(method.into()),
            args,
            ..Self::bare(id)
        }
    }

    /// A `call_view_method` request.
    #[must_use]
    pub fn view_method(
        id: i64,
        target: impl Into<String>,
        method: impl Into<String>,
        args: Vec<EngineValue>,
    ) -> Self {
        Self {
            cmd: Some(Command::CallViewMethod),
            target_name: Some(target.into()),
            method: Some(method.into()),
            args,
            ..Self::bare(id)
        }
    }

    /// Mark this request as a subscription with the given callback id.
    #[must_use]
    pub fn with_subscription(mut self, callback_id: u32) -> Self {
        self.subscribe = true;
        self.callback_id = Some(callback_id);
        self
    }

    /// Attach a callback id without subscribing (unsubscribe requests).
    #[must_use]
    pub fn with_callback_id(mut self, callback_id: u32) -> Self {
        self.callback_id = Some(callback_id);
        self
    }

    /// A successful response carrying `data`.
    #[must_use]
    pub fn response(id: i64, data: EngineValue) -> Self {
        Self {
            data: Some(data),
            ..Self::bare(id)
        }
    }

    /// An error response. Never carries `data`.
    #[must_use]
    pub fn error_response(id: i64, error: WireError) -> Self {
        Self {
            error: Some(error),
            ..Self::bare(id)
        }
    }

    /// A subscription push notification, reusing the subscribing request's
    /// id so the client can correlate it with the stored callback.
    #[must_use]
    pub fn push(id: i64, callback_id: u32, data: EngineValue) -> Self {
        Self {
            callback_id: Some(callback_id),
            data: Some(data),
            ..Self::bare(id)
        }
    }

    /// Whether this message is a response or push (no command).
    #[must_use]
    pub const fn is_response(&self) -> bool {
        self.cmd.is_none()
    }

    /// Extract the binary payload from this message, if any, leaving a
    /// stable placeholder behind so argument positions do not shift.
    ///
    /// Checked in order: the first positional argument, a `data` mapping's
    /// `"delta"` entry, the whole `data` value. [`Message::attach_binary`]
    /// is the exact inverse on the receiving side.
    pub fn take_binary(&mut self) -> Option<Bytes> {
        if let Some(first) = self.args.first_mut() {
            if first.is_binary() {
                if let EngineValue::Binary(bytes) =
                    std::mem::replace(first, EngineValue::Str(String::new()))
                {
                    return Some(bytes);
                }
            }
        }

        if let Some(EngineValue::Mapping(map)) = &mut self.data {
            if map.get("delta").is_some_and(EngineValue::is_binary) {
                if let Some(EngineValue::Binary(bytes)) =
                    map.insert("delta".to_string(), EngineValue::Str(String::new()))
                {
                    return Some(bytes);
                }
            }
        }

        if self.data.as_ref().is_some_and(EngineValue::is_binary) {
            if let Some(EngineValue::Binary(bytes)) = self.data.take() {
                return Some(bytes);
            }
        }

        None
    }

    /// Reattach a completed binary payload to the slot it was extracted
    /// from: requests to `args[0]`, pushes to the `data` mapping's
    /// `"delta"` entry, other responses to `data` itself.
    pub fn attach_binary(&mut self, bytes: Bytes) {
        self.binary_length = None;

        if self.cmd.is_some() {
            if let Some(first) = self.args.first_mut() {
                *first = EngineValue::Binary(bytes);
            } else {
                self.args.push(EngineValue::Binary(bytes));
            }
            return;
        }

        if let Some(EngineValue::Mapping(map)) = &mut self.data {
            if map.contains_key("delta") {
                map.insert("delta".to_string(), EngineValue::Binary(bytes));
                return;
            }
        }

        self.data = Some(EngineValue::Binary(bytes));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_json_shape() {
        let msg = Message::table_method(
            7,
            "t1",
            "update",
            vec![EngineValue::Int(1), EngineValue::empty_mapping()],
        );
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();

        assert_eq!(json["id"], 7);
        assert_eq!(json["cmd"], "call_table_method");
        assert_eq!(json["target_name"], "t1");
        assert_eq!(json["method"], "update");
        // Absent optionals are omitted entirely, not nulled.
        assert!(json.get("error").is_none());
        assert!(json.get("subscribe").is_none());
        assert!(json.get("binary_length").is_none());
    }

    #[test]
    fn test_response_roundtrip() {
        let msg = Message::response(3, EngineValue::mapping([("a", EngineValue::Int(1))]));
        let decoded: Message =
            serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(msg, decoded);
        assert!(decoded.is_response());
    }

    #[test]
    fn test_take_binary_keeps_argument_positions() {
        let payload = Bytes::from_static(b"\x00\x01\x02");
        let mut msg = Message::table_method(
            1,
            "t1",
            "update",
            vec![
                EngineValue::Binary(payload.clone()),
                EngineValue::mapping([("port_id", EngineValue::Int(2))]),
            ],
        );

        let taken = msg.take_binary().unwrap();
        assert_eq!(taken, payload);
        // Placeholder keeps the options argument at position 1.
        assert_eq!(msg.args[0], EngineValue::Str(String::new()));
        assert_eq!(msg.args[1].get("port_id"), Some(&EngineValue::Int(2)));

        msg.attach_binary(taken);
        assert_eq!(msg.args[0], EngineValue::Binary(payload));
    }

    #[test]
    fn test_take_binary_from_push_delta() {
        let payload = Bytes::from_static(b"rows");
        let mut msg = Message::push(
            5,
            9,
            EngineValue::mapping([
                ("port_id", EngineValue::Int(0)),
                ("delta", EngineValue::Binary(payload.clone())),
            ]),
        );

        let taken = msg.take_binary().unwrap();
        assert_eq!(taken, payload);

        msg.attach_binary(taken);
        assert_eq!(
            msg.data.as_ref().unwrap().get("delta"),
            Some(&EngineValue::Binary(payload))
        );
    }
}
