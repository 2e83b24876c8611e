//! Wire envelope and the closed command set.
//!
//! Every frame on the wire is `{ "seq": <int>, "cmd": <string>, "body": ... }`.
//! `seq` is chosen by the client and echoed back untouched.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::address::Address;
use crate::conversation::Conversation;
use crate::errors::DecodeError;

pub const MSG_SEND: &str = "msg.send";
pub const MSG_LIST: &str = "msg.list";
pub const HEARTBEAT: &str = "heartbeat";

/// The wire unit. Inbound frames decode as `Envelope<Value>`; replies are
/// built with a concrete body type and encoded once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<B = Value> {
    #[serde(default)]
    pub seq: i64,
    #[serde(default)]
    pub cmd: String,
    #[serde(default)]
    pub body: B,
}

impl<B: Serialize> Envelope<B> {
    pub fn new(seq: i64, cmd: impl Into<String>, body: B) -> Self {
        Self {
            seq,
            cmd: cmd.into(),
            body,
        }
    }

    /// Serialize to a frame that can be shared across recipients.
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

impl Envelope<&'static str> {
    /// Reply to `heartbeat`. Always `seq: 0`, whatever the request carried.
    pub fn heartbeat_ack() -> Self {
        Self::new(0, HEARTBEAT, "pong")
    }
}

/// Body of `msg.send`, both inbound and as routed to participants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendBody {
    pub recipient: Address,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub body: String,
}

/// Body of `msg.list`. The cursor is accepted but not interpreted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListBody {
    #[serde(default)]
    pub cursor: String,
}

/// Per-participant conversation settings. Carried on the wire as `null`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSettings {
    pub nickname: String,
    pub pinned: bool,
    pub blocked: bool,
    pub last_synced: String,
    pub last_seen: Option<DateTime<Utc>>,
}

/// One element of the `msg.list` reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub conversation: Conversation,
    pub settings: Option<ConversationSettings>,
}

impl From<&Conversation> for ConversationEntry {
    fn from(conversation: &Conversation) -> Self {
        Self {
            conversation: conversation.clone(),
            settings: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Send(SendBody),
    List(ListBody),
    Heartbeat,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Send(_) => MSG_SEND,
            Self::List(_) => MSG_LIST,
            Self::Heartbeat => HEARTBEAT,
        }
    }
}

/// A decoded inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub seq: i64,
    pub command: Command,
}

impl Request {
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        let Envelope { seq, cmd, body } =
            serde_json::from_slice::<Envelope>(raw).map_err(DecodeError::Malformed)?;

        let command = match cmd.as_str() {
            MSG_SEND => Command::Send(body_as(MSG_SEND, body)?),
            MSG_LIST if body.is_null() => Command::List(ListBody::default()),
            MSG_LIST => Command::List(body_as(MSG_LIST, body)?),
            HEARTBEAT => Command::Heartbeat,
            _ => return Err(DecodeError::UnknownCommand(cmd.clone())),
        };

        Ok(Self { seq, command })
    }
}

fn body_as<T: DeserializeOwned>(cmd: &'static str, body: Value) -> Result<T, DecodeError> {
    serde_json::from_value(body).map_err(|source| DecodeError::InvalidBody { cmd, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> Result<Request, DecodeError> {
        Request::decode(value.to_string().as_bytes())
    }

    #[test]
    fn decodes_send() {
        let req = decode(json!({
            "seq": 1,
            "cmd": "msg.send",
            "body": {"recipient": "bob", "content_type": "text", "body": "hi"}
        }))
        .unwrap();
        assert_eq!(req.seq, 1);
        let Command::Send(body) = req.command else {
            panic!("expected msg.send");
        };
        assert_eq!(body.recipient.as_str(), "bob");
        assert_eq!(body.content_type, "text");
        assert_eq!(body.body, "hi");
    }

    #[test]
    fn send_defaults_optional_fields() {
        let req = decode(json!({"seq": 3, "cmd": "msg.send", "body": {"recipient": "bob"}})).unwrap();
        let Command::Send(body) = req.command else {
            panic!("expected msg.send");
        };
        assert!(body.content_type.is_empty());
        assert!(body.body.is_empty());
    }

    #[test]
    fn send_requires_recipient() {
        let err = decode(json!({"seq": 1, "cmd": "msg.send", "body": {"body": "hi"}})).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidBody { cmd: MSG_SEND, .. }));

        let err = decode(json!({"seq": 1, "cmd": "msg.send", "body": {"recipient": ""}})).unwrap_err();
        assert_eq!(err.reason(), "invalid_body");
    }

    #[test]
    fn list_accepts_missing_or_null_body() {
        let req = decode(json!({"seq": 9, "cmd": "msg.list"})).unwrap();
        assert_eq!(req.command, Command::List(ListBody::default()));

        let req = decode(json!({"seq": 9, "cmd": "msg.list", "body": null})).unwrap();
        assert_eq!(req.command, Command::List(ListBody::default()));

        let req = decode(json!({"seq": 9, "cmd": "msg.list", "body": {"cursor": "abc"}})).unwrap();
        assert_eq!(
            req.command,
            Command::List(ListBody {
                cursor: "abc".into()
            })
        );
    }

    #[test]
    fn heartbeat_ignores_body() {
        let req = decode(json!({"seq": 5, "cmd": "heartbeat", "body": {"anything": [1, 2]}})).unwrap();
        assert_eq!(req.command, Command::Heartbeat);
        assert_eq!(req.command.name(), "heartbeat");
    }

    #[test]
    fn missing_seq_defaults_to_zero() {
        let req = decode(json!({"cmd": "heartbeat"})).unwrap();
        assert_eq!(req.seq, 0);
    }

    #[test]
    fn unknown_command_is_rejected() {
        let err = decode(json!({"seq": 1, "cmd": "msg.delete", "body": {}})).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownCommand(ref c) if c == "msg.delete"));

        let err = decode(json!({"seq": 1})).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownCommand(ref c) if c.is_empty()));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = Request::decode(b"{not json").unwrap_err();
        assert_eq!(err.reason(), "malformed");
    }

    #[test]
    fn heartbeat_ack_wire_format() {
        let bytes = Envelope::heartbeat_ack().encode().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({"seq": 0, "cmd": "heartbeat", "body": "pong"}));
    }

    #[test]
    fn routed_send_echoes_request_shape() {
        let body = SendBody {
            recipient: Address::parse("bob").unwrap(),
            content_type: "text".into(),
            body: "hi".into(),
        };
        let bytes = Envelope::new(1, MSG_SEND, &body).encode().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            json!({"seq": 1, "cmd": "msg.send", "body": {"recipient": "bob", "content_type": "text", "body": "hi"}})
        );
    }

    #[test]
    fn empty_list_reply_is_an_array() {
        let entries: Vec<ConversationEntry> = Vec::new();
        let bytes = Envelope::new(2, MSG_LIST, entries).encode().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["body"], json!([]));
    }
}
