//! `messagePurpose` values — the string that selects dispatch.
//!
//! The wire format uses flat strings (`"commandRequest"`, `"data:block"`,
//! `"action:agent"`, ...). We model them as a closed enum with a couple of
//! parameterized variants for the `data:<name>` family and an escape hatch
//! for anything this implementation doesn't know about, since unknown
//! purposes must still round-trip to the `customFrame` fallback rather than
//! fail to decode.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The three built-in catalog data types the game exposes, plus anything
/// else a caller asks to fetch by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    Block,
    Item,
    Mob,
    Other(String),
}

impl DataType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Block => "block",
            Self::Item => "item",
            Self::Mob => "mob",
            Self::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "block" => Self::Block,
            "item" => Self::Item,
            "mob" => Self::Mob,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A frame's `messagePurpose`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Purpose {
    /// driver -> game: invoke a command.
    CommandRequest,
    /// game -> driver: command result.
    CommandResponse,
    /// driver -> game: start listening to an event name.
    Subscribe,
    /// driver -> game: stop listening to an event name.
    Unsubscribe,
    /// game -> driver: an unsolicited event notification.
    Event,
    /// both directions: agent (NPC) action request/response.
    ActionAgent,
    /// driver -> game: install a chat filter.
    ChatSubscribe,
    /// driver -> game: remove a chat filter.
    ChatUnsubscribe,
    /// game -> driver: a chat message matching an active filter.
    Chat,
    /// driver -> game: fetch catalog data of the given type.
    FetchData(DataType),
    /// game -> driver: catalog data response; the type rides in the header.
    Data,
    /// game -> driver: a protocol-level error.
    Error,
    /// both directions: the V2 encryption handshake frame.
    WsEncrypt,
    /// anything this implementation does not recognize; preserved verbatim
    /// so the fallback `customFrame` channel can still see the real string.
    Custom(String),
}

impl Purpose {
    pub fn wire_value(&self) -> String {
        match self {
            Self::CommandRequest => "commandRequest".to_string(),
            Self::CommandResponse => "commandResponse".to_string(),
            Self::Subscribe => "subscribe".to_string(),
            Self::Unsubscribe => "unsubscribe".to_string(),
            Self::Event => "event".to_string(),
            Self::ActionAgent => "action:agent".to_string(),
            Self::ChatSubscribe => "chat:subscribe".to_string(),
            Self::ChatUnsubscribe => "chat:unsubscribe".to_string(),
            Self::Chat => "chat".to_string(),
            Self::FetchData(dt) => format!("data:{dt}"),
            Self::Data => "data".to_string(),
            Self::Error => "error".to_string(),
            Self::WsEncrypt => "ws:encrypt".to_string(),
            Self::Custom(s) => s.clone(),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "commandRequest" => Self::CommandRequest,
            "commandResponse" => Self::CommandResponse,
            "subscribe" => Self::Subscribe,
            "unsubscribe" => Self::Unsubscribe,
            "event" => Self::Event,
            "action:agent" => Self::ActionAgent,
            "chat:subscribe" => Self::ChatSubscribe,
            "chat:unsubscribe" => Self::ChatUnsubscribe,
            "chat" => Self::Chat,
            "data" => Self::Data,
            "error" => Self::Error,
            "ws:encrypt" => Self::WsEncrypt,
            other => match other.strip_prefix("data:") {
                Some(name) => Self::FetchData(DataType::parse(name)),
                None => Self::Custom(other.to_string()),
            },
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_value())
    }
}

impl Serialize for Purpose {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.wire_value())
    }
}

struct PurposeVisitor;

impl Visitor<'_> for PurposeVisitor {
    type Value = Purpose;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a messagePurpose string")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Purpose::parse(v))
    }
}

impl<'de> Deserialize<'de> for Purpose {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(PurposeVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_purposes() {
        assert_eq!(Purpose::parse("commandRequest"), Purpose::CommandRequest);
        assert_eq!(Purpose::parse("chat:unsubscribe"), Purpose::ChatUnsubscribe);
        assert_eq!(Purpose::parse("ws:encrypt"), Purpose::WsEncrypt);
    }

    #[test]
    fn test_parse_data_request_purposes() {
        assert_eq!(Purpose::parse("data:block"), Purpose::FetchData(DataType::Block));
        assert_eq!(
            Purpose::parse("data:custom_thing"),
            Purpose::FetchData(DataType::Other("custom_thing".into()))
        );
    }

    #[test]
    fn test_parse_unknown_falls_back_to_custom() {
        assert_eq!(Purpose::parse("somethingElse"), Purpose::Custom("somethingElse".into()));
    }

    #[test]
    fn test_wire_value_roundtrip() {
        for p in [
            Purpose::CommandRequest,
            Purpose::FetchData(DataType::Item),
            Purpose::Custom("weird:thing".into()),
        ] {
            let wire = p.wire_value();
            assert_eq!(Purpose::parse(&wire), p);
        }
    }

    #[test]
    fn test_json_serialize_is_plain_string() {
        let json = serde_json::to_string(&Purpose::ChatSubscribe).unwrap();
        assert_eq!(json, "\"chat:subscribe\"");
    }
}
