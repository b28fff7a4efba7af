//! The wire envelope: `{header: {...}, body: ...}`.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::purpose::Purpose;
use crate::version::ProtocolVersion;

/// `requestId` correlates a request frame with its response(s).
///
/// The all-zeros UUID is the sentinel meaning "no correlation" — frames
/// that aren't part of a request/response exchange (events, chat
/// notifications) carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub const SENTINEL: RequestId = RequestId(Uuid::nil());

    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_sentinel(self) -> bool {
        self.0.is_nil()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::SENTINEL
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Purpose-dependent header fields. Which of these are present depends on
/// `purpose` and, for events, on the negotiated protocol version (see
/// [`ProtocolVersion::event_name_in_header`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraHeaders {
    #[serde(rename = "eventName", default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,

    #[serde(rename = "dataType", default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub data_response_type: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(rename = "actionName", default, skip_serializing_if = "Option::is_none")]
    pub action_name: Option<String>,
}

impl ExtraHeaders {
    pub fn with_event_name(name: impl Into<String>) -> Self {
        Self {
            event_name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_data_type(data_type: impl Into<String>) -> Self {
        Self {
            data_type: Some(data_type.into()),
            data_response_type: Some(0),
            ..Default::default()
        }
    }

    pub fn with_action(action: impl Into<String>, action_name: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            action_name: Some(action_name.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub version: ProtocolVersion,

    #[serde(rename = "requestId")]
    pub request_id: RequestId,

    #[serde(rename = "messagePurpose")]
    pub purpose: Purpose,

    #[serde(flatten)]
    pub extra: ExtraHeaders,
}

impl Header {
    pub fn new(version: ProtocolVersion, purpose: Purpose) -> Self {
        Self {
            version,
            request_id: RequestId::SENTINEL,
            purpose,
            extra: ExtraHeaders::default(),
        }
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_extra(mut self, extra: ExtraHeaders) -> Self {
        self.extra = extra;
        self
    }
}

/// One decoded `{header, body}` envelope, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub header: Header,
    pub body: serde_json::Value,
}

impl Frame {
    pub fn new(version: ProtocolVersion, purpose: Purpose, body: serde_json::Value) -> Self {
        Self {
            header: Header::new(version, purpose),
            body,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.header.request_id
    }

    pub fn purpose(&self) -> &Purpose {
        &self.header.purpose
    }

    /// The event name resolved per §4.4: header first, then body, else empty.
    pub fn resolved_event_name(&self) -> String {
        if let Some(name) = &self.header.extra.event_name {
            return name.clone();
        }
        self.body
            .get("eventName")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_default()
    }
}
