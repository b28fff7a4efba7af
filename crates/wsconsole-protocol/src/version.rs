//! Wire protocol versions.
//!
//! The version travels as a plain integer in `header.version`. Dialect
//! decisions (legacy vs. V2 encryption, event-name placement) branch on
//! comparisons against these values, so the enum is ordered by its
//! underlying wire value rather than declaration order.

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// A protocol version as carried in `header.version`.
///
/// Declared with explicit discriminants matching the wire integers, and
/// `repr(i64)` so comparisons (`version < ProtocolVersion::V1_0_0`) compile
/// directly against the wire ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize_repr, Deserialize_repr)]
#[repr(i64)]
pub enum ProtocolVersion {
    V0_0_1 = 0x1,
    V0_0_2 = 0x2,
    V0_0_3 = 0x3,
    V0_0_4 = 0x4,
    V1_0_0 = 0x1000000,
    V1_1_0 = 0x1010000,
    V1_2_0 = 0x1020000,
    V1_3_0 = 0x1030000,
    V1_4_0 = 0x1040000,
}

impl ProtocolVersion {
    /// The lowest version a freshly-created session negotiates at.
    pub const MIN: ProtocolVersion = ProtocolVersion::V0_0_1;

    /// The version at which the V2 (`ws:encrypt`) handshake dialect applies.
    /// Versions below this use the legacy `enableencryption` command piggyback.
    pub const ENCRYPT_V2_FLOOR: ProtocolVersion = ProtocolVersion::V1_0_0;

    /// The version at which `eventName` moves from the body to the header
    /// on outbound event frames.
    pub const EVENT_NAME_IN_HEADER_FLOOR: ProtocolVersion = ProtocolVersion::V1_1_0;

    pub fn from_wire(value: i64) -> Option<Self> {
        match value {
            0x1 => Some(Self::V0_0_1),
            0x2 => Some(Self::V0_0_2),
            0x3 => Some(Self::V0_0_3),
            0x4 => Some(Self::V0_0_4),
            0x1000000 => Some(Self::V1_0_0),
            0x1010000 => Some(Self::V1_1_0),
            0x1020000 => Some(Self::V1_2_0),
            0x1030000 => Some(Self::V1_3_0),
            0x1040000 => Some(Self::V1_4_0),
            _ => None,
        }
    }

    pub fn wire_value(self) -> i64 {
        self as i64
    }

    pub fn uses_legacy_encryption(self) -> bool {
        self < Self::ENCRYPT_V2_FLOOR
    }

    pub fn event_name_in_header(self) -> bool {
        self >= Self::EVENT_NAME_IN_HEADER_FLOOR
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::MIN
    }
}

/// Independent command version carried in `body.version` for command
/// requests. This implementation only needs to propagate it, not interpret
/// its meaning (`1..=0x24` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandVersion(pub u32);

impl CommandVersion {
    /// The version most of this implementation's examples were written
    /// against; callers can always supply their own.
    pub const DEFAULT: CommandVersion = CommandVersion(1);
}

impl Default for CommandVersion {
    fn default() -> Self {
        Self::DEFAULT
    }
}
