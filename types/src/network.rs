//! Network identifiers and protocol version constants.

use serde::{Deserialize, Serialize};

/// Identifies which Quill network a node is connected to.
///
/// The two-byte wire identifier is sent big-endian at the front of every
/// message header; peers on a different network are rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    /// Local development network.
    Dev,
    /// The public beta network.
    Beta,
    /// The production network.
    Live,
    /// The continuous-integration test network.
    Test,
}

impl NetworkId {
    /// Two-byte identifier placed at the start of every message header.
    pub fn wire_id(&self) -> u16 {
        match self {
            Self::Dev => 0x5141,  // "QA"
            Self::Beta => 0x5142, // "QB"
            Self::Live => 0x5143, // "QC"
            Self::Test => 0x5158, // "QX"
        }
    }

    pub fn from_wire_id(id: u16) -> Option<Self> {
        match id {
            0x5141 => Some(Self::Dev),
            0x5142 => Some(Self::Beta),
            0x5143 => Some(Self::Live),
            0x5158 => Some(Self::Test),
            _ => None,
        }
    }

    /// Default peering port for this network.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Dev => 44000,
            Self::Beta => 54000,
            Self::Live => 7075,
            Self::Test => 17075,
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Dev)
    }

    /// Human-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Beta => "beta",
            Self::Live => "live",
            Self::Test => "test",
        }
    }
}

/// Protocol version triple carried in every message header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolInfo {
    /// Highest protocol version this node understands.
    pub version_max: u8,
    /// Version this node speaks.
    pub version_using: u8,
    /// Oldest version this node still accepts from peers.
    pub version_min: u8,
}

impl ProtocolInfo {
    /// Minimum peer version required to participate in ascending bootstrap.
    pub const BOOTSTRAP_VERSION_MIN: u8 = 19;
}

impl Default for ProtocolInfo {
    fn default() -> Self {
        Self {
            version_max: 19,
            version_using: 19,
            version_min: 18,
        }
    }
}
