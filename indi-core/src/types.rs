//! Enumerated protocol values shared by properties, elements and messages
//!
//! Every enum renders to (and parses from) the exact token used on the wire.
//! Parsing trims surrounding whitespace but is otherwise case sensitive, the
//! same way peers write these tokens.

use crate::error::{IndiError, IndiResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Property state (also used as the value of Light elements)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyState {
    Idle,
    Ok,
    Busy,
    Alert,
}

/// Light elements carry the same four-valued status as properties
pub type LightState = PropertyState;

impl PropertyState {
    /// Wire token
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyState::Idle => "Idle",
            PropertyState::Ok => "Ok",
            PropertyState::Busy => "Busy",
            PropertyState::Alert => "Alert",
        }
    }
}

impl FromStr for PropertyState {
    type Err = IndiError;

    fn from_str(s: &str) -> IndiResult<Self> {
        match s.trim() {
            "Idle" => Ok(PropertyState::Idle),
            "Ok" => Ok(PropertyState::Ok),
            "Busy" => Ok(PropertyState::Busy),
            "Alert" => Ok(PropertyState::Alert),
            other => Err(IndiError::InvalidData(format!("Invalid state: {}", other))),
        }
    }
}

/// Access permission of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyPermission {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl PropertyPermission {
    /// Wire token
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyPermission::ReadOnly => "ro",
            PropertyPermission::WriteOnly => "wo",
            PropertyPermission::ReadWrite => "rw",
        }
    }
}

impl FromStr for PropertyPermission {
    type Err = IndiError;

    fn from_str(s: &str) -> IndiResult<Self> {
        match s.trim() {
            "ro" => Ok(PropertyPermission::ReadOnly),
            "wo" => Ok(PropertyPermission::WriteOnly),
            "rw" => Ok(PropertyPermission::ReadWrite),
            other => Err(IndiError::InvalidData(format!("Invalid permission: {}", other))),
        }
    }
}

/// Occupancy rule of a switch property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwitchRule {
    /// Exactly one element ON
    OneOfMany,
    /// Zero or one element ON
    AtMostOne,
    /// Unconstrained
    AnyOfMany,
}

impl SwitchRule {
    /// Wire token
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchRule::OneOfMany => "OneOfMany",
            SwitchRule::AtMostOne => "AtMostOne",
            SwitchRule::AnyOfMany => "AnyOfMany",
        }
    }

    /// Whether turning one element ON must turn every sibling OFF
    pub fn is_exclusive(&self) -> bool {
        matches!(self, SwitchRule::OneOfMany | SwitchRule::AtMostOne)
    }
}

impl FromStr for SwitchRule {
    type Err = IndiError;

    fn from_str(s: &str) -> IndiResult<Self> {
        match s.trim() {
            "OneOfMany" => Ok(SwitchRule::OneOfMany),
            "AtMostOne" => Ok(SwitchRule::AtMostOne),
            "AnyOfMany" => Ok(SwitchRule::AnyOfMany),
            other => Err(IndiError::InvalidData(format!("Invalid switch rule: {}", other))),
        }
    }
}

/// Value of a switch element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwitchStatus {
    On,
    Off,
}

impl SwitchStatus {
    /// Wire token
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchStatus::On => "On",
            SwitchStatus::Off => "Off",
        }
    }

    pub fn is_on(&self) -> bool {
        *self == SwitchStatus::On
    }
}

impl From<bool> for SwitchStatus {
    fn from(on: bool) -> Self {
        if on { SwitchStatus::On } else { SwitchStatus::Off }
    }
}

impl FromStr for SwitchStatus {
    type Err = IndiError;

    fn from_str(s: &str) -> IndiResult<Self> {
        match s.trim() {
            "On" => Ok(SwitchStatus::On),
            "Off" => Ok(SwitchStatus::Off),
            other => Err(IndiError::InvalidData(format!("Invalid switch status: {}", other))),
        }
    }
}

/// BLOB delivery policy requested by a peer through `enableBLOB`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlobEnable {
    /// No BLOBs (the default when nothing was requested)
    Never,
    /// BLOBs interleaved with the rest of the traffic
    Also,
    /// BLOBs and nothing else
    Only,
}

impl BlobEnable {
    /// Wire token
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobEnable::Never => "Never",
            BlobEnable::Also => "Also",
            BlobEnable::Only => "Only",
        }
    }
}

impl FromStr for BlobEnable {
    type Err = IndiError;

    fn from_str(s: &str) -> IndiResult<Self> {
        match s.trim() {
            "Never" => Ok(BlobEnable::Never),
            "Also" => Ok(BlobEnable::Also),
            "Only" => Ok(BlobEnable::Only),
            other => Err(IndiError::InvalidData(format!("Invalid BLOB policy: {}", other))),
        }
    }
}

/// Kind of a property and of every element inside it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyKind {
    Text,
    Number,
    Switch,
    Light,
    Blob,
}

impl PropertyKind {
    /// Kind fragment used in the vector and element tag names
    /// (`defTextVector`, `oneBLOB`, ...)
    pub fn tag_fragment(&self) -> &'static str {
        match self {
            PropertyKind::Text => "Text",
            PropertyKind::Number => "Number",
            PropertyKind::Switch => "Switch",
            PropertyKind::Light => "Light",
            PropertyKind::Blob => "BLOB",
        }
    }

    /// Parse a tag fragment back into a kind
    pub fn from_tag_fragment(fragment: &str) -> Option<Self> {
        match fragment {
            "Text" => Some(PropertyKind::Text),
            "Number" => Some(PropertyKind::Number),
            "Switch" => Some(PropertyKind::Switch),
            "Light" => Some(PropertyKind::Light),
            "BLOB" => Some(PropertyKind::Blob),
            _ => None,
        }
    }

    pub fn is_blob(&self) -> bool {
        *self == PropertyKind::Blob
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.as_str())
                }
            }
        )*
    };
}

display_as_str!(PropertyState, PropertyPermission, SwitchRule, SwitchStatus, BlobEnable);

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag_fragment())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_tokens() {
        for state in [PropertyState::Idle, PropertyState::Ok, PropertyState::Busy, PropertyState::Alert] {
            assert_eq!(state.as_str().parse::<PropertyState>().unwrap(), state);
        }
        assert!("OK".parse::<PropertyState>().is_err());
        assert_eq!(" Busy ".parse::<PropertyState>().unwrap(), PropertyState::Busy);
    }

    #[test]
    fn test_permission_tokens() {
        assert_eq!("rw".parse::<PropertyPermission>().unwrap(), PropertyPermission::ReadWrite);
        assert_eq!(PropertyPermission::WriteOnly.to_string(), "wo");
        assert!("rx".parse::<PropertyPermission>().is_err());
    }

    #[test]
    fn test_switch_rule_exclusive() {
        assert!(SwitchRule::OneOfMany.is_exclusive());
        assert!(SwitchRule::AtMostOne.is_exclusive());
        assert!(!SwitchRule::AnyOfMany.is_exclusive());
    }

    #[test]
    fn test_blob_enable_tokens() {
        assert_eq!("Only".parse::<BlobEnable>().unwrap(), BlobEnable::Only);
        assert!("only".parse::<BlobEnable>().is_err());
    }

    #[test]
    fn test_kind_fragments() {
        assert_eq!(PropertyKind::Blob.tag_fragment(), "BLOB");
        assert_eq!(PropertyKind::from_tag_fragment("Number"), Some(PropertyKind::Number));
        assert_eq!(PropertyKind::from_tag_fragment("Blob"), None);
    }
}
