//! Core types and property model for the INDI protocol
//!
//! This crate provides the error type, protocol enumerations, value types and
//! the property/element model shared by drivers, servers and clients.

pub mod datatypes;
pub mod element;
pub mod error;
pub mod persistence;
pub mod property;
pub mod types;

pub use datatypes::{BlobValue, NumberFormat, Timestamp};
pub use element::{Element, ElementValue, NumberSpec};
pub use error::{IndiError, IndiResult};
pub use persistence::{FileStore, PropertyKey, PropertySnapshot, PropertyStore};
pub use property::{Property, PropertyBuilder};
pub use types::{
    BlobEnable, LightState, PropertyKind, PropertyPermission, PropertyState, SwitchRule,
    SwitchStatus,
};

/// Protocol version advertised in `getProperties`
pub const PROTOCOL_VERSION: &str = "1.7";

/// Default INDI TCP port
pub const DEFAULT_PORT: u16 = 7624;
