//! Structured INDI messages
//!
//! One variant per top-level wire element. Vector messages carry the property
//! kind as a field instead of having one variant per kind, so routing code
//! can treat `defTextVector` and `defBLOBVector` alike.

use indi_core::{
    BlobEnable, ElementValue, NumberSpec, PropertyKind, PropertyPermission, PropertyState,
    SwitchRule, Timestamp,
};

/// Bounds sent along with a number value in `set` vectors
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumberBounds {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl From<&NumberSpec> for NumberBounds {
    fn from(spec: &NumberSpec) -> Self {
        Self {
            min: spec.min,
            max: spec.max,
            step: spec.step,
        }
    }
}

/// `getProperties`: subscribe, optionally scoped to a device or property
#[derive(Debug, Clone, PartialEq)]
pub struct GetProperties {
    pub version: String,
    pub device: Option<String>,
    pub name: Option<String>,
}

impl GetProperties {
    pub fn new(device: Option<&str>, name: Option<&str>) -> Self {
        Self {
            version: indi_core::PROTOCOL_VERSION.to_string(),
            device: device.map(str::to_string),
            name: name.map(str::to_string),
        }
    }
}

/// Element inside a `def*Vector`
#[derive(Debug, Clone, PartialEq)]
pub struct DefElement {
    pub name: String,
    pub label: Option<String>,
    /// BLOB definitions carry no payload; they decode to an empty value
    pub value: ElementValue,
    /// Present on number elements only
    pub number: Option<NumberSpec>,
}

/// `def*Vector`: full definition of a property
#[derive(Debug, Clone, PartialEq)]
pub struct DefVector {
    pub kind: PropertyKind,
    pub device: String,
    pub name: String,
    pub label: Option<String>,
    pub group: Option<String>,
    pub state: PropertyState,
    pub permission: Option<PropertyPermission>,
    pub rule: Option<SwitchRule>,
    pub timeout: Option<u32>,
    pub timestamp: Option<Timestamp>,
    pub message: Option<String>,
    pub elements: Vec<DefElement>,
}

/// `one*` element inside `set*Vector` and `new*Vector`
#[derive(Debug, Clone, PartialEq)]
pub struct OneElement {
    pub name: String,
    pub value: ElementValue,
    pub bounds: Option<NumberBounds>,
}

impl OneElement {
    pub fn new(name: &str, value: ElementValue) -> Self {
        Self {
            name: name.to_string(),
            value,
            bounds: None,
        }
    }
}

/// `set*Vector`: current values of a defined property
#[derive(Debug, Clone, PartialEq)]
pub struct SetVector {
    pub kind: PropertyKind,
    pub device: String,
    pub name: String,
    pub state: Option<PropertyState>,
    pub timeout: Option<u32>,
    pub timestamp: Option<Timestamp>,
    pub message: Option<String>,
    pub elements: Vec<OneElement>,
}

/// `new*Vector`: values a client wants the device to apply
#[derive(Debug, Clone, PartialEq)]
pub struct NewVector {
    pub kind: PropertyKind,
    pub device: String,
    pub name: String,
    pub timestamp: Option<Timestamp>,
    pub elements: Vec<OneElement>,
}

/// `message`: free text, optionally attributed to a device
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    pub device: Option<String>,
    pub timestamp: Option<Timestamp>,
    pub message: Option<String>,
}

/// `delProperty`: a property, or the whole device when `name` is absent, is gone
#[derive(Debug, Clone, PartialEq)]
pub struct DelProperty {
    pub device: String,
    pub name: Option<String>,
    pub timestamp: Option<Timestamp>,
    pub message: Option<String>,
}

/// `enableBLOB`: BLOB delivery policy for a device or one property
#[derive(Debug, Clone, PartialEq)]
pub struct EnableBlob {
    pub device: String,
    pub name: Option<String>,
    pub policy: BlobEnable,
}

/// Any top-level INDI message
#[derive(Debug, Clone, PartialEq)]
pub enum IndiMessage {
    GetProperties(GetProperties),
    Def(DefVector),
    Set(SetVector),
    New(NewVector),
    Message(Message),
    DelProperty(DelProperty),
    EnableBlob(EnableBlob),
}

impl IndiMessage {
    /// Device the message is about, if any
    pub fn device(&self) -> Option<&str> {
        match self {
            IndiMessage::GetProperties(m) => m.device.as_deref(),
            IndiMessage::Def(m) => Some(&m.device),
            IndiMessage::Set(m) => Some(&m.device),
            IndiMessage::New(m) => Some(&m.device),
            IndiMessage::Message(m) => m.device.as_deref(),
            IndiMessage::DelProperty(m) => Some(&m.device),
            IndiMessage::EnableBlob(m) => Some(&m.device),
        }
    }

    /// Property the message is about, if any
    pub fn property_name(&self) -> Option<&str> {
        match self {
            IndiMessage::GetProperties(m) => m.name.as_deref(),
            IndiMessage::Def(m) => Some(&m.name),
            IndiMessage::Set(m) => Some(&m.name),
            IndiMessage::New(m) => Some(&m.name),
            IndiMessage::Message(_) => None,
            IndiMessage::DelProperty(m) => m.name.as_deref(),
            IndiMessage::EnableBlob(m) => m.name.as_deref(),
        }
    }

    /// Property kind of vector messages
    pub fn kind(&self) -> Option<PropertyKind> {
        match self {
            IndiMessage::Def(m) => Some(m.kind),
            IndiMessage::Set(m) => Some(m.kind),
            IndiMessage::New(m) => Some(m.kind),
            _ => None,
        }
    }

    pub fn is_blob(&self) -> bool {
        self.kind().is_some_and(|k| k.is_blob())
    }

    /// Wire tag of the message
    pub fn tag(&self) -> String {
        match self {
            IndiMessage::GetProperties(_) => "getProperties".to_string(),
            IndiMessage::Def(m) => format!("def{}Vector", m.kind.tag_fragment()),
            IndiMessage::Set(m) => format!("set{}Vector", m.kind.tag_fragment()),
            IndiMessage::New(m) => format!("new{}Vector", m.kind.tag_fragment()),
            IndiMessage::Message(_) => "message".to_string(),
            IndiMessage::DelProperty(_) => "delProperty".to_string(),
            IndiMessage::EnableBlob(_) => "enableBLOB".to_string(),
        }
    }
}
