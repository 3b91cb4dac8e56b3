//! INDI message encoder
//!
//! Attributes are written in a fixed order (device, name, label, group, state,
//! perm, rule, timeout, timestamp, message) so output is stable across runs.

use crate::message::{
    DefElement, DefVector, DelProperty, EnableBlob, GetProperties, IndiMessage, Message,
    NewVector, OneElement, SetVector,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use indi_core::datatypes::format_wire_number;
use indi_core::{ElementValue, IndiError, IndiResult, PropertyKind, Timestamp};
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

/// Serializes messages into XML fragments, one per message
pub struct IndiMessageEncoder;

impl IndiMessageEncoder {
    /// Encode one message, terminated by a newline
    pub fn encode(message: &IndiMessage) -> IndiResult<Bytes> {
        let mut writer = Writer::new(Vec::new());

        match message {
            IndiMessage::GetProperties(m) => encode_get_properties(&mut writer, m)?,
            IndiMessage::Def(m) => encode_def_vector(&mut writer, m)?,
            IndiMessage::Set(m) => encode_set_vector(&mut writer, m)?,
            IndiMessage::New(m) => encode_new_vector(&mut writer, m)?,
            IndiMessage::Message(m) => encode_message(&mut writer, m)?,
            IndiMessage::DelProperty(m) => encode_del_property(&mut writer, m)?,
            IndiMessage::EnableBlob(m) => encode_enable_blob(&mut writer, m)?,
        }

        let mut bytes = writer.into_inner();
        bytes.push(b'\n');
        Ok(Bytes::from(bytes))
    }
}

type XmlWriter = Writer<Vec<u8>>;

fn write(writer: &mut XmlWriter, event: Event<'_>) -> IndiResult<()> {
    writer
        .write_event(event)
        .map_err(|e| IndiError::Protocol(format!("XML write failed: {}", e)))
}

fn push_opt(start: &mut BytesStart<'_>, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        start.push_attribute((key, value));
    }
}

fn push_timestamp(start: &mut BytesStart<'_>, timestamp: Option<&Timestamp>) {
    if let Some(timestamp) = timestamp {
        start.push_attribute(("timestamp", timestamp.to_string().as_str()));
    }
}

/// Write `start`, then `body` (if any), then the matching end tag; an empty
/// body produces a self-closing element
fn write_element(writer: &mut XmlWriter, start: BytesStart<'_>, body: Option<&str>) -> IndiResult<()> {
    match body {
        Some(text) => {
            let end = BytesEnd::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
            write(writer, Event::Start(start))?;
            write(writer, Event::Text(BytesText::new(text)))?;
            write(writer, Event::End(end))
        }
        None => write(writer, Event::Empty(start)),
    }
}

fn encode_get_properties(writer: &mut XmlWriter, m: &GetProperties) -> IndiResult<()> {
    let mut start = BytesStart::new("getProperties");
    start.push_attribute(("version", m.version.as_str()));
    push_opt(&mut start, "device", m.device.as_deref());
    push_opt(&mut start, "name", m.name.as_deref());
    write(writer, Event::Empty(start))
}

fn encode_def_vector(writer: &mut XmlWriter, m: &DefVector) -> IndiResult<()> {
    let tag = format!("def{}Vector", m.kind.tag_fragment());
    let mut start = BytesStart::new(tag.as_str());
    start.push_attribute(("device", m.device.as_str()));
    start.push_attribute(("name", m.name.as_str()));
    push_opt(&mut start, "label", m.label.as_deref());
    push_opt(&mut start, "group", m.group.as_deref());
    start.push_attribute(("state", m.state.as_str()));
    push_opt(&mut start, "perm", m.permission.as_ref().map(|p| p.as_str()));
    push_opt(&mut start, "rule", m.rule.as_ref().map(|r| r.as_str()));
    push_opt(&mut start, "timeout", m.timeout.map(|t| t.to_string()).as_deref());
    push_timestamp(&mut start, m.timestamp.as_ref());
    push_opt(&mut start, "message", m.message.as_deref());

    write(writer, Event::Start(start))?;
    for element in &m.elements {
        encode_def_element(writer, m.kind, element)?;
    }
    write(writer, Event::End(BytesEnd::new(tag)))
}

fn encode_def_element(writer: &mut XmlWriter, kind: PropertyKind, element: &DefElement) -> IndiResult<()> {
    let tag = format!("def{}", kind.tag_fragment());
    let mut start = BytesStart::new(tag.as_str());
    start.push_attribute(("name", element.name.as_str()));
    push_opt(&mut start, "label", element.label.as_deref());

    if let Some(spec) = &element.number {
        start.push_attribute(("format", spec.format.pattern()));
        start.push_attribute(("min", format_wire_number(spec.min).as_str()));
        start.push_attribute(("max", format_wire_number(spec.max).as_str()));
        start.push_attribute(("step", format_wire_number(spec.step).as_str()));
    }

    let body = match &element.value {
        ElementValue::Blob(_) => None,
        value => Some(value_text(value)),
    };
    write_element(writer, start, body.as_deref())
}

fn encode_set_vector(writer: &mut XmlWriter, m: &SetVector) -> IndiResult<()> {
    let tag = format!("set{}Vector", m.kind.tag_fragment());
    let mut start = BytesStart::new(tag.as_str());
    start.push_attribute(("device", m.device.as_str()));
    start.push_attribute(("name", m.name.as_str()));
    push_opt(&mut start, "state", m.state.as_ref().map(|s| s.as_str()));
    push_opt(&mut start, "timeout", m.timeout.map(|t| t.to_string()).as_deref());
    push_timestamp(&mut start, m.timestamp.as_ref());
    push_opt(&mut start, "message", m.message.as_deref());

    write(writer, Event::Start(start))?;
    for element in &m.elements {
        encode_one_element(writer, m.kind, element)?;
    }
    write(writer, Event::End(BytesEnd::new(tag)))
}

fn encode_new_vector(writer: &mut XmlWriter, m: &NewVector) -> IndiResult<()> {
    let tag = format!("new{}Vector", m.kind.tag_fragment());
    let mut start = BytesStart::new(tag.as_str());
    start.push_attribute(("device", m.device.as_str()));
    start.push_attribute(("name", m.name.as_str()));
    push_timestamp(&mut start, m.timestamp.as_ref());

    write(writer, Event::Start(start))?;
    for element in &m.elements {
        encode_one_element(writer, m.kind, element)?;
    }
    write(writer, Event::End(BytesEnd::new(tag)))
}

fn encode_one_element(writer: &mut XmlWriter, kind: PropertyKind, element: &OneElement) -> IndiResult<()> {
    let tag = format!("one{}", kind.tag_fragment());
    let mut start = BytesStart::new(tag.as_str());
    start.push_attribute(("name", element.name.as_str()));

    if let Some(bounds) = &element.bounds {
        start.push_attribute(("min", format_wire_number(bounds.min).as_str()));
        start.push_attribute(("max", format_wire_number(bounds.max).as_str()));
        start.push_attribute(("step", format_wire_number(bounds.step).as_str()));
    }

    if let ElementValue::Blob(blob) = &element.value {
        start.push_attribute(("size", blob.size().to_string().as_str()));
        start.push_attribute(("format", blob.format()));
    }

    write_element(writer, start, Some(&value_text(&element.value)))
}

/// Text content of an element value
fn value_text(value: &ElementValue) -> String {
    match value {
        ElementValue::Text(text) => text.clone(),
        ElementValue::Number(number) => format_wire_number(*number),
        ElementValue::Switch(status) => status.as_str().to_string(),
        ElementValue::Light(state) => state.as_str().to_string(),
        ElementValue::Blob(blob) => STANDARD.encode(blob.data()),
    }
}

fn encode_message(writer: &mut XmlWriter, m: &Message) -> IndiResult<()> {
    let mut start = BytesStart::new("message");
    push_opt(&mut start, "device", m.device.as_deref());
    push_timestamp(&mut start, m.timestamp.as_ref());
    push_opt(&mut start, "message", m.message.as_deref());
    write(writer, Event::Empty(start))
}

fn encode_del_property(writer: &mut XmlWriter, m: &DelProperty) -> IndiResult<()> {
    let mut start = BytesStart::new("delProperty");
    start.push_attribute(("device", m.device.as_str()));
    push_opt(&mut start, "name", m.name.as_deref());
    push_timestamp(&mut start, m.timestamp.as_ref());
    push_opt(&mut start, "message", m.message.as_deref());
    write(writer, Event::Empty(start))
}

fn encode_enable_blob(writer: &mut XmlWriter, m: &EnableBlob) -> IndiResult<()> {
    let mut start = BytesStart::new("enableBLOB");
    start.push_attribute(("device", m.device.as_str()));
    push_opt(&mut start, "name", m.name.as_deref());
    write_element(writer, start, Some(m.policy.as_str()))
}
