//! Incremental INDI message decoder
//!
//! Peers write a stream of top-level XML elements, optionally wrapped in an
//! `<INDI>` root, delivered in arbitrary chunks. The decoder buffers input,
//! cuts it into complete top-level elements and maps each one to an
//! [`IndiMessage`]. Elements that do not make a valid message are dropped.

use crate::message::{
    DefElement, DefVector, DelProperty, EnableBlob, GetProperties, IndiMessage, Message,
    NewVector, NumberBounds, OneElement, SetVector,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::{Buf, Bytes, BytesMut};
use indi_core::datatypes::parse_wire_number;
use indi_core::{
    BlobValue, ElementValue, IndiResult, NumberFormat, NumberSpec, PropertyKind, PropertyState,
    Timestamp,
};
use quick_xml::Reader;
use quick_xml::events::Event;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Default number of bytes requested per read
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

const ROOT_TAG: &[u8] = b"INDI";

/// A decoded message together with the exact bytes it was decoded from
///
/// Routers forward `raw` verbatim instead of re-encoding.
#[derive(Debug, Clone)]
pub struct Frame {
    pub message: IndiMessage,
    pub raw: Bytes,
}

/// Outcome of scanning one markup construct
enum Markup {
    /// More input is needed to see the whole construct
    Incomplete,
    /// Construct ends just before `end`
    Complete { end: usize, kind: MarkupKind },
}

enum MarkupKind {
    Open { name: Vec<u8>, self_closing: bool },
    Close { name: Vec<u8> },
    /// Comments, CDATA, processing instructions, declarations
    Other,
}

/// Incremental decoder for a single peer's inbound stream
#[derive(Debug)]
pub struct IndiMessageDecoder {
    buffer: BytesMut,
    /// Bytes of `buffer` already scanned
    scanned: usize,
    /// Nesting depth inside the current top-level element
    depth: usize,
    /// Start offset of the current top-level element
    start: Option<usize>,
    chunk_size: usize,
}

impl Default for IndiMessageDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl IndiMessageDecoder {
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(chunk_size),
            scanned: 0,
            depth: 0,
            start: None,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Append raw input
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet part of a returned frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete message in the buffered input, if any
    ///
    /// Invalid elements are logged and skipped.
    pub fn next_frame(&mut self) -> Option<Frame> {
        while let Some(raw) = self.next_raw_element() {
            match decode_message(&raw) {
                Some(message) => return Some(Frame { message, raw }),
                None => log::debug!("Dropping malformed message: {}", String::from_utf8_lossy(&raw)),
            }
        }
        None
    }

    /// Read from `reader` until a complete message is available
    ///
    /// Returns `Ok(None)` at end of stream. Partial input left at end of
    /// stream is discarded. Cancel safe: no input is lost if the future is
    /// dropped before completion.
    pub async fn read_frame<R>(&mut self, reader: &mut R) -> IndiResult<Option<Frame>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        loop {
            if let Some(frame) = self.next_frame() {
                return Ok(Some(frame));
            }

            self.buffer.reserve(self.chunk_size);
            let n = reader.read_buf(&mut self.buffer).await?;
            if n == 0 {
                if self.start.is_some() {
                    log::debug!("Stream ended inside a message, {} bytes discarded", self.buffer.len());
                }
                return Ok(None);
            }
        }
    }

    /// Cut the next complete top-level element out of the buffer
    fn next_raw_element(&mut self) -> Option<Bytes> {
        let mut pos = self.scanned;

        while pos < self.buffer.len() {
            if self.buffer[pos] != b'<' {
                pos += 1;
                continue;
            }

            let (end, kind) = match scan_markup(&self.buffer, pos) {
                Markup::Incomplete => break,
                Markup::Complete { end, kind } => (end, kind),
            };

            match kind {
                MarkupKind::Open { name, self_closing } => {
                    if self.depth == 0 {
                        if name == ROOT_TAG {
                            // Transparent wrapper; its children are the messages
                        } else if self_closing {
                            return Some(self.take_element(pos, end));
                        } else {
                            self.start = Some(pos);
                            self.depth = 1;
                        }
                    } else if !self_closing {
                        self.depth += 1;
                    }
                }
                MarkupKind::Close { name } => {
                    if self.depth == 0 {
                        if name != ROOT_TAG {
                            log::debug!("Ignoring stray end tag {}", String::from_utf8_lossy(&name));
                        }
                    } else {
                        self.depth -= 1;
                        if self.depth == 0 {
                            let start = self.start.take().unwrap_or(pos);
                            return Some(self.take_element(start, end));
                        }
                    }
                }
                MarkupKind::Other => {}
            }

            pos = end;
        }

        if self.depth == 0 {
            // Nothing in progress: everything before `pos` is inter-message noise
            self.buffer.advance(pos);
            self.scanned = 0;
        } else {
            self.scanned = pos;
        }
        None
    }

    fn take_element(&mut self, start: usize, end: usize) -> Bytes {
        self.buffer.advance(start);
        let raw = self.buffer.split_to(end - start).freeze();
        self.scanned = 0;
        self.depth = 0;
        self.start = None;
        raw
    }
}

fn find(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| from + p)
}

/// Scan the markup construct starting at `buffer[pos] == b'<'`
fn scan_markup(buffer: &[u8], pos: usize) -> Markup {
    let rest = &buffer[pos..];

    let skip_to = |terminator: &[u8], skip: usize| match find(buffer, pos + skip, terminator) {
        Some(at) => Markup::Complete {
            end: at + terminator.len(),
            kind: MarkupKind::Other,
        },
        None => Markup::Incomplete,
    };

    // Prefixes may be split across reads
    for (prefix, terminator) in [
        (&b"<!--"[..], &b"-->"[..]),
        (&b"<![CDATA["[..], &b"]]>"[..]),
        (&b"<?"[..], &b"?>"[..]),
    ] {
        if rest.len() < prefix.len() && prefix.starts_with(rest) {
            return Markup::Incomplete;
        }
        if rest.starts_with(prefix) {
            return skip_to(terminator, prefix.len());
        }
    }
    if rest.starts_with(b"<!") {
        return skip_to(b">", 2);
    }

    // Regular tag: find the closing '>' outside quoted attribute values
    let mut quote: Option<u8> = None;
    let mut close = None;
    for (i, &b) in rest.iter().enumerate().skip(1) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => {
                close = Some(i);
                break;
            }
            None => {}
        }
    }
    let Some(close) = close else {
        return Markup::Incomplete;
    };

    let end = pos + close + 1;
    let inner = &rest[1..close];
    if let Some(inner) = inner.strip_prefix(b"/") {
        return Markup::Complete {
            end,
            kind: MarkupKind::Close { name: tag_name(inner) },
        };
    }

    Markup::Complete {
        end,
        kind: MarkupKind::Open {
            name: tag_name(inner),
            self_closing: inner.ends_with(b"/"),
        },
    }
}

fn tag_name(inner: &[u8]) -> Vec<u8> {
    inner
        .iter()
        .take_while(|b| !b.is_ascii_whitespace() && **b != b'/' && **b != b'>')
        .copied()
        .collect()
}

/// Minimal element tree of one top-level message
#[derive(Debug, Default)]
struct Node {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute trimmed, `None` when absent or blank
    fn attr_trimmed(&self, key: &str) -> Option<&str> {
        self.attr(key).map(str::trim).filter(|v| !v.is_empty())
    }
}

fn start_node(start: &quick_xml::events::BytesStart<'_>) -> Option<Node> {
    let mut node = Node {
        name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
        ..Default::default()
    };
    for attribute in start.attributes() {
        let attribute = attribute.ok()?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value().ok()?.into_owned();
        node.attributes.push((key, value));
    }
    Some(node)
}

fn parse_tree(xml: &str) -> Option<Node> {
    // Text bodies are kept verbatim; token and number parsers trim
    let mut reader = Reader::from_str(xml);

    let mut stack: Vec<Node> = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(start_node(&start)?),
            Ok(Event::Empty(start)) => {
                let node = start_node(&start)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Some(node),
                }
            }
            Ok(Event::End(_)) => {
                let node = stack.pop()?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Some(node),
                }
            }
            Ok(Event::Text(text)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text.unescape().ok()?);
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Ok(Event::Eof) => return None,
            Ok(_) => {}
            Err(e) => {
                log::debug!("XML error at {}: {}", reader.buffer_position(), e);
                return None;
            }
        }
    }
}

/// Decode one complete top-level element
///
/// Returns `None` if the element is not a valid INDI message.
pub fn decode_message(raw: &[u8]) -> Option<IndiMessage> {
    let xml = std::str::from_utf8(raw).ok()?;
    let node = parse_tree(xml)?;

    match node.name.as_str() {
        "getProperties" => decode_get_properties(&node),
        "message" => Some(decode_message_notice(&node)),
        "delProperty" => decode_del_property(&node),
        "enableBLOB" => decode_enable_blob(&node),
        name => decode_vector(&node, name),
    }
}

fn timestamp_of(node: &Node) -> Option<Timestamp> {
    node.attr_trimmed("timestamp").map(|t| Timestamp::parse_or_now(Some(t)))
}

fn timeout_of(node: &Node) -> Option<u32> {
    let value: f64 = node.attr_trimmed("timeout")?.parse().ok()?;
    Some(value.clamp(0.0, u32::MAX as f64) as u32)
}

fn decode_get_properties(node: &Node) -> Option<IndiMessage> {
    Some(IndiMessage::GetProperties(GetProperties {
        version: node.attr_trimmed("version")?.to_string(),
        device: node.attr_trimmed("device").map(str::to_string),
        name: node.attr_trimmed("name").map(str::to_string),
    }))
}

fn decode_message_notice(node: &Node) -> IndiMessage {
    IndiMessage::Message(Message {
        device: node.attr_trimmed("device").map(str::to_string),
        timestamp: timestamp_of(node),
        message: node.attr("message").map(str::to_string),
    })
}

fn decode_del_property(node: &Node) -> Option<IndiMessage> {
    Some(IndiMessage::DelProperty(DelProperty {
        device: node.attr_trimmed("device")?.to_string(),
        name: node.attr_trimmed("name").map(str::to_string),
        timestamp: timestamp_of(node),
        message: node.attr("message").map(str::to_string),
    }))
}

fn decode_enable_blob(node: &Node) -> Option<IndiMessage> {
    Some(IndiMessage::EnableBlob(EnableBlob {
        device: node.attr_trimmed("device")?.to_string(),
        name: node.attr_trimmed("name").map(str::to_string),
        policy: node.text.parse().ok()?,
    }))
}

/// `def*Vector`, `set*Vector` and `new*Vector`
fn decode_vector(node: &Node, tag: &str) -> Option<IndiMessage> {
    let (prefix, fragment) = if let Some(rest) = tag.strip_prefix("def") {
        ("def", rest)
    } else if let Some(rest) = tag.strip_prefix("set") {
        ("set", rest)
    } else if let Some(rest) = tag.strip_prefix("new") {
        ("new", rest)
    } else {
        return None;
    };
    let kind = PropertyKind::from_tag_fragment(fragment.strip_suffix("Vector")?)?;

    let device = node.attr_trimmed("device")?.to_string();
    let name = node.attr_trimmed("name")?.to_string();

    match prefix {
        "def" => decode_def_vector(node, kind, device, name),
        "set" => Some(IndiMessage::Set(SetVector {
            kind,
            device,
            name,
            state: match node.attr("state") {
                Some(state) => Some(state.parse().ok()?),
                None => None,
            },
            timeout: timeout_of(node),
            timestamp: timestamp_of(node),
            message: node.attr("message").map(str::to_string),
            elements: one_elements(node, kind),
        })),
        _ => Some(IndiMessage::New(NewVector {
            kind,
            device,
            name,
            timestamp: timestamp_of(node),
            elements: one_elements(node, kind),
        })),
    }
}

fn decode_def_vector(node: &Node, kind: PropertyKind, device: String, name: String) -> Option<IndiMessage> {
    let state: PropertyState = node.attr("state")?.parse().ok()?;
    let permission = match node.attr("perm") {
        Some(perm) => Some(perm.parse().ok()?),
        None => None,
    };
    let rule = match (kind, node.attr("rule")) {
        (PropertyKind::Switch, Some(rule)) => Some(rule.parse().ok()?),
        _ => None,
    };

    let element_tag = format!("def{}", kind.tag_fragment());
    let elements = node
        .children
        .iter()
        .filter(|child| child.name == element_tag)
        .filter_map(|child| def_element(child, kind))
        .collect();

    Some(IndiMessage::Def(DefVector {
        kind,
        device,
        name,
        label: node.attr("label").map(str::to_string),
        group: node.attr("group").map(str::to_string),
        state,
        permission,
        rule,
        timeout: timeout_of(node),
        timestamp: timestamp_of(node),
        message: node.attr("message").map(str::to_string),
        elements,
    }))
}

fn def_element(node: &Node, kind: PropertyKind) -> Option<DefElement> {
    let name = node.attr_trimmed("name")?.to_string();

    let (value, number) = match kind {
        PropertyKind::Number => {
            let format = match node.attr_trimmed("format") {
                Some(format) => NumberFormat::parse(format).ok()?,
                None => NumberFormat::default(),
            };
            let bound = |key: &str| match node.attr_trimmed(key) {
                Some(text) => parse_wire_number(text).ok(),
                None => Some(0.0),
            };
            let spec = NumberSpec {
                format,
                min: bound("min")?,
                max: bound("max")?,
                step: bound("step")?,
            };
            (ElementValue::Number(parse_wire_number(&node.text).ok()?), Some(spec))
        }
        PropertyKind::Blob => (ElementValue::Blob(BlobValue::default()), None),
        _ => (scalar_value(kind, &node.text)?, None),
    };

    Some(DefElement {
        name,
        label: node.attr("label").map(str::to_string),
        value,
        number,
    })
}

fn one_elements(node: &Node, kind: PropertyKind) -> Vec<OneElement> {
    let element_tag = format!("one{}", kind.tag_fragment());
    node.children
        .iter()
        .filter(|child| child.name == element_tag)
        .filter_map(|child| {
            let element = one_element(child, kind);
            if element.is_none() {
                log::debug!("Dropping malformed {} element", element_tag);
            }
            element
        })
        .collect()
}

fn one_element(node: &Node, kind: PropertyKind) -> Option<OneElement> {
    let name = node.attr_trimmed("name")?.to_string();

    let value = match kind {
        PropertyKind::Blob => ElementValue::Blob(blob_value(node)?),
        _ => scalar_value(kind, &node.text)?,
    };

    let bounds = match (
        node.attr_trimmed("min"),
        node.attr_trimmed("max"),
        node.attr_trimmed("step"),
    ) {
        (Some(min), Some(max), step) if kind == PropertyKind::Number => Some(NumberBounds {
            min: parse_wire_number(min).ok()?,
            max: parse_wire_number(max).ok()?,
            step: match step {
                Some(step) => parse_wire_number(step).ok()?,
                None => 0.0,
            },
        }),
        _ => None,
    };

    Some(OneElement { name, value, bounds })
}

fn scalar_value(kind: PropertyKind, text: &str) -> Option<ElementValue> {
    match kind {
        PropertyKind::Text => Some(ElementValue::Text(text.to_string())),
        PropertyKind::Number => parse_wire_number(text).ok().map(ElementValue::Number),
        PropertyKind::Switch => text.parse().ok().map(ElementValue::Switch),
        PropertyKind::Light => text.parse().ok().map(ElementValue::Light),
        PropertyKind::Blob => None,
    }
}

/// Decode a `oneBLOB` payload, checking `size` unless the payload is compressed
fn blob_value(node: &Node) -> Option<BlobValue> {
    let format = node.attr("format").unwrap_or_default().trim().to_string();
    let encoded: Vec<u8> = node
        .text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let data = STANDARD.decode(&encoded).ok()?;

    let blob = BlobValue::new(data, format);
    if !blob.is_compressed() {
        let size: usize = node.attr_trimmed("size")?.parse().ok()?;
        if size != blob.size() {
            log::debug!("BLOB size mismatch: declared {}, decoded {}", size, blob.size());
            return None;
        }
    }
    Some(blob)
}
