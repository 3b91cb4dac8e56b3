//! INDI protocol codec
//!
//! This crate provides the structured message taxonomy, the XML encoder, the
//! incremental stream decoder and property rendering.

pub mod decoder;
pub mod encoder;
pub mod message;
pub mod render;

pub use decoder::{DEFAULT_CHUNK_SIZE, Frame, IndiMessageDecoder, decode_message};
pub use encoder::IndiMessageEncoder;
pub use message::{
    DefElement, DefVector, DelProperty, EnableBlob, GetProperties, IndiMessage, Message,
    NewVector, NumberBounds, OneElement, SetVector,
};
pub use render::PropertyRender;

pub use indi_core::{IndiError, IndiResult};
