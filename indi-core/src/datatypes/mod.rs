//! Value types carried by elements and messages

pub mod blob_value;
pub mod number_format;
pub mod timestamp;

pub use blob_value::BlobValue;
pub use number_format::{
    FormatStyle, NumberFormat, PrintfFlags, format_wire_number, parse_sexagesimal,
    parse_wire_number,
};
pub use timestamp::Timestamp;
