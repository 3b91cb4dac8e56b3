use serde::{Deserialize, Serialize};

/// Binary payload of a BLOB element together with its format suffix
///
/// The format is a free-form file-type hint such as `.fits`; a trailing `.z`
/// marks payloads compressed by the sender. Compressed payloads are carried
/// unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobValue {
    #[serde(with = "serde_bytes")]
    data: Vec<u8>,
    format: String,
}

impl BlobValue {
    pub fn new(data: impl Into<Vec<u8>>, format: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            format: format.into(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    /// Decoded payload size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_compressed(&self) -> bool {
        self.format.ends_with(".z")
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}
