//! Byte-to-text decoding with an ordered fallback list.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextEncoding {
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "iso-8859-1")]
    Latin1,
}

impl TextEncoding {
    pub fn name(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Latin1 => "iso-8859-1",
        }
    }

    /// `None` when the bytes are not valid in this encoding.
    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            TextEncoding::Utf8 => {
                let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
                std::str::from_utf8(bytes).ok().map(str::to_string)
            }
            // every byte maps to the code point of the same value
            TextEncoding::Latin1 => Some(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TextEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            "iso-8859-1" | "iso8859-1" | "latin-1" | "latin1" => Ok(TextEncoding::Latin1),
            other => Err(format!("unsupported encoding '{}'", other)),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Payload of {size} bytes is not valid in any of: {tried}")]
pub struct DecodeError {
    pub size: usize,
    pub tried: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub encoding: TextEncoding,
}

/// Decodes `bytes` with the first encoding in `encodings` that accepts them.
pub fn decode_payload(bytes: &[u8], encodings: &[TextEncoding]) -> Result<DecodedText, DecodeError> {
    encodings
        .iter()
        .find_map(|&encoding| {
            encoding
                .decode(bytes)
                .map(|text| DecodedText { text, encoding })
        })
        .ok_or_else(|| DecodeError {
            size: bytes.len(),
            tried: encodings
                .iter()
                .map(|e| e.name())
                .collect::<Vec<_>>()
                .join(", "),
        })
}
