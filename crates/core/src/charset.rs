//! Character-set conversion between stored bytes and Rust strings.

use serde::{Deserialize, Serialize};

/// Converts text between the file's byte encoding and `String`.
///
/// Decoding never fails: bytes that have no mapping are replaced.
pub trait CharsetConverter {
    fn decode(&self, bytes: &[u8]) -> String;
    fn encode(&self, text: &str) -> Vec<u8>;
}

/// ISO-8859-1. Characters above U+00FF encode as `?`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Latin1;

impl CharsetConverter for Latin1 {
    fn decode(&self, bytes: &[u8]) -> String {
        bytes.iter().map(|&byte| char::from(byte)).collect()
    }

    fn encode(&self, text: &str) -> Vec<u8> {
        text.chars()
            .map(|ch| u8::try_from(u32::from(ch)).unwrap_or(b'?'))
            .collect()
    }
}

/// UTF-8 with lossy decoding.
#[derive(Clone, Copy, Debug, Default)]
pub struct Utf8;

impl CharsetConverter for Utf8 {
    fn decode(&self, bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    fn encode(&self, text: &str) -> Vec<u8> {
        text.as_bytes().to_vec()
    }
}

/// Configurable choice of converter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Charset {
    #[default]
    Latin1,
    Utf8,
}

impl Charset {
    pub fn converter(self) -> Box<dyn CharsetConverter> {
        match self {
            Self::Latin1 => Box::new(Latin1),
            Self::Utf8 => Box::new(Utf8),
        }
    }
}
