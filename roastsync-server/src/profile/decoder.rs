//! Profile byte formats
//!
//! Three encodings are in the wild: a ZIP archive wrapping one JSON member,
//! plain JSON, and the legacy Python-literal dump. Each is a
//! [`ProfileDecoder`]; [`decode_profile`] tries them in order.

use super::{pylit, Document, ProfileError};
use serde_json::Value;
use std::io::{Cursor, Read};
use tracing::debug;

/// One profile encoding
pub trait ProfileDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap sniff of the leading bytes
    fn accepts(&self, bytes: &[u8]) -> bool;

    fn decode(&self, bytes: &[u8]) -> Result<Document, ProfileError>;
}

/// ZIP archive; the first `.json` member wins, else the first member
pub struct ZipDecoder;

/// Plain JSON object
pub struct JsonDecoder;

/// Python `repr()` dict
pub struct PythonLiteralDecoder;

const ZIP_MAGIC: &[u8] = b"PK";
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

static DECODERS: [&dyn ProfileDecoder; 3] = [&ZipDecoder, &JsonDecoder, &PythonLiteralDecoder];

/// Registered decoders in trial order
pub fn decoders() -> &'static [&'static dyn ProfileDecoder] {
    &DECODERS
}

/// Decode profile bytes with the first decoder that succeeds
pub fn decode_profile(bytes: &[u8]) -> Result<Document, ProfileError> {
    let mut last_error = None;
    for decoder in decoders() {
        if !decoder.accepts(bytes) {
            continue;
        }
        match decoder.decode(bytes) {
            Ok(document) => return Ok(document),
            Err(e) => {
                debug!("{} decoder rejected profile: {}", decoder.name(), e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or(ProfileError::Unrecognized))
}

fn into_document(value: Value) -> Result<Document, ProfileError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ProfileError::NotAnObject),
    }
}

/// Text body of a profile: JSON first, Python literal second
fn decode_text(text: &str) -> Result<Document, ProfileError> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => into_document(value),
        Err(_) => into_document(pylit::parse(text)?),
    }
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}

fn starts_with_brace(bytes: &[u8]) -> bool {
    strip_bom(bytes)
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .map_or(false, |b| *b == b'{')
}

impl ProfileDecoder for ZipDecoder {
    fn name(&self) -> &'static str {
        "zip"
    }

    fn accepts(&self, bytes: &[u8]) -> bool {
        bytes.starts_with(ZIP_MAGIC)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Document, ProfileError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
        if archive.is_empty() {
            return Err(ProfileError::EmptyArchive);
        }

        let mut member_index = 0;
        for i in 0..archive.len() {
            let name = archive.by_index(i)?.name().to_string();
            if name.ends_with(".json") || name.ends_with(".JSON") {
                member_index = i;
                break;
            }
        }

        let mut raw = Vec::new();
        archive.by_index(member_index)?.read_to_end(&mut raw)?;
        decode_text(&String::from_utf8_lossy(strip_bom(&raw)))
    }
}

impl ProfileDecoder for JsonDecoder {
    fn name(&self) -> &'static str {
        "json"
    }

    fn accepts(&self, bytes: &[u8]) -> bool {
        starts_with_brace(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Document, ProfileError> {
        into_document(serde_json::from_slice(strip_bom(bytes))?)
    }
}

impl ProfileDecoder for PythonLiteralDecoder {
    fn name(&self) -> &'static str {
        "python-literal"
    }

    fn accepts(&self, bytes: &[u8]) -> bool {
        starts_with_brace(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Document, ProfileError> {
        into_document(pylit::parse(&String::from_utf8_lossy(strip_bom(bytes)))?)
    }
}
