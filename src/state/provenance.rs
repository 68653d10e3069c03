/// Provenance records embedded in drone media
///
/// Videos carry them in a `pvat` atom and photos in the EXIF image
/// description. Both hold the same flat JSON object:
/// `{"product_id":"0914","media_date":"2013-07-25T160101+0100", ...}`.
/// Dates are kept as the strings the drone wrote.

use serde::{Deserialize, Deserializer, Serialize};

use std::path::Path;

use crate::error::{AtomError, DecodeError, PvatError};
use crate::media::atom::{self, PVAT};

/// Decoded provenance of one media file
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvenanceRecord {
    /// Hex product id, e.g. "0914". Empty when the payload had none.
    #[serde(default, deserialize_with = "lenient_string")]
    pub product_id: String,

    /// When the photo was taken or the video started recording
    #[serde(default, deserialize_with = "lenient_optional", skip_serializing_if = "Option::is_none")]
    pub media_date: Option<String>,

    /// Start of the flight the media belongs to
    #[serde(default, deserialize_with = "lenient_optional", skip_serializing_if = "Option::is_none")]
    pub run_date: Option<String>,

    #[serde(default, deserialize_with = "lenient_optional", skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

impl ProvenanceRecord {
    pub fn new(product_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            ..Self::default()
        }
    }

    pub fn with_media_date(mut self, date: impl Into<String>) -> Self {
        self.media_date = Some(date.into());
        self
    }

    pub fn with_run_date(mut self, date: impl Into<String>) -> Self {
        self.run_date = Some(date.into());
        self
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    /// Encode to the JSON text stored in atoms and EXIF tags
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Product id as a number, if it is valid hex ("0914", "0x0914")
    pub fn product_number(&self) -> Option<u32> {
        parse_product_id(&self.product_id)
    }
}

/// Parse a hex product id, ignoring case, leading zeros and a `0x` prefix
pub fn parse_product_id(hex: &str) -> Option<u32> {
    let hex = hex.trim();
    let digits = hex
        .strip_prefix("0x")
        .or_else(|| hex.strip_prefix("0X"))
        .unwrap_or(hex);
    if digits.is_empty() {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

/// Decode a `pvat` payload or EXIF description into a record.
///
/// Missing keys leave fields empty; unknown keys (such as `filename`) are
/// ignored. NUL padding after the JSON text is tolerated.
pub fn decode(payload: &[u8]) -> Result<ProvenanceRecord, DecodeError> {
    let end = payload
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |last| last + 1);
    let text = std::str::from_utf8(&payload[..end])?;

    let value: serde_json::Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(DecodeError::NotAnObject);
    }
    Ok(serde_json::from_value(value)?)
}

/// Encode a record as the UTF-8 JSON text written into media files
pub fn encode(record: &ProvenanceRecord) -> Vec<u8> {
    // A struct of strings always serializes
    record.to_json().map(String::into_bytes).unwrap_or_default()
}

/// A complete `pvat` box carrying `record`, ready to append to a video
pub fn pvat_atom(record: &ProvenanceRecord) -> Vec<u8> {
    atom::encode_atom(PVAT, &encode(record))
}

/// Append a `pvat` box carrying `record` to the video at `path`
pub fn write_pvat(path: &Path, record: &ProvenanceRecord) -> Result<(), AtomError> {
    atom::append_atom(path, PVAT, &encode(record))
}

/// Set both the media and run date of the provenance stored in the video
/// at `path`, keeping its other fields. Returns the record now on disk.
pub fn change_pvat_date(path: &Path, date: &str) -> Result<ProvenanceRecord, PvatError> {
    let payload = atom::locate_in_file(path, PVAT)?.ok_or(PvatError::Missing)?;
    let record = decode(&payload)?.with_media_date(date).with_run_date(date);

    if !atom::replace_atom(path, PVAT, &encode(&record))? {
        return Err(PvatError::Missing);
    }
    Ok(record)
}

/// Accepts strings, and numbers as their decimal text
fn lenient_optional<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_optional(deserializer).map(Option::unwrap_or_default)
}
