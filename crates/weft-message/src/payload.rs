//! File payload normalization
//!
//! Binary buffers and `data:` URLs are normalized to base64 text and stored
//! inline. `http(s)` URLs stay references and become attachments.

use std::sync::LazyLock;

use base64::{Engine, engine::general_purpose::STANDARD};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Raw file data as it appears in provider-neutral and flat messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataContent {
    /// Base64 text, a `data:` URL or an `http(s)` URL
    Text(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Any other JSON value; never convertible
    Other(serde_json::Value),
}

impl From<String> for DataContent {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for DataContent {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<u8>> for DataContent {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

/// Where a file payload ends up in a canonical turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilePayload {
    /// Base64 data for an inline `file` part
    Inline {
        data: String,
        /// Media type declared by a data URL, if any
        mime_type: Option<String>,
    },
    /// A remote file kept by reference
    Reference { url: String },
}

static DATA_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^data:(?P<meta>[^,]*),(?P<payload>.*)$").unwrap());

impl FilePayload {
    /// Decide inline vs. reference for a payload
    pub fn classify(data: &DataContent) -> Result<Self> {
        match data {
            DataContent::Bytes(bytes) => Ok(FilePayload::Inline {
                data: STANDARD.encode(bytes),
                mime_type: None,
            }),
            DataContent::Text(text) => classify_text(text),
            DataContent::Other(value) => Err(Error::unsupported_payload(format!(
                "expected string or byte array, got {}",
                json_type(value)
            ))),
        }
    }
}

fn classify_text(text: &str) -> Result<FilePayload> {
    let text = text.trim();

    if text.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("data:")) {
        return parse_data_url(text);
    }

    if text.contains("://") {
        let url = url::Url::parse(text)
            .map_err(|e| Error::unsupported_payload(format!("malformed URL '{}': {}", text, e)))?;
        return match url.scheme() {
            "http" | "https" => Ok(FilePayload::Reference {
                url: text.to_string(),
            }),
            scheme => Err(Error::unsupported_payload(format!(
                "unsupported protocol '{}'",
                scheme
            ))),
        };
    }

    // Anything else is already base64
    Ok(FilePayload::Inline {
        data: text.to_string(),
        mime_type: None,
    })
}

fn parse_data_url(text: &str) -> Result<FilePayload> {
    let caps = DATA_URL
        .captures(text)
        .ok_or_else(|| Error::unsupported_payload("malformed data URL"))?;

    let mut params = caps["meta"].split(';');
    let mime_type = params
        .next()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string);
    let is_base64 = params.any(|p| p.trim().eq_ignore_ascii_case("base64"));
    let payload = &caps["payload"];

    let data = if is_base64 {
        STANDARD
            .decode(payload)
            .map_err(|e| Error::unsupported_payload(format!("invalid base64 in data URL: {}", e)))?;
        payload.to_string()
    } else {
        STANDARD.encode(urlencoding::decode_binary(payload.as_bytes()))
    };

    Ok(FilePayload::Inline { data, mime_type })
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
