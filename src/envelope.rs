//! Response envelopes.
//!
//! An [`Envelope`] is the finalized, wire-ready outcome of one request. The
//! emission path fills it through setters and then asks it for its
//! [`Content`]; the variant it returns selects the write strategy:
//!
//! | Content | Written as |
//! |---|---|
//! | `Structured` | the whole envelope, `application/json` |
//! | `Text` | the message-equivalent string, `text/plain` |
//! | `Binary` | the raw payload bytes, `application/octet-stream` |
//!
//! Swap the default [`JsonEnvelope`] for another factory through
//! [`SettingsBuilder::envelope`](crate::SettingsBuilder::envelope) or per
//! request with [`Context::set_envelope`](crate::Context::set_envelope).

use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

// ── Payload ───────────────────────────────────────────────────────────────────

/// The data part of an envelope.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
    Bytes(Bytes),
}

impl Payload {
    /// Serializes `value`. `None`, `()` and other values that serialize to
    /// `null` produce a nil payload.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, Error> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(|e| Error::wrap(e).into_system())
    }

    /// True for the "no value" payload, which envelopes never attach.
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Json(Value::Null))
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self { Self::Json(v) }
}

impl From<String> for Payload {
    fn from(s: String) -> Self { Self::Text(s) }
}

impl From<&'static str> for Payload {
    fn from(s: &'static str) -> Self { Self::Text(s.to_owned()) }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self { Self::Bytes(b) }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self { Self::Bytes(Bytes::from(b)) }
}

// ── Content ───────────────────────────────────────────────────────────────────

/// What an envelope writes, tagged with its strategy.
#[derive(Clone, Debug, PartialEq)]
pub enum Content {
    Structured(Vec<u8>),
    Text(String),
    Binary(Bytes),
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// The response contract every envelope implements.
pub trait Envelope: Send {
    fn set_code(&mut self, code: &str);
    fn set_message(&mut self, message: &str);
    /// Attaches the payload. Callers never pass a nil payload.
    fn set_data(&mut self, data: Payload);
    fn set_system(&mut self);
    /// Appends to the cause chain.
    fn set_chain(&mut self, chain: &[String]);
    fn set_rid(&mut self, rid: &str);
    /// Final wire content. `Err` when the envelope was built with a payload
    /// its strategy cannot carry.
    fn content(&self) -> Result<Content, Error>;
}

fn shape_mismatch(strategy: &str, got: &str) -> Error {
    Error::system(format!("{strategy} envelope cannot carry a {got} payload"))
}

// ── JsonEnvelope ──────────────────────────────────────────────────────────────

/// Default structured envelope.
///
/// Wire shape: `{code, message, system?, chain?, rid?, data?}` with optional
/// fields omitted when empty.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonEnvelope {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub system: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonEnvelope {
    pub fn new() -> Self { Self::default() }
}

impl Envelope for JsonEnvelope {
    fn set_code(&mut self, code: &str) { self.code = code.to_owned(); }
    fn set_message(&mut self, message: &str) { self.message = message.to_owned(); }

    fn set_data(&mut self, data: Payload) {
        self.data = match data {
            Payload::Json(Value::Null) => None,
            Payload::Json(v) => Some(v),
            Payload::Text(s) => Some(Value::String(s)),
            Payload::Bytes(b) => {
                Some(Value::String(base64::engine::general_purpose::STANDARD.encode(b)))
            }
        };
    }

    fn set_system(&mut self) { self.system = true; }
    fn set_chain(&mut self, chain: &[String]) { self.chain.extend_from_slice(chain); }
    fn set_rid(&mut self, rid: &str) { self.rid = Some(rid.to_owned()); }

    fn content(&self) -> Result<Content, Error> {
        serde_json::to_vec(self)
            .map(Content::Structured)
            .map_err(|e| Error::wrap(e).into_system())
    }
}

// ── TextEnvelope ──────────────────────────────────────────────────────────────

/// Writes one string as `text/plain`: a text payload when attached, else the
/// message.
#[derive(Clone, Debug, Default)]
pub struct TextEnvelope {
    message: String,
    text: Option<String>,
    mismatch: Option<&'static str>,
}

impl TextEnvelope {
    pub fn new() -> Self { Self::default() }
}

impl Envelope for TextEnvelope {
    fn set_code(&mut self, _code: &str) {}
    fn set_message(&mut self, message: &str) { self.message = message.to_owned(); }

    fn set_data(&mut self, data: Payload) {
        match data {
            Payload::Text(s) => self.text = Some(s),
            other => self.mismatch = Some(other.kind()),
        }
    }

    fn set_system(&mut self) {}
    fn set_chain(&mut self, _chain: &[String]) {}
    fn set_rid(&mut self, _rid: &str) {}

    fn content(&self) -> Result<Content, Error> {
        if let Some(got) = self.mismatch {
            return Err(shape_mismatch("text", got));
        }
        Ok(Content::Text(self.text.clone().unwrap_or_else(|| self.message.clone())))
    }
}

// ── BinaryEnvelope ────────────────────────────────────────────────────────────

/// Writes the raw payload bytes as `application/octet-stream`.
#[derive(Clone, Debug, Default)]
pub struct BinaryEnvelope {
    bytes: Bytes,
    mismatch: Option<&'static str>,
}

impl BinaryEnvelope {
    pub fn new() -> Self { Self::default() }
}

impl Envelope for BinaryEnvelope {
    fn set_code(&mut self, _code: &str) {}
    fn set_message(&mut self, _message: &str) {}

    fn set_data(&mut self, data: Payload) {
        match data {
            Payload::Bytes(b) => self.bytes = b,
            other => self.mismatch = Some(other.kind()),
        }
    }

    fn set_system(&mut self) {}
    fn set_chain(&mut self, _chain: &[String]) {}
    fn set_rid(&mut self, _rid: &str) {}

    fn content(&self) -> Result<Content, Error> {
        match self.mismatch {
            Some(got) => Err(shape_mismatch("binary", got)),
            None => Ok(Content::Binary(self.bytes.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn optional_fields_are_omitted() {
        let mut env = JsonEnvelope::new();
        env.set_code("00");
        let Content::Structured(bytes) = env.content().unwrap() else { panic!("not structured") };
        assert_eq!(serde_json::from_slice::<Value>(&bytes).unwrap(), json!({"code": "00", "message": ""}));
    }

    #[test]
    fn full_envelope_survives_the_wire() {
        let mut env = JsonEnvelope::new();
        env.set_code("102");
        env.set_message("name is required");
        env.set_system();
        env.set_chain(&["a".to_owned(), "b".to_owned()]);
        env.set_rid("rid-1");
        env.set_data(Payload::Json(json!({"id": 7})));
        let Content::Structured(bytes) = env.content().unwrap() else { panic!("not structured") };
        let back: JsonEnvelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn bytes_inside_json_are_base64() {
        let mut env = JsonEnvelope::new();
        env.set_data(Payload::from(b"hi".to_vec()));
        assert_eq!(env.data, Some(json!("aGk=")));
    }

    #[test]
    fn nil_payload_detection() {
        assert!(Payload::json(&Option::<u8>::None).unwrap().is_nil());
        assert!(Payload::json(&()).unwrap().is_nil());
        assert!(!Payload::json(&0).unwrap().is_nil());
        assert!(!Payload::from("").is_nil());
    }

    #[test]
    fn text_envelope_prefers_text_payload() {
        let mut env = TextEnvelope::new();
        env.set_message("fallback");
        assert_eq!(env.content().unwrap(), Content::Text("fallback".into()));
        env.set_data(Payload::from("hello"));
        assert_eq!(env.content().unwrap(), Content::Text("hello".into()));
    }

    #[test]
    fn wrong_payload_shape_is_recorded() {
        let mut text = TextEnvelope::new();
        text.set_data(Payload::from(vec![1, 2]));
        let err = text.content().unwrap_err();
        assert!(err.is_system());
        assert_eq!(err.message(), "text envelope cannot carry a bytes payload");

        let mut binary = BinaryEnvelope::new();
        binary.set_data(Payload::Json(json!({"a": 1})));
        assert!(binary.content().is_err());
    }

    #[test]
    fn binary_envelope_writes_raw_bytes() {
        let mut env = BinaryEnvelope::new();
        env.set_data(Payload::from(Bytes::from_static(b"\x00\x01")));
        assert_eq!(env.content().unwrap(), Content::Binary(Bytes::from_static(b"\x00\x01")));
    }
}
