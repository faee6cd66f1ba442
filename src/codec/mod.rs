//! Key/Value Codecs
//!
//! Keys and values are opaque bytes inside the bridge. Codecs only decide
//! how those bytes are rendered in log lines. Each codec is registered under
//! a string id and resolved once at startup from `bridge_key_codec` and
//! `bridge_value_codec`.

use std::fmt;
use std::fmt::Write as _;
use std::sync::OnceLock;

use ahash::AHashMap;

/// Rendered in place of an absent key
pub const ABSENT: &str = "<none>";

/// Longest byte prefix rendered before truncating
const RENDER_LIMIT: usize = 256;

/// Codec error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// No codec is registered under this id
    Unknown(String),
    /// The bytes are not valid for this codec
    Invalid { codec: &'static str, reason: String },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Unknown(id) => write!(f, "unknown codec '{}'", id),
            CodecError::Invalid { codec, reason } => {
                write!(f, "invalid {} payload: {}", codec, reason)
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// Turns opaque payload bytes into a human-readable form
pub trait Codec: Send + Sync {
    fn id(&self) -> &'static str;

    fn decode(&self, bytes: &[u8]) -> Result<String, CodecError>;

    /// Decode for display, falling back to hex when the bytes don't fit
    fn render(&self, bytes: &[u8]) -> String {
        let limited = &bytes[..bytes.len().min(RENDER_LIMIT)];
        let mut out = match self.decode(limited) {
            Ok(text) => text,
            Err(_) => hex(limited),
        };
        if bytes.len() > RENDER_LIMIT {
            let _ = write!(out, "...(+{} bytes)", bytes.len() - RENDER_LIMIT);
        }
        out
    }

    fn render_opt(&self, bytes: Option<&[u8]>) -> String {
        match bytes {
            Some(b) => self.render(b),
            None => ABSENT.to_string(),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Lowercase hex of the raw bytes
pub struct BytesCodec;

impl Codec for BytesCodec {
    fn id(&self) -> &'static str {
        "bytes"
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CodecError> {
        Ok(hex(bytes))
    }
}

/// UTF-8 text
pub struct StringCodec;

impl Codec for StringCodec {
    fn id(&self) -> &'static str {
        "string"
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CodecError> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| CodecError::Invalid {
                codec: "string",
                reason: e.to_string(),
            })
    }
}

/// Signed 64-bit big-endian integer
pub struct LongCodec;

impl Codec for LongCodec {
    fn id(&self) -> &'static str {
        "long"
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CodecError> {
        let raw: [u8; 8] = bytes.try_into().map_err(|_| CodecError::Invalid {
            codec: "long",
            reason: format!("expected 8 bytes, got {}", bytes.len()),
        })?;
        Ok(i64::from_be_bytes(raw).to_string())
    }
}

/// JSON document, re-serialized compactly
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn id(&self) -> &'static str {
        "json"
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CodecError> {
        serde_json::from_slice::<serde_json::Value>(bytes)
            .map(|value| value.to_string())
            .map_err(|e| CodecError::Invalid {
                codec: "json",
                reason: e.to_string(),
            })
    }
}

static BYTES: BytesCodec = BytesCodec;
static STRING: StringCodec = StringCodec;
static LONG: LongCodec = LongCodec;
static JSON: JsonCodec = JsonCodec;

fn registry() -> &'static AHashMap<&'static str, &'static dyn Codec> {
    static REGISTRY: OnceLock<AHashMap<&'static str, &'static dyn Codec>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let codecs: [&'static dyn Codec; 4] = [&BYTES, &STRING, &LONG, &JSON];
        codecs.into_iter().map(|c| (c.id(), c)).collect()
    })
}

/// Resolve a codec by id
pub fn lookup(id: &str) -> Result<&'static dyn Codec, CodecError> {
    registry()
        .get(id)
        .copied()
        .ok_or_else(|| CodecError::Unknown(id.to_string()))
}

/// Ids of every registered codec, sorted
pub fn available() -> Vec<&'static str> {
    let mut ids: Vec<_> = registry().keys().copied().collect();
    ids.sort_unstable();
    ids
}

/// Codecs used to render keys and values in log lines
#[derive(Clone, Copy)]
pub struct Renderers {
    pub key: &'static dyn Codec,
    pub value: &'static dyn Codec,
}

impl Renderers {
    pub fn resolve(key: &str, value: &str) -> Result<Self, CodecError> {
        Ok(Self {
            key: lookup(key)?,
            value: lookup(value)?,
        })
    }
}

impl Default for Renderers {
    fn default() -> Self {
        Self {
            key: &STRING,
            value: &BYTES,
        }
    }
}

impl fmt::Debug for Renderers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderers")
            .field("key", &self.key.id())
            .field("value", &self.value.id())
            .finish()
    }
}
