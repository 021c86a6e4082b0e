//! Type-tagged value codec.
//!
//! Every value crossing the durability boundary (workflow arguments and
//! memoized action results) is stored as a `(text, tag)` pair: `text` is the
//! JSON rendering of the value and `tag` names the type needed to rebuild it.
//! A null value is the literal text `"null"` with no tag.
//!
//! The codec is a closed registry. Primitive and builtin tags are always
//! known; application record types are added with [`Codec::register_record`].
//! Decoding an unknown tag fails with [`CodecError::UnsupportedType`].

mod durable;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use duraflow_types::flow::NULL_RESULT;
use thiserror::Error;

pub use durable::{Durable, DurableRecord, Json};

/// Builtin type tags.
pub mod tags {
    pub const I32: &str = "i32";
    pub const I64: &str = "i64";
    pub const F64: &str = "f64";
    pub const F32: &str = "f32";
    pub const BOOL: &str = "bool";
    pub const I16: &str = "i16";
    pub const I8: &str = "i8";
    pub const CHAR: &str = "char";
    pub const STRING: &str = "string";
    pub const PATH: &str = "path";
    pub const JSON: &str = "json";
    /// UTC instant stored as an RFC 3339 string.
    pub const DATETIME: &str = "datetime";

    /// Tags decoded by direct textual parsing.
    pub const PRIMITIVES: [&str; 8] = [I32, I64, F64, F32, BOOL, I16, I8, CHAR];
}

const FILE_SCHEME: &str = "file://";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CodecError {
    /// The tag is neither builtin nor registered.
    #[error("unsupported type tag '{0}'")]
    UnsupportedType(String),

    /// The text could not be parsed as the tagged type.
    #[error("cannot decode {text:?} as {tag}: {reason}")]
    Malformed {
        tag: String,
        text: String,
        reason: String,
    },

    /// A decoded value had a different type than the caller asked for.
    #[error("type mismatch: expected {expected}, found {found}")]
    Mismatch { expected: String, found: String },

    /// The value cannot be represented as JSON text.
    #[error("cannot encode value: {0}")]
    Unencodable(String),
}

impl CodecError {
    pub(crate) fn mismatch(expected: &str, found: &TypedValue) -> Self {
        CodecError::Mismatch {
            expected: expected.to_string(),
            found: found.describe().to_string(),
        }
    }

    fn malformed(tag: &str, text: &str, reason: impl fmt::Display) -> Self {
        CodecError::Malformed {
            tag: tag.to_string(),
            text: text.to_string(),
            reason: reason.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// TypedValue
// ---------------------------------------------------------------------------

/// A dynamically typed value that the codec knows how to persist.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Null,
    I32(i32),
    I64(i64),
    F64(f64),
    F32(f32),
    Bool(bool),
    I16(i16),
    I8(i8),
    Char(char),
    String(String),
    Path(PathBuf),
    DateTime(DateTime<Utc>),
    Json(serde_json::Value),
    /// A registered application record, held in its JSON form.
    Record { tag: String, value: serde_json::Value },
}

impl TypedValue {
    /// The type tag this value is stored under; `None` for null.
    pub fn type_tag(&self) -> Option<&str> {
        Some(match self {
            TypedValue::Null => return None,
            TypedValue::I32(_) => tags::I32,
            TypedValue::I64(_) => tags::I64,
            TypedValue::F64(_) => tags::F64,
            TypedValue::F32(_) => tags::F32,
            TypedValue::Bool(_) => tags::BOOL,
            TypedValue::I16(_) => tags::I16,
            TypedValue::I8(_) => tags::I8,
            TypedValue::Char(_) => tags::CHAR,
            TypedValue::String(_) => tags::STRING,
            TypedValue::Path(_) => tags::PATH,
            TypedValue::DateTime(_) => tags::DATETIME,
            TypedValue::Json(_) => tags::JSON,
            TypedValue::Record { tag, .. } => tag.as_str(),
        })
    }

    /// Short human label used in error messages.
    pub fn describe(&self) -> &str {
        self.type_tag().unwrap_or("null")
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Null => f.write_str("null"),
            TypedValue::I32(v) => write!(f, "{v}"),
            TypedValue::I64(v) => write!(f, "{v}"),
            TypedValue::F64(v) => write!(f, "{v}"),
            TypedValue::F32(v) => write!(f, "{v}"),
            TypedValue::Bool(v) => write!(f, "{v}"),
            TypedValue::I16(v) => write!(f, "{v}"),
            TypedValue::I8(v) => write!(f, "{v}"),
            TypedValue::Char(v) => write!(f, "{v}"),
            TypedValue::String(v) => f.write_str(v),
            TypedValue::Path(v) => write!(f, "{}", v.display()),
            TypedValue::DateTime(v) => f.write_str(&rfc3339(v)),
            TypedValue::Json(v) => write!(f, "{v}"),
            TypedValue::Record { value, .. } => write!(f, "{value}"),
        }
    }
}

/// The stored form of a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub text: String,
    /// `None` iff the value is null.
    pub tag: Option<String>,
}

impl Encoded {
    pub fn null() -> Self {
        Self {
            text: NULL_RESULT.to_string(),
            tag: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

type RecordDecoder = fn(&str) -> Result<serde_json::Value, CodecError>;

/// Closed registry of decodable type tags.
#[derive(Clone, Default)]
pub struct Codec {
    records: HashMap<String, RecordDecoder>,
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&String> = self.records.keys().collect();
        tags.sort();
        f.debug_struct("Codec").field("records", &tags).finish()
    }
}

fn decode_record<T: DurableRecord>(text: &str) -> Result<serde_json::Value, CodecError> {
    let typed: T =
        serde_json::from_str(text).map_err(|e| CodecError::malformed(T::TYPE_TAG, text, e))?;
    serde_json::to_value(typed).map_err(|e| CodecError::Unencodable(e.to_string()))
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `T::TYPE_TAG` decodable. Re-registering the same tag replaces it.
    pub fn register_record<T: DurableRecord>(&mut self) -> &mut Self {
        self.records
            .insert(T::TYPE_TAG.to_string(), decode_record::<T>);
        self
    }

    /// Whether `tag` can be decoded by this codec.
    pub fn supports(&self, tag: &str) -> bool {
        tags::PRIMITIVES.contains(&tag)
            || matches!(tag, tags::STRING | tags::PATH | tags::DATETIME | tags::JSON)
            || self.records.contains_key(tag)
    }

    /// Render a value to its stored `(text, tag)` form.
    pub fn encode(&self, value: &TypedValue) -> Result<Encoded, CodecError> {
        let text = match value {
            TypedValue::Null => return Ok(Encoded::null()),
            TypedValue::I32(v) => v.to_string(),
            TypedValue::I64(v) => v.to_string(),
            TypedValue::I16(v) => v.to_string(),
            TypedValue::I8(v) => v.to_string(),
            TypedValue::Bool(v) => v.to_string(),
            TypedValue::F64(v) => finite_json(f64::is_finite(*v), v)?,
            TypedValue::F32(v) => finite_json(f32::is_finite(*v), v)?,
            TypedValue::Char(v) => json_text(&v.to_string())?,
            TypedValue::String(v) => json_text(v)?,
            TypedValue::Path(p) => {
                let raw = p.to_str().ok_or_else(|| {
                    CodecError::Unencodable(format!("non UTF-8 path {}", p.display()))
                })?;
                json_text(&format!("{FILE_SCHEME}{raw}"))?
            }
            TypedValue::DateTime(v) => json_text(&rfc3339(v))?,
            TypedValue::Json(v) => json_text(v)?,
            TypedValue::Record { tag, value } => {
                if !self.records.contains_key(tag) {
                    return Err(CodecError::UnsupportedType(tag.clone()));
                }
                json_text(value)?
            }
        };
        Ok(Encoded {
            text,
            tag: value.type_tag().map(str::to_string),
        })
    }

    /// Rebuild a value from its stored form.
    ///
    /// A missing tag or missing text yields `TypedValue::Null`.
    pub fn decode(
        &self,
        tag: Option<&str>,
        text: Option<&str>,
    ) -> Result<TypedValue, CodecError> {
        let (Some(tag), Some(text)) = (tag, text) else {
            return Ok(TypedValue::Null);
        };
        match tag {
            tags::I32 => parse_number(tag, text).map(TypedValue::I32),
            tags::I64 => parse_number(tag, text).map(TypedValue::I64),
            tags::F64 => parse_number(tag, text).map(TypedValue::F64),
            tags::F32 => parse_number(tag, text).map(TypedValue::F32),
            tags::I16 => parse_number(tag, text).map(TypedValue::I16),
            tags::I8 => parse_number(tag, text).map(TypedValue::I8),
            tags::BOOL => match text.trim() {
                "true" => Ok(TypedValue::Bool(true)),
                "false" => Ok(TypedValue::Bool(false)),
                _ => Err(CodecError::malformed(tag, text, "expected true or false")),
            },
            tags::CHAR => unquote(text)
                .chars()
                .next()
                .map(TypedValue::Char)
                .ok_or_else(|| CodecError::malformed(tag, text, "empty char")),
            tags::STRING => Ok(TypedValue::String(unquote(text))),
            tags::PATH => {
                let raw = unquote(text);
                let path = raw.strip_prefix(FILE_SCHEME).unwrap_or(&raw);
                Ok(TypedValue::Path(PathBuf::from(path)))
            }
            tags::DATETIME => DateTime::parse_from_rfc3339(&unquote(text))
                .map(|v| TypedValue::DateTime(v.with_timezone(&Utc)))
                .map_err(|e| CodecError::malformed(tag, text, e)),
            tags::JSON => serde_json::from_str(text)
                .map(TypedValue::Json)
                .map_err(|e| CodecError::malformed(tag, text, e)),
            other => {
                let decoder = self
                    .records
                    .get(other)
                    .ok_or_else(|| CodecError::UnsupportedType(other.to_string()))?;
                Ok(TypedValue::Record {
                    tag: other.to_string(),
                    value: decoder(text)?,
                })
            }
        }
    }

    /// Encode a statically typed value.
    pub fn encode_value<T: Durable>(&self, value: &T) -> Result<Encoded, CodecError> {
        self.encode(&value.to_typed()?)
    }

    /// Decode straight into a statically typed value.
    pub fn decode_value<T: Durable>(
        &self,
        tag: Option<&str>,
        text: Option<&str>,
    ) -> Result<T, CodecError> {
        T::from_typed(self.decode(tag, text)?)
    }
}

fn rfc3339(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn json_text<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(|e| CodecError::Unencodable(e.to_string()))
}

fn finite_json<T: serde::Serialize>(finite: bool, value: &T) -> Result<String, CodecError> {
    if !finite {
        return Err(CodecError::Unencodable("non-finite float".to_string()));
    }
    json_text(value)
}

fn parse_number<T>(tag: &str, text: &str) -> Result<T, CodecError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    text.trim()
        .parse::<T>()
        .map_err(|e| CodecError::malformed(tag, text, e))
}

/// Strip one surrounding pair of double quotes, JSON-unescaping when possible.
///
/// Unquoted text is returned verbatim so that older rows holding raw strings
/// still decode.
fn unquote(text: &str) -> String {
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        serde_json::from_str::<String>(text)
            .unwrap_or_else(|_| text[1..text.len() - 1].to_string())
    } else {
        text.to_string()
    }
}
