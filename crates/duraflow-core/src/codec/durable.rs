//! Static <-> dynamic value conversion.
//!
//! `Durable` is implemented for every type the codec can persist. Handlers
//! and action blocks work with plain Rust types; the context converts them
//! to `TypedValue` at the durability boundary.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{CodecError, TypedValue, tags};

/// A value that can be stored as an argument or action result.
pub trait Durable: Sized + Send + 'static {
    fn to_typed(&self) -> Result<TypedValue, CodecError>;
    fn from_typed(value: TypedValue) -> Result<Self, CodecError>;
}

/// An application record type persisted as JSON under a stable tag.
///
/// Wrap values in [`Json`] to use them with the context, and register the
/// type with `Codec::register_record` so stored results can be decoded.
pub trait DurableRecord: Serialize + DeserializeOwned + Send + 'static {
    const TYPE_TAG: &'static str;
}

/// Adapter that makes a `DurableRecord` usable wherever `Durable` is expected.
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

macro_rules! durable_scalar {
    ($($ty:ty => $variant:ident, $tag:expr;)*) => {
        $(
            impl Durable for $ty {
                fn to_typed(&self) -> Result<TypedValue, CodecError> {
                    Ok(TypedValue::$variant(self.clone()))
                }

                fn from_typed(value: TypedValue) -> Result<Self, CodecError> {
                    match value {
                        TypedValue::$variant(v) => Ok(v),
                        other => Err(CodecError::mismatch($tag, &other)),
                    }
                }
            }
        )*
    };
}

durable_scalar! {
    i32 => I32, tags::I32;
    i64 => I64, tags::I64;
    f64 => F64, tags::F64;
    f32 => F32, tags::F32;
    bool => Bool, tags::BOOL;
    i16 => I16, tags::I16;
    i8 => I8, tags::I8;
    char => Char, tags::CHAR;
    String => String, tags::STRING;
    PathBuf => Path, tags::PATH;
    DateTime<Utc> => DateTime, tags::DATETIME;
    serde_json::Value => Json, tags::JSON;
}

impl Durable for () {
    fn to_typed(&self) -> Result<TypedValue, CodecError> {
        Ok(TypedValue::Null)
    }

    fn from_typed(value: TypedValue) -> Result<Self, CodecError> {
        match value {
            TypedValue::Null => Ok(()),
            other => Err(CodecError::mismatch("null", &other)),
        }
    }
}

impl<T: Durable> Durable for Option<T> {
    fn to_typed(&self) -> Result<TypedValue, CodecError> {
        match self {
            Some(v) => v.to_typed(),
            None => Ok(TypedValue::Null),
        }
    }

    fn from_typed(value: TypedValue) -> Result<Self, CodecError> {
        match value {
            TypedValue::Null => Ok(None),
            other => T::from_typed(other).map(Some),
        }
    }
}

impl Durable for TypedValue {
    fn to_typed(&self) -> Result<TypedValue, CodecError> {
        Ok(self.clone())
    }

    fn from_typed(value: TypedValue) -> Result<Self, CodecError> {
        Ok(value)
    }
}

impl<T: DurableRecord> Durable for Json<T> {
    fn to_typed(&self) -> Result<TypedValue, CodecError> {
        let value =
            serde_json::to_value(&self.0).map_err(|e| CodecError::Unencodable(e.to_string()))?;
        Ok(TypedValue::Record {
            tag: T::TYPE_TAG.to_string(),
            value,
        })
    }

    fn from_typed(value: TypedValue) -> Result<Self, CodecError> {
        match value {
            TypedValue::Record { tag, value } if tag == T::TYPE_TAG => serde_json::from_value(value)
                .map(Json)
                .map_err(|e| CodecError::Mismatch {
                    expected: T::TYPE_TAG.to_string(),
                    found: e.to_string(),
                }),
            other => Err(CodecError::mismatch(T::TYPE_TAG, &other)),
        }
    }
}
