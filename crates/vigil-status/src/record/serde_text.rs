//! Lenient field encodings.
//!
//! Records written by newer or older builds must still load, so enum values
//! this build does not know and malformed identifiers decay to their
//! defaults instead of failing the whole record.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::Serializer;
use uuid::Uuid;

/// Encodes enums as their static names and decodes unknown names as the
/// default variant.
pub(crate) mod named {
    use super::*;

    pub(crate) fn serialize<S, T>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Copy + Into<&'static str>,
    {
        serializer.serialize_str((*value).into())
    }

    pub(crate) fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: FromStr + Default,
    {
        deserializer.deserialize_any(LenientVisitor(PhantomData))
    }
}

/// Encodes identifiers in hyphenated form and decodes malformed ones as nil.
pub(crate) mod identifier {
    use super::*;

    pub(crate) fn serialize<S>(value: &Uuid, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut buffer = Uuid::encode_buffer();
        serializer.serialize_str(value.hyphenated().encode_lower(&mut buffer))
    }

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Uuid, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(LenientVisitor(PhantomData))
    }
}

struct LenientVisitor<T>(PhantomData<T>);

impl<T> Visitor<'_> for LenientVisitor<T>
where
    T: FromStr + Default,
{
    type Value = T;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a string")
    }

    fn visit_str<E>(self, value: &str) -> Result<T, E>
    where
        E: de::Error,
    {
        Ok(value.parse().unwrap_or_default())
    }

    fn visit_bool<E>(self, _value: bool) -> Result<T, E>
    where
        E: de::Error,
    {
        Ok(T::default())
    }

    fn visit_i64<E>(self, _value: i64) -> Result<T, E>
    where
        E: de::Error,
    {
        Ok(T::default())
    }

    fn visit_u64<E>(self, _value: u64) -> Result<T, E>
    where
        E: de::Error,
    {
        Ok(T::default())
    }

    fn visit_f64<E>(self, _value: f64) -> Result<T, E>
    where
        E: de::Error,
    {
        Ok(T::default())
    }

    fn visit_unit<E>(self) -> Result<T, E>
    where
        E: de::Error,
    {
        Ok(T::default())
    }

    fn visit_none<E>(self) -> Result<T, E>
    where
        E: de::Error,
    {
        Ok(T::default())
    }
}
