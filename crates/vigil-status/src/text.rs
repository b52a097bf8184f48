//! Fixed-capacity text buffers.
//!
//! Every string in a [`StatusRecord`](crate::StatusRecord) lives inline in a
//! [`BoundedText`] so the record can be copied and encoded from a signal
//! handler without touching the allocator. Writes that exceed the capacity
//! are truncated on a UTF-8 character boundary.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// Inline UTF-8 text holding at most `N` bytes.
#[derive(Clone, Copy)]
pub struct BoundedText<const N: usize> {
    len: usize,
    bytes: [u8; N],
}

impl<const N: usize> BoundedText<N> {
    /// Maximum number of bytes the buffer holds.
    pub const CAPACITY: usize = N;

    /// Creates an empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            len: 0,
            bytes: [0; N],
        }
    }

    /// Creates a buffer holding as much of `text` as fits.
    #[must_use]
    pub fn truncated(text: &str) -> Self {
        let mut buffer = Self::new();
        buffer.set(text);
        buffer
    }

    /// Replaces the contents with `text`, returning `true` when it had to be
    /// truncated.
    pub fn set(&mut self, text: &str) -> bool {
        self.len = 0;
        self.push_str(text)
    }

    /// Appends as much of `text` as fits, returning `true` when it had to be
    /// truncated.
    pub fn push_str(&mut self, text: &str) -> bool {
        let room = N.saturating_sub(self.len);
        let take = floor_char_boundary(text, room);
        if let (Some(target), Some(source)) = (
            self.bytes.get_mut(self.len..self.len + take),
            text.as_bytes().get(..take),
        ) {
            target.copy_from_slice(source);
            self.len += take;
        }
        take < text.len()
    }

    /// Empties the buffer.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Number of bytes in use.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when no text is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrows the stored text.
    ///
    /// A buffer copied while another writer was mid-update may hold a torn
    /// multi-byte sequence; only the valid prefix is returned in that case.
    #[must_use]
    pub fn as_str(&self) -> &str {
        let stored = self.bytes.get(..self.len.min(N)).unwrap_or_default();
        match std::str::from_utf8(stored) {
            Ok(text) => text,
            Err(error) => stored
                .get(..error.valid_up_to())
                .and_then(|valid| std::str::from_utf8(valid).ok())
                .unwrap_or_default(),
        }
    }
}

fn floor_char_boundary(text: &str, limit: usize) -> usize {
    if limit >= text.len() {
        return text.len();
    }
    let mut index = limit;
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

impl<const N: usize> Default for BoundedText<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PartialEq for BoundedText<N> {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl<const N: usize> Eq for BoundedText<N> {}

impl<const N: usize> fmt::Debug for BoundedText<N> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), formatter)
    }
}

impl<const N: usize> fmt::Display for BoundedText<N> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Formatting into a bounded buffer never fails; overflow is truncated.
impl<const N: usize> fmt::Write for BoundedText<N> {
    fn write_str(&mut self, text: &str) -> fmt::Result {
        self.push_str(text);
        Ok(())
    }
}

impl<const N: usize> Serialize for BoundedText<N> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de, const N: usize> Deserialize<'de> for BoundedText<N> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(TextVisitor::<N>)
    }
}

struct TextVisitor<const N: usize>;

impl<const N: usize> Visitor<'_> for TextVisitor<N> {
    type Value = BoundedText<N>;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a string")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(BoundedText::truncated(value))
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(BoundedText::new())
    }

    fn visit_none<E>(self) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(BoundedText::new())
    }
}
