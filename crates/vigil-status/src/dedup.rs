//! Recognition of recurring faults.
//!
//! A [`Fingerprint`] condenses the stable parts of a fault (where it happened
//! and what it said) into a 64-bit hash. The [`DedupRing`] remembers the last
//! [`DEDUP_CAPACITY`] fingerprints in insertion order; eviction of the oldest
//! entry is the only way a fingerprint is forgotten.

use std::fmt;

use serde::de::{Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of fingerprints the ring remembers.
pub const DEDUP_CAPACITY: usize = 20;

/// Hash over the stable fields of a fault.
///
/// Timestamps, thread tags, stack traces and error text are excluded because
/// they vary between occurrences of the same logical fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Computes the fingerprint of a fault location and message.
    #[must_use]
    pub fn of(filename: &str, function: &str, line: u32, message: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(filename.as_bytes());
        hasher.update([0]);
        hasher.update(function.as_bytes());
        hasher.update([0]);
        for shift in [24_u32, 16, 8, 0] {
            hasher.update([u8::try_from((line >> shift) & 0xff).unwrap_or_default()]);
        }
        hasher.update(message.as_bytes());
        let digest = hasher.finalize();
        let hash = digest
            .iter()
            .take(8)
            .fold(0_u64, |hash, byte| (hash << 8) | u64::from(*byte));
        // Zero marks an empty ring slot.
        Self(hash.max(1))
    }

    /// Wraps a previously computed hash.
    #[must_use]
    pub const fn from_raw(hash: u64) -> Self {
        Self(hash)
    }

    /// Raw hash value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

/// Outcome of checking a fingerprint against the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupVerdict {
    /// First occurrence within the remembered window.
    New,
    /// The fingerprint is already in the ring.
    Duplicate,
}

impl DedupVerdict {
    /// Returns `true` for [`DedupVerdict::Duplicate`].
    #[must_use]
    pub const fn is_duplicate(self) -> bool {
        matches!(self, Self::Duplicate)
    }
}

/// One remembered fingerprint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupEntry {
    /// Fingerprint hash; zero marks an unused slot.
    pub hash: u64,
    /// When the fingerprint was first recorded, in microseconds since the epoch.
    pub timestamp: u64,
}

/// Fixed-size FIFO of recent fingerprints.
///
/// Persisted as a JSON array ordered oldest first.
#[derive(Clone, Copy, Default)]
pub struct DedupRing {
    slots: [DedupEntry; DEDUP_CAPACITY],
    cursor: usize,
}

impl DedupRing {
    /// Creates an empty ring.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [DedupEntry {
                hash: 0,
                timestamp: 0,
            }; DEDUP_CAPACITY],
            cursor: 0,
        }
    }

    /// Checks `fingerprint` against the ring, recording it when unseen.
    ///
    /// A miss overwrites the oldest slot once the ring is full.
    pub fn observe(&mut self, fingerprint: Fingerprint, now: u64) -> DedupVerdict {
        if self.contains(fingerprint) {
            return DedupVerdict::Duplicate;
        }
        self.push(DedupEntry {
            hash: fingerprint.value(),
            timestamp: now,
        });
        DedupVerdict::New
    }

    /// Returns `true` when the fingerprint is remembered.
    #[must_use]
    pub fn contains(&self, fingerprint: Fingerprint) -> bool {
        self.slots
            .iter()
            .any(|entry| entry.hash != 0 && entry.hash == fingerprint.value())
    }

    /// Number of remembered fingerprints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|entry| entry.hash != 0).count()
    }

    /// Returns `true` when nothing is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over remembered entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &DedupEntry> {
        let (newer, older) = self.slots.split_at(self.cursor);
        older
            .iter()
            .chain(newer.iter())
            .filter(|entry| entry.hash != 0)
    }

    fn push(&mut self, entry: DedupEntry) {
        if let Some(slot) = self.slots.get_mut(self.cursor) {
            *slot = entry;
        }
        self.cursor += 1;
        if self.cursor == DEDUP_CAPACITY {
            self.cursor = 0;
        }
    }
}

impl PartialEq for DedupRing {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for DedupRing {}

impl fmt::Debug for DedupRing {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_list().entries(self.iter()).finish()
    }
}

impl Serialize for DedupRing {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut sequence = serializer.serialize_seq(Some(self.len()))?;
        for entry in self.iter() {
            sequence.serialize_element(entry)?;
        }
        sequence.end()
    }
}

impl<'de> Deserialize<'de> for DedupRing {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(RingVisitor)
    }
}

struct RingVisitor;

impl<'de> Visitor<'de> for RingVisitor {
    type Value = DedupRing;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a list of dedup entries")
    }

    fn visit_seq<A>(self, mut sequence: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        // Replaying in order keeps the newest entries when a longer history
        // was written by another build.
        let mut ring = DedupRing::new();
        while let Some(entry) = sequence.next_element::<DedupEntry>()? {
            if entry.hash != 0 {
                ring.push(entry);
            }
        }
        Ok(ring)
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(DedupRing::new())
    }

    fn visit_none<E>(self) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(DedupRing::new())
    }
}
