//! Explicit, statically typed content hashing.
//!
//! Each entity type implements [`Hashable`] by feeding exactly the fields
//! that define its content into a [`ContentHasher`]. Bookkeeping fields
//! (ids, first-seen/last-updated stamps) are left out so a re-ingested but
//! otherwise unchanged record hashes the same as its stored version.
//!
//! Every field is written with a type tag and a length prefix so adjacent
//! fields cannot run into each other (`"ab" + "c"` differs from `"a" + "bc"`).

use std::collections::BTreeSet;
use std::fmt;

use blake3::Hasher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A 32-byte blake3 digest of an entity's content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Capability: a type with a content hash.
pub trait Hashable {
    /// Feeds the content-defining fields into `hasher`.
    fn hash_content(&self, hasher: &mut ContentHasher);

    /// Computes the content hash.
    fn content_hash(&self) -> ContentHash {
        let mut hasher = ContentHasher::new();
        self.hash_content(&mut hasher);
        hasher.finish()
    }
}

/// Field-by-field hash builder.
#[derive(Debug, Clone, Default)]
pub struct ContentHasher {
    inner: Hasher,
}

impl ContentHasher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tagged(&mut self, tag: u8, bytes: &[u8]) -> &mut Self {
        self.inner.update(&[tag]);
        self.inner.update(&(bytes.len() as u64).to_le_bytes());
        self.inner.update(bytes);
        self
    }

    pub fn str(&mut self, value: &str) -> &mut Self {
        self.tagged(b's', value.as_bytes())
    }

    pub fn opt_str(&mut self, value: Option<&str>) -> &mut Self {
        match value {
            Some(v) => self.tagged(b'S', v.as_bytes()),
            None => self.tagged(b'N', &[]),
        }
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.tagged(b'u', &value.to_le_bytes())
    }

    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.tagged(b'b', &[u8::from(value)])
    }

    pub fn opt_timestamp(&mut self, value: Option<DateTime<Utc>>) -> &mut Self {
        match value {
            Some(v) => self.tagged(b'T', &v.timestamp_millis().to_le_bytes()),
            None => self.tagged(b'N', &[]),
        }
    }

    /// Hashes a set; iteration order of a `BTreeSet` is deterministic.
    pub fn str_set(&mut self, values: &BTreeSet<String>) -> &mut Self {
        self.u64(values.len() as u64);
        for v in values {
            self.str(v);
        }
        self
    }

    /// Hashes a nested value.
    pub fn nested<H: Hashable + ?Sized>(&mut self, value: &H) -> &mut Self {
        self.inner.update(b"{");
        value.hash_content(self);
        self.inner.update(b"}");
        self
    }

    #[must_use]
    pub fn finish(&self) -> ContentHash {
        ContentHash(*self.inner.finalize().as_bytes())
    }
}
