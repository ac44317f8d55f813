//! Content digests: fixed-width SHA-256 values used as blob filenames and
//! database keys throughout the resource pipeline.

use sha2::{Digest as _, Sha256};
use std::fmt;
use std::io::{self, Read};

/// A 32-byte SHA-256 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 32]);

impl Digest {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Digest(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Digest(arr))
    }

    /// Hash a byte slice in one shot.
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Digest(hasher.finalize().into())
    }

    /// SHA-256 of the empty byte string. Reserved for the inlined empty
    /// file sentinel (resource_id 0).
    pub fn empty() -> Self {
        Self::of(&[])
    }

    /// Stream-hash a reader using a caller-supplied, reusable buffer.
    /// Load-bearing for ingest/filter throughput: callers allocate the
    /// buffer once per worker thread, not once per file.
    pub fn hash_reader(mut r: impl Read, buf: &mut [u8]) -> io::Result<(Self, u64)> {
        let mut hasher = Sha256::new();
        let mut total = 0u64;
        loop {
            let n = r.read(buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n as u64;
        }
        Ok((Digest(hasher.finalize().into()), total))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental hasher wrapper, for callers that need to hash a stream as
/// they write it elsewhere (e.g. the bundle filter hashing its uncompressed
/// stream while feeding a zstd encoder).
pub struct StreamingHasher(Sha256);

impl StreamingHasher {
    pub fn new() -> Self {
        StreamingHasher(Sha256::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> Digest {
        Digest(self.0.finalize().into())
    }
}

impl Default for StreamingHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_digest_is_well_known_sha256() {
        assert_eq!(
            Digest::empty().to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hex_roundtrip() {
        let d = Digest::of(b"hello world");
        let hex = d.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Digest::from_hex(&hex), Some(d));
    }

    #[test]
    fn hash_reader_matches_one_shot() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let mut buf = vec![0u8; 17];
        let (streamed, total) = Digest::hash_reader(&data[..], &mut buf).unwrap();
        assert_eq!(total, data.len() as u64);
        assert_eq!(streamed, Digest::of(&data));
    }
}
