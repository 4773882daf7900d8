//! Canonical hashing and digest encoding.
//!
//! Every other digest in the system is reducible to [`hash_bytes`] or [`hash_concat`] calls; no
//! other component is allowed to invent its own hash framing.

use std::cmp::Ordering;
use std::fmt::{self, Debug, Display, Formatter};
use std::io::{self, Read, Write};
use std::str::FromStr;

use serde::{de::Deserializer, ser::Serializer, Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::Error;

/// The raw byte length of a [`Digest`].
pub const DIGEST_SIZE: usize = 32;

/// A fixed-width cryptographic hash identifying a blob, tree, or package.
///
/// Two digests compare equal iff their raw bytes are equal. The canonical text form used
/// internally (for blob and manifest file names) is lowercase hex; [`Digest::to_base32`] produces
/// the unpadded base32 form used for user-visible build identifiers.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Digest([u8; DIGEST_SIZE]);

impl Digest {
    /// The length, in characters, of a digest's hex encoding.
    pub const HEX_LENGTH: usize = DIGEST_SIZE * 2;

    /// Wraps a raw byte array as a `Digest` without hashing anything.
    pub const fn from_bytes(bytes: [u8; DIGEST_SIZE]) -> Self {
        Digest(bytes)
    }

    /// Returns the raw bytes of this digest.
    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// Returns the lowercase hex encoding of this digest.
    ///
    /// This is the canonical form used for blob and manifest file names on disk.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns the unpadded base32 encoding of this digest.
    ///
    /// This is the form used for user-visible "build" identifiers (see spec §6); it is never used
    /// for on-disk blob or manifest names.
    pub fn to_base32(&self) -> String {
        data_encoding::BASE32_NOPAD.encode(&self.0)
    }

    /// Parses a digest from its base32 form, as produced by [`Digest::to_base32`].
    pub fn parse_base32(s: &str) -> Result<Self, Error> {
        let bytes = data_encoding::BASE32_NOPAD
            .decode(s.to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::InvalidInput(format!("{:?} is not a valid base32 digest", s)))?;
        Self::from_slice(&bytes)
    }

    fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let array: [u8; DIGEST_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::InvalidInput(format!("digest must be {} bytes", DIGEST_SIZE)))?;
        Ok(Digest(array))
    }
}

impl Debug for Digest {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = Error;

    /// Parses a digest from its canonical lowercase hex form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != Self::HEX_LENGTH {
            return Err(Error::InvalidInput(format!(
                "digest must be {} hex characters, got {}",
                Self::HEX_LENGTH,
                s.len()
            )));
        }

        let mut buf = [0u8; DIGEST_SIZE];
        hex::decode_to_slice(s, &mut buf)
            .map_err(|_| Error::InvalidInput(format!("{:?} is not a valid hex digest", s)))?;
        Ok(Digest(buf))
    }
}

impl PartialOrd for Digest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Digest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Digest::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_hex().serialize(serializer)
    }
}

/// An incremental hasher that computes [`Digest`]s using SHA-256, the reference algorithm.
#[derive(Default)]
pub struct Hasher(Sha256);

impl Debug for Hasher {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("Hasher(..)")
    }
}

impl Hasher {
    /// Constructs a new, empty `Hasher`.
    pub fn new() -> Self {
        Hasher(Sha256::new())
    }

    /// Adds input bytes to the hash state. May be called any number of times.
    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.update(bytes);
        self
    }

    /// Finalizes the hash state and returns the computed `Digest`.
    pub fn finish(self) -> Digest {
        Digest(self.0.finalize().into())
    }
}

/// Hashes a stream to completion and returns its digest.
///
/// This streams the entire input regardless of size; callers with a `Read` of unknown or
/// unbounded length do not need to buffer it first.
pub fn hash_bytes<R: Read>(mut reader: R) -> io::Result<Digest> {
    let mut hasher = Hasher::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(hasher.finish()),
            Ok(n) => {
                hasher.update(&buf[..n]);
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Hashes a fixed in-memory buffer and returns its digest.
pub fn hash_slice(bytes: &[u8]) -> Digest {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finish()
}

/// Hashes several independent byte strings together such that the boundaries between them are
/// unambiguous.
///
/// Each part is framed with its own 8-byte big-endian length prefix before being folded into the
/// hash state, so that, for example, `hash_concat(&[a, b]) != hash_concat(&[ab, b""])` even when
/// the concatenation of `a` and `b` is identical to `ab`.
pub fn hash_concat(parts: &[&[u8]]) -> Digest {
    let mut hasher = Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    hasher.finish()
}

/// Wraps an I/O writer and hashes everything written through it, producing a [`Digest`].
pub struct HashWriter<W> {
    inner: W,
    hasher: Hasher,
}

impl<W: Debug> Debug for HashWriter<W> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("HashWriter").field("inner", &self.inner).finish()
    }
}

impl<W> HashWriter<W> {
    /// Wraps `inner`, hashing every byte subsequently written through it.
    pub fn new(inner: W) -> Self {
        HashWriter {
            inner,
            hasher: Hasher::new(),
        }
    }

    /// Returns the digest of everything written so far, without consuming the writer.
    pub fn digest(&self) -> Digest {
        Hasher(self.hasher.0.clone()).finish()
    }

    /// Unwraps this `HashWriter<W>`, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for HashWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = self.inner.write(buf)?;
        self.hasher.update(&buf[..len]);
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips() {
        let digest = hash_slice(b"hello");
        let text = digest.to_hex();
        assert_eq!(text.len(), Digest::HEX_LENGTH);
        assert_eq!(text.parse::<Digest>().unwrap(), digest);
    }

    #[test]
    fn base32_round_trips() {
        let digest = hash_slice(b"hello");
        let text = digest.to_base32();
        assert_eq!(Digest::parse_base32(&text).unwrap(), digest);
    }

    #[test]
    fn hashing_is_deterministic() {
        assert_eq!(hash_slice(b"hello"), hash_slice(b"hello"));
    }

    #[test]
    fn concat_framing_is_unambiguous() {
        let a = hash_concat(&[b"a", b"b"]);
        let b = hash_concat(&[b"ab", b""]);
        assert_ne!(a, b);
    }

    #[test]
    fn hash_bytes_streams_large_input() {
        let data = vec![7u8; 10 * 1024 * 1024];
        let digest = hash_bytes(std::io::Cursor::new(&data)).unwrap();
        assert_eq!(digest, hash_slice(&data));
    }
}
