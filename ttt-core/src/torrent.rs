//! Torrent identity: info hashes (v1 SHA-1, v2 SHA-256) and overlay peer ids.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Length of a v1 (SHA-1) info hash in bytes.
pub const INFO_HASH_V1_LEN: usize = 20;
/// Length of a v2 (SHA-256) info hash in bytes.
pub const INFO_HASH_V2_LEN: usize = 32;

/// Overlay peer (friend number assigned by the transport).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Info hash of a torrent. Exactly one variant, so a torrent can never carry zero or two hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InfoHash {
    V1([u8; INFO_HASH_V1_LEN]),
    V2([u8; INFO_HASH_V2_LEN]),
}

impl InfoHash {
    /// v1 info hash of a raw bencoded info dictionary.
    pub fn digest_v1(info: &[u8]) -> Self {
        InfoHash::V1(Sha1::digest(info).into())
    }

    /// v2 info hash of a raw bencoded info dictionary.
    pub fn digest_v2(info: &[u8]) -> Self {
        InfoHash::V2(Sha256::digest(info).into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            InfoHash::V1(b) => b,
            InfoHash::V2(b) => b,
        }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    /// Parse a hex string. Length picks the variant: 40 chars for v1, 64 for v2.
    pub fn from_hex(s: &str) -> Result<Self, ParseHashError> {
        match s.len() {
            40 => {
                let mut out = [0u8; INFO_HASH_V1_LEN];
                hex::decode_to_slice(s, &mut out)?;
                Ok(InfoHash::V1(out))
            }
            64 => {
                let mut out = [0u8; INFO_HASH_V2_LEN];
                hex::decode_to_slice(s, &mut out)?;
                Ok(InfoHash::V2(out))
            }
            n => Err(ParseHashError::Length(n)),
        }
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfoHash::V1(_) => write!(f, "v1:{};", self.to_hex()),
            InfoHash::V2(_) => write!(f, "v2:{};", self.to_hex()),
        }
    }
}

impl FromStr for InfoHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InfoHash::from_hex(s)
    }
}

// Hashes travel as hex strings in config files.
impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        InfoHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Error parsing a hex info hash.
#[derive(Debug, thiserror::Error)]
pub enum ParseHashError {
    #[error("expected 40 or 64 hex characters, got {0}")]
    Length(usize),
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// A shareable file set, identified by its info hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Torrent {
    info_hash: InfoHash,
}

impl Torrent {
    pub fn new(info_hash: InfoHash) -> Self {
        Self { info_hash }
    }

    pub fn info_hash(&self) -> &InfoHash {
        &self.info_hash
    }

    /// Magnet URI for listings. v2 uses the multihash form (sha2-256 prefix `1220`).
    pub fn magnet_uri(&self) -> String {
        match self.info_hash {
            InfoHash::V1(_) => format!("magnet:?xt=urn:btih:{}", self.info_hash.to_hex()),
            InfoHash::V2(_) => format!("magnet:?xt=urn:btmh:1220{}", self.info_hash.to_hex()),
        }
    }
}

impl From<InfoHash> for Torrent {
    fn from(info_hash: InfoHash) -> Self {
        Torrent::new(info_hash)
    }
}

impl fmt::Display for Torrent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.info_hash.fmt(f)
    }
}
