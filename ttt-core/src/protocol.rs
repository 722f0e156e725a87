//! Extension identifiers and the announce gossip package.

use std::fmt;

use crate::torrent::{InfoHash, INFO_HASH_V1_LEN, INFO_HASH_V2_LEN};

/// Shared by every extension of this application. Peers with a different prefix never match.
pub const EXTENSION_ID_PREFIX: [u8; 12] = [
    0x11, 0x13, 0xf4, 0xf7, 0x93, 0x19, 0x66, 0x5a, 0x22, 0xc2, 0xb5, 0xee,
];

/// Extension type byte for announce gossip.
pub const EXTENSION_TYPE_ANNOUNCE: u8 = 0x31;
/// Extension type byte for the UDP tunnel.
pub const EXTENSION_TYPE_TUNNEL_UDP: u8 = 0x32;

/// 16-byte sub-protocol id: shared prefix, then `11 13 <type> <version>`.
/// Mismatched suffixes negotiate as incompatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtensionId([u8; 16]);

impl ExtensionId {
    pub const fn new(ext_type: u8, version: u8) -> Self {
        let p = EXTENSION_ID_PREFIX;
        ExtensionId([
            p[0], p[1], p[2], p[3], p[4], p[5], p[6], p[7], p[8], p[9], p[10], p[11], 0x11, 0x13,
            ext_type, version,
        ])
    }

    pub const fn announce() -> Self {
        Self::new(EXTENSION_TYPE_ANNOUNCE, 0)
    }

    pub const fn tunnel_udp() -> Self {
        Self::new(EXTENSION_TYPE_TUNNEL_UDP, 0)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn ext_type(&self) -> u8 {
        self.0[14]
    }

    pub fn version(&self) -> u8 {
        self.0[15]
    }
}

impl fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

const TAG_V1: u8 = 0;
const TAG_V2: u8 = 1;

/// Info hashes announced to one peer in one message: `(tag:u8, hash)*`, no length prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnouncePackage {
    pub info_hashes: Vec<InfoHash>,
}

impl AnnouncePackage {
    /// Flow-control cap on entries per message.
    pub const MAX_INFO_HASHES: usize = 4;

    pub fn new(info_hashes: Vec<InfoHash>) -> Self {
        Self { info_hashes }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PackageEncodeError> {
        if self.info_hashes.is_empty() {
            return Err(PackageEncodeError::Empty);
        }
        if self.info_hashes.len() > Self::MAX_INFO_HASHES {
            return Err(PackageEncodeError::TooMany(self.info_hashes.len()));
        }
        let mut out = Vec::with_capacity(self.info_hashes.len() * (1 + INFO_HASH_V2_LEN));
        for ih in &self.info_hashes {
            match ih {
                InfoHash::V1(b) => {
                    out.push(TAG_V1);
                    out.extend_from_slice(b);
                }
                InfoHash::V2(b) => {
                    out.push(TAG_V2);
                    out.extend_from_slice(b);
                }
            }
        }
        Ok(out)
    }

    /// Decode a whole message. Stops at the entry cap; anything left after that is an error.
    pub fn decode(bytes: &[u8]) -> Result<Self, PackageDecodeError> {
        if bytes.is_empty() {
            return Err(PackageDecodeError::Empty);
        }
        let mut info_hashes = Vec::new();
        let mut rest = bytes;
        while !rest.is_empty() && info_hashes.len() < Self::MAX_INFO_HASHES {
            let (tag, body) = (rest[0], &rest[1..]);
            let (ih, tail) = match tag {
                TAG_V1 => {
                    let (raw, tail) = split_hash::<INFO_HASH_V1_LEN>(body)?;
                    (InfoHash::V1(raw), tail)
                }
                TAG_V2 => {
                    let (raw, tail) = split_hash::<INFO_HASH_V2_LEN>(body)?;
                    (InfoHash::V2(raw), tail)
                }
                other => return Err(PackageDecodeError::UnknownTag(other)),
            };
            info_hashes.push(ih);
            rest = tail;
        }
        if !rest.is_empty() {
            return Err(PackageDecodeError::TrailingBytes(rest.len()));
        }
        Ok(Self { info_hashes })
    }
}

fn split_hash<const N: usize>(bytes: &[u8]) -> Result<([u8; N], &[u8]), PackageDecodeError> {
    if bytes.len() < N {
        return Err(PackageDecodeError::Truncated {
            need: N,
            have: bytes.len(),
        });
    }
    let mut raw = [0u8; N];
    raw.copy_from_slice(&bytes[..N]);
    Ok((raw, &bytes[N..]))
}

/// Error encoding an announce package.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PackageEncodeError {
    #[error("no info hashes to announce")]
    Empty,
    #[error("{0} info hashes exceed the per-message cap")]
    TooMany(usize),
}

/// Error decoding an announce package.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PackageDecodeError {
    #[error("empty package")]
    Empty,
    #[error("truncated info hash: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("unknown info hash tag {0}")]
    UnknownTag(u8),
    #[error("{0} trailing bytes after last entry")]
    TrailingBytes(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn v1(b: u8) -> InfoHash {
        InfoHash::V1([b; 20])
    }

    fn v2(b: u8) -> InfoHash {
        InfoHash::V2([b; 32])
    }

    #[test]
    fn extension_ids() {
        let a = ExtensionId::announce();
        let t = ExtensionId::tunnel_udp();
        assert_eq!(&a.as_bytes()[..12], &EXTENSION_ID_PREFIX);
        assert_eq!(&a.as_bytes()[12..], &[0x11, 0x13, 0x31, 0x00]);
        assert_eq!(t.ext_type(), EXTENSION_TYPE_TUNNEL_UDP);
        assert_eq!(t.version(), 0);
        assert_ne!(a, t);
        assert_ne!(ExtensionId::new(EXTENSION_TYPE_ANNOUNCE, 1), a);
    }

    #[test]
    fn encode_layout() {
        let pkg = AnnouncePackage::new(vec![v1(0xaa), v2(0xbb)]);
        let bytes = pkg.encode().unwrap();
        assert_eq!(bytes.len(), 1 + 20 + 1 + 32);
        assert_eq!(bytes[0], 0);
        assert_eq!(bytes[1], 0xaa);
        assert_eq!(bytes[21], 1);
        assert_eq!(bytes[22], 0xbb);
    }

    #[test]
    fn encode_rejects_empty_and_oversized() {
        assert_eq!(
            AnnouncePackage::default().encode(),
            Err(PackageEncodeError::Empty)
        );
        let five = AnnouncePackage::new((0..5).map(v1).collect());
        assert_eq!(five.encode(), Err(PackageEncodeError::TooMany(5)));
    }

    #[test]
    fn decode_empty_fails() {
        assert_eq!(AnnouncePackage::decode(&[]), Err(PackageDecodeError::Empty));
    }

    #[test]
    fn decode_truncated_tag_payload() {
        let bytes = AnnouncePackage::new(vec![v2(3)]).encode().unwrap();
        assert_eq!(
            AnnouncePackage::decode(&bytes[..10]),
            Err(PackageDecodeError::Truncated { need: 32, have: 9 })
        );
        // Tag only.
        assert!(matches!(
            AnnouncePackage::decode(&[0]),
            Err(PackageDecodeError::Truncated { need: 20, have: 0 })
        ));
    }

    #[test]
    fn decode_unknown_tag() {
        let mut bytes = vec![7u8];
        bytes.extend_from_slice(&[0; 20]);
        assert_eq!(
            AnnouncePackage::decode(&bytes),
            Err(PackageDecodeError::UnknownTag(7))
        );
    }

    #[test]
    fn decode_rejects_fifth_entry() {
        let mut bytes = AnnouncePackage::new((0..4).map(v1).collect())
            .encode()
            .unwrap();
        let extra = AnnouncePackage::new(vec![v1(9)]).encode().unwrap();
        bytes.extend_from_slice(&extra);
        assert_eq!(
            AnnouncePackage::decode(&bytes),
            Err(PackageDecodeError::TrailingBytes(21))
        );
    }

    fn arb_hash() -> impl Strategy<Value = InfoHash> {
        prop_oneof![
            any::<[u8; 20]>().prop_map(InfoHash::V1),
            any::<[u8; 32]>().prop_map(InfoHash::V2),
        ]
    }

    proptest! {
        #[test]
        fn roundtrip_preserves_order(hashes in prop::collection::vec(arb_hash(), 1..=4)) {
            let pkg = AnnouncePackage::new(hashes.clone());
            let bytes = pkg.encode().unwrap();
            let decoded = AnnouncePackage::decode(&bytes).unwrap();
            prop_assert_eq!(decoded.info_hashes, hashes);
        }

        #[test]
        fn any_strict_prefix_fails(hashes in prop::collection::vec(arb_hash(), 1..=4), cut in 0usize..200) {
            let bytes = AnnouncePackage::new(hashes).encode().unwrap();
            let cut = cut % bytes.len();
            // Entry boundaries decode fine, everything else must fail cleanly.
            let r = AnnouncePackage::decode(&bytes[..cut]);
            if cut == 0 {
                prop_assert_eq!(r, Err(PackageDecodeError::Empty));
            } else if let Ok(pkg) = r {
                let reencoded = pkg.encode().unwrap();
                prop_assert_eq!(&reencoded[..], &bytes[..cut]);
            }
        }
    }
}
