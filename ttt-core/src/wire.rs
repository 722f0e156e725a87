//! Tunnel framing: unreliable frames (`channel_id ++ payload`) and reliable segments
//! (`flag ++ chunk`, flag 0 = more follow, nonzero = last).

/// Channel id prefixed to unreliable tunnel packets (first id of the overlay's lossy custom range).
pub const TUNNEL_CHANNEL_ID: u8 = 200;

const FLAG_SIZE: usize = 1;
const FLAG_MORE: u8 = 0;
const FLAG_LAST: u8 = 1;

/// Encode an unreliable frame: 1-byte channel id + raw payload.
pub fn encode_unreliable(channel_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FLAG_SIZE + payload.len());
    out.push(channel_id);
    out.extend_from_slice(payload);
    out
}

/// Decode an unreliable frame addressed to `channel_id`. Returns the payload.
pub fn decode_unreliable(channel_id: u8, packet: &[u8]) -> Result<&[u8], FrameDecodeError> {
    if packet.len() < FLAG_SIZE + 1 {
        return Err(FrameDecodeError::TooShort(packet.len()));
    }
    if packet[0] != channel_id {
        return Err(FrameDecodeError::ChannelMismatch(packet[0]));
    }
    Ok(&packet[FLAG_SIZE..])
}

/// Split a datagram into reliable segments of at most `max_segment_size` bytes each, flag included.
pub fn fragment(payload: &[u8], max_segment_size: usize) -> Result<Vec<Vec<u8>>, FrameEncodeError> {
    if payload.is_empty() {
        return Err(FrameEncodeError::Empty);
    }
    if max_segment_size <= FLAG_SIZE {
        return Err(FrameEncodeError::SegmentTooSmall(max_segment_size));
    }
    let chunk_size = max_segment_size - FLAG_SIZE;
    let count = payload.len().div_ceil(chunk_size);
    let segments = payload
        .chunks(chunk_size)
        .enumerate()
        .map(|(i, chunk)| {
            let mut seg = Vec::with_capacity(FLAG_SIZE + chunk.len());
            seg.push(if i + 1 == count { FLAG_LAST } else { FLAG_MORE });
            seg.extend_from_slice(chunk);
            seg
        })
        .collect();
    Ok(segments)
}

/// One parsed reliable segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    pub last: bool,
    pub chunk: &'a [u8],
}

/// Parse a reliable segment. A segment must carry at least one payload byte.
pub fn parse_fragment(segment: &[u8]) -> Result<Fragment<'_>, FrameDecodeError> {
    if segment.len() < FLAG_SIZE + 1 {
        return Err(FrameDecodeError::TooShort(segment.len()));
    }
    Ok(Fragment {
        last: segment[0] != FLAG_MORE,
        chunk: &segment[FLAG_SIZE..],
    })
}

/// Per-peer reassembly buffer. Relies on the reliable channel's FIFO order and assumes a single
/// multi-segment message in flight per peer; there is no message id.
#[derive(Debug, Default)]
pub struct Reassembler {
    buf: Vec<u8>,
    limit: usize,
    /// Set after an overflow; the rest of that message is dropped up to its last fragment.
    discarding: bool,
}

impl Reassembler {
    /// `limit` caps the reassembled datagram size.
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            discarding: false,
        }
    }

    /// Append a fragment. Returns the full datagram when the last fragment arrives. A message that
    /// outgrows the limit is reported once and never delivered, not even its tail.
    pub fn push(&mut self, fragment: Fragment<'_>) -> Result<Option<Vec<u8>>, FrameDecodeError> {
        if self.discarding {
            if fragment.last {
                self.discarding = false;
            }
            return Ok(None);
        }
        let have = self.buf.len() + fragment.chunk.len();
        if have > self.limit {
            self.buf.clear();
            self.discarding = !fragment.last;
            return Err(FrameDecodeError::TooLarge(have));
        }
        self.buf.extend_from_slice(fragment.chunk);
        if fragment.last {
            Ok(Some(std::mem::take(&mut self.buf)))
        } else {
            Ok(None)
        }
    }

    /// Bytes buffered for the message in flight.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Error building reliable segments.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameEncodeError {
    #[error("empty payload")]
    Empty,
    #[error("segment size {0} leaves no room for payload")]
    SegmentTooSmall(usize),
}

/// Error decoding a tunnel frame or segment.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameDecodeError {
    #[error("packet too short ({0} bytes)")]
    TooShort(usize),
    #[error("unexpected channel id {0}")]
    ChannelMismatch(u8),
    #[error("reassembled datagram too large ({0} bytes)")]
    TooLarge(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn unreliable_roundtrip() {
        let frame = encode_unreliable(TUNNEL_CHANNEL_ID, b"d1:ad2:id20:");
        assert_eq!(frame[0], TUNNEL_CHANNEL_ID);
        assert_eq!(
            decode_unreliable(TUNNEL_CHANNEL_ID, &frame).unwrap(),
            b"d1:ad2:id20:"
        );
    }

    #[test]
    fn unreliable_rejects_short_and_wrong_channel() {
        assert_eq!(
            decode_unreliable(TUNNEL_CHANNEL_ID, &[TUNNEL_CHANNEL_ID]),
            Err(FrameDecodeError::TooShort(1))
        );
        assert_eq!(
            decode_unreliable(TUNNEL_CHANNEL_ID, &[201, 1, 2]),
            Err(FrameDecodeError::ChannelMismatch(201))
        );
    }

    #[test]
    fn fragment_3000_bytes_into_1024_segments() {
        let data = payload(3000);
        let segs = fragment(&data, 1024).unwrap();
        assert_eq!(segs.len(), 3);
        assert!(segs.iter().all(|s| s.len() <= 1024));
        assert_eq!(segs[0][0], 0);
        assert_eq!(segs[1][0], 0);
        assert_ne!(segs[2][0], 0);

        let mut r = Reassembler::new(65_507);
        let mut out = None;
        for s in &segs {
            out = r.push(parse_fragment(s).unwrap()).unwrap();
        }
        assert_eq!(out.unwrap(), data);
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn overflowing_message_tail_is_dropped() {
        let mut r = Reassembler::new(4);
        assert_eq!(r.push(parse_fragment(&[0, 1, 2, 3]).unwrap()), Ok(None));
        assert_eq!(
            r.push(parse_fragment(&[0, 4, 5]).unwrap()),
            Err(FrameDecodeError::TooLarge(5))
        );
        // Rest of the same message, including its last fragment, yields nothing.
        assert_eq!(r.push(parse_fragment(&[0, 6]).unwrap()), Ok(None));
        assert_eq!(r.push(parse_fragment(&[1, 6]).unwrap()), Ok(None));
        assert_eq!(r.pending(), 0);
        // The following message is delivered intact.
        assert_eq!(r.push(parse_fragment(&[0, 8]).unwrap()), Ok(None));
        assert_eq!(r.push(parse_fragment(&[1, 9]).unwrap()), Ok(Some(vec![8, 9])));
    }

    #[test]
    fn random_payloads_reassemble() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let mut r = Reassembler::new(65_507);
        for _ in 0..50 {
            let len: usize = rng.gen_range(1..5000);
            let seg_size: usize = rng.gen_range(2..1500);
            let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let segs = fragment(&data, seg_size).unwrap();
            assert_eq!(segs.len(), len.div_ceil(seg_size - 1));
            let mut out = None;
            for s in &segs {
                assert!(s.len() <= seg_size);
                assert!(out.is_none());
                out = r.push(parse_fragment(s).unwrap()).unwrap();
            }
            assert_eq!(out.unwrap(), data);
        }
    }

    #[test]
    fn fragment_exact_multiple() {
        let segs = fragment(&payload(20), 11).unwrap();
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[1].len(), 11);
        assert_eq!(segs[1][0], FLAG_LAST);
    }

    #[test]
    fn fragment_single_segment_is_last() {
        let segs = fragment(b"x", 1024).unwrap();
        assert_eq!(segs, vec![vec![FLAG_LAST, b'x']]);
    }

    #[test]
    fn fragment_errors() {
        assert_eq!(fragment(&[], 100), Err(FrameEncodeError::Empty));
        assert_eq!(fragment(b"abc", 1), Err(FrameEncodeError::SegmentTooSmall(1)));
    }

    #[test]
    fn parse_rejects_flag_only() {
        assert_eq!(parse_fragment(&[1]), Err(FrameDecodeError::TooShort(1)));
        assert_eq!(parse_fragment(&[]), Err(FrameDecodeError::TooShort(0)));
    }

    #[test]
    fn any_nonzero_flag_is_last() {
        assert!(parse_fragment(&[0xff, 9]).unwrap().last);
        assert!(!parse_fragment(&[0, 9]).unwrap().last);
    }

    #[test]
    fn reassembler_limit_discards_partial() {
        let mut r = Reassembler::new(4);
        assert_eq!(r.push(parse_fragment(&[0, 1, 2, 3]).unwrap()), Ok(None));
        assert_eq!(
            r.push(parse_fragment(&[1, 4, 5]).unwrap()),
            Err(FrameDecodeError::TooLarge(5))
        );
        assert_eq!(r.pending(), 0);
        // Next message starts clean.
        assert_eq!(
            r.push(parse_fragment(&[1, 7]).unwrap()),
            Ok(Some(vec![7]))
        );
    }
}
