//! Serial frame codec: `payload || checksum || '\r'`.
//!
//! The checksum is CRC-32 (ISO-HDLC, the zlib polynomial) of the payload,
//! written as eight letters, one per nibble, most significant nibble first,
//! each offset from `'a'`. Checksum letters never collide with the terminator.

use thiserror::Error;

pub const TERMINATOR: u8 = b'\r';
pub const CHECKSUM_LEN: usize = 8;
pub const MAX_FRAME_LEN: usize = 4096;

const CRC_ALG: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("short frame ({0} bytes)")]
    Short(usize),
    #[error("bad checksum: computed {computed}, received {received}")]
    BadChecksum { computed: String, received: String },
    #[error("frame exceeds {MAX_FRAME_LEN} bytes")]
    OverFull,
}

/// Letter-encoded CRC-32 of `payload`.
pub fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let sum = CRC_ALG.checksum(payload);
    let mut letters = [0u8; CHECKSUM_LEN];
    for (i, letter) in letters.iter_mut().enumerate() {
        let shift = 28 - 4 * i as u32;
        *letter = b'a' + ((sum >> shift) & 0xf) as u8;
    }
    letters
}

/// Wrap a payload into a complete frame, terminator included.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    debug_assert!(!payload.contains(&TERMINATOR));
    let mut frame = Vec::with_capacity(payload.len() + CHECKSUM_LEN + 1);
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&checksum(payload));
    frame.push(TERMINATOR);
    frame
}

/// Verify a frame body (terminator already stripped) and return its payload.
pub fn decode(body: &[u8]) -> Result<&[u8], FrameError> {
    if body.len() <= CHECKSUM_LEN {
        return Err(FrameError::Short(body.len()));
    }
    let (payload, received) = body.split_at(body.len() - CHECKSUM_LEN);
    let computed = checksum(payload);
    if computed != received {
        return Err(FrameError::BadChecksum {
            computed: String::from_utf8_lossy(&computed).into_owned(),
            received: String::from_utf8_lossy(received).into_owned(),
        });
    }
    Ok(payload)
}

/// Byte-at-a-time frame reassembly shared by the controller and the host.
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    buf: Vec<u8>,
    discarding: bool,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
            discarding: false,
        }
    }

    /// Feed one byte. Returns `Some` once a terminator closes a non-empty frame.
    ///
    /// Bare terminators are ignored. After an overflow everything up to the next
    /// terminator is dropped so the tail of an oversized frame is not mistaken
    /// for a new one.
    pub fn push(&mut self, byte: u8) -> Option<Result<Vec<u8>, FrameError>> {
        if byte == TERMINATOR {
            if self.discarding {
                self.discarding = false;
                return None;
            }
            if self.buf.is_empty() {
                return None;
            }
            let body = std::mem::take(&mut self.buf);
            return Some(decode(&body).map(|payload| payload.to_vec()));
        }
        if self.discarding {
            return None;
        }
        if self.buf.len() == MAX_FRAME_LEN {
            self.buf.clear();
            self.discarding = true;
            return Some(Err(FrameError::OverFull));
        }
        self.buf.push(byte);
        None
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(acc: &mut FrameAccumulator, bytes: &[u8]) -> Vec<Result<Vec<u8>, FrameError>> {
        bytes.iter().filter_map(|&b| acc.push(b)).collect()
    }

    #[test]
    fn checksum_matches_zlib_crc32() {
        // zlib.crc32(b"version") == 0xbf1cd3c3
        assert_eq!(CRC_ALG.checksum(b"version"), 0xbf1c_d3c3);
        assert_eq!(&checksum(b"version"), b"lpbmndmd");
    }

    #[test]
    fn accumulator_splits_back_to_back_frames() {
        let mut stream = encode(b"{\"cmd\":\"version\"}");
        stream.extend(encode(b"{\"cmd\":\"abort\"}"));
        let mut acc = FrameAccumulator::new();
        let frames = feed_all(&mut acc, &stream);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_deref().unwrap(), b"{\"cmd\":\"version\"}");
        assert_eq!(frames[1].as_deref().unwrap(), b"{\"cmd\":\"abort\"}");
        assert_eq!(acc.pending(), 0);
    }

    #[test]
    fn bare_terminators_are_ignored() {
        let mut acc = FrameAccumulator::new();
        assert!(feed_all(&mut acc, b"\r\r\r").is_empty());
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut frame = encode(b"hello world");
        frame[0] = b'j';
        let mut acc = FrameAccumulator::new();
        let frames = feed_all(&mut acc, &frame);
        assert!(matches!(frames[0], Err(FrameError::BadChecksum { .. })));
    }

    #[test]
    fn short_frame_is_rejected() {
        let mut acc = FrameAccumulator::new();
        let frames = feed_all(&mut acc, b"abcdefgh\r");
        assert_eq!(frames, vec![Err(FrameError::Short(8))]);
    }

    #[test]
    fn overflow_discards_until_next_terminator() {
        let mut acc = FrameAccumulator::new();
        let mut stream = vec![b'x'; MAX_FRAME_LEN + 50];
        stream.push(TERMINATOR);
        stream.extend(encode(b"after"));
        let frames = feed_all(&mut acc, &stream);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], Err(FrameError::OverFull));
        assert_eq!(frames[1].as_deref().unwrap(), b"after");
    }
}
