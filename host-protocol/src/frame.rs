// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Stream framer: reassembles `type + length(LE) + payload` frames from
//! arbitrarily split byte chunks and serializes outgoing frames.

/// Frame header: type (1) + length (2 LE).
pub const FRAME_HEADER_SIZE: usize = 3;
/// Largest payload a frame may declare.
pub const MAX_PAYLOAD_SIZE: usize = 512;
/// Largest complete frame.
pub const MAX_FRAME_SIZE: usize = FRAME_HEADER_SIZE + MAX_PAYLOAD_SIZE;

/// A complete received frame, borrowed from the accumulator.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    pub frame_type: u8,
    pub payload: &'a [u8],
}

/// Outcome of feeding bytes to the accumulator. The caller loops on
/// `remaining` until it is empty, the same way a `CobsAccumulator`
/// window is drained.
#[derive(Debug)]
pub enum FeedResult<'acc, 'buf> {
    /// All input consumed, frame still incomplete.
    Consumed,
    /// The header declared a payload larger than [`MAX_PAYLOAD_SIZE`].
    /// The accumulator was discarded; the transport resynchronizes by
    /// the host retrying. Continue feeding with the returned remainder.
    Overfull(&'buf [u8]),
    /// A frame completed. `remaining` holds the unconsumed input.
    Success { frame: Frame<'acc>, remaining: &'buf [u8] },
}

/// Reassembly buffer for one byte-stream transport.
pub struct FrameAccumulator {
    buf: [u8; MAX_FRAME_SIZE],
    len: usize,
}

impl FrameAccumulator {
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_FRAME_SIZE],
            len: 0,
        }
    }

    /// Append `input` and return at most one completed frame. Call in a
    /// loop over the remainder to drain feeds that carry several frames.
    pub fn feed<'acc, 'buf>(&'acc mut self, input: &'buf [u8]) -> FeedResult<'acc, 'buf> {
        let mut input = input;

        if self.len < FRAME_HEADER_SIZE {
            let take = (FRAME_HEADER_SIZE - self.len).min(input.len());
            self.buf[self.len..self.len + take].copy_from_slice(&input[..take]);
            self.len += take;
            input = &input[take..];
            if self.len < FRAME_HEADER_SIZE {
                return FeedResult::Consumed;
            }
        }

        let paylen = u16::from_le_bytes([self.buf[1], self.buf[2]]) as usize;
        if paylen > MAX_PAYLOAD_SIZE {
            self.len = 0;
            return FeedResult::Overfull(input);
        }

        let take = (FRAME_HEADER_SIZE + paylen - self.len).min(input.len());
        self.buf[self.len..self.len + take].copy_from_slice(&input[..take]);
        self.len += take;
        input = &input[take..];
        if self.len < FRAME_HEADER_SIZE + paylen {
            return FeedResult::Consumed;
        }

        // Frame complete; reset so the next feed starts clean. The
        // payload stays valid in `buf` until then.
        self.len = 0;
        FeedResult::Success {
            frame: Frame {
                frame_type: self.buf[0],
                payload: &self.buf[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + paylen],
            },
            remaining: input,
        }
    }
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum EncodeError {
    PayloadTooLarge,
    BufferTooSmall,
}

/// Serialize a frame into `buf` and return the written prefix.
pub fn encode<'a>(frame_type: u8, payload: &[u8], buf: &'a mut [u8]) -> Result<&'a [u8], EncodeError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(EncodeError::PayloadTooLarge);
    }
    let total = FRAME_HEADER_SIZE + payload.len();
    if buf.len() < total {
        return Err(EncodeError::BufferTooSmall);
    }
    buf[0] = frame_type;
    buf[1..3].copy_from_slice(&(payload.len() as u16).to_le_bytes());
    buf[FRAME_HEADER_SIZE..total].copy_from_slice(payload);
    Ok(&buf[..total])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_frames(acc: &mut FrameAccumulator, chunks: &[&[u8]]) -> Vec<(u8, Vec<u8>)> {
        let mut out = Vec::new();
        for chunk in chunks {
            let mut window: &[u8] = chunk;
            while !window.is_empty() {
                window = match acc.feed(window) {
                    FeedResult::Consumed => break,
                    FeedResult::Overfull(rest) => rest,
                    FeedResult::Success { frame, remaining } => {
                        out.push((frame.frame_type, frame.payload.to_vec()));
                        remaining
                    }
                };
            }
        }
        out
    }

    #[test]
    fn roundtrip() {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let wire = encode(0x85, &[1, 2, 3], &mut buf).unwrap();
        assert_eq!(wire, &[0x85, 3, 0, 1, 2, 3]);

        let mut acc = FrameAccumulator::new();
        let frames = collect_frames(&mut acc, &[wire]);
        assert_eq!(frames, vec![(0x85, vec![1, 2, 3])]);
    }

    #[test]
    fn empty_payload_frame() {
        let mut buf = [0u8; 8];
        let wire = encode(0x13, &[], &mut buf).unwrap();
        assert_eq!(wire, &[0x13, 0, 0]);

        let mut acc = FrameAccumulator::new();
        let frames = collect_frames(&mut acc, &[wire]);
        assert_eq!(frames, vec![(0x13, vec![])]);
    }

    #[test]
    fn split_invariance() {
        // The framer must emit the same frames no matter how the stream
        // is cut across feed calls.
        let mut stream = Vec::new();
        let mut buf = [0u8; MAX_FRAME_SIZE];
        stream.extend_from_slice(encode(0x10, &[9; 11], &mut buf).unwrap());
        stream.extend_from_slice(encode(0x11, &[0xAB; 200], &mut buf).unwrap());
        stream.extend_from_slice(encode(0x12, &[], &mut buf).unwrap());

        let mut whole = FrameAccumulator::new();
        let expected = collect_frames(&mut whole, &[&stream]);
        assert_eq!(expected.len(), 3);

        for split in [1usize, 2, 3, 7, 64, 201] {
            let chunks: Vec<&[u8]> = stream.chunks(split).collect();
            let mut acc = FrameAccumulator::new();
            assert_eq!(collect_frames(&mut acc, &chunks), expected, "split {}", split);
        }
    }

    #[test]
    fn multiple_frames_single_feed() {
        let mut stream = Vec::new();
        let mut buf = [0u8; MAX_FRAME_SIZE];
        for t in [0x16u8, 0x17, 0x19] {
            stream.extend_from_slice(encode(t, &[t], &mut buf).unwrap());
        }
        let mut acc = FrameAccumulator::new();
        let frames = collect_frames(&mut acc, &[&stream]);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2], (0x19, vec![0x19]));
    }

    #[test]
    fn oversize_length_discards_and_resyncs() {
        let mut acc = FrameAccumulator::new();
        // Declared length 0xFFFF can never complete.
        match acc.feed(&[0x10, 0xFF, 0xFF, 1, 2, 3]) {
            FeedResult::Overfull(rest) => assert_eq!(rest, &[1, 2, 3]),
            other => panic!("expected Overfull, got {:?}", other),
        }
        // A clean frame afterwards parses normally.
        let mut buf = [0u8; 8];
        let wire = encode(0x85, &[7], &mut buf).unwrap();
        let frames = collect_frames(&mut acc, &[wire]);
        assert_eq!(frames, vec![(0x85, vec![7])]);
    }

    #[test]
    fn max_payload_accepted() {
        let payload = [0x5A; MAX_PAYLOAD_SIZE];
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let wire = encode(0x11, &payload, &mut buf).unwrap();
        assert_eq!(wire.len(), MAX_FRAME_SIZE);

        let mut acc = FrameAccumulator::new();
        let frames = collect_frames(&mut acc, &[wire]);
        assert_eq!(frames[0].1.len(), MAX_PAYLOAD_SIZE);

        assert_eq!(encode(0x11, &[0u8; MAX_PAYLOAD_SIZE + 1], &mut [0u8; 600]), Err(EncodeError::PayloadTooLarge));
    }
}
