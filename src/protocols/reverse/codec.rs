//! Line framing and reversal.

use crate::runtime::buffer::LineBuffer;
use bytes::BytesMut;

/// Default cap on stored line payload bytes.
pub const MAX_LINE_LEN: usize = 255;

/// Byte that ends a request line.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Trailer appended to every response frame.
pub const FRAME_TERMINATOR: &[u8] = b"\r\n";

/// Outcome of feeding a chunk of input to the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decode {
    /// The whole chunk was consumed without finding a terminator.
    NeedMore,
    /// A frame was written to the output.
    Frame {
        /// Bytes consumed from the chunk, terminator included.
        consumed: usize,
        /// Bytes of the chunk left after the terminator.
        remaining: usize,
    },
}

/// Incremental line decoder that emits reversed frames.
///
/// Framing depends only on the concatenated input stream: feeding the same
/// bytes in different chunk sizes yields the same frames.
#[derive(Debug)]
pub struct LineCodec {
    line: LineBuffer,
    /// Bytes dropped from the current line because of the cap.
    dropped: usize,
}

impl LineCodec {
    pub fn new(max_line_len: usize) -> Self {
        Self {
            line: LineBuffer::new(max_line_len),
            dropped: 0,
        }
    }

    /// Scan `input` for the next line terminator.
    ///
    /// On `Decode::Frame` the reversed line followed by `\r\n` replaces the
    /// contents of `output`; on `Decode::NeedMore` `output` is left untouched.
    pub fn decode(&mut self, input: &[u8], output: &mut BytesMut) -> Decode {
        let terminator = input.iter().position(|&b| b == LINE_TERMINATOR);
        let body = match terminator {
            Some(pos) => &input[..pos],
            None => input,
        };

        for &byte in body {
            if !self.line.push(byte) {
                self.dropped += 1;
            }
        }

        let Some(pos) = terminator else {
            return Decode::NeedMore;
        };

        self.line.strip_trailing_cr();

        output.clear();
        output.reserve(self.line.len() + FRAME_TERMINATOR.len());
        output.extend(self.line.as_slice().iter().rev());
        output.extend_from_slice(FRAME_TERMINATOR);

        self.line.clear();
        self.dropped = 0;

        let consumed = pos + 1;
        Decode::Frame {
            consumed,
            remaining: input.len() - consumed,
        }
    }

    /// Length of the partial line held between calls.
    pub fn partial_len(&self) -> usize {
        self.line.len()
    }

    /// Bytes dropped so far from the partial line.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn max_line_len(&self) -> usize {
        self.line.max_len()
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(MAX_LINE_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed `stream` to a fresh codec in the given chunk sizes and collect
    /// every frame produced.
    fn frames_for(stream: &[u8], chunk_sizes: &[usize]) -> Vec<Vec<u8>> {
        let mut codec = LineCodec::default();
        let mut out = BytesMut::new();
        let mut frames = Vec::new();
        let mut offset = 0;
        let mut sizes = chunk_sizes.iter().cycle();

        while offset < stream.len() {
            let size = (*sizes.next().unwrap()).max(1);
            let end = (offset + size).min(stream.len());
            let mut chunk = &stream[offset..end];
            while let Decode::Frame { consumed, remaining } = codec.decode(chunk, &mut out) {
                frames.push(out.to_vec());
                assert_eq!(consumed + remaining, chunk.len());
                chunk = &chunk[consumed..];
            }
            offset = end;
        }
        frames
    }

    #[test]
    fn test_reverses_single_line() {
        let mut codec = LineCodec::default();
        let mut out = BytesMut::new();
        assert_eq!(
            codec.decode(b"hello\n", &mut out),
            Decode::Frame {
                consumed: 6,
                remaining: 0
            }
        );
        assert_eq!(&out[..], b"olleh\r\n");
    }

    #[test]
    fn test_two_lines_in_one_chunk() {
        let mut codec = LineCodec::default();
        let mut out = BytesMut::new();
        let input = b"ab\r\ncd\n";

        let Decode::Frame { consumed, remaining } = codec.decode(input, &mut out) else {
            panic!("expected a frame");
        };
        assert_eq!(&out[..], b"ba\r\n");
        assert_eq!((consumed, remaining), (4, 3));

        let rest = &input[consumed..];
        assert_eq!(
            codec.decode(rest, &mut out),
            Decode::Frame {
                consumed: 3,
                remaining: 0
            }
        );
        assert_eq!(&out[..], b"dc\r\n");
    }

    #[test]
    fn test_partial_line_needs_more() {
        let mut codec = LineCodec::default();
        let mut out = BytesMut::from(&b"untouched"[..]);

        assert_eq!(codec.decode(b"hel", &mut out), Decode::NeedMore);
        assert_eq!(codec.partial_len(), 3);
        assert_eq!(&out[..], b"untouched");

        assert_eq!(
            codec.decode(b"lo\n", &mut out),
            Decode::Frame {
                consumed: 3,
                remaining: 0
            }
        );
        assert_eq!(&out[..], b"olleh\r\n");
        assert_eq!(codec.partial_len(), 0);
    }

    #[test]
    fn test_empty_lines() {
        let mut codec = LineCodec::default();
        let mut out = BytesMut::new();

        codec.decode(b"\n", &mut out);
        assert_eq!(&out[..], b"\r\n");

        codec.decode(b"\r\n", &mut out);
        assert_eq!(&out[..], b"\r\n");
    }

    #[test]
    fn test_cr_split_from_lf() {
        // The CR arrives in one chunk and the LF in the next
        assert_eq!(frames_for(b"xy\r\n", &[3, 1]), vec![b"yx\r\n".to_vec()]);
    }

    #[test]
    fn test_inner_cr_kept() {
        assert_eq!(frames_for(b"a\rb\n", &[64]), vec![b"b\ra\r\n".to_vec()]);
    }

    #[test]
    fn test_line_at_cap_preserved() {
        let line: Vec<u8> = (0..MAX_LINE_LEN).map(|i| b'a' + (i % 26) as u8).collect();
        let mut input = line.clone();
        input.push(b'\n');

        let mut expected: Vec<u8> = line.iter().rev().copied().collect();
        expected.extend_from_slice(FRAME_TERMINATOR);

        assert_eq!(frames_for(&input, &[1024]), vec![expected]);
    }

    #[test]
    fn test_long_line_truncated() {
        let line: Vec<u8> = (0..300).map(|i| b'a' + (i % 26) as u8).collect();
        let mut input = line.clone();
        input.extend_from_slice(b"\nnext\n");

        let mut expected: Vec<u8> = line[..MAX_LINE_LEN].iter().rev().copied().collect();
        expected.extend_from_slice(FRAME_TERMINATOR);

        let frames = frames_for(&input, &[1024]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], expected);
        assert_eq!(frames[1], b"txen\r\n");
    }

    #[test]
    fn test_dropped_bytes_tracked() {
        let mut codec = LineCodec::new(4);
        let mut out = BytesMut::new();

        assert_eq!(codec.decode(b"abcdefg", &mut out), Decode::NeedMore);
        assert_eq!(codec.partial_len(), 4);
        assert_eq!(codec.dropped(), 3);

        codec.decode(b"\n", &mut out);
        assert_eq!(&out[..], b"dcba\r\n");
        assert_eq!(codec.dropped(), 0);
    }

    #[test]
    fn test_cr_beyond_cap_not_counted() {
        // The CR is dropped by the cap, so the stored line has no CR to strip
        let mut codec = LineCodec::new(2);
        let mut out = BytesMut::new();
        codec.decode(b"ab\r\n", &mut out);
        assert_eq!(&out[..], b"ba\r\n");
    }

    #[test]
    fn test_chunk_boundary_independence() {
        let mut stream = Vec::new();
        stream.extend_from_slice(b"hello\r\nworld\n\n\r\nabc");
        stream.extend(std::iter::repeat(b'z').take(400));
        stream.extend_from_slice(b"\r\nlast line\n");

        let whole = frames_for(&stream, &[stream.len()]);
        assert_eq!(whole.len(), 6);

        for sizes in [&[1][..], &[2], &[3, 7], &[5, 1, 13], &[64], &[255, 1]] {
            assert_eq!(frames_for(&stream, sizes), whole, "chunk sizes {sizes:?}");
        }
    }

    #[test]
    fn test_double_reversal_round_trip() {
        let line = b"The quick brown fox";
        let mut codec = LineCodec::default();
        let mut out = BytesMut::new();

        let mut input = line.to_vec();
        input.push(b'\n');
        codec.decode(&input, &mut out);

        let mut echoed = out[..out.len() - FRAME_TERMINATOR.len()].to_vec();
        echoed.push(b'\n');
        codec.decode(&echoed, &mut out);

        assert_eq!(&out[..out.len() - FRAME_TERMINATOR.len()], line);
    }
}
