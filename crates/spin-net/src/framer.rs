//! Newline framing of the inbound byte stream.

use bytes::BytesMut;
use spin_shared::protocol::FRAME_TERMINATOR;

/// Split every complete line out of `buf`.
///
/// NUL bytes inside a frame are replaced by spaces so they never cut it
/// short. Returned frames exclude the terminator; an unterminated tail stays
/// in `buf` untouched until a later read completes it.
pub fn drain_frames(buf: &mut BytesMut) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    while let Some(pos) = buf.iter().position(|&b| b == FRAME_TERMINATOR) {
        let line = buf.split_to(pos + 1);
        let mut frame = line[..pos].to_vec();
        for b in frame.iter_mut().filter(|b| **b == 0) {
            *b = b' ';
        }
        frames.push(frame);
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(chunks: &[&[u8]]) -> (Vec<Vec<u8>>, Vec<u8>) {
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        for chunk in chunks {
            buf.extend_from_slice(chunk);
            frames.extend(drain_frames(&mut buf));
        }
        (frames, buf.to_vec())
    }

    #[test]
    fn test_frames_independent_of_split_point() {
        let input = b"a\nbc\nd";
        for split in 0..=input.len() {
            let (frames, rest) = feed(&[&input[..split], &input[split..]]);
            assert_eq!(frames, vec![b"a".to_vec(), b"bc".to_vec()], "split at {split}");
            assert_eq!(rest, b"d");
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let input = b"a\nbc\nd";
        let chunks: Vec<&[u8]> = input.chunks(1).collect();
        let (frames, rest) = feed(&chunks);
        assert_eq!(frames, vec![b"a".to_vec(), b"bc".to_vec()]);
        assert_eq!(rest, b"d");
    }

    #[test]
    fn test_nul_becomes_space() {
        let (frames, rest) = feed(&[b"gro\0om#x\n"]);
        assert_eq!(frames, vec![b"gro om#x".to_vec()]);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_partial_tail_is_left_raw() {
        let mut buf = BytesMut::from(&b"a\0b\nc\0"[..]);
        assert_eq!(drain_frames(&mut buf), vec![b"a b".to_vec()]);
        assert_eq!(&buf[..], b"c\0");

        buf.extend_from_slice(b"d\n");
        assert_eq!(drain_frames(&mut buf), vec![b"c d".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_lines_are_frames() {
        let (frames, _) = feed(&[b"\n\nx\n"]);
        assert_eq!(frames, vec![Vec::new(), Vec::new(), b"x".to_vec()]);
    }
}
