//! The wire frame: a fixed-width little-endian length header in front of every message's
//! bytes, padded to a multiple of the transport's element size (§3 Frame, §6 Wire frame).

use byteorder::{ByteOrder, LittleEndian};

/// Size in bytes of the length header in front of every message.
pub const HEADER_SIZE: usize = 8;

/// Encodes `len` as a fixed-width little-endian header.
pub fn encode_header(len: usize) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    LittleEndian::write_u64(&mut header, len as u64);
    header
}

/// Decodes a length header. Panics if `bytes` is shorter than [`HEADER_SIZE`]; callers only
/// invoke this once they've confirmed that many bytes are buffered.
pub fn decode_header(bytes: &[u8]) -> usize {
    LittleEndian::read_u64(bytes) as usize
}

/// Rounds `len` up to the next multiple of `element_size`.
pub fn padded_len(len: usize, element_size: usize) -> usize {
    debug_assert!(element_size > 0);
    len.div_ceil(element_size) * element_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        for len in [0usize, 1, 8, 255, 65536, 1 << 40] {
            let header = encode_header(len);
            assert_eq!(decode_header(&header), len);
        }
    }

    #[test]
    fn padding_rounds_up_to_element_size() {
        assert_eq!(padded_len(0, 8), 0);
        assert_eq!(padded_len(1, 8), 8);
        assert_eq!(padded_len(8, 8), 8);
        assert_eq!(padded_len(9, 8), 16);
        assert_eq!(padded_len(100, 1), 100);
    }
}
