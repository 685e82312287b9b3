//! UTF-8 rune decoding
//!
//! Forward and backward decoders used by every edit buffer operation to keep
//! the cursor on a rune boundary. Malformed input never stalls a caller: a
//! non-empty buffer always yields a consumed length of at least one byte.
//!
//! ```text
//! 1 byte   0bbbbbbb
//! 2 bytes  110bbbbb 10bbbbbb
//! 3 bytes  1110bbbb 10bbbbbb 10bbbbbb
//! 4 bytes  11110bbb 10bbbbbb 10bbbbbb 10bbbbbb
//! ```

/// The Unicode replacement character
pub const RUNE_ERROR: char = '\u{FFFD}';

/// Bytes below this value encode themselves
pub const RUNE_SELF: u8 = 0x80;

/// Longest encoded rune
pub const UTF_MAX: usize = 4;

#[inline]
fn is_continuation(b: u8) -> bool {
    b & 0xC0 == 0x80
}

/// Classify a lead byte: sequence length and the payload bits it carries.
fn lead(b: u8) -> Option<(usize, u32)> {
    match b {
        0x00..=0x7F => Some((1, b as u32)),
        0xC0..=0xDF => Some((2, (b & 0x1F) as u32)),
        0xE0..=0xEF => Some((3, (b & 0x0F) as u32)),
        0xF0..=0xF7 => Some((4, (b & 0x07) as u32)),
        _ => None,
    }
}

/// Decode the rune at the start of `buf`.
///
/// Returns the rune and the number of bytes it occupies. An empty buffer
/// yields `('\0', 0)`. A stray continuation byte, an invalid lead byte or a
/// broken continuation yields `RUNE_ERROR` consuming one byte. A sequence
/// cut short by the end of the buffer yields `RUNE_ERROR` consuming what is
/// left.
///
/// Overlong encodings are not rejected: `C0 80` decodes as `('\0', 2)`.
/// Only the lead byte and the continuation pattern are checked.
pub fn decode_rune(buf: &[u8]) -> (char, usize) {
    let Some(&first) = buf.first() else {
        return ('\0', 0);
    };
    if first < RUNE_SELF {
        return (first as char, 1);
    }
    let Some((len, mut value)) = lead(first) else {
        return (RUNE_ERROR, 1);
    };
    if buf.len() < len {
        if buf[1..].iter().all(|&b| is_continuation(b)) {
            return (RUNE_ERROR, buf.len());
        }
        return (RUNE_ERROR, 1);
    }
    for &b in &buf[1..len] {
        if !is_continuation(b) {
            return (RUNE_ERROR, 1);
        }
        value = (value << 6) | (b & 0x3F) as u32;
    }
    (char::from_u32(value).unwrap_or(RUNE_ERROR), len)
}

/// Decode the rune that ends at the end of `buf`.
///
/// Scans back at most `UTF_MAX` bytes for a lead byte, then decodes forward
/// from it. If that decode does not land exactly on the end of `buf` the
/// last byte is reported as a one-byte `RUNE_ERROR`. An empty buffer yields
/// `('\0', 0)`.
pub fn decode_last_rune(buf: &[u8]) -> (char, usize) {
    let Some(&last) = buf.last() else {
        return ('\0', 0);
    };
    if last < RUNE_SELF {
        return (last as char, 1);
    }
    let end = buf.len();
    let limit = end.saturating_sub(UTF_MAX);
    let Some(start) = (limit..end).rev().find(|&i| !is_continuation(buf[i])) else {
        return (RUNE_ERROR, 1);
    };
    let (rune, len) = decode_rune(&buf[start..]);
    if len != end - start {
        return (RUNE_ERROR, 1);
    }
    (rune, len)
}

/// Largest rune boundary `<= offset`, found by walking forward from zero.
pub fn floor_boundary(buf: &[u8], offset: usize) -> usize {
    let offset = offset.min(buf.len());
    let mut pos = 0;
    while pos < offset {
        let (_, len) = decode_rune(&buf[pos..]);
        if pos + len > offset {
            break;
        }
        pos += len;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_scalar_values() {
        let mut buf = [0u8; 4];
        for cp in (0u32..=0x10FFFF).filter(|cp| !(0xD800..=0xDFFF).contains(cp)) {
            let ch = char::from_u32(cp).unwrap();
            let encoded = ch.encode_utf8(&mut buf).as_bytes();
            assert_eq!(decode_rune(encoded), (ch, encoded.len()), "forward {:#x}", cp);
            assert_eq!(decode_last_rune(encoded), (ch, encoded.len()), "backward {:#x}", cp);
        }
    }

    #[test]
    fn test_empty() {
        assert_eq!(decode_rune(b""), ('\0', 0));
        assert_eq!(decode_last_rune(b""), ('\0', 0));
    }

    #[test]
    fn test_forward_reads_first_rune_only() {
        let text = "éa".as_bytes();
        assert_eq!(decode_rune(text), ('é', 2));
        assert_eq!(decode_rune(&text[2..]), ('a', 1));
    }

    #[test]
    fn test_invalid_bytes_make_progress() {
        // stray continuation
        assert_eq!(decode_rune(&[0x80, b'a']), (RUNE_ERROR, 1));
        // 0xF8 is not a lead byte
        assert_eq!(decode_rune(&[0xF8]), (RUNE_ERROR, 1));
        // broken continuation
        assert_eq!(decode_rune(&[0xE2, b'a', b'b']), (RUNE_ERROR, 1));
        // truncated at the end of input
        assert_eq!(decode_rune(&[0xE2, 0x82]), (RUNE_ERROR, 2));
        // surrogate half encoded as three bytes
        assert_eq!(decode_rune(&[0xED, 0xA0, 0x80]), (RUNE_ERROR, 3));
    }

    #[test]
    fn test_overlong_forms_decode() {
        assert_eq!(decode_rune(&[0xC0, 0x80]), ('\0', 2));
        assert_eq!(decode_rune(&[0xE0, 0x81, 0x81]), ('A', 3));
        assert_eq!(decode_last_rune(&[b'x', 0xC0, 0x80]), ('\0', 2));
    }

    #[test]
    fn test_backward_invalid() {
        // orphan continuation bytes with no lead in reach
        assert_eq!(decode_last_rune(&[0x80, 0x80, 0x80, 0x80, 0x80]), (RUNE_ERROR, 1));
        // lead byte promises more than is there
        assert_eq!(decode_last_rune(&[b'a', 0xF0, 0x9F, 0x98]), (RUNE_ERROR, 3));
        // a complete rune followed by an extra continuation byte
        assert_eq!(decode_last_rune(&[0xC3, 0xA9, 0xA9]), (RUNE_ERROR, 1));
    }

    #[test]
    fn test_backward_multibyte() {
        let text = "aポ😀".as_bytes();
        assert_eq!(decode_last_rune(text), ('😀', 4));
        assert_eq!(decode_last_rune(&text[..4]), ('ポ', 3));
        assert_eq!(decode_last_rune(&text[..1]), ('a', 1));
    }

    #[test]
    fn test_floor_boundary() {
        let text = "aé😀".as_bytes();
        assert_eq!(floor_boundary(text, 0), 0);
        assert_eq!(floor_boundary(text, 2), 1);
        assert_eq!(floor_boundary(text, 3), 3);
        assert_eq!(floor_boundary(text, 5), 3);
        assert_eq!(floor_boundary(text, 99), text.len());
    }
}
