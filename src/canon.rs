//! Canonical CBOR encoding of names and SHA-256 identities derived from it.
//!
//! Only the subset of CBOR needed for names and path nodes is produced:
//! unsigned integers, byte strings, text strings and definite-length arrays.

use sha2::{Digest, Sha256};

use crate::name::Name;

const MAJOR_UINT: u8 = 0;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;

/// Append a definite-length array header.
pub fn push_array(buf: &mut Vec<u8>, len: u64) {
    push_header(buf, MAJOR_ARRAY, len);
}

pub fn push_uint(buf: &mut Vec<u8>, value: u64) {
    push_header(buf, MAJOR_UINT, value);
}

pub fn push_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    push_header(buf, MAJOR_BYTES, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Append a UTF-8 text string.
pub fn push_text(buf: &mut Vec<u8>, text: &str) {
    let bytes = text.as_bytes();
    push_header(buf, MAJOR_TEXT, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn push_header(buf: &mut Vec<u8>, major: u8, len: u64) {
    debug_assert!(major < 8);
    match len {
        0..=23 => buf.push((major << 5) | (len as u8)),
        24..=0xff => {
            buf.push((major << 5) | 24);
            buf.push(len as u8);
        }
        0x100..=0xffff => {
            buf.push((major << 5) | 25);
            buf.extend_from_slice(&(len as u16).to_be_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buf.push((major << 5) | 26);
            buf.extend_from_slice(&(len as u32).to_be_bytes());
        }
        _ => {
            buf.push((major << 5) | 27);
            buf.extend_from_slice(&len.to_be_bytes());
        }
    }
}

/// Append the canonical form of a name: a text atom, or `[head, children...]`.
pub fn push_name(buf: &mut Vec<u8>, name: &Name) {
    // Explicit stack keeps deeply nested names off the call stack.
    let mut work = vec![name];
    while let Some(next) = work.pop() {
        match next {
            Name::Text(text) => push_text(buf, text),
            Name::Node(head, children) => {
                push_array(buf, children.len() as u64 + 1);
                push_text(buf, head);
                work.extend(children.iter().rev());
            }
        }
    }
}

/// Encode `[constructor, [projections...]]`; callers pass projections already sorted.
pub fn encode_tag(constructor: &Name, projections: &[Name]) -> Vec<u8> {
    let mut buf = Vec::new();
    push_array(&mut buf, 2);
    push_name(&mut buf, constructor);
    push_array(&mut buf, projections.len() as u64);
    for projection in projections {
        push_name(&mut buf, projection);
    }
    buf
}

/// SHA-256 of canonical bytes.
pub fn digest(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Lowercase hexadecimal rendering for diagnostics.
pub fn to_hex(id: &[u8; 32]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(64);
    for byte in id {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_headers_switch_to_length_byte() {
        let mut short = Vec::new();
        push_text(&mut short, "io");
        assert_eq!(short, vec![0x62, b'i', b'o']);

        let long = "a name comfortably longer than twenty three bytes";
        let mut buf = Vec::new();
        push_text(&mut buf, long);
        assert_eq!(buf[0], 0x78);
        assert_eq!(buf[1] as usize, long.len());
    }

    #[test]
    fn structured_names_encode_as_arrays() {
        let name = Name::node("pair", [Name::text("a"), Name::text("b")]);
        let mut buf = Vec::new();
        push_name(&mut buf, &name);
        assert_eq!(
            buf,
            vec![
                0x83, // array(3)
                0x64, b'p', b'a', b'i', b'r', 0x61, b'a', 0x61, b'b',
            ]
        );
    }

    #[test]
    fn uints_and_bytes_use_their_major_types() {
        let mut buf = Vec::new();
        push_uint(&mut buf, 1000);
        push_bytes(&mut buf, &[0xab, 0xcd]);
        assert_eq!(buf, vec![0x19, 0x03, 0xe8, 0x42, 0xab, 0xcd]);
    }

    #[test]
    fn hex_is_lowercase_and_full_width() {
        let hex = to_hex(&digest(b"cinder"));
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
