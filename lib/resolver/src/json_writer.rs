use bytes::{BufMut, BytesMut};

use crate::consts::NULL;

const fn get_replacements() -> [u8; 256] {
    // NOTE: Only characters smaller than 128 are allowed here.
    // Trying to escape values above 128 would generate invalid utf-8 output.
    let mut result = [0u8; 256];
    let mut i = 0;
    while i < 0x20 {
        result[i] = b'u';
        i += 1;
    }
    result[b'"' as usize] = b'"';
    result[b'\\' as usize] = b'\\';
    result[8] = b'b';
    result[0xc] = b'f';
    result[b'\n' as usize] = b'n';
    result[b'\r' as usize] = b'r';
    result[b'\t' as usize] = b't';
    result[0] = b'u';

    result
}

static REPLACEMENTS: [u8; 256] = get_replacements();
static HEX: [u8; 16] = *b"0123456789ABCDEF";

/// Appends `input` as escaped JSON string content, without surrounding
/// quotes.
pub(crate) fn write_escaped_content(writer: &mut BytesMut, input: &str) {
    let bytes = input.as_bytes();
    let mut last_write = 0;

    for (i, &byte) in bytes.iter().enumerate() {
        let replacement = REPLACEMENTS[byte as usize];
        if replacement != 0 {
            if last_write < i {
                writer.put(&bytes[last_write..i]);
            }

            if replacement == b'u' {
                let hex_bytes: [u8; 6] = [
                    b'\\',
                    b'u',
                    b'0',
                    b'0',
                    HEX[((byte / 16) & 0xF) as usize],
                    HEX[(byte & 0xF) as usize],
                ];
                writer.put(&hex_bytes[..]);
            } else {
                let escaped_bytes: [u8; 2] = [b'\\', replacement];
                writer.put(&escaped_bytes[..]);
            }
            last_write = i + 1;
        }
    }

    if last_write < bytes.len() {
        writer.put(&bytes[last_write..]);
    }
}

pub(crate) fn write_f64(writer: &mut BytesMut, value: f64) {
    if !value.is_finite() {
        // JSON does not allow infinite or nan values.
        writer.put(NULL);
        return;
    }

    let mut buf = ryu::Buffer::new();
    let mut result = buf.format_finite(value);
    if let Some(trimmed) = result.strip_suffix(".0") {
        result = trimmed;
    }
    writer.put(result.as_bytes());
}

pub(crate) fn write_u64(writer: &mut BytesMut, value: u64) {
    let mut buf = itoa::Buffer::new();
    writer.put(buf.format(value).as_bytes());
}

pub(crate) fn write_i64(writer: &mut BytesMut, value: i64) {
    let mut buf = itoa::Buffer::new();
    writer.put(buf.format(value).as_bytes());
}
