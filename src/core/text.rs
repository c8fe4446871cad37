//! Purpose: Character-data helpers for the response path.
//! Exports: `Charset`, `well_formed`, `to_utf8`, `to_charset`, `trim_pad`, `escape_json`, `escaped_len`.
//! Role: Charset validation and JSON escaping applied to stored character columns.
//! Invariants: Validation never looks past the input slice; errors carry the byte offset.
//! Invariants: Escaping is byte-oriented and the identity on bytes >= 0x20 other than `"` and `\`.
use std::borrow::Cow;

use serde::Deserialize;

use crate::core::error::{ERR_INVALID_DATA, Error, ErrorKind};

/// Character sets a character column may be declared with.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Charset {
    Ascii,
    Latin1,
    Utf8mb3,
    #[default]
    Utf8mb4,
    Binary,
}

impl Charset {
    /// Longest encoding of one character, in bytes.
    pub fn max_char_len(self) -> usize {
        match self {
            Charset::Ascii | Charset::Latin1 | Charset::Binary => 1,
            Charset::Utf8mb3 => 3,
            Charset::Utf8mb4 => 4,
        }
    }

    /// Byte used to pad fixed-width columns.
    pub fn pad_byte(self) -> u8 {
        match self {
            Charset::Binary => 0x00,
            _ => b' ',
        }
    }
}

/// Checks that `bytes` is a well-formed sequence under `charset`.
///
/// On failure returns the offset of the first byte that does not start a
/// valid character.
pub fn well_formed(charset: Charset, bytes: &[u8]) -> Result<(), usize> {
    match charset {
        Charset::Latin1 | Charset::Binary => Ok(()),
        Charset::Ascii => match bytes.iter().position(|byte| *byte >= 0x80) {
            Some(pos) => Err(pos),
            None => Ok(()),
        },
        Charset::Utf8mb4 => std::str::from_utf8(bytes)
            .map(|_| ())
            .map_err(|err| err.valid_up_to()),
        Charset::Utf8mb3 => {
            let (text, invalid_at) = match std::str::from_utf8(bytes) {
                Ok(text) => (text, None),
                Err(err) => {
                    let valid = err.valid_up_to();
                    // valid_up_to always lands on a char boundary
                    let text = std::str::from_utf8(&bytes[..valid]).unwrap_or_default();
                    (text, Some(valid))
                }
            };
            for (pos, ch) in text.char_indices() {
                if ch.len_utf8() > 3 {
                    return Err(pos);
                }
            }
            match invalid_at {
                Some(pos) => Err(pos),
                None => Ok(()),
            }
        }
    }
}

/// Copies `bytes` after checking it is well formed, naming the bad offset on failure.
pub fn well_formed_copy(charset: Charset, bytes: &[u8], column: &str) -> Result<Vec<u8>, Error> {
    match well_formed(charset, bytes) {
        Ok(()) => Ok(bytes.to_vec()),
        Err(pos) => Err(Error::new(ErrorKind::Server)
            .with_message(format!(
                "{ERR_INVALID_DATA}; invalid string at byte {pos}: {}",
                printable(&bytes[pos..], 6)
            ))
            .with_column(column)
            .with_offset(pos as u64)),
    }
}

/// Re-encodes single-byte Latin-1 data as UTF-8; other charsets pass through.
pub fn to_utf8(charset: Charset, bytes: &[u8]) -> Cow<'_, [u8]> {
    match charset {
        Charset::Latin1 if !bytes.is_ascii() => {
            let decoded: String = bytes.iter().map(|&byte| char::from(byte)).collect();
            Cow::Owned(decoded.into_bytes())
        }
        Charset::Ascii | Charset::Latin1 | Charset::Utf8mb3 | Charset::Utf8mb4 | Charset::Binary => {
            Cow::Borrowed(bytes)
        }
    }
}

/// Re-encodes UTF-8 request text as Latin-1 for a Latin-1 column.
///
/// Returns `None` when a character has no Latin-1 form. Input that is not
/// UTF-8 is taken to be Latin-1 already.
pub fn to_charset(charset: Charset, bytes: &[u8]) -> Option<Cow<'_, [u8]>> {
    match charset {
        Charset::Latin1 if !bytes.is_ascii() => match std::str::from_utf8(bytes) {
            Ok(text) => text
                .chars()
                .map(|ch| u8::try_from(ch).ok())
                .collect::<Option<Vec<u8>>>()
                .map(Cow::Owned),
            Err(_) => Some(Cow::Borrowed(bytes)),
        },
        Charset::Ascii | Charset::Latin1 | Charset::Utf8mb3 | Charset::Utf8mb4 | Charset::Binary => {
            Some(Cow::Borrowed(bytes))
        }
    }
}

/// Removes trailing pad bytes of a fixed-width value.
pub fn trim_pad(bytes: &[u8], pad: u8) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|byte| *byte != pad)
        .map(|pos| pos + 1)
        .unwrap_or(0);
    &bytes[..end]
}

/// Number of bytes `escape_json` adds to `bytes`.
pub fn escaped_len(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .map(|byte| match byte {
            b'"' | b'\\' | 0x08 | 0x0c | b'\n' | b'\r' | b'\t' => 1,
            0x00..=0x1f => 5,
            _ => 0,
        })
        .sum()
}

/// JSON-escapes raw bytes: short escapes for the usual seven, `\u00xx` for other controls.
pub fn escape_json(bytes: &[u8]) -> Vec<u8> {
    let extra = escaped_len(bytes);
    if extra == 0 {
        return bytes.to_vec();
    }
    let mut out = Vec::with_capacity(bytes.len() + extra);
    for &byte in bytes {
        match byte {
            b'"' => out.extend_from_slice(b"\\\""),
            b'\\' => out.extend_from_slice(b"\\\\"),
            0x08 => out.extend_from_slice(b"\\b"),
            0x0c => out.extend_from_slice(b"\\f"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            0x00..=0x1f => {
                out.extend_from_slice(format!("\\u{byte:04x}").as_bytes());
            }
            _ => out.push(byte),
        }
    }
    out
}

fn printable(bytes: &[u8], max: usize) -> String {
    let mut out = String::new();
    for &byte in bytes.iter().take(max) {
        if byte.is_ascii_graphic() || byte == b' ' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("\\x{byte:02X}"));
        }
    }
    if bytes.len() > max {
        out.push_str("...");
    }
    out
}
