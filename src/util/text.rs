//! Text codecs for the tag formats
//!
//! ID3v1 and SPC store ISO-8859-1 (latin-1), ID3v2 declares a per-frame
//! encoding, Vorbis Comments and APEv2 are UTF-8. Decoding is lossy where a
//! format gives no better option; encoding picks the narrowest representation
//! that preserves the input.

use crate::error::{Error, Result};

/// Text encodings used by the ID3v2 frame encoding byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// ISO-8859-1
    Latin1,
    /// UTF-16 with byte order mark
    Utf16,
    /// UTF-16 big-endian, no byte order mark
    Utf16Be,
    /// UTF-8 (ID3v2.4 only)
    Utf8,
}

impl TextEncoding {
    /// Map an ID3v2 frame encoding byte
    pub fn from_id3_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(TextEncoding::Latin1),
            1 => Ok(TextEncoding::Utf16),
            2 => Ok(TextEncoding::Utf16Be),
            3 => Ok(TextEncoding::Utf8),
            other => Err(Error::malformed(
                "ID3v2 frame",
                format!("unknown text encoding byte 0x{:02X}", other),
            )),
        }
    }

    /// The ID3v2 frame encoding byte for this encoding
    pub fn id3_byte(self) -> u8 {
        match self {
            TextEncoding::Latin1 => 0,
            TextEncoding::Utf16 => 1,
            TextEncoding::Utf16Be => 2,
            TextEncoding::Utf8 => 3,
        }
    }

    /// Size in bytes of this encoding's string terminator
    pub fn terminator_len(self) -> usize {
        match self {
            TextEncoding::Latin1 | TextEncoding::Utf8 => 1,
            TextEncoding::Utf16 | TextEncoding::Utf16Be => 2,
        }
    }
}

/// Decode ISO-8859-1 bytes (every byte maps to the same code point)
pub fn decode_latin1(data: &[u8]) -> String {
    data.iter().map(|&b| b as char).collect()
}

/// Encode to ISO-8859-1, substituting `?` for characters outside the range
pub fn encode_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| if (c as u32) < 256 { c as u8 } else { b'?' })
        .collect()
}

/// True when the string survives a latin-1 round trip unchanged
pub fn fits_latin1(text: &str) -> bool {
    text.chars().all(|c| (c as u32) < 256)
}

/// Decode UTF-16 with an optional byte order mark (defaults to big-endian
/// when no mark is present, per the ID3v2.2/2.3 spec for type 1 strings)
pub fn decode_utf16(data: &[u8]) -> String {
    if data.len() >= 2 {
        if data[0] == 0xFF && data[1] == 0xFE {
            return decode_utf16_units(&data[2..], true);
        }
        if data[0] == 0xFE && data[1] == 0xFF {
            return decode_utf16_units(&data[2..], false);
        }
    }
    decode_utf16_units(data, false)
}

/// Decode UTF-16 big-endian without a byte order mark
pub fn decode_utf16_be(data: &[u8]) -> String {
    decode_utf16_units(data, false)
}

fn decode_utf16_units(data: &[u8], little_endian: bool) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| {
            if little_endian {
                u16::from_le_bytes([pair[0], pair[1]])
            } else {
                u16::from_be_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    String::from_utf16_lossy(&units)
}

/// Encode as UTF-16 little-endian with a leading byte order mark
pub fn encode_utf16_bom(text: &str) -> Vec<u8> {
    let mut out = vec![0xFF, 0xFE];
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Decode bytes according to `encoding`; invalid sequences are replaced
pub fn decode(data: &[u8], encoding: TextEncoding) -> String {
    match encoding {
        TextEncoding::Latin1 => decode_latin1(data),
        TextEncoding::Utf16 => decode_utf16(data),
        TextEncoding::Utf16Be => decode_utf16_be(data),
        TextEncoding::Utf8 => String::from_utf8_lossy(data).into_owned(),
    }
}

/// Split `data` at the first terminator for `encoding`, returning the bytes
/// before it and the offset just past it. Without a terminator the whole
/// slice is the string.
pub fn split_terminated(data: &[u8], encoding: TextEncoding) -> (&[u8], usize) {
    match encoding.terminator_len() {
        1 => match data.iter().position(|&b| b == 0) {
            Some(pos) => (&data[..pos], pos + 1),
            None => (data, data.len()),
        },
        _ => {
            let mut i = 0;
            while i + 1 < data.len() {
                if data[i] == 0 && data[i + 1] == 0 {
                    return (&data[..i], i + 2);
                }
                i += 2;
            }
            (data, data.len())
        }
    }
}
