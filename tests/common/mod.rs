//! Common test utilities for TagIO integration tests
//!
//! Fixture files are synthesized byte-by-byte so every test starts from a
//! known-good container; picture assertions go through the `image` crate,
//! which plays the external image-probe role (the library itself never
//! decodes pictures).

#![allow(dead_code)]

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

// ============================================================================
// Ogg Vorbis fixtures
// ============================================================================

/// Ogg page CRC (polynomial 0x04C11DB7, init 0, no reflection)
fn ogg_crc(data: &[u8]) -> u32 {
    let mut crc = 0u32;
    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            if crc & 0x8000_0000 != 0 {
                crc = (crc << 1) ^ 0x04C1_1DB7;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

fn ogg_page(
    header_type: u8,
    granule: u64,
    serial: u32,
    sequence: u32,
    lacing: &[u8],
    payload: &[u8],
) -> Vec<u8> {
    let mut page = Vec::new();
    page.extend_from_slice(b"OggS");
    page.push(0);
    page.push(header_type);
    page.extend_from_slice(&granule.to_le_bytes());
    page.extend_from_slice(&serial.to_le_bytes());
    page.extend_from_slice(&sequence.to_le_bytes());
    page.extend_from_slice(&0u32.to_le_bytes());
    page.push(lacing.len() as u8);
    page.extend_from_slice(lacing);
    page.extend_from_slice(payload);
    let crc = ogg_crc(&page);
    page[22..26].copy_from_slice(&crc.to_le_bytes());
    page
}

/// A tag-free Ogg Vorbis file: identification page, one header page with a
/// vendor-only comment packet plus a stub setup packet, one audio page
pub fn write_empty_ogg(dir: &Path) -> PathBuf {
    let serial = 0x0001_F00D;

    let mut ident = vec![0x01];
    ident.extend_from_slice(b"vorbis");
    ident.extend_from_slice(&0u32.to_le_bytes()); // version
    ident.push(2); // channels
    ident.extend_from_slice(&44_100u32.to_le_bytes());
    ident.extend_from_slice(&0i32.to_le_bytes()); // bitrate max
    ident.extend_from_slice(&128_000i32.to_le_bytes()); // nominal
    ident.extend_from_slice(&0i32.to_le_bytes()); // min
    ident.push(0xB8); // block sizes
    ident.push(0x01); // framing
    assert_eq!(ident.len(), 30);

    let mut comment = vec![0x03];
    comment.extend_from_slice(b"vorbis");
    comment.extend_from_slice(&5u32.to_le_bytes());
    comment.extend_from_slice(b"tagio"); // vendor
    comment.extend_from_slice(&0u32.to_le_bytes()); // entry count
    comment.push(0x01); // framing

    let mut setup = vec![0x05];
    setup.extend_from_slice(b"vorbis");
    setup.extend_from_slice(&[0xAA; 8]);

    let audio: Vec<u8> = (0..64u8).collect();

    let mut file = Vec::new();
    file.extend_from_slice(&ogg_page(0x02, 0, serial, 0, &[ident.len() as u8], &ident));
    let mut header_payload = comment.clone();
    header_payload.extend_from_slice(&setup);
    file.extend_from_slice(&ogg_page(
        0x00,
        0,
        serial,
        1,
        &[comment.len() as u8, setup.len() as u8],
        &header_payload,
    ));
    file.extend_from_slice(&ogg_page(0x04, 44_100, serial, 2, &[audio.len() as u8], &audio));

    let path = dir.join("empty.ogg");
    fs::write(&path, file).unwrap();
    path
}

// ============================================================================
// FLAC fixtures
// ============================================================================

/// Marker at the start of the fake audio frames, for asserting that the
/// audio payload did not move
pub const FLAC_AUDIO_MARKER: &[u8] = b"\xFF\xF8AUDIOFRAMES";

fn flac_block(block_type: u8, last: bool, body: &[u8]) -> Vec<u8> {
    let mut block = Vec::with_capacity(4 + body.len());
    block.push(if last { block_type | 0x80 } else { block_type });
    block.extend_from_slice(&[
        (body.len() >> 16) as u8,
        (body.len() >> 8) as u8,
        body.len() as u8,
    ]);
    block.extend_from_slice(body);
    block
}

fn flac_stream_info() -> Vec<u8> {
    let mut body = Vec::with_capacity(34);
    body.extend_from_slice(&4096u16.to_be_bytes()); // min block size
    body.extend_from_slice(&4096u16.to_be_bytes()); // max block size
    body.extend_from_slice(&[0; 3]); // min frame size
    body.extend_from_slice(&[0; 3]); // max frame size
    // 44.1 kHz, 2 channels, 16 bits, 441000 samples (10 s)
    body.extend_from_slice(&[0x0A, 0xC4, 0x42, 0xF0]);
    body.extend_from_slice(&441_000u32.to_be_bytes());
    body.extend_from_slice(&[0; 16]); // MD5
    body
}

/// A tag-free FLAC file: STREAMINFO, an optional PADDING block, audio
pub fn write_flac(dir: &Path, padding_body: Option<usize>) -> PathBuf {
    let mut file = Vec::new();
    file.extend_from_slice(b"fLaC");
    match padding_body {
        Some(padding) => {
            file.extend_from_slice(&flac_block(0, false, &flac_stream_info()));
            file.extend_from_slice(&flac_block(1, true, &vec![0u8; padding]));
        }
        None => {
            file.extend_from_slice(&flac_block(0, true, &flac_stream_info()));
        }
    }
    file.extend_from_slice(FLAC_AUDIO_MARKER);
    file.extend_from_slice(&[0x55; 52]);

    let path = dir.join("empty.flac");
    fs::write(&path, file).unwrap();
    path
}

/// A FLAC file carrying an opaque CUESHEET block between STREAMINFO and
/// the audio frames
pub fn write_flac_with_cuesheet(dir: &Path, cuesheet_body: &[u8]) -> PathBuf {
    let mut file = Vec::new();
    file.extend_from_slice(b"fLaC");
    file.extend_from_slice(&flac_block(0, false, &flac_stream_info()));
    file.extend_from_slice(&flac_block(5, true, cuesheet_body));
    file.extend_from_slice(FLAC_AUDIO_MARKER);
    file.extend_from_slice(&[0x55; 52]);

    let path = dir.join("cuesheet.flac");
    fs::write(&path, file).unwrap();
    path
}

// ============================================================================
// MP3 fixtures
// ============================================================================

/// A tag-free MP3: three MPEG1 Layer III frames at 128 kbps, 44.1 kHz
pub fn write_mp3(dir: &Path) -> PathBuf {
    // 144 * 128000 / 44100 = 417 bytes per frame
    let mut frame = vec![0xFF, 0xFB, 0x90, 0x00];
    frame.resize(417, 0x11);

    let mut file = Vec::new();
    for _ in 0..3 {
        file.extend_from_slice(&frame);
    }

    let path = dir.join("empty.mp3");
    fs::write(&path, file).unwrap();
    path
}

// ============================================================================
// SPC fixtures
// ============================================================================

/// An SPC file with a text-mode ID666 header tag and no xid6 chunk.
/// `song` (seconds) and `fade` (milliseconds) are decimal strings; empty
/// strings leave the bytes zeroed.
pub fn write_spc(dir: &Path, date: &str, song: &str, fade: &str) -> PathBuf {
    let mut file = vec![0u8; 66048];
    file[..27].copy_from_slice(b"SNES-SPC700 Sound File Data");
    file[27..33].copy_from_slice(b" v0.30");
    file[0x21] = 26;
    file[0x22] = 26;
    file[0x23] = 0x1A; // tag in header
    file[0x24] = 30;

    let mut put = |offset: usize, width: usize, text: &str| {
        let bytes = text.as_bytes();
        assert!(bytes.len() <= width);
        file[offset..offset + bytes.len()].copy_from_slice(bytes);
    };
    put(0x9E, 11, date);
    put(0xA9, 3, song);
    put(0xAC, 5, fade);

    let path = dir.join("test.spc");
    fs::write(&path, file).unwrap();
    path
}

// ============================================================================
// Image probe (external to the library under test)
// ============================================================================

/// Encode a solid-color image of the given dimensions
pub fn make_image(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([120, 40, 200]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, format)
        .unwrap();
    out.into_inner()
}

pub fn make_png(width: u32, height: u32) -> Vec<u8> {
    make_image(width, height, image::ImageFormat::Png)
}

pub fn make_jpeg(width: u32, height: u32) -> Vec<u8> {
    make_image(width, height, image::ImageFormat::Jpeg)
}

/// Decode picture bytes and return (format extension, width, height)
pub fn probe_image(bytes: &[u8]) -> (String, u32, u32) {
    let format = image::guess_format(bytes).unwrap();
    let img = image::load_from_memory(bytes).unwrap();
    (
        format.extensions_str()[0].to_string(),
        img.width(),
        img.height(),
    )
}

// ============================================================================
// Assertions
// ============================================================================

pub fn file_bytes(path: &Path) -> Vec<u8> {
    fs::read(path).unwrap()
}

/// Assert two files are identical in size and content
pub fn assert_same_bytes(path: &Path, expected: &[u8]) {
    let actual = file_bytes(path);
    assert_eq!(actual.len(), expected.len(), "file size changed");
    assert_eq!(actual, expected, "file content changed");
}
