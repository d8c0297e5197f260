//! FLAC PICTURE block body codec
//!
//! The same byte layout serves two carriers: FLAC `PICTURE` metadata blocks
//! and the base64-encoded `METADATA_BLOCK_PICTURE` Vorbis Comment field.
//! Kept separate from the Vorbis Comment field codec so each carrier
//! composes what it needs.

use crate::error::{Error, Result};
use crate::tag::{PictureData, PictureType};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

/// Decode a PICTURE block body
pub fn parse(data: &[u8]) -> Result<PictureData> {
    let mut cursor = Cursor::new(data);

    let native_code = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| Error::malformed("PICTURE block", "truncated picture type"))?;
    let mime = read_prefixed_string(&mut cursor, "MIME type")?;
    let description = read_prefixed_string(&mut cursor, "description")?;

    let width = cursor.read_u32::<BigEndian>()?;
    let height = cursor.read_u32::<BigEndian>()?;
    let color_depth = cursor.read_u32::<BigEndian>()?;
    let colors_used = cursor.read_u32::<BigEndian>()?;

    let data_len = cursor.read_u32::<BigEndian>()? as usize;
    let mut bytes = vec![0u8; data_len];
    cursor
        .read_exact(&mut bytes)
        .map_err(|_| Error::malformed("PICTURE block", "picture data shorter than declared"))?;

    Ok(PictureData {
        pic_type: PictureType::from_code(native_code),
        native_code,
        mime,
        description,
        data: bytes,
        width,
        height,
        color_depth,
        colors_used,
        deleted: false,
    })
}

/// Encode a PICTURE block body
pub fn build(picture: &PictureData) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + picture.mime.len() + picture.data.len());
    // Infallible: Vec<u8> writes cannot error
    out.write_u32::<BigEndian>(picture.native_code).unwrap();
    out.write_u32::<BigEndian>(picture.mime.len() as u32)
        .unwrap();
    out.extend_from_slice(picture.mime.as_bytes());
    out.write_u32::<BigEndian>(picture.description.len() as u32)
        .unwrap();
    out.extend_from_slice(picture.description.as_bytes());
    out.write_u32::<BigEndian>(picture.width).unwrap();
    out.write_u32::<BigEndian>(picture.height).unwrap();
    out.write_u32::<BigEndian>(picture.color_depth).unwrap();
    out.write_u32::<BigEndian>(picture.colors_used).unwrap();
    out.write_u32::<BigEndian>(picture.data.len() as u32)
        .unwrap();
    out.extend_from_slice(&picture.data);
    out
}

fn read_prefixed_string(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<String> {
    let len = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| Error::malformed("PICTURE block", format!("truncated {} length", what)))?
        as usize;
    let mut buf = vec![0u8; len];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| Error::malformed("PICTURE block", format!("truncated {}", what)))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
