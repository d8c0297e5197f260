//! APEv2 codec
//!
//! The tag sits at the end of the file (before an ID3v1 trailer when one is
//! present): an optional 32-byte header, the items, and a 32-byte footer
//! that carries the authoritative size and count. Keys are case-insensitive
//! on read; cover art travels as binary `Cover Art (...)` items whose value
//! starts with a null-terminated filename.

use crate::error::{Error, Result};
use crate::format::id3v1;
use crate::format::{AudioProperties, MetadataCodec, ReadOutcome, ReadParams, TagSnapshot};
use crate::tag::structure::{StructureHelper, ZoneOutput};
use crate::tag::{
    parse_number_field, AdditionalField, FieldValue, PictureData, PictureType, TagData, TagField,
    TagKind,
};
use crate::Settings;
use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use tracing::warn;

const APE_MAGIC: &[u8] = b"APETAGEX";
const FOOTER_SIZE: u64 = 32;
const VERSION_V2: u32 = 2000;
const ZONE_APE: &str = "ape";

const FLAG_HAS_HEADER: u32 = 0x8000_0000;
const FLAG_IS_HEADER: u32 = 0x2000_0000;

/// Item value types (bits 1..2 of the item flags)
const TYPE_TEXT: u32 = 0;
const TYPE_BINARY: u32 = 1;
const TYPE_LOCATOR: u32 = 2;

/// Key <-> supported field, canonical case, also the write order
const FIELD_MAPPING: &[(&str, TagField)] = &[
    ("Title", TagField::Title),
    ("Artist", TagField::Artist),
    ("Album", TagField::Album),
    ("Album Artist", TagField::AlbumArtist),
    ("Composer", TagField::Composer),
    ("Comment", TagField::Comment),
    ("Genre", TagField::Genre),
    ("Year", TagField::ReleaseYear),
    ("Track", TagField::TrackNumber),
    ("Disc", TagField::DiscNumber),
    ("Copyright", TagField::Copyright),
    ("Publisher", TagField::Publisher),
    ("Conductor", TagField::Conductor),
    ("Original Artist", TagField::OriginalArtist),
];

fn field_for_key(key: &str) -> Option<(&'static str, TagField)> {
    FIELD_MAPPING
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .copied()
}

/// `Cover Art (...)` key for a picture type
fn cover_art_key(pic_type: PictureType) -> &'static str {
    match pic_type {
        PictureType::Back => "Cover Art (Back)",
        PictureType::Cd => "Cover Art (Media)",
        PictureType::Front => "Cover Art (Front)",
        _ => "Cover Art (Other)",
    }
}

fn picture_type_for_key(key: &str) -> Option<PictureType> {
    match key.to_ascii_lowercase().as_str() {
        "cover art (front)" => Some(PictureType::Front),
        "cover art (back)" => Some(PictureType::Back),
        "cover art (media)" => Some(PictureType::Cd),
        "cover art (other)" => Some(PictureType::Generic),
        _ => None,
    }
}

fn sniff_mime(data: &[u8]) -> &'static str {
    if data.starts_with(&[0xFF, 0xD8]) {
        "image/jpeg"
    } else if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else {
        "application/octet-stream"
    }
}

/// Location of an APE tag found at the end of a file
#[derive(Debug, Clone, Copy)]
struct ApeLocation {
    start: u64,
    total_size: u64,
    items_start: u64,
    items_size: u64,
    item_count: u32,
}

/// APEv2 trailer tag codec
pub struct ApeCodec {
    helper: StructureHelper,
}

impl ApeCodec {
    pub fn new() -> Self {
        ApeCodec {
            helper: StructureHelper::new(),
        }
    }

    /// Find the tag, skipping a trailing ID3v1 block
    fn locate(file: &mut File) -> Result<Option<ApeLocation>> {
        let file_len = file.seek(SeekFrom::End(0))?;
        let id3v1_len = if id3v1::Id3v1Codec::is_present(file)? {
            id3v1::TAG_SIZE
        } else {
            0
        };
        let tag_end = file_len - id3v1_len;
        if tag_end < FOOTER_SIZE {
            return Ok(None);
        }

        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.seek(SeekFrom::Start(tag_end - FOOTER_SIZE))?;
        file.read_exact(&mut footer)?;
        if &footer[0..8] != APE_MAGIC {
            return Ok(None);
        }
        let flags = u32::from_le_bytes(footer[20..24].try_into().expect("4 bytes"));
        if flags & FLAG_IS_HEADER != 0 {
            return Ok(None);
        }
        let tag_size = u32::from_le_bytes(footer[12..16].try_into().expect("4 bytes")) as u64;
        let item_count = u32::from_le_bytes(footer[16..20].try_into().expect("4 bytes"));
        if tag_size < FOOTER_SIZE || tag_size > tag_end {
            return Err(Error::malformed("APE tag", "footer declares impossible size"));
        }

        let header_size = if flags & FLAG_HAS_HEADER != 0 {
            FOOTER_SIZE
        } else {
            0
        };
        let total_size = tag_size + header_size;
        if total_size > tag_end {
            return Err(Error::malformed("APE tag", "tag larger than file"));
        }
        Ok(Some(ApeLocation {
            start: tag_end - total_size,
            total_size,
            items_start: tag_end - tag_size,
            items_size: tag_size - FOOTER_SIZE,
            item_count,
        }))
    }

    fn parse_items(
        &self,
        data: &[u8],
        item_count: u32,
        tag: &mut TagData,
        params: &mut ReadParams,
    ) -> Result<()> {
        let mut pos = 0usize;
        for _ in 0..item_count {
            if pos + 8 > data.len() {
                return Err(Error::malformed("APE tag", "truncated item header"));
            }
            let value_size =
                u32::from_le_bytes(data[pos..pos + 4].try_into().expect("4 bytes")) as usize;
            let flags = u32::from_le_bytes(data[pos + 4..pos + 8].try_into().expect("4 bytes"));
            let key_start = pos + 8;
            let key_end = data[key_start..]
                .iter()
                .position(|&b| b == 0)
                .map(|p| key_start + p)
                .ok_or_else(|| Error::malformed("APE tag", "unterminated item key"))?;
            let key = String::from_utf8_lossy(&data[key_start..key_end]).into_owned();
            if key.len() < 2 {
                return Err(Error::malformed("APE tag", "item key shorter than 2 bytes"));
            }
            let value_start = key_end + 1;
            let value_end = value_start + value_size;
            if value_end > data.len() {
                return Err(Error::malformed(
                    "APE tag",
                    format!("item '{}' value runs past the tag", key),
                ));
            }
            let value = &data[value_start..value_end];

            match (flags >> 1) & 0x03 {
                TYPE_BINARY => {
                    if let Some(pic_type) = picture_type_for_key(&key) {
                        let (filename, bytes) = match value.iter().position(|&b| b == 0) {
                            Some(p) => (
                                String::from_utf8_lossy(&value[..p]).into_owned(),
                                value[p + 1..].to_vec(),
                            ),
                            None => (String::new(), value.to_vec()),
                        };
                        let mut picture =
                            PictureData::new(pic_type, sniff_mime(&bytes), bytes);
                        picture.description = filename;
                        if let Some(sink) = &mut params.picture_sink {
                            sink(&picture.data, picture.pic_type, picture.native_code);
                        }
                        tag.push_picture(picture);
                    } else {
                        let mut field =
                            AdditionalField::binary(TagKind::Ape, key, value.to_vec());
                        field.zone = ZONE_APE.to_string();
                        tag.push_additional(field);
                    }
                }
                TYPE_TEXT | TYPE_LOCATOR => {
                    let text = String::from_utf8_lossy(value).into_owned();
                    match field_for_key(&key) {
                        Some((canonical_key, field @ (TagField::TrackNumber | TagField::DiscNumber))) => {
                            let canonical = parse_number_field(&text);
                            if canonical != text {
                                let mut raw =
                                    AdditionalField::text(TagKind::Ape, canonical_key, text);
                                raw.zone = ZONE_APE.to_string();
                                tag.push_additional(raw);
                            }
                            tag.set(field, canonical);
                        }
                        Some((_, field)) => {
                            tag.set(field, text);
                        }
                        None => {
                            let mut extra = AdditionalField::text(TagKind::Ape, key, text);
                            extra.zone = ZONE_APE.to_string();
                            tag.push_additional(extra);
                        }
                    }
                }
                other => {
                    warn!("APE item '{}' has reserved value type {}, skipping", key, other);
                }
            }
            pos = value_end;
        }
        Ok(())
    }

    fn push_item(items: &mut Vec<u8>, key: &str, value: &[u8], value_type: u32) {
        items
            .write_u32::<LittleEndian>(value.len() as u32)
            .unwrap();
        items.write_u32::<LittleEndian>(value_type << 1).unwrap();
        items.extend_from_slice(key.as_bytes());
        items.push(0);
        items.extend_from_slice(value);
    }

    fn serialize(tag: &TagData) -> Vec<u8> {
        let mut items = Vec::new();
        let mut count = 0u32;

        for (key, field) in FIELD_MAPPING {
            let Some(value) = tag.get(*field) else { continue };
            if value.is_empty() {
                continue;
            }
            let raw = tag
                .find_additional(TagKind::Ape, key)
                .and_then(|f| f.value.as_text())
                .filter(|raw| parse_number_field(raw) == parse_number_field(value));
            Self::push_item(&mut items, key, raw.unwrap_or(value).as_bytes(), TYPE_TEXT);
            count += 1;
        }

        for field in &tag.additional {
            if field.kind != TagKind::Ape || field.deleted {
                continue;
            }
            if field_for_key(&field.code).is_some() {
                continue; // folded into the mapped item above
            }
            match &field.value {
                FieldValue::Text(text) => {
                    Self::push_item(&mut items, &field.code, text.as_bytes(), TYPE_TEXT);
                }
                FieldValue::Binary(data) => {
                    Self::push_item(&mut items, &field.code, data, TYPE_BINARY);
                }
            }
            count += 1;
        }

        for picture in &tag.pictures {
            if picture.deleted {
                continue;
            }
            let mut value = Vec::with_capacity(picture.data.len() + 16);
            let filename = if picture.description.is_empty() {
                default_cover_filename(&picture.mime)
            } else {
                picture.description.clone()
            };
            value.extend_from_slice(filename.as_bytes());
            value.push(0);
            value.extend_from_slice(&picture.data);
            Self::push_item(&mut items, cover_art_key(picture.pic_type), &value, TYPE_BINARY);
            count += 1;
        }

        if count == 0 {
            return Vec::new();
        }

        let tag_size = (items.len() as u64 + FOOTER_SIZE) as u32;
        let mut out = Vec::with_capacity(items.len() + 2 * FOOTER_SIZE as usize);
        write_frame(&mut out, tag_size, count, FLAG_HAS_HEADER | FLAG_IS_HEADER);
        out.extend_from_slice(&items);
        write_frame(&mut out, tag_size, count, FLAG_HAS_HEADER);
        out
    }
}

impl Default for ApeCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn default_cover_filename(mime: &str) -> String {
    match mime {
        "image/png" => "cover.png".to_string(),
        _ => "cover.jpg".to_string(),
    }
}

/// One 32-byte header/footer frame
fn write_frame(out: &mut Vec<u8>, tag_size: u32, count: u32, flags: u32) {
    out.extend_from_slice(APE_MAGIC);
    out.write_u32::<LittleEndian>(VERSION_V2).unwrap();
    out.write_u32::<LittleEndian>(tag_size).unwrap();
    out.write_u32::<LittleEndian>(count).unwrap();
    out.write_u32::<LittleEndian>(flags).unwrap();
    out.extend_from_slice(&[0u8; 8]);
}

impl MetadataCodec for ApeCodec {
    fn format_name(&self) -> &'static str {
        "APEv2"
    }

    fn supported_tag_kinds(&self) -> &'static [TagKind] {
        &[TagKind::Ape]
    }

    fn read(&mut self, file: &mut File, params: &mut ReadParams) -> Result<ReadOutcome> {
        self.helper.clear();
        let location = Self::locate(file)?;

        let mut snapshot = TagSnapshot::absent(TagKind::Ape);
        match location {
            Some(location) => {
                let mut items = vec![0u8; location.items_size as usize];
                file.seek(SeekFrom::Start(location.items_start))?;
                file.read_exact(&mut items)?;

                snapshot.exists = true;
                let mut tag = TagData::new();
                match self.parse_items(&items, location.item_count, &mut tag, params) {
                    Ok(()) => snapshot.data = tag,
                    Err(e) => {
                        warn!("APE tag failed to decode: {}", e);
                        snapshot.parse_error = true;
                    }
                }
                if params.prepare_for_write {
                    self.helper
                        .add_zone(ZONE_APE, location.start, location.total_size);
                }
            }
            None => {
                if params.prepare_for_write {
                    let file_len = file.seek(SeekFrom::End(0))?;
                    let id3v1_len = if id3v1::Id3v1Codec::is_present(file)? {
                        id3v1::TAG_SIZE
                    } else {
                        0
                    };
                    self.helper.add_zone(ZONE_APE, file_len - id3v1_len, 0);
                }
            }
        }

        Ok(ReadOutcome {
            properties: AudioProperties::default(),
            tags: vec![snapshot],
        })
    }

    fn write_tag(
        &mut self,
        file: &mut File,
        tag: &TagData,
        kind: TagKind,
        _settings: &Settings,
    ) -> Result<()> {
        if kind != TagKind::Ape {
            return Err(Error::invalid_argument("not an APE write"));
        }
        if !self.helper.has_zones() {
            return Err(Error::invalid_argument(
                "write requires a prepare-for-writing read",
            ));
        }
        let bytes = Self::serialize(tag);
        self.helper
            .commit(file, vec![ZoneOutput::new(ZONE_APE, bytes)])
    }
}
