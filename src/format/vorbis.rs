//! Vorbis Comment field codec
//!
//! The field layer shared by Ogg Vorbis (inside the `0x03` header packet)
//! and FLAC (inside a `VORBIS_COMMENT` block). Pure `KEY=VALUE` parsing and
//! serialization; the carriers own the framing around it. Pictures travel
//! base64-encoded in `METADATA_BLOCK_PICTURE` when the carrier has no
//! picture blocks of its own (Ogg).

use crate::error::{Error, Result};
use crate::format::flac_picture;
use crate::tag::{parse_number_field, AdditionalField, Chapter, PictureType, TagData, TagField, TagKind};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};
use tracing::warn;

/// Pseudo-field carrying the vendor string so round trips preserve it
pub const VENDOR_CODE: &str = "VENDOR";

/// Key carrying a base64 FLAC PICTURE body in picture-less carriers
pub const PICTURE_CODE: &str = "METADATA_BLOCK_PICTURE";

/// Callback receiving raw picture bytes during a read
pub type PictureSinkFn = dyn FnMut(&[u8], PictureType, u32);

/// Key-to-field mapping, also the canonical write order
const FIELD_MAPPING: &[(&str, TagField)] = &[
    ("TITLE", TagField::Title),
    ("ARTIST", TagField::Artist),
    ("ALBUM", TagField::Album),
    ("ALBUMARTIST", TagField::AlbumArtist),
    ("COMMENT", TagField::Comment),
    ("DESCRIPTION", TagField::GeneralDescription),
    ("DATE", TagField::ReleaseDate),
    ("YEAR", TagField::ReleaseYear),
    ("TRACKNUMBER", TagField::TrackNumber),
    ("DISCNUMBER", TagField::DiscNumber),
    ("GENRE", TagField::Genre),
    ("COMPOSER", TagField::Composer),
    ("COPYRIGHT", TagField::Copyright),
    ("CONDUCTOR", TagField::Conductor),
    ("PUBLISHER", TagField::Publisher),
    ("RATING", TagField::Rating),
    ("ORIGINALARTIST", TagField::OriginalArtist),
    ("ORIGINALALBUM", TagField::OriginalAlbum),
];

/// Read-only aliases accepted in the wild
const READ_ALIASES: &[(&str, TagField)] = &[("ALBUM ARTIST", TagField::AlbumArtist)];

fn field_for_key(key: &str) -> Option<TagField> {
    FIELD_MAPPING
        .iter()
        .chain(READ_ALIASES)
        .find(|(k, _)| *k == key)
        .map(|(_, f)| *f)
}

/// Parse a Vorbis Comment payload into `tag`
///
/// `framed` expects the trailing Ogg framing bit; `zone` names the region
/// the fields are attributed to.
pub fn parse(
    data: &[u8],
    framed: bool,
    zone: &str,
    tag: &mut TagData,
    picture_sink: &mut Option<&mut PictureSinkFn>,
) -> Result<()> {
    let mut cursor = Cursor::new(data);

    let vendor_len = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| Error::malformed("vorbis comment", "truncated vendor length"))?
        as usize;
    let mut vendor = vec![0u8; vendor_len];
    cursor
        .read_exact(&mut vendor)
        .map_err(|_| Error::malformed("vorbis comment", "truncated vendor string"))?;
    let mut vendor_field = AdditionalField::text(
        TagKind::Native,
        VENDOR_CODE,
        String::from_utf8_lossy(&vendor).into_owned(),
    );
    vendor_field.zone = zone.to_string();
    tag.push_additional(vendor_field);

    let count = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| Error::malformed("vorbis comment", "truncated entry count"))?;

    let mut chapters: Vec<Chapter> = Vec::new();

    for _ in 0..count {
        let len = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| Error::malformed("vorbis comment", "truncated entry length"))?
            as usize;
        let mut entry = vec![0u8; len];
        cursor
            .read_exact(&mut entry)
            .map_err(|_| Error::malformed("vorbis comment", "entry shorter than declared"))?;

        let split = match entry.iter().position(|&b| b == b'=') {
            Some(pos) => pos,
            None => {
                warn!("vorbis comment entry without '=' separator, skipping");
                continue;
            }
        };
        let key = String::from_utf8_lossy(&entry[..split]).to_uppercase();
        let value = String::from_utf8_lossy(&entry[split + 1..]).into_owned();

        if key == PICTURE_CODE {
            let body = BASE64.decode(value.trim()).map_err(|e| {
                Error::malformed("vorbis comment", format!("bad picture base64: {}", e))
            })?;
            let picture = flac_picture::parse(&body)?;
            if let Some(sink) = picture_sink {
                sink(&picture.data, picture.pic_type, picture.native_code);
            }
            tag.push_picture(picture);
            continue;
        }

        if let Some((index, part)) = parse_chapter_key(&key) {
            apply_chapter_part(&mut chapters, index, part, &value);
            continue;
        }

        match field_for_key(&key) {
            Some(field @ (TagField::TrackNumber | TagField::DiscNumber)) => {
                let canonical = parse_number_field(&value);
                if canonical != value {
                    let mut raw = AdditionalField::text(TagKind::Native, key, value);
                    raw.zone = zone.to_string();
                    tag.push_additional(raw);
                }
                tag.set(field, canonical);
            }
            Some(field) => {
                tag.set(field, value);
            }
            None => {
                let mut extra = AdditionalField::text(TagKind::Native, key, value);
                extra.zone = zone.to_string();
                tag.push_additional(extra);
            }
        }
    }

    if !chapters.is_empty() {
        chapters.sort_by_key(|c| c.start_ms);
        tag.chapters = Some(chapters);
    }

    if framed {
        let mut framing = [0u8; 1];
        cursor
            .read_exact(&mut framing)
            .map_err(|_| Error::malformed("vorbis comment", "missing framing bit"))?;
        if framing[0] & 0x01 == 0 {
            return Err(Error::malformed("vorbis comment", "framing bit not set"));
        }
    }

    Ok(())
}

/// Serialize `tag` as a Vorbis Comment payload
///
/// `with_pictures` emits `METADATA_BLOCK_PICTURE` entries (Ogg); FLAC
/// passes false and stores pictures in its own blocks.
pub fn serialize(tag: &TagData, framed: bool, with_pictures: bool) -> Vec<u8> {
    let vendor = tag
        .find_additional(TagKind::Native, VENDOR_CODE)
        .and_then(|f| f.value.as_text())
        .unwrap_or("");

    let mut entries: Vec<Vec<u8>> = Vec::new();

    for (key, field) in FIELD_MAPPING {
        let Some(value) = tag.get(*field) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        // Prefer the preserved raw "n/total" string when it still matches
        // the supported value
        let raw = tag
            .find_additional(TagKind::Native, key)
            .and_then(|f| f.value.as_text())
            .filter(|raw| parse_number_field(raw) == parse_number_field(value));
        let emitted = raw.unwrap_or(value);
        entries.push(format!("{}={}", key, emitted).into_bytes());
    }

    if let Some(chapters) = &tag.chapters {
        let mut sorted: Vec<&Chapter> = chapters.iter().collect();
        sorted.sort_by_key(|c| c.start_ms);
        for (index, chapter) in sorted.iter().enumerate() {
            entries.push(
                format!("CHAPTER{:03}={}", index, format_timestamp(chapter.start_ms)).into_bytes(),
            );
            if !chapter.title.is_empty() {
                entries.push(format!("CHAPTER{:03}NAME={}", index, chapter.title).into_bytes());
            }
            if !chapter.url.is_empty() {
                entries.push(format!("CHAPTER{:03}URL={}", index, chapter.url).into_bytes());
            }
        }
    }

    for field in &tag.additional {
        if field.kind != TagKind::Native || field.deleted {
            continue;
        }
        if field.code == VENDOR_CODE || field.code == PICTURE_CODE {
            continue;
        }
        // Raw track/disc strings were already folded into the mapped entry
        if field_for_key(&field.code).is_some() {
            continue;
        }
        let Some(value) = field.value.as_text() else {
            continue;
        };
        entries.push(format!("{}={}", field.code.to_uppercase(), value).into_bytes());
    }

    if with_pictures {
        for picture in &tag.pictures {
            if picture.deleted {
                continue;
            }
            let body = flac_picture::build(picture);
            entries
                .push(format!("{}={}", PICTURE_CODE, BASE64.encode(&body)).into_bytes());
        }
    }

    let mut out = Vec::new();
    // Infallible: Vec<u8> writes cannot error
    out.write_u32::<LittleEndian>(vendor.len() as u32).unwrap();
    out.extend_from_slice(vendor.as_bytes());
    out.write_u32::<LittleEndian>(entries.len() as u32).unwrap();
    for entry in &entries {
        out.write_u32::<LittleEndian>(entry.len() as u32).unwrap();
        out.extend_from_slice(entry);
    }
    if framed {
        out.push(0x01);
    }
    out
}

/// Recognize `CHAPTERxxx`, `CHAPTERxxxNAME`, `CHAPTERxxxURL`
fn parse_chapter_key(key: &str) -> Option<(u32, ChapterPart)> {
    let rest = key.strip_prefix("CHAPTER")?;
    if rest.len() < 3 || !rest.as_bytes()[..3].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let index: u32 = rest[..3].parse().ok()?;
    match &rest[3..] {
        "" => Some((index, ChapterPart::Start)),
        "NAME" => Some((index, ChapterPart::Name)),
        "URL" => Some((index, ChapterPart::Url)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
enum ChapterPart {
    Start,
    Name,
    Url,
}

fn apply_chapter_part(chapters: &mut Vec<Chapter>, index: u32, part: ChapterPart, value: &str) {
    let index = index as usize;
    while chapters.len() <= index {
        chapters.push(Chapter::new(0, ""));
    }
    match part {
        ChapterPart::Start => chapters[index].start_ms = parse_timestamp(value),
        ChapterPart::Name => chapters[index].title = value.to_string(),
        ChapterPart::Url => chapters[index].url = value.to_string(),
    }
}

/// `hh:mm:ss.sss` to milliseconds; malformed components read as zero
fn parse_timestamp(value: &str) -> u32 {
    let mut parts = value.split(':');
    let hours: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let minutes: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let seconds_part = parts.next().unwrap_or("0");
    let mut sec_parts = seconds_part.split('.');
    let seconds: u32 = sec_parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let millis: u32 = sec_parts
        .next()
        .map(|p| format!("{:0<3}", p))
        .and_then(|p| p[..3].parse().ok())
        .unwrap_or(0);
    ((hours * 60 + minutes) * 60 + seconds) * 1000 + millis
}

fn format_timestamp(ms: u32) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms / 60_000) % 60;
    let seconds = (ms / 1000) % 60;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, ms % 1000)
}
