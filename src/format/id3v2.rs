//! ID3v2 codec (2.2 / 2.3 / 2.4)
//!
//! All three versions parse into the same model; writes keep the on-file
//! version when it is 2.3 or newer and otherwise upgrade to the configured
//! default. Frame order is not preserved, so this codec guarantees a
//! semantic round trip rather than a byte-identical one. Unknown frames are
//! preserved verbatim as binary additional fields; padding inside the tag
//! absorbs size changes before any audio byte moves.

use crate::error::{Error, Result};
use crate::format::id3v1::GENRES;
use crate::format::{AudioProperties, MetadataCodec, ReadOutcome, ReadParams, TagSnapshot};
use crate::tag::structure::{StructureHelper, ZoneOutput};
use crate::tag::{
    parse_number_field, AdditionalField, Chapter, FieldValue, PictureData, PictureType, TagData,
    TagField, TagKind,
};
use crate::util::bytes::{decode_synchsafe, encode_synchsafe, remove_unsynchronisation};
use crate::util::text::{
    decode, decode_latin1, encode_latin1, encode_utf16_bom, fits_latin1, split_terminated,
    TextEncoding,
};
use crate::Settings;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use tracing::warn;

const ID3_MAGIC: &[u8] = b"ID3";
const HEADER_SIZE: u64 = 10;
const ZONE_ID3V2: &str = "id3v2";
/// Spare padding appended when a growing tag forces a splice anyway
const GROWTH_PADDING: usize = 2048;

const FLAG_UNSYNC: u8 = 0x80;
const FLAG_EXTENDED: u8 = 0x40;
const FLAG_FOOTER: u8 = 0x10;

/// v2.4 frame format flags
const FRAME_V4_UNSYNC: u8 = 0x02;
const FRAME_V4_DATA_LENGTH: u8 = 0x01;
const FRAME_V4_SPECIAL: u8 = 0x0C; // compression or encryption
/// v2.3 frame format flags for compression / encryption
const FRAME_V3_SPECIAL: u8 = 0xC0;

/// Zone marker for frames preserved verbatim (header bytes included)
const RAW_FRAME_ZONE: &str = "raw-frame";
/// Zone marker for plain preserved frame payloads
const FRAME_ZONE: &str = "frames";

/// Text frame id <-> supported field, also the canonical write order
const FIELD_MAPPING: &[(&str, TagField)] = &[
    ("TIT2", TagField::Title),
    ("TPE1", TagField::Artist),
    ("TALB", TagField::Album),
    ("TPE2", TagField::AlbumArtist),
    ("TCOM", TagField::Composer),
    ("TCON", TagField::Genre),
    ("TRCK", TagField::TrackNumber),
    ("TPOS", TagField::DiscNumber),
    ("TYER", TagField::ReleaseYear),
    ("TDRC", TagField::ReleaseDate),
    ("TIT1", TagField::GeneralDescription),
    ("TOPE", TagField::OriginalArtist),
    ("TOAL", TagField::OriginalAlbum),
    ("TCOP", TagField::Copyright),
    ("TPUB", TagField::Publisher),
    ("TPE3", TagField::Conductor),
];

/// v2.2 three-character ids translated to their v2.3 equivalents on read
const V22_TRANSLATION: &[(&str, &str)] = &[
    ("TT2", "TIT2"),
    ("TP1", "TPE1"),
    ("TAL", "TALB"),
    ("TP2", "TPE2"),
    ("TCM", "TCOM"),
    ("TCO", "TCON"),
    ("TRK", "TRCK"),
    ("TPA", "TPOS"),
    ("TYE", "TYER"),
    ("TT1", "TIT1"),
    ("TOA", "TOPE"),
    ("TOT", "TOAL"),
    ("TCR", "TCOP"),
    ("TPB", "TPUB"),
    ("TP3", "TPE3"),
    ("COM", "COMM"),
    ("TXX", "TXXX"),
    ("WXX", "WXXX"),
    ("PIC", "APIC"),
];

fn field_for_id(id: &str) -> Option<TagField> {
    FIELD_MAPPING.iter().find(|(i, _)| *i == id).map(|(_, f)| *f)
}

/// ID3v2 header tag codec
pub struct Id3v2Codec {
    helper: StructureHelper,
    read_version: u8,
    write_version: u8,
    /// Whole tag region including header, padding and footer
    region_size: u64,
}

impl Id3v2Codec {
    pub fn new() -> Self {
        Id3v2Codec {
            helper: StructureHelper::new(),
            read_version: 0,
            write_version: 0,
            region_size: 0,
        }
    }

    /// Size of the tag region at file start, zero when absent
    pub fn region_size(&self) -> u64 {
        self.region_size
    }

    fn parse_frames(&self, body: &[u8], tag: &mut TagData, params: &mut ReadParams) -> Result<()> {
        let version = self.read_version;
        let id_len = if version == 2 { 3 } else { 4 };
        let header_len = if version == 2 { 6 } else { 10 };
        let mut chapters: Vec<Chapter> = Vec::new();
        let mut pos = 0usize;

        while pos + header_len <= body.len() {
            if body[pos] == 0 {
                break; // padding
            }
            let id_bytes = &body[pos..pos + id_len];
            if !id_bytes.iter().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()) {
                return Err(Error::malformed(
                    "ID3v2",
                    format!("invalid frame id at offset {}", pos),
                ));
            }
            let raw_id = String::from_utf8_lossy(id_bytes).into_owned();
            let size = match version {
                2 => ((body[pos + 3] as usize) << 16)
                    | ((body[pos + 4] as usize) << 8)
                    | (body[pos + 5] as usize),
                3 => u32::from_be_bytes(body[pos + 4..pos + 8].try_into().expect("4 bytes"))
                    as usize,
                _ => decode_synchsafe(body[pos + 4..pos + 8].try_into().expect("4 bytes"))?
                    as usize,
            };
            let flags = if version == 2 {
                [0u8, 0u8]
            } else {
                [body[pos + 8], body[pos + 9]]
            };
            let frame_end = pos + header_len + size;
            if frame_end > body.len() {
                return Err(Error::malformed(
                    "ID3v2",
                    format!("frame {} runs past the tag body", raw_id),
                ));
            }
            let mut payload = body[pos + header_len..frame_end].to_vec();

            // Compressed or encrypted frames are preserved whole, header
            // included, and written back verbatim
            let special = (version == 3 && flags[1] & FRAME_V3_SPECIAL != 0)
                || (version == 4 && flags[1] & FRAME_V4_SPECIAL != 0);
            if special {
                let mut field = AdditionalField::binary(
                    TagKind::Id3v2,
                    raw_id.clone(),
                    body[pos..frame_end].to_vec(),
                );
                field.zone = RAW_FRAME_ZONE.to_string();
                tag.push_additional(field);
                pos = frame_end;
                continue;
            }
            if version == 4 {
                if flags[1] & FRAME_V4_DATA_LENGTH != 0 && payload.len() >= 4 {
                    payload.drain(..4);
                }
                if flags[1] & FRAME_V4_UNSYNC != 0 {
                    payload = remove_unsynchronisation(&payload);
                }
            }

            let id = if version == 2 {
                V22_TRANSLATION
                    .iter()
                    .find(|(v22, _)| *v22 == raw_id)
                    .map(|(_, v23)| (*v23).to_string())
                    .unwrap_or(raw_id)
            } else {
                raw_id
            };

            self.dispatch_frame(&id, &payload, tag, &mut chapters, params)?;
            pos = frame_end;
        }

        if !chapters.is_empty() {
            chapters.sort_by_key(|c| c.start_ms);
            tag.chapters = Some(chapters);
        }
        Ok(())
    }

    fn dispatch_frame(
        &self,
        id: &str,
        payload: &[u8],
        tag: &mut TagData,
        chapters: &mut Vec<Chapter>,
        params: &mut ReadParams,
    ) -> Result<()> {
        match id {
            "APIC" => {
                if let Some(picture) = self.parse_picture(payload)? {
                    if let Some(sink) = &mut params.picture_sink {
                        sink(&picture.data, picture.pic_type, picture.native_code);
                    }
                    tag.push_picture(picture);
                }
            }
            "TXXX" => {
                let (desc, value) = parse_described_text(payload)?;
                let mut field =
                    AdditionalField::text(TagKind::Id3v2, format!("TXXX:{}", desc), value);
                field.zone = FRAME_ZONE.to_string();
                tag.push_additional(field);
            }
            "WXXX" => {
                let (desc, url) = parse_described_url(payload)?;
                let mut field =
                    AdditionalField::text(TagKind::Id3v2, format!("WXXX:{}", desc), url);
                field.zone = FRAME_ZONE.to_string();
                tag.push_additional(field);
            }
            "COMM" => {
                let (language, desc, text) = parse_comment(payload)?;
                if desc.is_empty() {
                    tag.set(TagField::Comment, text);
                } else {
                    let mut field =
                        AdditionalField::text(TagKind::Id3v2, format!("COMM:{}", desc), text);
                    field.language = language;
                    field.zone = FRAME_ZONE.to_string();
                    tag.push_additional(field);
                }
            }
            "POPM" => {
                let (_, rest) = split_terminated(payload, TextEncoding::Latin1);
                let rating_pos = payload.len().min(rest);
                if rating_pos < payload.len() {
                    tag.set(TagField::Rating, payload[rating_pos].to_string());
                }
            }
            "CHAP" => {
                if let Some(chapter) = self.parse_chapter(payload)? {
                    chapters.push(chapter);
                }
            }
            "CTOC" => {} // regenerated from the chapter list on write
            _ if id.starts_with('T') => {
                if payload.is_empty() {
                    return Ok(());
                }
                let encoding = TextEncoding::from_id3_byte(payload[0])?;
                let (text_bytes, _) = split_terminated(&payload[1..], encoding);
                let value = decode(text_bytes, encoding);
                match field_for_id(id) {
                    Some(field @ (TagField::TrackNumber | TagField::DiscNumber)) => {
                        let canonical = parse_number_field(&value);
                        if canonical != value {
                            let mut raw = AdditionalField::text(TagKind::Id3v2, id, value);
                            raw.zone = FRAME_ZONE.to_string();
                            tag.push_additional(raw);
                        }
                        tag.set(field, canonical);
                    }
                    Some(TagField::Genre) => {
                        tag.set(TagField::Genre, resolve_genre(&value));
                    }
                    Some(field) => {
                        tag.set(field, value);
                    }
                    None => {
                        let mut field = AdditionalField::text(TagKind::Id3v2, id, value);
                        field.zone = FRAME_ZONE.to_string();
                        tag.push_additional(field);
                    }
                }
            }
            _ if id.starts_with('W') => {
                let (url_bytes, _) = split_terminated(payload, TextEncoding::Latin1);
                let mut field =
                    AdditionalField::text(TagKind::Id3v2, id, decode_latin1(url_bytes));
                field.zone = FRAME_ZONE.to_string();
                tag.push_additional(field);
            }
            _ => {
                let mut field = AdditionalField::binary(TagKind::Id3v2, id, payload.to_vec());
                field.zone = FRAME_ZONE.to_string();
                tag.push_additional(field);
            }
        }
        Ok(())
    }

    fn parse_picture(&self, payload: &[u8]) -> Result<Option<PictureData>> {
        if payload.len() < 4 {
            return Ok(None);
        }
        let encoding = TextEncoding::from_id3_byte(payload[0])?;
        let (mime, type_pos) = if self.read_version == 2 {
            // v2.2: fixed three-character image format
            let format = decode_latin1(&payload[1..4]);
            let mime = match format.as_str() {
                "JPG" => "image/jpeg".to_string(),
                "PNG" => "image/png".to_string(),
                other => format!("image/{}", other.to_lowercase()),
            };
            (mime, 4)
        } else {
            let (mime_bytes, next) = split_terminated(&payload[1..], TextEncoding::Latin1);
            (decode_latin1(mime_bytes), 1 + next)
        };
        if type_pos >= payload.len() {
            return Err(Error::malformed("APIC frame", "missing picture type byte"));
        }
        let native_code = payload[type_pos] as u32;
        let (desc_bytes, data_pos) = split_terminated(&payload[type_pos + 1..], encoding);
        let description = decode(desc_bytes, encoding);
        let data = payload[type_pos + 1 + data_pos..].to_vec();
        Ok(Some(PictureData {
            pic_type: PictureType::from_code(native_code),
            native_code,
            mime,
            description,
            data,
            width: 0,
            height: 0,
            color_depth: 0,
            colors_used: 0,
            deleted: false,
        }))
    }

    fn parse_chapter(&self, payload: &[u8]) -> Result<Option<Chapter>> {
        let (_, mut pos) = split_terminated(payload, TextEncoding::Latin1);
        if pos + 16 > payload.len() {
            return Ok(None);
        }
        let start_ms = u32::from_be_bytes(payload[pos..pos + 4].try_into().expect("4 bytes"));
        let end_ms = u32::from_be_bytes(payload[pos + 4..pos + 8].try_into().expect("4 bytes"));
        pos += 16; // start, end, and the two ignored byte offsets

        let mut chapter = Chapter::new(start_ms, "");
        if end_ms != u32::MAX && end_ms >= start_ms {
            chapter.end_ms = Some(end_ms);
        }
        // Embedded subframes: title, subtitle, url
        while pos + 10 <= payload.len() {
            let sub_id = String::from_utf8_lossy(&payload[pos..pos + 4]).into_owned();
            let sub_size =
                u32::from_be_bytes(payload[pos + 4..pos + 8].try_into().expect("4 bytes"))
                    as usize;
            let sub_end = pos + 10 + sub_size;
            if sub_end > payload.len() {
                break;
            }
            let sub_payload = &payload[pos + 10..sub_end];
            match sub_id.as_str() {
                "TIT2" | "TIT3" if !sub_payload.is_empty() => {
                    let encoding = TextEncoding::from_id3_byte(sub_payload[0])?;
                    let (text, _) = split_terminated(&sub_payload[1..], encoding);
                    let value = decode(text, encoding);
                    if sub_id == "TIT2" {
                        chapter.title = value;
                    } else {
                        chapter.subtitle = value;
                    }
                }
                "WXXX" => {
                    if let Ok((_, url)) = parse_described_url(sub_payload) {
                        chapter.url = url;
                    }
                }
                _ => {}
            }
            pos = sub_end;
        }
        Ok(Some(chapter))
    }

    /// Serialize the whole tag (header + frames), without padding
    fn serialize(&self, tag: &TagData, settings: &Settings) -> Result<Vec<u8>> {
        let version = self.write_version;
        let mut frames = Vec::new();

        for (id, field) in FIELD_MAPPING {
            // TYER is v2.3 only; v2.4 carries the date in TDRC
            if *id == "TYER" && version == 4 {
                continue;
            }
            let Some(value) = tag.get(*field) else { continue };
            if value.is_empty() {
                continue;
            }
            let raw = tag
                .find_additional(TagKind::Id3v2, id)
                .and_then(|f| f.value.as_text())
                .filter(|raw| parse_number_field(raw) == parse_number_field(value));
            let emitted = raw.unwrap_or(value);
            push_frame(&mut frames, version, id, &text_payload(emitted, version, settings));
        }
        if version == 4 && tag.get(TagField::ReleaseDate).is_none() {
            if let Some(year) = tag.get(TagField::ReleaseYear).filter(|y| !y.is_empty()) {
                push_frame(&mut frames, version, "TDRC", &text_payload(year, version, settings));
            }
        }

        if let Some(comment) = tag.get(TagField::Comment).filter(|c| !c.is_empty()) {
            frames_comment(&mut frames, version, "eng", "", comment, settings);
        }
        if let Some(rating) = tag.get(TagField::Rating) {
            if let Ok(byte) = rating.parse::<u8>() {
                let mut payload = vec![0u8]; // empty email, terminated
                payload.push(byte);
                push_frame(&mut frames, version, "POPM", &payload);
            }
        }

        if let Some(chapters) = &tag.chapters {
            let mut sorted: Vec<&Chapter> = chapters.iter().collect();
            sorted.sort_by_key(|c| c.start_ms);
            if !sorted.is_empty() {
                self.push_toc(&mut frames, version, sorted.len());
                for (index, &chapter) in sorted.iter().enumerate() {
                    let next_start = sorted.get(index + 1).map(|c| c.start_ms);
                    self.push_chapter(&mut frames, version, index, chapter, next_start, settings);
                }
            }
        }

        for field in &tag.additional {
            if field.kind != TagKind::Id3v2 || field.deleted {
                continue;
            }
            if field.zone == RAW_FRAME_ZONE {
                if let FieldValue::Binary(raw) = &field.value {
                    frames.extend_from_slice(raw);
                }
                continue;
            }
            // Raw track/disc strings were folded into the mapped frame
            if field_for_id(&field.code).is_some() {
                continue;
            }
            if let Some(desc) = field.code.strip_prefix("TXXX:") {
                if let Some(value) = field.value.as_text() {
                    let payload = described_text_payload(desc, value, version, settings);
                    push_frame(&mut frames, version, "TXXX", &payload);
                }
                continue;
            }
            if let Some(desc) = field.code.strip_prefix("WXXX:") {
                if let Some(url) = field.value.as_text() {
                    let mut payload = Vec::new();
                    let encoding = pick_encoding(desc, version, settings);
                    payload.push(encoding.id3_byte());
                    payload.extend_from_slice(&encode_terminated(desc, encoding));
                    payload.extend_from_slice(&encode_latin1(url));
                    push_frame(&mut frames, version, "WXXX", &payload);
                }
                continue;
            }
            if let Some(desc) = field.code.strip_prefix("COMM:") {
                if let Some(text) = field.value.as_text() {
                    let language = if field.language.len() == 3 {
                        &field.language
                    } else {
                        "eng"
                    };
                    frames_comment(&mut frames, version, language, desc, text, settings);
                }
                continue;
            }
            if field.code.len() != 4 || !field.code.bytes().all(|b| b.is_ascii_alphanumeric()) {
                warn!("dropping frame with id '{}' not expressible in v2.{}", field.code, version);
                continue;
            }
            match &field.value {
                FieldValue::Binary(data) => {
                    push_frame(&mut frames, version, &field.code, data);
                }
                FieldValue::Text(text) => {
                    if field.code.starts_with('W') {
                        push_frame(&mut frames, version, &field.code, &encode_latin1(text));
                    } else {
                        push_frame(
                            &mut frames,
                            version,
                            &field.code,
                            &text_payload(text, version, settings),
                        );
                    }
                }
            }
        }

        for picture in &tag.pictures {
            if picture.deleted {
                continue;
            }
            let encoding = pick_encoding(&picture.description, version, settings);
            let mut payload = Vec::new();
            payload.push(encoding.id3_byte());
            payload.extend_from_slice(picture.mime.as_bytes());
            payload.push(0);
            payload.push(picture.native_code as u8);
            payload.extend_from_slice(&encode_terminated(&picture.description, encoding));
            payload.extend_from_slice(&picture.data);
            push_frame(&mut frames, version, "APIC", &payload);
        }

        if frames.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(HEADER_SIZE as usize + frames.len());
        out.extend_from_slice(ID3_MAGIC);
        out.push(version);
        out.push(0); // revision
        out.push(0); // flags: no unsync, no extended header, no footer
        out.extend_from_slice(&encode_synchsafe(frames.len() as u32));
        out.extend_from_slice(&frames);
        Ok(out)
    }

    fn push_toc(&self, frames: &mut Vec<u8>, version: u8, count: usize) {
        let mut payload = Vec::new();
        payload.extend_from_slice(b"toc\0");
        payload.push(0x03); // top-level, ordered
        payload.push(count as u8);
        for index in 0..count {
            payload.extend_from_slice(format!("chp{}\0", index).as_bytes());
        }
        push_frame(frames, version, "CTOC", &payload);
    }

    fn push_chapter(
        &self,
        frames: &mut Vec<u8>,
        version: u8,
        index: usize,
        chapter: &Chapter,
        next_start: Option<u32>,
        settings: &Settings,
    ) {
        let mut payload = Vec::new();
        payload.extend_from_slice(format!("chp{}\0", index).as_bytes());
        let end = chapter
            .end_ms
            .or(next_start)
            .unwrap_or(chapter.start_ms);
        payload.extend_from_slice(&chapter.start_ms.to_be_bytes());
        payload.extend_from_slice(&end.to_be_bytes());
        payload.extend_from_slice(&u32::MAX.to_be_bytes());
        payload.extend_from_slice(&u32::MAX.to_be_bytes());

        let mut subframes = Vec::new();
        if !chapter.title.is_empty() {
            push_frame(&mut subframes, version, "TIT2", &text_payload(&chapter.title, version, settings));
        }
        if !chapter.subtitle.is_empty() {
            push_frame(&mut subframes, version, "TIT3", &text_payload(&chapter.subtitle, version, settings));
        }
        if !chapter.url.is_empty() {
            let mut url_payload = vec![TextEncoding::Latin1.id3_byte(), 0];
            url_payload.extend_from_slice(&encode_latin1(&chapter.url));
            push_frame(&mut subframes, version, "WXXX", &url_payload);
        }
        payload.extend_from_slice(&subframes);
        push_frame(frames, version, "CHAP", &payload);
    }
}

impl Default for Id3v2Codec {
    fn default() -> Self {
        Self::new()
    }
}

/// The non-latin1 encoding for this version, honoring the configured
/// default where the version allows it
fn wide_encoding(version: u8, settings: &Settings) -> TextEncoding {
    match (version, settings.default_text_encoding) {
        (4, TextEncoding::Utf16) => TextEncoding::Utf16,
        (4, _) => TextEncoding::Utf8,
        _ => TextEncoding::Utf16,
    }
}

/// Minimum encoding that preserves `text`
fn pick_encoding(text: &str, version: u8, settings: &Settings) -> TextEncoding {
    if fits_latin1(text) {
        TextEncoding::Latin1
    } else {
        wide_encoding(version, settings)
    }
}

fn encode_text(text: &str, encoding: TextEncoding) -> Vec<u8> {
    match encoding {
        TextEncoding::Latin1 => encode_latin1(text),
        TextEncoding::Utf16 => encode_utf16_bom(text),
        TextEncoding::Utf16Be => text
            .encode_utf16()
            .flat_map(|unit| unit.to_be_bytes())
            .collect(),
        TextEncoding::Utf8 => text.as_bytes().to_vec(),
    }
}

fn encode_terminated(text: &str, encoding: TextEncoding) -> Vec<u8> {
    let mut out = encode_text(text, encoding);
    out.extend(std::iter::repeat(0).take(encoding.terminator_len()));
    out
}

fn text_payload(text: &str, version: u8, settings: &Settings) -> Vec<u8> {
    let encoding = pick_encoding(text, version, settings);
    let mut payload = vec![encoding.id3_byte()];
    payload.extend_from_slice(&encode_text(text, encoding));
    payload
}

fn described_text_payload(
    desc: &str,
    value: &str,
    version: u8,
    settings: &Settings,
) -> Vec<u8> {
    let encoding = if fits_latin1(desc) && fits_latin1(value) {
        TextEncoding::Latin1
    } else {
        wide_encoding(version, settings)
    };
    let mut payload = vec![encoding.id3_byte()];
    payload.extend_from_slice(&encode_terminated(desc, encoding));
    payload.extend_from_slice(&encode_text(value, encoding));
    payload
}

fn frames_comment(
    frames: &mut Vec<u8>,
    version: u8,
    language: &str,
    desc: &str,
    text: &str,
    settings: &Settings,
) {
    let encoding = if fits_latin1(desc) && fits_latin1(text) {
        TextEncoding::Latin1
    } else {
        wide_encoding(version, settings)
    };
    let mut payload = vec![encoding.id3_byte()];
    payload.extend_from_slice(&language.as_bytes()[..3]);
    payload.extend_from_slice(&encode_terminated(desc, encoding));
    payload.extend_from_slice(&encode_text(text, encoding));
    push_frame(frames, version, "COMM", &payload);
}

fn push_frame(frames: &mut Vec<u8>, version: u8, id: &str, payload: &[u8]) {
    frames.extend_from_slice(id.as_bytes());
    if version == 4 {
        frames.extend_from_slice(&encode_synchsafe(payload.len() as u32));
    } else {
        frames.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    }
    frames.extend_from_slice(&[0, 0]); // frame flags
    frames.extend_from_slice(payload);
}

fn parse_described_text(payload: &[u8]) -> Result<(String, String)> {
    if payload.is_empty() {
        return Err(Error::malformed("TXXX frame", "empty payload"));
    }
    let encoding = TextEncoding::from_id3_byte(payload[0])?;
    let (desc_bytes, next) = split_terminated(&payload[1..], encoding);
    let (value_bytes, _) = split_terminated(&payload[1 + next..], encoding);
    Ok((decode(desc_bytes, encoding), decode(value_bytes, encoding)))
}

fn parse_described_url(payload: &[u8]) -> Result<(String, String)> {
    if payload.is_empty() {
        return Err(Error::malformed("WXXX frame", "empty payload"));
    }
    let encoding = TextEncoding::from_id3_byte(payload[0])?;
    let (desc_bytes, next) = split_terminated(&payload[1..], encoding);
    let (url_bytes, _) = split_terminated(&payload[1 + next..], TextEncoding::Latin1);
    Ok((decode(desc_bytes, encoding), decode_latin1(url_bytes)))
}

fn parse_comment(payload: &[u8]) -> Result<(String, String, String)> {
    if payload.len() < 4 {
        return Err(Error::malformed("COMM frame", "payload shorter than 4 bytes"));
    }
    let encoding = TextEncoding::from_id3_byte(payload[0])?;
    let language = decode_latin1(&payload[1..4]);
    let (desc_bytes, next) = split_terminated(&payload[4..], encoding);
    let (text_bytes, _) = split_terminated(&payload[4 + next..], encoding);
    Ok((
        language,
        decode(desc_bytes, encoding),
        decode(text_bytes, encoding),
    ))
}

/// Resolve `(nn)` and plain-numeric ID3v1 genre references
fn resolve_genre(value: &str) -> String {
    if let Some(rest) = value.strip_prefix('(') {
        if let Some(close) = rest.find(')') {
            if let Ok(index) = rest[..close].parse::<usize>() {
                let tail = &rest[close + 1..];
                if !tail.is_empty() {
                    return tail.to_string();
                }
                if index < GENRES.len() {
                    return GENRES[index].to_string();
                }
            }
        }
    }
    if let Ok(index) = value.parse::<usize>() {
        if index < GENRES.len() {
            return GENRES[index].to_string();
        }
    }
    value.to_string()
}

impl MetadataCodec for Id3v2Codec {
    fn format_name(&self) -> &'static str {
        "ID3v2"
    }

    fn supported_tag_kinds(&self) -> &'static [TagKind] {
        &[TagKind::Id3v2]
    }

    fn read(&mut self, file: &mut File, params: &mut ReadParams) -> Result<ReadOutcome> {
        self.helper.clear();
        self.region_size = 0;

        let file_len = file.seek(SeekFrom::End(0))?;
        let mut snapshot = TagSnapshot::absent(TagKind::Id3v2);

        let mut header = [0u8; 10];
        file.seek(SeekFrom::Start(0))?;
        if file_len >= HEADER_SIZE {
            file.read_exact(&mut header)?;
        }
        if file_len >= HEADER_SIZE && &header[0..3] == ID3_MAGIC {
            self.read_version = header[3];
            if !(2..=4).contains(&self.read_version) {
                return Err(Error::unsupported(format!(
                    "ID3v2.{} tags",
                    self.read_version
                )));
            }
            let flags = header[5];
            let body_size = decode_synchsafe(header[6..10].try_into().expect("4 bytes"))? as u64;
            self.region_size = HEADER_SIZE
                + body_size
                + if flags & FLAG_FOOTER != 0 { 10 } else { 0 };
            if self.region_size > file_len {
                return Err(Error::malformed("ID3v2", "tag size exceeds file size"));
            }

            let mut body = vec![0u8; body_size as usize];
            file.read_exact(&mut body)?;
            // v2.2/v2.3 unsynchronisation applies to the whole body
            if flags & FLAG_UNSYNC != 0 && self.read_version < 4 {
                body = remove_unsynchronisation(&body);
            }
            if flags & FLAG_EXTENDED != 0 && body.len() >= 4 {
                let declared =
                    u32::from_be_bytes(body[0..4].try_into().expect("4 bytes")) as usize;
                let skip = if self.read_version == 4 {
                    decode_synchsafe(body[0..4].try_into().expect("4 bytes"))? as usize
                } else {
                    declared + 4
                };
                body.drain(..skip.min(body.len()));
            }

            snapshot.exists = true;
            let mut tag = TagData::new();
            match self.parse_frames(&body, &mut tag, params) {
                Ok(()) => snapshot.data = tag,
                Err(e) => {
                    warn!("ID3v2 tag failed to decode: {}", e);
                    snapshot.parse_error = true;
                }
            }
        }

        self.write_version = if self.read_version >= 3 {
            self.read_version
        } else {
            0 // resolved against Settings at write time
        };

        if params.prepare_for_write {
            self.helper.add_zone(ZONE_ID3V2, 0, self.region_size);
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
        settings: &Settings,
    ) -> Result<()> {
        if kind != TagKind::Id3v2 {
            return Err(Error::invalid_argument("not an ID3v2 write"));
        }
        if !self.helper.has_zones() {
            return Err(Error::invalid_argument(
                "write requires a prepare-for-writing read",
            ));
        }
        if self.write_version == 0 {
            self.write_version = settings.id3v2_version;
        }

        let mut bytes = self.serialize(tag, settings)?;
        let region_old = self
            .helper
            .zone(ZONE_ID3V2)
            .ok_or_else(|| Error::invalid_argument("no ID3v2 zone recorded"))?
            .size;

        if !bytes.is_empty() && settings.enable_padding {
            let padded_len = if bytes.len() as u64 <= region_old {
                // Reuse the existing region: the audio payload stays put
                region_old as usize
            } else {
                bytes.len() + GROWTH_PADDING
            };
            bytes.resize(padded_len, 0);
        }
        if !bytes.is_empty() {
            let body_len = (bytes.len() - HEADER_SIZE as usize) as u32;
            bytes[6..10].copy_from_slice(&encode_synchsafe(body_len));
        }

        self.helper
            .commit(file, vec![ZoneOutput::new(ZONE_ID3V2, bytes)])?;
        if let Some(zone) = self.helper.zone(ZONE_ID3V2) {
            self.region_size = zone.size;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::default()
    }

    fn parse_body(codec: &Id3v2Codec, data: &[u8]) -> TagData {
        let mut tag = TagData::new();
        let mut params = ReadParams::default();
        let body = &data[10..];
        codec.parse_frames(body, &mut tag, &mut params).unwrap();
        tag
    }

    fn round_trip(tag: &TagData) -> TagData {
        let mut codec = Id3v2Codec::new();
        codec.write_version = 3;
        codec.read_version = 3;
        let bytes = codec.serialize(tag, &settings()).unwrap();
        parse_body(&codec, &bytes)
    }

    #[test]
    fn test_text_frames_round_trip() {
        let mut tag = TagData::new();
        tag.set(TagField::Title, "Title");
        tag.set(TagField::Artist, "Artist 父");
        tag.set(TagField::AlbumArtist, "Mike");

        let parsed = round_trip(&tag);
        assert_eq!(parsed.get(TagField::Title), Some("Title"));
        assert_eq!(parsed.get(TagField::Artist), Some("Artist 父"));
        assert_eq!(parsed.get(TagField::AlbumArtist), Some("Mike"));
    }

    #[test]
    fn test_encoding_is_minimal() {
        let mut codec = Id3v2Codec::new();
        codec.write_version = 3;
        let mut tag = TagData::new();
        tag.set(TagField::Title, "Plain");
        let bytes = codec.serialize(&tag, &settings()).unwrap();
        // First frame payload starts after the 10-byte tag header and
        // 10-byte frame header: encoding byte 0 = latin-1
        assert_eq!(bytes[20], 0);

        let mut tag = TagData::new();
        tag.set(TagField::Title, "父");
        let bytes = codec.serialize(&tag, &settings()).unwrap();
        assert_eq!(bytes[20], 1); // UTF-16 with BOM
    }

    #[test]
    fn test_comment_and_user_text() {
        let mut tag = TagData::new();
        tag.set(TagField::Comment, "This is a test");
        tag.push_additional(AdditionalField::text(TagKind::Id3v2, "TXXX:MOOD", "calm"));

        let parsed = round_trip(&tag);
        assert_eq!(parsed.get(TagField::Comment), Some("This is a test"));
        assert_eq!(
            parsed
                .find_additional(TagKind::Id3v2, "TXXX:MOOD")
                .unwrap()
                .value
                .as_text(),
            Some("calm")
        );
    }

    #[test]
    fn test_picture_round_trip() {
        let mut tag = TagData::new();
        let mut picture = PictureData::with_native_code(0x06, "image/jpeg", vec![1, 2, 3, 4]);
        picture.description = "cd".to_string();
        tag.push_picture(picture);

        let parsed = round_trip(&tag);
        assert_eq!(parsed.pictures.len(), 1);
        assert_eq!(parsed.pictures[0].pic_type, PictureType::Cd);
        assert_eq!(parsed.pictures[0].mime, "image/jpeg");
        assert_eq!(parsed.pictures[0].description, "cd");
        assert_eq!(parsed.pictures[0].data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_chapters_round_trip() {
        let mut tag = TagData::new();
        tag.chapters = Some(vec![
            Chapter::new(0, "Intro").with_url("http://x"),
            Chapter::new(15_000, "Body"),
        ]);

        let parsed = round_trip(&tag);
        let chapters = parsed.chapters.unwrap();
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, "Intro");
        assert_eq!(chapters[0].url, "http://x");
        // End defaults to the next chapter's start
        assert_eq!(chapters[0].end_ms, Some(15_000));
        assert_eq!(chapters[1].start_ms, 15_000);
    }

    #[test]
    fn test_unknown_frame_preserved() {
        let mut tag = TagData::new();
        let mut field =
            AdditionalField::binary(TagKind::Id3v2, "PRIV", vec![b'x', 0, 1, 2]);
        field.zone = FRAME_ZONE.to_string();
        tag.push_additional(field);

        let parsed = round_trip(&tag);
        assert_eq!(
            parsed
                .find_additional(TagKind::Id3v2, "PRIV")
                .unwrap()
                .value
                .as_binary(),
            Some(&[b'x', 0, 1, 2][..])
        );
    }

    #[test]
    fn test_genre_references_resolve() {
        assert_eq!(resolve_genre("(17)"), "Rock");
        assert_eq!(resolve_genre("17"), "Rock");
        assert_eq!(resolve_genre("(17)Hard Rock"), "Hard Rock");
        assert_eq!(resolve_genre("Merengue"), "Merengue");
        assert_eq!(resolve_genre("(255)"), "(255)");
    }

    #[test]
    fn test_track_total_preserved_as_raw() {
        let mut tag = TagData::new();
        tag.set(TagField::TrackNumber, "01/12");

        let parsed = round_trip(&tag);
        assert_eq!(parsed.get(TagField::TrackNumber), Some("1"));
        assert_eq!(
            parsed
                .find_additional(TagKind::Id3v2, "TRCK")
                .unwrap()
                .value
                .as_text(),
            Some("01/12")
        );
    }

    #[test]
    fn test_v22_frame_translation() {
        // Minimal v2.2 body: TT2 frame, latin-1 "Hi"
        let mut body = Vec::new();
        body.extend_from_slice(b"TT2");
        body.extend_from_slice(&[0, 0, 3]);
        body.extend_from_slice(&[0, b'H', b'i']);

        let mut codec = Id3v2Codec::new();
        codec.read_version = 2;
        let mut tag = TagData::new();
        let mut params = ReadParams::default();
        codec.parse_frames(&body, &mut tag, &mut params).unwrap();
        assert_eq!(tag.get(TagField::Title), Some("Hi"));
    }

    #[test]
    fn test_v24_synchsafe_frame_sizes() {
        let mut codec = Id3v2Codec::new();
        codec.write_version = 4;
        codec.read_version = 4;
        let mut tag = TagData::new();
        tag.set(TagField::Title, "x".repeat(200));
        let bytes = codec.serialize(&tag, &settings()).unwrap();
        let parsed = parse_body(&codec, &bytes);
        assert_eq!(parsed.get(TagField::Title), Some("x".repeat(200).as_str()));
    }
}
