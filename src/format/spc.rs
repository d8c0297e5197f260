//! SPC700 codec (ID666 header tag + xid6 extended footer)
//!
//! An SPC file is a fixed 256-byte header, 64 KiB of SPC700 RAM and 256
//! bytes of DSP state (66048 bytes total), optionally followed by the
//! `xid6` extended chunk. The header embeds the ID666 tag at fixed offsets;
//! whether its date/length/fade fields are text or binary is not flagged
//! anywhere and has to be inferred. Playback-control xid6 items (0x30-0x36)
//! shape how long the tune plays, so `remove` keeps them.

use crate::error::{Error, Result};
use crate::format::{
    removal_delta_keeping, AudioProperties, MetadataCodec, ReadOutcome, ReadParams, TagSnapshot,
};
use crate::tag::structure::{AnchorCodec, AnchorKind, StructureHelper, ZoneOutput};
use crate::tag::{
    parse_number_field, AdditionalField, FieldValue, TagData, TagField, TagKind,
};
use crate::util::text::{decode_latin1, encode_latin1};
use crate::Settings;
use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::warn;

/// 27-byte file signature (the version suffix follows it)
pub(crate) const FORMAT_TAG: &[u8] = b"SNES-SPC700 Sound File Data";

/// Header + RAM + DSP state
const SPC_RAW_LENGTH: u64 = 66048;
const TAG_IN_HEADER_OFFSET: u64 = 0x23;
const TAG_IN_HEADER: u8 = 0x1A;

/// ID666 region inside the 256-byte header
const ID666_OFFSET: u64 = 0x2E;
const ID666_SIZE: usize = 0x100 - 0x2E;

// Field offsets relative to ID666_OFFSET
const OFF_TITLE: usize = 0x00;
const OFF_ALBUM: usize = 0x20;
const OFF_DUMPER: usize = 0x40;
const OFF_COMMENT: usize = 0x50;
const OFF_DATE: usize = 0x70;
const OFF_SONG: usize = 0x7B;
const OFF_FADE: usize = 0x7E;
const OFF_ARTIST: usize = 0x83;

const XID6_MAGIC: &[u8] = b"xid6";
const TICKS_PER_SECOND: u64 = 64_000;
const MAX_LOOP_TICKS: u64 = 383_999_999;
const MAX_SONG_SECONDS: u16 = 959;
const MAX_FADE_MS: u32 = 59_999;

const ZONE_ID666: &str = "id666";
const ZONE_XID6_ITEMS: &str = "xid6_items";
const ZONE_XID6_FULL: &str = "xid6";

/// xid6 item value representations
const TYPE_IN_SIZE: u8 = 0;
const TYPE_STRING: u8 = 1;
const TYPE_INT: u8 = 4;

/// What an xid6 item id maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Xid6Target {
    Field(TagField),
    Code(&'static str),
}

/// Known xid6 items in canonical write order
const XID6_SPECS: &[(u8, u8, Xid6Target)] = &[
    (0x01, TYPE_STRING, Xid6Target::Field(TagField::Title)),
    (0x02, TYPE_STRING, Xid6Target::Field(TagField::Album)),
    (0x03, TYPE_STRING, Xid6Target::Field(TagField::Artist)),
    (0x04, TYPE_STRING, Xid6Target::Code("DUMPER")),
    (0x05, TYPE_INT, Xid6Target::Field(TagField::ReleaseDate)),
    (0x06, TYPE_IN_SIZE, Xid6Target::Code("EMULATOR")),
    (0x07, TYPE_STRING, Xid6Target::Field(TagField::Comment)),
    (0x10, TYPE_STRING, Xid6Target::Code("OST")),
    (0x11, TYPE_IN_SIZE, Xid6Target::Field(TagField::DiscNumber)),
    (0x12, TYPE_IN_SIZE, Xid6Target::Field(TagField::TrackNumber)),
    (0x13, TYPE_STRING, Xid6Target::Field(TagField::Publisher)),
    (0x14, TYPE_IN_SIZE, Xid6Target::Field(TagField::Copyright)),
    (0x30, TYPE_INT, Xid6Target::Code("XID6_INTRO")),
    (0x31, TYPE_INT, Xid6Target::Code("XID6_LOOP")),
    (0x32, TYPE_INT, Xid6Target::Code("XID6_END")),
    (0x33, TYPE_INT, Xid6Target::Code("XID6_FADE")),
    (0x34, TYPE_IN_SIZE, Xid6Target::Code("XID6_MUTE")),
    (0x35, TYPE_IN_SIZE, Xid6Target::Code("XID6_LOOPX")),
    (0x36, TYPE_INT, Xid6Target::Code("XID6_AMP")),
];

/// Additional-field codes that survive `remove`
const PLAYBACK_CODES: &[&str] = &[
    "XID6_INTRO",
    "XID6_LOOP",
    "XID6_END",
    "XID6_FADE",
    "XID6_MUTE",
    "XID6_LOOPX",
    "XID6_AMP",
];

/// Header fields with a fixed width; the extended footer only carries them
/// when the value would not fit
const HEADER_WIDTHS: &[(TagField, usize)] = &[
    (TagField::Title, 32),
    (TagField::Album, 32),
    (TagField::Comment, 32),
    (TagField::Artist, 32),
    (TagField::ReleaseDate, 11),
];

fn spec_for_id(id: u8) -> Option<&'static (u8, u8, Xid6Target)> {
    XID6_SPECS.iter().find(|(i, _, _)| *i == id)
}

/// Classification of the date/song-length/fade header bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldClass {
    /// All digits or slashes (null padding allowed)
    Text,
    /// All zero
    Empty,
    /// Anything else
    Binary,
}

fn classify(bytes: &[u8]) -> FieldClass {
    if bytes.iter().all(|&b| b == 0) {
        return FieldClass::Empty;
    }
    if bytes
        .iter()
        .all(|&b| b.is_ascii_digit() || b == b'/' || b == 0)
    {
        return FieldClass::Text;
    }
    FieldClass::Binary
}

fn trimmed_latin1(bytes: &[u8]) -> String {
    decode_latin1(bytes).trim_end_matches(['\0', ' ']).to_string()
}

/// State of the fixed header tag as read from the file
#[derive(Debug, Clone, Default)]
struct Id666State {
    present: bool,
    text_mode: bool,
    raw: Vec<u8>,
    title: String,
    album: String,
    dumper: String,
    comment: String,
    artist: String,
    date: String,
    song_seconds: u32,
    fade_ms: u32,
}

/// SPC700 metadata codec
pub struct SpcCodec {
    helper: StructureHelper,
    file_len: u64,
    header: Id666State,
    has_xid6: bool,
    duration_s: f64,
}

impl SpcCodec {
    pub fn new() -> Self {
        SpcCodec {
            helper: StructureHelper::new(),
            file_len: 0,
            header: Id666State::default(),
            has_xid6: false,
            duration_s: 0.0,
        }
    }

    fn parse_header_tag(&mut self, raw: Vec<u8>, settings: &Settings, tag: &mut TagData) {
        let date_bytes = &raw[OFF_DATE..OFF_DATE + 11];
        let song_bytes = &raw[OFF_SONG..OFF_SONG + 3];
        let fade_bytes = &raw[OFF_FADE..OFF_FADE + 5];

        let date_class = classify(date_bytes);
        let song_class = classify(song_bytes);
        let fade_class = classify(fade_bytes);

        // Binary vs text is not flagged anywhere; infer it from the shape
        // of the three ambiguous fields
        let text_mode = match date_class {
            FieldClass::Binary => false,
            FieldClass::Empty => !settings.spc_prefer_binary_date,
            FieldClass::Text => song_class != FieldClass::Binary && fade_class != FieldClass::Binary,
        };

        let state = &mut self.header;
        state.present = true;
        state.text_mode = text_mode;
        state.title = trimmed_latin1(&raw[OFF_TITLE..OFF_TITLE + 32]);
        state.album = trimmed_latin1(&raw[OFF_ALBUM..OFF_ALBUM + 32]);
        state.dumper = trimmed_latin1(&raw[OFF_DUMPER..OFF_DUMPER + 16]);
        state.comment = trimmed_latin1(&raw[OFF_COMMENT..OFF_COMMENT + 32]);
        state.artist = trimmed_latin1(&raw[OFF_ARTIST..OFF_ARTIST + 32]);

        if text_mode {
            state.date = trimmed_latin1(date_bytes);
            state.song_seconds = trimmed_latin1(song_bytes).parse().unwrap_or(0);
            state.fade_ms = trimmed_latin1(fade_bytes).parse().unwrap_or(0);
        } else {
            state.date = String::new();
            state.song_seconds =
                u16::from_le_bytes([song_bytes[0], song_bytes[1]]).min(MAX_SONG_SECONDS) as u32;
            state.fade_ms =
                u32::from_le_bytes([fade_bytes[0], fade_bytes[1], fade_bytes[2], fade_bytes[3]])
                    .min(MAX_FADE_MS);
        }
        state.raw = raw;

        if !state.title.is_empty() {
            tag.set(TagField::Title, state.title.clone());
        }
        if !state.album.is_empty() {
            tag.set(TagField::Album, state.album.clone());
        }
        if !state.artist.is_empty() {
            tag.set(TagField::Artist, state.artist.clone());
        }
        if !state.comment.is_empty() {
            tag.set(TagField::Comment, state.comment.clone());
        }
        if !state.date.is_empty() {
            tag.set(TagField::ReleaseDate, state.date.clone());
        }
        if !state.dumper.is_empty() {
            let mut field = AdditionalField::text(TagKind::Native, "DUMPER", state.dumper.clone());
            field.zone = ZONE_ID666.to_string();
            tag.push_additional(field);
        }
    }

    fn parse_xid6(&mut self, data: &[u8], tag: &mut TagData) -> Result<()> {
        let mut pos = 0usize;
        while pos + 4 <= data.len() {
            let id = data[pos];
            let item_type = data[pos + 1];
            let size = u16::from_le_bytes([data[pos + 2], data[pos + 3]]) as usize;
            pos += 4;

            let (value, consumed): (FieldValue, usize) = match item_type {
                TYPE_IN_SIZE => (FieldValue::Text(size.to_string()), 0),
                TYPE_STRING => {
                    if pos + size > data.len() {
                        return Err(Error::malformed("xid6", "string item runs past the chunk"));
                    }
                    let text = trimmed_latin1(&data[pos..pos + size]);
                    // Items are padded to an even length
                    (FieldValue::Text(text), size + (size & 1))
                }
                TYPE_INT => {
                    if pos + 4 > data.len() {
                        return Err(Error::malformed("xid6", "integer item truncated"));
                    }
                    let value = u32::from_le_bytes(
                        data[pos..pos + 4].try_into().expect("4 bytes"),
                    );
                    (FieldValue::Text(value.to_string()), 4)
                }
                other => {
                    warn!("xid6 item 0x{:02X} has unknown type {}, preserving raw", id, other);
                    let end = (pos + size + (size & 1)).min(data.len());
                    let mut raw = vec![other];
                    raw.extend_from_slice(&data[pos..end]);
                    let mut field = AdditionalField::binary(
                        TagKind::Native,
                        format!("XID6_{:02X}", id),
                        raw,
                    );
                    field.zone = ZONE_XID6_ITEMS.to_string();
                    tag.push_additional(field);
                    pos = end;
                    continue;
                }
            };
            pos += consumed;

            match spec_for_id(id) {
                Some((_, _, Xid6Target::Field(TagField::TrackNumber))) => {
                    // Upper byte is the track number, lower byte an optional
                    // printable suffix
                    let packed: u32 = match &value {
                        FieldValue::Text(t) => t.parse().unwrap_or(0),
                        FieldValue::Binary(_) => 0,
                    };
                    let track = (packed >> 8) & 0xFF;
                    let suffix = (packed & 0xFF) as u8;
                    tag.set(TagField::TrackNumber, track.to_string());
                    if suffix > 0x20 {
                        let mut raw = AdditionalField::text(
                            TagKind::Native,
                            "XID6_TRACK",
                            format!("{}{}", track, suffix as char),
                        );
                        raw.zone = ZONE_XID6_ITEMS.to_string();
                        tag.push_additional(raw);
                    }
                }
                Some((_, _, Xid6Target::Field(field))) => {
                    if let FieldValue::Text(text) = &value {
                        if !text.is_empty() {
                            tag.set(*field, text.clone());
                        }
                    }
                }
                Some((_, _, Xid6Target::Code(code))) => {
                    tag.push_additional(AdditionalField {
                        kind: TagKind::Native,
                        code: (*code).to_string(),
                        value,
                        stream_number: 0,
                        language: String::new(),
                        zone: ZONE_XID6_ITEMS.to_string(),
                        deleted: false,
                    });
                }
                None => {
                    tag.push_additional(AdditionalField {
                        kind: TagKind::Native,
                        code: format!("XID6_{:02X}", id),
                        value,
                        stream_number: 0,
                        language: String::new(),
                        zone: ZONE_XID6_ITEMS.to_string(),
                        deleted: false,
                    });
                }
            }
        }
        Ok(())
    }

    /// Playback length: xid6 tick items override the header seconds
    fn compute_duration(&self, tag: &TagData) -> f64 {
        let tick = |code: &str| -> Option<u64> {
            tag.find_additional(TagKind::Native, code)
                .and_then(|f| f.value.as_text())
                .and_then(|t| t.parse().ok())
        };
        let intro = tick("XID6_INTRO");
        let loop_ticks = tick("XID6_LOOP");
        let end = tick("XID6_END");

        if intro.is_some() || loop_ticks.is_some() || end.is_some() {
            let loopx = tick("XID6_LOOPX").unwrap_or(0).min(9);
            let fade = tick("XID6_FADE").unwrap_or(0);
            let ticks = intro.unwrap_or(0)
                + (loop_ticks.unwrap_or(0) * loopx).min(MAX_LOOP_TICKS)
                + end.unwrap_or(0)
                + fade;
            return (ticks as f64 / TICKS_PER_SECOND as f64).round();
        }

        if self.header.song_seconds > 0 {
            (self.header.fade_ms as f64 / 1000.0).round() + self.header.song_seconds as f64
        } else {
            0.0
        }
    }

    /// The 210-byte ID666 region with tag edits patched in. Fields keep
    /// their original bytes when the value is unchanged, so an edit-free
    /// write is byte-identical.
    fn serialize_header_tag(&self, tag: &TagData) -> Vec<u8> {
        let mut out = if self.header.present {
            self.header.raw.clone()
        } else {
            vec![0u8; ID666_SIZE]
        };

        let mut patch = |offset: usize, width: usize, old: &str, new: Option<&str>| {
            let new = new.unwrap_or("");
            if self.header.present && new == old {
                return;
            }
            let mut encoded = encode_latin1(new);
            encoded.resize(width, 0);
            out[offset..offset + width].copy_from_slice(&encoded[..width]);
        };

        patch(OFF_TITLE, 32, &self.header.title, tag.get(TagField::Title));
        patch(OFF_ALBUM, 32, &self.header.album, tag.get(TagField::Album));
        patch(
            OFF_DUMPER,
            16,
            &self.header.dumper,
            tag.find_additional(TagKind::Native, "DUMPER")
                .and_then(|f| f.value.as_text()),
        );
        patch(
            OFF_COMMENT,
            32,
            &self.header.comment,
            tag.get(TagField::Comment),
        );
        patch(OFF_ARTIST, 32, &self.header.artist, tag.get(TagField::Artist));
        if self.header.text_mode || !self.header.present {
            patch(OFF_DATE, 11, &self.header.date, tag.get(TagField::ReleaseDate));
        }
        out
    }

    /// Serialize the xid6 items for the merged tag
    fn serialize_xid6_items(&self, tag: &TagData) -> Vec<u8> {
        let mut items = Vec::new();

        for (id, item_type, target) in XID6_SPECS {
            match target {
                Xid6Target::Field(TagField::TrackNumber) => {
                    let Some(track) = tag.get(TagField::TrackNumber) else { continue };
                    let Ok(number) = parse_number_field(track).parse::<u32>() else { continue };
                    let suffix = tag
                        .find_additional(TagKind::Native, "XID6_TRACK")
                        .and_then(|f| f.value.as_text())
                        .and_then(|raw| raw.strip_prefix(&number.to_string()).map(str::to_string))
                        .and_then(|s| s.bytes().next())
                        .filter(|&b| b > 0x20)
                        .unwrap_or(0);
                    let packed = ((number.min(99) << 8) | suffix as u32) as u16;
                    push_item(&mut items, *id, TYPE_IN_SIZE, &ItemValue::InSize(packed));
                }
                Xid6Target::Field(field) => {
                    let Some(value) = tag.get(*field) else { continue };
                    if value.is_empty() {
                        continue;
                    }
                    // Header-resident fields go to the footer only when
                    // the header's fixed width would truncate them
                    if let Some((_, width)) =
                        HEADER_WIDTHS.iter().find(|(f, _)| f == field)
                    {
                        if encode_latin1(value).len() <= *width {
                            continue;
                        }
                    }
                    match *item_type {
                        TYPE_INT => {
                            if let Ok(number) = parse_number_field(value).parse::<u32>() {
                                push_item(&mut items, *id, TYPE_INT, &ItemValue::Int(number));
                            }
                        }
                        TYPE_IN_SIZE => {
                            if let Ok(number) = parse_number_field(value).parse::<u16>() {
                                push_item(&mut items, *id, TYPE_IN_SIZE, &ItemValue::InSize(number));
                            }
                        }
                        _ => {
                            push_item(&mut items, *id, TYPE_STRING, &ItemValue::Text(value));
                        }
                    }
                }
                Xid6Target::Code(code) => {
                    let Some(field) = tag.find_additional(TagKind::Native, code) else {
                        continue;
                    };
                    if field.deleted {
                        continue;
                    }
                    match (&field.value, *item_type) {
                        (FieldValue::Text(text), TYPE_STRING) => {
                            if *code == "DUMPER" && encode_latin1(text).len() <= 16 {
                                continue; // fits the header field
                            }
                            push_item(&mut items, *id, TYPE_STRING, &ItemValue::Text(text));
                        }
                        (FieldValue::Text(text), TYPE_INT) => {
                            if let Ok(number) = text.parse::<u32>() {
                                push_item(&mut items, *id, TYPE_INT, &ItemValue::Int(number));
                            }
                        }
                        (FieldValue::Text(text), _) => {
                            if let Ok(number) = text.parse::<u16>() {
                                push_item(&mut items, *id, TYPE_IN_SIZE, &ItemValue::InSize(number));
                            }
                        }
                        (FieldValue::Binary(_), _) => {}
                    }
                }
            }
        }

        // Unknown ids preserved as [type, data...] binary values
        for field in &tag.additional {
            if field.kind != TagKind::Native || field.deleted {
                continue;
            }
            let Some(hex) = field.code.strip_prefix("XID6_") else { continue };
            let Ok(id) = u8::from_str_radix(hex, 16) else { continue };
            if spec_for_id(id).is_some() {
                continue;
            }
            if let FieldValue::Binary(raw) = &field.value {
                if let Some((&item_type, data)) = raw.split_first() {
                    push_item(&mut items, id, item_type, &ItemValue::Raw(data));
                }
            }
        }

        items
    }
}

enum ItemValue<'a> {
    InSize(u16),
    Int(u32),
    Text(&'a str),
    Raw(&'a [u8]),
}

fn push_item(items: &mut Vec<u8>, id: u8, item_type: u8, value: &ItemValue) {
    items.push(id);
    items.push(item_type);
    match value {
        ItemValue::InSize(packed) => {
            items.write_u16::<LittleEndian>(*packed).unwrap();
        }
        ItemValue::Int(number) => {
            items.write_u16::<LittleEndian>(4).unwrap();
            items.write_u32::<LittleEndian>(*number).unwrap();
        }
        ItemValue::Text(text) => {
            let mut encoded = encode_latin1(text);
            encoded.push(0);
            items
                .write_u16::<LittleEndian>(encoded.len() as u16)
                .unwrap();
            if encoded.len() & 1 == 1 {
                encoded.push(0); // pad to even, not counted in the size
            }
            items.extend_from_slice(&encoded);
        }
        ItemValue::Raw(data) => {
            items.write_u16::<LittleEndian>(data.len() as u16).unwrap();
            items.extend_from_slice(data);
            if data.len() & 1 == 1 {
                items.push(0);
            }
        }
    }
}

impl Default for SpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataCodec for SpcCodec {
    fn format_name(&self) -> &'static str {
        "SPC700"
    }

    fn supported_tag_kinds(&self) -> &'static [TagKind] {
        &[TagKind::Native]
    }

    fn read(&mut self, file: &mut File, params: &mut ReadParams) -> Result<ReadOutcome> {
        self.helper.clear();
        self.header = Id666State::default();
        self.has_xid6 = false;

        self.file_len = file.seek(SeekFrom::End(0))?;
        if self.file_len < SPC_RAW_LENGTH {
            return Err(Error::malformed(
                "SPC",
                format!("file shorter than the {} byte minimum", SPC_RAW_LENGTH),
            ));
        }
        let mut prefix = [0u8; 0x2E];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut prefix)?;
        if &prefix[..FORMAT_TAG.len()] != FORMAT_TAG {
            return Err(Error::malformed("SPC", "missing SNES-SPC700 signature"));
        }

        let mut tag = TagData::new();
        let mut parse_error = false;
        let settings = params.settings.clone();

        let header_tag_present = prefix[TAG_IN_HEADER_OFFSET as usize] == TAG_IN_HEADER;
        if header_tag_present {
            let mut raw = vec![0u8; ID666_SIZE];
            file.seek(SeekFrom::Start(ID666_OFFSET))?;
            file.read_exact(&mut raw)?;
            self.parse_header_tag(raw, &settings, &mut tag);
        }

        if self.file_len > SPC_RAW_LENGTH {
            let mut chunk_header = [0u8; 8];
            file.seek(SeekFrom::Start(SPC_RAW_LENGTH))?;
            file.read_exact(&mut chunk_header)?;
            if &chunk_header[0..4] == XID6_MAGIC {
                self.has_xid6 = true;
                let chunk_size =
                    u32::from_le_bytes(chunk_header[4..8].try_into().expect("4 bytes")) as u64;
                if SPC_RAW_LENGTH + 8 + chunk_size > self.file_len {
                    return Err(Error::malformed("xid6", "chunk size exceeds file size"));
                }
                let mut items = vec![0u8; chunk_size as usize];
                file.read_exact(&mut items)?;
                if let Err(e) = self.parse_xid6(&items, &mut tag) {
                    warn!("xid6 chunk failed to decode: {}", e);
                    parse_error = true;
                }
                if params.prepare_for_write {
                    self.helper
                        .add_zone(ZONE_XID6_ITEMS, SPC_RAW_LENGTH + 8, chunk_size);
                    self.helper.add_anchor(
                        SPC_RAW_LENGTH + 4,
                        ZONE_XID6_ITEMS,
                        AnchorKind::Size,
                        AnchorCodec::U32Le,
                        0,
                    );
                }
            }
        }

        if params.prepare_for_write {
            self.helper
                .add_zone(ZONE_ID666, ID666_OFFSET, ID666_SIZE as u64);
            if !self.has_xid6 {
                self.helper.add_zone(ZONE_XID6_FULL, SPC_RAW_LENGTH, 0);
            }
        }

        self.duration_s = self.compute_duration(&tag);
        let bitrate_kbps = if self.duration_s > 0.0 {
            (self.file_len as f64 * 8.0 / self.duration_s / 1000.0) as u32
        } else {
            0
        };

        Ok(ReadOutcome {
            properties: AudioProperties {
                format_name: "SPC700",
                duration_s: self.duration_s,
                bitrate_kbps,
                sample_rate: 32_000,
                channels: 2,
                bits_per_sample: 16,
            },
            tags: vec![TagSnapshot {
                kind: TagKind::Native,
                exists: header_tag_present || self.has_xid6,
                parse_error,
                data: tag,
            }],
        })
    }

    fn write_tag(
        &mut self,
        file: &mut File,
        tag: &TagData,
        kind: TagKind,
        _settings: &Settings,
    ) -> Result<()> {
        if kind != TagKind::Native {
            return Err(Error::invalid_argument(
                "SPC carries only its native tag system",
            ));
        }
        if !self.helper.has_zones() {
            return Err(Error::invalid_argument(
                "write requires a prepare-for-writing read",
            ));
        }

        let header_bytes = self.serialize_header_tag(tag);
        let items = self.serialize_xid6_items(tag);

        // Without an existing header tag, only claim the reserved region
        // when there is something to put in it
        let writes_header = self.header.present
            || header_bytes.iter().any(|&b| b != 0);
        let mut outputs = if writes_header {
            vec![ZoneOutput::new(ZONE_ID666, header_bytes)]
        } else {
            vec![ZoneOutput::unchanged(ZONE_ID666)]
        };
        if self.has_xid6 {
            outputs.push(ZoneOutput::new(ZONE_XID6_ITEMS, items));
        } else if !items.is_empty() {
            let mut chunk = Vec::with_capacity(8 + items.len());
            chunk.extend_from_slice(XID6_MAGIC);
            chunk.write_u32::<LittleEndian>(items.len() as u32).unwrap();
            chunk.extend_from_slice(&items);
            outputs.push(ZoneOutput::new(ZONE_XID6_FULL, chunk));
        } else {
            outputs.push(ZoneOutput::new(ZONE_XID6_FULL, Vec::new()));
        }
        self.helper.commit(file, outputs)?;

        // The header tag flag byte lives outside any zone
        if writes_header && !self.header.present {
            file.seek(SeekFrom::Start(TAG_IN_HEADER_OFFSET))?;
            file.write_all(&[TAG_IN_HEADER])?;
            self.header.present = true;
        }
        Ok(())
    }

    fn removal_delta(&self, current: &TagData) -> TagData {
        removal_delta_keeping(current, |field| {
            PLAYBACK_CODES.contains(&field.code.as_str())
        })
    }
}
