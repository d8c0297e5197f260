//! Format-neutral tag model
//!
//! Every codec decodes into, and serializes from, the same in-memory
//! document: a table of supported fields, an ordered list of format-specific
//! additional fields, pictures, and chapters. Callers edit by handing a
//! *delta* `TagData` to the write path; [`TagData::merged_with`] folds the
//! delta into the state read from the file.

pub mod structure;

use std::collections::BTreeMap;

/// Which tagging system a field or tag region belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    /// ID3v1 trailer
    Id3v1,
    /// ID3v2 header tag
    Id3v2,
    /// APEv2 trailer tag
    Ape,
    /// The format's own tagging system (Vorbis Comment, ID666, ...)
    Native,
}

/// Supported textual fields with first-class accessors
///
/// The discriminant order is the canonical serialization order for codecs
/// that have no order of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TagField {
    GeneralDescription,
    Title,
    Artist,
    Composer,
    Comment,
    Genre,
    Album,
    ReleaseDate,
    ReleaseYear,
    TrackNumber,
    DiscNumber,
    Rating,
    OriginalArtist,
    OriginalAlbum,
    Copyright,
    Publisher,
    AlbumArtist,
    Conductor,
}

/// Value of an additional field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Binary(Vec<u8>),
}

impl FieldValue {
    /// The text content, if this is a text value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            FieldValue::Binary(_) => None,
        }
    }

    /// The binary content, if this is a binary value
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Binary(data) => Some(data),
            FieldValue::Text(_) => None,
        }
    }
}

/// A field the format supports but the supported-field table does not
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdditionalField {
    /// Which tagging system owns the field
    pub kind: TagKind,
    /// Format-specific key ("MOOD", "TXXX:foo", "XID6_LOOP", ...)
    pub code: String,
    pub value: FieldValue,
    /// Stream the field applies to (0 = whole file)
    pub stream_number: u16,
    /// ISO 639-2 language code where the format records one
    pub language: String,
    /// Codec-internal region the field was read from
    pub zone: String,
    /// In a delta: remove the matching persisted field
    pub deleted: bool,
}

impl AdditionalField {
    /// Create a text field owned by `kind`
    pub fn text<C: Into<String>, V: Into<String>>(kind: TagKind, code: C, value: V) -> Self {
        AdditionalField {
            kind,
            code: code.into(),
            value: FieldValue::Text(value.into()),
            stream_number: 0,
            language: String::new(),
            zone: String::new(),
            deleted: false,
        }
    }

    /// Create a binary field owned by `kind`
    pub fn binary<C: Into<String>>(kind: TagKind, code: C, value: Vec<u8>) -> Self {
        AdditionalField {
            kind,
            code: code.into(),
            value: FieldValue::Binary(value),
            stream_number: 0,
            language: String::new(),
            zone: String::new(),
            deleted: false,
        }
    }

    /// A deletion marker for the field `code`
    pub fn deletion<C: Into<String>>(kind: TagKind, code: C) -> Self {
        AdditionalField {
            deleted: true,
            ..AdditionalField::text(kind, code, "")
        }
    }
}

/// Format-neutral picture classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureType {
    /// No specific role
    Generic,
    /// 32x32 file icon
    Icon,
    /// Front cover
    Front,
    /// Back cover
    Back,
    /// Leaflet page
    Leaflet,
    /// Media label (CD face)
    Cd,
    /// Format-specific type preserved through `native_code`
    Unsupported,
}

impl PictureType {
    /// Map the ID3v2 APIC / FLAC PICTURE type code
    pub fn from_code(code: u32) -> Self {
        match code {
            0x00 => PictureType::Generic,
            0x01 => PictureType::Icon,
            0x03 => PictureType::Front,
            0x04 => PictureType::Back,
            0x05 => PictureType::Leaflet,
            0x06 => PictureType::Cd,
            _ => PictureType::Unsupported,
        }
    }

    /// The canonical type code, when one exists
    pub fn code(self) -> Option<u32> {
        match self {
            PictureType::Generic => Some(0x00),
            PictureType::Icon => Some(0x01),
            PictureType::Front => Some(0x03),
            PictureType::Back => Some(0x04),
            PictureType::Leaflet => Some(0x05),
            PictureType::Cd => Some(0x06),
            PictureType::Unsupported => None,
        }
    }
}

/// An embedded picture: opaque bytes plus a format hint
///
/// The core never decodes image data. `width`/`height`/`color_depth`/
/// `colors_used` carry whatever the container recorded (FLAC PICTURE
/// blocks); zero means unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureData {
    pub pic_type: PictureType,
    /// Format-specific type byte; authoritative when `pic_type` is
    /// `Unsupported`
    pub native_code: u32,
    /// MIME type or format hint ("image/jpeg", "image/png", ...)
    pub mime: String,
    pub description: String,
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub color_depth: u32,
    pub colors_used: u32,
    /// In a delta: remove the matching persisted picture
    pub deleted: bool,
}

impl PictureData {
    /// Create a picture of `pic_type` with the canonical native code
    pub fn new<M: Into<String>>(pic_type: PictureType, mime: M, data: Vec<u8>) -> Self {
        PictureData {
            pic_type,
            native_code: pic_type.code().unwrap_or(0),
            mime: mime.into(),
            description: String::new(),
            data,
            width: 0,
            height: 0,
            color_depth: 0,
            colors_used: 0,
            deleted: false,
        }
    }

    /// Create a picture with an explicit format-specific type code
    pub fn with_native_code<M: Into<String>>(code: u32, mime: M, data: Vec<u8>) -> Self {
        PictureData {
            pic_type: PictureType::from_code(code),
            native_code: code,
            mime: mime.into(),
            description: String::new(),
            data,
            width: 0,
            height: 0,
            color_depth: 0,
            colors_used: 0,
            deleted: false,
        }
    }

    /// A deletion marker matching the picture identified by `code`
    pub fn deletion(code: u32) -> Self {
        PictureData {
            deleted: true,
            ..PictureData::with_native_code(code, "", Vec::new())
        }
    }

    /// Deletion identity: `(picture-type, native-code)` for recognized
    /// types, native code alone otherwise
    fn same_identity(&self, other: &PictureData) -> bool {
        if self.pic_type != PictureType::Unsupported {
            self.pic_type == other.pic_type && self.native_code == other.native_code
        } else {
            self.native_code == other.native_code
        }
    }
}

/// A chapter marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub start_ms: u32,
    pub end_ms: Option<u32>,
    pub title: String,
    pub url: String,
    pub subtitle: String,
}

impl Chapter {
    /// Create a chapter starting at `start_ms`
    pub fn new<T: Into<String>>(start_ms: u32, title: T) -> Self {
        Chapter {
            start_ms,
            end_ms: None,
            title: title.into(),
            url: String::new(),
            subtitle: String::new(),
        }
    }

    /// Set the chapter URL
    pub fn with_url<U: Into<String>>(mut self, url: U) -> Self {
        self.url = url.into();
        self
    }
}

/// The format-neutral tag document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagData {
    /// Supported textual fields
    pub fields: BTreeMap<TagField, String>,
    /// Ordered format-specific fields; unique by `(kind, code)`
    pub additional: Vec<AdditionalField>,
    /// Ordered pictures
    pub pictures: Vec<PictureData>,
    /// `Some` replaces the persisted chapter list wholesale on write
    pub chapters: Option<Vec<Chapter>>,
}

impl TagData {
    pub fn new() -> Self {
        TagData::default()
    }

    /// Set a supported field. An empty value means "erase on write".
    pub fn set<V: Into<String>>(&mut self, field: TagField, value: V) -> &mut Self {
        self.fields.insert(field, value.into());
        self
    }

    /// Get a supported field
    pub fn get(&self, field: TagField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    /// Upsert an additional field by `(kind, code)`
    pub fn push_additional(&mut self, field: AdditionalField) -> &mut Self {
        if let Some(existing) = self
            .additional
            .iter_mut()
            .find(|f| f.kind == field.kind && f.code == field.code)
        {
            *existing = field;
        } else {
            self.additional.push(field);
        }
        self
    }

    /// Find an additional field by `(kind, code)`
    pub fn find_additional(&self, kind: TagKind, code: &str) -> Option<&AdditionalField> {
        self.additional
            .iter()
            .find(|f| f.kind == kind && f.code == code)
    }

    /// Append a picture
    pub fn push_picture(&mut self, picture: PictureData) -> &mut Self {
        self.pictures.push(picture);
        self
    }

    /// True when nothing would be persisted
    pub fn is_empty(&self) -> bool {
        self.fields.values().all(String::is_empty)
            && self.additional.iter().all(|f| f.deleted)
            && self.pictures.iter().all(|p| p.deleted)
            && self.chapters.as_ref().map_or(true, Vec::is_empty)
    }

    /// Fold a caller delta into this (current) tag, producing the document
    /// to serialize.
    ///
    /// - supported fields: present-in-delta replaces; empty string erases
    /// - additional fields: deletion markers remove by `(kind, code)`,
    ///   everything else upserts
    /// - pictures: deletion markers remove by picture identity, everything
    ///   else appends
    /// - chapters: a delta list replaces the current list wholesale
    pub fn merged_with(&self, delta: &TagData) -> TagData {
        let mut merged = self.clone();

        for (&field, value) in &delta.fields {
            if value.is_empty() {
                merged.fields.remove(&field);
            } else {
                merged.fields.insert(field, value.clone());
            }
            // A caller edit to track/disc invalidates the raw "n/total"
            // string preserved from the previous read
            if field == TagField::TrackNumber || field == TagField::DiscNumber {
                merged
                    .additional
                    .retain(|f| !raw_number_codes(field).contains(&f.code.as_str()));
            }
        }

        for field in &delta.additional {
            if field.deleted {
                merged
                    .additional
                    .retain(|f| !(f.kind == field.kind && f.code == field.code));
            } else {
                merged.push_additional(field.clone());
            }
        }

        for picture in &delta.pictures {
            if picture.deleted {
                merged.pictures.retain(|p| !picture.same_identity(p));
            } else {
                merged.pictures.push(picture.clone());
            }
        }

        if let Some(chapters) = &delta.chapters {
            merged.chapters = Some(chapters.clone());
        }

        merged
    }
}

/// Native keys under which codecs preserve the raw "number/total" string
fn raw_number_codes(field: TagField) -> &'static [&'static str] {
    match field {
        TagField::TrackNumber => &["TRACKNUMBER", "TRCK", "Track", "XID6_TRACK"],
        TagField::DiscNumber => &["DISCNUMBER", "TPOS", "Disc"],
        _ => &[],
    }
}

/// Lossy numeric projection of a track/disc string: `"01/02"` -> `"1"`
pub fn parse_number_field(raw: &str) -> String {
    let head = raw.split('/').next().unwrap_or(raw).trim();
    match head.parse::<u32>() {
        Ok(n) => n.to_string(),
        Err(_) => head.to_string(),
    }
}
