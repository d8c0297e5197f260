//! Container format handling
//!
//! One codec per container format. Each codec locates the tag regions its
//! format can carry, decodes them into the format-neutral [`TagData`], and
//! serializes edited tags back through the zone machinery in
//! [`crate::tag::structure`].

pub mod ape;
pub mod flac;
pub mod flac_picture;
pub mod id3v1;
pub mod id3v2;
pub mod mpeg;
pub mod ogg;
pub mod spc;
pub mod vorbis;

use crate::error::{Error, Result};
use crate::tag::{AdditionalField, TagData, TagKind};
use crate::Settings;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

pub use vorbis::PictureSinkFn;

/// Container formats with a tag codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Flac,
    OggVorbis,
    Mpeg,
    Spc,
}

/// Audio properties derived incidentally while locating tag regions
#[derive(Debug, Clone, Default)]
pub struct AudioProperties {
    pub format_name: &'static str,
    pub duration_s: f64,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

/// One tag system's state as read from the file
#[derive(Debug, Clone)]
pub struct TagSnapshot {
    pub kind: TagKind,
    /// A tag region of this kind is present in the file
    pub exists: bool,
    /// The region was present but failed to decode
    pub parse_error: bool,
    pub data: TagData,
}

impl TagSnapshot {
    pub(crate) fn absent(kind: TagKind) -> Self {
        TagSnapshot {
            kind,
            exists: false,
            parse_error: false,
            data: TagData::new(),
        }
    }
}

/// Everything a read produces
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub properties: AudioProperties,
    pub tags: Vec<TagSnapshot>,
}

impl ReadOutcome {
    /// The snapshot for one tag system, if the format supports it
    pub fn tag(&self, kind: TagKind) -> Option<&TagSnapshot> {
        self.tags.iter().find(|t| t.kind == kind)
    }
}

/// Read-time behavior switches
pub struct ReadParams<'a> {
    /// Record zones so a write can follow
    pub prepare_for_write: bool,
    /// Decode additional fields and picture bytes (false skips payloads)
    pub include_all_meta: bool,
    /// Receives raw picture bytes as they are decoded
    pub picture_sink: Option<&'a mut PictureSinkFn>,
    pub settings: Settings,
}

impl Default for ReadParams<'_> {
    fn default() -> Self {
        ReadParams {
            prepare_for_write: false,
            include_all_meta: true,
            picture_sink: None,
            settings: Settings::default(),
        }
    }
}

/// A format-specific tag codec
///
/// `read` in prepare-for-writing mode records the zones that `write_tag`
/// later rewrites, so the two calls must see the same codec instance and
/// the file must not change in between.
pub trait MetadataCodec {
    fn format_name(&self) -> &'static str;

    /// Tag systems this container can carry
    fn supported_tag_kinds(&self) -> &'static [TagKind];

    /// Locate and decode tag regions; derive audio properties
    fn read(&mut self, file: &mut File, params: &mut ReadParams) -> Result<ReadOutcome>;

    /// Serialize `tag` into the zones recorded by the preceding read and
    /// splice the file
    fn write_tag(
        &mut self,
        file: &mut File,
        tag: &TagData,
        kind: TagKind,
        settings: &Settings,
    ) -> Result<()>;

    /// The delta that erases the tag. Codecs with fields that are part of
    /// the audio contract (SPC playback controls) override this to retain
    /// them.
    fn removal_delta(&self, current: &TagData) -> TagData {
        removal_delta_keeping(current, |_| false)
    }
}

/// Build a delta erasing everything in `current` except additional fields
/// for which `keep` returns true. The vendor pseudo-field always survives:
/// it is container plumbing, not metadata.
pub(crate) fn removal_delta_keeping<F>(current: &TagData, keep: F) -> TagData
where
    F: Fn(&AdditionalField) -> bool,
{
    let mut delta = TagData::new();
    for &field in current.fields.keys() {
        delta.set(field, "");
    }
    for additional in &current.additional {
        if additional.code == vorbis::VENDOR_CODE || keep(additional) {
            continue;
        }
        delta.push_additional(AdditionalField::deletion(
            additional.kind,
            additional.code.clone(),
        ));
    }
    for picture in &current.pictures {
        let mut marker = picture.clone();
        marker.deleted = true;
        marker.data = Vec::new();
        delta.push_picture(marker);
    }
    delta.chapters = Some(Vec::new());
    delta
}

/// Instantiate the codec for a detected format
pub fn create_codec(format: ContainerFormat) -> Box<dyn MetadataCodec> {
    match format {
        ContainerFormat::Flac => Box::new(flac::FlacCodec::new()),
        ContainerFormat::OggVorbis => Box::new(ogg::OggCodec::new()),
        ContainerFormat::Mpeg => Box::new(mpeg::MpegCodec::new()),
        ContainerFormat::Spc => Box::new(spc::SpcCodec::new()),
    }
}

/// Detect the container format from magic bytes, falling back to the file
/// extension for formats whose first frame carries no stable signature
pub fn detect(reader: &mut File, path: &Path) -> Result<ContainerFormat> {
    let mut header = [0u8; 33];
    reader.seek(SeekFrom::Start(0))?;
    let got = reader.read(&mut header)?;
    reader.seek(SeekFrom::Start(0))?;
    let header = &header[..got];

    if is_flac(header) {
        return Ok(ContainerFormat::Flac);
    }
    if is_ogg(header) {
        return Ok(ContainerFormat::OggVorbis);
    }
    if is_spc(header) {
        return Ok(ContainerFormat::Spc);
    }
    if is_mpeg(header) {
        return Ok(ContainerFormat::Mpeg);
    }

    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("flac") => Ok(ContainerFormat::Flac),
        Some("ogg") | Some("oga") => Ok(ContainerFormat::OggVorbis),
        Some("mp3") => Ok(ContainerFormat::Mpeg),
        Some("spc") => Ok(ContainerFormat::Spc),
        _ => Err(Error::NotRecognized),
    }
}

fn is_flac(header: &[u8]) -> bool {
    header.len() >= 4 && &header[0..4] == b"fLaC"
}

fn is_ogg(header: &[u8]) -> bool {
    header.len() >= 4 && &header[0..4] == b"OggS"
}

fn is_spc(header: &[u8]) -> bool {
    header.len() >= spc::FORMAT_TAG.len() && header.starts_with(spc::FORMAT_TAG)
}

fn is_mpeg(header: &[u8]) -> bool {
    if header.len() < 3 {
        return false;
    }
    // ID3v2 tag or MPEG frame sync
    &header[0..3] == b"ID3" || (header[0] == 0xFF && (header[1] & 0xE0) == 0xE0)
}
