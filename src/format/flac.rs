//! FLAC container codec
//!
//! Metadata lives in a chain of typed blocks between the `fLaC` magic and
//! the first audio frame. The Vorbis Comment block delegates field work to
//! [`vorbis`]; PICTURE blocks to [`flac_picture`]. PADDING is the preferred
//! absorber for size changes: because the zone commit rewrites contiguous
//! zones as one region, a comment grow compensated by a padding shrink
//! moves no audio bytes.

use crate::error::{Error, Result};
use crate::format::{
    flac_picture, vorbis, AudioProperties, MetadataCodec, ReadOutcome, ReadParams, TagSnapshot,
};
use crate::tag::structure::{StructureHelper, ZoneOutput};
use crate::tag::{AdditionalField, TagData, TagKind};
use crate::util::bytes::u24_be_bytes;
use crate::Settings;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::{debug, warn};

const FLAC_MAGIC: &[u8] = b"fLaC";

const BLOCK_STREAMINFO: u8 = 0;
const BLOCK_PADDING: u8 = 1;
const BLOCK_APPLICATION: u8 = 2;
const BLOCK_VORBIS_COMMENT: u8 = 4;
const BLOCK_CUESHEET: u8 = 5;
const BLOCK_PICTURE: u8 = 6;

const LAST_BLOCK_FLAG: u8 = 0x80;
/// A block body length is a 24-bit field
const MAX_BLOCK_BODY: usize = 0xFF_FFFF;

const ZONE_VORBIS: &str = "vorbis_comment";
const ZONE_PADDING: &str = "padding";

/// FLAC metadata codec
pub struct FlacCodec {
    helper: StructureHelper,
    audio_offset: u64,
    file_len: u64,
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
    total_samples: u64,
    picture_zone_count: usize,
    has_vorbis_block: bool,
    has_padding: bool,
}

impl FlacCodec {
    pub fn new() -> Self {
        FlacCodec {
            helper: StructureHelper::new(),
            audio_offset: 0,
            file_len: 0,
            sample_rate: 0,
            channels: 0,
            bits_per_sample: 0,
            total_samples: 0,
            picture_zone_count: 0,
            has_vorbis_block: false,
            has_padding: false,
        }
    }

    fn parse_stream_info(&mut self, body: &[u8]) -> Result<()> {
        if body.len() < 34 {
            return Err(Error::malformed("STREAMINFO", "block shorter than 34 bytes"));
        }
        // 16+16 block sizes, 24+24 frame sizes, then the packed fields:
        // 20-bit sample rate, 3-bit channels-1, 5-bit bits-1, 36-bit samples
        self.sample_rate = ((body[10] as u32) << 12)
            | ((body[11] as u32) << 4)
            | ((body[12] as u32) >> 4);
        self.channels = (((body[12] >> 1) & 0x07) + 1) as u16;
        self.bits_per_sample = ((((body[12] & 0x01) << 4) | (body[13] >> 4)) + 1) as u16;
        self.total_samples = (((body[13] & 0x0F) as u64) << 32)
            | u32::from_be_bytes([body[14], body[15], body[16], body[17]]) as u64;
        Ok(())
    }

    fn properties(&self) -> AudioProperties {
        let duration_s = if self.sample_rate > 0 {
            self.total_samples as f64 / self.sample_rate as f64
        } else {
            0.0
        };
        let bitrate_kbps = if duration_s > 0.0 {
            ((self.file_len.saturating_sub(self.audio_offset)) as f64 * 8.0
                / duration_s
                / 1000.0) as u32
        } else {
            0
        };
        AudioProperties {
            format_name: "FLAC",
            duration_s,
            bitrate_kbps,
            sample_rate: self.sample_rate,
            channels: self.channels,
            bits_per_sample: self.bits_per_sample,
        }
    }

    /// Full block bytes (header + body); last-block flags are fixed in a
    /// post-commit sweep
    fn block_bytes(block_type: u8, body: &[u8]) -> Result<Vec<u8>> {
        if body.len() > MAX_BLOCK_BODY {
            return Err(Error::invalid_argument(format!(
                "metadata block body of {} bytes exceeds the 24-bit FLAC limit",
                body.len()
            )));
        }
        let mut out = Vec::with_capacity(4 + body.len());
        out.push(block_type);
        out.extend_from_slice(&u24_be_bytes(body.len() as u32));
        out.extend_from_slice(body);
        Ok(out)
    }

    /// Serialized vorbis-comment block, empty when there is nothing to keep
    fn vorbis_block(tag: &TagData) -> Result<Vec<u8>> {
        let has_vendor = tag
            .find_additional(TagKind::Native, vorbis::VENDOR_CODE)
            .and_then(|f| f.value.as_text())
            .is_some_and(|v| !v.is_empty());
        let has_fields = !tag.fields.is_empty()
            || tag
                .additional
                .iter()
                .any(|f| f.kind == TagKind::Native && !f.deleted && f.code != vorbis::VENDOR_CODE && !is_opaque_code(&f.code))
            || tag.chapters.as_ref().is_some_and(|c| !c.is_empty());
        if !has_vendor && !has_fields {
            return Ok(Vec::new());
        }
        let body = vorbis::serialize(tag, false, false);
        Self::block_bytes(BLOCK_VORBIS_COMMENT, &body)
    }

    /// All kept pictures as contiguous PICTURE blocks
    fn picture_blocks(tag: &TagData) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for picture in &tag.pictures {
            if picture.deleted {
                continue;
            }
            let body = flac_picture::build(picture);
            out.extend_from_slice(&Self::block_bytes(BLOCK_PICTURE, &body)?);
        }
        Ok(out)
    }

    /// Make exactly the final metadata block carry the last-block flag
    fn fix_last_block_flags(&self, file: &mut File, metadata_end: u64) -> Result<()> {
        let mut pos = 4u64;
        while pos < metadata_end {
            let mut header = [0u8; 4];
            file.seek(SeekFrom::Start(pos))?;
            file.read_exact(&mut header)?;
            let body_len =
                ((header[1] as u64) << 16) | ((header[2] as u64) << 8) | (header[3] as u64);
            let block_end = pos + 4 + body_len;
            let should_be_last = block_end >= metadata_end;
            let flagged = header[0] & LAST_BLOCK_FLAG != 0;
            if should_be_last != flagged {
                let fixed = if should_be_last {
                    header[0] | LAST_BLOCK_FLAG
                } else {
                    header[0] & !LAST_BLOCK_FLAG
                };
                file.seek(SeekFrom::Start(pos))?;
                file.write_all(&[fixed])?;
            }
            pos = block_end;
        }
        Ok(())
    }
}

impl Default for FlacCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Codes of blocks surfaced read-only; never serialized back
fn is_opaque_code(code: &str) -> bool {
    code == "CUESHEET" || code.starts_with("APPLICATION.")
}

impl MetadataCodec for FlacCodec {
    fn format_name(&self) -> &'static str {
        "FLAC"
    }

    fn supported_tag_kinds(&self) -> &'static [TagKind] {
        &[TagKind::Native]
    }

    fn read(&mut self, file: &mut File, params: &mut ReadParams) -> Result<ReadOutcome> {
        self.helper.clear();
        self.picture_zone_count = 0;
        self.has_vorbis_block = false;
        self.has_padding = false;

        self.file_len = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if magic != FLAC_MAGIC {
            return Err(Error::malformed("FLAC", "missing fLaC magic"));
        }

        let mut tag = TagData::new();
        let mut parse_error = false;
        let mut pos = 4u64;
        let mut streaminfo_seen = false;

        loop {
            let mut header = [0u8; 4];
            file.seek(SeekFrom::Start(pos))?;
            file.read_exact(&mut header)?;
            let is_last = header[0] & LAST_BLOCK_FLAG != 0;
            let block_type = header[0] & !LAST_BLOCK_FLAG;
            let body_len =
                ((header[1] as u64) << 16) | ((header[2] as u64) << 8) | (header[3] as u64);
            let block_end = pos + 4 + body_len;
            if block_end > self.file_len {
                return Err(Error::malformed(
                    "FLAC",
                    format!("metadata block at {} runs past end of file", pos),
                ));
            }

            let mut body = vec![0u8; body_len as usize];
            file.read_exact(&mut body)?;

            match block_type {
                BLOCK_STREAMINFO => {
                    self.parse_stream_info(&body)?;
                    streaminfo_seen = true;
                }
                BLOCK_VORBIS_COMMENT => {
                    self.has_vorbis_block = true;
                    if params.prepare_for_write {
                        self.helper.add_zone(ZONE_VORBIS, pos, 4 + body_len);
                    }
                    if let Err(e) =
                        vorbis::parse(&body, false, ZONE_VORBIS, &mut tag, &mut params.picture_sink)
                    {
                        warn!("FLAC vorbis comment failed to decode: {}", e);
                        parse_error = true;
                    }
                }
                BLOCK_PICTURE => {
                    let zone = format!("picture.{}", self.picture_zone_count);
                    if params.prepare_for_write {
                        self.helper.add_zone(zone, pos, 4 + body_len);
                    }
                    self.picture_zone_count += 1;
                    match flac_picture::parse(&body) {
                        Ok(picture) => {
                            if let Some(sink) = &mut params.picture_sink {
                                sink(&picture.data, picture.pic_type, picture.native_code);
                            }
                            tag.push_picture(picture);
                        }
                        Err(e) => {
                            warn!("FLAC picture block failed to decode: {}", e);
                            parse_error = true;
                        }
                    }
                }
                BLOCK_PADDING => {
                    self.has_padding = true;
                    if params.prepare_for_write {
                        self.helper.add_zone(ZONE_PADDING, pos, 4 + body_len);
                    }
                    debug!("FLAC padding block of {} bytes at {}", body_len, pos);
                }
                BLOCK_CUESHEET => {
                    if params.include_all_meta {
                        let mut field =
                            AdditionalField::binary(TagKind::Native, "CUESHEET", body.clone());
                        field.zone = "cuesheet".to_string();
                        tag.push_additional(field);
                    }
                }
                BLOCK_APPLICATION => {
                    if params.include_all_meta && body.len() >= 4 {
                        let app_id =
                            u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
                        let mut field = AdditionalField::binary(
                            TagKind::Native,
                            format!("APPLICATION.{:08X}", app_id),
                            body.clone(),
                        );
                        field.zone = "application".to_string();
                        tag.push_additional(field);
                    }
                }
                _ => {}
            }

            pos = block_end;
            if is_last {
                break;
            }
        }

        if !streaminfo_seen {
            return Err(Error::malformed("FLAC", "no STREAMINFO block"));
        }
        self.audio_offset = pos;

        if params.prepare_for_write {
            if !self.has_vorbis_block {
                self.helper.add_zone(ZONE_VORBIS, self.audio_offset, 0);
            }
            if self.picture_zone_count == 0 {
                self.helper.add_zone("picture.0", self.audio_offset, 0);
            }
        }

        let exists = self.has_vorbis_block || self.picture_zone_count > 0;
        Ok(ReadOutcome {
            properties: self.properties(),
            tags: vec![TagSnapshot {
                kind: TagKind::Native,
                exists,
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
        settings: &Settings,
    ) -> Result<()> {
        if kind != TagKind::Native {
            return Err(Error::invalid_argument(
                "FLAC carries only its native tag system",
            ));
        }
        if !self.helper.has_zones() {
            return Err(Error::invalid_argument(
                "write requires a prepare-for-writing read",
            ));
        }

        let vorbis_bytes = Self::vorbis_block(tag)?;
        let picture_bytes = Self::picture_blocks(tag)?;

        let mut outputs = Vec::new();
        let mut resized_delta: i64 = 0;
        for zone in self.helper.zones() {
            let new_bytes = match zone.name.as_str() {
                ZONE_VORBIS => Some(vorbis_bytes.clone()),
                "picture.0" => Some(picture_bytes.clone()),
                name if name.starts_with("picture.") => Some(Vec::new()),
                _ => None,
            };
            if let Some(bytes) = new_bytes {
                resized_delta += bytes.len() as i64 - zone.size as i64;
                outputs.push(ZoneOutput::new(zone.name.clone(), bytes));
            }
        }

        // Let the padding block absorb the size change when allowed
        if self.has_padding && settings.enable_padding {
            if let Some(padding) = self.helper.zone(ZONE_PADDING) {
                let new_total = (padding.size as i64 - resized_delta).max(4) as u64;
                if new_total != padding.size {
                    let body = vec![0u8; new_total as usize - 4];
                    outputs.push(ZoneOutput::new(
                        ZONE_PADDING,
                        Self::block_bytes(BLOCK_PADDING, &body)?,
                    ));
                }
            }
        }

        let old_zone_total: u64 = self.helper.zones().iter().map(|z| z.size).sum();
        self.helper.commit(file, outputs)?;
        let new_zone_total: u64 = self.helper.zones().iter().map(|z| z.size).sum();

        // Every zone precedes the audio frames, so the audio offset moves
        // by exactly the total zone delta
        self.audio_offset =
            (self.audio_offset as i64 + new_zone_total as i64 - old_zone_total as i64) as u64;
        self.fix_last_block_flags(file, self.audio_offset)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_info_unpacking() {
        // 44.1 kHz, 2 channels, 16 bits, 441000 samples
        let mut body = vec![0u8; 34];
        body[10] = 0x0A;
        body[11] = 0xC4;
        body[12] = 0x42;
        body[13] = 0xF0;
        body[14..18].copy_from_slice(&441_000u32.to_be_bytes());

        let mut codec = FlacCodec::new();
        codec.parse_stream_info(&body).unwrap();
        assert_eq!(codec.sample_rate, 44_100);
        assert_eq!(codec.channels, 2);
        assert_eq!(codec.bits_per_sample, 16);
        assert_eq!(codec.total_samples, 441_000);
    }

    #[test]
    fn test_block_bytes_header() {
        let block = FlacCodec::block_bytes(BLOCK_PADDING, &[0u8; 10]).unwrap();
        assert_eq!(block[0], BLOCK_PADDING);
        assert_eq!(&block[1..4], &[0, 0, 10]);
        assert_eq!(block.len(), 14);
    }

    #[test]
    fn test_oversized_block_rejected() {
        let body = vec![0u8; MAX_BLOCK_BODY + 1];
        assert!(matches!(
            FlacCodec::block_bytes(BLOCK_PICTURE, &body),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_vorbis_block_empty_when_nothing_kept() {
        let tag = TagData::new();
        assert!(FlacCodec::vorbis_block(&tag).unwrap().is_empty());

        let mut tag = TagData::new();
        let mut opaque = AdditionalField::binary(TagKind::Native, "CUESHEET", vec![1, 2]);
        opaque.zone = "cuesheet".to_string();
        tag.push_additional(opaque);
        assert!(FlacCodec::vorbis_block(&tag).unwrap().is_empty());

        tag.set(crate::tag::TagField::Title, "T");
        assert!(!FlacCodec::vorbis_block(&tag).unwrap().is_empty());
    }
}
