//! MPEG audio host (MP3)
//!
//! MP3 files have no tag system of their own; they host an ID3v2 tag at the
//! start and ID3v1 / APEv2 trailers at the end. This codec owns no tag
//! bytes itself: it parses one MPEG frame header for the incidental audio
//! properties and delegates everything else to the three tag codecs.

use crate::error::{Error, Result};
use crate::format::{
    ape::ApeCodec, id3v1::Id3v1Codec, id3v2::Id3v2Codec, AudioProperties, MetadataCodec,
    ReadOutcome, ReadParams, TagSnapshot,
};
use crate::tag::{TagData, TagKind};
use crate::Settings;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use tracing::warn;

/// How far past the ID3v2 tag to look for the first frame sync
const SYNC_SCAN_WINDOW: usize = 8192;

const BITRATES_V1: [[u32; 15]; 3] = [
    // Layer I
    [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
    // Layer II
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
    // Layer III
    [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
];

const BITRATES_V2: [[u32; 15]; 3] = [
    // Layer I
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
    // Layers II and III share a table
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
];

const SAMPLE_RATES: [[u32; 3]; 3] = [
    [44_100, 48_000, 32_000], // MPEG 1
    [22_050, 24_000, 16_000], // MPEG 2
    [11_025, 12_000, 8_000],  // MPEG 2.5
];

/// Decoded MPEG audio frame header
#[derive(Debug, Clone, Copy)]
struct FrameHeader {
    bitrate_kbps: u32,
    sample_rate: u32,
    channels: u16,
}

impl FrameHeader {
    fn parse(bytes: [u8; 4]) -> Option<Self> {
        if bytes[0] != 0xFF || bytes[1] & 0xE0 != 0xE0 {
            return None;
        }
        let version_index = match (bytes[1] >> 3) & 0x03 {
            0b11 => 0, // MPEG 1
            0b10 => 1, // MPEG 2
            0b00 => 2, // MPEG 2.5
            _ => return None,
        };
        let layer_index = match (bytes[1] >> 1) & 0x03 {
            0b11 => 0, // Layer I
            0b10 => 1, // Layer II
            0b01 => 2, // Layer III
            _ => return None,
        };
        let bitrate_index = (bytes[2] >> 4) as usize;
        if bitrate_index == 0 || bitrate_index >= 15 {
            return None;
        }
        let rate_index = ((bytes[2] >> 2) & 0x03) as usize;
        if rate_index == 3 {
            return None;
        }
        let bitrate_kbps = if version_index == 0 {
            BITRATES_V1[layer_index][bitrate_index]
        } else {
            BITRATES_V2[layer_index][bitrate_index]
        };
        let channels = if (bytes[3] >> 6) & 0x03 == 0b11 { 1 } else { 2 };
        Some(FrameHeader {
            bitrate_kbps,
            sample_rate: SAMPLE_RATES[version_index][rate_index],
            channels,
        })
    }
}

/// MP3 file codec: audio properties plus three hosted tag systems
pub struct MpegCodec {
    id3v1: Id3v1Codec,
    id3v2: Id3v2Codec,
    ape: ApeCodec,
}

impl MpegCodec {
    pub fn new() -> Self {
        MpegCodec {
            id3v1: Id3v1Codec::new(),
            id3v2: Id3v2Codec::new(),
            ape: ApeCodec::new(),
        }
    }

    /// Find and decode the first audio frame header after the ID3v2 tag
    fn scan_frame_header(&self, file: &mut File, from: u64) -> Result<Option<(u64, FrameHeader)>> {
        let file_len = file.seek(SeekFrom::End(0))?;
        if from >= file_len {
            return Ok(None);
        }
        let window = SYNC_SCAN_WINDOW.min((file_len - from) as usize);
        let mut buf = vec![0u8; window];
        file.seek(SeekFrom::Start(from))?;
        file.read_exact(&mut buf)?;

        for i in 0..buf.len().saturating_sub(3) {
            if let Some(header) =
                FrameHeader::parse([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]])
            {
                return Ok(Some((from + i as u64, header)));
            }
        }
        Ok(None)
    }

    fn codec_for(&mut self, kind: TagKind) -> Result<&mut dyn MetadataCodec> {
        match kind {
            TagKind::Id3v1 => Ok(&mut self.id3v1),
            TagKind::Id3v2 => Ok(&mut self.id3v2),
            TagKind::Ape => Ok(&mut self.ape),
            TagKind::Native => Err(Error::invalid_argument(
                "MPEG audio has no native tag system",
            )),
        }
    }
}

impl Default for MpegCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataCodec for MpegCodec {
    fn format_name(&self) -> &'static str {
        "MPEG Audio"
    }

    fn supported_tag_kinds(&self) -> &'static [TagKind] {
        &[TagKind::Id3v1, TagKind::Id3v2, TagKind::Ape]
    }

    fn read(&mut self, file: &mut File, params: &mut ReadParams) -> Result<ReadOutcome> {
        let file_len = file.seek(SeekFrom::End(0))?;

        let mut tags: Vec<TagSnapshot> = Vec::new();
        let id3v2_outcome = self.id3v2.read(file, params)?;
        tags.extend(id3v2_outcome.tags);
        tags.extend(self.id3v1.read(file, params)?.tags);
        tags.extend(self.ape.read(file, params)?.tags);

        let mut properties = AudioProperties {
            format_name: "MPEG Audio",
            ..AudioProperties::default()
        };
        match self.scan_frame_header(file, self.id3v2.region_size())? {
            Some((audio_offset, header)) => {
                properties.bitrate_kbps = header.bitrate_kbps;
                properties.sample_rate = header.sample_rate;
                properties.channels = header.channels;
                if header.bitrate_kbps > 0 {
                    // Trailing tags are not audio payload
                    let mut audio_end = file_len;
                    if Id3v1Codec::is_present(file)? {
                        audio_end -= crate::format::id3v1::TAG_SIZE;
                    }
                    let audio_size = audio_end.saturating_sub(audio_offset);
                    properties.duration_s =
                        audio_size as f64 * 8.0 / (header.bitrate_kbps as f64 * 1000.0);
                }
            }
            None => warn!("no MPEG frame sync found; audio properties unavailable"),
        }

        Ok(ReadOutcome { properties, tags })
    }

    fn write_tag(
        &mut self,
        file: &mut File,
        tag: &TagData,
        kind: TagKind,
        settings: &Settings,
    ) -> Result<()> {
        self.codec_for(kind)?.write_tag(file, tag, kind, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_header_v1_layer3() {
        // 0xFF 0xFB: MPEG1 Layer III; 0x90 = 128 kbps, 44.1 kHz
        let header = FrameHeader::parse([0xFF, 0xFB, 0x90, 0x00]).unwrap();
        assert_eq!(header.bitrate_kbps, 128);
        assert_eq!(header.sample_rate, 44_100);
        assert_eq!(header.channels, 2);
    }

    #[test]
    fn test_frame_header_mono() {
        let header = FrameHeader::parse([0xFF, 0xFB, 0x90, 0xC0]).unwrap();
        assert_eq!(header.channels, 1);
    }

    #[test]
    fn test_frame_header_rejects_bad_sync() {
        assert!(FrameHeader::parse([0xFE, 0xFB, 0x90, 0x00]).is_none());
        assert!(FrameHeader::parse([0xFF, 0x1B, 0x90, 0x00]).is_none());
        // free-form bitrate index 0 and reserved sample rate index
        assert!(FrameHeader::parse([0xFF, 0xFB, 0x00, 0x00]).is_none());
        assert!(FrameHeader::parse([0xFF, 0xFB, 0x9C, 0x00]).is_none());
    }

    #[test]
    fn test_frame_header_v2() {
        // 0xFF 0xF3: MPEG2 Layer III; 0x90 index 9 = 80 kbps, 22.05 kHz
        let header = FrameHeader::parse([0xFF, 0xF3, 0x90, 0x00]).unwrap();
        assert_eq!(header.bitrate_kbps, 80);
        assert_eq!(header.sample_rate, 22_050);
    }
}
