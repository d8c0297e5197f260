//! Ogg container codec (Vorbis audio)
//!
//! The comment packet (`0x03 vorbis`) lives in the header pages together
//! with the setup packet. Rewriting re-pages both packets from the original
//! page offset with the original serial number, recomputing lacing, CRCs
//! and sequence numbers; when the page count changes, every following page
//! is renumbered and re-CRC'd in place.

use crate::error::{Error, Result};
use crate::format::{
    vorbis, AudioProperties, MetadataCodec, ReadOutcome, ReadParams, TagSnapshot,
};
use crate::tag::structure::{StructureHelper, ZoneOutput};
use crate::tag::{TagData, TagKind};
use crate::Settings;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::{debug, warn};

const OGG_MAGIC: &[u8] = b"OggS";
const ZONE_COMMENT: &str = "comment_setup";

/// Granule value of a page that completes no packet
const GRANULE_NONE: u64 = u64::MAX;

/// CRC32 table for Ogg pages (polynomial 0x04C11DB7, no reflection)
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut j = 0;
        while j < 8 {
            if crc & 0x8000_0000 != 0 {
                crc = (crc << 1) ^ 0x04C1_1DB7;
            } else {
                crc <<= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Ogg page CRC: init 0, no reflection, no final xor
fn page_crc(data: &[u8]) -> u32 {
    let mut crc = 0u32;
    for &byte in data {
        let idx = ((crc >> 24) ^ (byte as u32)) & 0xFF;
        crc = (crc << 8) ^ CRC32_TABLE[idx as usize];
    }
    crc
}

/// Parsed Ogg page header
#[derive(Debug, Clone)]
struct PageHeader {
    header_type: u8,
    granule: u64,
    serial: u32,
    sequence: u32,
    lacing: Vec<u8>,
}

impl PageHeader {
    /// Parse a page header at the current position
    fn read(file: &mut File) -> Result<Self> {
        let mut fixed = [0u8; 27];
        file.read_exact(&mut fixed)?;
        if &fixed[0..4] != OGG_MAGIC {
            return Err(Error::malformed("Ogg page", "missing OggS capture pattern"));
        }
        if fixed[4] != 0 {
            return Err(Error::unsupported(format!(
                "Ogg stream structure version {}",
                fixed[4]
            )));
        }
        let mut lacing = vec![0u8; fixed[26] as usize];
        file.read_exact(&mut lacing)?;
        Ok(PageHeader {
            header_type: fixed[5],
            granule: u64::from_le_bytes(fixed[6..14].try_into().expect("8 bytes")),
            serial: u32::from_le_bytes(fixed[14..18].try_into().expect("4 bytes")),
            sequence: u32::from_le_bytes(fixed[18..22].try_into().expect("4 bytes")),
            lacing,
        })
    }

    fn header_len(&self) -> u64 {
        27 + self.lacing.len() as u64
    }

    fn payload_len(&self) -> u64 {
        self.lacing.iter().map(|&l| l as u64).sum()
    }

    fn page_len(&self) -> u64 {
        self.header_len() + self.payload_len()
    }
}

/// Assemble a full page with its CRC computed
fn build_page(
    header_type: u8,
    granule: u64,
    serial: u32,
    sequence: u32,
    lacing: &[u8],
    payload: &[u8],
) -> Vec<u8> {
    let mut page = Vec::with_capacity(27 + lacing.len() + payload.len());
    page.extend_from_slice(OGG_MAGIC);
    page.push(0);
    page.push(header_type);
    page.extend_from_slice(&granule.to_le_bytes());
    page.extend_from_slice(&serial.to_le_bytes());
    page.extend_from_slice(&sequence.to_le_bytes());
    page.extend_from_slice(&0u32.to_le_bytes());
    page.push(lacing.len() as u8);
    page.extend_from_slice(lacing);
    page.extend_from_slice(payload);
    let crc = page_crc(&page);
    page[22..26].copy_from_slice(&crc.to_le_bytes());
    page
}

/// Lacing values for one packet: 255-runs closed by a sub-255 value
fn lacing_for(len: usize) -> Vec<u8> {
    let mut lacing = vec![255u8; len / 255];
    lacing.push((len % 255) as u8);
    lacing
}

/// Ogg Vorbis metadata codec
pub struct OggCodec {
    helper: StructureHelper,
    serial: u32,
    first_zone_sequence: u32,
    zone_page_count: usize,
    /// The comment packet fit inside a single page
    one_pager: bool,
    setup_packet: Vec<u8>,
    sample_rate: u32,
    channels: u16,
    bitrate_nominal: i32,
    file_len: u64,
    audio_offset: u64,
    last_granule: u64,
}

impl OggCodec {
    pub fn new() -> Self {
        OggCodec {
            helper: StructureHelper::new(),
            serial: 0,
            first_zone_sequence: 0,
            zone_page_count: 0,
            one_pager: true,
            setup_packet: Vec::new(),
            sample_rate: 0,
            channels: 0,
            bitrate_nominal: 0,
            file_len: 0,
            audio_offset: 0,
            last_granule: 0,
        }
    }

    fn parse_identification(&mut self, packet: &[u8]) -> Result<()> {
        if packet.len() < 30 || packet[0] != 0x01 || &packet[1..7] != b"vorbis" {
            return Err(Error::unsupported(
                "first Ogg packet is not a Vorbis identification header",
            ));
        }
        self.channels = packet[11] as u16;
        self.sample_rate = u32::from_le_bytes(packet[12..16].try_into().expect("4 bytes"));
        self.bitrate_nominal = i32::from_le_bytes(packet[20..24].try_into().expect("4 bytes"));
        Ok(())
    }

    /// Walk the audio pages to find the final granule position
    fn scan_duration(&mut self, file: &mut File, mut pos: u64) -> Result<()> {
        while pos < self.file_len {
            file.seek(SeekFrom::Start(pos))?;
            let header = PageHeader::read(file)?;
            if header.granule != GRANULE_NONE {
                self.last_granule = header.granule;
            }
            pos += header.page_len();
        }
        Ok(())
    }

    fn properties(&self) -> AudioProperties {
        let duration_s = if self.sample_rate > 0 {
            self.last_granule as f64 / self.sample_rate as f64
        } else {
            0.0
        };
        let bitrate_kbps = if self.bitrate_nominal > 0 {
            (self.bitrate_nominal / 1000) as u32
        } else if duration_s > 0.0 {
            ((self.file_len - self.audio_offset) as f64 * 8.0 / duration_s / 1000.0) as u32
        } else {
            0
        };
        AudioProperties {
            format_name: "Ogg Vorbis",
            duration_s,
            bitrate_kbps,
            sample_rate: self.sample_rate,
            channels: self.channels,
            bits_per_sample: 0,
        }
    }

    /// Re-page the comment and setup packets into zone bytes
    fn build_zone_pages(&self, comment_packet: &[u8]) -> (Vec<u8>, usize) {
        // Segment both packets, tracking where packets end
        let mut pages: Vec<(Vec<u8>, Vec<u8>, bool, bool)> = Vec::new();
        let mut lacing = Vec::new();
        let mut payload = Vec::new();
        let mut continued = false;
        let mut ends_packet = false;
        let mut mid_packet = false;

        for packet in [comment_packet, self.setup_packet.as_slice()] {
            let mut offset = 0;
            let packet_lacing = lacing_for(packet.len());
            let last_index = packet_lacing.len() - 1;
            for (i, &lace) in packet_lacing.iter().enumerate() {
                if lacing.len() == 255 {
                    pages.push((
                        std::mem::take(&mut lacing),
                        std::mem::take(&mut payload),
                        continued,
                        ends_packet,
                    ));
                    continued = mid_packet;
                    ends_packet = false;
                }
                lacing.push(lace);
                payload.extend_from_slice(&packet[offset..offset + lace as usize]);
                offset += lace as usize;
                mid_packet = i < last_index;
                if i == last_index {
                    ends_packet = true;
                }
            }
        }
        pages.push((lacing, payload, continued, ends_packet));

        let first_header_type = self
            .helper
            .zone(ZONE_COMMENT)
            .map(|zone| zone.flag)
            .unwrap_or(0);
        let page_count = pages.len();
        let mut out = Vec::new();
        for (index, (lacing, payload, continued, ends_packet)) in pages.into_iter().enumerate() {
            let header_type = if index == 0 {
                first_header_type
            } else if continued {
                0x01
            } else {
                0x00
            };
            let granule = if ends_packet { 0 } else { GRANULE_NONE };
            out.extend_from_slice(&build_page(
                header_type,
                granule,
                self.serial,
                self.first_zone_sequence + index as u32,
                &lacing,
                &payload,
            ));
        }
        (out, page_count)
    }

    /// Rewrite sequence numbers (and CRCs) of every page after the zone
    fn renumber_following_pages(&self, file: &mut File, mut pos: u64, mut next: u32) -> Result<()> {
        while pos < self.file_len {
            file.seek(SeekFrom::Start(pos))?;
            let header = PageHeader::read(file)?;
            let page_len = header.page_len();

            let mut page = vec![0u8; page_len as usize];
            file.seek(SeekFrom::Start(pos))?;
            file.read_exact(&mut page)?;
            page[18..22].copy_from_slice(&next.to_le_bytes());
            page[22..26].copy_from_slice(&0u32.to_le_bytes());
            let crc = page_crc(&page);
            page[22..26].copy_from_slice(&crc.to_le_bytes());

            file.seek(SeekFrom::Start(pos))?;
            file.write_all(&page[..27 + page[26] as usize])?;

            pos += page_len;
            next += 1;
        }
        Ok(())
    }
}

impl Default for OggCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataCodec for OggCodec {
    fn format_name(&self) -> &'static str {
        "Ogg Vorbis"
    }

    fn supported_tag_kinds(&self) -> &'static [TagKind] {
        &[TagKind::Native]
    }

    fn read(&mut self, file: &mut File, params: &mut ReadParams) -> Result<ReadOutcome> {
        self.helper.clear();
        self.file_len = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;

        // First page carries the identification packet alone
        let first = PageHeader::read(file)?;
        self.serial = first.serial;
        let mut ident = vec![0u8; first.payload_len() as usize];
        file.read_exact(&mut ident)?;
        self.parse_identification(&ident)?;

        // Reassemble the comment and setup packets from the header pages
        let zone_start = first.page_len();
        let mut pos = zone_start;
        let mut packets: Vec<Vec<u8>> = Vec::new();
        let mut current: Vec<u8> = Vec::new();
        let mut comment_page_count = 0usize;
        let mut zone_page_count = 0usize;
        let mut first_zone_header_type = 0u8;

        'pages: while pos < self.file_len {
            file.seek(SeekFrom::Start(pos))?;
            let header = PageHeader::read(file)?;
            let mut payload = vec![0u8; header.payload_len() as usize];
            file.read_exact(&mut payload)?;
            if zone_page_count == 0 {
                first_zone_header_type = header.header_type;
            }
            zone_page_count += 1;
            if packets.is_empty() {
                comment_page_count += 1;
            }

            let mut offset = 0;
            for (i, &lace) in header.lacing.iter().enumerate() {
                current.extend_from_slice(&payload[offset..offset + lace as usize]);
                offset += lace as usize;
                if lace < 255 {
                    packets.push(std::mem::take(&mut current));
                    if packets.len() == 2 {
                        if i + 1 != header.lacing.len() {
                            return Err(Error::malformed(
                                "Ogg",
                                "audio packet shares a page with the setup header",
                            ));
                        }
                        pos += header.page_len();
                        break 'pages;
                    }
                }
            }
            pos += header.page_len();
        }

        if packets.len() != 2 {
            return Err(Error::malformed(
                "Ogg",
                "comment and setup packets not found in header pages",
            ));
        }
        self.first_zone_sequence = first.sequence + 1;
        self.zone_page_count = zone_page_count;
        self.one_pager = comment_page_count == 1;
        self.audio_offset = pos;
        debug!(
            "Ogg comment packet spans {} page(s), zone of {} page(s)",
            comment_page_count, zone_page_count
        );

        let comment_packet = &packets[0];
        let mut tag = TagData::new();
        let mut parse_error = false;
        if comment_packet.len() < 7
            || comment_packet[0] != 0x03
            || &comment_packet[1..7] != b"vorbis"
        {
            return Err(Error::unsupported(
                "second Ogg packet is not a Vorbis comment header",
            ));
        }
        if let Err(e) = vorbis::parse(
            &comment_packet[7..],
            true,
            ZONE_COMMENT,
            &mut tag,
            &mut params.picture_sink,
        ) {
            warn!("Ogg vorbis comment failed to decode: {}", e);
            parse_error = true;
        }

        let setup_packet = &packets[1];
        if setup_packet.is_empty() || setup_packet[0] != 0x05 {
            return Err(Error::unsupported(
                "third Ogg packet is not a Vorbis setup header",
            ));
        }
        self.setup_packet = setup_packet.clone();

        if params.prepare_for_write {
            let zone = self
                .helper
                .add_zone(ZONE_COMMENT, zone_start, pos - zone_start);
            // Keep the original header-type byte for the rebuilt first page
            zone.flag = first_zone_header_type;
        }

        self.scan_duration(file, pos)?;

        Ok(ReadOutcome {
            properties: self.properties(),
            tags: vec![TagSnapshot {
                kind: TagKind::Native,
                exists: true,
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
                "Ogg Vorbis carries only its native tag system",
            ));
        }
        if !self.helper.has_zones() {
            return Err(Error::invalid_argument(
                "write requires a prepare-for-writing read",
            ));
        }

        let mut comment_packet = Vec::new();
        comment_packet.push(0x03);
        comment_packet.extend_from_slice(b"vorbis");
        comment_packet.extend_from_slice(&vorbis::serialize(tag, true, true));

        let (zone_bytes, page_count) = self.build_zone_pages(&comment_packet);
        debug!(
            "rebuilding comment zone: was one-pager={}, now {} page(s)",
            self.one_pager, page_count
        );
        let old_zone_size = self
            .helper
            .zone(ZONE_COMMENT)
            .ok_or_else(|| Error::invalid_argument("no comment zone recorded"))?
            .size;

        self.helper
            .commit(file, vec![ZoneOutput::new(ZONE_COMMENT, zone_bytes)])?;

        let zone = self
            .helper
            .zone(ZONE_COMMENT)
            .ok_or_else(|| Error::invalid_argument("no comment zone recorded"))?;
        let zone_end = zone.offset + zone.size;
        self.file_len = (self.file_len as i64 + zone.size as i64 - old_zone_size as i64) as u64;
        self.audio_offset = zone_end;

        if page_count != self.zone_page_count {
            self.renumber_following_pages(
                file,
                zone_end,
                self.first_zone_sequence + page_count as u32,
            )?;
            self.zone_page_count = page_count;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_crc_known_value() {
        // CRC of the zero-length input is the initializer
        assert_eq!(page_crc(&[]), 0);
        // One byte exercises a single table lookup
        assert_eq!(page_crc(&[0x01]), CRC32_TABLE[1]);
    }

    #[test]
    fn test_lacing_for_exact_multiple() {
        assert_eq!(lacing_for(0), vec![0]);
        assert_eq!(lacing_for(10), vec![10]);
        assert_eq!(lacing_for(255), vec![255, 0]);
        assert_eq!(lacing_for(300), vec![255, 45]);
    }

    #[test]
    fn test_build_page_crc_consistency() {
        let payload = b"payload";
        let page = build_page(0, 0, 0x1234, 1, &[7], payload);
        // Recomputing over the page with a zeroed CRC field reproduces the
        // stored CRC
        let mut copy = page.clone();
        copy[22..26].copy_from_slice(&[0; 4]);
        let expected = page_crc(&copy);
        assert_eq!(&page[22..26], &expected.to_le_bytes());
        assert_eq!(&page[..4], b"OggS");
        assert_eq!(page[26], 1);
    }

    #[test]
    fn test_zone_paging_small_packets() {
        let mut codec = OggCodec::new();
        codec.serial = 7;
        codec.first_zone_sequence = 1;
        codec.setup_packet = vec![0x05; 20];

        let comment = vec![0x03; 40];
        let (bytes, count) = codec.build_zone_pages(&comment);
        assert_eq!(count, 1);
        // One page: header 27 + 2 lacing values + 60 payload bytes
        assert_eq!(bytes.len(), 27 + 2 + 60);
        assert_eq!(bytes[26], 2);
        assert_eq!(&bytes[27..29], &[40, 20]);
    }

    #[test]
    fn test_zone_paging_spans_pages() {
        let mut codec = OggCodec::new();
        codec.serial = 7;
        codec.first_zone_sequence = 1;
        codec.setup_packet = vec![0x05; 10];

        // 255 * 300 bytes force more than 255 lacing values
        let comment = vec![0x03; 255 * 300];
        let (bytes, count) = codec.build_zone_pages(&comment);
        assert_eq!(count, 2);
        // Second page starts with a continued packet
        let first_page_len = 27 + 255 + 255 * 255;
        assert_eq!(&bytes[first_page_len..first_page_len + 4], b"OggS");
        assert_eq!(bytes[first_page_len + 5], 0x01);
    }
}
