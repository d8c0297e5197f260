//! File structure bookkeeping for in-place tag rewrites
//!
//! While reading in prepare-for-writing mode a codec registers the byte
//! ranges it owns ("zones") plus any fixed-position fields whose encoded
//! value depends on a zone's size or offset ("anchors": block-length
//! prefixes, enclosing chunk sizes). The commit driver then serializes the
//! zones back, splices the file where sizes changed, and fixes every
//! registered anchor, so codecs never reason about byte shifting themselves.

use crate::error::{Error, Result};
use crate::util::{bytes as byte_codec, lengthen, shorten};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

/// A named contiguous byte range owned by a codec for one read/write cycle
#[derive(Debug, Clone)]
pub struct Zone {
    pub name: String,
    pub offset: u64,
    pub size: u64,
    /// Written in place of the zone when it shrinks to nothing, so the
    /// container stays structurally valid
    pub signature: Vec<u8>,
    /// Codec-private byte (FLAC keeps the block header byte here)
    pub flag: u8,
}

/// What an anchor's encoded value tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorKind {
    /// Size of the subject zone
    Size,
    /// Absolute offset of the subject zone
    Offset,
}

/// Binary encoding of an anchor value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorCodec {
    U16Le,
    U24Be,
    U32Le,
    U32Be,
    SyncSafeU32,
}

impl AnchorCodec {
    fn encoded_len(self) -> usize {
        match self {
            AnchorCodec::U16Le => 2,
            AnchorCodec::U24Be => 3,
            AnchorCodec::U32Le | AnchorCodec::U32Be | AnchorCodec::SyncSafeU32 => 4,
        }
    }

    fn encode(self, value: u64) -> Vec<u8> {
        match self {
            AnchorCodec::U16Le => (value as u16).to_le_bytes().to_vec(),
            AnchorCodec::U24Be => byte_codec::u24_be_bytes(value as u32).to_vec(),
            AnchorCodec::U32Le => (value as u32).to_le_bytes().to_vec(),
            AnchorCodec::U32Be => (value as u32).to_be_bytes().to_vec(),
            AnchorCodec::SyncSafeU32 => byte_codec::encode_synchsafe(value as u32).to_vec(),
        }
    }
}

/// A fixed-position field whose bytes must be rewritten when its subject
/// zone is resized or moved
#[derive(Debug, Clone)]
pub struct Anchor {
    pub position: u64,
    /// Name of the zone whose size/offset this anchor encodes
    pub subject: String,
    pub kind: AnchorKind,
    pub codec: AnchorCodec,
    /// Constant added to the tracked quantity before encoding (e.g. header
    /// bytes an on-disk size field includes)
    pub base: i64,
}

/// New content for one zone, produced by a codec before commit
#[derive(Debug)]
pub struct ZoneOutput {
    pub name: String,
    /// `None` leaves the zone's bytes untouched (size unchanged)
    pub bytes: Option<Vec<u8>>,
}

impl ZoneOutput {
    pub fn new<N: Into<String>>(name: N, bytes: Vec<u8>) -> Self {
        ZoneOutput {
            name: name.into(),
            bytes: Some(bytes),
        }
    }

    pub fn unchanged<N: Into<String>>(name: N) -> Self {
        ZoneOutput {
            name: name.into(),
            bytes: None,
        }
    }
}

/// Registered zones and anchors for one file
#[derive(Debug, Default)]
pub struct StructureHelper {
    zones: Vec<Zone>,
    anchors: Vec<Anchor>,
}

impl StructureHelper {
    pub fn new() -> Self {
        StructureHelper::default()
    }

    /// Register a zone. Zones registered at the same offset keep their
    /// registration order.
    pub fn add_zone<N: Into<String>>(&mut self, name: N, offset: u64, size: u64) -> &mut Zone {
        self.zones.push(Zone {
            name: name.into(),
            offset,
            size,
            signature: Vec::new(),
            flag: 0,
        });
        self.zones.last_mut().expect("zone just pushed")
    }

    /// Register an anchor tracking `subject`'s size or offset
    pub fn add_anchor<S: Into<String>>(
        &mut self,
        position: u64,
        subject: S,
        kind: AnchorKind,
        codec: AnchorCodec,
        base: i64,
    ) {
        self.anchors.push(Anchor {
            position,
            subject: subject.into(),
            kind,
            codec,
            base,
        });
    }

    pub fn zone(&self, name: &str) -> Option<&Zone> {
        self.zones.iter().find(|z| z.name == name)
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn has_zones(&self) -> bool {
        !self.zones.is_empty()
    }

    pub fn clear(&mut self) {
        self.zones.clear();
        self.anchors.clear();
    }

    /// Rewrite every zone with its new content, splicing the file where
    /// sizes changed and fixing all registered anchors.
    ///
    /// Physically contiguous zones are rewritten as one region, so a grow
    /// in one zone absorbed by an equal shrink in an adjacent zone (FLAC
    /// padding) moves no bytes outside the region. Runs are processed in
    /// ascending offset order; each splice happens at a region's end
    /// boundary, so earlier shifts never invalidate later offsets.
    ///
    /// On return the zone table reflects the new layout.
    pub fn commit(&mut self, file: &mut File, outputs: Vec<ZoneOutput>) -> Result<()> {
        let mut planned: HashMap<String, Option<Vec<u8>>> = HashMap::new();
        for output in outputs {
            planned.insert(output.name, output.bytes);
        }

        self.zones.sort_by_key(|z| z.offset);

        let mut shift: i64 = 0;
        let mut index = 0;
        while index < self.zones.len() {
            // Collect the run of physically contiguous zones starting here
            let mut end = index + 1;
            while end < self.zones.len()
                && self.zones[end - 1].offset + self.zones[end - 1].size == self.zones[end].offset
            {
                end += 1;
            }

            let region_start_old = self.zones[index].offset;
            let old_len: u64 = self.zones[index..end].iter().map(|z| z.size).sum();
            let region_start = (region_start_old as i64 + shift) as u64;

            // Assemble the region's new content, pulling unchanged zones'
            // bytes from their current (already shifted) location
            let mut region = Vec::new();
            let mut new_sizes = Vec::with_capacity(end - index);
            let mut run_changed = false;
            let mut read_cursor = region_start;
            for zone in &self.zones[index..end] {
                let bytes = match planned.get(&zone.name) {
                    Some(Some(bytes)) if bytes.is_empty() && !zone.signature.is_empty() => {
                        run_changed = true;
                        zone.signature.clone()
                    }
                    Some(Some(bytes)) => {
                        run_changed = run_changed || zone.size != bytes.len() as u64;
                        bytes.clone()
                    }
                    _ => {
                        let mut buf = vec![0u8; zone.size as usize];
                        file.seek(SeekFrom::Start(read_cursor))?;
                        file.read_exact(&mut buf)?;
                        buf
                    }
                };
                // The original content of changed zones differs even when
                // sizes match, so any planned zone marks the run dirty
                run_changed = run_changed || planned.contains_key(&zone.name);
                read_cursor += zone.size;
                new_sizes.push(bytes.len() as u64);
                region.extend_from_slice(&bytes);
            }

            let new_len = region.len() as u64;
            let delta = new_len as i64 - old_len as i64;

            if run_changed {
                if delta > 0 {
                    lengthen(file, region_start + old_len, delta as u64)?;
                }
                file.seek(SeekFrom::Start(region_start))?;
                file.write_all(&region)?;
                if delta < 0 {
                    shorten(file, region_start + new_len, (-delta) as u64)?;
                }
            }

            // Record the new layout
            let mut cursor = region_start;
            for (zone, new_size) in self.zones[index..end].iter_mut().zip(&new_sizes) {
                zone.offset = cursor;
                zone.size = *new_size;
                cursor += new_size;
            }

            // Anchors behind the splice point move with the suffix
            if delta != 0 {
                let splice_origin = region_start + old_len.min(new_len);
                for anchor in &mut self.anchors {
                    if anchor.position >= splice_origin {
                        anchor.position = (anchor.position as i64 + delta) as u64;
                    }
                }
            }

            shift += delta;
            index = end;
        }

        self.rewrite_anchors(file)
    }

    fn rewrite_anchors(&self, file: &mut File) -> Result<()> {
        for anchor in &self.anchors {
            let zone = self.zone(&anchor.subject).ok_or_else(|| {
                Error::malformed(
                    "zone table",
                    format!("anchor references unknown zone '{}'", anchor.subject),
                )
            })?;
            let tracked = match anchor.kind {
                AnchorKind::Size => zone.size as i64,
                AnchorKind::Offset => zone.offset as i64,
            };
            let value = tracked + anchor.base;
            if value < 0 {
                return Err(Error::malformed(
                    "zone table",
                    format!("anchor for '{}' underflows: {}", anchor.subject, value),
                ));
            }
            let encoded = anchor.codec.encode(value as u64);
            debug_assert_eq!(encoded.len(), anchor.codec.encoded_len());
            file.seek(SeekFrom::Start(anchor.position))?;
            file.write_all(&encoded)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn temp_file_with(content: &[u8]) -> File {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(content).unwrap();
        file
    }

    fn read_all(file: &mut File) -> Vec<u8> {
        let mut out = Vec::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_grow_zone_shifts_suffix() {
        // layout: 4-byte header | 4-byte tag zone | audio
        let mut file = temp_file_with(b"HDR0TAG1audio");
        let mut helper = StructureHelper::new();
        helper.add_zone("tag", 4, 4);

        helper
            .commit(&mut file, vec![ZoneOutput::new("tag", b"LONGTAG".to_vec())])
            .unwrap();

        assert_eq!(read_all(&mut file), b"HDR0LONGTAGaudio");
        assert_eq!(helper.zone("tag").unwrap().size, 7);
    }

    #[test]
    fn test_shrink_to_nothing_writes_signature() {
        let mut file = temp_file_with(b"HDR0TAG1audio");
        let mut helper = StructureHelper::new();
        helper.add_zone("tag", 4, 4).signature = b"T".to_vec();

        helper
            .commit(&mut file, vec![ZoneOutput::new("tag", Vec::new())])
            .unwrap();

        assert_eq!(read_all(&mut file), b"HDR0Taudio");
    }

    #[test]
    fn test_size_anchor_rewritten() {
        // RIFF-like layout: magic | u32le size of the zone | zone | audio
        let mut content = b"MAGC".to_vec();
        content.extend_from_slice(&4u32.to_le_bytes());
        content.extend_from_slice(b"BODY");
        content.extend_from_slice(b"audio");
        let mut file = temp_file_with(&content);

        let mut helper = StructureHelper::new();
        helper.add_zone("chunk", 8, 4);
        helper.add_anchor(4, "chunk", AnchorKind::Size, AnchorCodec::U32Le, 0);

        helper
            .commit(
                &mut file,
                vec![ZoneOutput::new("chunk", b"LONGERBODY".to_vec())],
            )
            .unwrap();

        let result = read_all(&mut file);
        assert_eq!(&result[..4], b"MAGC");
        assert_eq!(u32::from_le_bytes(result[4..8].try_into().unwrap()), 10);
        assert_eq!(&result[8..18], b"LONGERBODY");
        assert_eq!(&result[18..], b"audio");
    }

    #[test]
    fn test_offset_anchor_tracks_shifted_zone() {
        // zone A | pointer to zone B (u32be) | zone B
        let mut content = b"AA".to_vec();
        content.extend_from_slice(&6u32.to_be_bytes());
        content.extend_from_slice(b"BBBB");
        let mut file = temp_file_with(&content);

        let mut helper = StructureHelper::new();
        helper.add_zone("a", 0, 2);
        helper.add_zone("b", 6, 4);
        helper.add_anchor(2, "b", AnchorKind::Offset, AnchorCodec::U32Be, 0);

        helper
            .commit(
                &mut file,
                vec![
                    ZoneOutput::new("a", b"AAAA".to_vec()),
                    ZoneOutput::unchanged("b"),
                ],
            )
            .unwrap();

        let result = read_all(&mut file);
        assert_eq!(&result[..4], b"AAAA");
        assert_eq!(u32::from_be_bytes(result[4..8].try_into().unwrap()), 8);
        assert_eq!(&result[8..], b"BBBB");
    }

    #[test]
    fn test_contiguous_zones_absorb_in_place() {
        // tag zone directly followed by a padding zone; tag grows by 2,
        // padding shrinks by 2: the audio suffix must not move
        let mut file = temp_file_with(b"TAG.....audio");
        let mut helper = StructureHelper::new();
        helper.add_zone("tag", 0, 3);
        helper.add_zone("padding", 3, 5);

        helper
            .commit(
                &mut file,
                vec![
                    ZoneOutput::new("tag", b"TAGXX".to_vec()),
                    ZoneOutput::new("padding", b"...".to_vec()),
                ],
            )
            .unwrap();

        let result = read_all(&mut file);
        assert_eq!(result, b"TAGXX...audio");
        assert_eq!(helper.zone("padding").unwrap().offset, 5);
    }

    #[test]
    fn test_empty_zone_grows_from_insertion_point() {
        let mut file = temp_file_with(b"HDRaudio");
        let mut helper = StructureHelper::new();
        helper.add_zone("tag", 3, 0);

        helper
            .commit(&mut file, vec![ZoneOutput::new("tag", b"NEWTAG".to_vec())])
            .unwrap();

        assert_eq!(read_all(&mut file), b"HDRNEWTAGaudio");
    }

    #[test]
    fn test_two_disjoint_zones_shift_in_order() {
        // zone1 | gap | zone2: resizing zone1 must shift zone2's offset
        // before zone2 is rewritten
        let mut file = temp_file_with(b"1111gap2222tail");
        let mut helper = StructureHelper::new();
        helper.add_zone("one", 0, 4);
        helper.add_zone("two", 7, 4);

        helper
            .commit(
                &mut file,
                vec![
                    ZoneOutput::new("one", b"11".to_vec()),
                    ZoneOutput::new("two", b"222222".to_vec()),
                ],
            )
            .unwrap();

        assert_eq!(read_all(&mut file), b"11gap222222tail");
        assert_eq!(helper.zone("two").unwrap().offset, 5);
        assert_eq!(helper.zone("two").unwrap().size, 6);
    }
}
