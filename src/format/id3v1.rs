//! ID3v1 codec
//!
//! Fixed 128-byte trailer: `TAG` magic, three 30-byte latin-1 text fields,
//! 4-byte year, 30-byte comment and a genre index. ID3v1.1 steals the last
//! two comment bytes for a track number. Supported fields only; the format
//! has nowhere to put anything else.

use crate::error::{Error, Result};
use crate::format::{AudioProperties, MetadataCodec, ReadOutcome, ReadParams, TagSnapshot};
use crate::tag::structure::{StructureHelper, ZoneOutput};
use crate::tag::{TagData, TagField, TagKind};
use crate::util::text::{decode_latin1, encode_latin1};
use crate::Settings;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

pub(crate) const TAG_SIZE: u64 = 128;
const TAG_MAGIC: &[u8] = b"TAG";
const ZONE_ID3V1: &str = "id3v1";
const NO_GENRE: u8 = 255;

/// The standard ID3v1 genre list (indexes 0-147)
pub const GENRES: &[&str] = &[
    "Blues", "Classic Rock", "Country", "Dance", "Disco", "Funk", "Grunge", "Hip-Hop", "Jazz",
    "Metal", "New Age", "Oldies", "Other", "Pop", "R&B", "Rap", "Reggae", "Rock", "Techno",
    "Industrial", "Alternative", "Ska", "Death Metal", "Pranks", "Soundtrack", "Euro-Techno",
    "Ambient", "Trip-Hop", "Vocal", "Jazz+Funk", "Fusion", "Trance", "Classical", "Instrumental",
    "Acid", "House", "Game", "Sound Clip", "Gospel", "Noise", "AlternRock", "Bass", "Soul",
    "Punk", "Space", "Meditative", "Instrumental Pop", "Instrumental Rock", "Ethnic", "Gothic",
    "Darkwave", "Techno-Industrial", "Electronic", "Pop-Folk", "Eurodance", "Dream",
    "Southern Rock", "Comedy", "Cult", "Gangsta", "Top 40", "Christian Rap", "Pop/Funk", "Jungle",
    "Native American", "Cabaret", "New Wave", "Psychadelic", "Rave", "Showtunes", "Trailer",
    "Lo-Fi", "Tribal", "Acid Punk", "Acid Jazz", "Polka", "Retro", "Musical", "Rock & Roll",
    "Hard Rock", "Folk", "Folk-Rock", "National Folk", "Swing", "Fast Fusion", "Bebob", "Latin",
    "Revival", "Celtic", "Bluegrass", "Avantgarde", "Gothic Rock", "Progressive Rock",
    "Psychedelic Rock", "Symphonic Rock", "Slow Rock", "Big Band", "Chorus", "Easy Listening",
    "Acoustic", "Humour", "Speech", "Chanson", "Opera", "Chamber Music", "Sonata", "Symphony",
    "Booty Bass", "Primus", "Porn Groove", "Satire", "Slow Jam", "Club", "Tango", "Samba",
    "Folklore", "Ballad", "Power Ballad", "Rhythmic Soul", "Freestyle", "Duet", "Punk Rock",
    "Drum Solo", "A capella", "Euro-House", "Dance Hall", "Goa", "Drum & Bass", "Club-House",
    "Hardcore", "Terror", "Indie", "BritPop", "Negerpunk", "Polsk Punk", "Beat",
    "Christian Gangsta Rap", "Heavy Metal", "Black Metal", "Crossover", "Contemporary Christian",
    "Christian Rock", "Merengue", "Salsa", "Thrash Metal", "Anime", "JPop", "Synthpop",
];

/// ID3v1 trailer codec
pub struct Id3v1Codec {
    helper: StructureHelper,
}

impl Id3v1Codec {
    pub fn new() -> Self {
        Id3v1Codec {
            helper: StructureHelper::new(),
        }
    }

    /// True when the file carries an ID3v1 trailer
    pub fn is_present(file: &mut File) -> Result<bool> {
        let len = file.seek(SeekFrom::End(0))?;
        if len < TAG_SIZE {
            return Ok(false);
        }
        file.seek(SeekFrom::End(-(TAG_SIZE as i64)))?;
        let mut magic = [0u8; 3];
        file.read_exact(&mut magic)?;
        Ok(magic == TAG_MAGIC)
    }

    fn parse(buf: &[u8; 128]) -> TagData {
        let mut tag = TagData::new();
        set_trimmed(&mut tag, TagField::Title, &buf[3..33]);
        set_trimmed(&mut tag, TagField::Artist, &buf[33..63]);
        set_trimmed(&mut tag, TagField::Album, &buf[63..93]);
        set_trimmed(&mut tag, TagField::ReleaseYear, &buf[93..97]);
        // ID3v1.1: comment truncated to 28 bytes, byte 125 zero, byte 126
        // the track number
        if buf[125] == 0 && buf[126] != 0 {
            set_trimmed(&mut tag, TagField::Comment, &buf[97..125]);
            tag.set(TagField::TrackNumber, buf[126].to_string());
        } else {
            set_trimmed(&mut tag, TagField::Comment, &buf[97..127]);
        }
        let genre = buf[127];
        if (genre as usize) < GENRES.len() {
            tag.set(TagField::Genre, GENRES[genre as usize]);
        }
        tag
    }

    fn serialize(tag: &TagData) -> Vec<u8> {
        let mut out = Vec::with_capacity(TAG_SIZE as usize);
        out.extend_from_slice(TAG_MAGIC);
        push_padded(&mut out, tag.get(TagField::Title), 30);
        push_padded(&mut out, tag.get(TagField::Artist), 30);
        push_padded(&mut out, tag.get(TagField::Album), 30);
        let year = tag
            .get(TagField::ReleaseYear)
            .or_else(|| tag.get(TagField::ReleaseDate).map(|d| d.get(..4).unwrap_or(d)));
        push_padded(&mut out, year, 4);

        let track: Option<u8> = tag
            .get(TagField::TrackNumber)
            .and_then(|t| crate::tag::parse_number_field(t).parse().ok());
        match track {
            Some(track) if track > 0 => {
                push_padded(&mut out, tag.get(TagField::Comment), 28);
                out.push(0);
                out.push(track);
            }
            _ => push_padded(&mut out, tag.get(TagField::Comment), 30),
        }

        let genre = tag
            .get(TagField::Genre)
            .and_then(|name| GENRES.iter().position(|g| g.eq_ignore_ascii_case(name)))
            .map(|idx| idx as u8)
            .unwrap_or(NO_GENRE);
        out.push(genre);
        out
    }
}

impl Default for Id3v1Codec {
    fn default() -> Self {
        Self::new()
    }
}

fn set_trimmed(tag: &mut TagData, field: TagField, bytes: &[u8]) {
    let text = decode_latin1(bytes);
    let trimmed = text.trim_end_matches(['\0', ' ']);
    if !trimmed.is_empty() {
        tag.set(field, trimmed);
    }
}

fn push_padded(out: &mut Vec<u8>, value: Option<&str>, width: usize) {
    let mut encoded = value.map(encode_latin1).unwrap_or_default();
    encoded.resize(width, 0);
    out.extend_from_slice(&encoded[..width]);
}

impl MetadataCodec for Id3v1Codec {
    fn format_name(&self) -> &'static str {
        "ID3v1"
    }

    fn supported_tag_kinds(&self) -> &'static [TagKind] {
        &[TagKind::Id3v1]
    }

    fn read(&mut self, file: &mut File, params: &mut ReadParams) -> Result<ReadOutcome> {
        self.helper.clear();
        let len = file.seek(SeekFrom::End(0))?;
        let present = Self::is_present(file)?;

        let mut snapshot = TagSnapshot::absent(TagKind::Id3v1);
        if present {
            let mut buf = [0u8; 128];
            file.seek(SeekFrom::End(-(TAG_SIZE as i64)))?;
            file.read_exact(&mut buf)?;
            snapshot.exists = true;
            snapshot.data = Self::parse(&buf);
            if params.prepare_for_write {
                self.helper.add_zone(ZONE_ID3V1, len - TAG_SIZE, TAG_SIZE);
            }
        } else if params.prepare_for_write {
            self.helper.add_zone(ZONE_ID3V1, len, 0);
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
        if kind != TagKind::Id3v1 {
            return Err(Error::invalid_argument("not an ID3v1 write"));
        }
        if !self.helper.has_zones() {
            return Err(Error::invalid_argument(
                "write requires a prepare-for-writing read",
            ));
        }
        let bytes = if tag.fields.values().all(String::is_empty) {
            Vec::new()
        } else {
            Self::serialize(tag)
        };
        self.helper
            .commit(file, vec![ZoneOutput::new(ZONE_ID3V1, bytes)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_v11() {
        let mut tag = TagData::new();
        tag.set(TagField::Title, "Title");
        tag.set(TagField::Artist, "Artist");
        tag.set(TagField::Album, "Album");
        tag.set(TagField::ReleaseYear, "2008");
        tag.set(TagField::Comment, "A comment");
        tag.set(TagField::TrackNumber, "7");
        tag.set(TagField::Genre, "Merengue");

        let bytes = Id3v1Codec::serialize(&tag);
        assert_eq!(bytes.len(), 128);
        let parsed = Id3v1Codec::parse(bytes.as_slice().try_into().unwrap());

        assert_eq!(parsed.get(TagField::Title), Some("Title"));
        assert_eq!(parsed.get(TagField::ReleaseYear), Some("2008"));
        assert_eq!(parsed.get(TagField::TrackNumber), Some("7"));
        assert_eq!(parsed.get(TagField::Genre), Some("Merengue"));
    }

    #[test]
    fn test_unknown_genre_writes_255() {
        let mut tag = TagData::new();
        tag.set(TagField::Title, "T");
        tag.set(TagField::Genre, "Not A Genre");
        let bytes = Id3v1Codec::serialize(&tag);
        assert_eq!(bytes[127], NO_GENRE);
    }

    #[test]
    fn test_long_fields_truncate() {
        let mut tag = TagData::new();
        tag.set(TagField::Title, "x".repeat(50));
        let bytes = Id3v1Codec::serialize(&tag);
        assert_eq!(bytes.len(), 128);
        let parsed = Id3v1Codec::parse(bytes.as_slice().try_into().unwrap());
        assert_eq!(parsed.get(TagField::Title), Some("x".repeat(30).as_str()));
    }

    #[test]
    fn test_no_track_keeps_30_byte_comment() {
        let mut tag = TagData::new();
        tag.set(TagField::Comment, "c".repeat(30));
        let bytes = Id3v1Codec::serialize(&tag);
        let parsed = Id3v1Codec::parse(bytes.as_slice().try_into().unwrap());
        assert_eq!(parsed.get(TagField::Comment), Some("c".repeat(30).as_str()));
        assert_eq!(parsed.get(TagField::TrackNumber), None);
    }

    #[test]
    fn test_genre_table_spot_checks() {
        assert_eq!(GENRES[0], "Blues");
        assert_eq!(GENRES[17], "Rock");
        assert_eq!(GENRES[142], "Merengue");
        assert_eq!(GENRES.len(), 148);
    }
}
