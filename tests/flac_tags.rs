//! End-to-end FLAC tag scenarios

mod common;

use common::*;
use tagio::{
    open, PictureData, PictureType, ReadOptions, Settings, TagData, TagField, TagKind,
};

fn all_meta() -> ReadOptions {
    ReadOptions {
        include_all_meta: true,
    }
}

fn no_padding() -> Settings {
    Settings {
        enable_padding: false,
        ..Settings::default()
    }
}

fn marker_offset(path: &std::path::Path) -> usize {
    let bytes = file_bytes(path);
    bytes
        .windows(FLAC_AUDIO_MARKER.len())
        .position(|w| w == FLAC_AUDIO_MARKER)
        .expect("audio marker present")
}

#[test]
fn test_audio_properties() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_flac(dir.path(), Some(64));

    let outcome = open(&path).unwrap().read(&all_meta()).unwrap();
    assert_eq!(outcome.properties.format_name, "FLAC");
    assert_eq!(outcome.properties.sample_rate, 44_100);
    assert_eq!(outcome.properties.channels, 2);
    assert_eq!(outcome.properties.bits_per_sample, 16);
    assert!((outcome.properties.duration_s - 10.0).abs() < 1e-9);
}

#[test]
fn test_identity_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_flac(dir.path(), Some(64));
    let original = file_bytes(&path);

    let file = open(&path).unwrap();
    file.update(&TagData::new(), TagKind::Native, &no_padding())
        .unwrap();
    assert_same_bytes(&path, &original);
}

#[test]
fn test_padding_absorbs_growth() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_flac(dir.path(), Some(256));
    let original_len = file_bytes(&path).len();
    let original_marker = marker_offset(&path);

    let mut delta = TagData::new();
    delta.set(TagField::Title, "Test");
    delta.set(TagField::Artist, "Artist");
    let file = open(&path).unwrap();
    file.update(&delta, TagKind::Native, &Settings::default())
        .unwrap();

    // The comment block grew, the padding shrank: the audio bytes and the
    // total file size are untouched
    assert_eq!(file_bytes(&path).len(), original_len);
    assert_eq!(marker_offset(&path), original_marker);

    let outcome = file.read(&all_meta()).unwrap();
    let tag = &outcome.tag(TagKind::Native).unwrap().data;
    assert_eq!(tag.get(TagField::Title), Some("Test"));
    assert_eq!(tag.get(TagField::Artist), Some("Artist"));
}

#[test]
fn test_padding_absorbs_shrink() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_flac(dir.path(), Some(256));
    let file = open(&path).unwrap();
    let settings = Settings::default();

    let mut delta = TagData::new();
    delta.set(TagField::Title, "A somewhat longer title than needed");
    file.update(&delta, TagKind::Native, &settings).unwrap();
    let grown_len = file_bytes(&path).len();
    let grown_marker = marker_offset(&path);

    let mut shrink = TagData::new();
    shrink.set(TagField::Title, "A");
    file.update(&shrink, TagKind::Native, &settings).unwrap();
    assert_eq!(file_bytes(&path).len(), grown_len);
    assert_eq!(marker_offset(&path), grown_marker);
}

#[test]
fn test_full_tag_with_pictures() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_flac(dir.path(), Some(64));
    let file = open(&path).unwrap();
    let settings = Settings::default();

    let mut delta = TagData::new();
    delta.set(TagField::Title, "Test !!");
    delta.set(TagField::Genre, "Merengue");
    delta.push_picture(PictureData::with_native_code(
        0x03,
        "image/jpeg",
        make_jpeg(150, 150),
    ));
    delta.push_picture(PictureData::with_native_code(
        0x0B,
        "image/png",
        make_png(175, 168),
    ));
    file.update(&delta, TagKind::Native, &settings).unwrap();

    let outcome = file.read(&all_meta()).unwrap();
    let tag = &outcome.tag(TagKind::Native).unwrap().data;
    assert_eq!(tag.get(TagField::Title), Some("Test !!"));
    assert_eq!(tag.get(TagField::Genre), Some("Merengue"));
    assert_eq!(tag.pictures.len(), 2);
    assert_eq!(tag.pictures[0].pic_type, PictureType::Front);
    let (format, w, h) = probe_image(&tag.pictures[0].data);
    assert_eq!((format.as_str(), w, h), ("jpg", 150, 150));
    assert_eq!(tag.pictures[1].pic_type, PictureType::Unsupported);
    assert_eq!(tag.pictures[1].native_code, 0x0B);

    // Deleting one picture leaves the other byte-intact
    let mut removal = TagData::new();
    removal.push_picture(PictureData::deletion(0x03));
    file.update(&removal, TagKind::Native, &settings).unwrap();

    let outcome = file.read(&all_meta()).unwrap();
    let tag = &outcome.tag(TagKind::Native).unwrap().data;
    assert_eq!(tag.pictures.len(), 1);
    assert_eq!(tag.pictures[0].native_code, 0x0B);
    let (_, w, h) = probe_image(&tag.pictures[0].data);
    assert_eq!((w, h), (175, 168));
}

#[test]
fn test_removal_is_clean() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_flac(dir.path(), None);
    let original = file_bytes(&path);
    let file = open(&path).unwrap();
    let settings = Settings::default();

    let mut delta = TagData::new();
    delta.set(TagField::Title, "Transient");
    delta.push_picture(PictureData::with_native_code(
        0x03,
        "image/jpeg",
        make_jpeg(64, 64),
    ));
    file.update(&delta, TagKind::Native, &settings).unwrap();
    assert_ne!(file_bytes(&path), original);

    file.remove(TagKind::Native, &settings).unwrap();
    assert_same_bytes(&path, &original);
}

#[test]
fn test_cuesheet_is_opaque_and_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let cuesheet: Vec<u8> = (0..40u8).map(|i| i.wrapping_mul(7)).collect();
    let path = write_flac_with_cuesheet(dir.path(), &cuesheet);
    let file = open(&path).unwrap();

    let outcome = file.read(&all_meta()).unwrap();
    let tag = &outcome.tag(TagKind::Native).unwrap().data;
    assert_eq!(
        tag.find_additional(TagKind::Native, "CUESHEET")
            .unwrap()
            .value
            .as_binary(),
        Some(cuesheet.as_slice())
    );

    let mut delta = TagData::new();
    delta.set(TagField::Title, "With cuesheet");
    file.update(&delta, TagKind::Native, &Settings::default())
        .unwrap();

    // The cuesheet bytes are still in the file, verbatim
    let bytes = file_bytes(&path);
    assert!(bytes.windows(cuesheet.len()).any(|w| w == cuesheet));
    let outcome = file.read(&all_meta()).unwrap();
    let tag = &outcome.tag(TagKind::Native).unwrap().data;
    assert_eq!(tag.get(TagField::Title), Some("With cuesheet"));
    assert!(tag.find_additional(TagKind::Native, "CUESHEET").is_some());
}

#[test]
fn test_vendor_string_preserved() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_flac(dir.path(), Some(64));
    let file = open(&path).unwrap();
    let settings = Settings::default();

    let mut delta = TagData::new();
    delta.set(TagField::Title, "T");
    let mut vendor = tagio::AdditionalField::text(TagKind::Native, "VENDOR", "reference encoder");
    vendor.zone = String::new();
    delta.push_additional(vendor);
    file.update(&delta, TagKind::Native, &settings).unwrap();

    let outcome = file.read(&all_meta()).unwrap();
    let tag = &outcome.tag(TagKind::Native).unwrap().data;
    assert_eq!(
        tag.find_additional(TagKind::Native, "VENDOR")
            .unwrap()
            .value
            .as_text(),
        Some("reference encoder")
    );
}
