//! End-to-end SPC700 scenarios: ID666 header tag, xid6 footer, durations

mod common;

use common::*;
use tagio::{open, AdditionalField, ReadOptions, Settings, TagData, TagField, TagKind};

fn all_meta() -> ReadOptions {
    ReadOptions {
        include_all_meta: true,
    }
}

fn playback_delta() -> TagData {
    let mut delta = TagData::new();
    for (code, value) in [
        ("XID6_LOOP", "64000"),
        ("XID6_LOOPX", "2"),
        ("XID6_END", "64000"),
        ("XID6_FADE", "64000"),
    ] {
        delta.push_additional(AdditionalField::text(TagKind::Native, code, value));
    }
    delta
}

#[test]
fn test_header_duration() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_spc(dir.path(), "2008/01/01", "180", "5000");

    let outcome = open(&path).unwrap().read(&all_meta()).unwrap();
    assert_eq!(outcome.properties.format_name, "SPC700");
    assert_eq!(outcome.properties.sample_rate, 32_000);
    assert_eq!(outcome.properties.channels, 2);
    // 180 s song + round(5000 ms / 1000)
    assert!((outcome.properties.duration_s - 185.0).abs() < 1e-9);

    let tag = &outcome.tag(TagKind::Native).unwrap().data;
    assert_eq!(tag.get(TagField::ReleaseDate), Some("2008/01/01"));
}

#[test]
fn test_xid6_overrides_header_duration() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_spc(dir.path(), "2008/01/01", "180", "5000");
    let file = open(&path).unwrap();

    file.update(&playback_delta(), TagKind::Native, &Settings::default())
        .unwrap();

    // 64000 * min(9, 2) + 64000 + 64000 = 256000 ticks at 64000/s
    let outcome = file.read(&all_meta()).unwrap();
    assert!((outcome.properties.duration_s - 4.0).abs() < 1e-9);
}

#[test]
fn test_identity_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_spc(dir.path(), "2008/01/01", "180", "5000");
    let original = file_bytes(&path);

    let file = open(&path).unwrap();
    file.update(&TagData::new(), TagKind::Native, &Settings::default())
        .unwrap();
    assert_same_bytes(&path, &original);
}

#[test]
fn test_tag_fields_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_spc(dir.path(), "", "180", "5000");
    let file = open(&path).unwrap();
    let settings = Settings::default();

    let mut delta = TagData::new();
    delta.set(TagField::Title, "Boss Theme");
    delta.set(TagField::Album, "Some Game OST");
    delta.set(TagField::Artist, "Composer");
    delta.set(TagField::Comment, "ripped long ago");
    delta.set(TagField::Publisher, "Square");
    delta.set(TagField::TrackNumber, "5");
    delta.set(TagField::DiscNumber, "1");
    file.update(&delta, TagKind::Native, &settings).unwrap();

    let outcome = file.read(&all_meta()).unwrap();
    let tag = &outcome.tag(TagKind::Native).unwrap().data;
    assert_eq!(tag.get(TagField::Title), Some("Boss Theme"));
    assert_eq!(tag.get(TagField::Album), Some("Some Game OST"));
    assert_eq!(tag.get(TagField::Artist), Some("Composer"));
    assert_eq!(tag.get(TagField::Comment), Some("ripped long ago"));
    assert_eq!(tag.get(TagField::Publisher), Some("Square"));
    assert_eq!(tag.get(TagField::TrackNumber), Some("5"));
    assert_eq!(tag.get(TagField::DiscNumber), Some("1"));

    // Header-resident fields stay out of the footer; footer-only fields
    // created an xid6 chunk
    let bytes = file_bytes(&path);
    assert_eq!(&bytes[66048..66052], b"xid6");
}

#[test]
fn test_header_only_tag_adds_no_footer() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_spc(dir.path(), "", "180", "5000");
    let original_len = file_bytes(&path).len();
    let file = open(&path).unwrap();

    let mut delta = TagData::new();
    delta.set(TagField::Title, "Short");
    file.update(&delta, TagKind::Native, &Settings::default())
        .unwrap();

    // Fits the 32-byte header field: no xid6 chunk appears
    assert_eq!(file_bytes(&path).len(), original_len);
}

#[test]
fn test_long_title_spills_to_footer() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_spc(dir.path(), "", "180", "5000");
    let file = open(&path).unwrap();

    let long_title = "A title long enough to exceed the header's field";
    let mut delta = TagData::new();
    delta.set(TagField::Title, long_title);
    file.update(&delta, TagKind::Native, &Settings::default())
        .unwrap();

    let outcome = open(&path).unwrap().read(&all_meta()).unwrap();
    let tag = &outcome.tag(TagKind::Native).unwrap().data;
    assert_eq!(tag.get(TagField::Title), Some(long_title));
}

#[test]
fn test_playback_fields_survive_remove() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_spc(dir.path(), "2008/01/01", "180", "5000");
    let file = open(&path).unwrap();
    let settings = Settings::default();

    let mut delta = playback_delta();
    delta.set(TagField::Title, "Transient");
    delta.set(TagField::Publisher, "Square");
    file.update(&delta, TagKind::Native, &settings).unwrap();

    file.remove(TagKind::Native, &settings).unwrap();

    let outcome = file.read(&all_meta()).unwrap();
    let tag = &outcome.tag(TagKind::Native).unwrap().data;
    assert_eq!(tag.get(TagField::Title), None);
    assert_eq!(tag.get(TagField::Publisher), None);
    for (code, value) in [
        ("XID6_LOOP", "64000"),
        ("XID6_LOOPX", "2"),
        ("XID6_END", "64000"),
        ("XID6_FADE", "64000"),
    ] {
        assert_eq!(
            tag.find_additional(TagKind::Native, code)
                .unwrap()
                .value
                .as_text(),
            Some(value),
            "{} must survive removal",
            code
        );
    }
    // Duration is still governed by the retained playback fields
    assert!((outcome.properties.duration_s - 4.0).abs() < 1e-9);
}

#[test]
fn test_removal_is_clean_without_playback_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_spc(dir.path(), "", "180", "5000");
    let original = file_bytes(&path);
    let file = open(&path).unwrap();
    let settings = Settings::default();

    let mut delta = TagData::new();
    delta.set(TagField::Title, "Transient");
    delta.set(TagField::Artist, "Nobody");
    file.update(&delta, TagKind::Native, &settings).unwrap();
    assert_ne!(file_bytes(&path), original);

    file.remove(TagKind::Native, &settings).unwrap();
    assert_same_bytes(&path, &original);
}

#[test]
fn test_track_with_suffix() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_spc(dir.path(), "", "", "");
    let file = open(&path).unwrap();

    let mut delta = TagData::new();
    delta.set(TagField::TrackNumber, "5");
    delta.push_additional(AdditionalField::text(TagKind::Native, "XID6_TRACK", "5a"));
    file.update(&delta, TagKind::Native, &Settings::default())
        .unwrap();

    let outcome = file.read(&all_meta()).unwrap();
    let tag = &outcome.tag(TagKind::Native).unwrap().data;
    assert_eq!(tag.get(TagField::TrackNumber), Some("5"));
    assert_eq!(
        tag.find_additional(TagKind::Native, "XID6_TRACK")
            .unwrap()
            .value
            .as_text(),
        Some("5a")
    );
}
