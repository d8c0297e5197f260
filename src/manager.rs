//! File-level orchestration
//!
//! [`open`] probes a path for a suitable codec; the resulting [`AudioFile`]
//! dispatches read, update and remove calls. An update is one atomic
//! read-merge-write cycle: the current tag is re-read in prepare-for-writing
//! mode so the codec records its zones, the caller delta is merged, and the
//! codec serializes back through the zone commit.

use crate::error::{Error, Result};
use crate::format::{
    create_codec, detect, ContainerFormat, PictureSinkFn, ReadOutcome, ReadParams,
};
use crate::tag::{TagData, TagKind};
use crate::Settings;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Read-call options
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Decode additional fields and picture payloads, not just the
    /// supported fields
    pub include_all_meta: bool,
}

/// An audio file with a recognized container format
pub struct AudioFile {
    path: PathBuf,
    format: ContainerFormat,
}

/// Probe `path` and bind the matching codec
pub fn open<P: AsRef<Path>>(path: P) -> Result<AudioFile> {
    let path = path.as_ref();
    let mut file = File::open(path)?;
    let format = detect(&mut file, path)?;
    debug!("{}: detected {:?}", path.display(), format);
    Ok(AudioFile {
        path: path.to_path_buf(),
        format,
    })
}

impl AudioFile {
    pub fn format(&self) -> ContainerFormat {
        self.format
    }

    /// Tag systems this file's format can carry
    pub fn supported_tag_kinds(&self) -> &'static [TagKind] {
        create_codec(self.format).supported_tag_kinds()
    }

    /// Read audio properties and every tag present
    pub fn read(&self, options: &ReadOptions) -> Result<ReadOutcome> {
        self.read_with_sink(options, None)
    }

    /// Read, streaming each picture's raw bytes to `sink` as it is decoded
    pub fn read_with_sink(
        &self,
        options: &ReadOptions,
        sink: Option<&mut PictureSinkFn>,
    ) -> Result<ReadOutcome> {
        let mut codec = create_codec(self.format);
        let mut file = File::open(&self.path)?;
        let mut params = ReadParams {
            prepare_for_write: false,
            include_all_meta: options.include_all_meta,
            picture_sink: sink,
            settings: Settings::default(),
        };
        codec.read(&mut file, &mut params)
    }

    /// Merge `delta` into the persisted tag of `kind` and rewrite the file
    pub fn update(&self, delta: &TagData, kind: TagKind, settings: &Settings) -> Result<()> {
        let mut codec = create_codec(self.format);
        if !codec.supported_tag_kinds().contains(&kind) {
            return Err(Error::invalid_argument(format!(
                "{} files do not carry {:?} tags",
                codec.format_name(),
                kind
            )));
        }

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        let mut params = ReadParams {
            prepare_for_write: true,
            include_all_meta: true,
            picture_sink: None,
            settings: settings.clone(),
        };
        let outcome = codec.read(&mut file, &mut params)?;
        let current = outcome
            .tag(kind)
            .map(|snapshot| snapshot.data.clone())
            .unwrap_or_default();

        let merged = current.merged_with(delta);
        codec.write_tag(&mut file, &merged, kind, settings)?;
        file.sync_all()?;
        Ok(())
    }

    /// Remove the tag of `kind`, retaining fields that are part of the
    /// audio contract (codec-specific)
    pub fn remove(&self, kind: TagKind, settings: &Settings) -> Result<()> {
        let mut codec = create_codec(self.format);
        if !codec.supported_tag_kinds().contains(&kind) {
            return Err(Error::invalid_argument(format!(
                "{} files do not carry {:?} tags",
                codec.format_name(),
                kind
            )));
        }

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        let mut params = ReadParams {
            prepare_for_write: true,
            include_all_meta: true,
            picture_sink: None,
            settings: settings.clone(),
        };
        let outcome = codec.read(&mut file, &mut params)?;
        let current = outcome
            .tag(kind)
            .map(|snapshot| snapshot.data.clone())
            .unwrap_or_default();

        let delta = codec.removal_delta(&current);
        let merged = current.merged_with(&delta);
        codec.write_tag(&mut file, &merged, kind, settings)?;
        file.sync_all()?;
        Ok(())
    }
}
