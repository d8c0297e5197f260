//! File region splicing
//!
//! Growing or shrinking a metadata zone means physically moving everything
//! behind it. The suffix is copied in fixed-size chunks: end-to-front when
//! inserting (so uncopied data is never overwritten), front-to-back when
//! removing. A failure mid-splice leaves the file in an undefined state;
//! callers that need atomicity must write to a copy first.

use crate::error::Result;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

const CHUNK_SIZE: usize = 8192;

/// Insert `count` undefined bytes at `offset`, shifting the suffix forward
/// and extending the file length.
pub fn lengthen(file: &mut File, offset: u64, count: u64) -> Result<()> {
    if count == 0 {
        return Ok(());
    }
    let old_len = file.seek(SeekFrom::End(0))?;
    debug_assert!(offset <= old_len);
    file.set_len(old_len + count)?;

    let mut buf = [0u8; CHUNK_SIZE];
    let mut remaining = old_len - offset;
    // Copy the suffix from its end toward `offset`
    while remaining > 0 {
        let chunk = remaining.min(CHUNK_SIZE as u64) as usize;
        let src = offset + remaining - chunk as u64;
        file.seek(SeekFrom::Start(src))?;
        file.read_exact(&mut buf[..chunk])?;
        file.seek(SeekFrom::Start(src + count))?;
        file.write_all(&buf[..chunk])?;
        remaining -= chunk as u64;
    }
    Ok(())
}

/// Remove `count` bytes at `offset`, shifting the suffix backward and
/// truncating the file length.
pub fn shorten(file: &mut File, offset: u64, count: u64) -> Result<()> {
    if count == 0 {
        return Ok(());
    }
    let old_len = file.seek(SeekFrom::End(0))?;
    debug_assert!(offset + count <= old_len);

    let mut buf = [0u8; CHUNK_SIZE];
    let mut src = offset + count;
    let mut dst = offset;
    // Copy the suffix from `offset + count` toward the end
    while src < old_len {
        let chunk = (old_len - src).min(CHUNK_SIZE as u64) as usize;
        file.seek(SeekFrom::Start(src))?;
        file.read_exact(&mut buf[..chunk])?;
        file.seek(SeekFrom::Start(dst))?;
        file.write_all(&buf[..chunk])?;
        src += chunk as u64;
        dst += chunk as u64;
    }
    file.set_len(old_len - count)?;
    Ok(())
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
    fn test_lengthen_shifts_suffix() {
        let mut file = temp_file_with(b"headAUDIO");
        lengthen(&mut file, 4, 3).unwrap();
        let content = read_all(&mut file);
        assert_eq!(content.len(), 12);
        assert_eq!(&content[..4], b"head");
        assert_eq!(&content[7..], b"AUDIO");
    }

    #[test]
    fn test_shorten_shifts_suffix() {
        let mut file = temp_file_with(b"headJUNKaudio");
        shorten(&mut file, 4, 4).unwrap();
        assert_eq!(read_all(&mut file), b"headaudio");
    }

    #[test]
    fn test_lengthen_at_end() {
        let mut file = temp_file_with(b"data");
        lengthen(&mut file, 4, 8).unwrap();
        let content = read_all(&mut file);
        assert_eq!(content.len(), 12);
        assert_eq!(&content[..4], b"data");
    }

    #[test]
    fn test_round_trip_larger_than_chunk() {
        let payload: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        let mut initial = b"prefix".to_vec();
        initial.extend_from_slice(&payload);

        let mut file = temp_file_with(&initial);
        lengthen(&mut file, 6, 12_345).unwrap();
        shorten(&mut file, 6, 12_345).unwrap();
        assert_eq!(read_all(&mut file), initial);
    }
}
