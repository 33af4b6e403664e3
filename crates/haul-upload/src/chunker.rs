//! Splitting a source file into ordered byte ranges

use haul_core::types::ChunkRange;
use haul_core::{Error, Result, MAX_PARTS};
use std::path::Path;

/// Plan the chunks of a `total_len`-byte payload.
///
/// Ranges are contiguous, cover every byte, and only the last one may be
/// shorter than `chunk_size`. An empty payload yields no chunks.
pub fn plan_chunks(total_len: u64, chunk_size: u64) -> Result<Vec<ChunkRange>> {
    if chunk_size == 0 {
        return Err(Error::Configuration("Chunk size must be at least 1 byte".into()));
    }

    let count = total_len.div_ceil(chunk_size);
    if count > u64::from(MAX_PARTS) {
        return Err(Error::Configuration(format!(
            "{} bytes in {}-byte chunks needs {} parts; the limit is {} (use a chunk size of at least {} bytes)",
            total_len,
            chunk_size,
            count,
            MAX_PARTS,
            total_len.div_ceil(u64::from(MAX_PARTS))
        )));
    }

    let mut ranges = Vec::with_capacity(count as usize);
    let mut offset = 0u64;
    let mut position = 1u32;
    while offset < total_len {
        let length = chunk_size.min(total_len - offset);
        ranges.push(ChunkRange {
            position,
            offset,
            length,
        });
        offset += length;
        position += 1;
    }

    Ok(ranges)
}

/// Split the file at `path` into chunk ranges.
///
/// Depends only on the file's length, so re-splitting an unchanged file
/// returns the same ranges.
pub fn split(path: &Path, chunk_size: u64) -> Result<Vec<ChunkRange>> {
    let metadata = std::fs::metadata(path)?;
    if !metadata.is_file() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", path.display()),
        )));
    }
    plan_chunks(metadata.len(), chunk_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plan_uneven_tail() {
        let ranges = plan_chunks(250, 100).unwrap();
        let lengths: Vec<u64> = ranges.iter().map(|r| r.length).collect();
        let offsets: Vec<u64> = ranges.iter().map(|r| r.offset).collect();
        assert_eq!(lengths, vec![100, 100, 50]);
        assert_eq!(offsets, vec![0, 100, 200]);
        assert_eq!(ranges[2].position, 3);
        assert_eq!(ranges[2].end(), 250);
    }

    #[test]
    fn test_plan_exact_multiple_and_single() {
        assert_eq!(plan_chunks(300, 100).unwrap().len(), 3);
        let single = plan_chunks(42, 100).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].length, 42);
        assert!(plan_chunks(0, 100).unwrap().is_empty());
    }

    #[test]
    fn test_plan_rejects_zero_and_too_many_parts() {
        assert!(matches!(plan_chunks(10, 0), Err(Error::Configuration(_))));
        assert!(matches!(
            plan_chunks(u64::from(MAX_PARTS) + 1, 1),
            Err(Error::Configuration(_))
        ));
        assert_eq!(
            plan_chunks(u64::from(MAX_PARTS), 1).unwrap().len(),
            MAX_PARTS as usize
        );
    }

    #[test]
    fn test_split_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.bak");
        std::fs::write(&path, vec![7u8; 1000]).unwrap();

        let first = split(&path, 300).unwrap();
        let second = split(&path, 300).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
        assert_eq!(first[3].length, 100);
    }

    #[test]
    fn test_split_missing_or_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            split(&dir.path().join("nope"), 10),
            Err(Error::Io(_))
        ));
        assert!(matches!(split(dir.path(), 10), Err(Error::Io(_))));
    }

    proptest! {
        #[test]
        fn prop_chunks_cover_payload(total in 0u64..5_000_000, size in 1u64..2_000_000) {
            let ranges = plan_chunks(total, size).unwrap();

            prop_assert_eq!(ranges.len() as u64, total.div_ceil(size));
            prop_assert_eq!(ranges.iter().map(|r| r.length).sum::<u64>(), total);

            let mut expected_offset = 0;
            for (i, r) in ranges.iter().enumerate() {
                prop_assert_eq!(r.position as usize, i + 1);
                prop_assert_eq!(r.offset, expected_offset);
                prop_assert!(r.length >= 1 && r.length <= size);
                if i + 1 < ranges.len() {
                    prop_assert_eq!(r.length, size);
                }
                expected_offset = r.end();
            }

            prop_assert_eq!(plan_chunks(total, size).unwrap(), ranges);
        }
    }
}
