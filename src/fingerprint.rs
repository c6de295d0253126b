//! Quick content fingerprints
//!
//! Hashing whole media files on every poll is far too slow, so the fingerprint
//! only covers the file length plus its first and last chunk. It identifies
//! "the same bytes moved elsewhere", nothing stronger.

use std::fs::File;
use std::hash::Hasher;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use twox_hash::XxHash64;

/// Bytes hashed at each end of the file
pub const CHUNK_SIZE: u64 = 64 * 1024;

/// Fingerprint a local file. Directories have no fingerprint.
pub fn quick_fingerprint(path: &Path) -> std::io::Result<Option<String>> {
	let metadata = std::fs::metadata(path)?;
	if !metadata.is_file() {
		return Ok(None);
	}

	let mut file = File::open(path)?;
	fingerprint_reader(&mut file, metadata.len()).map(Some)
}

/// Fingerprint any seekable source of known length
pub fn fingerprint_reader<R: Read + Seek>(reader: &mut R, len: u64) -> std::io::Result<String> {
	let mut hasher = XxHash64::with_seed(0);
	hasher.write_u64(len);

	let head_len = len.min(CHUNK_SIZE);
	let mut buffer = vec![0u8; head_len as usize];
	reader.seek(SeekFrom::Start(0))?;
	reader.read_exact(&mut buffer)?;
	hasher.write(&buffer);

	if len > CHUNK_SIZE {
		let tail_start = len.saturating_sub(CHUNK_SIZE).max(CHUNK_SIZE);
		let tail_len = len - tail_start;
		buffer.resize(tail_len as usize, 0);
		reader.seek(SeekFrom::Start(tail_start))?;
		reader.read_exact(&mut buffer)?;
		hasher.write(&buffer);
	}

	Ok(format!("{:016x}", hasher.finish()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	#[test]
	fn test_same_content_same_fingerprint() {
		let data = b"hello catalog".to_vec();
		let a = fingerprint_reader(&mut Cursor::new(data.clone()), data.len() as u64).unwrap();
		let b = fingerprint_reader(&mut Cursor::new(data.clone()), data.len() as u64).unwrap();
		assert_eq!(a, b);
		assert_eq!(a.len(), 16);
	}

	#[test]
	fn test_tail_changes_are_detected() {
		let mut data = vec![7u8; (CHUNK_SIZE * 3) as usize];
		let original = fingerprint_reader(&mut Cursor::new(data.clone()), data.len() as u64).unwrap();

		let last = data.len() - 1;
		data[last] = 8;
		let changed = fingerprint_reader(&mut Cursor::new(data.clone()), data.len() as u64).unwrap();
		assert_ne!(original, changed);
	}

	#[test]
	fn test_directories_have_no_fingerprint() {
		let dir = tempfile::TempDir::new().unwrap();
		assert_eq!(quick_fingerprint(dir.path()).unwrap(), None);

		let file = dir.path().join("a.bin");
		std::fs::write(&file, b"abc").unwrap();
		assert!(quick_fingerprint(&file).unwrap().is_some());
	}

	#[test]
	fn test_empty_file() {
		let fingerprint = fingerprint_reader(&mut Cursor::new(Vec::new()), 0).unwrap();
		assert_eq!(fingerprint.len(), 16);
	}
}
