//! Binary framing for snapshot files.
//!
//! A snapshot file is a header followed by one checksummed frame:
//!
//! ```text
//! [magic: 4 bytes "RBLM"][codec version: 1 byte]
//! [codec version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
//! ```
//!
//! Files are written to a temporary sibling, fsynced, then renamed over the
//! destination so a crash never leaves a half-written snapshot behind.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crc32fast::Hasher;

use crate::error::SnapshotError;

/// Current codec version.
pub const CODEC_VERSION: u8 = 1;

/// Magic bytes identifying snapshot files.
pub const MAGIC: [u8; 4] = *b"RBLM";

/// Largest frame accepted when decoding (256 MB).
const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

fn corrupt(message: impl Into<String>) -> SnapshotError {
    SnapshotError::Corrupt {
        message: message.into(),
    }
}

/// Frames a payload with version, length and CRC32.
///
/// # Errors
///
/// Returns `Corrupt` if the payload does not fit a 32-bit length.
pub fn encode_frame(data: &[u8]) -> Result<Vec<u8>, SnapshotError> {
    let len = u32::try_from(data.len()).map_err(|_| corrupt("payload too large to frame"))?;

    let mut hasher = Hasher::new();
    hasher.update(data);
    let crc = hasher.finalize();

    let mut out = Vec::with_capacity(1 + 4 + data.len() + 4);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// Reads one frame and verifies its checksum.
///
/// # Errors
///
/// `Corrupt` on an unsupported codec version, an oversized length, a CRC
/// mismatch or a truncated frame.
pub fn decode_frame(reader: &mut impl Read) -> Result<Vec<u8>, SnapshotError> {
    let mut version = [0u8; 1];
    read_exact(reader, &mut version)?;
    if version[0] != CODEC_VERSION {
        return Err(corrupt(format!(
            "unsupported codec version: {} (expected {CODEC_VERSION})",
            version[0]
        )));
    }

    let mut len_bytes = [0u8; 4];
    read_exact(reader, &mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(corrupt(format!("frame size {len} exceeds maximum {MAX_FRAME_SIZE}")));
    }

    let mut data = vec![0u8; len];
    read_exact(reader, &mut data)?;

    let mut crc_bytes = [0u8; 4];
    read_exact(reader, &mut crc_bytes)?;
    let stored = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let computed = hasher.finalize();
    if stored != computed {
        return Err(corrupt(format!(
            "CRC mismatch: stored={stored:08x}, computed={computed:08x}"
        )));
    }
    Ok(data)
}

fn read_exact(reader: &mut impl Read, buf: &mut [u8]) -> Result<(), SnapshotError> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            corrupt("truncated snapshot")
        } else {
            SnapshotError::Io(e)
        }
    })
}

/// Writes the file header (magic + codec version).
///
/// # Errors
///
/// Propagates I/O failures.
pub fn write_header(writer: &mut impl Write) -> Result<(), SnapshotError> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])?;
    Ok(())
}

/// Reads and validates the file header, returning the codec version.
///
/// # Errors
///
/// `Corrupt` if the magic bytes are wrong or the header is truncated.
pub fn read_header(reader: &mut impl Read) -> Result<u8, SnapshotError> {
    let mut magic = [0u8; 4];
    read_exact(reader, &mut magic)?;
    if magic != MAGIC {
        return Err(corrupt(format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}")));
    }
    let mut version = [0u8; 1];
    read_exact(reader, &mut version)?;
    Ok(version[0])
}

/// Atomically writes a framed payload to `path`.
///
/// # Errors
///
/// Propagates I/O failures; the destination is untouched on error.
pub fn write_file(path: &Path, payload: &[u8]) -> Result<(), SnapshotError> {
    let frame = encode_frame(payload)?;
    let temp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4()));

    let result = (|| -> Result<(), SnapshotError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        let mut writer = BufWriter::new(file);
        write_header(&mut writer)?;
        writer.write_all(&frame)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&temp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Reads and verifies a framed payload from `path`.
///
/// # Errors
///
/// `Io` if the file cannot be opened, `Corrupt` if it fails verification.
pub fn read_file(path: &Path) -> Result<Vec<u8>, SnapshotError> {
    let mut reader = BufReader::new(File::open(path)?);
    read_header(&mut reader)?;
    decode_frame(&mut reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_roundtrip() {
        let encoded = encode_frame(b"{\"a\":1}").unwrap();
        let decoded = decode_frame(&mut Cursor::new(encoded)).unwrap();
        assert_eq!(decoded, b"{\"a\":1}");
    }

    #[test]
    fn test_detects_corruption() {
        let mut encoded = encode_frame(b"some snapshot payload").unwrap();
        encoded[8] ^= 0xFF;
        let err = decode_frame(&mut Cursor::new(encoded)).unwrap_err();
        assert!(err.to_string().contains("CRC"));
    }

    #[test]
    fn test_rejects_oversized_frame() {
        let mut bad = vec![CODEC_VERSION];
        bad.extend_from_slice(&(300_000_000u32).to_le_bytes());
        let err = decode_frame(&mut Cursor::new(bad)).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_truncated_frame_is_corrupt() {
        let encoded = encode_frame(b"payload").unwrap();
        let err = decode_frame(&mut Cursor::new(&encoded[..6])).unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt { .. }));
    }

    #[test]
    fn test_header_roundtrip() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        assert_eq!(read_header(&mut Cursor::new(buf)).unwrap(), CODEC_VERSION);

        let err = read_header(&mut Cursor::new(b"KYRO\x01".to_vec())).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.snap");
        write_file(&path, b"[1,2,3]").unwrap();
        assert_eq!(read_file(&path).unwrap(), b"[1,2,3]");
    }
}
