//! Checksummed frames
//!
//! Every WAL entry is written as one frame:
//!
//! ```text
//! [data_len: u32 LE][data: data_len bytes][crc32: u32 LE]
//! ```
//!
//! A frame that ends early or fails its checksum marks a torn tail: the
//! process died in the middle of an append.

use crc32fast::Hasher;
use std::io::{self, Read};

/// Upper bound on a single frame payload (guards against garbage lengths)
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

pub struct Checksum;

impl Checksum {
    pub fn compute(data: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    pub fn verify(data: &[u8], expected: u32) -> Result<(), ChecksumError> {
        let actual = Self::compute(data);
        if actual != expected {
            return Err(ChecksumError::Mismatch {
                expected,
                actual,
                data_len: data.len(),
            });
        }
        Ok(())
    }

    /// Wrap `data` in a frame
    pub fn encode_frame(data: &[u8]) -> Vec<u8> {
        let checksum = Self::compute(data);
        let mut encoded = Vec::with_capacity(4 + data.len() + 4);
        encoded.extend_from_slice(&(data.len() as u32).to_le_bytes());
        encoded.extend_from_slice(data);
        encoded.extend_from_slice(&checksum.to_le_bytes());
        encoded
    }

    /// Read the next frame from `reader`.
    ///
    /// Returns `Ok(None)` at a clean end of input. A short or corrupt frame is
    /// reported as an error so the caller can stop at the torn tail.
    pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>, ChecksumError> {
        let mut len_buf = [0u8; 4];
        let got = read_fully(reader, &mut len_buf)?;
        if got == 0 {
            return Ok(None);
        }
        if got < len_buf.len() {
            return Err(ChecksumError::Truncated { wanted: 4, got });
        }

        let data_len = u32::from_le_bytes(len_buf) as usize;
        if data_len > MAX_FRAME_LEN {
            return Err(ChecksumError::InvalidFormat(format!(
                "frame length {} exceeds {}",
                data_len, MAX_FRAME_LEN
            )));
        }

        let mut body = vec![0u8; data_len + 4];
        let got = read_fully(reader, &mut body)?;
        if got < body.len() {
            return Err(ChecksumError::Truncated {
                wanted: body.len(),
                got,
            });
        }

        let crc_bytes = body.split_off(data_len);
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        Self::verify(&body, expected)?;
        Ok(Some(body))
    }
}

/// Like `read_exact`, but reports how many bytes were available instead of
/// failing on a short read.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x} (data_len={data_len})")]
    Mismatch {
        expected: u32,
        actual: u32,
        data_len: usize,
    },

    #[error("Truncated frame: wanted {wanted} bytes, got {got}")]
    Truncated { wanted: usize, got: usize },

    #[error("Invalid frame format: {0}")]
    InvalidFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_checksum_basic() {
        let data = b"Hello, tinytable!";
        let checksum = Checksum::compute(data);
        assert!(Checksum::verify(data, checksum).is_ok());
        assert!(Checksum::verify(data, checksum + 1).is_err());
        assert!(Checksum::verify(b"Hello, tinytable?", checksum).is_err());
    }

    #[test]
    fn test_frames_in_sequence() {
        let mut log = Checksum::encode_frame(b"first");
        log.extend(Checksum::encode_frame(b""));
        log.extend(Checksum::encode_frame(b"third"));

        let mut cursor = Cursor::new(log);
        assert_eq!(Checksum::read_frame(&mut cursor).unwrap().unwrap(), b"first");
        assert_eq!(Checksum::read_frame(&mut cursor).unwrap().unwrap(), b"");
        assert_eq!(Checksum::read_frame(&mut cursor).unwrap().unwrap(), b"third");
        assert!(Checksum::read_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_torn_tail() {
        let mut log = Checksum::encode_frame(b"complete");
        let second = Checksum::encode_frame(b"half written");
        log.extend_from_slice(&second[..second.len() - 3]);

        let mut cursor = Cursor::new(log);
        assert!(Checksum::read_frame(&mut cursor).unwrap().is_some());
        let err = Checksum::read_frame(&mut cursor).unwrap_err();
        assert!(matches!(err, ChecksumError::Truncated { .. }));
    }

    #[test]
    fn test_corrupted_frame() {
        let mut frame = Checksum::encode_frame(b"payload");
        frame[6] ^= 0xFF;
        let err = Checksum::read_frame(&mut Cursor::new(frame)).unwrap_err();
        assert!(matches!(err, ChecksumError::Mismatch { .. }));
    }

    #[test]
    fn test_garbage_length() {
        let frame = vec![0xFF, 0xFF, 0xFF, 0x7F, 1, 2, 3];
        let err = Checksum::read_frame(&mut Cursor::new(frame)).unwrap_err();
        assert!(matches!(err, ChecksumError::InvalidFormat(_)));
    }
}
