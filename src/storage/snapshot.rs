//! On-disk encoding of the counter: bare decimal text, nothing else.

use std::io::ErrorKind;
use std::path::Path;

use thiserror::Error;

use crate::contracts::CounterError;

/// Digit length of `u64::MAX`. Anything longer cannot be a valid count.
pub const MAX_SNAPSHOT_LEN: usize = 20;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseCountError {
    #[error("empty")]
    Empty,

    #[error("{0} bytes exceeds the {max} byte limit", max = MAX_SNAPSHOT_LEN)]
    TooLong(usize),

    #[error("unexpected byte 0x{byte:02x} at offset {offset}")]
    InvalidByte { byte: u8, offset: usize },

    #[error("value does not fit in 64 bits")]
    Overflow,
}

/// Parses a count that must be exactly a decimal `u64`.
///
/// No sign, no whitespace, no trailing newline.
pub fn parse_count(bytes: &[u8]) -> Result<u64, ParseCountError> {
    if bytes.is_empty() {
        return Err(ParseCountError::Empty);
    }
    if bytes.len() > MAX_SNAPSHOT_LEN {
        return Err(ParseCountError::TooLong(bytes.len()));
    }

    let mut value: u64 = 0;
    for (offset, &byte) in bytes.iter().enumerate() {
        if !byte.is_ascii_digit() {
            return Err(ParseCountError::InvalidByte { byte, offset });
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(u64::from(byte - b'0')))
            .ok_or(ParseCountError::Overflow)?;
    }
    Ok(value)
}

#[inline]
pub fn encode_count(value: u64) -> String {
    value.to_string()
}

/// Reads a persisted count.
///
/// Returns `Ok(None)` when no snapshot exists yet.
pub fn read_snapshot(path: &Path) -> Result<Option<u64>, CounterError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CounterError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    parse_count(&bytes)
        .map(Some)
        .map_err(|e| CounterError::Corrupt {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_decimal() {
        assert_eq!(parse_count(b"0"), Ok(0));
        assert_eq!(parse_count(b"42"), Ok(42));
        assert_eq!(parse_count(b"007"), Ok(7));
        assert_eq!(parse_count(b"18446744073709551615"), Ok(u64::MAX));
    }

    #[test]
    fn rejects_anything_but_digits() {
        assert_eq!(parse_count(b""), Err(ParseCountError::Empty));
        assert_eq!(
            parse_count(b"42\n"),
            Err(ParseCountError::InvalidByte {
                byte: b'\n',
                offset: 2
            })
        );
        assert!(matches!(
            parse_count(b"+1"),
            Err(ParseCountError::InvalidByte { offset: 0, .. })
        ));
        assert!(matches!(
            parse_count(b"-1"),
            Err(ParseCountError::InvalidByte { .. })
        ));
        assert!(matches!(
            parse_count(b"12a"),
            Err(ParseCountError::InvalidByte { offset: 2, .. })
        ));
    }

    #[test]
    fn rejects_over_length_and_overflow() {
        assert_eq!(
            parse_count(b"123456789012345678901"),
            Err(ParseCountError::TooLong(21))
        );
        assert_eq!(
            parse_count(b"18446744073709551616"),
            Err(ParseCountError::Overflow)
        );
        assert_eq!(
            parse_count(b"99999999999999999999"),
            Err(ParseCountError::Overflow)
        );
    }

    #[test]
    fn missing_snapshot_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_snapshot(&dir.path().join("absent")).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn garbled_snapshot_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("count");
        std::fs::write(&path, "not a number").unwrap();

        let err = read_snapshot(&path).unwrap_err();
        assert!(matches!(err, CounterError::Corrupt { .. }), "got {err:?}");
    }

    #[test]
    fn directory_in_place_of_snapshot_is_a_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_snapshot(dir.path()).unwrap_err();
        assert!(matches!(err, CounterError::ReadFailed { .. }), "got {err:?}");
    }
}
