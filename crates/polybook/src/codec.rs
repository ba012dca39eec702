//! Polyglot book file codec
//!
//! A book is a flat array of 16-byte big-endian records:
//!
//! | Offset | Size | Field       |
//! |--------|------|-------------|
//! | 0      | 8    | fingerprint |
//! | 8      | 2    | packed move |
//! | 10     | 2    | weight      |
//! | 12     | 4    | learn       |
//!
//! Files are streamed record by record on every lookup and dropped
//! afterwards. Several records may share a fingerprint; all of them are
//! returned.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

use crate::error::{BookError, BookResult};
use crate::hash::Fingerprint;

/// Size of one book record in bytes
pub const RECORD_SIZE: usize = 16;

/// One entry of a Polyglot book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookRecord {
    pub fingerprint: Fingerprint,
    pub mv: u16,
    pub weight: u16,
    pub learn: u32,
}

impl BookRecord {
    pub fn from_bytes(buf: &[u8; RECORD_SIZE]) -> Self {
        let mut key = [0u8; 8];
        key.copy_from_slice(&buf[0..8]);
        let mut learn = [0u8; 4];
        learn.copy_from_slice(&buf[12..16]);

        BookRecord {
            fingerprint: Fingerprint(u64::from_be_bytes(key)),
            mv: u16::from_be_bytes([buf[8], buf[9]]),
            weight: u16::from_be_bytes([buf[10], buf[11]]),
            learn: u32::from_be_bytes(learn),
        }
    }

    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..8].copy_from_slice(&self.fingerprint.0.to_be_bytes());
        buf[8..10].copy_from_slice(&self.mv.to_be_bytes());
        buf[10..12].copy_from_slice(&self.weight.to_be_bytes());
        buf[12..16].copy_from_slice(&self.learn.to_be_bytes());
        buf
    }
}

/// Decode an in-memory book image
pub fn parse_records(bytes: &[u8]) -> BookResult<Vec<BookRecord>> {
    if bytes.len() % RECORD_SIZE != 0 {
        return Err(BookError::Format {
            path: PathBuf::new(),
            len: bytes.len() as u64,
        });
    }

    Ok(bytes
        .chunks_exact(RECORD_SIZE)
        .map(|chunk| {
            let mut buf = [0u8; RECORD_SIZE];
            buf.copy_from_slice(chunk);
            BookRecord::from_bytes(&buf)
        })
        .collect())
}

/// Resolve `name` inside `book_dir`, refusing names that escape it
pub fn book_path(book_dir: &Path, name: &str) -> BookResult<PathBuf> {
    let relative = Path::new(name);
    let plain = !name.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));

    if !plain {
        return Err(BookError::InvalidBookName {
            name: name.to_string(),
        });
    }

    Ok(book_dir.join(relative))
}

/// Stream the book at `path` and collect every record keyed by `target`
pub fn find_records(path: &Path, target: Fingerprint) -> BookResult<Vec<BookRecord>> {
    let io_err = |source| BookError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    let len = file.metadata().map_err(io_err)?.len();
    if len % RECORD_SIZE as u64 != 0 {
        return Err(BookError::Format {
            path: path.to_path_buf(),
            len,
        });
    }

    let mut reader = BufReader::new(file);
    let mut matches = Vec::new();
    let mut buf = [0u8; RECORD_SIZE];

    for _ in 0..len / RECORD_SIZE as u64 {
        reader.read_exact(&mut buf).map_err(io_err)?;
        let record = BookRecord::from_bytes(&buf);
        if record.fingerprint == target {
            matches.push(record);
        }
    }

    tracing::debug!(
        book = %path.display(),
        fingerprint = %target,
        records = len / RECORD_SIZE as u64,
        matches = matches.len(),
        "scanned book"
    );

    Ok(matches)
}

/// Records for `target` in the book called `name` under `book_dir`
pub fn lookup(book_dir: &Path, name: &str, target: Fingerprint) -> BookResult<Vec<BookRecord>> {
    find_records(&book_path(book_dir, name)?, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn record(key: u64, mv: u16, weight: u16) -> BookRecord {
        BookRecord {
            fingerprint: Fingerprint(key),
            mv,
            weight,
            learn: 0,
        }
    }

    fn write_book(dir: &Path, name: &str, records: &[BookRecord]) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        for r in records {
            file.write_all(&r.to_bytes()).unwrap();
        }
        path
    }

    #[test]
    fn test_record_layout_is_big_endian() {
        let r = BookRecord {
            fingerprint: Fingerprint(0x0102030405060708),
            mv: 0x090a,
            weight: 0x0b0c,
            learn: 0x0d0e0f10,
        };
        let bytes = r.to_bytes();
        assert_eq!(bytes, [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]);
        assert_eq!(BookRecord::from_bytes(&bytes), r);
    }

    #[test]
    fn test_parse_records_rejects_partial_record() {
        let err = parse_records(&[0u8; 17]).unwrap_err();
        assert!(matches!(err, BookError::Format { len: 17, .. }));
        assert!(parse_records(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_find_records_returns_all_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_book(
            dir.path(),
            "test.bin",
            &[record(1, 10, 5), record(2, 20, 5), record(2, 21, 0), record(3, 30, 1)],
        );

        let found = find_records(&path, Fingerprint(2)).unwrap();
        assert_eq!(found.len(), 2, "Both records for the key should be returned");
        assert_eq!(found[0].mv, 20);
        assert_eq!(found[1].mv, 21);

        assert!(find_records(&path, Fingerprint(99)).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_book_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.bin");
        std::fs::write(&path, [0u8; 40]).unwrap();

        let err = find_records(&path, Fingerprint(0)).unwrap_err();
        assert!(matches!(err, BookError::Format { len: 40, .. }));
    }

    #[test]
    fn test_missing_book_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = lookup(dir.path(), "absent.bin", Fingerprint(0)).unwrap_err();
        assert!(matches!(err, BookError::Io { .. }));
    }

    #[test]
    fn test_book_path_rejects_escaping_names() {
        let dir = Path::new("/books");
        assert!(book_path(dir, "Strong.bin").is_ok());
        for bad in ["", "../secret.bin", "/etc/passwd", "a/../../b.bin"] {
            assert!(
                matches!(book_path(dir, bad), Err(BookError::InvalidBookName { .. })),
                "{bad:?} should be rejected"
            );
        }
    }
}
