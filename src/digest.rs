//! Content addressing
//!
//! A file's address is the SHA-256 of its bytes, encoded as 43 characters of
//! URL-safe base64 without padding. Every API that accepts a file hash
//! checks this shape before touching the catalog.

use std::io::{self, Read, Seek, SeekFrom};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::{Result, StorageError};
use crate::sniff::{detect_content_type, SNIFF_LEN};

/// Length of an encoded file hash.
pub const HASH_LEN: usize = 43;

/// What the store learns about a file before cataloguing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    pub content_type: String,
    pub hash: String,
    /// Number of bytes hashed.
    pub size: u64,
}

/// Returns whether `s` has the shape of a file hash.
pub fn is_hash(s: &str) -> bool {
    s.len() == HASH_LEN
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Fails with [`StorageError::InvalidHash`] on the first malformed hash.
pub fn check_hash<S: AsRef<str>>(hashes: &[S]) -> Result<()> {
    match hashes.iter().find(|h| !is_hash(h.as_ref())) {
        Some(bad) => Err(StorageError::InvalidHash(bad.as_ref().to_string())),
        None => Ok(()),
    }
}

/// Encode the SHA-256 of `data`.
pub fn compute_hash(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(data))
}

/// Sniff the content type from the first bytes of `file`, then hash the
/// whole stream. The stream is rewound after each pass, so the caller can
/// read it again to persist it.
pub fn inspect<R: Read + Seek + ?Sized>(file: &mut R) -> Result<Inspection> {
    let content_type = content_type(file)?;
    let (hash, size) = content_hash(file)?;
    Ok(Inspection {
        content_type: content_type.to_string(),
        hash,
        size,
    })
}

fn content_type<R: Read + Seek + ?Sized>(file: &mut R) -> Result<&'static str> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    (&mut *file).take(SNIFF_LEN as u64).read_to_end(&mut head)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(detect_content_type(&head))
}

fn content_hash<R: Read + Seek + ?Sized>(file: &mut R) -> Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let size = io::copy(file, &mut hasher)?;
    file.seek(SeekFrom::Start(0))?;
    Ok((URL_SAFE_NO_PAD.encode(hasher.finalize()), size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn test_known_hashes() {
        assert_eq!(compute_hash(b"1.jpg"), "TEaLOxaZn9lXgYlXbV93DLShatn8oOeYolHwClSofF0");
        assert_eq!(compute_hash(b"2.txt"), "HEbi8PV2cRPf8QeB8lesh6gWPAmiAda7xGarbjAv8v4");
    }

    #[test]
    fn test_inspect_rewinds() {
        let mut file = Cursor::new(b"\x89PNG\r\n\x1a\nrest of image".to_vec());
        let first = inspect(&mut file).unwrap();
        assert_eq!(first.content_type, "image/png");
        assert_eq!(first.size, 21);
        assert_eq!(file.position(), 0);

        let mut again = Vec::new();
        file.read_to_end(&mut again).unwrap();
        assert_eq!(compute_hash(&again), first.hash);
    }

    #[test]
    fn test_hash_shape() {
        assert!(is_hash("TEaLOxaZn9lXgYlXbV93DLShatn8oOeYolHwClSofF0"));
        assert!(!is_hash("TEaLOxaZn9lXgYlXbV93DLShatn8oOeYolHwClSofF"));
        assert!(!is_hash("TEaLOxaZn9lXgYlXbV93DLShatn8oOeYolHwClSof+0"));
        assert!(!is_hash(""));

        let err = check_hash(&["TEaLOxaZn9lXgYlXbV93DLShatn8oOeYolHwClSofF0", "bad"]).unwrap_err();
        assert!(matches!(err, StorageError::InvalidHash(h) if h == "bad"));
    }

    proptest! {
        #[test]
        fn test_digest_matches_sha256(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let inspected = inspect(&mut Cursor::new(data.clone())).unwrap();
            prop_assert_eq!(inspected.hash.len(), HASH_LEN);
            prop_assert!(is_hash(&inspected.hash));
            prop_assert_eq!(inspected.hash, URL_SAFE_NO_PAD.encode(Sha256::digest(&data)));
            prop_assert_eq!(inspected.size, data.len() as u64);
        }
    }
}
