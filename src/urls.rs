//! Download URLs and the file hashes inside them
//!
//! A download URL is `<prefix><hash>?o=<object>`. The prefix either ends
//! in a path (`https://cdn/files/`) or in a query parameter
//! (`/download?b=img&f=`); in the second case the object joins with `&`.
//! Callers store bare hashes and hand URLs to clients; these helpers go
//! both ways.

use url::Url;

use crate::digest::{check_hash, is_hash};
use crate::error::{Result, StorageError};

/// `prefix + hash + "?o=" + object`
pub fn download_url(prefix: &str, object: &str, hash: &str) -> String {
    let sep = if prefix.contains('?') { '&' } else { '?' };
    format!("{}{}{}o={}", prefix, hash, sep, object)
}

pub fn download_urls<S: AsRef<str>>(prefix: &str, object: &str, hashes: &[S]) -> Vec<String> {
    hashes
        .iter()
        .map(|hash| download_url(prefix, object, hash.as_ref()))
        .collect()
}

/// File hash from a bare hash or a download URL. Empty input yields
/// `None`; anything else must contain a valid hash.
pub fn file_hash(s: &str) -> Result<Option<String>> {
    if s.is_empty() {
        return Ok(None);
    }
    if is_hash(s) {
        return Ok(Some(s.to_string()));
    }
    let hash = hash_in_url(s).unwrap_or_default();
    check_hash(&[&hash])?;
    Ok(Some(hash))
}

/// Like [`file_hash`], but anything without a valid hash yields `None`.
pub fn try_file_hash(s: &str) -> Option<String> {
    if is_hash(s) {
        return Some(s.to_string());
    }
    hash_in_url(s).filter(|hash| is_hash(hash))
}

/// [`file_hash`] over a list, failing on the first invalid entry. Empty
/// entries are dropped.
pub fn file_hashes<S: AsRef<str>>(items: &[S]) -> Result<Vec<String>> {
    let mut hashes = Vec::with_capacity(items.len());
    for item in items {
        if let Some(hash) = file_hash(item.as_ref())? {
            hashes.push(hash);
        }
    }
    Ok(hashes)
}

/// The `f` query parameter of `s`, or else its last path segment when that
/// is a hash. `s` may be absolute or relative (`/download?f=...`).
fn hash_in_url(s: &str) -> Option<String> {
    let base = Url::parse("http://localhost/").ok()?;
    let url = Url::options().base_url(Some(&base)).parse(s).ok()?;
    if let Some((_, value)) = url.query_pairs().find(|(key, _)| key == "f") {
        return Some(value.into_owned());
    }
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| is_hash(segment))
        .map(str::to_string)
}

/// Check that `prefix` can start a download URL.
pub fn check_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() || prefix.starts_with('/') {
        return Ok(());
    }
    Url::parse(prefix)
        .map(|_| ())
        .map_err(|e| StorageError::Config(format!("invalid download url prefix {:?}: {}", prefix, e)))
}
