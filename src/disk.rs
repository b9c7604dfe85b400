//! Local file placement: exclusive writes and pruning deletes

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Result, StorageError};

/// Write `content` to `dest` unless a file is already there.
///
/// Bytes are staged in a temp file beside `dest` and published with a
/// no-clobber rename, so `dest` never exists half-written. Returns `false`
/// when another writer got there first.
pub fn write_new<R: Read + ?Sized>(dest: &Path, content: &mut R) -> Result<bool> {
    if dest.exists() {
        return Ok(false);
    }
    let dir = dest
        .parent()
        .ok_or_else(|| StorageError::Internal(format!("no parent directory: {}", dest.display())))?;

    let mut staged = stage_in(dir)?;
    io::copy(content, staged.as_file_mut())?;
    staged.as_file().sync_all()?;

    match staged.persist_noclobber(dest) {
        Ok(_) => {
            debug!(path = %dest.display(), "Wrote file");
            Ok(true)
        }
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(StorageError::Persist {
            path: dest.to_path_buf(),
            source: e.error,
        }),
    }
}

/// Create a temp file in `dir`, creating `dir` first. A concurrent cleanup
/// may prune the freshly created directory, so creation is retried once.
fn stage_in(dir: &Path) -> Result<NamedTempFile> {
    let mut attempt = 0;
    loop {
        fs::create_dir_all(dir)?;
        match tempfile::Builder::new().prefix(".fs_").tempfile_in(dir) {
            Ok(file) => return Ok(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound && attempt == 0 => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Remove `path` and then every ancestor directory that became empty,
/// stopping at `root` (which is never removed) or at the first directory
/// that still has entries. A missing file is not an error.
pub fn remove_and_prune(root: &Path, path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mut dir = path.parent();
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) {
            break;
        }
        if !is_empty_dir(current)? {
            break;
        }
        match fs::remove_dir(current) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            // a writer put something in it since the check
            Err(_) if !is_empty_dir(current)? => break,
            Err(e) => return Err(e.into()),
        }
        dir = current.parent();
    }
    Ok(())
}

fn is_empty_dir(dir: &Path) -> Result<bool> {
    match fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_write_new_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("a/b/c/file");

        assert!(write_new(&dest, &mut Cursor::new(b"first".to_vec())).unwrap());
        assert!(!write_new(&dest, &mut Cursor::new(b"second".to_vec())).unwrap());
        assert_eq!(fs::read(&dest).unwrap(), b"first");

        // no staging leftovers
        let names: Vec<_> = fs::read_dir(dest.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("file")]);
    }

    #[test]
    fn test_remove_and_prune() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let kept = root.join("a/x/keep");
        let gone = root.join("a/b/c/gone");
        write_new(&kept, &mut Cursor::new(b"k".to_vec())).unwrap();
        write_new(&gone, &mut Cursor::new(b"g".to_vec())).unwrap();

        remove_and_prune(root, &gone).unwrap();
        assert!(!root.join("a/b").exists());
        assert!(root.join("a/x/keep").exists());

        remove_and_prune(root, &kept).unwrap();
        assert!(!root.join("a").exists());
        assert!(root.exists());

        // already gone
        remove_and_prune(root, &kept).unwrap();
    }
}
