//! Upload checks run on each file before it is catalogued

use crate::error::{Result, StorageError};

/// Signature of an upload check: content type and byte size in, rejection
/// out. Any closure of this shape can be passed to
/// [`Bucket::save`](crate::Bucket::save).
pub type Check<'a> = &'a (dyn Fn(&str, u64) -> Result<()> + Sync);

/// Default size limit of [`ImagePolicy`]
pub const DEFAULT_MAX_IMAGE_SIZE: u64 = 2 * 1024 * 1024;

/// Accepts only images no larger than `max_size` bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePolicy {
    pub max_size: u64,
}

impl ImagePolicy {
    pub fn new(max_size: u64) -> Self {
        Self { max_size }
    }

    pub fn check(&self, content_type: &str, size: u64) -> Result<()> {
        if !content_type.starts_with("image/") {
            return Err(StorageError::rejected(
                "file type is not an image.",
                content_type,
            ));
        }
        let max_size = if self.max_size == 0 {
            DEFAULT_MAX_IMAGE_SIZE
        } else {
            self.max_size
        };
        if size > max_size {
            return Err(StorageError::rejected(
                format!("file size can't exceed {}.", format_iec(max_size)),
                size.to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ImagePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IMAGE_SIZE)
    }
}

/// Format a byte count with binary units: `2 MiB`, `1.5 KiB`, `300 B`.
pub fn format_iec(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 || value.fract() == 0.0 {
        format!("{} {}", value as u64, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
