//! CRC32 line framing for on-disk state
//!
//! Both the migration ledger and the catalog snapshot are stored as text lines of
//! the form `<crc32_hex>:<json>`. A line whose checksum does not match its payload
//! is reported as corrupted instead of being silently replayed.

use crc32fast::Hasher as Crc32Hasher;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::migration::{MigrationError, MigrationResult};

/// Calculate CRC32 checksum for data
#[inline]
pub fn calculate_crc32(data: &[u8]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Prefix a JSON payload with its CRC32 checksum
#[inline]
pub fn format_line_with_crc32(json: &str) -> String {
    let crc = calculate_crc32(json.as_bytes());
    format!("{:08x}:{}", crc, json)
}

/// Split a framed line and check its checksum, returning the JSON payload
pub fn parse_and_validate_line(line: &str) -> Result<&str, String> {
    if line.len() <= 9 || line.as_bytes()[8] != b':' {
        return Err(format!("missing CRC32 prefix in line '{}'", truncate(line)));
    }
    let (crc_hex, rest) = line.split_at(8);
    let json = &rest[1..];

    let expected = u32::from_str_radix(crc_hex, 16)
        .map_err(|_| format!("invalid CRC32 hex: {}", crc_hex))?;
    let actual = calculate_crc32(json.as_bytes());
    if expected != actual {
        return Err(format!(
            "CRC32 mismatch: expected {:08x}, got {:08x} - data corrupted",
            expected, actual
        ));
    }
    Ok(json)
}

fn truncate(line: &str) -> &str {
    match line.char_indices().nth(40) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

/// Replace `path` with `content` via a temporary sibling and a rename
pub fn write_atomically(path: &Path, content: &str, fsync: bool) -> MigrationResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.flush()?;
        if fsync {
            file.sync_all()?;
        }
    }
    fs::rename(&tmp, path).map_err(|e| {
        MigrationError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to move {} into place: {}", tmp.display(), e),
        ))
    })
}
