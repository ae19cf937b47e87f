//! File naming within a store directory.

use std::path::{Path, PathBuf};

/// `<dir>/<number>.log`, a write-ahead log.
pub fn log_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.log"))
}

/// `<dir>/<number>.sst`, a sorted table file.
pub fn table_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.sst"))
}

/// Parses `<number>.log`, if that is what `name` is. Numbers are padded
/// to six digits but may grow wider.
pub fn parse_log_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(".log")?;
    if stem.len() < 6 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_names_roundtrip() {
        let dir = Path::new("/store");
        let path = log_file_name(dir, 42);
        assert_eq!(path, Path::new("/store/000042.log"));
        assert_eq!(
            parse_log_file_name(path.file_name().unwrap().to_str().unwrap()),
            Some(42)
        );
    }

    #[test]
    fn parse_rejects_non_log_names() {
        assert_eq!(parse_log_file_name("000001.sst"), None);
        assert_eq!(parse_log_file_name("CURRENT"), None);
        assert_eq!(parse_log_file_name("12.log"), None);
        assert_eq!(parse_log_file_name("abcdef.log"), None);
    }
}
