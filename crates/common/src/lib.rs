use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use ahash::RandomState;
use anyhow::Context;

pub mod cli;

/// IndexMap using AHash hasher
pub type IndexMap<K, V> = indexmap::IndexMap<K, V, RandomState>;

/// Write file contents to a sibling temporary file, then rename it over
/// `path`, so that readers never observe a partially written file.
pub fn write_file_atomically(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("path {} has no file name", path.display()))?;

    let mut tmp_file_name = file_name.to_os_string();
    tmp_file_name.push(".tmp");

    let tmp_path = path.with_file_name(tmp_file_name);

    {
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("create temporary file {}", tmp_path.display()))?;

        file.write_all(contents)
            .with_context(|| format!("write temporary file {}", tmp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("sync temporary file {}", tmp_path.display()))?;
    }

    fs::rename(&tmp_path, path)
        .with_context(|| format!("rename {} to {}", tmp_path.display(), path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_file_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("list.txt");

        write_file_atomically(&path, b"first\n").unwrap();
        write_file_atomically(&path, b"second\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second\n");
        assert!(!path.with_file_name("list.txt.tmp").exists());
    }
}
