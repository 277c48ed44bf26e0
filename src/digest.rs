use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use sha2::{Digest, Sha256};

use crate::error::AnalysisError;

pub fn hash_content(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let digest = hasher.finalize();
    hex::encode(digest)
}

/// Lowercase hex SHA-256 of the file at `path`.
pub fn digest_file(path: &Path) -> Result<String, AnalysisError> {
    let file = File::open(path).map_err(|e| AnalysisError::io(path, e))?;
    let len = file.metadata().map_err(|e| AnalysisError::io(path, e))?.len();
    if len == 0 {
        return Ok(hash_content(&[]));
    }
    // SAFETY: The file is opened read-only and the mapping does not outlive this call.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| AnalysisError::io(path, e))?;
    Ok(hash_content(&mmap[..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_content_is_lowercase_hex_sha256() {
        assert_eq!(
            hash_content(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn digest_file_matches_in_memory_hash() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("lib.jar");
        std::fs::write(&path, b"not really a jar")?;
        assert_eq!(digest_file(&path)?, hash_content(b"not really a jar"));

        let empty = dir.path().join("empty.jar");
        std::fs::write(&empty, b"")?;
        assert_eq!(digest_file(&empty)?, hash_content(b""));

        let missing = digest_file(&dir.path().join("missing.jar")).unwrap_err();
        assert!(matches!(missing, AnalysisError::Io { .. }));
        Ok(())
    }
}
