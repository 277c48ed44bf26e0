//! Zip-level access shared by the archive analyzers: memory-mapped opening,
//! prefix probes and extraction into a work area.

use memmap2::Mmap;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::ZipArchive;
use zip::read::ZipFile;

use crate::analyzer::CancelToken;
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;

/// A zip archive mapped into memory for the duration of one analysis.
#[derive(Debug)]
pub struct MappedArchive {
    path: PathBuf,
    mmap: Mmap,
}

impl MappedArchive {
    pub fn open(path: &Path) -> Result<Self, AnalysisError> {
        let file = File::open(path).map_err(|e| AnalysisError::io(path, e))?;
        // SAFETY: The file is opened read-only and the mapping is owned by
        // this value, which callers drop before the archive is touched again.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| AnalysisError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn zip(&self) -> Result<ZipArchive<Cursor<&[u8]>>, AnalysisError> {
        ZipArchive::new(Cursor::new(&self.mmap[..])).map_err(|e| AnalysisError::archive(&self.path, e))
    }
}

/// Whether any entry of the zip at `path` starts with `prefix`.
pub fn has_entry_prefix(path: &Path, prefix: &str) -> Result<bool, AnalysisError> {
    let mapped = MappedArchive::open(path)?;
    let archive = mapped.zip()?;
    let found = archive.file_names().any(|name| name.starts_with(prefix));
    Ok(found)
}

/// Most bytes reserved up front from the size an entry header declares.
const PREALLOC_LIMIT: u64 = 1 << 20;

/// Entries that inflate beyond this are rejected instead of buffered.
pub const MAX_ENTRY_BYTES: u64 = 1 << 30;

/// Reads one entry into memory. The declared size is untrusted: it only
/// sizes the initial buffer, and the read itself stops at `MAX_ENTRY_BYTES`.
pub fn read_entry(entry: &mut ZipFile<'_>, archive: &Path) -> Result<Vec<u8>, AnalysisError> {
    let location = entry_path(archive, entry.name());
    let mut bytes = Vec::with_capacity(entry.size().min(PREALLOC_LIMIT) as usize);
    entry
        .by_ref()
        .take(MAX_ENTRY_BYTES + 1)
        .read_to_end(&mut bytes)
        .map_err(|e| AnalysisError::io(&location, e))?;
    if bytes.len() as u64 > MAX_ENTRY_BYTES {
        return Err(AnalysisError::io(
            &location,
            io::Error::new(io::ErrorKind::InvalidData, "entry exceeds the size limit"),
        ));
    }
    Ok(bytes)
}

/// Display path of an archive member: `<archive>!/<entry>`.
pub fn entry_path(archive: &Path, entry: &str) -> PathBuf {
    PathBuf::from(format!("{}!/{entry}", archive.display()))
}

/// Directory an archive is unpacked into. A temporary directory is removed
/// when this value is dropped; a configured work dir is left in place.
#[derive(Debug)]
pub struct Extraction {
    root: PathBuf,
    _temp: Option<TempDir>,
}

impl Extraction {
    pub fn prepare(
        config: &AnalysisConfig,
        archive: &Path,
        digest: &str,
    ) -> Result<Self, AnalysisError> {
        if let Some(root) = config.extraction_dir(archive, digest) {
            fs::create_dir_all(&root).map_err(|e| AnalysisError::io(&root, e))?;
            return Ok(Self { root, _temp: None });
        }
        let temp = tempfile::Builder::new()
            .prefix("construct-scan-")
            .tempdir()
            .map_err(|e| AnalysisError::io(archive, e))?;
        Ok(Self {
            root: temp.path().to_path_buf(),
            _temp: Some(temp),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Unpacks every file entry of `archive` below `dest`, returning the number
/// of files written. Entries whose names would escape `dest` are skipped.
pub fn extract_zip(
    archive: &Path,
    dest: &Path,
    cancel: &CancelToken,
) -> Result<usize, AnalysisError> {
    let mapped = MappedArchive::open(archive)?;
    let mut zip = mapped.zip()?;
    let mut written = 0;

    for i in 0..zip.len() {
        cancel.check(archive)?;
        let mut entry = zip
            .by_index(i)
            .map_err(|e| AnalysisError::archive(archive, e))?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            tracing::warn!(
                archive = %archive.display(),
                entry = entry.name(),
                "skipping entry outside of the extraction directory"
            );
            continue;
        };
        let target = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| AnalysisError::io(&target, e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| AnalysisError::io(parent, e))?;
        }
        let mut out = File::create(&target).map_err(|e| AnalysisError::io(&target, e))?;
        io::copy(&mut entry, &mut out).map_err(|e| AnalysisError::io(&target, e))?;
        written += 1;
    }

    tracing::debug!(archive = %archive.display(), dest = %dest.display(), files = written, "extracted");
    Ok(written)
}
