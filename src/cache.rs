//! Per-store copies of the files individuals were ingested from.
//!
//! Every accepted file is copied to `<storage>/vcf/.<id><suffix>.incoming`,
//! ingested from there, and renamed to `<id><suffix>` once the backend has
//! committed. A failed ingestion leaves the previous copy in place, so the
//! cached file always matches what is stored.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{Result, VariantStoreError};
use crate::header::InputFormat;

pub const CACHE_DIR: &str = "vcf";

const SUFFIXES: [&str; 5] = [".vcf.gz", ".bcf", ".vcf", ".tsv", ".csv"];
const STAGING_SUFFIX: &str = ".incoming";

/// Reject ids that cannot be used as a single file name.
pub fn check_id(id: &str) -> Result<()> {
    let bad = id.is_empty()
        || id.starts_with('.')
        || id.contains(&['/', '\\'][..])
        || id.chars().any(char::is_control);
    if bad {
        return Err(VariantStoreError::InvalidIndividual(id.to_string()));
    }
    Ok(())
}

fn suffix_for(format: InputFormat, source: &Path) -> &'static str {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    SUFFIXES
        .iter()
        .copied()
        .find(|s| name.ends_with(s))
        .unwrap_or(match format {
            InputFormat::ExomiserTsv => ".tsv",
            InputFormat::FlatCsv => ".csv",
            InputFormat::Vcf => ".vcf",
        })
}

/// A copy waiting for its ingestion to finish.
#[derive(Debug)]
pub struct Staged {
    id: String,
    staged: PathBuf,
    target: PathBuf,
}

impl Staged {
    pub fn path(&self) -> &Path {
        &self.staged
    }
}

#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileCache { dir: dir.into() }
    }

    pub fn provision(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| VariantStoreError::provisioning(&self.dir, e.to_string()))
    }

    /// Copy `source` next to the cached files of `id`.
    pub fn stage(&self, id: &str, format: InputFormat, source: &Path) -> Result<Staged> {
        let suffix = suffix_for(format, source);
        let staged = self.dir.join(format!(".{}{}{}", id, suffix, STAGING_SUFFIX));
        let target = self.dir.join(format!("{}{}", id, suffix));
        let bytes = fs::copy(source, &staged)?;
        debug!("staged {} ({} bytes) as {}", source.display(), bytes, staged.display());
        Ok(Staged {
            id: id.to_string(),
            staged,
            target,
        })
    }

    /// Replace whatever was cached for the id with the staged copy.
    pub fn commit(&self, staged: Staged) -> Result<PathBuf> {
        self.remove(&staged.id)?;
        fs::rename(&staged.staged, &staged.target)?;
        Ok(staged.target)
    }

    pub fn discard(&self, staged: Staged) {
        if let Err(e) = fs::remove_file(&staged.staged) {
            warn!("could not remove {}: {}", staged.staged.display(), e);
        }
    }

    /// The cached file of `id`, if any.
    pub fn get(&self, id: &str) -> Option<PathBuf> {
        SUFFIXES
            .iter()
            .map(|s| self.dir.join(format!("{}{}", id, s)))
            .find(|p| p.is_file())
    }

    /// Delete the cached file of `id`. Returns whether one existed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut removed = false;
        while let Some(path) = self.get(id) {
            fs::remove_file(&path)?;
            removed = true;
        }
        Ok(removed)
    }
}
