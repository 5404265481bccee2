use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod backup;
pub mod codec;
pub mod context;
pub mod root;

pub use backup::{BackupInfo, BackupManager, MAX_BACKUPS};
pub use codec::{DeflateCodec, FormatCodec, Framing, SaveFormat};
pub use context::{ContextKey, ContextLoader, ReferenceContext};
pub use root::RootLocator;

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("could not find game root directory above {}", .0.display())]
    RootNotFound(PathBuf),
    #[error("could not determine save file format of {}", .0.display())]
    FormatUndetermined(PathBuf),
    #[error("failed to read save file {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to decompress save file {} as {format}: {source}", path.display())]
    Decode {
        path: PathBuf,
        format: SaveFormat,
        source: io::Error,
    },
    #[error("failed to compress save data as {format}: {source}")]
    Encode { format: SaveFormat, source: io::Error },
    #[error("failed to write save file {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("backup file not found: {}", .0.display())]
    BackupNotFound(PathBuf),
    #[error("no backup at index {index} for {}", path.display())]
    NoBackupAtIndex { path: PathBuf, index: usize },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl SaveError {
    pub fn os_code(&self) -> Option<i32> {
        match self {
            SaveError::Read { source, .. }
            | SaveError::Decode { source, .. }
            | SaveError::Encode { source, .. }
            | SaveError::Write { source, .. }
            | SaveError::Io(source) => source.raw_os_error(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SaveError>;

fn join_candidate(base: &Path, candidate: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    for part in candidate.split(['/', '\\']) {
        if !part.is_empty() {
            path.push(part);
        }
    }
    path
}

pub(crate) fn find_first_existing(base: &Path, candidates: &[&str]) -> Option<PathBuf> {
    for candidate in candidates {
        let path = join_candidate(base, candidate);
        if path.exists() {
            return Some(path);
        }
    }
    None
}

/// A decoded save file together with everything needed to write it back.
#[derive(Clone, Debug)]
pub struct LoadedSave {
    pub savefile: PathBuf,
    pub json_txt: String,
    pub rm_root: PathBuf,
    pub context: ReferenceContext,
    codec: FormatCodec,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedFile {
    pub path: PathBuf,
    // None when there was no previous file or the copy failed.
    pub backup: Option<PathBuf>,
}

impl LoadedSave {
    pub fn format(&self) -> SaveFormat {
        self.codec.format()
    }

    /// Writes `json` back to the file it was loaded from, keeping the
    /// framing seen on load.
    pub fn save(&self, json: &str) -> Result<SavedFile> {
        write_save(&self.savefile, json, &self.codec, &BackupManager::default())
    }

    pub fn save_with(&self, json: &str, backups: &BackupManager) -> Result<SavedFile> {
        write_save(&self.savefile, json, &self.codec, backups)
    }

    /// Writes `json` to a different path, encoded for that path.
    pub fn save_as(&self, path: &Path, json: &str) -> Result<SavedFile> {
        save(path, json, &self.rm_root)
    }
}

/// Finds the game root, decodes the save at `path`, and gathers the
/// reference tables needed to label it.
pub fn load(path: &Path) -> Result<LoadedSave> {
    let rm_root =
        RootLocator::locate(path).ok_or_else(|| SaveError::RootNotFound(path.to_path_buf()))?;
    let mut codec = FormatCodec::select(path, &rm_root)?;
    let json_txt = codec.decode(path)?;
    let context = ContextLoader::load(&rm_root, path);

    log::info!(
        "loaded {} ({}, root {})",
        path.display(),
        codec.format(),
        rm_root.display()
    );

    Ok(LoadedSave {
        savefile: path.to_path_buf(),
        json_txt,
        rm_root,
        context,
        codec,
    })
}

/// Encodes `json` for `path` under `rm_root` and writes it, backing up
/// the previous file first.
pub fn save(path: &Path, json: &str, rm_root: &Path) -> Result<SavedFile> {
    save_with(path, json, rm_root, &BackupManager::default())
}

pub fn save_with(
    path: &Path,
    json: &str,
    rm_root: &Path,
    backups: &BackupManager,
) -> Result<SavedFile> {
    let mut codec = FormatCodec::select(path, rm_root)?;

    // No decoded instance to ask, so learn the framing from the file on disk.
    if matches!(codec, FormatCodec::Deflate(_)) && path.exists() {
        if let Err(e) = codec.decode(path) {
            log::debug!("could not read framing of {}: {e}", path.display());
        }
    }

    write_save(path, json, &codec, backups)
}

fn write_save(
    path: &Path,
    json: &str,
    codec: &FormatCodec,
    backups: &BackupManager,
) -> Result<SavedFile> {
    let backup = backups.create_backup(path);
    let data = codec.encode(json)?;

    if let Err(source) = fs::write(path, data) {
        log::error!("error saving file {}: {source}", path.display());
        return Err(SaveError::Write {
            path: path.to_path_buf(),
            source,
        });
    }
    log::info!("saved {} as {}", path.display(), codec.format());

    Ok(SavedFile {
        path: path.to_path_buf(),
        backup,
    })
}

pub fn dump_json(path: &Path, json: &str) -> Result<PathBuf> {
    fs::write(path, json).map_err(|source| SaveError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(path.to_path_buf())
}
