use std::path::{Path, PathBuf};

use crate::find_first_existing;

// Launcher and NW.js runtime files that sit at the top of a deployed game.
const ROOT_MARKERS: &[&str] = &["Game", "Game.exe", "nw", "nw.exe"];

// Reference data always ships a System.json under data/.
const DATA_MARKERS: &[&str] = &["data/System.json"];

// Older layouts keep the whole game one level down, inside www/.
const WEB_ASSETS_DIR: &str = "www";

pub struct RootLocator;

impl RootLocator {
    /// Walks upward from `start` until a directory carrying a root marker is
    /// found. `start` may be a save file or a directory; a file starts the
    /// walk at its parent.
    ///
    /// Returns `None` once the filesystem root has been checked without a
    /// match. Never writes anything.
    pub fn locate(start: &Path) -> Option<PathBuf> {
        let start = std::path::absolute(start).unwrap_or_else(|_| start.to_path_buf());
        let mut dir = if start.is_dir() {
            start
        } else {
            start.parent()?.to_path_buf()
        };

        loop {
            if Self::is_root(&dir) {
                log::debug!("found game root candidate {}", dir.display());
                return Some(Self::normalize(dir));
            }

            let up = match dir.parent() {
                Some(up) if up != dir => up.to_path_buf(),
                _ => return None,
            };
            dir = up;
        }
    }

    fn is_root(dir: &Path) -> bool {
        find_first_existing(dir, ROOT_MARKERS).is_some()
            || find_first_existing(dir, DATA_MARKERS).is_some()
    }

    // A match on www/ itself means the real root is its parent.
    fn normalize(dir: PathBuf) -> PathBuf {
        let is_web_assets = dir
            .file_name()
            .map_or(false, |name| name == WEB_ASSETS_DIR);
        match dir.parent() {
            Some(parent) if is_web_assets => parent.to_path_buf(),
            _ => dir,
        }
    }
}
