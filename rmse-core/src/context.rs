use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ContextKey {
    Items,
    Armors,
    Weapons,
    Variables,
    Actors,
    Classes,
}

impl ContextKey {
    pub const ALL: [ContextKey; 6] = [
        ContextKey::Items,
        ContextKey::Armors,
        ContextKey::Weapons,
        ContextKey::Variables,
        ContextKey::Actors,
        ContextKey::Classes,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ContextKey::Items => "items",
            ContextKey::Armors => "armors",
            ContextKey::Weapons => "weapons",
            ContextKey::Variables => "variables",
            ContextKey::Actors => "actors",
            ContextKey::Classes => "classes",
        }
    }

    // Variable names live in System.json.
    pub fn file_name(self) -> &'static str {
        match self {
            ContextKey::Items => "Items.json",
            ContextKey::Armors => "Armors.json",
            ContextKey::Weapons => "Weapons.json",
            ContextKey::Variables => "System.json",
            ContextKey::Actors => "Actors.json",
            ContextKey::Classes => "Classes.json",
        }
    }
}

/// Raw JSON text of each reference table that could be read.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReferenceContext {
    pub data_dir: Option<PathBuf>,
    pub items: Option<String>,
    pub armors: Option<String>,
    pub weapons: Option<String>,
    pub variables: Option<String>,
    pub actors: Option<String>,
    pub classes: Option<String>,
}

impl ReferenceContext {
    pub fn get(&self, key: ContextKey) -> Option<&str> {
        self.slot(key).as_deref()
    }

    fn slot(&self, key: ContextKey) -> &Option<String> {
        match key {
            ContextKey::Items => &self.items,
            ContextKey::Armors => &self.armors,
            ContextKey::Weapons => &self.weapons,
            ContextKey::Variables => &self.variables,
            ContextKey::Actors => &self.actors,
            ContextKey::Classes => &self.classes,
        }
    }

    fn slot_mut(&mut self, key: ContextKey) -> &mut Option<String> {
        match key {
            ContextKey::Items => &mut self.items,
            ContextKey::Armors => &mut self.armors,
            ContextKey::Weapons => &mut self.weapons,
            ContextKey::Variables => &mut self.variables,
            ContextKey::Actors => &mut self.actors,
            ContextKey::Classes => &mut self.classes,
        }
    }

    pub fn present_keys(&self) -> Vec<ContextKey> {
        ContextKey::ALL
            .into_iter()
            .filter(|key| self.slot(*key).is_some())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.present_keys().is_empty()
    }
}

pub struct ContextLoader;

impl ContextLoader {
    /// Loads whatever reference tables exist for `save_path`.
    ///
    /// The data directory is `../data` relative to the save directory,
    /// falling back to `www/data` and then `data` under `root`. Missing
    /// tables are left empty; nothing here fails.
    pub fn load(root: &Path, save_path: &Path) -> ReferenceContext {
        let Some(data_dir) = Self::data_dir(root, save_path) else {
            log::warn!("could not find data dir for {}", save_path.display());
            return ReferenceContext::default();
        };

        let mut context = ReferenceContext {
            data_dir: Some(data_dir.clone()),
            ..ReferenceContext::default()
        };
        for key in ContextKey::ALL {
            let path = data_dir.join(key.file_name());
            match fs::read_to_string(&path) {
                Ok(text) => *context.slot_mut(key) = Some(text),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    log::debug!("no {} table at {}", key.name(), path.display());
                }
                Err(e) => {
                    log::warn!("failed to read context file {}: {e}", path.display());
                }
            }
        }
        context
    }

    fn data_dir(root: &Path, save_path: &Path) -> Option<PathBuf> {
        let main_dir = save_path.parent().and_then(Path::parent);
        let candidates = main_dir
            .map(|dir| dir.join("data"))
            .into_iter()
            .chain([root.join("www").join("data"), root.join("data")]);

        for candidate in candidates {
            if candidate.is_dir() {
                return Some(candidate);
            }
        }
        None
    }
}
