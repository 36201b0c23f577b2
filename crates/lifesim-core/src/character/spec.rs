use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Static character sheet. Loaded once per NPC name and never modified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterProfile {
    #[serde(default, alias = "Name")]
    pub name: String,
    #[serde(default, alias = "Appearance")]
    pub appearance: String,
    #[serde(default, alias = "Backstory")]
    pub backstory: String,
    #[serde(default, alias = "Personality")]
    pub personality: String,
    #[serde(default, alias = "Likes_Dislikes", alias = "likesDislikes")]
    pub likes_dislikes: String,
}

impl CharacterProfile {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read character sheet {:?}", path))?;
        let profile: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid character sheet {:?}", path))?;
        Ok(profile)
    }

    pub fn sheet_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}_Character_sheet.json"))
    }

    pub fn demo() -> Self {
        Self {
            name: "Boogie".into(),
            appearance: "A small round creature with a tuft of orange hair and oversized boots."
                .into(),
            backstory: "Boogie wandered into the house one rainy night and never left. Nobody \
                        is quite sure where they came from."
                .into(),
            personality: "Curious, a little mischievous, easily flustered by compliments.".into(),
            likes_dislikes: "Likes: warm soup, puzzles, guessing games. Dislikes: thunder, \
                             being rushed."
                .into(),
        }
    }
}

/// Name-keyed cache of character sheets read from a directory.
pub struct CharacterRegistry {
    dir: PathBuf,
    loaded: HashMap<String, Option<Arc<CharacterProfile>>>,
}

impl CharacterRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaded: HashMap::new(),
        }
    }

    /// Registry preloaded with in-memory profiles; nothing is read from disk for these names.
    pub fn with_profiles(profiles: impl IntoIterator<Item = CharacterProfile>) -> Self {
        let mut registry = Self::new(PathBuf::new());
        for profile in profiles {
            registry
                .loaded
                .insert(profile.name.clone(), Some(Arc::new(profile)));
        }
        registry
    }

    /// Look up a profile, reading its sheet on first request. A missing or broken sheet is
    /// remembered as absent so the file is not retried.
    pub fn load(&mut self, name: &str) -> Option<Arc<CharacterProfile>> {
        if let Some(cached) = self.loaded.get(name) {
            return cached.clone();
        }

        let path = CharacterProfile::sheet_path(&self.dir, name);
        let profile = if path.exists() {
            match CharacterProfile::from_file(&path) {
                Ok(profile) => {
                    tracing::info!(npc = %name, "Loaded character sheet");
                    Some(Arc::new(profile))
                }
                Err(err) => {
                    tracing::warn!(?err, npc = %name, "Skipping character sheet");
                    None
                }
            }
        } else {
            tracing::warn!(npc = %name, "Character sheet not found at {:?}", path);
            None
        };

        self.loaded.insert(name.to_string(), profile.clone());
        profile
    }
}
