use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};

use anyhow::{Context, Result};
use rand::{Rng, seq::SliceRandom};
use serde::Deserialize;
use serde_json::Value;

use crate::mood::Mood;

/// Returned when no scripted phrase exists at all.
pub const NO_PHRASE: &str = "...";

#[derive(Deserialize)]
struct PhraseFile {
    #[serde(rename = "NPC_dialog", default)]
    npc_dialog: HashMap<String, BTreeMap<String, BTreeMap<String, Value>>>,
}

/// Scripted, non-AI lines keyed by NPC and mood.
#[derive(Debug, Clone, Default)]
pub struct PhraseBook {
    phrases: HashMap<String, HashMap<Mood, Vec<String>>>,
}

impl PhraseBook {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read phrase file {:?}", path))?;
        Self::from_json(&raw).with_context(|| format!("Invalid phrase file {:?}", path))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: PhraseFile = serde_json::from_str(raw)?;
        let mut book = Self::default();
        for (npc, moods) in file.npc_dialog {
            for (mood_name, entries) in moods {
                let mood = match mood_name.parse::<Mood>() {
                    Ok(mood) => mood,
                    Err(err) => {
                        tracing::warn!(%npc, %err, "Ignoring phrases for unknown mood");
                        continue;
                    }
                };
                let lines = entries
                    .into_values()
                    .filter_map(|v| v.as_str().map(str::to_string));
                book.insert_all(&npc, mood, lines);
            }
        }
        Ok(book)
    }

    pub fn insert_all(
        &mut self,
        npc: &str,
        mood: Mood,
        lines: impl IntoIterator<Item = String>,
    ) {
        self.phrases
            .entry(npc.to_string())
            .or_default()
            .entry(mood)
            .or_default()
            .extend(lines);
    }

    /// A random phrase for `npc` in `mood`, falling back to the neutral list and then to
    /// [`NO_PHRASE`].
    pub fn random_phrase<R: Rng + ?Sized>(&self, npc: &str, mood: Mood, rng: &mut R) -> String {
        let Some(moods) = self.phrases.get(npc) else {
            return NO_PHRASE.to_string();
        };
        moods
            .get(&mood)
            .filter(|lines| !lines.is_empty())
            .or_else(|| moods.get(&Mood::Neutral))
            .and_then(|lines| lines.choose(rng))
            .cloned()
            .unwrap_or_else(|| NO_PHRASE.to_string())
    }

    /// Moods with at least one scripted line for `npc`, in canonical order.
    pub fn available_moods(&self, npc: &str) -> Vec<Mood> {
        let Some(moods) = self.phrases.get(npc) else {
            return Vec::new();
        };
        Mood::ALL
            .into_iter()
            .filter(|m| moods.get(m).is_some_and(|lines| !lines.is_empty()))
            .collect()
    }
}
