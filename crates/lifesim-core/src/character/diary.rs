use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::{Turn, format_turns};

pub const FALLBACK_TITLE: &str = "Diary Entry";
pub const FALLBACK_CONTENT: &str = "Could not generate structured diary entry.";
pub const OFFLINE_TITLE: &str = "System";
pub const OFFLINE_CONTENT: &str = "AI Offline. Cannot generate diary.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiaryEntry {
    pub created: DateTime<Utc>,
    pub title: String,
    pub content: String,
}

impl DiaryEntry {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            created: Utc::now(),
            title: title.into(),
            content: content.into(),
        }
    }
}

pub(crate) fn summary_instruction(npc: &str) -> String {
    format!(
        "You are writing a diary entry for yourself, you are '{npc}'.\n\
        Task: Summarize the following conversation into a single diary entry written in the first \
        person ('I').\n\
        1. Create a short title for the entry (e.g., 'Met a new friend', 'Talked about cats').\n\
        2. Write the diary content (2-5 sentences max) capturing the key points and your feelings.\n\
        3. Output format must be strictly JSON: {{ \"title\": \"...\", \"content\": \"...\" }}"
    )
}

pub(crate) fn summary_prompt(recent: &[Turn]) -> String {
    format!("Conversation History:\n{}\n", format_turns(recent))
}

#[derive(Deserialize)]
struct RawSummary {
    title: Option<String>,
    content: Option<String>,
}

/// Parse a `{ "title", "content" }` reply. Markdown code fences and any prose around the JSON
/// object are ignored; anything unparseable gives the fixed fallback pair.
pub fn parse_summary(reply: &str) -> (String, String) {
    let cleaned = reply.replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();
    let body = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => cleaned,
    };

    match serde_json::from_str::<RawSummary>(body) {
        Ok(summary) => (
            summary.title.unwrap_or_else(|| FALLBACK_TITLE.to_string()),
            summary.content.unwrap_or_else(|| "...".to_string()),
        ),
        Err(err) => {
            tracing::warn!(?err, "Diary summary was not valid JSON");
            (FALLBACK_TITLE.to_string(), FALLBACK_CONTENT.to_string())
        }
    }
}

/// One JSON file of entries per NPC.
#[derive(Debug, Clone)]
pub struct DiaryStore {
    dir: PathBuf,
}

impl DiaryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, npc: &str) -> PathBuf {
        self.dir.join(format!("{npc}_diary.json"))
    }

    pub fn load(&self, npc: &str) -> Result<Vec<DiaryEntry>> {
        let path = self.path_for(npc);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read diary {:?}", path))?;
        serde_json::from_str(&raw).with_context(|| format!("Invalid diary {:?}", path))
    }

    pub fn save(&self, npc: &str, entries: &[DiaryEntry]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create diary dir {:?}", self.dir))?;
        let path = self.path_for(npc);
        let raw = serde_json::to_string_pretty(entries)?;
        fs::write(&path, raw).with_context(|| format!("Failed to write diary {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_code_fences() {
        let reply = "```json\n{ \"title\": \"Soup day\", \"content\": \"We talked soup.\" }\n```";
        assert_eq!(
            parse_summary(reply),
            ("Soup day".to_string(), "We talked soup.".to_string())
        );
    }

    #[test]
    fn tolerates_surrounding_prose_and_missing_fields() {
        let reply = "Sure! { \"title\": \"Quiet\" } Hope that helps.";
        assert_eq!(parse_summary(reply), ("Quiet".to_string(), "...".to_string()));
    }

    #[test]
    fn garbage_gives_fallback() {
        assert_eq!(
            parse_summary("I had a nice day"),
            (FALLBACK_TITLE.to_string(), FALLBACK_CONTENT.to_string())
        );
    }

    #[test]
    fn store_round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiaryStore::new(dir.path().join("diaries"));
        assert!(store.load("Boogie").unwrap().is_empty());

        let entries = vec![DiaryEntry::new("Met someone", "They were nice.")];
        store.save("Boogie", &entries).unwrap();
        assert_eq!(store.load("Boogie").unwrap(), entries);
    }
}
