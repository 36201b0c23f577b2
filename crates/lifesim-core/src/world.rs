use std::{collections::HashMap, path::Path, sync::Arc};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::{
    character::{
        CharacterProfile, CharacterRegistry, DiaryEntry, DiaryStore, MoodChange, NpcAgent,
        PhraseBook,
    },
    config::AppConfig,
    conversation::MAX_HISTORY,
    dialogue::DialogueSession,
    llm::{self, SharedGeneration},
    minigame::TwentyQuestions,
    mood::Mood,
    task::PendingTask,
};

/// Everything shared between conversations: configuration, the generation client, character
/// sheets, scripted phrases, diaries and the live agents.
pub struct World {
    config: AppConfig,
    client: SharedGeneration,
    characters: CharacterRegistry,
    phrases: PhraseBook,
    diaries: DiaryStore,
    agents: HashMap<String, Arc<NpcAgent>>,
}

impl World {
    /// Build from configuration, falling back to the built-in demo character and phrases when
    /// the data files are missing.
    pub fn from_config(config: AppConfig) -> Self {
        let client = llm::create_client(&config.generation);

        let characters_dir = Path::new(&config.data.characters_dir);
        let characters = if characters_dir.is_dir() {
            CharacterRegistry::new(characters_dir)
        } else {
            warn!(dir = ?characters_dir, "Character directory missing; using demo character");
            CharacterRegistry::with_profiles([CharacterProfile::demo()])
        };

        let phrases_file = Path::new(&config.data.phrases_file);
        let phrases = match PhraseBook::from_file(phrases_file) {
            Ok(book) => book,
            Err(err) => {
                warn!(?err, "No phrase file; using demo phrases");
                demo_phrases()
            }
        };

        let diaries = DiaryStore::new(&config.data.diary_dir);
        Self::with_parts(config, client, characters, phrases, diaries)
    }

    pub fn with_parts(
        config: AppConfig,
        client: SharedGeneration,
        characters: CharacterRegistry,
        phrases: PhraseBook,
        diaries: DiaryStore,
    ) -> Self {
        Self {
            config,
            client,
            characters,
            phrases,
            diaries,
            agents: HashMap::new(),
        }
    }

    /// Bring an NPC into the scene. Calling it again returns the same agent, so mood and
    /// history survive between conversations.
    pub fn spawn_npc(&mut self, name: &str) -> Arc<NpcAgent> {
        if let Some(agent) = self.agents.get(name) {
            return agent.clone();
        }

        let profile = self.characters.load(name);
        let agent = NpcAgent::new(name, profile, self.client.clone())
            .with_sampling(self.config.generation.dialogue)
            .with_weights(self.config.moods.weights());
        match self.diaries.load(name) {
            Ok(entries) => agent.load_diary(entries),
            Err(err) => warn!(?err, npc = %name, "Could not load diary"),
        }
        info!(npc = %name, chat = agent.can_chat(), "NPC spawned");

        let agent = Arc::new(agent);
        self.agents.insert(name.to_string(), agent.clone());
        agent
    }

    pub fn agent(&self, name: &str) -> Option<Arc<NpcAgent>> {
        self.agents.get(name).cloned()
    }

    pub fn npc_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    /// Next queued scripted line, or a random phrase for the NPC's current mood.
    pub fn opening_line(&self, agent: &NpcAgent) -> String {
        agent.next_scripted_line().unwrap_or_else(|| {
            self.phrases
                .random_phrase(agent.name(), agent.mood(), &mut rand::thread_rng())
        })
    }

    pub fn open_dialogue(&mut self, name: &str) -> DialogueSession {
        let agent = self.spawn_npc(name);
        let opening = self.opening_line(&agent);
        DialogueSession::open(agent, &opening, self.config.dialogue.clone())
    }

    pub fn start_twenty_questions(&mut self, name: &str) -> TwentyQuestions {
        let agent = self.spawn_npc(name);
        TwentyQuestions::new(
            agent,
            self.client.clone(),
            self.config.minigame.clone(),
            self.config.dialogue.reveal_interval(),
        )
    }

    /// Summarize the NPC's recent conversation into a diary entry and persist the diary.
    pub async fn write_diary(&self, name: &str) -> Result<DiaryEntry> {
        let agent = self.diary_author(name)?;
        write_and_save(agent, self.diaries.clone()).await
    }

    /// Same as [`World::write_diary`], run in the background so a frame loop can keep ticking.
    pub fn spawn_diary(&self, name: &str) -> Result<PendingTask<Result<DiaryEntry>>> {
        let agent = self.diary_author(name)?;
        Ok(PendingTask::spawn(write_and_save(agent, self.diaries.clone())))
    }

    fn diary_author(&self, name: &str) -> Result<Arc<NpcAgent>> {
        self.agent(name)
            .with_context(|| format!("{name} is not in the scene"))
    }

    pub fn delete_diary_entry(&self, name: &str, index: usize) -> Result<Option<DiaryEntry>> {
        let Some(agent) = self.agent(name) else {
            return Ok(None);
        };
        let removed = agent.remove_diary_entry(index);
        if removed.is_some() {
            self.diaries.save(name, &agent.diary())?;
        }
        Ok(removed)
    }

    pub fn force_mood(&self, name: &str, mood: Mood) -> Option<MoodChange> {
        self.agent(name)?.force_mood(mood)
    }

    /// Step through the moods the phrase book has lines for (all moods if it has none).
    pub fn cycle_mood(&self, name: &str) -> Option<MoodChange> {
        let agent = self.agent(name)?;
        let mut available = self.phrases.available_moods(name);
        if available.is_empty() {
            available = Mood::ALL.to_vec();
        }
        agent.cycle_mood(&available)
    }

    pub fn reset_history(&self, name: &str) -> bool {
        match self.agent(name) {
            Some(agent) => {
                agent.clear_history();
                true
            }
            None => false,
        }
    }
}

async fn write_and_save(agent: Arc<NpcAgent>, diaries: DiaryStore) -> Result<DiaryEntry> {
    let name = agent.name();
    let entry = agent.write_diary(MAX_HISTORY).await;
    diaries
        .save(name, &agent.diary())
        .with_context(|| format!("Failed to persist diary for {name}"))?;
    info!(npc = %name, title = %entry.title, "Diary entry written");
    Ok(entry)
}

fn demo_phrases() -> PhraseBook {
    let mut book = PhraseBook::default();
    let lines = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    book.insert_all(
        "Boogie",
        Mood::Neutral,
        lines(&["Oh, hey there.", "Hm? Did you need something?"]),
    );
    book.insert_all("Boogie", Mood::Energized, lines(&["Hi hi hi! Guess what!"]));
    book.insert_all("Boogie", Mood::Grumpy, lines(&["What now."]));
    book.insert_all("Boogie", Mood::Sad, lines(&["Oh... it's you."]));
    book
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{OfflineClient, scripted::ScriptedClient};

    fn world_with(client: SharedGeneration, diary_dir: &Path) -> World {
        World::with_parts(
            AppConfig::default(),
            client,
            CharacterRegistry::with_profiles([CharacterProfile::demo()]),
            demo_phrases(),
            DiaryStore::new(diary_dir),
        )
    }

    #[test]
    fn spawning_twice_keeps_the_same_agent() {
        let dir = tempfile::tempdir().unwrap();
        let mut world = world_with(Arc::new(OfflineClient), dir.path());

        let first = world.spawn_npc("Boogie");
        first.force_mood(Mood::Sad);
        let second = world.spawn_npc("Boogie");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.mood(), Mood::Sad);
        assert!(first.can_chat());
        assert_eq!(world.npc_names(), vec!["Boogie".to_string()]);
    }

    #[test]
    fn opening_line_prefers_scripted_queue() {
        let dir = tempfile::tempdir().unwrap();
        let mut world = world_with(Arc::new(OfflineClient), dir.path());
        let agent = world.spawn_npc("Boogie");

        agent.set_conversation(["Welcome home!".to_string()]);
        assert_eq!(world.opening_line(&agent), "Welcome home!");

        agent.force_mood(Mood::Grumpy);
        assert_eq!(world.opening_line(&agent), "What now.");
    }

    #[test]
    fn unknown_npc_has_no_chat() {
        let dir = tempfile::tempdir().unwrap();
        let mut world = world_with(Arc::new(OfflineClient), dir.path());
        let session = world.open_dialogue("Stranger");
        assert!(!session.agent().can_chat());
        assert_eq!(session.view().page, crate::character::phrases::NO_PHRASE);
    }

    #[test]
    fn cycle_uses_phrase_book_moods() {
        let dir = tempfile::tempdir().unwrap();
        let mut world = world_with(Arc::new(OfflineClient), dir.path());
        world.spawn_npc("Boogie");

        let seen: Vec<Mood> = (0..4)
            .filter_map(|_| world.cycle_mood("Boogie").map(|c| c.to))
            .collect();
        assert_eq!(
            seen,
            vec![Mood::Energized, Mood::Grumpy, Mood::Sad, Mood::Neutral]
        );
        assert!(world.cycle_mood("Nobody").is_none());
    }

    #[tokio::test]
    async fn configured_mood_weights_reach_the_classifier() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::with_replies(["no_change", "Boo!"]);
        let mut config = AppConfig::default();
        config.moods.weights.insert("spooked".into(), 2.0);
        let mut world = World::with_parts(
            config,
            client.clone(),
            CharacterRegistry::with_profiles([CharacterProfile::demo()]),
            demo_phrases(),
            DiaryStore::new(dir.path()),
        );

        let agent = world.spawn_npc("Boogie");
        agent.respond("hello").await.unwrap();

        let selection = &client.requests()[0];
        assert!(selection.user_turn.contains("spooked (weight: 2.0) - more likely"));
    }

    #[tokio::test]
    async fn background_diary_lands_without_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let client =
            ScriptedClient::with_replies(["{\"title\": \"Later\", \"content\": \"Quiet day.\"}"]);
        let mut world = world_with(client, dir.path());
        world.spawn_npc("Boogie");

        let mut task = world.spawn_diary("Boogie").unwrap();
        assert!(task.is_pending());
        let entry = loop {
            if let Some(result) = task.poll() {
                break result.unwrap().unwrap();
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(entry.title, "Later");
        assert_eq!(DiaryStore::new(dir.path()).load("Boogie").unwrap().len(), 1);
        assert!(world.spawn_diary("Nobody").is_err());
    }

    #[tokio::test]
    async fn diary_is_written_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::with_replies([
            "{\"title\": \"A visitor\", \"content\": \"Someone came by to chat.\"}",
        ]);
        let mut world = world_with(client, dir.path());
        world.spawn_npc("Boogie");

        let entry = world.write_diary("Boogie").await.unwrap();
        assert_eq!(entry.title, "A visitor");

        let stored = DiaryStore::new(dir.path()).load("Boogie").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "Someone came by to chat.");

        assert!(world.delete_diary_entry("Boogie", 0).unwrap().is_some());
        assert!(DiaryStore::new(dir.path()).load("Boogie").unwrap().is_empty());
        assert!(world.write_diary("Nobody").await.is_err());
    }
}
