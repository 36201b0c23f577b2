use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{
    diary::{self, DiaryEntry},
    spec::CharacterProfile,
};
use crate::{
    config::SamplingConfig,
    conversation::{ConversationHistory, Transcript, Turn},
    llm::{self, GenerationError, GenerationRequest, SharedGeneration},
    mood::{Mood, MoodWeights, classifier},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("{0} is still waiting on a reply")]
    Busy(String),
    #[error("{0} has no character sheet and cannot chat")]
    NoProfile(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MoodChange {
    pub from: Mood,
    pub to: Mood,
}

/// Result of one `respond` call. On failure `text` holds the player-facing sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub mood_change: Option<MoodChange>,
    pub failure: Option<GenerationError>,
}

/// Identifies the portrait asset for an NPC in a given mood.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortraitKey {
    pub npc: String,
    pub code: String,
    pub mood: Mood,
}

impl fmt::Display for PortraitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}_{}_Skin0", self.npc, self.code, self.mood.display_name())
    }
}

struct AgentState {
    mood: Mood,
    history: ConversationHistory,
    transcript: Transcript,
    diary: Vec<DiaryEntry>,
    script: VecDeque<String>,
}

/// One NPC's conversational state. Shared as `Arc<NpcAgent>` between dialogue sessions and
/// minigames; history and mood only change through these methods.
pub struct NpcAgent {
    name: String,
    portrait_code: String,
    profile: Option<Arc<CharacterProfile>>,
    client: SharedGeneration,
    sampling: SamplingConfig,
    weights: MoodWeights,
    waiting: AtomicBool,
    state: Mutex<AgentState>,
}

/// Holds the waiting flag for the duration of a call and clears it on every exit path.
struct WaitingGuard<'a>(&'a AtomicBool);

impl<'a> WaitingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl NpcAgent {
    pub fn new(
        name: impl Into<String>,
        profile: Option<Arc<CharacterProfile>>,
        client: SharedGeneration,
    ) -> Self {
        let name = name.into();
        let portrait_code = name
            .chars()
            .next()
            .map(|c| c.to_uppercase().to_string())
            .unwrap_or_default();
        Self {
            name,
            portrait_code,
            profile,
            client,
            sampling: SamplingConfig::default(),
            weights: MoodWeights::default(),
            waiting: AtomicBool::new(false),
            state: Mutex::new(AgentState {
                mood: Mood::Neutral,
                history: ConversationHistory::default(),
                transcript: Transcript::default(),
                diary: Vec::new(),
                script: VecDeque::new(),
            }),
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_weights(mut self, weights: MoodWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn profile(&self) -> Option<&CharacterProfile> {
        self.profile.as_deref()
    }

    pub fn can_chat(&self) -> bool {
        self.profile.is_some()
    }

    pub fn mood(&self) -> Mood {
        self.state.lock().mood
    }

    pub fn portrait_key(&self) -> PortraitKey {
        PortraitKey {
            npc: self.name.clone(),
            code: self.portrait_code.clone(),
            mood: self.mood(),
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::Acquire)
    }

    pub fn history(&self) -> Vec<Turn> {
        self.state.lock().history.turns()
    }

    pub fn transcript(&self) -> Transcript {
        self.state.lock().transcript.clone()
    }

    pub fn record_transcript(&self, speaker: &str, text: &str) {
        self.state.lock().transcript.record(speaker, text);
    }

    /// Generate a reply to the player.
    ///
    /// Picks a mood first (service first, keyword heuristic when the service fails), records
    /// the user turn, then asks for the reply. The model turn is only recorded on success.
    pub async fn respond(&self, message: &str) -> Result<Reply, AgentError> {
        let Some(profile) = self.profile.clone() else {
            return Err(AgentError::NoProfile(self.name.clone()));
        };
        let _waiting =
            WaitingGuard::acquire(&self.waiting).ok_or_else(|| AgentError::Busy(self.name.clone()))?;

        let current = self.mood();
        let proposed =
            match classifier::select_mood(self.client.as_ref(), message, current, &self.weights)
                .await
            {
                Ok(choice) => choice.applied_to(current),
                Err(err) => {
                    debug!(?err, npc = %self.name, "Mood service unavailable; using keywords");
                    let mood = classifier::heuristic_mood(message, current);
                    (mood != current).then_some(mood)
                }
            };

        let (request, mood_change) = {
            let mut state = self.state.lock();
            let mood_change = proposed.and_then(|to| {
                let from = state.mood;
                (from != to).then(|| {
                    state.mood = to;
                    MoodChange { from, to }
                })
            });
            match mood_change {
                Some(change) => info!(npc = %self.name, from = %change.from, to = %change.to, "Mood shifted"),
                None => debug!(npc = %self.name, mood = %state.mood, "Keeping mood"),
            }

            let prior_turns = state.history.turns();
            state.history.push_user(message);

            let memories: Vec<String> = state.diary.iter().map(|e| e.content.clone()).collect();
            let instruction = build_system_instruction(&profile, state.mood, &memories);
            let request = GenerationRequest::conversational(instruction, prior_turns, message)
                .with_sampling(self.sampling);
            (request, mood_change)
        };

        match llm::trimmed_reply(self.client.generate(request).await) {
            Ok(text) => {
                self.state.lock().history.push_model(text.clone());
                Ok(Reply {
                    text,
                    mood_change,
                    failure: None,
                })
            }
            Err(err) => {
                warn!(?err, npc = %self.name, "Reply generation failed");
                Ok(Reply {
                    text: err.sentinel().to_string(),
                    mood_change,
                    failure: Some(err),
                })
            }
        }
    }

    /// Summarize turns into a diary `(title, content)` pair. Never fails; falls back to fixed
    /// text when the service is offline or the reply is not JSON.
    pub async fn summarize_for_diary(&self, recent: &[Turn]) -> (String, String) {
        if !self.client.is_configured() {
            return (
                diary::OFFLINE_TITLE.to_string(),
                diary::OFFLINE_CONTENT.to_string(),
            );
        }

        let request = GenerationRequest::raw(
            diary::summary_instruction(&self.name),
            diary::summary_prompt(recent),
        )
        .with_params(200, 0.7, 0.95);

        match self.client.generate(request).await {
            Ok(reply) => diary::parse_summary(&reply),
            Err(err) => {
                warn!(?err, npc = %self.name, "Diary generation failed");
                (
                    diary::FALLBACK_TITLE.to_string(),
                    diary::FALLBACK_CONTENT.to_string(),
                )
            }
        }
    }

    /// Summarize the latest `recent` turns and keep the result as a memory.
    pub async fn write_diary(&self, recent: usize) -> DiaryEntry {
        let turns = self.state.lock().history.recent(recent);
        let (title, content) = self.summarize_for_diary(&turns).await;
        let entry = DiaryEntry::new(title, content);
        self.state.lock().diary.push(entry.clone());
        entry
    }

    pub fn diary(&self) -> Vec<DiaryEntry> {
        self.state.lock().diary.clone()
    }

    pub fn load_diary(&self, entries: Vec<DiaryEntry>) {
        self.state.lock().diary = entries;
    }

    pub fn remove_diary_entry(&self, index: usize) -> Option<DiaryEntry> {
        let mut state = self.state.lock();
        (index < state.diary.len()).then(|| state.diary.remove(index))
    }

    /// Overwrite the mood from outside a conversation (debug terminal, minigame results).
    pub fn force_mood(&self, mood: Mood) -> Option<MoodChange> {
        let mut state = self.state.lock();
        let from = state.mood;
        if from == mood {
            return None;
        }
        state.mood = mood;
        info!(npc = %self.name, %from, to = %mood, "Mood set");
        Some(MoodChange { from, to: mood })
    }

    /// Step to the next mood in `available`, wrapping around.
    pub fn cycle_mood(&self, available: &[Mood]) -> Option<MoodChange> {
        if available.is_empty() {
            return None;
        }
        let current = self.mood();
        let next = available
            .iter()
            .position(|m| *m == current)
            .map(|i| available[(i + 1) % available.len()])
            .unwrap_or(available[0]);
        self.force_mood(next)
    }

    pub fn clear_history(&self) {
        self.state.lock().history.clear();
        info!(npc = %self.name, "History cleared");
    }

    pub fn set_conversation(&self, lines: impl IntoIterator<Item = String>) {
        let mut state = self.state.lock();
        state.script.clear();
        state.script.extend(lines);
    }

    pub fn prepend_conversation(&self, lines: impl IntoIterator<Item = String>) {
        let mut state = self.state.lock();
        let mut script: VecDeque<String> = lines.into_iter().collect();
        script.extend(state.script.drain(..));
        state.script = script;
    }

    pub fn next_scripted_line(&self) -> Option<String> {
        self.state.lock().script.pop_front()
    }

    pub fn has_scripted_lines(&self) -> bool {
        !self.state.lock().script.is_empty()
    }
}

fn or_unspecified(field: &str) -> &str {
    if field.trim().is_empty() {
        "Not specified"
    } else {
        field
    }
}

pub fn build_system_instruction(
    profile: &CharacterProfile,
    mood: Mood,
    memories: &[String],
) -> String {
    let mut instruction = format!(
        "You are {name}, a character in a life simulation game. Stay completely in character at \
        all times.\n\n\
        ## Character Information\n\
        - **Name**: {name}\n\
        - **Current Mood**: {mood}\n\n\
        ## Appearance\n{appearance}\n\n\
        ## Backstory\n{backstory}\n\n\
        ## Personality\n{personality}\n\n\
        ## Likes & Dislikes\n{likes}\n\n\
        ## Mood Guidelines\n\
        Your current mood is \"{mood}\". Let it color your replies:\n\
        - neutral: casual and friendly.\n\
        - grumpy: short, cold, a little irritated.\n\
        - energized: enthusiastic, exclamation marks.\n\
        - sad: subdued and melancholic, shorter replies.\n\
        - bashful: shy and flustered, trailing off with ellipses; sometimes flirty or snarky.\n\
        - shocked: disbelief, gasps, interrobangs (?!).\n\
        - spooked: stuttering and frightened.\n\n\
        ## Response Rules\n\
        1. Keep replies to 1-3 sentences; this is a game dialogue box.\n\
        2. Put actions between asterisks, e.g. *looks out the window*. Use them sparingly.\n\
        3. Let your mood drift gradually and stay with an emotion for a while, unless something \
        is genuinely shocking or frightening.\n\
        4. Write continuous prose with no line breaks, bullets or lists.\n",
        name = profile.name,
        mood = mood,
        appearance = or_unspecified(&profile.appearance),
        backstory = or_unspecified(&profile.backstory),
        personality = or_unspecified(&profile.personality),
        likes = or_unspecified(&profile.likes_dislikes),
    );

    if !memories.is_empty() {
        instruction.push_str(
            "\n## Relevant Memories (Diary Entries)\n\
            These are past events from your diary. Use them only if relevant:\n",
        );
        for memory in memories {
            instruction.push_str(&format!("- {memory}\n"));
        }
    }
    instruction
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{OFFLINE, OfflineClient, scripted::ScriptedClient};

    fn agent_with(client: SharedGeneration) -> NpcAgent {
        NpcAgent::new("Boogie", Some(Arc::new(CharacterProfile::demo())), client)
    }

    #[tokio::test]
    async fn offline_respond_keeps_user_turn_only() {
        let agent = agent_with(Arc::new(OfflineClient));

        let reply = agent.respond("hello").await.unwrap();

        assert_eq!(reply.text, OFFLINE);
        assert_eq!(reply.failure, Some(GenerationError::Unconfigured));
        assert_eq!(agent.history(), vec![Turn::user("hello")]);
        assert!(!agent.is_waiting());
    }

    #[tokio::test]
    async fn offline_mood_uses_keyword_table() {
        let agent = agent_with(Arc::new(OfflineClient));
        let reply = agent.respond("thank you, you're wonderful").await.unwrap();
        assert_eq!(
            reply.mood_change,
            Some(MoodChange {
                from: Mood::Neutral,
                to: Mood::Energized
            })
        );
        assert_eq!(agent.mood(), Mood::Energized);
    }

    #[tokio::test]
    async fn successful_reply_records_both_turns() {
        let client = ScriptedClient::with_replies(["shocked", "  *gasps* You did WHAT?!  "]);
        let agent = agent_with(client.clone());

        let reply = agent.respond("I ate your soup").await.unwrap();

        assert_eq!(reply.text, "*gasps* You did WHAT?!");
        assert_eq!(
            reply.mood_change,
            Some(MoodChange {
                from: Mood::Neutral,
                to: Mood::Shocked
            })
        );
        assert_eq!(
            agent.history(),
            vec![Turn::user("I ate your soup"), Turn::model("*gasps* You did WHAT?!")]
        );

        let requests = client.requests();
        assert_eq!(requests.len(), 2);
        let conversation = &requests[1];
        assert!(conversation.prior_turns.is_empty());
        assert_eq!(conversation.user_turn, "I ate your soup");
        assert!(conversation.system_instruction.contains("**Current Mood**: shocked"));
        assert_eq!(conversation.max_output_tokens, 150);
    }

    #[tokio::test]
    async fn failed_reply_adds_no_model_turn() {
        let client = ScriptedClient::with_replies(["no_change"]);
        client.push_error(GenerationError::Transport {
            status: None,
            message: "connection reset".into(),
        });
        let agent = agent_with(client);

        let reply = agent.respond("hi").await.unwrap();

        assert_eq!(reply.text, crate::llm::CONNECTION_ERROR);
        assert_eq!(agent.history(), vec![Turn::user("hi")]);
        assert!(!agent.is_waiting());
        assert_eq!(agent.mood(), Mood::Neutral);
    }

    #[tokio::test]
    async fn blank_reply_is_an_error_not_a_turn() {
        let client = ScriptedClient::with_replies(["no_change", "   \n  "]);
        let agent = agent_with(client);

        let reply = agent.respond("hi").await.unwrap();

        assert_eq!(reply.text, crate::llm::API_ERROR);
        assert!(matches!(reply.failure, Some(GenerationError::Parse(_))));
        assert_eq!(agent.history(), vec![Turn::user("hi")]);
        assert!(!agent.is_waiting());
    }

    #[tokio::test]
    async fn history_stays_bounded_across_many_calls() {
        let client = ScriptedClient::new();
        for i in 0..30 {
            client.push_reply("no_change");
            client.push_reply(format!("reply {i}"));
        }
        let agent = agent_with(client.clone());

        for i in 0..30 {
            agent.respond(&format!("message {i}")).await.unwrap();
            assert!(agent.history().len() <= crate::conversation::MAX_HISTORY);
        }
        let history = agent.history();
        assert_eq!(history.first(), Some(&Turn::model("reply 22")));
        assert_eq!(history.last(), Some(&Turn::model("reply 29")));

        // prior turns sent with the last request never include the new user turn
        let last = client.requests().pop().unwrap();
        assert_eq!(last.prior_turns.last(), Some(&Turn::model("reply 28")));
    }

    #[tokio::test]
    async fn second_call_while_waiting_is_rejected() {
        let agent = agent_with(ScriptedClient::new());
        let held = WaitingGuard::acquire(&agent.waiting).unwrap();

        assert!(agent.is_waiting());
        assert_eq!(
            agent.respond("hello?").await,
            Err(AgentError::Busy("Boogie".into()))
        );
        assert!(agent.history().is_empty());

        drop(held);
        assert!(!agent.is_waiting());
    }

    #[tokio::test]
    async fn profile_less_agent_cannot_chat() {
        let agent = NpcAgent::new("Cat", None, Arc::new(OfflineClient));
        assert!(!agent.can_chat());
        assert_eq!(
            agent.respond("meow").await,
            Err(AgentError::NoProfile("Cat".into()))
        );
    }

    #[tokio::test]
    async fn diary_summary_falls_back_when_offline_or_garbled() {
        let offline = agent_with(Arc::new(OfflineClient));
        assert_eq!(
            offline.summarize_for_diary(&[]).await,
            (diary::OFFLINE_TITLE.to_string(), diary::OFFLINE_CONTENT.to_string())
        );

        let client = ScriptedClient::with_replies([
            "```json\n{\"title\": \"Soup\", \"content\": \"I talked about soup.\"}\n```",
        ]);
        let agent = agent_with(client.clone());
        let entry = agent.write_diary(10).await;
        assert_eq!(entry.title, "Soup");
        assert_eq!(agent.diary().len(), 1);
        assert_eq!(client.requests()[0].max_output_tokens, 200);
    }

    #[tokio::test]
    async fn diary_memories_feed_the_system_instruction() {
        let client = ScriptedClient::with_replies(["no_change", "Oh right, the soup!"]);
        let agent = agent_with(client.clone());
        agent.load_diary(vec![DiaryEntry::new("Soup", "The player loves soup.")]);

        agent.respond("remember me?").await.unwrap();

        let instruction = &client.requests()[1].system_instruction;
        assert!(instruction.contains("## Relevant Memories"));
        assert!(instruction.contains("- The player loves soup."));
    }

    #[test]
    fn cycles_through_available_moods() {
        let agent = agent_with(Arc::new(OfflineClient));
        let available = [Mood::Neutral, Mood::Grumpy, Mood::Sad];

        assert_eq!(agent.cycle_mood(&available).map(|c| c.to), Some(Mood::Grumpy));
        agent.cycle_mood(&available);
        assert_eq!(agent.mood(), Mood::Sad);
        agent.cycle_mood(&available);
        assert_eq!(agent.mood(), Mood::Neutral);
    }

    #[test]
    fn portrait_key_follows_mood() {
        let agent = agent_with(Arc::new(OfflineClient));
        assert_eq!(agent.portrait_key().to_string(), "Boogie/B_Neutral_Skin0");
        agent.force_mood(Mood::Bashful);
        assert_eq!(agent.portrait_key().to_string(), "Boogie/B_Bashful_Skin0");
    }

    #[test]
    fn scripted_lines_queue_in_order() {
        let agent = agent_with(Arc::new(OfflineClient));
        agent.set_conversation(["b".to_string(), "c".to_string()]);
        agent.prepend_conversation(["a".to_string()]);
        assert_eq!(agent.next_scripted_line().as_deref(), Some("a"));
        assert_eq!(agent.next_scripted_line().as_deref(), Some("b"));
        assert!(agent.has_scripted_lines());
    }

    #[test]
    fn blank_profile_fields_read_not_specified() {
        let profile = CharacterProfile {
            name: "Ghost".into(),
            ..CharacterProfile::default()
        };
        let instruction = build_system_instruction(&profile, Mood::Spooked, &[]);
        assert!(instruction.contains("## Appearance\nNot specified"));
        assert!(instruction.contains("Your current mood is \"spooked\""));
        assert!(!instruction.contains("Relevant Memories"));
    }
}
