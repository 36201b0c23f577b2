use std::{collections::VecDeque, sync::Arc, time::Duration};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    paginate::{MonospaceMeasure, paginate},
    typewriter::Typewriter,
};
use crate::{
    character::{AgentError, MoodChange, NpcAgent, PortraitKey, Reply, phrases::NO_PHRASE},
    config::DialogueConfig,
    llm::CONNECTION_ERROR,
    mood::Mood,
    task::PendingTask,
};

pub const PLAYER_SPEAKER: &str = "Player";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueMode {
    Narrating,
    ShowingOptions,
    AwaitingFreeText,
    WaitingForGeneration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueOption {
    Respond,
    TwentyQuestions,
    Leave,
}

impl DialogueOption {
    pub fn label(self) -> &'static str {
        match self {
            DialogueOption::Respond => "Respond",
            DialogueOption::TwentyQuestions => "Play 20 Questions",
            DialogueOption::Leave => "Leave",
        }
    }
}

/// What the host should do after an option is picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionOutcome {
    Continue,
    StartTwentyQuestions,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DialogueEvent {
    MoodChanged {
        npc: String,
        from: Mood,
        to: Mood,
        old_portrait: PortraitKey,
        new_portrait: PortraitKey,
    },
}

impl DialogueEvent {
    /// Portrait swap cue for a mood change the agent has already applied.
    pub fn mood_changed(agent: &NpcAgent, change: MoodChange) -> Self {
        let new_portrait = agent.portrait_key();
        let old_portrait = PortraitKey {
            mood: change.from,
            ..new_portrait.clone()
        };
        DialogueEvent::MoodChanged {
            npc: agent.name().to_string(),
            from: change.from,
            to: change.to,
            old_portrait,
            new_portrait,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("not accepting free text right now")]
    NotAccepting,
    #[error("still waiting on the last reply")]
    Waiting,
    #[error("message is empty")]
    Empty,
}

/// Read-only snapshot handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DialogueView {
    pub session: Uuid,
    pub npc: String,
    pub mood: Mood,
    pub portrait: String,
    pub mode: DialogueMode,
    pub page: String,
    pub visible: String,
    pub cursor: usize,
    pub page_complete: bool,
    pub more: bool,
    pub waiting: bool,
    pub input: String,
    pub options: Vec<DialogueOption>,
}

/// One open conversation with an NPC: the page being revealed, queued pages, free-text input
/// and the in-flight reply.
pub struct DialogueSession {
    id: Uuid,
    agent: Arc<NpcAgent>,
    layout: DialogueConfig,
    typewriter: Typewriter,
    overflow: VecDeque<String>,
    mode: DialogueMode,
    input: String,
    pending: PendingTask<Result<Reply, AgentError>>,
    events: VecDeque<DialogueEvent>,
    closed: bool,
}

impl DialogueSession {
    pub fn open(agent: Arc<NpcAgent>, opening: &str, layout: DialogueConfig) -> Self {
        let mut session = Self {
            id: Uuid::new_v4(),
            agent,
            typewriter: Typewriter::new(layout.reveal_interval()),
            layout,
            overflow: VecDeque::new(),
            mode: DialogueMode::Narrating,
            input: String::new(),
            pending: PendingTask::default(),
            events: VecDeque::new(),
            closed: false,
        };
        info!(session = %session.id, npc = %session.agent.name(), "Dialogue opened");
        session.show_text(opening);
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn agent(&self) -> &Arc<NpcAgent> {
        &self.agent
    }

    pub fn mode(&self) -> DialogueMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Paginate `text` and start revealing its first page.
    fn show_text(&mut self, text: &str) {
        let measure = MonospaceMeasure {
            glyph_width_px: self.layout.glyph_width_px,
        };
        let mut pages: VecDeque<String> = paginate(
            text,
            self.layout.max_width_px,
            self.layout.max_lines_per_page,
            &measure,
        )
        .into();
        let first = pages.pop_front().unwrap_or_default();
        self.typewriter.load(first);
        self.overflow = pages;
        self.mode = DialogueMode::Narrating;
    }

    fn has_more(&self) -> bool {
        !self.overflow.is_empty() || self.agent.has_scripted_lines()
    }

    pub fn tick(&mut self, dt: Duration) {
        if self.closed {
            return;
        }
        match self.mode {
            DialogueMode::Narrating => {
                self.typewriter.tick(dt);
            }
            DialogueMode::WaitingForGeneration => self.poll_reply(),
            DialogueMode::ShowingOptions | DialogueMode::AwaitingFreeText => {}
        }
    }

    fn poll_reply(&mut self) {
        let Some(result) = self.pending.poll() else {
            return;
        };
        let text = match result {
            Ok(Ok(reply)) => {
                if let Some(change) = reply.mood_change {
                    self.events
                        .push_back(DialogueEvent::mood_changed(&self.agent, change));
                }
                reply.text
            }
            Ok(Err(err)) => {
                warn!(session = %self.id, %err, "Reply rejected");
                NO_PHRASE.to_string()
            }
            Err(err) => {
                error!(session = %self.id, ?err, "Reply task failed");
                CONNECTION_ERROR.to_string()
            }
        };
        self.agent.record_transcript(self.agent.name(), &text);
        self.show_text(&text);
    }

    /// Finish the current page instantly.
    pub fn skip(&mut self) {
        if self.mode == DialogueMode::Narrating {
            self.typewriter.skip();
        }
    }

    /// Continue past the current page: reveal it fully if it is still typing, otherwise load the
    /// next overflow page or scripted line, and finally show the options.
    pub fn advance(&mut self) {
        if self.closed || self.mode != DialogueMode::Narrating {
            return;
        }
        if !self.typewriter.is_complete() {
            self.typewriter.skip();
            return;
        }
        if let Some(page) = self.overflow.pop_front() {
            self.typewriter.load(page);
            return;
        }
        if let Some(line) = self.agent.next_scripted_line() {
            self.show_text(&line);
            return;
        }
        self.mode = DialogueMode::ShowingOptions;
    }

    pub fn options(&self) -> Vec<DialogueOption> {
        if self.mode != DialogueMode::ShowingOptions {
            return Vec::new();
        }
        if self.agent.can_chat() {
            vec![
                DialogueOption::Respond,
                DialogueOption::TwentyQuestions,
                DialogueOption::Leave,
            ]
        } else {
            vec![DialogueOption::Leave]
        }
    }

    pub fn select_option(&mut self, option: DialogueOption) -> OptionOutcome {
        if !self.options().contains(&option) {
            debug!(session = %self.id, ?option, "Option not available");
            return OptionOutcome::Continue;
        }
        match option {
            DialogueOption::Respond => {
                self.input.clear();
                self.mode = DialogueMode::AwaitingFreeText;
                OptionOutcome::Continue
            }
            DialogueOption::TwentyQuestions => {
                self.close();
                OptionOutcome::StartTwentyQuestions
            }
            DialogueOption::Leave => {
                self.close();
                OptionOutcome::Closed
            }
        }
    }

    pub fn push_char(&mut self, c: char) {
        if self.mode == DialogueMode::AwaitingFreeText && !c.is_control() {
            self.input.push(c);
        }
    }

    pub fn backspace(&mut self) {
        if self.mode == DialogueMode::AwaitingFreeText {
            self.input.pop();
        }
    }

    pub fn set_input(&mut self, text: &str) {
        if self.mode == DialogueMode::AwaitingFreeText {
            self.input = text.chars().filter(|c| !c.is_control()).collect();
        }
    }

    /// Back out of the text box without sending anything.
    pub fn cancel_input(&mut self) {
        if self.mode == DialogueMode::AwaitingFreeText {
            self.input.clear();
            self.mode = DialogueMode::ShowingOptions;
        }
    }

    /// Send the typed message to the NPC. The reply is picked up by later ticks.
    pub fn submit(&mut self) -> Result<(), SubmitError> {
        if self.closed || self.mode != DialogueMode::AwaitingFreeText {
            return Err(SubmitError::NotAccepting);
        }
        if self.pending.is_pending() || self.agent.is_waiting() {
            return Err(SubmitError::Waiting);
        }
        let message = self.input.trim().to_string();
        if message.is_empty() {
            return Err(SubmitError::Empty);
        }

        self.input.clear();
        self.agent.record_transcript(PLAYER_SPEAKER, &message);
        let agent = self.agent.clone();
        self.pending = PendingTask::spawn(async move { agent.respond(&message).await });
        self.mode = DialogueMode::WaitingForGeneration;
        Ok(())
    }

    pub fn is_waiting(&self) -> bool {
        self.mode == DialogueMode::WaitingForGeneration
    }

    pub fn drain_events(&mut self) -> Vec<DialogueEvent> {
        self.events.drain(..).collect()
    }

    /// Close from any state. An in-flight reply still lands in the agent's history but is not
    /// shown.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pending.detach();
        info!(session = %self.id, npc = %self.agent.name(), "Dialogue closed");
    }

    pub fn view(&self) -> DialogueView {
        DialogueView {
            session: self.id,
            npc: self.agent.name().to_string(),
            mood: self.agent.mood(),
            portrait: self.agent.portrait_key().to_string(),
            mode: self.mode,
            page: self.typewriter.page().to_string(),
            visible: self.typewriter.visible().to_string(),
            cursor: self.typewriter.cursor(),
            page_complete: self.typewriter.is_complete(),
            more: self.mode == DialogueMode::Narrating
                && self.typewriter.is_complete()
                && self.has_more(),
            waiting: self.is_waiting(),
            input: self.input.clone(),
            options: self.options(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        character::CharacterProfile,
        llm::{OFFLINE, OfflineClient, SharedGeneration, scripted::ScriptedClient},
    };

    fn layout() -> DialogueConfig {
        DialogueConfig {
            reveal_interval_ms: 10,
            max_width_px: 1000.0,
            max_lines_per_page: 2,
            glyph_width_px: 10.0,
        }
    }

    fn narrow() -> DialogueConfig {
        DialogueConfig {
            max_width_px: 100.0,
            ..layout()
        }
    }

    fn boogie(client: SharedGeneration) -> Arc<NpcAgent> {
        Arc::new(NpcAgent::new(
            "Boogie",
            Some(Arc::new(CharacterProfile::demo())),
            client,
        ))
    }

    async fn settle(session: &mut DialogueSession) {
        for _ in 0..100 {
            session.tick(Duration::ZERO);
            if !session.is_waiting() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("reply never arrived");
    }

    fn to_options(session: &mut DialogueSession) {
        while session.mode() == DialogueMode::Narrating {
            session.advance();
        }
    }

    #[test]
    fn opening_line_types_out_then_pages() {
        let agent = boogie(Arc::new(OfflineClient));
        let mut session = DialogueSession::open(agent, "one two three four five", narrow());

        assert_eq!(session.mode(), DialogueMode::Narrating);
        assert_eq!(session.view().visible, "");
        session.tick(Duration::from_millis(30));
        assert_eq!(session.view().visible, "one");

        session.advance();
        let view = session.view();
        assert_eq!(view.visible, "one two\nthree four");
        assert!(view.more);

        session.advance();
        assert_eq!(session.view().page, "five");
        assert_eq!(session.view().cursor, 0);

        session.skip();
        session.advance();
        assert_eq!(session.mode(), DialogueMode::ShowingOptions);
        assert_eq!(
            session.options(),
            vec![
                DialogueOption::Respond,
                DialogueOption::TwentyQuestions,
                DialogueOption::Leave
            ]
        );
    }

    #[test]
    fn scripted_lines_play_before_options() {
        let agent = boogie(Arc::new(OfflineClient));
        agent.set_conversation(["Second line.".to_string()]);
        let mut session = DialogueSession::open(agent.clone(), "First.", layout());

        session.skip();
        assert!(session.view().more);
        session.advance();
        assert_eq!(session.view().page, "Second line.");
        assert!(!agent.has_scripted_lines());

        session.skip();
        assert!(!session.view().more);
        session.advance();
        assert_eq!(session.mode(), DialogueMode::ShowingOptions);
    }

    #[tokio::test]
    async fn free_text_round_trip() {
        let client = ScriptedClient::with_replies(["bashful", "Oh... thanks."]);
        let agent = boogie(client);
        let mut session = DialogueSession::open(agent.clone(), "Hi.", layout());
        to_options(&mut session);

        assert_eq!(
            session.select_option(DialogueOption::Respond),
            OptionOutcome::Continue
        );
        for c in "nice hat".chars() {
            session.push_char(c);
        }
        session.push_char('!');
        session.backspace();
        session.submit().unwrap();
        assert!(session.view().waiting);
        assert_eq!(session.submit(), Err(SubmitError::NotAccepting));

        settle(&mut session).await;

        session.skip();
        assert_eq!(session.view().visible, "Oh... thanks.");
        let transcript = agent.transcript();
        let entries: Vec<(&str, &str)> = transcript
            .entries()
            .iter()
            .map(|e| (e.speaker.as_str(), e.text.as_str()))
            .collect();
        assert_eq!(
            entries,
            vec![("Player", "nice hat"), ("Boogie", "Oh... thanks.")]
        );

        let events = session.drain_events();
        assert_eq!(events.len(), 1);
        let DialogueEvent::MoodChanged {
            from,
            to,
            old_portrait,
            new_portrait,
            ..
        } = &events[0];
        assert_eq!((*from, *to), (Mood::Neutral, Mood::Bashful));
        assert_eq!(old_portrait.to_string(), "Boogie/B_Neutral_Skin0");
        assert_eq!(new_portrait.to_string(), "Boogie/B_Bashful_Skin0");
        assert!(session.drain_events().is_empty());
    }

    #[tokio::test]
    async fn offline_reply_shows_sentinel() {
        let agent = boogie(Arc::new(OfflineClient));
        let mut session = DialogueSession::open(agent.clone(), "Hi.", layout());
        to_options(&mut session);
        session.select_option(DialogueOption::Respond);
        session.set_input("hello");
        session.submit().unwrap();

        settle(&mut session).await;
        session.skip();

        assert_eq!(session.view().visible, OFFLINE);
        assert!(!agent.is_waiting());
        assert_eq!(agent.history().len(), 1);
    }

    #[tokio::test]
    async fn blank_submission_rejected() {
        let agent = boogie(Arc::new(OfflineClient));
        let mut session = DialogueSession::open(agent, "Hi.", layout());
        to_options(&mut session);
        session.select_option(DialogueOption::Respond);
        session.set_input("   ");
        assert_eq!(session.submit(), Err(SubmitError::Empty));

        session.cancel_input();
        assert_eq!(session.mode(), DialogueMode::ShowingOptions);
    }

    #[test]
    fn profile_less_npc_can_only_leave() {
        let agent = Arc::new(NpcAgent::new("Cat", None, Arc::new(OfflineClient)));
        let mut session = DialogueSession::open(agent, "Meow.", layout());
        to_options(&mut session);

        assert_eq!(session.options(), vec![DialogueOption::Leave]);
        assert_eq!(
            session.select_option(DialogueOption::Respond),
            OptionOutcome::Continue
        );
        assert_eq!(session.select_option(DialogueOption::Leave), OptionOutcome::Closed);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn reply_after_close_is_never_shown() {
        let client = ScriptedClient::with_replies(["no_change", "Wait, come back!"]);
        let agent = boogie(client);
        let mut session = DialogueSession::open(agent.clone(), "Hello.", layout());
        to_options(&mut session);
        session.select_option(DialogueOption::Respond);
        session.set_input("bye");
        session.submit().unwrap();
        assert!(session.is_waiting());

        session.close();
        let frozen = session.view();
        for _ in 0..20 {
            tokio::task::yield_now().await;
            session.tick(Duration::from_millis(16));
            assert_eq!(session.view(), frozen);
            assert!(session.drain_events().is_empty());
        }
        assert!(session.is_closed());
        assert!(!agent.is_waiting());
        assert_eq!(
            agent.history().last(),
            Some(&crate::conversation::Turn::model("Wait, come back!"))
        );

        let fresh = DialogueSession::open(agent, "Hi again.", layout());
        assert_eq!(fresh.view().page, "Hi again.");
        assert_ne!(fresh.view().visible, "Wait, come back!");
        assert_eq!(fresh.mode(), DialogueMode::Narrating);
    }
}
