//! Twenty Questions against an NPC. The NPC picks a secret word, the player asks yes/no
//! questions or guesses, and the result shifts the NPC's mood.

use std::{sync::Arc, time::Duration};

use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    character::{NpcAgent, agent::build_system_instruction},
    config::MinigameConfig,
    dialogue::{DialogueEvent, Typewriter},
    llm::{self, GenerationError, GenerationRequest, SharedGeneration},
    mood::Mood,
    task::PendingTask,
};

pub const CATEGORIES: [&str; 5] = ["Food", "Animal", "Object", "Location", "Concept/Abstract"];
pub const PENDING_ANSWER: &str = "...";
const WRONG_GUESS: &str = "Nope, that's not it!";
const RIGHT_GUESS: &str = "Yes!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    PlayerWin,
    NpcWin,
    GaveUp,
}

impl Outcome {
    /// The two moods the NPC may land in; the first is favoured by the configured bias.
    pub fn mood_candidates(self) -> (Mood, Mood) {
        match self {
            Outcome::PlayerWin => (Mood::Grumpy, Mood::Sad),
            Outcome::NpcWin | Outcome::GaveUp => (Mood::Energized, Mood::Bashful),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "outcome", rename_all = "snake_case")]
pub enum Phase {
    RoleSelect,
    PickingWord,
    WaitingForQuestion,
    AiAnswering,
    PlayerGuessing,
    /// Result decided, waiting on the NPC's reaction line
    Concluding(Outcome),
    ShowingResult(Outcome),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    Question,
    Guess,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exchange {
    pub kind: ExchangeKind,
    pub text: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MinigameError {
    #[error("can't do that during {0:?}")]
    WrongPhase(Phase),
    #[error("input is empty")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    SecretWord,
    Answer { index: usize },
    Verdict { index: usize },
    Reaction,
}

/// Output of a background call, tagged with the game that asked for it.
#[derive(Debug)]
struct Completion {
    game: Uuid,
    job: Job,
    result: Result<String, GenerationError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TwentyQuestionsView {
    pub game: Uuid,
    pub npc: String,
    pub phase: Phase,
    pub questions_asked: u32,
    pub max_questions: u32,
    pub log: Vec<Exchange>,
    pub status: String,
    pub last_answer: String,
    pub waiting: bool,
    pub reaction: String,
    pub reaction_complete: bool,
    /// Only revealed once the game is decided
    pub secret_word: Option<String>,
}

pub struct TwentyQuestions {
    id: Uuid,
    agent: Arc<NpcAgent>,
    client: SharedGeneration,
    config: MinigameConfig,
    phase: Phase,
    category: &'static str,
    secret_word: String,
    questions_asked: u32,
    log: Vec<Exchange>,
    last_answer: String,
    status: String,
    reaction: Typewriter,
    pending: PendingTask<Completion>,
    events: Vec<DialogueEvent>,
    rng: StdRng,
}

impl TwentyQuestions {
    pub fn new(
        agent: Arc<NpcAgent>,
        client: SharedGeneration,
        config: MinigameConfig,
        reveal_interval: Duration,
    ) -> Self {
        let game = Self {
            id: Uuid::new_v4(),
            agent,
            client,
            config,
            phase: Phase::RoleSelect,
            category: CATEGORIES[0],
            secret_word: String::new(),
            questions_asked: 0,
            log: Vec::new(),
            last_answer: String::new(),
            status: "Choose your role!".into(),
            reaction: Typewriter::new(reveal_interval),
            pending: PendingTask::default(),
            events: Vec::new(),
            rng: StdRng::from_entropy(),
        };
        info!(game = %game.id, npc = %game.agent.name(), "Twenty Questions started");
        game
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn questions_asked(&self) -> u32 {
        self.questions_asked
    }

    pub fn log(&self) -> &[Exchange] {
        &self.log
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn is_waiting(&self) -> bool {
        self.pending.is_pending()
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Portrait cues raised by the result's mood shift.
    pub fn drain_events(&mut self) -> Vec<DialogueEvent> {
        std::mem::take(&mut self.events)
    }

    fn spawn(&mut self, job: Job, request: GenerationRequest) {
        let client = self.client.clone();
        let game = self.id;
        self.pending = PendingTask::spawn(async move {
            let result = client.generate(request).await;
            Completion { game, job, result }
        });
    }

    fn npc_context(&self) -> String {
        match self.agent.profile() {
            Some(profile) => build_system_instruction(profile, self.agent.mood(), &[]),
            None => String::new(),
        }
    }

    /// The player asks the questions; the NPC picks a word.
    pub fn choose_guesser(&mut self) -> Result<(), MinigameError> {
        if self.phase != Phase::RoleSelect {
            return Err(MinigameError::WrongPhase(self.phase));
        }
        self.category = CATEGORIES
            .choose(&mut self.rng)
            .copied()
            .unwrap_or(CATEGORIES[0]);
        debug!(game = %self.id, category = self.category, "Picked category");

        let persona = self
            .agent
            .profile()
            .map(|p| format!("You are {}. {}\n\n", p.name, p.personality))
            .unwrap_or_default();
        let instruction = format!(
            "{persona}You are playing 20 Questions. Pick a single word or short phrase (a noun) \
            for the other player to guess.\n\n\
            Rules:\n\
            1. Pick something that fits the category: **{category}**.\n\
            2. Pick something interesting and not too obvious, but solvable.\n\
            3. Respond with ONLY the word or short phrase. No quotes, no explanation.\n\
            4. Keep it to 1-3 words.\n\
            5. Never say the word to the player unless they guess it.",
            category = self.category
        );
        let prompt = format!(
            "Pick a unique {} for 20 Questions. Reply with ONLY the word.",
            self.category
        );
        self.spawn(
            Job::SecretWord,
            GenerationRequest::raw(instruction, prompt).with_params(20, 1.2, 0.98),
        );
        self.phase = Phase::PickingWord;
        self.status = format!("{} is thinking of something...", self.agent.name());
        Ok(())
    }

    fn accept_submission(&self, text: &str) -> Result<String, MinigameError> {
        if self.phase != Phase::WaitingForQuestion {
            return Err(MinigameError::WrongPhase(self.phase));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(MinigameError::Empty);
        }
        Ok(text.to_string())
    }

    fn limit_reached(&self) -> bool {
        self.questions_asked >= self.config.max_questions
    }

    pub fn submit_question(&mut self, question: &str) -> Result<(), MinigameError> {
        let question = self.accept_submission(question)?;
        if self.limit_reached() {
            self.conclude(Outcome::NpcWin);
            return Ok(());
        }

        let answered: String = self
            .log
            .iter()
            .filter(|e| e.kind == ExchangeKind::Question && e.answer != PENDING_ANSWER)
            .map(|e| format!("Q: {}\nA: {}\n", e.text, e.answer))
            .collect();

        self.questions_asked += 1;
        let index = self.log.len();
        self.log.push(Exchange {
            kind: ExchangeKind::Question,
            text: question.clone(),
            answer: PENDING_ANSWER.into(),
        });

        let word = &self.secret_word;
        let instruction = format!(
            "{context}\nYou are playing 20 Questions with the player. The secret word you picked \
            is: \"{word}\"\n\n\
            Rules:\n\
            1. Answer the player's yes/no question honestly without giving the answer away.\n\
            2. Stay in character. Do not complain about playing or change the subject.\n\
            3. Keep your answer to 1-2 short sentences.\n\
            4. You may be playfully evasive but never lie about a factual yes/no answer.\n\
            5. If the word belongs to an obvious category (e.g. it is a food), answer category \
            questions honestly.\n\
            6. Never reveal or say \"{word}\".",
            context = self.npc_context(),
        );
        let prompt = format!(
            "Previous questions:\n{answered}\nPlayer's question #{n}: {question}\n\n\
            Answer this yes/no question about \"{word}\" in character:",
            n = self.questions_asked,
        );
        self.spawn(
            Job::Answer { index },
            GenerationRequest::raw(instruction, prompt).with_params(100, 0.9, 0.95),
        );
        self.phase = Phase::AiAnswering;
        self.status = format!("{} is thinking...", self.agent.name());
        Ok(())
    }

    pub fn submit_guess(&mut self, guess: &str) -> Result<(), MinigameError> {
        let guess = self.accept_submission(guess)?;
        if self.limit_reached() {
            self.conclude(Outcome::NpcWin);
            return Ok(());
        }

        self.questions_asked += 1;
        let index = self.log.len();
        self.log.push(Exchange {
            kind: ExchangeKind::Guess,
            text: guess.clone(),
            answer: PENDING_ANSWER.into(),
        });

        let word = &self.secret_word;
        let instruction = format!(
            "You are judging a guess in a game of 20 Questions.\n\
            The secret word is: \"{word}\"\n\
            The player's guess is: \"{guess}\"\n\n\
            Rules:\n\
            1. If the guess matches or is essentially the same thing (synonym, plural/singular), \
            respond with exactly: CORRECT\n\
            2. Otherwise respond with exactly: INCORRECT\n\
            3. Respond with ONLY one of those two words."
        );
        let prompt =
            format!("Is \"{guess}\" the same as \"{word}\"? Reply CORRECT or INCORRECT only.");
        self.spawn(
            Job::Verdict { index },
            GenerationRequest::raw(instruction, prompt).with_params(10, 0.9, 0.95),
        );
        self.phase = Phase::PlayerGuessing;
        self.status = format!("{} is checking your answer...", self.agent.name());
        Ok(())
    }

    pub fn give_up(&mut self) -> Result<(), MinigameError> {
        if self.phase != Phase::WaitingForQuestion {
            return Err(MinigameError::WrongPhase(self.phase));
        }
        self.conclude(Outcome::GaveUp);
        Ok(())
    }

    fn conclude(&mut self, outcome: Outcome) {
        let (first, second) = outcome.mood_candidates();
        let bias = self.config.mood_bias;
        let bias = if (0.0..=1.0).contains(&bias) { bias } else { 0.5 };
        let mood = if self.rng.gen_bool(bias) { first } else { second };
        if let Some(change) = self.agent.force_mood(mood) {
            self.events
                .push(DialogueEvent::mood_changed(&self.agent, change));
        }

        let npc = self.agent.name().to_string();
        let word = self.secret_word.clone();
        let asked = self.questions_asked;
        self.status = match outcome {
            Outcome::PlayerWin => format!("VICTORY! Secret word: {word}"),
            Outcome::NpcWin => format!("{npc} WINS! Secret word: {word}"),
            Outcome::GaveUp => format!("You gave up! Secret word: {word}"),
        };
        let result = match outcome {
            Outcome::PlayerWin => format!(
                "The player correctly guessed your secret word \"{word}\" after {asked} \
                questions. You lost! You feel {mood}."
            ),
            Outcome::NpcWin => format!(
                "The player failed to guess your secret word \"{word}\" after {asked} \
                questions. You won! You feel {mood}."
            ),
            Outcome::GaveUp => format!(
                "The player gave up trying to guess your secret word \"{word}\" after {asked} \
                questions. They surrendered! You feel {mood}."
            ),
        };
        let instruction = format!(
            "{context}\nYou just finished playing 20 Questions with the player. {result}\n\n\
            React to the result in character in 1-2 short sentences. Be expressive. Write only \
            dialogue, no actions or mention of where you are.",
            context = self.npc_context(),
        );
        self.spawn(
            Job::Reaction,
            GenerationRequest::raw(instruction, "React to the game result in character:")
                .with_params(100, 0.9, 0.95),
        );
        info!(game = %self.id, ?outcome, %mood, "Twenty Questions decided");
        self.phase = Phase::Concluding(outcome);
    }

    pub fn tick(&mut self, dt: Duration) {
        if let Some(joined) = self.pending.poll() {
            match joined {
                Ok(completion) => self.resolve(completion),
                Err(err) => {
                    warn!(game = %self.id, ?err, "Minigame task failed");
                    let job = self.expected_job();
                    if let Some(job) = job {
                        self.resolve(Completion {
                            game: self.id,
                            job,
                            result: Err(GenerationError::Transport {
                                status: None,
                                message: err.to_string(),
                            }),
                        });
                    }
                }
            }
        }
        if matches!(self.phase, Phase::ShowingResult(_)) {
            self.reaction.tick(dt);
        }
    }

    /// The job the current phase is waiting on, if any.
    fn expected_job(&self) -> Option<Job> {
        let last = self.log.len().checked_sub(1);
        match self.phase {
            Phase::PickingWord => Some(Job::SecretWord),
            Phase::AiAnswering => last.map(|index| Job::Answer { index }),
            Phase::PlayerGuessing => last.map(|index| Job::Verdict { index }),
            Phase::Concluding(_) => Some(Job::Reaction),
            _ => None,
        }
    }

    fn resolve(&mut self, completion: Completion) {
        if completion.game != self.id || self.expected_job() != Some(completion.job) {
            debug!(
                game = %self.id,
                from = %completion.game,
                job = ?completion.job,
                phase = ?self.phase,
                "Discarding stale result"
            );
            return;
        }

        match completion.job {
            Job::SecretWord => {
                let word = completion
                    .result
                    .map(|reply| sanitize_word(&reply))
                    .unwrap_or_else(|err| {
                        warn!(?err, "Secret word generation failed");
                        String::new()
                    });
                self.secret_word = if word.is_empty() {
                    self.config.fallback_word.clone()
                } else {
                    word
                };
                debug!(game = %self.id, secret = %self.secret_word, "Secret word chosen");
                self.phase = Phase::WaitingForQuestion;
                self.status = "Ask a yes/no question!".into();
            }
            Job::Answer { index } => {
                let answer = match llm::trimmed_reply(completion.result) {
                    Ok(reply) => reply,
                    Err(err) => err.sentinel().to_string(),
                };
                self.record_answer(index, answer);
                self.status = format!(
                    "Q: {}/{} - Ask another question!",
                    self.questions_asked, self.config.max_questions
                );
                self.back_to_questions();
            }
            Job::Verdict { index } => {
                let correct = match completion.result {
                    Ok(reply) => parse_verdict(&reply),
                    Err(err) => {
                        warn!(?err, "Guess judging failed");
                        false
                    }
                };
                if correct {
                    self.record_answer(index, RIGHT_GUESS.into());
                    self.conclude(Outcome::PlayerWin);
                } else {
                    self.record_answer(index, WRONG_GUESS.into());
                    self.status = format!(
                        "Q: {}/{} - Keep guessing!",
                        self.questions_asked, self.config.max_questions
                    );
                    self.back_to_questions();
                }
            }
            Job::Reaction => {
                let Phase::Concluding(outcome) = self.phase else {
                    return;
                };
                let text = match llm::trimmed_reply(completion.result) {
                    Ok(reply) => reply,
                    Err(err) => err.sentinel().to_string(),
                };
                self.agent.record_transcript(self.agent.name(), &text);
                self.reaction.load(text);
                self.phase = Phase::ShowingResult(outcome);
            }
        }
    }

    fn record_answer(&mut self, index: usize, answer: String) {
        if let Some(entry) = self.log.get_mut(index) {
            entry.answer = answer.clone();
        }
        self.last_answer = answer;
    }

    fn back_to_questions(&mut self) {
        self.phase = Phase::WaitingForQuestion;
        if self.limit_reached() {
            self.conclude(Outcome::NpcWin);
        }
    }

    pub fn skip_reaction(&mut self) {
        self.reaction.skip();
    }

    /// Leave the result screen. Only allowed once the reaction has fully typed out.
    pub fn dismiss(&mut self) -> bool {
        if !matches!(self.phase, Phase::ShowingResult(_)) || !self.reaction.is_complete() {
            return false;
        }
        self.phase = Phase::Closed;
        info!(game = %self.id, "Twenty Questions dismissed");
        true
    }

    /// Tear the game down from any phase. Anything still in flight is ignored.
    pub fn abandon(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }
        self.pending.detach();
        self.phase = Phase::Closed;
        info!(game = %self.id, "Twenty Questions abandoned");
    }

    pub fn view(&self) -> TwentyQuestionsView {
        let decided = matches!(
            self.phase,
            Phase::Concluding(_) | Phase::ShowingResult(_) | Phase::Closed
        ) && !self.secret_word.is_empty();
        TwentyQuestionsView {
            game: self.id,
            npc: self.agent.name().to_string(),
            phase: self.phase,
            questions_asked: self.questions_asked,
            max_questions: self.config.max_questions,
            log: self.log.clone(),
            status: self.status.clone(),
            last_answer: self.last_answer.clone(),
            waiting: self.is_waiting(),
            reaction: self.reaction.visible().to_string(),
            reaction_complete: self.reaction.is_complete(),
            secret_word: decided.then(|| self.secret_word.clone()),
        }
    }
}

/// First line of the reply, trimmed of whitespace, quotes and punctuation, lowercased.
pub fn sanitize_word(reply: &str) -> String {
    reply
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .trim_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation() || "“”‘’".contains(c))
        .to_lowercase()
}

/// Only a bare `CORRECT` wins; anything else, `INCORRECT` included, is a miss.
pub fn parse_verdict(reply: &str) -> bool {
    let token = reply
        .trim()
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace());
    let correct = token.eq_ignore_ascii_case("CORRECT");
    if !correct && !token.eq_ignore_ascii_case("INCORRECT") {
        warn!(
            err = %GenerationError::InvalidLabel(token.to_string()),
            "Unexpected verdict; treating as incorrect"
        );
    }
    correct
}
