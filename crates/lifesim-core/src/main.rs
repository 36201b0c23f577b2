use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use clap::Parser;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
    time::Instant,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lifesim_core::{
    World,
    character::DiaryEntry,
    config::AppConfig,
    dialogue::{DialogueEvent, DialogueMode, DialogueSession, OptionOutcome},
    minigame::{Phase, TwentyQuestions},
    mood::Mood,
    task::PendingTask,
};

#[derive(Parser)]
#[command(author, version, about = "Talk to LifeSim NPCs from the terminal")]
struct Cli {
    /// Config file (defaults to LIFESIM_CONFIG or config/lifesim.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// NPC to start talking to
    #[arg(long, default_value = "Boogie")]
    npc: String,
}

const FRAME: Duration = Duration::from_millis(16);

const HELP: &str = "\
commands:
  /talk [npc]       open a conversation
  (enter)           continue / skip typing
  /1 /2 /3          pick an option
  <text>            say something (after Respond) or ask a question (in 20 Questions)
  /guesser          start 20 Questions as the guesser
  /guess <word>     make a guess
  /giveup           give up the current game
  /log              show the chat log
  /mood <name>      force the NPC's mood
  /cycle            cycle through the NPC's moods
  /reset            clear the NPC's history
  /diary            write a diary entry for the NPC
  /leave            close the current screen
  /quit             exit";

enum Screen {
    Idle,
    Dialogue(DialogueSession),
    Game(TwentyQuestions),
}

struct Console {
    npc: String,
    screen: Screen,
    printed: Option<String>,
    diary: PendingTask<Result<DiaryEntry>>,
}

impl Console {
    fn new(npc: String) -> Self {
        Self {
            npc,
            screen: Screen::Idle,
            printed: None,
            diary: PendingTask::default(),
        }
    }

    fn tick(&mut self, dt: Duration) {
        let events = match &mut self.screen {
            Screen::Idle => Vec::new(),
            Screen::Dialogue(session) => {
                session.tick(dt);
                session.drain_events()
            }
            Screen::Game(game) => {
                game.tick(dt);
                game.drain_events()
            }
        };
        for event in events {
            let DialogueEvent::MoodChanged {
                npc,
                from,
                to,
                new_portrait,
                ..
            } = event;
            println!("  ({npc} {from} -> {to}) [{new_portrait}]");
        }

        match self.diary.poll() {
            Some(Ok(Ok(entry))) => println!(
                "  [{}] {}\n  {}",
                entry.created.format("%Y-%m-%d"),
                entry.title,
                entry.content
            ),
            Some(Ok(Err(err))) => error!(?err, "Diary failed"),
            Some(Err(err)) => error!(?err, "Diary task failed"),
            None => {}
        }
        self.render();
    }

    /// Print whatever became fully visible since the last frame.
    fn render(&mut self) {
        let snapshot = match &self.screen {
            Screen::Idle => None,
            Screen::Dialogue(session) => {
                let view = session.view();
                match view.mode {
                    DialogueMode::Narrating if view.page_complete => Some(format!(
                        "{} [{}]: {}{}",
                        view.npc,
                        view.mood.display_name(),
                        view.page,
                        if view.more { "  (more)" } else { "" }
                    )),
                    DialogueMode::ShowingOptions => Some(
                        view.options
                            .iter()
                            .enumerate()
                            .map(|(i, o)| format!("  /{} {}", i + 1, o.label()))
                            .collect::<Vec<_>>()
                            .join("\n"),
                    ),
                    DialogueMode::AwaitingFreeText => Some("  (type your reply)".into()),
                    DialogueMode::WaitingForGeneration => Some("  ...".into()),
                    DialogueMode::Narrating => None,
                }
            }
            Screen::Game(game) => {
                let view = game.view();
                let mut text = format!(
                    "[20Q {}/{}] {}",
                    view.questions_asked, view.max_questions, view.status
                );
                if let Some(last) = view.log.last() {
                    text.push_str(&format!("\n  Q: {}\n  A: {}", last.text, last.answer));
                }
                if matches!(view.phase, Phase::ShowingResult(_)) && view.reaction_complete {
                    text.push_str(&format!("\n{}: {}", view.npc, view.reaction));
                }
                Some(text)
            }
        };

        let Some(text) = snapshot else {
            return;
        };
        if self.printed.as_deref() != Some(text.as_str()) {
            println!("{text}");
            self.printed = Some(text);
        }
    }

    /// Apply one line of input. Returns false when the user asked to quit.
    fn handle(&mut self, world: &mut World, line: &str) -> bool {
        let (command, rest) = match line.strip_prefix('/') {
            Some(cmd) => {
                let (name, rest) = cmd.split_once(' ').unwrap_or((cmd, ""));
                (Some(name), rest.trim())
            }
            None => (None, line),
        };

        match command {
            Some("quit") => return false,
            Some("help") => println!("{HELP}"),
            Some("talk") => {
                if !rest.is_empty() {
                    self.npc = rest.to_string();
                }
                self.leave();
                self.screen = Screen::Dialogue(world.open_dialogue(&self.npc));
            }
            Some("leave") => self.leave(),
            Some("log") => {
                if let Some(agent) = world.agent(&self.npc) {
                    for entry in agent.transcript().entries() {
                        println!("  {}: {}", entry.speaker, entry.text);
                    }
                }
            }
            Some("mood") => match rest.parse::<Mood>() {
                Ok(mood) => {
                    world.spawn_npc(&self.npc);
                    world.force_mood(&self.npc, mood);
                    println!("  {} is now {}", self.npc, mood.display_name());
                }
                Err(err) => println!("  {err}"),
            },
            Some("cycle") => {
                world.spawn_npc(&self.npc);
                if let Some(change) = world.cycle_mood(&self.npc) {
                    println!("  {} -> {}", change.from, change.to);
                }
            }
            Some("reset") => {
                if world.reset_history(&self.npc) {
                    println!("  history cleared");
                }
            }
            Some("diary") if self.diary.is_pending() => println!("  still writing..."),
            Some("diary") => match world.spawn_diary(&self.npc) {
                Ok(task) => {
                    self.diary = task;
                    println!("  {} is writing in their diary...", self.npc);
                }
                Err(err) => println!("  {err}"),
            },
            _ => self.handle_screen(world, command, rest),
        }
        self.render();
        true
    }

    fn handle_screen(&mut self, world: &mut World, command: Option<&str>, rest: &str) {
        match &mut self.screen {
            Screen::Idle => println!("  /talk to start, /help for commands"),
            Screen::Dialogue(session) => {
                let outcome = match command {
                    None if session.mode() == DialogueMode::AwaitingFreeText => {
                        session.set_input(rest);
                        if let Err(err) = session.submit() {
                            println!("  {err}");
                        }
                        None
                    }
                    None | Some("next") => {
                        session.advance();
                        None
                    }
                    Some("skip") => {
                        session.skip();
                        None
                    }
                    Some("cancel") => {
                        session.cancel_input();
                        None
                    }
                    Some(n) => match n.parse::<usize>().ok().and_then(|i| {
                        i.checked_sub(1).and_then(|i| session.options().get(i).copied())
                    }) {
                        Some(option) => Some(session.select_option(option)),
                        None => {
                            println!("  unknown command /{n}");
                            None
                        }
                    },
                };
                match outcome {
                    Some(OptionOutcome::StartTwentyQuestions) => {
                        self.screen = Screen::Game(world.start_twenty_questions(&self.npc));
                    }
                    Some(OptionOutcome::Closed) => self.screen = Screen::Idle,
                    Some(OptionOutcome::Continue) | None => {}
                }
            }
            Screen::Game(game) => {
                let result = match command {
                    Some("guesser") => game.choose_guesser(),
                    Some("guess") => game.submit_guess(rest),
                    Some("giveup") => game.give_up(),
                    None if matches!(game.phase(), Phase::ShowingResult(_)) => {
                        game.skip_reaction();
                        if game.dismiss() {
                            self.screen = Screen::Idle;
                        }
                        Ok(())
                    }
                    None => game.submit_question(rest),
                    Some(other) => {
                        println!("  unknown command /{other}");
                        Ok(())
                    }
                };
                if let Err(err) = result {
                    println!("  {err}");
                }
            }
        }
    }

    fn leave(&mut self) {
        match &mut self.screen {
            Screen::Idle => {}
            Screen::Dialogue(session) => session.close(),
            Screen::Game(game) => game.abandon(),
        }
        self.screen = Screen::Idle;
        self.printed = None;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::from_path(path)?,
        None => AppConfig::load()?,
    };
    info!("Starting LifeSim console");

    let mut world = World::from_config(config);
    let mut console = Console::new(cli.npc);
    console.screen = Screen::Dialogue(world.open_dialogue(&console.npc));

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut frames = tokio::time::interval(FRAME);
    let mut last_frame = Instant::now();

    loop {
        tokio::select! {
            _ = frames.tick() => {
                let now = Instant::now();
                console.tick(now - last_frame);
                last_frame = now;
            }
            next = rx.recv() => {
                let Some(line) = next else { break };
                if !console.handle(&mut world, line.trim()) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Bye");
    Ok(())
}
