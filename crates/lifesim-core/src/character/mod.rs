pub mod agent;
pub mod diary;
pub mod phrases;
pub mod spec;

pub use agent::{AgentError, MoodChange, NpcAgent, PortraitKey, Reply};
pub use diary::{DiaryEntry, DiaryStore};
pub use phrases::PhraseBook;
pub use spec::{CharacterProfile, CharacterRegistry};
