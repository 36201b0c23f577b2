pub mod paginate;
pub mod session;
pub mod typewriter;

pub use paginate::{MonospaceMeasure, TextMeasure, paginate};
pub use session::{
    DialogueEvent, DialogueMode, DialogueOption, DialogueSession, DialogueView, OptionOutcome,
    SubmitError,
};
pub use typewriter::Typewriter;
