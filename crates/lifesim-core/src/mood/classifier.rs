use tracing::debug;

use super::{Mood, MoodChoice, MoodWeights, Sentiment};
use crate::llm::{GenerationClient, GenerationError, GenerationRequest};

const POSITIVE_WORDS: &[&str] = &[
    "thank", "love", "great", "awesome", "amazing", "beautiful", "happy", "nice", "cute",
    "wonderful", "fantastic", "glad", "sweet", "haha", "friend", "good job", "well done",
    "proud", "brilliant", "cool",
];

const NEGATIVE_WORDS: &[&str] = &[
    "hate", "stupid", "ugly", "annoying", "boring", "idiot", "shut up", "go away", "terrible",
    "awful", "dumb", "worst", "useless", "gross", "leave me", "disgusting", "loser", "lame",
];

const SELECTION_INSTRUCTION: &str = "You are analyzing a player's message to determine the best \
emotional reaction for an NPC character.

Your task: Choose ONE mood from the available options that best fits as the NPC's emotional \
response to what the player said.

Rules:
1. Respond with ONLY the mood name (e.g., 'bashful' or 'no_change')
2. Consider the mood weights - higher weight moods are more appropriate/likely
3. Choose 'no_change' if the current mood is still appropriate
4. Be realistic - not every message needs a mood change
5. Match the intensity of the player's message";

/// Keyword sentiment of a player message. Case-insensitive substring match.
pub fn classify(text: &str) -> Sentiment {
    let lowered = text.to_lowercase();
    let positive = POSITIVE_WORDS
        .iter()
        .filter(|w| lowered.contains(*w))
        .count();
    let negative = NEGATIVE_WORDS
        .iter()
        .filter(|w| lowered.contains(*w))
        .count();

    match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => Sentiment::Positive,
        std::cmp::Ordering::Less => Sentiment::Negative,
        std::cmp::Ordering::Equal => Sentiment::Neutral,
    }
}

/// Rule-based transition used when the classifier service is unavailable.
pub fn shift_mood(current: Mood, sentiment: Sentiment) -> Mood {
    match sentiment {
        Sentiment::Positive => match current {
            Mood::Grumpy | Mood::Sad => Mood::Neutral,
            Mood::Neutral | Mood::Energized => Mood::Energized,
            Mood::Bashful => Mood::Bashful,
            _ => Mood::Energized,
        },
        Sentiment::Negative => match current {
            Mood::Energized => Mood::Neutral,
            Mood::Bashful => Mood::Sad,
            Mood::Neutral | Mood::Grumpy => Mood::Grumpy,
            Mood::Sad => Mood::Sad,
            _ => Mood::Grumpy,
        },
        Sentiment::Neutral => match current {
            Mood::Grumpy | Mood::Energized => Mood::Neutral,
            other => other,
        },
    }
}

/// Heuristic mood for a message, without any service call.
pub fn heuristic_mood(text: &str, current: Mood) -> Mood {
    shift_mood(current, classify(text))
}

pub(crate) fn selection_prompt(message: &str, current: Mood, weights: &MoodWeights) -> String {
    format!(
        "Player said: \"{message}\"\n\n\
        Current NPC mood: {current}\n\n\
        Available moods:\n{weights}\n\n\
        What mood should the NPC react with? (respond with only the mood name)",
        weights = weights.describe()
    )
}

/// Ask the generation service to pick a mood. Out-of-set replies are coerced to `NoChange`;
/// service failures are returned so the caller can fall back to the heuristic.
pub async fn select_mood(
    client: &dyn GenerationClient,
    message: &str,
    current: Mood,
    weights: &MoodWeights,
) -> Result<MoodChoice, GenerationError> {
    let request = GenerationRequest::raw(
        SELECTION_INSTRUCTION,
        selection_prompt(message, current, weights),
    )
    .with_params(20, 0.7, 0.9);

    let reply = client.generate(request).await?;
    let choice = MoodChoice::parse_label(&reply);
    debug!(reply = %reply.trim(), ?choice, "Mood selection");
    Ok(choice)
}
