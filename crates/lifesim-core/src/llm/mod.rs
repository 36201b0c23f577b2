mod gemini;
mod offline;
#[cfg(test)]
pub(crate) mod scripted;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

pub use gemini::GeminiClient;
pub use offline::OfflineClient;

use crate::{
    config::{GenerationConfig, SamplingConfig},
    conversation::Turn,
};

pub type SharedGeneration = Arc<dyn GenerationClient>;

/// Shown when a reply could not be produced for any reason other than configuration.
pub const CONNECTION_ERROR: &str = "[Connection Error]";
pub const OFFLINE: &str = "[AI Offline - No API Key]";
pub const API_ERROR: &str = "[API Error - Check Console]";

/// One call to the text-generation service.
///
/// A request with no prior turns is a "raw" prompt: a system instruction and a single user
/// prompt, used for classification, judging and summaries.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_instruction: String,
    pub prior_turns: Vec<Turn>,
    pub user_turn: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl GenerationRequest {
    pub fn conversational(
        system_instruction: impl Into<String>,
        prior_turns: Vec<Turn>,
        user_turn: impl Into<String>,
    ) -> Self {
        Self {
            system_instruction: system_instruction.into(),
            prior_turns,
            user_turn: user_turn.into(),
            ..Self::raw("", "")
        }
    }

    pub fn raw(system_instruction: impl Into<String>, prompt: impl Into<String>) -> Self {
        let sampling = SamplingConfig::default();
        Self {
            system_instruction: system_instruction.into(),
            prior_turns: Vec::new(),
            user_turn: prompt.into(),
            max_output_tokens: sampling.max_output_tokens,
            temperature: sampling.temperature,
            top_p: sampling.top_p,
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingConfig) -> Self {
        self.max_output_tokens = sampling.max_output_tokens;
        self.temperature = sampling.temperature;
        self.top_p = sampling.top_p;
        self
    }

    pub fn with_params(mut self, max_output_tokens: u32, temperature: f32, top_p: f32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self.temperature = temperature;
        self.top_p = top_p;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("no credential configured for the generation service")]
    Unconfigured,
    #[error("generation request failed (status {status:?}): {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },
    #[error("generation response did not contain text: {0}")]
    Parse(String),
    #[error("reply {0:?} is not one of the expected labels")]
    InvalidLabel(String),
}

impl GenerationError {
    /// Text displayed in place of dialogue when this failure reaches the player.
    pub fn sentinel(&self) -> &'static str {
        match self {
            GenerationError::Unconfigured => OFFLINE,
            GenerationError::Transport { status: Some(_), .. } => API_ERROR,
            GenerationError::Transport { status: None, .. } => CONNECTION_ERROR,
            GenerationError::Parse(_) => API_ERROR,
            GenerationError::InvalidLabel(_) => "...",
        }
    }
}

/// Trim a reply. A reply with nothing left after trimming counts as unparseable.
pub fn trimmed_reply(reply: Result<String, GenerationError>) -> Result<String, GenerationError> {
    let text = reply?;
    let text = text.trim();
    if text.is_empty() {
        return Err(GenerationError::Parse("reply was blank".into()));
    }
    Ok(text.to_string())
}

#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError>;

    /// False when every call is known to short-circuit with `Unconfigured`.
    fn is_configured(&self) -> bool {
        true
    }
}

/// Build the client once at startup. A missing credential disables generation for the
/// lifetime of the process.
pub fn create_client(config: &GenerationConfig) -> SharedGeneration {
    let Some(api_key) = config.api_key() else {
        warn!(
            env = %config.api_key_env,
            "No generation API key set; AI responses are disabled until restart"
        );
        return Arc::new(OfflineClient);
    };

    match GeminiClient::new(&config.endpoint, &config.model, &api_key) {
        Ok(client) => {
            info!(model = %config.model, "Generation API key loaded");
            Arc::new(client)
        }
        Err(err) => {
            warn!(?err, "Generation client could not be built; running offline");
            Arc::new(OfflineClient)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_replies_are_parse_failures() {
        assert_eq!(trimmed_reply(Ok("  hey \n".into())), Ok("hey".into()));
        assert!(matches!(
            trimmed_reply(Ok(" \n\t ".into())),
            Err(GenerationError::Parse(_))
        ));
        assert_eq!(
            trimmed_reply(Err(GenerationError::Unconfigured)),
            Err(GenerationError::Unconfigured)
        );
    }

    #[test]
    fn raw_requests_carry_no_history() {
        let request = GenerationRequest::raw("sys", "prompt").with_params(20, 0.7, 0.9);
        assert!(request.prior_turns.is_empty());
        assert_eq!(request.user_turn, "prompt");
        assert_eq!(request.max_output_tokens, 20);
        assert_eq!(request.temperature, 0.7);
    }

    #[test]
    fn sentinels_distinguish_offline_from_errors() {
        assert_eq!(GenerationError::Unconfigured.sentinel(), OFFLINE);
        let status = GenerationError::Transport {
            status: Some(500),
            message: "boom".into(),
        };
        assert_eq!(status.sentinel(), API_ERROR);
        let connect = GenerationError::Transport {
            status: None,
            message: "refused".into(),
        };
        assert_eq!(connect.sentinel(), CONNECTION_ERROR);
    }

    #[test]
    fn missing_key_yields_offline_client() {
        let config = GenerationConfig {
            api_key_env: "LIFESIM_TEST_NEVER_SET".into(),
            api_key: None,
            ..GenerationConfig::default()
        };
        assert!(!create_client(&config).is_configured());
    }
}
