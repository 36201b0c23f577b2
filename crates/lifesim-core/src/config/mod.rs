use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::mood::{Mood, MoodWeights};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub dialogue: DialogueConfig,
    #[serde(default)]
    pub minigame: MinigameConfig,
    #[serde(default)]
    pub moods: MoodConfig,
    #[serde(default)]
    pub data: DataConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        if let Ok(path) = env::var("LIFESIM_CONFIG") {
            return Self::from_path(Path::new(&path));
        }

        let project_root = env::var("LIFESIM_ROOT").unwrap_or_else(|_| ".".to_string());
        let default_path = Path::new(&project_root).join("config/lifesim.toml");
        if default_path.exists() {
            return Self::from_path(&default_path);
        }

        let example_path = Path::new(&project_root).join("config/lifesim.example.toml");
        if example_path.exists() {
            tracing::warn!("Using example configuration at {:?}", example_path);
            return Self::from_path(&example_path);
        }

        Ok(Self::default())
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        let config: Self =
            toml::from_str(&contents).with_context(|| format!("invalid config: {:?}", path))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "GenerationConfig::default_endpoint")]
    pub endpoint: String,
    #[serde(default = "GenerationConfig::default_model")]
    pub model: String,
    /// Environment variable holding the API key
    #[serde(default = "GenerationConfig::default_api_key_env")]
    pub api_key_env: String,
    /// Literal key, used only when the environment variable is unset
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub dialogue: SamplingConfig,
}

impl GenerationConfig {
    fn default_endpoint() -> String {
        "https://generativelanguage.googleapis.com/v1beta".into()
    }
    fn default_model() -> String {
        "gemini-2.0-flash".into()
    }
    fn default_api_key_env() -> String {
        "GEMINI_API_KEY".into()
    }

    /// Resolve the credential, checking the env var first.
    pub fn api_key(&self) -> Option<String> {
        if let Ok(key) = env::var(&self.api_key_env) {
            if !key.trim().is_empty() {
                return Some(key);
            }
        }
        self.api_key.clone().filter(|k| !k.trim().is_empty())
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: Self::default_endpoint(),
            model: Self::default_model(),
            api_key_env: Self::default_api_key_env(),
            api_key: None,
            dialogue: SamplingConfig::default(),
        }
    }
}

/// Sampling parameters for ordinary NPC replies.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "SamplingConfig::default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "SamplingConfig::default_temperature")]
    pub temperature: f32,
    #[serde(default = "SamplingConfig::default_top_p")]
    pub top_p: f32,
}

impl SamplingConfig {
    fn default_max_output_tokens() -> u32 {
        150
    }
    fn default_temperature() -> f32 {
        0.9
    }
    fn default_top_p() -> f32 {
        0.95
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_output_tokens: Self::default_max_output_tokens(),
            temperature: Self::default_temperature(),
            top_p: Self::default_top_p(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DialogueConfig {
    #[serde(default = "DialogueConfig::default_reveal_interval_ms")]
    pub reveal_interval_ms: u64,
    #[serde(default = "DialogueConfig::default_max_width_px")]
    pub max_width_px: f32,
    #[serde(default = "DialogueConfig::default_max_lines_per_page")]
    pub max_lines_per_page: usize,
    /// Advance width of one glyph for the monospace measurer
    #[serde(default = "DialogueConfig::default_glyph_width_px")]
    pub glyph_width_px: f32,
}

impl DialogueConfig {
    fn default_reveal_interval_ms() -> u64 {
        30
    }
    fn default_max_width_px() -> f32 {
        760.0
    }
    fn default_max_lines_per_page() -> usize {
        3
    }
    fn default_glyph_width_px() -> f32 {
        11.0
    }

    pub fn reveal_interval(&self) -> Duration {
        Duration::from_millis(self.reveal_interval_ms)
    }
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            reveal_interval_ms: Self::default_reveal_interval_ms(),
            max_width_px: Self::default_max_width_px(),
            max_lines_per_page: Self::default_max_lines_per_page(),
            glyph_width_px: Self::default_glyph_width_px(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinigameConfig {
    #[serde(default = "MinigameConfig::default_max_questions")]
    pub max_questions: u32,
    #[serde(default = "MinigameConfig::default_fallback_word")]
    pub fallback_word: String,
    /// Probability of picking the first of the two outcome moods
    #[serde(default = "MinigameConfig::default_mood_bias")]
    pub mood_bias: f64,
}

impl MinigameConfig {
    fn default_max_questions() -> u32 {
        20
    }
    fn default_fallback_word() -> String {
        "myself".into()
    }
    fn default_mood_bias() -> f64 {
        0.7
    }
}

impl Default for MinigameConfig {
    fn default() -> Self {
        Self {
            max_questions: Self::default_max_questions(),
            fallback_word: Self::default_fallback_word(),
            mood_bias: Self::default_mood_bias(),
        }
    }
}

/// Overrides for the weights the mood classifier is shown, keyed by mood name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MoodConfig {
    #[serde(default)]
    pub weights: BTreeMap<String, f32>,
}

impl MoodConfig {
    /// Default weights with the configured overrides applied. Unknown moods and non-positive
    /// weights are skipped.
    pub fn weights(&self) -> MoodWeights {
        let mut weights = MoodWeights::default();
        for (name, weight) in &self.weights {
            match name.parse::<Mood>() {
                Ok(mood) if weights.set(mood, *weight) => {}
                Ok(mood) => tracing::warn!(%mood, weight, "Ignoring non-positive mood weight"),
                Err(err) => tracing::warn!(%err, "Ignoring mood weight"),
            }
        }
        weights
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    #[serde(default = "DataConfig::default_characters_dir")]
    pub characters_dir: PathBuf,
    #[serde(default = "DataConfig::default_phrases_file")]
    pub phrases_file: PathBuf,
    #[serde(default = "DataConfig::default_diary_dir")]
    pub diary_dir: PathBuf,
}

impl DataConfig {
    fn default_characters_dir() -> PathBuf {
        PathBuf::from("NPC_Data/characters")
    }
    fn default_phrases_file() -> PathBuf {
        PathBuf::from("NPC_Data/NPC_dialog.JSON")
    }
    fn default_diary_dir() -> PathBuf {
        PathBuf::from("NPC_Data/diaries")
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            characters_dir: Self::default_characters_dir(),
            phrases_file: Self::default_phrases_file(),
            diary_dir: Self::default_diary_dir(),
        }
    }
}
