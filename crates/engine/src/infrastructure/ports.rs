//! Port traits for infrastructure boundaries.
//!
//! These are the ONLY abstractions in the engine. Ports exist for:
//! - Document-store access (the aggregate and its runtime projection)
//! - Generation providers (text, image, speech, music)
//! - The asset sink that copies provider output into durable storage
//!
//! Concrete adapters live in the surrounding application; every stage and
//! the scheduler depend only on these traits.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use storyforge_domain::{
    BackgroundMusic, CharacterArt, Chapter, DialogueAudio, Game, GameId, GameStatus, Progress,
    RuntimeGame, RuntimeGameId, SceneArt, StoryCharacterInfo,
};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("Not found")]
    NotFound,
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider request failed: {0}")]
    RequestFailed(String),
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("Provider job timed out after {0:?}")]
    Timeout(Duration),
    #[error("Provider unavailable")]
    Unavailable,
}

// =============================================================================
// Persistence Gateway
// =============================================================================

/// Whole-field replacement patch for the aggregate.
///
/// The store contract is replace-not-merge: a `Some` field here overwrites
/// the stored field with the given value in full, `None` leaves it alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GamePatch {
    pub story_characters: Option<StoryCharacterInfo>,
    pub chapters: Option<Vec<Chapter>>,
    pub total_chapters: Option<usize>,
    pub character_art: Option<Vec<CharacterArt>>,
    pub scene_art: Option<Vec<SceneArt>>,
    pub dialogue_audio: Option<Vec<DialogueAudio>>,
    pub background_music: Option<Vec<BackgroundMusic>>,
    pub progress: Option<Progress>,
    pub status: Option<GameStatus>,
    pub error: Option<String>,
    pub error_details: Option<serde_json::Value>,
    pub runtime_id: Option<RuntimeGameId>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GameRepo: Send + Sync {
    async fn get(&self, id: GameId) -> Result<Option<Game>, RepoError>;
    /// Replace the named fields. Returns false when the document is gone.
    async fn update(&self, id: GameId, patch: GamePatch) -> Result<bool, RepoError>;
    async fn create(&self, game: Game) -> Result<Game, RepoError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuntimeGameRepo: Send + Sync {
    async fn create(&self, runtime: RuntimeGame) -> Result<RuntimeGame, RepoError>;
}

// =============================================================================
// Generation Providers
// =============================================================================

/// Text generation request. Prompts are referenced by id; the concrete
/// provider owns the template registry and performs `{placeholder}`
/// substitution with `replacements`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextGenRequest {
    pub system_prompt_id: String,
    pub user_prompt_id: String,
    pub replacements: HashMap<String, String>,
}

impl TextGenRequest {
    pub fn new(system_prompt_id: impl Into<String>, user_prompt_id: impl Into<String>) -> Self {
        Self {
            system_prompt_id: system_prompt_id.into(),
            user_prompt_id: user_prompt_id.into(),
            replacements: HashMap::new(),
        }
    }

    pub fn replace(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.replacements.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResult {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechRequest {
    pub text: String,
    /// Voice library entry to synthesize with.
    pub speaker: String,
    pub emotion: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechResult {
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MusicJobStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MusicResult {
    pub status: MusicJobStatus,
    pub url: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenPort: Send + Sync {
    async fn generate(&self, request: TextGenRequest) -> Result<String, ProviderError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageGenPort: Send + Sync {
    async fn generate(&self, request: ImageRequest) -> Result<ImageResult, ProviderError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechGenPort: Send + Sync {
    async fn generate(&self, request: SpeechRequest) -> Result<SpeechResult, ProviderError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MusicGenPort: Send + Sync {
    async fn generate(&self, prompt: String) -> Result<MusicResult, ProviderError>;
}

// =============================================================================
// Asset Sink
// =============================================================================

/// Storage category an asset is filed under. The sink derives the
/// destination reference from the category and the source filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetCategory {
    Character,
    Scene,
    Dialogue,
    Music,
}

impl fmt::Display for AssetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Character => write!(f, "character"),
            Self::Scene => write!(f, "scene"),
            Self::Dialogue => write!(f, "dialogue"),
            Self::Music => write!(f, "music"),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssetSink: Send + Sync {
    /// Copy a provider-hosted asset into durable storage. Returns false
    /// when the sink declined the upload.
    async fn upload_from_url(
        &self,
        source_url: String,
        category: AssetCategory,
    ) -> Result<bool, ProviderError>;
}
