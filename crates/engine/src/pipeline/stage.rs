//! Stage contract shared by every pipeline step.

use std::sync::Arc;

use async_trait::async_trait;
use storyforge_domain::{ChapterStatus, DomainError, Game, GameId};

use crate::infrastructure::ports::RepoError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Game not found: {0}")]
    GameNotFound(GameId),
    #[error("A pipeline run is already in flight for game {0}")]
    AlreadyRunning(GameId),
    #[error("Stage {stage} failed: {message}")]
    StageFailed {
        stage: &'static str,
        message: String,
        details: Option<serde_json::Value>,
    },
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// What a stage hands back to the scheduler.
///
/// `success = false` reports a business-level failure (bad provider output,
/// partially-failed fan-out) without tearing down the run machinery; the
/// scheduler halts and persists the error. An `Err` from [`Stage::execute`]
/// is reserved for infrastructure faults such as a lost database.
#[derive(Debug)]
pub struct StageOutcome {
    pub success: bool,
    /// The aggregate with this stage's results merged in, successful or not.
    pub game: Game,
    pub error: Option<String>,
    pub error_details: Option<serde_json::Value>,
}

impl StageOutcome {
    pub fn success(game: Game) -> Self {
        Self {
            success: true,
            game,
            error: None,
            error_details: None,
        }
    }

    pub fn failure(game: Game, error: impl Into<String>) -> Self {
        Self {
            success: false,
            game,
            error: Some(error.into()),
            error_details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error_details = Some(details);
        self
    }
}

/// One pipeline step. Implementations own their work-set selection and
/// persist their domain output themselves; the scheduler owns progress
/// and status transitions.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Progress percent recorded when this stage fully succeeds.
    fn milestone(&self) -> u8;

    /// Chapter status this stage consumes, when it fans out over chapters.
    fn precondition(&self) -> Option<ChapterStatus> {
        None
    }

    async fn execute(&self, game: Game) -> Result<StageOutcome, PipelineError>;
}

/// An entry in the scheduler's explicit ordered stage list. Metadata is
/// lifted out of the handler so the canonical order reads as a table.
#[derive(Clone)]
pub struct StageDescriptor {
    pub name: &'static str,
    pub precondition: Option<ChapterStatus>,
    pub milestone: u8,
    pub handler: Arc<dyn Stage>,
}

impl StageDescriptor {
    pub fn new(handler: Arc<dyn Stage>) -> Self {
        Self {
            name: handler.name(),
            precondition: handler.precondition(),
            milestone: handler.milestone(),
            handler,
        }
    }
}
