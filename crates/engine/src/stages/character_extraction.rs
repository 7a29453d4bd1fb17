//! Stage 1: extract the cast list and story tags from the source narrative.

use std::sync::Arc;

use async_trait::async_trait;
use storyforge_domain::{Game, StoryCharacterInfo};

use crate::infrastructure::ports::{GamePatch, GameRepo, TextGenPort, TextGenRequest};
use crate::pipeline::{PipelineError, Stage, StageOutcome};
use crate::stages::extract_fenced_json;

pub struct CharacterExtraction {
    games: Arc<dyn GameRepo>,
    text_gen: Arc<dyn TextGenPort>,
}

impl CharacterExtraction {
    pub fn new(games: Arc<dyn GameRepo>, text_gen: Arc<dyn TextGenPort>) -> Self {
        Self { games, text_gen }
    }
}

#[async_trait]
impl Stage for CharacterExtraction {
    fn name(&self) -> &'static str {
        "character_extraction"
    }

    fn milestone(&self) -> u8 {
        10
    }

    async fn execute(&self, mut game: Game) -> Result<StageOutcome, PipelineError> {
        let request = TextGenRequest::new(
            "story_character_analysis_system",
            "story_character_analysis_user",
        )
        .replace("content", &game.input_text);

        let response = match self.text_gen.generate(request).await {
            Ok(response) => response,
            Err(error) => {
                return Ok(StageOutcome::failure(
                    game,
                    format!("Character extraction failed: {error}"),
                ));
            }
        };

        let payload = extract_fenced_json(&response);
        let info: StoryCharacterInfo = match serde_json::from_str(payload) {
            Ok(info) => info,
            Err(error) => {
                return Ok(StageOutcome::failure(game, "Failed to parse character info")
                    .with_details(serde_json::json!({
                        "raw_content": response,
                        "error": error.to_string(),
                    })));
            }
        };

        let patch = GamePatch {
            story_characters: Some(info.clone()),
            ..GamePatch::default()
        };
        if !self.games.update(game.id, patch).await? {
            return Ok(StageOutcome::failure(game, "Failed to update game data"));
        }

        game.story_characters = Some(info);
        Ok(StageOutcome::success(game))
    }
}
