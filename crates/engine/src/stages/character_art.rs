//! Stage 6: generate a portrait for every cast member that lacks one.

use std::sync::Arc;

use async_trait::async_trait;
use storyforge_domain::{CharacterArt, Game};

use crate::infrastructure::ports::{
    AssetCategory, AssetSink, GamePatch, GameRepo, ImageGenPort, ImageRequest,
};
use crate::pipeline::{fan_out, PipelineError, Stage, StageOutcome};

const PORTRAIT_NEGATIVE_PROMPT: &str = "bad quality, blurry, distorted, deformed";

pub struct CharacterArtStage {
    games: Arc<dyn GameRepo>,
    image_gen: Arc<dyn ImageGenPort>,
    assets: Arc<dyn AssetSink>,
    fan_out_limit: usize,
}

impl CharacterArtStage {
    pub fn new(
        games: Arc<dyn GameRepo>,
        image_gen: Arc<dyn ImageGenPort>,
        assets: Arc<dyn AssetSink>,
        fan_out_limit: usize,
    ) -> Self {
        Self {
            games,
            image_gen,
            assets,
            fan_out_limit,
        }
    }
}

#[async_trait]
impl Stage for CharacterArtStage {
    fn name(&self) -> &'static str {
        "character_art"
    }

    fn milestone(&self) -> u8 {
        60
    }

    async fn execute(&self, mut game: Game) -> Result<StageOutcome, PipelineError> {
        let Some(info) = &game.story_characters else {
            return Ok(StageOutcome::failure(game, "No character information found"));
        };
        if info.characters.is_empty() {
            return Ok(StageOutcome::failure(
                game,
                "No characters found in character information",
            ));
        }

        let pending: Vec<_> = info
            .characters
            .iter()
            .filter(|character| !game.has_character_art(&character.name))
            .cloned()
            .collect();
        if pending.is_empty() {
            return Ok(StageOutcome::failure(
                game,
                "No characters need portrait generation",
            ));
        }

        let tasks: Vec<_> = pending
            .into_iter()
            .map(|character| {
                let image_gen = self.image_gen.clone();
                let assets = self.assets.clone();
                async move {
                    let request = ImageRequest {
                        prompt: character.image_prompt.clone(),
                        negative_prompt: Some(PORTRAIT_NEGATIVE_PROMPT.to_string()),
                        width: 512,
                        height: 768,
                    };
                    let result = image_gen
                        .generate(request)
                        .await
                        .map_err(|error| format!("character {}: {error}", character.name))?;

                    let stored = assets
                        .upload_from_url(result.url.clone(), AssetCategory::Character)
                        .await
                        .map_err(|error| format!("character {}: {error}", character.name))?;
                    if !stored {
                        return Err(format!("character {}: asset upload declined", character.name));
                    }

                    Ok::<CharacterArt, String>(CharacterArt {
                        character_name: character.name,
                        image_url: result.url,
                    })
                }
            })
            .collect();

        let mut report = fan_out(self.fan_out_limit, tasks).await;
        for failure in &report.failures {
            tracing::error!(%failure, "character art task failed");
        }

        game.character_art.extend(std::mem::take(&mut report.successes));
        let patch = GamePatch {
            character_art: Some(game.character_art.clone()),
            ..GamePatch::default()
        };
        if !self.games.update(game.id, patch).await? {
            return Ok(StageOutcome::failure(game, "Failed to update game data"));
        }

        if report.all_succeeded() {
            Ok(StageOutcome::success(game))
        } else {
            let details = serde_json::json!({ "failures": report.failures });
            Ok(
                StageOutcome::failure(game, "Some character images failed to generate")
                    .with_details(details),
            )
        }
    }
}
