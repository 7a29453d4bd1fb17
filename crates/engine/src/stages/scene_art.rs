//! Stage 7: render a 16:9 background image for every `bg` command.

use std::sync::Arc;

use async_trait::async_trait;
use storyforge_domain::{ChapterStatus, Command, Game, SceneArt};

use crate::infrastructure::ports::{
    AssetCategory, AssetSink, GamePatch, GameRepo, ImageGenPort, ImageRequest,
};
use crate::pipeline::{fan_out, PipelineError, Stage, StageOutcome};

pub struct SceneArtStage {
    games: Arc<dyn GameRepo>,
    image_gen: Arc<dyn ImageGenPort>,
    assets: Arc<dyn AssetSink>,
    fan_out_limit: usize,
}

impl SceneArtStage {
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
impl Stage for SceneArtStage {
    fn name(&self) -> &'static str {
        "scene_art"
    }

    fn milestone(&self) -> u8 {
        70
    }

    fn precondition(&self) -> Option<ChapterStatus> {
        Some(ChapterStatus::BgmGenerated)
    }

    async fn execute(&self, mut game: Game) -> Result<StageOutcome, PipelineError> {
        if game.chapters.is_empty() {
            return Ok(StageOutcome::failure(game, "No chapters found in game"));
        }

        // Candidate set: every bg command in a finished chapter that has no
        // stored image yet, keyed by (chapter index, scene name).
        let mut candidates = Vec::new();
        for chapter in game.chapters_to_generate(ChapterStatus::BgmGenerated) {
            for branch in &chapter.branches {
                for command in &branch.commands {
                    if let Command::Bg { name, prompt } = command {
                        if !game.has_scene_art(chapter.index, name) {
                            candidates.push((chapter.index, name.clone(), prompt.clone()));
                        }
                    }
                }
            }
        }
        if candidates.is_empty() {
            return Ok(StageOutcome::failure(
                game,
                "No scenes need image generation",
            ));
        }

        let tasks: Vec<_> = candidates
            .into_iter()
            .map(|(chapter_index, scene_name, prompt)| {
                let image_gen = self.image_gen.clone();
                let assets = self.assets.clone();
                async move {
                    let request = ImageRequest {
                        prompt,
                        negative_prompt: None,
                        width: 1024,
                        height: 576,
                    };
                    let result = image_gen.generate(request).await.map_err(|error| {
                        format!("scene {scene_name} (chapter {chapter_index}): {error}")
                    })?;

                    let stored = assets
                        .upload_from_url(result.url.clone(), AssetCategory::Scene)
                        .await
                        .map_err(|error| {
                            format!("scene {scene_name} (chapter {chapter_index}): {error}")
                        })?;
                    if !stored {
                        return Err(format!(
                            "scene {scene_name} (chapter {chapter_index}): asset upload declined"
                        ));
                    }

                    Ok::<SceneArt, String>(SceneArt {
                        chapter_index,
                        scene_name,
                        image_url: result.url,
                    })
                }
            })
            .collect();

        let mut report = fan_out(self.fan_out_limit, tasks).await;
        for failure in &report.failures {
            tracing::error!(%failure, "scene art task failed");
        }

        game.scene_art.extend(std::mem::take(&mut report.successes));
        let patch = GamePatch {
            scene_art: Some(game.scene_art.clone()),
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
                StageOutcome::failure(game, "Some scene images failed to generate")
                    .with_details(details),
            )
        }
    }
}
