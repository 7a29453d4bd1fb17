//! Stage 9: generate a music track for every `bgm` command.

use std::sync::Arc;

use async_trait::async_trait;
use storyforge_domain::{BackgroundMusic, ChapterStatus, Command, Game};

use crate::infrastructure::ports::{
    AssetCategory, AssetSink, GamePatch, GameRepo, MusicGenPort, MusicJobStatus,
};
use crate::pipeline::{fan_out, PipelineError, Stage, StageOutcome};

pub struct BackgroundMusicStage {
    games: Arc<dyn GameRepo>,
    music_gen: Arc<dyn MusicGenPort>,
    assets: Arc<dyn AssetSink>,
    fan_out_limit: usize,
}

impl BackgroundMusicStage {
    pub fn new(
        games: Arc<dyn GameRepo>,
        music_gen: Arc<dyn MusicGenPort>,
        assets: Arc<dyn AssetSink>,
        fan_out_limit: usize,
    ) -> Self {
        Self {
            games,
            music_gen,
            assets,
            fan_out_limit,
        }
    }
}

#[async_trait]
impl Stage for BackgroundMusicStage {
    fn name(&self) -> &'static str {
        "background_music"
    }

    fn milestone(&self) -> u8 {
        90
    }

    fn precondition(&self) -> Option<ChapterStatus> {
        Some(ChapterStatus::BgmGenerated)
    }

    async fn execute(&self, mut game: Game) -> Result<StageOutcome, PipelineError> {
        if game.chapters.is_empty() {
            return Ok(StageOutcome::failure(game, "No chapters found in game"));
        }

        let mut candidates = Vec::new();
        for chapter in game.chapters_to_generate(ChapterStatus::BgmGenerated) {
            for branch in &chapter.branches {
                for command in &branch.commands {
                    if let Command::Bgm { name, prompt } = command {
                        if !game.has_background_music(chapter.index, name) {
                            candidates.push((chapter.index, name.clone(), prompt.clone()));
                        }
                    }
                }
            }
        }
        if candidates.is_empty() {
            return Ok(StageOutcome::failure(
                game,
                "No tracks need music generation",
            ));
        }

        let tasks: Vec<_> = candidates
            .into_iter()
            .map(|(chapter_index, bgm_name, prompt)| {
                let music_gen = self.music_gen.clone();
                let assets = self.assets.clone();
                async move {
                    let result = music_gen.generate(prompt.clone()).await.map_err(|error| {
                        format!("track {bgm_name} (chapter {chapter_index}): {error}")
                    })?;

                    // Only a finished job with a URL counts as a result.
                    let url = match (result.status, result.url) {
                        (MusicJobStatus::Succeeded, Some(url)) => url,
                        _ => {
                            return Err(format!(
                                "track {bgm_name} (chapter {chapter_index}): generation did not finish"
                            ));
                        }
                    };

                    let stored = assets
                        .upload_from_url(url.clone(), AssetCategory::Music)
                        .await
                        .map_err(|error| {
                            format!("track {bgm_name} (chapter {chapter_index}): {error}")
                        })?;
                    if !stored {
                        return Err(format!(
                            "track {bgm_name} (chapter {chapter_index}): asset upload declined"
                        ));
                    }

                    Ok::<BackgroundMusic, String>(BackgroundMusic {
                        chapter_index,
                        bgm_name,
                        prompt,
                        audio_url: url,
                    })
                }
            })
            .collect();

        let mut report = fan_out(self.fan_out_limit, tasks).await;
        for failure in &report.failures {
            tracing::error!(%failure, "background music task failed");
        }

        game.background_music.extend(std::mem::take(&mut report.successes));
        let patch = GamePatch {
            background_music: Some(game.background_music.clone()),
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
                StageOutcome::failure(game, "Some background music failed to generate")
                    .with_details(details),
            )
        }
    }
}
