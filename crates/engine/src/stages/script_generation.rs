//! Stage 3: generate each chapter's branching script from its content.

use std::sync::Arc;

use async_trait::async_trait;
use storyforge_domain::{parse_script, Chapter, ChapterStatus, Game};

use crate::infrastructure::ports::{GamePatch, GameRepo, TextGenPort, TextGenRequest};
use crate::pipeline::{fan_out, PipelineError, Stage, StageOutcome};

pub struct ScriptGeneration {
    games: Arc<dyn GameRepo>,
    text_gen: Arc<dyn TextGenPort>,
    fan_out_limit: usize,
}

impl ScriptGeneration {
    pub fn new(games: Arc<dyn GameRepo>, text_gen: Arc<dyn TextGenPort>, fan_out_limit: usize) -> Self {
        Self {
            games,
            text_gen,
            fan_out_limit,
        }
    }
}

#[async_trait]
impl Stage for ScriptGeneration {
    fn name(&self) -> &'static str {
        "script_generation"
    }

    fn milestone(&self) -> u8 {
        30
    }

    fn precondition(&self) -> Option<ChapterStatus> {
        Some(ChapterStatus::NotGenerated)
    }

    async fn execute(&self, mut game: Game) -> Result<StageOutcome, PipelineError> {
        if game.chapters.is_empty() {
            return Ok(StageOutcome::failure(game, "No chapters found in game"));
        }
        let Some(info) = &game.story_characters else {
            return Ok(StageOutcome::failure(game, "No character information found"));
        };
        if info.characters.is_empty() {
            return Ok(StageOutcome::failure(
                game,
                "No characters found in character information",
            ));
        }

        let cast_names = info
            .characters
            .iter()
            .map(|character| character.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let work = game.chapters_to_generate(ChapterStatus::NotGenerated);
        if work.is_empty() {
            return Ok(StageOutcome::success(game));
        }

        let tasks: Vec<_> = work
            .into_iter()
            .map(|mut chapter| {
                let text_gen = self.text_gen.clone();
                let cast_names = cast_names.clone();
                async move {
                    let request = TextGenRequest::new(
                        "novel_chapter_script_system",
                        "novel_chapter_script_user",
                    )
                    .replace("content", &chapter.content)
                    .replace("role_names", cast_names);

                    let response = text_gen
                        .generate(request)
                        .await
                        .map_err(|error| format!("chapter {}: {error}", chapter.index))?;
                    let branches = parse_script(&response)
                        .map_err(|error| format!("chapter {}: {error}", chapter.index))?;

                    chapter.branches = branches;
                    chapter.advance_to(ChapterStatus::ScriptGenerated);
                    Ok::<Chapter, String>(chapter)
                }
            })
            .collect();

        let mut report = fan_out(self.fan_out_limit, tasks).await;
        for failure in &report.failures {
            tracing::error!(%failure, "script generation task failed");
        }

        // Successful chapters are merged and persisted even when siblings
        // failed; a re-run only re-attempts the chapters still NotGenerated.
        game.merge_chapters(std::mem::take(&mut report.successes));
        let patch = GamePatch {
            chapters: Some(game.chapters.clone()),
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
                StageOutcome::failure(game, "Some chapters failed to generate script")
                    .with_details(details),
            )
        }
    }
}
