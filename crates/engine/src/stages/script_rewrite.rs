//! Stages 4 and 5: have the provider weave `bg` / `bgm` commands into each
//! chapter's script. Both stages share the same shape: serialize the current
//! branches, prompt, re-parse, advance the chapter.

use std::sync::Arc;

use async_trait::async_trait;
use storyforge_domain::{parse_script, serialize_script, Chapter, ChapterStatus, Game};

use crate::infrastructure::ports::{GamePatch, GameRepo, TextGenPort, TextGenRequest};
use crate::pipeline::{fan_out, PipelineError, Stage, StageOutcome};

pub struct ScriptRewrite {
    games: Arc<dyn GameRepo>,
    text_gen: Arc<dyn TextGenPort>,
    fan_out_limit: usize,
    name: &'static str,
    milestone: u8,
    system_prompt: &'static str,
    user_prompt: &'static str,
    from: ChapterStatus,
    to: ChapterStatus,
    failure_message: &'static str,
}

pub fn script_background(
    games: Arc<dyn GameRepo>,
    text_gen: Arc<dyn TextGenPort>,
    fan_out_limit: usize,
) -> ScriptRewrite {
    ScriptRewrite {
        games,
        text_gen,
        fan_out_limit,
        name: "script_background",
        milestone: 40,
        system_prompt: "novel_script_background_system",
        user_prompt: "novel_script_background_user",
        from: ChapterStatus::ScriptGenerated,
        to: ChapterStatus::BackgroundGenerated,
        failure_message: "Some chapters failed to generate background",
    }
}

pub fn script_bgm(
    games: Arc<dyn GameRepo>,
    text_gen: Arc<dyn TextGenPort>,
    fan_out_limit: usize,
) -> ScriptRewrite {
    ScriptRewrite {
        games,
        text_gen,
        fan_out_limit,
        name: "script_bgm",
        milestone: 50,
        system_prompt: "novel_script_bgm_system",
        user_prompt: "novel_script_bgm_user",
        from: ChapterStatus::BackgroundGenerated,
        to: ChapterStatus::BgmGenerated,
        failure_message: "Some chapters failed to generate BGM",
    }
}

#[async_trait]
impl Stage for ScriptRewrite {
    fn name(&self) -> &'static str {
        self.name
    }

    fn milestone(&self) -> u8 {
        self.milestone
    }

    fn precondition(&self) -> Option<ChapterStatus> {
        Some(self.from)
    }

    async fn execute(&self, mut game: Game) -> Result<StageOutcome, PipelineError> {
        if game.chapters.is_empty() {
            return Ok(StageOutcome::failure(game, "No chapters found in game"));
        }

        let work = game.chapters_to_generate(self.from);
        if work.is_empty() {
            return Ok(StageOutcome::success(game));
        }

        let tasks: Vec<_> = work
            .into_iter()
            .map(|mut chapter| {
                let text_gen = self.text_gen.clone();
                let to = self.to;
                let system_prompt = self.system_prompt;
                let user_prompt = self.user_prompt;
                async move {
                    let script = serialize_script(&chapter.branches)
                        .map_err(|error| format!("chapter {}: {error}", chapter.index))?;

                    let request =
                        TextGenRequest::new(system_prompt, user_prompt).replace("script", script);
                    let response = text_gen
                        .generate(request)
                        .await
                        .map_err(|error| format!("chapter {}: {error}", chapter.index))?;
                    let branches = parse_script(&response)
                        .map_err(|error| format!("chapter {}: {error}", chapter.index))?;

                    chapter.branches = branches;
                    chapter.advance_to(to);
                    Ok::<Chapter, String>(chapter)
                }
            })
            .collect();

        let mut report = fan_out(self.fan_out_limit, tasks).await;
        for failure in &report.failures {
            tracing::error!(stage = self.name, %failure, "script rewrite task failed");
        }

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
            Ok(StageOutcome::failure(game, self.failure_message).with_details(details))
        }
    }
}
