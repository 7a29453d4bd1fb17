//! Stage 8: synthesize speech for every non-protagonist dialogue line.

use std::sync::Arc;

use async_trait::async_trait;
use storyforge_domain::{
    ChapterStatus, Command, DialogueAudio, Game, StoryCharacter, StoryCharacterInfo,
};

use crate::infrastructure::ports::{
    AssetCategory, AssetSink, GamePatch, GameRepo, SpeechGenPort, SpeechRequest,
};
use crate::pipeline::{fan_out, PipelineError, Stage, StageOutcome};

pub struct DialogueAudioStage {
    games: Arc<dyn GameRepo>,
    speech_gen: Arc<dyn SpeechGenPort>,
    assets: Arc<dyn AssetSink>,
    fan_out_limit: usize,
}

impl DialogueAudioStage {
    pub fn new(
        games: Arc<dyn GameRepo>,
        speech_gen: Arc<dyn SpeechGenPort>,
        assets: Arc<dyn AssetSink>,
        fan_out_limit: usize,
    ) -> Self {
        Self {
            games,
            speech_gen,
            assets,
            fan_out_limit,
        }
    }
}

/// Resolve a script speaker name against the cast. Script names drift from
/// the extracted cast (honorifics, shortened forms), so an exact match is
/// tried first and containment in either direction second.
fn find_character<'a>(
    speaker: &str,
    info: &'a StoryCharacterInfo,
) -> Option<&'a StoryCharacter> {
    let speaker = speaker.trim();

    for character in &info.characters {
        let name = character.name.trim();
        if name.is_empty() {
            continue;
        }
        if name == speaker || speaker.contains(name) || name.contains(speaker) {
            return Some(character);
        }
    }
    None
}

/// The voice library entry may carry a trailing confidence annotation such
/// as `巴多里奥（匹配度90%）`; the speaker reference is everything before it.
fn speaker_reference(voice_match: &str) -> String {
    voice_match
        .split('（')
        .next()
        .unwrap_or(voice_match)
        .trim()
        .to_string()
}

#[async_trait]
impl Stage for DialogueAudioStage {
    fn name(&self) -> &'static str {
        "dialogue_audio"
    }

    fn milestone(&self) -> u8 {
        80
    }

    fn precondition(&self) -> Option<ChapterStatus> {
        Some(ChapterStatus::BgmGenerated)
    }

    async fn execute(&self, mut game: Game) -> Result<StageOutcome, PipelineError> {
        if game.chapters.is_empty() {
            return Ok(StageOutcome::failure(game, "No chapters found in game"));
        }
        let Some(info) = game.story_characters.clone() else {
            return Ok(StageOutcome::failure(game, "No character information found"));
        };

        // One task per dialogue line with a resolvable, non-protagonist
        // speaker, keyed by (chapter index, text).
        let mut candidates = Vec::new();
        for chapter in game.chapters_to_generate(ChapterStatus::BgmGenerated) {
            for branch in &chapter.branches {
                for command in &branch.commands {
                    let Command::Dialogue {
                        character,
                        emotion,
                        text,
                        ..
                    } = command
                    else {
                        continue;
                    };
                    let Some(cast_member) = find_character(character, &info) else {
                        continue;
                    };
                    if cast_member.is_protagonist
                        || game.has_dialogue_audio(chapter.index, text)
                    {
                        continue;
                    }
                    candidates.push((
                        chapter.index,
                        character.clone(),
                        emotion.clone(),
                        text.clone(),
                        speaker_reference(&cast_member.voice_match),
                    ));
                }
            }
        }
        if candidates.is_empty() {
            return Ok(StageOutcome::failure(
                game,
                "No dialogue lines need audio generation",
            ));
        }

        let tasks: Vec<_> = candidates
            .into_iter()
            .map(|(chapter_index, character_name, emotion, text, speaker)| {
                let speech_gen = self.speech_gen.clone();
                let assets = self.assets.clone();
                async move {
                    let request = SpeechRequest {
                        text: text.clone(),
                        speaker,
                        emotion,
                    };
                    let result = speech_gen.generate(request).await.map_err(|error| {
                        format!("dialogue in chapter {chapter_index} ({character_name}): {error}")
                    })?;

                    let stored = assets
                        .upload_from_url(result.url.clone(), AssetCategory::Dialogue)
                        .await
                        .map_err(|error| {
                            format!(
                                "dialogue in chapter {chapter_index} ({character_name}): {error}"
                            )
                        })?;
                    if !stored {
                        return Err(format!(
                            "dialogue in chapter {chapter_index} ({character_name}): asset upload declined"
                        ));
                    }

                    Ok::<DialogueAudio, String>(DialogueAudio {
                        chapter_index,
                        character_name,
                        text,
                        audio_url: result.url,
                    })
                }
            })
            .collect();

        let mut report = fan_out(self.fan_out_limit, tasks).await;
        for failure in &report.failures {
            tracing::error!(%failure, "dialogue audio task failed");
        }

        game.dialogue_audio.extend(std::mem::take(&mut report.successes));
        let patch = GamePatch {
            dialogue_audio: Some(game.dialogue_audio.clone()),
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
                StageOutcome::failure(game, "Some dialogue audio failed to generate")
                    .with_details(details),
            )
        }
    }
}
