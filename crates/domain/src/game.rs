//! The `Game` aggregate: one in-progress or completed generation job.
//!
//! The aggregate is created on request intake with `status = Generating`,
//! mutated exclusively by stage handlers during a pipeline run, and ends up
//! `Completed` (with a linked runtime projection) or `Failed`. The four
//! resource collections are append-only; their natural keys are what makes
//! a pipeline re-run idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::{ChapterId, GameId, RuntimeGameId};
use crate::script::Branch;

/// Terminal/lifecycle status of the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Generating,
    Completed,
    Failed,
}

/// Per-chapter generation status.
///
/// Ordered: a chapter only ever moves forward through these states
/// (see [`Chapter::advance_to`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    NotGenerated,
    ScriptGenerated,
    BackgroundGenerated,
    BgmGenerated,
}

/// One chapter of the source narrative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    pub index: usize,
    pub title: Option<String>,
    pub summary: String,
    /// Chapter text, sliced out of the aggregate's input text.
    pub content: String,
    /// 1-based line span in the input text; `end_line` is inclusive.
    pub start_line: usize,
    pub end_line: usize,
    pub branches: Vec<Branch>,
    pub status: ChapterStatus,
}

impl Chapter {
    pub fn new(
        index: usize,
        title: Option<String>,
        summary: impl Into<String>,
        content: impl Into<String>,
        start_line: usize,
        end_line: usize,
    ) -> Result<Self, DomainError> {
        if end_line <= start_line {
            return Err(DomainError::validation(format!(
                "chapter {index}: end line {end_line} must be greater than start line {start_line}"
            )));
        }
        Ok(Self {
            id: ChapterId::new(),
            index,
            title,
            summary: summary.into(),
            content: content.into(),
            start_line,
            end_line,
            branches: Vec::new(),
            status: ChapterStatus::NotGenerated,
        })
    }

    /// Move the chapter's status forward. Backward moves are ignored —
    /// chapter status is monotonically non-decreasing.
    pub fn advance_to(&mut self, status: ChapterStatus) {
        if status > self.status {
            self.status = status;
        }
    }
}

/// Pipeline progress. `current_stage` is the sole resumption checkpoint:
/// empty means the pipeline never started, otherwise it names the last
/// stage that fully succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current_stage: String,
    pub percent: u8,
    pub completed_stages: Vec<String>,
    pub error_message: Option<String>,
}

impl Progress {
    /// Record a fully-successful stage.
    pub fn advance(&mut self, stage: &str, percent: u8) {
        self.current_stage = stage.to_string();
        self.percent = percent;
        self.completed_stages.push(stage.to_string());
        self.error_message = None;
    }
}

/// A character extracted from the source narrative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryCharacter {
    pub name: String,
    pub gender: String,
    pub is_protagonist: bool,
    #[serde(default)]
    pub description: Option<serde_json::Value>,
    /// Voice library entry matched to this character; may carry a trailing
    /// confidence annotation (e.g. `巴多里奥（匹配度90%）`).
    pub voice_match: String,
    pub image_prompt: String,
}

/// Extraction result: story tags plus the cast list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryCharacterInfo {
    pub tags: Vec<String>,
    pub characters: Vec<StoryCharacter>,
}

/// Character portrait, keyed by character name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterArt {
    pub character_name: String,
    pub image_url: String,
}

/// Scene background image, keyed by (chapter index, scene name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneArt {
    pub chapter_index: usize,
    pub scene_name: String,
    pub image_url: String,
}

/// Synthesized dialogue audio, keyed by (chapter index, dialogue text).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueAudio {
    pub chapter_index: usize,
    pub character_name: String,
    pub text: String,
    pub audio_url: String,
}

/// Generated background music, keyed by (chapter index, bgm name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundMusic {
    pub chapter_index: usize,
    pub bgm_name: String,
    pub prompt: String,
    pub audio_url: String,
}

/// The aggregate root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub title: String,
    /// The raw narrative text everything is generated from.
    pub input_text: String,
    pub story_characters: Option<StoryCharacterInfo>,
    pub chapters: Vec<Chapter>,
    pub total_chapters: Option<usize>,
    /// Watermark: chapters with `index < generate_up_to` are in scope for
    /// every stage; the rest wait for a later run.
    pub generate_up_to: usize,
    pub character_art: Vec<CharacterArt>,
    pub scene_art: Vec<SceneArt>,
    pub dialogue_audio: Vec<DialogueAudio>,
    pub background_music: Vec<BackgroundMusic>,
    pub status: GameStatus,
    pub error: Option<String>,
    pub progress: Progress,
    pub runtime_id: Option<RuntimeGameId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Game {
    pub fn new(title: impl Into<String>, input_text: impl Into<String>, generate_up_to: usize) -> Self {
        let now = Utc::now();
        Self {
            id: GameId::new(),
            title: title.into(),
            input_text: input_text.into(),
            story_characters: None,
            chapters: Vec::new(),
            total_chapters: None,
            generate_up_to,
            character_art: Vec::new(),
            scene_art: Vec::new(),
            dialogue_audio: Vec::new(),
            background_music: Vec::new(),
            status: GameStatus::Generating,
            error: None,
            progress: Progress::default(),
            runtime_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Chapters a stage with the given precondition still has to process:
    /// status matches and index is below the watermark.
    pub fn chapters_to_generate(&self, status: ChapterStatus) -> Vec<Chapter> {
        self.chapters
            .iter()
            .filter(|c| c.status == status && c.index < self.generate_up_to)
            .cloned()
            .collect()
    }

    /// Replace chapters by index, keeping the original order. Chapters not
    /// present in `updated` are left untouched.
    pub fn merge_chapters(&mut self, updated: Vec<Chapter>) {
        for chapter in updated {
            if let Some(slot) = self.chapters.iter_mut().find(|c| c.index == chapter.index) {
                *slot = chapter;
            }
        }
    }

    pub fn has_character_art(&self, character_name: &str) -> bool {
        self.character_art
            .iter()
            .any(|r| r.character_name == character_name)
    }

    pub fn has_scene_art(&self, chapter_index: usize, scene_name: &str) -> bool {
        self.scene_art
            .iter()
            .any(|r| r.chapter_index == chapter_index && r.scene_name == scene_name)
    }

    pub fn has_dialogue_audio(&self, chapter_index: usize, text: &str) -> bool {
        self.dialogue_audio
            .iter()
            .any(|r| r.chapter_index == chapter_index && r.text == text)
    }

    pub fn has_background_music(&self, chapter_index: usize, bgm_name: &str) -> bool {
        self.background_music
            .iter()
            .any(|r| r.chapter_index == chapter_index && r.bgm_name == bgm_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapter_rejects_inverted_line_span() {
        let err = Chapter::new(0, None, "s", "c", 10, 10).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn chapter_status_never_moves_backward() {
        let mut chapter = Chapter::new(0, None, "s", "c", 1, 5).unwrap();
        chapter.advance_to(ChapterStatus::BgmGenerated);
        chapter.advance_to(ChapterStatus::ScriptGenerated);
        assert_eq!(chapter.status, ChapterStatus::BgmGenerated);
    }

    #[test]
    fn chapters_to_generate_respects_watermark_and_status() {
        let mut game = Game::new("t", "text", 2);
        for i in 0..3 {
            game.chapters
                .push(Chapter::new(i, None, "s", "c", 1, 5).unwrap());
        }
        game.chapters[1].advance_to(ChapterStatus::ScriptGenerated);

        let pending = game.chapters_to_generate(ChapterStatus::NotGenerated);
        // chapter 1 has moved on, chapter 2 is past the watermark
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].index, 0);
    }

    #[test]
    fn merge_chapters_replaces_by_index_in_place() {
        let mut game = Game::new("t", "text", 2);
        for i in 0..2 {
            game.chapters
                .push(Chapter::new(i, None, "s", "c", 1, 5).unwrap());
        }
        let mut updated = game.chapters[1].clone();
        updated.advance_to(ChapterStatus::ScriptGenerated);
        game.merge_chapters(vec![updated]);

        assert_eq!(game.chapters[0].status, ChapterStatus::NotGenerated);
        assert_eq!(game.chapters[1].status, ChapterStatus::ScriptGenerated);
        assert_eq!(game.chapters[1].index, 1);
    }

    #[test]
    fn progress_advance_records_completed_stage() {
        let mut progress = Progress::default();
        progress.advance("chapter_split", 10);
        progress.advance("script_generation", 30);
        assert_eq!(progress.current_stage, "script_generation");
        assert_eq!(progress.percent, 30);
        assert_eq!(
            progress.completed_stages,
            vec!["chapter_split", "script_generation"]
        );
    }
}
