//! Stage 2: split the source narrative into chapters.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use storyforge_domain::{Chapter, Game};

use crate::infrastructure::ports::{GamePatch, GameRepo, TextGenPort, TextGenRequest};
use crate::pipeline::{PipelineError, Stage, StageOutcome};
use crate::stages::extract_fenced_json;

#[derive(Debug, Deserialize)]
struct SplitResponse {
    chapters: Vec<ChapterSpan>,
}

/// One chapter span as the provider reports it. Lines are 1-based and the
/// end line is inclusive.
#[derive(Debug, Deserialize)]
struct ChapterSpan {
    #[serde(default)]
    title: Option<String>,
    summary: String,
    chapter_start_line: usize,
    chapter_end_line: usize,
}

pub struct ChapterSplit {
    games: Arc<dyn GameRepo>,
    text_gen: Arc<dyn TextGenPort>,
}

impl ChapterSplit {
    pub fn new(games: Arc<dyn GameRepo>, text_gen: Arc<dyn TextGenPort>) -> Self {
        Self { games, text_gen }
    }
}

#[async_trait]
impl Stage for ChapterSplit {
    fn name(&self) -> &'static str {
        "chapter_split"
    }

    fn milestone(&self) -> u8 {
        10
    }

    async fn execute(&self, mut game: Game) -> Result<StageOutcome, PipelineError> {
        let request = TextGenRequest::new("novel_chapter_split_system", "novel_chapter_split_user")
            .replace("content", &game.input_text);

        let response = match self.text_gen.generate(request).await {
            Ok(response) => response,
            Err(error) => {
                return Ok(StageOutcome::failure(
                    game,
                    format!("Chapter split failed: {error}"),
                ));
            }
        };

        let payload = extract_fenced_json(&response);
        let spans = match serde_json::from_str::<SplitResponse>(payload) {
            Ok(split) => split.chapters,
            Err(error) => {
                return Ok(StageOutcome::failure(game, "Failed to parse chapters data")
                    .with_details(serde_json::json!({
                        "raw_content": response,
                        "error": error.to_string(),
                    })));
            }
        };

        let chapters = match build_chapters(&game.input_text, spans) {
            Ok(chapters) => chapters,
            Err(message) => return Ok(StageOutcome::failure(game, message)),
        };

        let patch = GamePatch {
            chapters: Some(chapters.clone()),
            total_chapters: Some(chapters.len()),
            ..GamePatch::default()
        };
        if !self.games.update(game.id, patch).await? {
            return Ok(StageOutcome::failure(game, "Failed to update game data"));
        }

        game.total_chapters = Some(chapters.len());
        game.chapters = chapters;
        Ok(StageOutcome::success(game))
    }
}

fn build_chapters(input_text: &str, spans: Vec<ChapterSpan>) -> Result<Vec<Chapter>, String> {
    let lines: Vec<&str> = input_text.lines().collect();
    let mut chapters = Vec::with_capacity(spans.len());

    for (index, span) in spans.into_iter().enumerate() {
        let start = span.chapter_start_line;
        let end = span.chapter_end_line.min(lines.len());
        let content = if start >= 1 && start <= end {
            lines[start - 1..end].join("\n")
        } else {
            String::new()
        };

        let chapter = Chapter::new(
            index,
            span.title,
            span.summary,
            content,
            span.chapter_start_line,
            span.chapter_end_line,
        )
        .map_err(|error| format!("Failed to parse chapters data: {error}"))?;
        chapters.push(chapter);
    }

    Ok(chapters)
}

#[cfg(test)]
mod tests {
    use storyforge_domain::ChapterStatus;

    use super::*;
    use crate::infrastructure::ports::{MockGameRepo, MockTextGenPort};

    const NOVEL: &str = "line one\nline two\nline three\nline four\nline five";

    #[tokio::test]
    async fn splits_the_novel_and_slices_chapter_content() {
        let mut text_gen = MockTextGenPort::new();
        text_gen.expect_generate().returning(|_| {
            Ok(r#"```json
{"chapters": [
    {"title": "第一章", "summary": "开端", "chapter_start_line": 1, "chapter_end_line": 2},
    {"summary": "发展", "chapter_start_line": 3, "chapter_end_line": 5}
]}
```"#
                .to_string())
        });

        let mut games = MockGameRepo::new();
        games
            .expect_update()
            .withf(|_, patch| patch.total_chapters == Some(2))
            .returning(|_, _| Ok(true));

        let stage = ChapterSplit::new(Arc::new(games), Arc::new(text_gen));
        let outcome = stage.execute(Game::new("t", NOVEL, 3)).await.unwrap();

        assert!(outcome.success);
        let chapters = &outcome.game.chapters;
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].index, 0);
        assert_eq!(chapters[0].title.as_deref(), Some("第一章"));
        assert_eq!(chapters[0].content, "line one\nline two");
        assert_eq!(chapters[1].content, "line three\nline four\nline five");
        assert_eq!(chapters[1].status, ChapterStatus::NotGenerated);
        assert_eq!(outcome.game.total_chapters, Some(2));
    }

    #[tokio::test]
    async fn span_with_end_not_after_start_fails_the_stage() {
        let mut text_gen = MockTextGenPort::new();
        text_gen.expect_generate().returning(|_| {
            Ok(r#"{"chapters": [{"summary": "s", "chapter_start_line": 3, "chapter_end_line": 3}]}"#
                .to_string())
        });

        let games = MockGameRepo::new();
        let stage = ChapterSplit::new(Arc::new(games), Arc::new(text_gen));
        let outcome = stage.execute(Game::new("t", NOVEL, 3)).await.unwrap();

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("end line"));
    }

    #[tokio::test]
    async fn non_json_response_fails_with_raw_content() {
        let mut text_gen = MockTextGenPort::new();
        text_gen
            .expect_generate()
            .returning(|_| Ok("chapter one is about...".to_string()));

        let games = MockGameRepo::new();
        let stage = ChapterSplit::new(Arc::new(games), Arc::new(text_gen));
        let outcome = stage.execute(Game::new("t", NOVEL, 3)).await.unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("Failed to parse chapters data"));
        assert!(outcome.error_details.is_some());
    }
}
