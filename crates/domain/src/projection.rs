//! Runtime projection: the flattened, asset-resolved structure a player
//! client consumes.
//!
//! Built exactly once, after every pipeline stage has succeeded, and
//! immutable afterwards — regenerating a game produces a new projection and
//! relinks the aggregate. Scene, dialogue and music references are resolved
//! to the URLs stored in the aggregate's resource collections, and
//! consecutive choice commands are coalesced into a single choice set so the
//! player never has to group them itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::game::{Chapter, Game};
use crate::ids::{ChapterId, GameId, RuntimeGameId};
use crate::script::Command;

/// One option of a coalesced choice set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub text: String,
    pub target: String,
}

/// A play-ready command with every asset reference resolved.
///
/// Dialogue audio is `None` for lines that never got speech synthesis
/// (protagonist lines are skipped by design).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeCommand {
    Narration {
        text: String,
    },
    Dialogue {
        character: String,
        emotion: String,
        text: String,
        audio_url: Option<String>,
    },
    ChoiceSet {
        options: Vec<ChoiceOption>,
    },
    Jump {
        target: String,
    },
    Background {
        name: String,
        image_url: Option<String>,
    },
    Bgm {
        name: String,
        audio_url: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeBranch {
    pub name: String,
    pub commands: Vec<RuntimeCommand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeChapter {
    pub id: ChapterId,
    pub index: usize,
    pub title: String,
    pub branches: Vec<RuntimeBranch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeCharacterArt {
    pub name: String,
    pub image_url: String,
}

/// The projection root, persisted as its own entity and linked back to the
/// aggregate it was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeGame {
    pub id: RuntimeGameId,
    pub game_id: GameId,
    pub title: String,
    pub total_chapters: usize,
    pub chapters: Vec<RuntimeChapter>,
    pub characters: Vec<RuntimeCharacterArt>,
    pub created_at: DateTime<Utc>,
}

impl RuntimeGame {
    /// Build the projection from a fully-generated aggregate.
    ///
    /// Only chapters below the watermark are included. A chapter in scope
    /// with no branches means the aggregate was never fully generated, which
    /// is a projection error rather than something to paper over.
    pub fn project(game: &Game) -> Result<Self, DomainError> {
        let mut chapters = Vec::new();
        for chapter in &game.chapters {
            if chapter.index >= game.generate_up_to {
                continue;
            }
            chapters.push(project_chapter(game, chapter)?);
        }

        Ok(Self {
            id: RuntimeGameId::new(),
            game_id: game.id,
            title: game.title.clone(),
            total_chapters: chapters.len(),
            chapters,
            characters: game
                .character_art
                .iter()
                .map(|art| RuntimeCharacterArt {
                    name: art.character_name.clone(),
                    image_url: art.image_url.clone(),
                })
                .collect(),
            created_at: Utc::now(),
        })
    }
}

fn project_chapter(game: &Game, chapter: &Chapter) -> Result<RuntimeChapter, DomainError> {
    if chapter.branches.is_empty() {
        return Err(DomainError::projection(format!(
            "chapter {} has no branches",
            chapter.index
        )));
    }

    let branches = chapter
        .branches
        .iter()
        .map(|branch| RuntimeBranch {
            name: branch.name.clone(),
            commands: project_commands(game, chapter.index, &branch.commands),
        })
        .collect();

    Ok(RuntimeChapter {
        id: chapter.id,
        index: chapter.index,
        title: chapter
            .title
            .clone()
            .unwrap_or_else(|| format!("Chapter {}", chapter.index + 1)),
        branches,
    })
}

/// Resolve asset references and coalesce consecutive choices.
fn project_commands(game: &Game, chapter_index: usize, commands: &[Command]) -> Vec<RuntimeCommand> {
    let mut out = Vec::with_capacity(commands.len());
    let mut pending_choices: Vec<ChoiceOption> = Vec::new();

    for command in commands {
        if let Command::Choice { text, target } = command {
            pending_choices.push(ChoiceOption {
                text: text.clone(),
                target: target.clone(),
            });
            continue;
        }
        flush_choices(&mut pending_choices, &mut out);

        out.push(match command {
            Command::Narration { text } => RuntimeCommand::Narration { text: text.clone() },
            Command::Dialogue {
                character,
                emotion,
                text,
                ..
            } => RuntimeCommand::Dialogue {
                character: character.clone(),
                emotion: emotion.clone(),
                text: text.clone(),
                audio_url: game
                    .dialogue_audio
                    .iter()
                    .find(|r| r.chapter_index == chapter_index && r.text == *text)
                    .map(|r| r.audio_url.clone()),
            },
            Command::Jump { target } => RuntimeCommand::Jump {
                target: target.clone(),
            },
            Command::Bg { name, .. } => RuntimeCommand::Background {
                name: name.clone(),
                image_url: game
                    .scene_art
                    .iter()
                    .find(|r| r.chapter_index == chapter_index && r.scene_name == *name)
                    .map(|r| r.image_url.clone()),
            },
            Command::Bgm { name, .. } => RuntimeCommand::Bgm {
                name: name.clone(),
                audio_url: game
                    .background_music
                    .iter()
                    .find(|r| r.chapter_index == chapter_index && r.bgm_name == *name)
                    .map(|r| r.audio_url.clone()),
            },
            Command::Choice { .. } => unreachable!("choices handled above"),
        });
    }
    flush_choices(&mut pending_choices, &mut out);

    out
}

fn flush_choices(pending: &mut Vec<ChoiceOption>, out: &mut Vec<RuntimeCommand>) {
    if !pending.is_empty() {
        out.push(RuntimeCommand::ChoiceSet {
            options: std::mem::take(pending),
        });
    }
}
