//! Storyforge domain layer.
//!
//! Pure types and pure logic only: the `Game` aggregate and its chapters,
//! the script command language with its codec, and the one-shot runtime
//! projection. No I/O and no async — everything here is driven by the
//! engine crate.

pub mod error;
pub mod game;
pub mod ids;
pub mod projection;
pub mod script;

pub use error::DomainError;
pub use game::{
    BackgroundMusic, CharacterArt, Chapter, ChapterStatus, DialogueAudio, Game, GameStatus,
    Progress, SceneArt, StoryCharacter, StoryCharacterInfo,
};
pub use ids::{ChapterId, GameId, RuntimeGameId};
pub use projection::{
    ChoiceOption, RuntimeBranch, RuntimeChapter, RuntimeCharacterArt, RuntimeCommand, RuntimeGame,
};
pub use script::{parse_script, serialize_script, Branch, Command, ScriptError};
