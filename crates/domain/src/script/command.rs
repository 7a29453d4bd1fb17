use serde::{Deserialize, Serialize};

/// A single script command.
///
/// This is a closed set: every consumer (the serializer, the resource dedup
/// key builders, the runtime projector) matches exhaustively, so adding a
/// variant forces every consumer to handle it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Narrator text with no speaker.
    Narration { text: String },
    /// A spoken line; `target` optionally names who is being addressed.
    Dialogue {
        character: String,
        emotion: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    /// A player choice leading to the named branch.
    Choice { text: String, target: String },
    /// Unconditional jump to the named branch.
    Jump { target: String },
    /// Scene background: a stable name plus an image-generation prompt.
    Bg { name: String, prompt: String },
    /// Background music: a stable name plus a music-generation prompt.
    Bgm { name: String, prompt: String },
}

/// A named, ordered list of commands. A chapter may carry several branches
/// (alternate narrative paths).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub commands: Vec<Command>,
}

impl Branch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: Vec::new(),
        }
    }

    pub fn with_commands(name: impl Into<String>, commands: Vec<Command>) -> Self {
        Self {
            name: name.into(),
            commands,
        }
    }
}
