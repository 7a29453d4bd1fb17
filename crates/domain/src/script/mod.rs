//! The script intermediate language.
//!
//! A small line-oriented domain language describing narrative branches and
//! commands. Generation stages parse provider output into [`Branch`] lists,
//! layer scene and music information onto them, and serialize them back into
//! prompt text for the next stage.

mod codec;
mod command;

pub use codec::{parse_script, serialize_script, ScriptError};
pub use command::{Branch, Command};
