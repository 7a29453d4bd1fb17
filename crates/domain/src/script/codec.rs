//! Parser and serializer for the script language.
//!
//! The parser is deliberately permissive: it does not require `main`/`end`
//! branches and does not check that jump/choice targets exist, because
//! provider output is re-parsed mid-pipeline while still incomplete. The
//! serializer is the strict side of that asymmetry: it refuses to emit a
//! branch list lacking `main` or `end`.

use thiserror::Error;

use super::command::{Branch, Command};

/// Script validation errors. Line numbers are 1-based.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("line {line}: {message}")]
    Branch { line: usize, message: String },

    #[error("line {line}: {message}")]
    Command { line: usize, message: String },

    #[error("script structure: {0}")]
    Structure(String),
}

impl ScriptError {
    fn command(line: usize, message: impl Into<String>) -> Self {
        Self::Command {
            line,
            message: message.into(),
        }
    }
}

/// Strip line comments: everything after the first `//`, `#` or `"""`.
fn strip_comment(line: &str) -> &str {
    let s = line.split("//").next().unwrap_or("");
    let s = s.split('#').next().unwrap_or("");
    let s = s.trim();
    s.split("\"\"\"").next().unwrap_or("").trim()
}

fn parse_narration(rest: &str, line: usize) -> Result<Command, ScriptError> {
    let text = rest.trim();
    if text.is_empty() {
        return Err(ScriptError::command(line, "narration text must not be empty"));
    }
    Ok(Command::Narration {
        text: text.to_string(),
    })
}

fn parse_dialogue(rest: &str, line: usize) -> Result<Command, ScriptError> {
    let mut parts = rest.split("->").map(str::trim);
    let main = parts.next().unwrap_or("");
    let target = parts
        .next()
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string());

    // Split the main part on the last two commas: character, emotion, text.
    let mut fields = main.rsplitn(3, ',').map(str::trim);
    let text = fields.next();
    let emotion = fields.next();
    let character = fields.next();
    match (character, emotion, text) {
        (Some(character), Some(emotion), Some(text)) => Ok(Command::Dialogue {
            character: character.to_string(),
            emotion: emotion.to_string(),
            text: text.to_string(),
            target,
        }),
        _ => Err(ScriptError::command(
            line,
            "dialogue must be 'character, emotion, text'",
        )),
    }
}

fn parse_choice(rest: &str, line: usize) -> Result<Command, ScriptError> {
    let Some((text, target)) = rest.split_once(',') else {
        return Err(ScriptError::command(
            line,
            "choice must be 'text, target branch'",
        ));
    };
    let (text, target) = (text.trim(), target.trim());
    if text.is_empty() || target.is_empty() {
        return Err(ScriptError::command(
            line,
            "choice text and target must not be empty",
        ));
    }
    Ok(Command::Choice {
        text: text.to_string(),
        target: target.to_string(),
    })
}

fn parse_jump(rest: &str, line: usize) -> Result<Command, ScriptError> {
    let target = rest.trim();
    if target.is_empty() {
        return Err(ScriptError::command(line, "jump target must not be empty"));
    }
    Ok(Command::Jump {
        target: target.to_string(),
    })
}

fn parse_named_prompt(
    rest: &str,
    line: usize,
    build: fn(String, String) -> Command,
    what: &str,
) -> Result<Command, ScriptError> {
    let Some((name, prompt)) = rest.split_once(' ') else {
        return Err(ScriptError::command(
            line,
            format!("{what} must be '<name> <prompt>'"),
        ));
    };
    let (name, prompt) = (name.trim(), prompt.trim());
    if name.is_empty() || prompt.is_empty() {
        return Err(ScriptError::command(
            line,
            format!("{what} name and prompt must not be empty"),
        ));
    }
    Ok(build(name.to_string(), prompt.to_string()))
}

/// Parse one command line. `Ok(None)` means the line matches no keyword and
/// is ignored — provider responses often interleave free-form commentary.
fn parse_command(line: &str, line_no: usize) -> Result<Option<Command>, ScriptError> {
    let cmd = if let Some(rest) = line.strip_prefix("narration ") {
        parse_narration(rest, line_no)?
    } else if let Some(rest) = line.strip_prefix("dialogue ") {
        parse_dialogue(rest, line_no)?
    } else if let Some(rest) = line.strip_prefix("choice ") {
        parse_choice(rest, line_no)?
    } else if let Some(rest) = line.strip_prefix("jump ") {
        parse_jump(rest, line_no)?
    } else if let Some(rest) = line.strip_prefix("bg ") {
        parse_named_prompt(rest, line_no, |name, prompt| Command::Bg { name, prompt }, "bg")?
    } else if let Some(rest) = line.strip_prefix("bgm ") {
        parse_named_prompt(rest, line_no, |name, prompt| Command::Bgm { name, prompt }, "bgm")?
    } else {
        return Ok(None);
    };
    Ok(Some(cmd))
}

/// Parse script text into branches.
///
/// Single linear scan. `branch <name>` opens (or re-opens) a named branch;
/// branches are deduplicated by first occurrence with order preserved.
/// Command lines outside any branch are ignored. Malformed command lines
/// fail with a line-numbered error; no structural graph validation happens
/// here.
pub fn parse_script(content: &str) -> Result<Vec<Branch>, ScriptError> {
    let mut branches: Vec<Branch> = Vec::new();
    let mut current: Option<usize> = None;

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw.trim());
        if line.is_empty() {
            continue;
        }

        // A bare `branch` keyword is a declaration that lost its name,
        // not an unknown line to skip.
        if line == "branch" {
            return Err(ScriptError::Branch {
                line: line_no,
                message: "branch name must not be empty".to_string(),
            });
        }
        if let Some(rest) = line.strip_prefix("branch ") {
            let name = rest.trim();
            let pos = match branches.iter().position(|b| b.name == name) {
                Some(pos) => pos,
                None => {
                    branches.push(Branch::new(name));
                    branches.len() - 1
                }
            };
            current = Some(pos);
            continue;
        }

        let Some(pos) = current else {
            continue;
        };
        if let Some(command) = parse_command(line, line_no)? {
            branches[pos].commands.push(command);
        }
    }

    Ok(branches)
}

/// Serialize branches back to script text.
///
/// Requires `main` and `end` branches to exist. Branches are emitted in
/// input order, separated by a blank line. Inverse of [`parse_script`]:
/// `parse_script(&serialize_script(b)?)` yields `b` again.
pub fn serialize_script(branches: &[Branch]) -> Result<String, ScriptError> {
    if !branches.iter().any(|b| b.name == "main") {
        return Err(ScriptError::Structure(
            "missing required 'main' branch".to_string(),
        ));
    }
    if !branches.iter().any(|b| b.name == "end") {
        return Err(ScriptError::Structure(
            "missing required 'end' branch".to_string(),
        ));
    }

    let mut lines: Vec<String> = Vec::new();
    for branch in branches {
        lines.push(format!("branch {}", branch.name));
        for command in &branch.commands {
            lines.push(match command {
                Command::Narration { text } => format!("narration {text}"),
                Command::Dialogue {
                    character,
                    emotion,
                    text,
                    target,
                } => match target {
                    Some(target) => {
                        format!("dialogue {character}, {emotion}, {text} -> {target}")
                    }
                    None => format!("dialogue {character}, {emotion}, {text}"),
                },
                Command::Choice { text, target } => format!("choice {text}, {target}"),
                Command::Jump { target } => format!("jump {target}"),
                Command::Bg { name, prompt } => format!("bg {name} {}", prompt.trim()),
                Command::Bgm { name, prompt } => format!("bgm {name} {}", prompt.trim()),
            });
        }
        lines.push(String::new());
    }

    Ok(lines.join("\n").trim_end().to_string())
}
