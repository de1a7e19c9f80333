//! Comment commands and grant rules

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::forum::{Comment, Submission};
use crate::karma::KarmaError;

/// The only command that grants karma
pub const GRANT_COMMAND: &str = "karma";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    /// `+`
    Grant,
    /// `-`
    Revoke,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub name: String,
}

impl Command {
    pub fn is_karma_grant(&self) -> bool {
        self.kind == CommandKind::Grant && self.name == GRANT_COMMAND
    }
}

/// Recognizes comments that consist of nothing but a command
#[derive(Debug, Clone)]
pub struct CommandParser {
    regex: Regex,
}

impl CommandParser {
    /// `valid_commands` is a `|`-separated alternation such as `karma|thanks`
    pub fn new(valid_commands: &str) -> Result<Self, KarmaError> {
        let regex = Regex::new(&format!("^([+-])({})$", valid_commands)).map_err(|e| {
            KarmaError::InvalidCommands {
                commands: valid_commands.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self { regex })
    }

    pub fn parse(&self, body: &str) -> Option<Command> {
        let body = body.trim().to_lowercase();
        let caps = self.regex.captures(&body)?;
        let name = caps.get(2)?.as_str();
        if name.is_empty() {
            return None;
        }

        let kind = match caps.get(1)?.as_str() {
            "+" => CommandKind::Grant,
            _ => CommandKind::Revoke,
        };

        Some(Command {
            kind,
            name: name.to_string(),
        })
    }

    pub fn is_command(&self, body: &str) -> bool {
        self.parse(body).is_some()
    }
}

/// Verdict on a `+karma` reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantDecision {
    Grant,
    InvalidLinkFlair,
    InvalidAuthor,
    AwardToSelf,
    AwardToCommand,
}

impl GrantDecision {
    /// Reply template for this decision
    pub fn template_name(&self) -> &'static str {
        match self {
            GrantDecision::Grant => "successful_award",
            GrantDecision::InvalidLinkFlair => "invalid_link_flair",
            GrantDecision::InvalidAuthor => "invalid_author",
            GrantDecision::AwardToSelf => "award_to_self",
            GrantDecision::AwardToCommand => "award_to_command",
        }
    }
}

/// Decide whether `comment` may grant karma to the author of `parent`.
///
/// Checks run in a fixed order and the first failure wins.
pub fn evaluate_grant(
    comment: &Comment,
    parent: &Comment,
    submission: &Submission,
    parser: &CommandParser,
    valid_link_flair_text: &str,
) -> GrantDecision {
    if submission.link_flair_text.as_deref() != Some(valid_link_flair_text) {
        return GrantDecision::InvalidLinkFlair;
    }

    let submitter = comment
        .link_author
        .as_deref()
        .unwrap_or(submission.author.as_str());
    if comment.author != submitter && parent.author != submitter {
        return GrantDecision::InvalidAuthor;
    }

    if parent.author == comment.author {
        return GrantDecision::AwardToSelf;
    }

    if parser.is_command(&parent.body) {
        return GrantDecision::AwardToCommand;
    }

    GrantDecision::Grant
}
