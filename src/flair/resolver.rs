//! Conflict resolution strategies
//!
//! The merge engine asks a [`ConflictResolver`] whenever a user's canonical
//! flair disagrees with the value found in a later forum.

use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use tokio::runtime::RuntimeFlavor;
use tracing::warn;

use crate::flair::{FlairError, MatchRule};

/// Configured conflict policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Longest flair wins; ties keep the canonical value
    #[default]
    Automatic,
    /// An operator picks the value
    Interactive,
}

impl std::str::FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "automatic" => Ok(Operation::Automatic),
            "interactive" => Ok(Operation::Interactive),
            other => Err(format!(
                "unknown operation '{}' (expected automatic or interactive)",
                other
            )),
        }
    }
}

/// A disagreement between the canonical flair and one forum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub user: String,
    /// Forum whose value disagrees
    pub forum: String,
    /// Canonical value as stored (may be an operator override)
    pub canonical: String,
    /// Valid flair extracted from the canonical value
    pub canonical_valid: String,
    pub forum_value: String,
}

/// Outcome of a conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    KeepCanonical,
    TakeForum,
    Custom(String),
    /// Leave canonical as is and skip syncing this user for the cycle
    NoOp,
}

pub trait ConflictResolver: Send {
    fn resolve(&mut self, conflict: &Conflict, rule: &MatchRule) -> Result<Resolution, FlairError>;
}

/// Picks the longer flair, keeping the canonical value on a tie.
///
/// Length stands in for accumulated achievement; nothing checks that the
/// longer flair is actually "more".
#[derive(Debug, Clone, Copy, Default)]
pub struct AutomaticResolver;

impl ConflictResolver for AutomaticResolver {
    fn resolve(&mut self, conflict: &Conflict, _rule: &MatchRule) -> Result<Resolution, FlairError> {
        let canonical_len = conflict.canonical_valid.chars().count();
        let forum_len = conflict.forum_value.chars().count();

        if forum_len > canonical_len {
            Ok(Resolution::TakeForum)
        } else {
            Ok(Resolution::KeepCanonical)
        }
    }
}

/// Refuses every conflict. Used when an operator is required but no
/// terminal is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailFastResolver;

impl ConflictResolver for FailFastResolver {
    fn resolve(&mut self, conflict: &Conflict, _rule: &MatchRule) -> Result<Resolution, FlairError> {
        Err(FlairError::OperatorInputRequired {
            user: conflict.user.clone(),
            forum: conflict.forum.clone(),
        })
    }
}

/// Operator's pick for a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Canonical,
    Forum,
    Custom,
    NoOp,
}

/// Source of operator answers
pub trait OperatorPrompt: Send {
    fn choose(&mut self, conflict: &Conflict) -> Result<Choice, FlairError>;

    fn custom_value(&mut self, conflict: &Conflict) -> Result<String, FlairError>;

    fn notify(&mut self, message: &str);
}

/// Asks an operator to settle each conflict
pub struct InteractiveResolver<P> {
    prompt: P,
    max_attempts: usize,
}

impl<P: OperatorPrompt> InteractiveResolver<P> {
    pub fn new(prompt: P) -> Self {
        Self {
            prompt,
            max_attempts: 3,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

impl<P: OperatorPrompt> ConflictResolver for InteractiveResolver<P> {
    fn resolve(&mut self, conflict: &Conflict, rule: &MatchRule) -> Result<Resolution, FlairError> {
        match self.prompt.choose(conflict)? {
            Choice::Canonical => Ok(Resolution::KeepCanonical),
            Choice::Forum => Ok(Resolution::TakeForum),
            Choice::NoOp => Ok(Resolution::NoOp),
            Choice::Custom => {
                for _ in 0..self.max_attempts {
                    let value = self.prompt.custom_value(conflict)?;
                    let value = value.trim();
                    if !rule.extract_valid(value).is_empty() {
                        return Ok(Resolution::Custom(value.to_string()));
                    }
                    self.prompt.notify(&format!(
                        "'{}' does not contain a flair matching {}",
                        value,
                        rule.as_str()
                    ));
                }
                Err(FlairError::Prompt(format!(
                    "no valid custom flair for {} after {} attempt(s)",
                    conflict.user, self.max_attempts
                )))
            }
        }
    }
}

/// Terminal prompt backed by dialoguer.
///
/// Prompts block the calling task, so a cycle waiting on the operator does
/// not see the shutdown signal. Ctrl-C at a prompt is read by dialoguer and
/// surfaces as [`FlairError::Prompt`], which fails the cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl OperatorPrompt for TerminalPrompt {
    fn choose(&mut self, conflict: &Conflict) -> Result<Choice, FlairError> {
        let items = [
            format!("keep canonical ({})", conflict.canonical),
            format!("take /r/{} ({})", conflict.forum, conflict.forum_value),
            "enter a custom value".to_string(),
            "skip this user for now".to_string(),
        ];

        let picked = off_runtime(|| {
            dialoguer::Select::new()
                .with_prompt(format!("Mismatched flair for {}", conflict.user))
                .items(&items)
                .default(0)
                .interact()
        })
        .map_err(|e| FlairError::Prompt(e.to_string()))?;

        Ok(match picked {
            0 => Choice::Canonical,
            1 => Choice::Forum,
            2 => Choice::Custom,
            _ => Choice::NoOp,
        })
    }

    fn custom_value(&mut self, conflict: &Conflict) -> Result<String, FlairError> {
        off_runtime(|| {
            dialoguer::Input::<String>::new()
                .with_prompt(format!("Flair for {}", conflict.user))
                .interact_text()
        })
        .map_err(|e| FlairError::Prompt(e.to_string()))
    }

    fn notify(&mut self, message: &str) {
        eprintln!("{}", message);
    }
}

/// Run blocking terminal I/O, handing the worker thread's other tasks to
/// the rest of a multi-threaded runtime first.
fn off_runtime<T>(f: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// Both stdin and stdout are attached to a terminal
pub fn is_interactive_terminal() -> bool {
    std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
}

/// Resolver for the configured policy. Interactive runs without a terminal
/// get the fail-fast resolver.
///
/// While the interactive resolver waits for an answer, Ctrl-C is handled by
/// the prompt rather than the sync loop's shutdown signal.
pub fn resolver_for(operation: Operation) -> Box<dyn ConflictResolver> {
    match operation {
        Operation::Automatic => Box::new(AutomaticResolver),
        Operation::Interactive if is_interactive_terminal() => {
            Box::new(InteractiveResolver::new(TerminalPrompt))
        }
        Operation::Interactive => {
            warn!("Interactive conflict resolution requested without a terminal; conflicts will abort the cycle");
            Box::new(FailFastResolver)
        }
    }
}
