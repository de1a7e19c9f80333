//! Karma flair bot
//!
//! Lets a submitter (or the person they thanked) grant karma with a `+karma`
//! reply. Grants live in a [`GrantLedger`]; the recipient's flair text shows
//! their running total.

mod bot;
mod command;
mod error;
mod ledger;
mod template;

pub use bot::{KarmaBot, KarmaOutcome, KarmaSettings, PassStats};
pub use command::{
    Command, CommandKind, CommandParser, GRANT_COMMAND, GrantDecision, evaluate_grant,
};
pub use error::KarmaError;
pub use ledger::{GrantLedger, KarmaGrant, MemoryGrantLedger};
pub use template::{ReplyTemplates, render_template};
