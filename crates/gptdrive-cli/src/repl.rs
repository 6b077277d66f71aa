//! Line commands understood by `gptdrive chat`.

use gptdrive_core::Theme;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Message(String),
    Reset,
    Regenerate,
    Theme(Theme),
    History(bool),
    Session,
    Quit,
    Empty,
    Invalid(String),
}

pub const HELP: &str = "\
Commands:
  /reset                          Start a new conversation
  /regen                          Regenerate the last answer
  /theme <light|dark|opposite|system>
  /history <on|off>               Toggle chat history
  /session                        Show the current account
  /quit                           Close the session and exit
Anything else is sent as a message.";

pub fn parse(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return ReplCommand::Message(line.to_string());
    };

    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or("");
    let arg = parts.next();
    match (name, arg) {
        ("reset", None) => ReplCommand::Reset,
        ("regen" | "regenerate", None) => ReplCommand::Regenerate,
        ("session", None) => ReplCommand::Session,
        ("quit" | "exit", None) => ReplCommand::Quit,
        ("theme", Some(theme)) => match theme.parse() {
            Ok(theme) => ReplCommand::Theme(theme),
            Err(e) => ReplCommand::Invalid(e.to_string()),
        },
        ("history", Some("on")) => ReplCommand::History(true),
        ("history", Some("off")) => ReplCommand::History(false),
        _ => ReplCommand::Invalid(format!("unknown command: /{command}")),
    }
}
