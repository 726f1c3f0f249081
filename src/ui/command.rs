use std::path::PathBuf;
use thiserror::Error;

pub const HELP: &str = "\
Commands:
  <text>          send a message (with the attached file, if any)
  /attach <path>  attach an image, PDF or .txt file to the next message
  /detach         drop the pending attachment
  /new            start a new conversation
  /list           show saved conversations
  /open <n>       switch to conversation n from /list
  /delete <n>     delete conversation n from /list
  /rm <n>         delete message n of the current conversation
  /stop           stop the response being generated
  /help           show this help
  /quit           exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Attach(PathBuf),
    Detach,
    New,
    List,
    Open(usize),
    Delete(usize),
    Rm(usize),
    Stop,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command '/{0}'. Type /help for the list of commands.")]
    Unknown(String),
    #[error("/{command} needs {what}")]
    MissingArgument {
        command: &'static str,
        what: &'static str,
    },
    #[error("'{0}' is not a valid number (counting starts at 1)")]
    InvalidIndex(String),
}

/// Parses one line of terminal input. Lines starting with `/` are commands;
/// a leading `//` escapes a message that itself starts with a slash.
pub fn parse(line: &str) -> Result<Command, CommandError> {
    let line = line.trim_end_matches(['\r', '\n']);

    if let Some(escaped) = line.strip_prefix("//") {
        return Ok(Command::Send(format!("/{}", escaped)));
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Send(line.to_string()));
    };

    let (name, argument) = match rest.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (rest, ""),
    };

    match name {
        "attach" => {
            if argument.is_empty() {
                return Err(CommandError::MissingArgument {
                    command: "attach",
                    what: "a file path",
                });
            }
            Ok(Command::Attach(PathBuf::from(argument)))
        }
        "detach" => Ok(Command::Detach),
        "new" => Ok(Command::New),
        "list" | "ls" => Ok(Command::List),
        "open" => index("open", argument).map(Command::Open),
        "delete" => index("delete", argument).map(Command::Delete),
        "rm" => index("rm", argument).map(Command::Rm),
        "stop" => Ok(Command::Stop),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

// One-based on screen, zero-based in the returned value.
fn index(command: &'static str, argument: &str) -> Result<usize, CommandError> {
    if argument.is_empty() {
        return Err(CommandError::MissingArgument {
            command,
            what: "a number",
        });
    }
    match argument.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n - 1),
        _ => Err(CommandError::InvalidIndex(argument.to_string())),
    }
}
