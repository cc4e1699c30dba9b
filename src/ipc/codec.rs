//! Command codec for the watchdog channel.
//!
//! Wire format:
//! ```text
//! add 000-1-000;arm;rm 000-0-000;dump;
//! └──── verb [SP argument] ; ────┘ repeated, no other separators
//! ```
//! A message is whatever a single read returned. Only `;`-terminated commands
//! are decoded; an unterminated tail is dropped.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::types::TrackedId;

/// Command terminator.
pub const TERMINATOR: char = ';';
/// Separator between verb and argument.
pub const ARG_SEPARATOR: char = ' ';

pub const VERB_ADD: &str = "add";
pub const VERB_REMOVE: &str = "rm";
pub const VERB_CLEAR: &str = "clear";
pub const VERB_DUMP: &str = "dump";
pub const VERB_ARM: &str = "arm";
pub const VERB_QUIT: &str = "quit";

/// One decoded channel command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add(TrackedId),
    Remove(TrackedId),
    Clear,
    Dump,
    Arm,
    Quit,
}

impl Command {
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Add(_) => VERB_ADD,
            Command::Remove(_) => VERB_REMOVE,
            Command::Clear => VERB_CLEAR,
            Command::Dump => VERB_DUMP,
            Command::Arm => VERB_ARM,
            Command::Quit => VERB_QUIT,
        }
    }

    /// Wire form, terminator included.
    pub fn encode(&self) -> String {
        match self {
            Command::Add(id) | Command::Remove(id) => {
                format!("{}{}{}{}", self.verb(), ARG_SEPARATOR, id, TERMINATOR)
            }
            _ => format!("{}{}", self.verb(), TERMINATOR),
        }
    }
}

/// Encode several commands into one contiguous write.
pub fn encode_batch(commands: &[Command]) -> Vec<u8> {
    commands
        .iter()
        .map(Command::encode)
        .collect::<String>()
        .into_bytes()
}

/// Why a terminated command was not accepted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Malformed {
    #[error("empty command")]
    Empty,

    #[error("unknown command: '{0}'")]
    Unknown(String),

    #[error("'{0}' requires an id")]
    MissingId(&'static str),
}

/// Decode a single command (without its terminator).
pub fn parse_command(raw: &str) -> std::result::Result<Command, Malformed> {
    if raw.is_empty() {
        return Err(Malformed::Empty);
    }

    let Some((verb, arg)) = raw.split_once(ARG_SEPARATOR) else {
        return match raw {
            VERB_QUIT => Ok(Command::Quit),
            VERB_CLEAR => Ok(Command::Clear),
            VERB_DUMP => Ok(Command::Dump),
            VERB_ARM => Ok(Command::Arm),
            VERB_ADD => Err(Malformed::MissingId(VERB_ADD)),
            VERB_REMOVE => Err(Malformed::MissingId(VERB_REMOVE)),
            _ => Err(Malformed::Unknown(raw.to_string())),
        };
    };

    let (ctor, verb): (fn(TrackedId) -> Command, &'static str) = match verb {
        VERB_ADD => (Command::Add, VERB_ADD),
        VERB_REMOVE => (Command::Remove, VERB_REMOVE),
        _ => return Err(Malformed::Unknown(raw.to_string())),
    };
    // The argument cannot contain the terminator, so only emptiness fails.
    TrackedId::from_string(arg.to_string())
        .map(ctor)
        .map_err(|_| Malformed::MissingId(verb))
}

/// Decode every terminated command in a raw read buffer.
///
/// Decoding stops at the first NUL byte. Malformed commands are logged and
/// skipped; the trailing unterminated fragment is dropped.
pub fn parse(buffer: &[u8]) -> Vec<Command> {
    let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
    let text = String::from_utf8_lossy(&buffer[..end]);

    let mut commands = Vec::new();
    let mut rest: &str = &text;
    while let Some(pos) = rest.find(TERMINATOR) {
        let raw = &rest[..pos];
        rest = &rest[pos + TERMINATOR.len_utf8()..];

        match parse_command(raw) {
            Ok(command) => commands.push(command),
            Err(Malformed::Empty) => tracing::debug!("empty_command_skipped"),
            Err(e) => tracing::warn!("malformed_command: {}", e),
        }
    }

    if !rest.is_empty() {
        tracing::debug!("unterminated_fragment_dropped: fragment={:?}", rest);
    }

    commands
}

/// Read one message from the channel.
///
/// Returns `None` when the channel is closed (zero-length read).
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
    buffer_bytes: usize,
) -> std::io::Result<Option<Vec<u8>>> {
    let mut buf = vec![0u8; buffer_bytes];
    let n = reader.read(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    buf.truncate(n);
    Ok(Some(buf))
}
