//! Command Table
//!
//! Every supported command is one `Command` variant. A request is resolved
//! into a variant once, here, with its arity checked and its arguments fully
//! parsed. Execution only ever sees validated commands, so a bad request can
//! never mutate a database halfway.
//!
//! | Command              | Args     | Variant              |
//! |----------------------|----------|----------------------|
//! | `PING`               | 0        | `Ping`               |
//! | `SELECT index`       | 1        | `Select`             |
//! | `SET`/`INSERT`       | 2        | `Insert`             |
//! | `GET`/`LOOKUP`       | 1        | `Lookup`             |
//! | `DEL`/`DELETE`       | 1+       | `Delete`             |
//! | `EXISTS`             | 1+       | `Exists`             |
//! | `DBSIZE`/`COUNT`     | 0        | `Count`              |
//! | `FLUSHDB`            | 0        | `FlushDb`            |
//! | `FLUSHALL`           | 0        | `FlushAll`           |
//! | `KEYS [prefix]`      | 0 or 1   | `Keys`               |
//! | `INFO [section]`     | 0 or 1   | `Info`               |
//! | `QUIT`               | 0        | `Quit`               |

use crate::protocol::Request;
use crate::storage::{DbIndex, PrefixError, PrefixKey};
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

/// Client-caused command failures. Each renders as an `-ERR` reply and
/// leaves the connection open.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// A request with no words at all
    #[error("ERR empty command")]
    EmptyCommand,

    /// Wrong argument count for the named command
    #[error("ERR wrong number of arguments for '{0}' command")]
    Arity(String),

    /// A prefix or address argument that does not parse
    #[error("ERR invalid prefix '{text}': {reason}")]
    MalformedPrefix { text: String, reason: PrefixError },

    /// SELECT with a non-integer or negative index
    #[error("ERR invalid DB index")]
    InvalidSelection,

    /// Command name not in the table
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),
}

/// INFO subsection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoSection {
    /// Server, Stats, then Keyspace (the default)
    All,
    Server,
    /// Connection and engine counters
    Stats,
    Keyspace,
    /// Unrecognized name; answered with the fallback text
    Unknown(String),
}

impl InfoSection {
    fn parse(arg: Option<&Bytes>) -> Self {
        let Some(arg) = arg else {
            return InfoSection::All;
        };
        let name = String::from_utf8_lossy(arg).to_ascii_uppercase();
        match name.as_str() {
            "ALL" => InfoSection::All,
            "SERVER" => InfoSection::Server,
            "STATS" => InfoSection::Stats,
            "KEYSPACE" => InfoSection::Keyspace,
            _ => InfoSection::Unknown(name),
        }
    }
}

/// A fully validated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Select(DbIndex),
    Insert { key: PrefixKey, value: Bytes },
    Lookup(PrefixKey),
    /// Keys that failed to parse were already dropped
    Delete(Vec<PrefixKey>),
    Exists(Vec<PrefixKey>),
    Count,
    FlushDb,
    FlushAll,
    /// `None` lists every key
    Keys(Option<PrefixKey>),
    Info(InfoSection),
    Quit,
}

impl Command {
    /// Resolves a request into a command, validating arity and arguments.
    pub fn parse(request: &Request) -> Result<Command, CommandError> {
        let name = request
            .command_name()
            .ok_or_else(|| CommandError::UnknownCommand(lossy_upper(&request.name)))?;
        let args = request.args.as_slice();

        let command = match name.as_str() {
            "PING" => {
                arity(&name, args, 0, 0)?;
                Command::Ping
            }
            "SELECT" => {
                arity(&name, args, 1, 1)?;
                Command::Select(parse_db_index(&args[0])?)
            }
            "SET" | "INSERT" => {
                arity(&name, args, 2, 2)?;
                Command::Insert {
                    key: parse_prefix(&args[0])?,
                    value: args[1].clone(),
                }
            }
            "GET" | "LOOKUP" => {
                arity(&name, args, 1, 1)?;
                Command::Lookup(parse_prefix(&args[0])?)
            }
            "DEL" | "DELETE" => {
                arity(&name, args, 1, usize::MAX)?;
                Command::Delete(parse_prefixes_lenient(args))
            }
            "EXISTS" => {
                arity(&name, args, 1, usize::MAX)?;
                Command::Exists(parse_prefixes_lenient(args))
            }
            "DBSIZE" | "COUNT" => {
                arity(&name, args, 0, 0)?;
                Command::Count
            }
            "FLUSHDB" => {
                arity(&name, args, 0, 0)?;
                Command::FlushDb
            }
            "FLUSHALL" => {
                arity(&name, args, 0, 0)?;
                Command::FlushAll
            }
            "KEYS" => {
                arity(&name, args, 0, 1)?;
                match args.first() {
                    None => Command::Keys(None),
                    Some(arg) if arg.as_ref() == b"*" => Command::Keys(None),
                    Some(arg) => Command::Keys(Some(parse_prefix(arg)?)),
                }
            }
            "INFO" => {
                arity(&name, args, 0, 1)?;
                Command::Info(InfoSection::parse(args.first()))
            }
            "QUIT" => {
                arity(&name, args, 0, 0)?;
                Command::Quit
            }
            _ => return Err(CommandError::UnknownCommand(name)),
        };

        Ok(command)
    }

    /// Returns true if executing this command can change stored data.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Command::Insert { .. } | Command::Delete(_) | Command::FlushDb | Command::FlushAll
        )
    }
}

fn arity(name: &str, args: &[Bytes], min: usize, max: usize) -> Result<(), CommandError> {
    if args.len() < min || args.len() > max {
        return Err(CommandError::Arity(name.to_string()));
    }
    Ok(())
}

fn parse_prefix(arg: &Bytes) -> Result<PrefixKey, CommandError> {
    PrefixKey::from_bytes(arg).map_err(|reason| CommandError::MalformedPrefix {
        text: String::from_utf8_lossy(arg).into_owned(),
        reason,
    })
}

/// Parses every argument as a prefix, skipping the ones that don't parse.
fn parse_prefixes_lenient(args: &[Bytes]) -> Vec<PrefixKey> {
    args.iter()
        .filter_map(|arg| match parse_prefix(arg) {
            Ok(key) => Some(key),
            Err(e) => {
                debug!(error = %e, "Skipping malformed key");
                None
            }
        })
        .collect()
}

fn parse_db_index(arg: &Bytes) -> Result<DbIndex, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<DbIndex>().ok())
        .ok_or(CommandError::InvalidSelection)
}

fn lossy_upper(name: &[u8]) -> String {
    String::from_utf8_lossy(name).to_uppercase()
}
