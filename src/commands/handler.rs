//! Command Handler
//!
//! Executes requests for one connection against the shared database
//! registry. Requests are first resolved into a validated [`Command`]; only
//! then does the handler touch the registry or an engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Command::   │───>│   apply()   │───>│   Reply     │     │
//! │  │  parse()    │    │             │    │             │     │
//! │  └─────────────┘    └──────┬──────┘    └─────────────┘     │
//! │                            │                                │
//! │              Session ──────┤ selected_db                    │
//! │                            ▼                                │
//! │               DatabaseRegistry::get_or_create               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Execution is synchronous. There is no await point between validation and
//! mutation, so a client that disconnects mid-request cannot leave a command
//! half-applied.

use crate::commands::command::{Command, CommandError, InfoSection};
use crate::commands::session::Session;
use crate::connection::ConnectionStats;
use crate::protocol::{Reply, Request};
use crate::storage::{DatabaseRegistry, PrefixKey, TrieEngine};
use bytes::Bytes;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

/// INFO reply for an unrecognized section name.
pub const INFO_FALLBACK: &str = "# Triedis\r\n";

/// Executes commands against the shared registry.
///
/// Cloned once per connection; clones share the registry.
#[derive(Clone)]
pub struct CommandHandler {
    /// All logical databases
    registry: Arc<DatabaseRegistry>,
    /// Connection counters reported by INFO
    stats: Arc<ConnectionStats>,
    /// Server start time for INFO command
    start_time: Instant,
}

impl CommandHandler {
    /// Creates a new command handler over the given registry.
    pub fn new(registry: Arc<DatabaseRegistry>) -> Self {
        Self::with_stats(registry, Arc::new(ConnectionStats::new()))
    }

    /// Creates a handler whose INFO reports the given connection counters.
    pub fn with_stats(registry: Arc<DatabaseRegistry>, stats: Arc<ConnectionStats>) -> Self {
        Self {
            registry,
            stats,
            start_time: Instant::now(),
        }
    }

    /// The registry this handler executes against.
    pub fn registry(&self) -> &Arc<DatabaseRegistry> {
        &self.registry
    }

    /// Executes raw request words and returns the reply.
    pub fn execute(&self, session: &mut Session, words: Vec<Bytes>) -> Reply {
        match Request::from_parts(words) {
            Some(request) => self.execute_request(session, &request),
            None => Reply::error(CommandError::EmptyCommand.to_string()),
        }
    }

    /// Executes one tokenized request and returns the reply.
    pub fn execute_request(&self, session: &mut Session, request: &Request) -> Reply {
        match Command::parse(request) {
            Ok(command) => self.apply(session, command),
            Err(e) => Reply::error(e.to_string()),
        }
    }

    /// Applies a validated command.
    pub fn apply(&self, session: &mut Session, command: Command) -> Reply {
        trace!(
            db = session.selected_db(),
            write = command.is_write(),
            ?command,
            "Applying command"
        );

        match command {
            Command::Ping => Reply::pong(),
            Command::Select(index) => {
                session.select(index);
                Reply::ok()
            }
            Command::Insert { key, value } => {
                self.engine(session).insert(key, value);
                Reply::ok()
            }
            Command::Lookup(query) => Reply::optional_bulk(self.engine(session).get_lpm(&query)),
            Command::Delete(keys) => {
                Reply::integer(self.engine(session).delete_many(&keys) as i64)
            }
            Command::Exists(keys) => {
                Reply::integer(self.engine(session).exists_many(&keys) as i64)
            }
            Command::Count => Reply::integer(self.engine(session).key_count() as i64),
            Command::FlushDb => {
                self.engine(session).clear();
                Reply::ok()
            }
            Command::FlushAll => {
                self.registry.flush_all();
                Reply::ok()
            }
            Command::Keys(filter) => self.cmd_keys(session, filter),
            Command::Info(section) => self.cmd_info(&section),
            Command::Quit => {
                session.request_close();
                Reply::ok()
            }
        }
    }

    /// Engine of the session's selected database, created on first use.
    fn engine(&self, session: &Session) -> Arc<TrieEngine> {
        self.registry.get_or_create(session.selected_db())
    }

    /// KEYS [prefix]
    fn cmd_keys(&self, session: &Session, filter: Option<PrefixKey>) -> Reply {
        let engine = self.engine(session);
        let keys = match filter {
            Some(filter) => engine.keys_within(&filter),
            None => engine.enumerate_keys(),
        };

        Reply::Array(
            keys.into_iter()
                .map(|key| Reply::bulk(key.to_string()))
                .collect(),
        )
    }

    /// INFO [section]
    fn cmd_info(&self, section: &InfoSection) -> Reply {
        let text = match section {
            InfoSection::All => format!(
                "{}\r\n{}\r\n{}",
                self.info_server(),
                self.info_stats(),
                self.info_keyspace()
            ),
            InfoSection::Server => self.info_server(),
            InfoSection::Stats => self.info_stats(),
            InfoSection::Keyspace => self.info_keyspace(),
            InfoSection::Unknown(_) => INFO_FALLBACK.to_string(),
        };

        Reply::bulk(text)
    }

    fn info_server(&self) -> String {
        format!(
            "# Server\r\n\
             triedis_version:{}\r\n\
             uptime_in_seconds:{}\r\n\
             databases:{}\r\n",
            crate::VERSION,
            self.start_time.elapsed().as_secs(),
            self.registry.len(),
        )
    }

    fn info_stats(&self) -> String {
        let ops = self.registry.stats();
        format!(
            "# Stats\r\n\
             total_connections_received:{}\r\n\
             connected_clients:{}\r\n\
             total_commands_processed:{}\r\n\
             total_error_replies:{}\r\n\
             total_protocol_errors:{}\r\n\
             lookup_ops:{}\r\n\
             keyspace_hits:{}\r\n\
             keyspace_misses:{}\r\n\
             insert_ops:{}\r\n\
             delete_ops:{}\r\n",
            self.stats.connections_accepted.load(Ordering::Relaxed),
            self.stats.active_connections.load(Ordering::Relaxed),
            self.stats.commands_processed.load(Ordering::Relaxed),
            self.stats.command_errors.load(Ordering::Relaxed),
            self.stats.protocol_errors.load(Ordering::Relaxed),
            ops.lookups,
            ops.hits,
            ops.lookups.saturating_sub(ops.hits),
            ops.inserts,
            ops.deletes,
        )
    }

    fn info_keyspace(&self) -> String {
        let databases: String = self
            .registry
            .snapshot()
            .into_iter()
            .map(|(index, keys)| format!("db{}:keys={},expires=0,avg_ttl=0\r\n", index, keys))
            .collect();
        format!("# Keyspace\r\n{}", databases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_handler() -> CommandHandler {
        CommandHandler::new(Arc::new(DatabaseRegistry::new()))
    }

    fn make_command(args: &[&str]) -> Vec<Bytes> {
        args.iter().map(|s| Bytes::from(s.to_string())).collect()
    }

    fn run(handler: &CommandHandler, session: &mut Session, args: &[&str]) -> Reply {
        handler.execute(session, make_command(args))
    }

    #[test]
    fn test_ping() {
        let handler = create_handler();
        let mut session = Session::new();

        assert_eq!(run(&handler, &mut session, &["PING"]), Reply::pong());
    }

    #[test]
    fn test_set_get_lpm() {
        let handler = create_handler();
        let mut s = Session::new();

        assert_eq!(run(&handler, &mut s, &["SET", "10.0.0.0/8", "A"]), Reply::ok());
        assert_eq!(run(&handler, &mut s, &["SET", "10.1.0.0/16", "B"]), Reply::ok());

        assert_eq!(run(&handler, &mut s, &["GET", "10.1.2.3"]), Reply::bulk("B"));
        assert_eq!(run(&handler, &mut s, &["GET", "10.2.0.0/32"]), Reply::bulk("A"));
        assert_eq!(run(&handler, &mut s, &["LOOKUP", "10.0.0.0/8"]), Reply::bulk("A"));
        assert_eq!(run(&handler, &mut s, &["GET", "192.168.0.0"]), Reply::Null);
    }

    #[test]
    fn test_set_overwrites_canonical_key() {
        let handler = create_handler();
        let mut s = Session::new();

        run(&handler, &mut s, &["SET", "10.0.0.5/8", "first"]);
        run(&handler, &mut s, &["INSERT", "10.0.0.0/8", "second"]);

        assert_eq!(run(&handler, &mut s, &["DBSIZE"]), Reply::integer(1));
        assert_eq!(run(&handler, &mut s, &["GET", "10.0.0.0/8"]), Reply::bulk("second"));
    }

    #[test]
    fn test_del() {
        let handler = create_handler();
        let mut s = Session::new();

        run(&handler, &mut s, &["SET", "10.0.0.0/8", "A"]);
        run(&handler, &mut s, &["SET", "10.0.0.0/16", "B"]);

        let response = run(&handler, &mut s, &["DEL", "10.0.0.0/8", "not-a-prefix", "1.2.3.4"]);
        assert_eq!(response, Reply::integer(1));
        assert_eq!(run(&handler, &mut s, &["COUNT"]), Reply::integer(1));
        assert_eq!(run(&handler, &mut s, &["GET", "10.0.0.0/16"]), Reply::bulk("B"));
    }

    #[test]
    fn test_exists() {
        let handler = create_handler();
        let mut s = Session::new();

        run(&handler, &mut s, &["SET", "10.0.0.0/8", "A"]);
        assert_eq!(
            run(&handler, &mut s, &["EXISTS", "10.0.0.0/8", "10.1.0.0/16", "junk"]),
            Reply::integer(1)
        );
    }

    #[test]
    fn test_select_isolates_databases() {
        let handler = create_handler();
        let mut s0 = Session::new();
        let mut s1 = Session::new();

        assert_eq!(run(&handler, &mut s1, &["SELECT", "1"]), Reply::ok());
        run(&handler, &mut s0, &["SET", "10.0.0.0/8", "zero"]);
        run(&handler, &mut s1, &["SET", "10.0.0.0/8", "one"]);

        assert_eq!(run(&handler, &mut s0, &["GET", "10.1.1.1"]), Reply::bulk("zero"));
        assert_eq!(run(&handler, &mut s1, &["GET", "10.1.1.1"]), Reply::bulk("one"));

        run(&handler, &mut s1, &["FLUSHDB"]);
        assert_eq!(run(&handler, &mut s1, &["DBSIZE"]), Reply::integer(0));
        assert_eq!(run(&handler, &mut s0, &["DBSIZE"]), Reply::integer(1));
    }

    #[test]
    fn test_invalid_select_keeps_selection() {
        let handler = create_handler();
        let mut s = Session::new();

        run(&handler, &mut s, &["SELECT", "2"]);
        assert_eq!(
            run(&handler, &mut s, &["SELECT", "-5"]),
            Reply::error("ERR invalid DB index")
        );
        assert_eq!(s.selected_db(), 2);
    }

    #[test]
    fn test_select_does_not_create_database() {
        let handler = create_handler();
        let mut s = Session::new();

        run(&handler, &mut s, &["SELECT", "9"]);
        assert!(handler.registry().is_empty());

        run(&handler, &mut s, &["DBSIZE"]);
        assert!(handler.registry().get(9).is_some());
    }

    #[test]
    fn test_errors_do_not_mutate() {
        let handler = create_handler();
        let mut s = Session::new();

        let response = run(&handler, &mut s, &["SET", "10.0.0.0/40", "A"]);
        assert!(response.is_error());
        let response = run(&handler, &mut s, &["SET", "10.0.0.0/8"]);
        assert_eq!(
            response,
            Reply::error("ERR wrong number of arguments for 'SET' command")
        );

        // Neither failure created or touched a database
        assert!(handler.registry().is_empty());
    }

    #[test]
    fn test_flushall() {
        let handler = create_handler();
        let mut s = Session::new();

        run(&handler, &mut s, &["SET", "10.0.0.0/8", "A"]);
        run(&handler, &mut s, &["SELECT", "1"]);
        run(&handler, &mut s, &["SET", "10.0.0.0/8", "B"]);

        assert_eq!(run(&handler, &mut s, &["FLUSHALL"]), Reply::ok());
        assert_eq!(handler.registry().snapshot(), vec![(0, 0), (1, 0)]);
    }

    #[test]
    fn test_keys() {
        let handler = create_handler();
        let mut s = Session::new();

        run(&handler, &mut s, &["SET", "10.1.0.0/16", "B"]);
        run(&handler, &mut s, &["SET", "10.0.0.0/8", "A"]);
        run(&handler, &mut s, &["SET", "2001:db8::/32", "C"]);

        assert_eq!(
            run(&handler, &mut s, &["KEYS"]),
            Reply::Array(vec![
                Reply::bulk("10.0.0.0/8"),
                Reply::bulk("10.1.0.0/16"),
                Reply::bulk("2001:db8::/32"),
            ])
        );
        assert_eq!(
            run(&handler, &mut s, &["KEYS", "10.1.0.0/16"]),
            Reply::Array(vec![Reply::bulk("10.1.0.0/16")])
        );
    }

    #[test]
    fn test_info() {
        let handler = create_handler();
        let mut s = Session::new();

        run(&handler, &mut s, &["SET", "10.0.0.0/8", "A"]);
        run(&handler, &mut s, &["SELECT", "3"]);
        run(&handler, &mut s, &["DBSIZE"]);

        assert_eq!(
            run(&handler, &mut s, &["INFO", "KEYSPACE"]),
            Reply::bulk(
                "# Keyspace\r\ndb0:keys=1,expires=0,avg_ttl=0\r\ndb3:keys=0,expires=0,avg_ttl=0\r\n"
            )
        );

        let Reply::Bulk(all) = run(&handler, &mut s, &["INFO"]) else {
            panic!("INFO should return a bulk string");
        };
        let all = String::from_utf8(all.to_vec()).unwrap();
        assert!(all.starts_with("# Server\r\n"));
        assert!(all.contains("databases:2\r\n"));
        assert!(all.contains("\r\n# Stats\r\n"));
        assert!(all.contains("# Keyspace\r\ndb0:keys=1"));

        assert_eq!(
            run(&handler, &mut s, &["INFO", "clients"]),
            Reply::bulk(INFO_FALLBACK)
        );
    }

    #[test]
    fn test_info_stats() {
        let stats = Arc::new(ConnectionStats::new());
        let handler =
            CommandHandler::with_stats(Arc::new(DatabaseRegistry::new()), Arc::clone(&stats));
        let mut s = Session::new();

        stats.connection_opened();
        run(&handler, &mut s, &["SET", "10.0.0.0/8", "A"]);
        run(&handler, &mut s, &["GET", "10.1.1.1"]);
        run(&handler, &mut s, &["GET", "11.1.1.1"]);
        run(&handler, &mut s, &["EXISTS", "10.0.0.0/8"]);
        run(&handler, &mut s, &["DEL", "10.0.0.0/8", "10.0.0.0/16"]);
        stats.command_processed(&Reply::ok());
        stats.command_processed(&Reply::error("ERR unknown command 'X'"));

        let Reply::Bulk(text) = run(&handler, &mut s, &["INFO", "stats"]) else {
            panic!("INFO should return a bulk string");
        };
        let text = String::from_utf8(text.to_vec()).unwrap();

        assert!(text.starts_with("# Stats\r\n"));
        for line in [
            "total_connections_received:1",
            "connected_clients:1",
            "total_commands_processed:2",
            "total_error_replies:1",
            "total_protocol_errors:0",
            "lookup_ops:3",
            "keyspace_hits:2",
            "keyspace_misses:1",
            "insert_ops:1",
            "delete_ops:2",
        ] {
            assert!(text.contains(&format!("{}\r\n", line)), "missing {line:?} in {text:?}");
        }
    }

    #[test]
    fn test_quit() {
        let handler = create_handler();
        let mut s = Session::new();

        assert_eq!(run(&handler, &mut s, &["QUIT"]), Reply::ok());
        assert!(s.is_closing());
    }

    #[test]
    fn test_empty_and_unknown_command() {
        let handler = create_handler();
        let mut s = Session::new();

        assert_eq!(handler.execute(&mut s, vec![]), Reply::error("ERR empty command"));
        assert_eq!(
            run(&handler, &mut s, &["UNKNOWN"]),
            Reply::error("ERR unknown command 'UNKNOWN'")
        );
    }
}
