use std::collections::HashMap;

use bytes::Bytes;

use crate::{keyspace::Db, protocol::Reply};

/// Handler signature: receives the arguments after the command name.
pub type ExecFn = fn(&Db, &[Bytes]) -> Reply;

/// Whether a command's successful execution must reach the persistence log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    ReadOnly,
    Write,
}

#[derive(Clone, Copy)]
pub struct Command {
    name: &'static str,
    handler: ExecFn,
    arity: i32,
    durability: Durability,
}

impl Command {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn arity(&self) -> i32 {
        self.arity
    }

    pub fn is_write(&self) -> bool {
        self.durability == Durability::Write
    }
}

/// Result of running one command line against a [`Db`].
#[derive(Debug)]
pub struct Dispatched {
    pub reply: Reply,
    /// True when the line must be appended to the persistence log.
    pub durable: bool,
}

/// Command table keyed by lower-cased name.
///
/// Built once at startup and shared read-only by every backend.
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Command>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in command.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::ping::register(&mut registry);
        super::string::register(&mut registry);
        super::keys::register(&mut registry);
        registry
    }

    /// Registers `handler` under `name`.
    ///
    /// `arity >= 0` means exactly that many elements including the name;
    /// `arity < 0` means at least `|arity|` elements.
    pub fn register(
        &mut self,
        name: &'static str,
        handler: ExecFn,
        arity: i32,
        durability: Durability,
    ) {
        self.commands.insert(
            name.to_ascii_lowercase(),
            Command {
                name,
                handler,
                arity,
                durability,
            },
        );
    }

    pub fn lookup(&self, name: &str) -> Option<&Command> {
        self.commands.get(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Validates and executes `line` against `db`.
    pub fn dispatch(&self, db: &Db, line: &[Bytes]) -> Dispatched {
        let Some(raw_name) = line.first() else {
            return Dispatched {
                reply: Reply::error("ERR empty command"),
                durable: false,
            };
        };
        let name = String::from_utf8_lossy(raw_name).to_ascii_lowercase();
        let Some(command) = self.commands.get(&name) else {
            return Dispatched {
                reply: Reply::unknown_command(&name),
                durable: false,
            };
        };
        if !validate_arity(command.arity, line.len()) {
            return Dispatched {
                reply: Reply::arg_num_error(&name),
                durable: false,
            };
        }
        let reply = (command.handler)(db, &line[1..]);
        let durable = command.is_write() && !reply.is_error();
        Dispatched { reply, durable }
    }
}

/// Checks an argument count (including the command name) against an arity.
pub fn validate_arity(arity: i32, argc: usize) -> bool {
    if arity >= 0 {
        argc == arity as usize
    } else {
        argc >= arity.unsigned_abs() as usize
    }
}
