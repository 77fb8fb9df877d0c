//! Command table and the built-in handlers.
//!
//! Handlers are plain functions over one [`crate::keyspace::Db`]; the
//! [`CommandRegistry`] owns name lookup, arity validation and the decision of
//! whether a successful execution is durable.

pub mod keys;
pub mod ping;
pub mod registry;
pub mod string;
pub mod wildcard;

pub use registry::{Command, CommandRegistry, Dispatched, Durability, ExecFn, validate_arity};
