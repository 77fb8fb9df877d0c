use bytes::Bytes;

use super::registry::{CommandRegistry, Durability};
use crate::{keyspace::Db, protocol::Reply};

pub(super) fn register(registry: &mut CommandRegistry) {
    registry.register("ping", exec_ping, 1, Durability::ReadOnly);
}

fn exec_ping(_db: &Db, _args: &[Bytes]) -> Reply {
    Reply::pong()
}
