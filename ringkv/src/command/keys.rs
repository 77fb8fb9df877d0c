//! DEL EXISTS FLUSHDB TYPE RENAME RENAMENX KEYS

use bytes::Bytes;

use super::{
    registry::{CommandRegistry, Durability},
    wildcard::Pattern,
};
use crate::{keyspace::Db, protocol::Reply};

pub(super) fn register(registry: &mut CommandRegistry) {
    registry.register("del", exec_del, -2, Durability::Write);
    registry.register("exists", exec_exists, -2, Durability::ReadOnly);
    // Trailing arguments are accepted and ignored.
    registry.register("flushdb", exec_flushdb, -1, Durability::Write);
    registry.register("type", exec_type, 2, Durability::ReadOnly);
    registry.register("rename", exec_rename, 3, Durability::Write);
    registry.register("renamenx", exec_renamenx, 3, Durability::Write);
    registry.register("keys", exec_keys, 2, Durability::ReadOnly);
}

fn exec_del(db: &Db, args: &[Bytes]) -> Reply {
    let deleted = db.removes(args.iter().map(|key| &key[..]));
    Reply::integer(deleted as i64)
}

fn exec_exists(db: &Db, args: &[Bytes]) -> Reply {
    let found = args
        .iter()
        .filter(|arg| db.data().contains(arg))
        .count();
    Reply::integer(found as i64)
}

fn exec_flushdb(db: &Db, _args: &[Bytes]) -> Reply {
    db.flush();
    Reply::ok()
}

fn exec_type(db: &Db, args: &[Bytes]) -> Reply {
    match db.get_entity(&args[0]) {
        Some(entity) => Reply::status(entity.type_name()),
        None => Reply::status("none"),
    }
}

fn exec_rename(db: &Db, args: &[Bytes]) -> Reply {
    let (source, target) = (&args[0], args[1].clone());
    let Some(entity) = db.data().remove(source) else {
        return Reply::error("ERR no such key");
    };
    db.put_entity(target, entity);
    Reply::ok()
}

fn exec_renamenx(db: &Db, args: &[Bytes]) -> Reply {
    let (source, target) = (&args[0], args[1].clone());
    if db.data().contains(&target) {
        return Reply::integer(0);
    }
    let Some(entity) = db.data().remove(source) else {
        return Reply::error("ERR no such key");
    };
    db.put_entity(target, entity);
    Reply::integer(1)
}

fn exec_keys(db: &Db, args: &[Bytes]) -> Reply {
    let pattern = Pattern::compile(&args[0]);
    let mut matched = Vec::new();
    db.data().for_each(|key, _| {
        if pattern.is_match(key) {
            matched.push(key.clone());
        }
        true
    });
    Reply::multi_bulk(matched)
}
