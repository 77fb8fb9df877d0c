//! GET SET SETNX GETSET STRLEN

use bytes::Bytes;

use super::registry::{CommandRegistry, Durability};
use crate::{
    keyspace::{DataEntity, Db},
    protocol::Reply,
};

pub(super) fn register(registry: &mut CommandRegistry) {
    registry.register("set", exec_set, 3, Durability::Write);
    registry.register("get", exec_get, 2, Durability::ReadOnly);
    registry.register("setnx", exec_setnx, 3, Durability::Write);
    registry.register("getset", exec_getset, 3, Durability::Write);
    registry.register("strlen", exec_strlen, 2, Durability::ReadOnly);
}

fn exec_get(db: &Db, args: &[Bytes]) -> Reply {
    let Some(entity) = db.get_entity(&args[0]) else {
        return Reply::NullBulk;
    };
    match entity.as_bytes() {
        Ok(value) => Reply::Bulk(value.clone()),
        Err(_) => Reply::wrong_type(),
    }
}

fn exec_set(db: &Db, args: &[Bytes]) -> Reply {
    db.put_entity(args[0].clone(), DataEntity::string(args[1].clone()));
    Reply::ok()
}

fn exec_setnx(db: &Db, args: &[Bytes]) -> Reply {
    let inserted = db.put_if_absent(args[0].clone(), DataEntity::string(args[1].clone()));
    Reply::integer(inserted as i64)
}

fn exec_getset(db: &Db, args: &[Bytes]) -> Reply {
    let previous = db
        .data()
        .swap(args[0].clone(), DataEntity::string(args[1].clone()));
    match previous {
        None => Reply::NullBulk,
        Some(entity) => match entity.as_bytes() {
            Ok(value) => Reply::Bulk(value.clone()),
            Err(_) => Reply::wrong_type(),
        },
    }
}

fn exec_strlen(db: &Db, args: &[Bytes]) -> Reply {
    let Some(entity) = db.get_entity(&args[0]) else {
        return Reply::NullBulk;
    };
    match entity.as_bytes() {
        Ok(value) => Reply::integer(value.len() as i64),
        Err(_) => Reply::wrong_type(),
    }
}
