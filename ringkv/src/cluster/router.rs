//! Per-command routing for [`ClusterDatabase`].

use bytes::Bytes;

use super::ClusterDatabase;
use crate::{
    protocol::{CmdLine, Reply},
    session::Session,
};

/// Sent first on every peer connection. Commands arriving on such a
/// connection were already routed by the sender and run locally.
pub(super) const PEER_COMMAND: &str = "peer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    /// Executed on this node only.
    Local,
    /// Sent to the owner of the first key.
    Keyed,
    /// Both keys must share an owner.
    Rename,
    /// Broadcast; integer replies summed.
    Sum,
    /// One key is routed, several are broadcast and summed.
    Exists,
    /// Broadcast; OK only if every node replied OK.
    FlushDb,
    /// Broadcast; matches from every node concatenated.
    Keys,
}

fn route_of(name: &str) -> Option<Route> {
    let route = match name {
        "ping" | "select" => Route::Local,
        "get" | "set" | "setnx" | "getset" | "strlen" | "type" => Route::Keyed,
        "rename" | "renamenx" => Route::Rename,
        "del" => Route::Sum,
        "exists" => Route::Exists,
        "flushdb" => Route::FlushDb,
        "keys" => Route::Keys,
        _ => return None,
    };
    Some(route)
}

pub(super) async fn route(cluster: &ClusterDatabase, session: &Session, line: CmdLine) -> Reply {
    let Some(raw_name) = line.first() else {
        return Reply::error("ERR empty command");
    };
    let name = String::from_utf8_lossy(raw_name).to_ascii_lowercase();
    if name == PEER_COMMAND {
        if line.len() != 1 {
            return Reply::arg_num_error(&name);
        }
        session.mark_peer();
        return Reply::ok();
    }
    if session.is_peer() {
        return cluster.local.execute(session, line).await;
    }
    let Some(route) = route_of(&name) else {
        return Reply::unknown_command(&name);
    };

    match route {
        Route::Local => cluster.local.execute(session, line).await,
        Route::Keyed => {
            if line.len() < 2 {
                return Reply::arg_num_error(&name);
            }
            let owner = cluster.owner_of(&line[1]).to_string();
            cluster.relay(&owner, session, line).await
        }
        Route::Rename => rename(cluster, session, &name, line).await,
        Route::Exists if line.len() == 2 => {
            let owner = cluster.owner_of(&line[1]).to_string();
            cluster.relay(&owner, session, line).await
        }
        Route::Sum | Route::Exists => {
            if line.len() < 2 {
                return Reply::arg_num_error(&name);
            }
            sum(cluster.broadcast(session, &line).await, &name)
        }
        Route::FlushDb => all_ok(cluster.broadcast(session, &line).await, &name),
        Route::Keys => {
            if line.len() != 2 {
                return Reply::arg_num_error(&name);
            }
            union(cluster.broadcast(session, &line).await, &name)
        }
    }
}

async fn rename(cluster: &ClusterDatabase, session: &Session, name: &str, line: CmdLine) -> Reply {
    if line.len() != 3 {
        return Reply::arg_num_error(name);
    }
    let source = cluster.owner_of(&line[1]);
    let target = cluster.owner_of(&line[2]);
    if source != target {
        return Reply::error("ERR cross slot rename is not allowed");
    }
    let owner = target.to_string();
    cluster.relay(&owner, session, line).await
}

fn all_ok(replies: Vec<(&str, Reply)>, name: &str) -> Reply {
    let ok = Reply::ok();
    for (_, reply) in replies {
        match reply {
            reply if reply == ok => {}
            err @ Reply::Error(_) => return err,
            _ => return Reply::error(format!("ERR {name} command failed")),
        }
    }
    ok
}

fn sum(replies: Vec<(&str, Reply)>, name: &str) -> Reply {
    let mut total = 0;
    for (_, reply) in replies {
        match reply {
            Reply::Integer(count) => total += count,
            err @ Reply::Error(_) => return err,
            _ => return Reply::error(format!("ERR {name} command failed")),
        }
    }
    Reply::integer(total)
}

fn union(replies: Vec<(&str, Reply)>, name: &str) -> Reply {
    let mut keys: Vec<Bytes> = Vec::new();
    for (_, reply) in replies {
        match reply {
            Reply::MultiBulk(found) => keys.extend(found),
            Reply::EmptyMultiBulk => {}
            err @ Reply::Error(_) => return err,
            _ => return Reply::error(format!("ERR {name} command failed")),
        }
    }
    Reply::multi_bulk(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_cover_the_command_table() {
        let registry = crate::command::CommandRegistry::with_builtins();
        for name in [
            "ping", "get", "set", "setnx", "getset", "strlen", "del", "exists", "flushdb", "type",
            "rename", "renamenx", "keys",
        ] {
            assert!(registry.lookup(name).is_some(), "{name} missing from registry");
            assert!(route_of(name).is_some(), "{name} has no route");
        }
        assert_eq!(route_of("select"), Some(Route::Local));
        assert_eq!(route_of("append"), None);
    }

    #[test]
    fn sum_stops_at_first_error() {
        let replies = vec![
            ("a", Reply::integer(2)),
            ("b", Reply::error("ERR relay failed: down")),
            ("c", Reply::integer(1)),
        ];
        assert_eq!(sum(replies, "del"), Reply::error("ERR relay failed: down"));

        let replies = vec![("a", Reply::integer(2)), ("b", Reply::integer(1))];
        assert_eq!(sum(replies, "del"), Reply::integer(3));

        let replies = vec![("a", Reply::ok())];
        assert_eq!(sum(replies, "del"), Reply::error("ERR del command failed"));
    }

    #[test]
    fn flush_needs_ok_from_every_node() {
        let replies = vec![("a", Reply::ok()), ("b", Reply::ok())];
        assert_eq!(all_ok(replies, "flushdb"), Reply::ok());

        let replies = vec![("a", Reply::ok()), ("b", Reply::error("ERR relay failed: down"))];
        assert_eq!(all_ok(replies, "flushdb"), Reply::error("ERR relay failed: down"));

        let replies = vec![("a", Reply::integer(1)), ("b", Reply::ok())];
        assert_eq!(all_ok(replies, "flushdb"), Reply::error("ERR flushdb command failed"));
    }

    #[test]
    fn union_merges_matches() {
        let replies = vec![
            ("a", Reply::multi_bulk(vec![Bytes::from_static(b"k1")])),
            ("b", Reply::EmptyMultiBulk),
            ("c", Reply::multi_bulk(vec![Bytes::from_static(b"k2")])),
        ];
        assert_eq!(
            union(replies, "keys"),
            Reply::multi_bulk(vec![Bytes::from_static(b"k1"), Bytes::from_static(b"k2")])
        );
    }
}
