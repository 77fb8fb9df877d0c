use std::{sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use ringkv::{
    client::Client,
    cluster::{ClusterDatabase, HashRing},
    command::CommandRegistry,
    config::Config,
    protocol::{Reply, cmd_line},
    server::Server,
};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle, time::timeout};

const WAIT: Duration = Duration::from_secs(3);

struct Cluster {
    addrs: Vec<String>,
    ring: HashRing,
    stops: Vec<oneshot::Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

impl Cluster {
    async fn start(size: usize) -> Result<Self> {
        let mut listeners = Vec::with_capacity(size);
        let mut addrs = Vec::with_capacity(size);
        for _ in 0..size {
            let listener = TcpListener::bind("127.0.0.1:0").await?;
            addrs.push(listener.local_addr()?.to_string());
            listeners.push(listener);
        }

        let mut stops = Vec::with_capacity(size);
        let mut handles = Vec::with_capacity(size);
        for (listener, self_id) in listeners.into_iter().zip(addrs.iter()) {
            let config = Config {
                self_id: self_id.clone(),
                peers: addrs.iter().filter(|a| *a != self_id).cloned().collect(),
                ..Config::default()
            };
            let registry = Arc::new(CommandRegistry::with_builtins());
            let database = Arc::new(ClusterDatabase::open(&config, registry).await?);
            let server = Server::new(listener, database, config.close_timeout());

            let (stop, stopped) = oneshot::channel::<()>();
            handles.push(tokio::spawn(async move {
                let _ = server
                    .run_until(async move {
                        let _ = stopped.await;
                    })
                    .await;
            }));
            stops.push(stop);
        }

        let mut ring = HashRing::new();
        ring.add_nodes(addrs.iter().cloned());
        Ok(Self {
            addrs,
            ring,
            stops,
            handles,
        })
    }

    async fn client(&self, node: usize) -> Result<Client> {
        Client::connect(&self.addrs[node]).await
    }

    fn owner(&self, key: &str) -> Result<String> {
        self.ring
            .pick_node(key)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("empty ring"))
    }

    /// Two keys with different owners.
    fn split_pair(&self) -> Result<(String, String)> {
        let first = "key:0".to_string();
        let owner = self.owner(&first)?;
        for i in 1..1000 {
            let candidate = format!("key:{i}");
            if self.owner(&candidate)? != owner {
                return Ok((first, candidate));
            }
        }
        Err(anyhow!("all keys hash to one node"))
    }

    async fn stop(self) -> Result<()> {
        for stop in self.stops {
            let _ = stop.send(());
        }
        for handle in self.handles {
            timeout(WAIT, handle).await??;
        }
        Ok(())
    }
}

async fn send(client: &mut Client, parts: &[&str]) -> Result<Reply> {
    Ok(timeout(WAIT, client.send(&cmd_line(parts))).await??)
}

#[tokio::test]
async fn keyed_commands_reach_the_owner_from_any_node() -> Result<()> {
    let cluster = Cluster::start(3).await?;
    let mut a = cluster.client(0).await?;
    let mut b = cluster.client(1).await?;

    for i in 0..20 {
        let key = format!("user:{i}");
        let value = format!("value-{i}");
        assert_eq!(send(&mut a, &["SET", key.as_str(), value.as_str()]).await?, Reply::ok());
    }
    for i in 0..20 {
        let key = format!("user:{i}");
        assert_eq!(
            send(&mut b, &["GET", key.as_str()]).await?,
            Reply::bulk(format!("value-{i}"))
        );
        assert_eq!(send(&mut b, &["TYPE", key.as_str()]).await?, Reply::status("string"));
    }
    assert_eq!(send(&mut b, &["GET", "absent"]).await?, Reply::NullBulk);
    assert_eq!(send(&mut b, &["PING"]).await?, Reply::pong());

    cluster.stop().await
}

#[tokio::test]
async fn relays_follow_the_selected_database() -> Result<()> {
    let cluster = Cluster::start(3).await?;
    let mut a = cluster.client(0).await?;
    let mut c = cluster.client(2).await?;

    send(&mut a, &["SELECT", "3"]).await?;
    for i in 0..10 {
        let key = format!("k{i}");
        send(&mut a, &["SET", key.as_str(), "db3"]).await?;
    }

    for i in 0..10 {
        let key = format!("k{i}");
        assert_eq!(send(&mut c, &["GET", key.as_str()]).await?, Reply::NullBulk);
    }
    send(&mut c, &["SELECT", "3"]).await?;
    for i in 0..10 {
        let key = format!("k{i}");
        assert_eq!(send(&mut c, &["GET", key.as_str()]).await?, Reply::bulk("db3"));
    }

    cluster.stop().await
}

#[tokio::test]
async fn broadcast_commands_aggregate() -> Result<()> {
    let cluster = Cluster::start(3).await?;
    let mut a = cluster.client(0).await?;
    let mut b = cluster.client(1).await?;

    let keys: Vec<String> = (0..12).map(|i| format!("item:{i}")).collect();
    for key in &keys {
        send(&mut a, &["SET", key.as_str(), "x"]).await?;
    }

    let Reply::MultiBulk(mut found) = send(&mut b, &["KEYS", "item:*"]).await? else {
        return Err(anyhow!("KEYS must reply with an array"));
    };
    found.sort();
    let mut expected = cmd_line(keys.iter());
    expected.sort();
    assert_eq!(found, expected);

    let mut exists = vec!["EXISTS"];
    exists.extend(keys.iter().map(String::as_str));
    exists.push("item:none");
    assert_eq!(send(&mut b, &exists).await?, Reply::integer(12));

    let mut del = vec!["DEL"];
    del.extend(keys[..5].iter().map(String::as_str));
    assert_eq!(send(&mut b, &del).await?, Reply::integer(5));

    assert_eq!(send(&mut a, &["FLUSHDB"]).await?, Reply::ok());
    assert_eq!(send(&mut b, &["KEYS", "*"]).await?, Reply::EmptyMultiBulk);

    cluster.stop().await
}

#[tokio::test]
async fn rename_across_nodes_is_refused() -> Result<()> {
    let cluster = Cluster::start(3).await?;
    let mut a = cluster.client(0).await?;
    let (left, right) = cluster.split_pair()?;

    send(&mut a, &["SET", left.as_str(), "l"]).await?;
    send(&mut a, &["SET", right.as_str(), "r"]).await?;
    assert_eq!(
        send(&mut a, &["RENAME", left.as_str(), right.as_str()]).await?,
        Reply::error("ERR cross slot rename is not allowed")
    );
    assert_eq!(
        send(&mut a, &["RENAMENX", left.as_str(), right.as_str()]).await?,
        Reply::error("ERR cross slot rename is not allowed")
    );
    assert_eq!(send(&mut a, &["GET", left.as_str()]).await?, Reply::bulk("l"));
    assert_eq!(send(&mut a, &["GET", right.as_str()]).await?, Reply::bulk("r"));

    cluster.stop().await
}

#[tokio::test]
async fn unreachable_peer_reports_relay_failure() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let self_id = listener.local_addr()?.to_string();
    let dead = {
        let probe = TcpListener::bind("127.0.0.1:0").await?;
        probe.local_addr()?.to_string()
    };
    let config = Config {
        self_id: self_id.clone(),
        peers: vec![dead.clone()],
        peer_borrow_timeout_ms: 200,
        ..Config::default()
    };
    let database = ClusterDatabase::open(&config, Arc::new(CommandRegistry::with_builtins())).await?;
    let server = Server::new(listener, Arc::new(database), config.close_timeout());
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let _ = server
            .run_until(async move {
                let _ = stopped.await;
            })
            .await;
    });

    let mut ring = HashRing::new();
    ring.add_nodes([self_id.clone(), dead.clone()]);
    let remote_key = (0..1000)
        .map(|i| format!("k{i}"))
        .find(|key| ring.pick_node(key) == Some(dead.as_str()))
        .ok_or_else(|| anyhow!("no key owned by the dead peer"))?;

    let mut client = Client::connect(&self_id).await?;
    let Reply::Error(message) = send(&mut client, &["GET", remote_key.as_str()]).await? else {
        return Err(anyhow!("relay to a dead peer must fail"));
    };
    assert!(message.starts_with("ERR relay failed"), "{message}");
    assert_eq!(send(&mut client, &["PING"]).await?, Reply::pong());

    let _ = stop.send(());
    timeout(WAIT, handle).await??;
    Ok(())
}
