use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use ringkv::{
    cli::{CallArgs, Cli, Command, ServeArgs},
    client::{Client, format_reply},
    open_database,
    server::Server,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Call(args) => call(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = args.resolve()?;
    let database = open_database(&config).await?;

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let server = Server::new(listener, database, config.close_timeout());
    info!(
        addr = %server.local_addr()?,
        cluster = config.is_cluster(),
        append_only = config.append_only,
        "server listening"
    );

    if let Err(err) = server.run_until_signal().await {
        warn!("server exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}

async fn call(args: CallArgs) -> Result<()> {
    let mut client = Client::connect(&args.server).await?;
    if args.db != 0 {
        let select = [Bytes::from_static(b"SELECT"), Bytes::from(args.db.to_string())];
        let reply = client.send(&select).await?;
        if reply.is_error() {
            println!("{}", format_reply(&reply));
            return Ok(());
        }
    }

    let line: Vec<Bytes> = args.command.into_iter().map(Bytes::from).collect();
    let reply = client.send(&line).await?;
    println!("{}", format_reply(&reply));
    client.close().await;
    Ok(())
}
