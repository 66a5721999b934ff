use anyhow::Result;
use clap::Parser;

use skirmish_server::{GameServer, ServerConfig};

#[derive(Parser)]
#[command(name = "skirmish-server")]
#[command(about = "Authoritative skirmish game server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = skirmish::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = skirmish::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = skirmish::DEFAULT_SNAPSHOT_RATE)]
    snapshot_rate: u32,

    #[arg(short, long, default_value_t = 32)]
    max_peers: usize,

    #[arg(long, default_value_t = 24)]
    npcs: u32,

    #[arg(long, default_value_t = 4)]
    obstacles: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let config = ServerConfig {
        tick_rate: args.tick_rate,
        snapshot_rate: args.snapshot_rate,
        max_peers: args.max_peers,
        npc_count: args.npcs,
        obstacle_count: args.obstacles,
        ..Default::default()
    };

    let mut server = GameServer::new(&bind_addr, config)?;
    log::info!(
        "listening on {} at {} Hz ({} snapshots/s)",
        server.local_addr(),
        args.tick_rate,
        args.snapshot_rate
    );

    server.run();
    Ok(())
}
