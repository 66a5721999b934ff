use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use glam::Vec2;

use skirmish::ConnectionState;
use skirmish_client::{ClientConfig, GameClient};

#[derive(Parser)]
#[command(name = "skirmish-client")]
#[command(about = "Headless skirmish client: connects, predicts, interpolates")]
struct Args {
    /// Server address, host:port.
    #[arg(short, long, default_value_t = format!("127.0.0.1:{}", skirmish::DEFAULT_PORT))]
    server: String,

    #[arg(short, long, default_value_t = skirmish::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(long, default_value_t = skirmish::DEFAULT_SNAPSHOT_RATE)]
    snapshot_rate: u32,

    /// Seconds to run before disconnecting; 0 runs until killed.
    #[arg(short, long, default_value_t = 0)]
    duration: u64,

    /// Fire a test shot roughly every this many seconds; 0 disables.
    #[arg(long, default_value_t = 0)]
    fire_interval: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let server_addr: SocketAddr = args
        .server
        .parse()
        .with_context(|| format!("invalid server address {}", args.server))?;

    let config = ClientConfig {
        server_tick_rate: args.tick_rate,
        snapshot_rate: args.snapshot_rate,
        ..Default::default()
    };

    let mut client = GameClient::new(config)?;
    client.connect(server_addr)?;

    let frame = Duration::from_secs_f64(1.0 / 60.0);
    let started = Instant::now();
    let mut last_report = Instant::now();
    let mut last_fire = Instant::now();

    loop {
        let frame_start = Instant::now();

        // Bot input: walk a slow circle so movement exercises prediction
        // and reconciliation continuously.
        let phase = started.elapsed().as_secs_f32() * 0.4;
        let direction = Vec2::new(phase.cos(), phase.sin());

        client.update(frame.as_secs_f32(), direction)?;

        if args.fire_interval > 0
            && client.state() == ConnectionState::Connected
            && last_fire.elapsed() >= Duration::from_secs(args.fire_interval)
        {
            last_fire = Instant::now();
            client.fire(direction)?;
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            report(&client);
        }

        if args.duration > 0 && started.elapsed() >= Duration::from_secs(args.duration) {
            break;
        }

        if let Some(remaining) = frame.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    client.disconnect()?;
    log::info!("done");
    Ok(())
}

fn report(client: &GameClient) {
    match client.state() {
        ConnectionState::Connected => {
            let pos = client.predicted_position();
            let stats = client.net_stats();
            log::info!(
                "pos=({:.1},{:.1}) entities={} buffer={} rtt={:.0}ms snapshots={} dup={} mismatches={} snaps={}",
                pos.x,
                pos.y,
                client.interpolated_entities().count(),
                client.buffered_snapshots(),
                client.clock().rtt_ms(),
                stats.snapshots_received,
                stats.snapshots_duplicate,
                stats.baseline_mismatches,
                client.prediction().reconcile_snaps(),
            );
        }
        state => log::info!("state: {state:?}"),
    }
}
