//! Loopback demo: an in-process server plus a bot client talking over UDP
//! on 127.0.0.1, with optional simulated packet loss on the server side.
//! Watch the client's reconciliation counters to see the protocol absorb
//! the abuse.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use glam::Vec2;

use skirmish::{ConnectionState, PacketLossSimulation};
use skirmish_client::{ClientConfig, GameClient};
use skirmish_server::{GameServer, ServerConfig};

#[derive(Parser)]
#[command(name = "skirmish-demo")]
#[command(about = "Loopback server + client run with simulated packet loss")]
struct Args {
    /// Seconds to run.
    #[arg(short, long, default_value_t = 15)]
    duration: u64,

    /// Outbound snapshot loss percentage, 0-100.
    #[arg(long, default_value_t = 20.0)]
    loss: f32,

    /// Duplicate delivery percentage, 0-100.
    #[arg(long, default_value_t = 5.0)]
    duplicate: f32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = ServerConfig {
        npc_count: 12,
        obstacle_count: 2,
        global_packet_loss: Some(PacketLossSimulation {
            enabled: args.loss > 0.0 || args.duplicate > 0.0,
            loss_percent: args.loss,
            duplicate_percent: args.duplicate,
            ..Default::default()
        }),
        ..Default::default()
    };

    let mut server = GameServer::new("127.0.0.1:0", config)?;
    let server_addr = server.local_addr();
    let running = server.running();
    log::info!("demo server on {server_addr}, {}% loss", args.loss);

    let server_thread = std::thread::spawn(move || server.run());

    let mut client = GameClient::new(ClientConfig::default())?;
    client.connect(server_addr)?;

    let frame = Duration::from_secs_f64(1.0 / 60.0);
    let started = Instant::now();
    let mut last_report = Instant::now();

    while started.elapsed() < Duration::from_secs(args.duration) {
        let frame_start = Instant::now();

        let phase = started.elapsed().as_secs_f32() * 0.5;
        let direction = Vec2::new(phase.cos(), phase.sin());
        client.update(frame.as_secs_f32(), direction)?;

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            if client.state() == ConnectionState::Connected {
                let pos = client.predicted_position();
                let stats = client.net_stats();
                log::info!(
                    "pos=({:.1},{:.1}) entities={} snapshots={} mismatches={} keyframes={} snaps={}",
                    pos.x,
                    pos.y,
                    client.interpolated_entities().count(),
                    stats.snapshots_received,
                    stats.baseline_mismatches,
                    stats.keyframes_requested,
                    client.prediction().reconcile_snaps(),
                );
            }
        }

        if let Some(remaining) = frame.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    client.disconnect()?;
    running.store(false, Ordering::SeqCst);
    server_thread.join().expect("server thread panicked");
    log::info!("demo complete");
    Ok(())
}
