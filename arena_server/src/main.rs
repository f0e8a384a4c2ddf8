//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p arena_server -- [--config session.json] [--addr 127.0.0.1:40000] [--tick-hz 64]
//!
//! The server listens for observers, runs the authoritative fixed-step
//! simulation and replicates field changes to every connected observer.
//!
//! Console commands:
//!   status                  - Show session status
//!   score <team> <points>   - Award points to a team
//!   kick <participant>      - Disconnect a participant
//!   snapshot                - Dump every replicated value as JSON
//!   quit                    - Shutdown server

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use arena_server::server::GameServer;
use arena_shared::{config::SessionConfig, math::Vec3, spawn::SpawnPoint, team::TeamId};
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> anyhow::Result<SessionConfig> {
    let args: Vec<String> = env::args().collect();
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args.get(i + 1).context("--config needs a path")?;
            let text = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
            SessionConfig::from_json_str(&text).with_context(|| format!("parse {path}"))?
        }
        None => SessionConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(64);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

/// A door between two team bases.
fn build_demo_arena(server: &mut GameServer) {
    let host = server.host_mut();
    host.add_spawn_point(SpawnPoint::new(Vec3::ZERO, 0.0));
    host.add_spawn_point(SpawnPoint::for_team(Vec3::new(-600.0, 0.0, 0.0), 0.0, TeamId(0)));
    host.add_spawn_point(SpawnPoint::for_team(Vec3::new(-600.0, 200.0, 0.0), 0.0, TeamId(0)));
    host.add_spawn_point(SpawnPoint::for_team(Vec3::new(600.0, 0.0, 0.0), 180.0, TeamId(1)));
    host.add_spawn_point(SpawnPoint::for_team(Vec3::new(600.0, 200.0, 0.0), 180.0, TeamId(1)));
    host.spawn_door(Vec3::ZERO, Vec3::FORWARD);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(
        addr = %cfg.server_addr,
        tick_hz = cfg.tick_hz,
        threshold = cfg.player_threshold,
        teams = cfg.num_teams,
        "Starting server"
    );

    let mut server = GameServer::new(cfg.clone())
        .await
        .context("create server")?;
    build_demo_arena(&mut server);
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    let (console_tx, console_rx) = mpsc::channel::<String>(32);
    server.set_console_input(console_rx);

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                break;
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Server ready. Type 'status' for info, 'quit' to exit.");
    println!();

    let tick_interval = std::time::Duration::from_secs_f32(cfg.tick_dt());
    let mut next_tick = tokio::time::Instant::now();

    while !server.is_shutting_down() {
        if let Ok(Some(pid)) = server.try_accept(std::time::Duration::from_millis(1)).await {
            info!(participant = ?pid, "New observer accepted");
        }

        server.step(tick_interval.as_secs_f32()).await?;

        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }
    Ok(())
}
