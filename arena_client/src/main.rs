//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p arena_client -- [--config session.json] [--addr 127.0.0.1:40000] [--name Player]
//!
//! The client connects to the host, mirrors replicated state and sends
//! input commands every tick.
//!
//! Console commands:
//!   status       - Show client status
//!   use [yaw]    - Toggle the door in range, facing `yaw` degrees
//!   disconnect   - Leave the session
//!   quit         - Exit client

use std::env;
use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::Context;
use arena_client::client::{ClientState, GameClient};
use arena_client::input::InputState;
use arena_shared::{
    config::SessionConfig,
    event::{DoorToggled, MatchStarted, TeamChanged},
};
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
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(server = %cfg.server_addr, name = %cfg.player_name, "Starting client");

    let mut client = GameClient::connect(&cfg).await.context("connect")?;

    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

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

    println!("Client connected. Type 'status' for info, 'use' near a door, 'quit' to exit.");
    println!();

    let tick_interval = Duration::from_secs_f32(cfg.tick_dt());

    loop {
        while let Ok(line) = console_rx.try_recv() {
            match client.exec_console(&line).await {
                Ok(output) => {
                    for line in output {
                        println!("{}", line);
                    }
                }
                Err(e) => {
                    println!("Error: {}", e);
                }
            }
        }

        if client.state == ClientState::Disconnected {
            println!("Disconnected from server.");
            break;
        }

        if let Err(e) = client.tick(InputState::default()).await {
            println!("Tick error: {}", e);
        }

        // Presentation stand-in: report what changed.
        for started in client.world.events_mut().drain::<MatchStarted>() {
            println!("Match started with {} players", started.participants);
        }
        for changed in client.world.events_mut().drain::<TeamChanged>() {
            println!("{:?} is on team {}", changed.participant, changed.team.0);
        }
        for toggled in client.world.events_mut().drain::<DoorToggled>() {
            let verb = if toggled.is_open { "opens" } else { "closes" };
            println!("Door {:?} {}", toggled.door, verb);
        }

        tokio::time::sleep(tick_interval).await;
    }

    Ok(())
}
