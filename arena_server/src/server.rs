//! Networked host.
//!
//! Wraps a [`HostWorld`] with a TCP listener and one reliable stream per
//! observer. Each stream is split: a reader task forwards inbound frames
//! into a shared channel, and the tick loop owns the write half.
//!
//! Per tick:
//! - drain console lines and inbound frames
//! - step the host world and log its presentation events
//! - fan out spawns, the dirty field batch, multicasts and deletes
//!
//! Determinism notes:
//! - Observers are kept in a `BTreeMap` so fan-out order is stable.
//! - Inbound frames are applied in arrival order at the start of a tick.

use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::Context;
use arena_shared::{
    config::SessionConfig,
    ecs::EntityId,
    event::{AnimationRequested, DoorToggled, MatchStarted, TeamChanged},
    net::{
        EntitySpawn, NetMsg, ReliableConn, ReliableListener, ReliableWriter, PROTOCOL_VERSION,
    },
    participant::ParticipantId,
    sync::FieldUpdate,
    team::TeamId,
};
use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};

use crate::host::{HostWorld, JoinOutcome};

/// Outbound half of an observer connection.
#[async_trait]
pub trait ObserverSink: Send {
    async fn deliver(&mut self, msg: &NetMsg) -> anyhow::Result<()>;
}

#[async_trait]
impl ObserverSink for ReliableWriter {
    async fn deliver(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        self.send(msg).await
    }
}

/// Frames forwarded by per-connection reader tasks.
#[derive(Debug)]
enum Inbound {
    Frame(ParticipantId, NetMsg),
    Closed(ParticipantId, String),
}

struct ObserverLink {
    name: String,
    character: EntityId,
    peer: Option<SocketAddr>,
    sink: Box<dyn ObserverSink>,
    reader: JoinHandle<()>,
}

impl Drop for ObserverLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Game server.
pub struct GameServer {
    pub cfg: SessionConfig,
    host: HostWorld,
    observers: BTreeMap<ParticipantId, ObserverLink>,

    tcp: ReliableListener,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,

    /// Channel for console commands from stdin.
    console_rx: Option<mpsc::Receiver<String>>,
    shutdown: bool,
}

impl GameServer {
    /// Binds the listener from `cfg.server_addr`.
    pub async fn new(cfg: SessionConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let tcp = ReliableListener::bind(addr).await?;
        Ok(Self::with_listener(cfg, tcp))
    }

    fn with_listener(cfg: SessionConfig, tcp: ReliableListener) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            host: HostWorld::new(cfg.clone()),
            cfg,
            observers: BTreeMap::new(),
            tcp,
            inbound_tx,
            inbound_rx,
            console_rx: None,
            shutdown: false,
        }
    }

    /// Sets the console input receiver.
    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    pub fn host(&self) -> &HostWorld {
        &self.host
    }

    /// World setup (doors, spawn points) goes through here.
    pub fn host_mut(&mut self) -> &mut HostWorld {
        &mut self.host
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Set by the `quit` console command.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown
    }

    /// Accepts exactly one observer and completes its handshake.
    pub async fn accept_one(&mut self) -> anyhow::Result<ParticipantId> {
        let (conn, peer) = self.tcp.accept().await?;
        self.handle_new_connection(conn, Some(peer)).await
    }

    /// Accepts an observer if one connects within `timeout`.
    pub async fn try_accept(&mut self, timeout: Duration) -> anyhow::Result<Option<ParticipantId>> {
        match tokio::time::timeout(timeout, self.tcp.accept()).await {
            Ok(Ok((conn, peer))) => self.handle_new_connection(conn, Some(peer)).await.map(Some),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }

    /// Handshake: `Hello` in, then `Welcome`, every live entity and a full
    /// replication snapshot out.
    async fn handle_new_connection(
        &mut self,
        mut conn: ReliableConn,
        peer: Option<SocketAddr>,
    ) -> anyhow::Result<ParticipantId> {
        let name = match conn.recv().await? {
            NetMsg::Hello { protocol, name } if protocol == PROTOCOL_VERSION => name,
            NetMsg::Hello { protocol, .. } => {
                conn.send(&NetMsg::Disconnect {
                    reason: format!("protocol {protocol} unsupported, expected {PROTOCOL_VERSION}"),
                })
                .await?;
                anyhow::bail!("observer speaks protocol {protocol}");
            }
            other => anyhow::bail!("unexpected handshake msg: {other:?}"),
        };

        let joined = self.host.join(&name);
        let participant = joined.participant;
        let spawns = self.host.spawn_messages();
        let snapshot = self.host.replication_snapshot();
        if let Err(e) = Self::send_initial_state(&mut conn, &joined, spawns, snapshot).await {
            self.host.leave(participant);
            return Err(e.context("handshake"));
        }

        let (mut reader, writer) = conn.into_split();
        let tx = self.inbound_tx.clone();
        let reader = tokio::spawn(async move {
            loop {
                match reader.recv().await {
                    Ok(msg) => {
                        if tx.send(Inbound::Frame(participant, msg)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Inbound::Closed(participant, e.to_string()));
                        break;
                    }
                }
            }
        });

        self.observers.insert(
            participant,
            ObserverLink {
                name,
                character: joined.character,
                peer,
                sink: Box::new(writer),
                reader,
            },
        );
        info!(participant = ?participant, ?peer, team = ?joined.team, "Observer connected");
        Ok(participant)
    }

    async fn send_initial_state(
        conn: &mut ReliableConn,
        joined: &JoinOutcome,
        spawns: Vec<EntitySpawn>,
        snapshot: Vec<FieldUpdate>,
    ) -> anyhow::Result<()> {
        conn.send(&NetMsg::Welcome {
            participant: joined.participant,
            character: joined.character,
        })
        .await?;
        for spawn in spawns {
            conn.send(&NetMsg::EntitySpawn(spawn)).await?;
        }
        conn.send(&NetMsg::Replicate(snapshot)).await
    }

    /// Runs the server for a number of ticks.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = Duration::from_secs_f32(self.cfg.tick_dt());
        let mut next = Instant::now();

        for _ in 0..ticks {
            next += dt;
            self.step(dt.as_secs_f32()).await?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Executes one fixed simulation step.
    pub async fn step(&mut self, dt_sec: f32) -> anyhow::Result<()> {
        self.process_console_commands()?;
        self.process_inbound();
        self.host.step(dt_sec);
        self.drain_host_events();
        self.fan_out().await;
        Ok(())
    }

    /// The host has no presentation layer; its events are logged and dropped.
    fn drain_host_events(&mut self) {
        let events = self.host.events_mut();
        for e in events.drain::<TeamChanged>() {
            debug!(participant = ?e.participant, team = e.team.0, "Team assigned");
        }
        for e in events.drain::<DoorToggled>() {
            debug!(door = ?e.door, is_open = e.is_open, "Door toggle event");
        }
        for e in events.drain::<MatchStarted>() {
            info!(participants = e.participants, at = %e.at, "Match started");
        }
        for e in events.drain::<AnimationRequested>() {
            debug!(actor = ?e.actor, clip = e.clip.0, "Animation requested");
        }
    }

    fn process_console_commands(&mut self) -> anyhow::Result<()> {
        let lines: Vec<String> = if let Some(ref mut rx) = self.console_rx {
            let mut collected = Vec::new();
            while let Ok(line) = rx.try_recv() {
                collected.push(line);
            }
            collected
        } else {
            Vec::new()
        };

        for line in lines {
            for out in self.exec_console(&line)? {
                println!("{out}");
            }
        }
        Ok(())
    }

    fn process_inbound(&mut self) {
        while let Ok(inbound) = self.inbound_rx.try_recv() {
            match inbound {
                Inbound::Frame(pid, msg) => self.handle_frame(pid, msg),
                Inbound::Closed(pid, reason) => self.drop_observer(pid, &reason),
            }
        }
    }

    fn handle_frame(&mut self, pid: ParticipantId, msg: NetMsg) {
        if !self.observers.contains_key(&pid) {
            return;
        }
        match msg {
            NetMsg::Call(call) => self.host.receive_call(pid, call),
            NetMsg::PlayerCommand(cmd) => self.host.apply_command(pid, &cmd),
            NetMsg::Disconnect { reason } => self.drop_observer(pid, &reason),
            other => debug!(participant = ?pid, ?other, "Unexpected observer message"),
        }
    }

    fn drop_observer(&mut self, pid: ParticipantId, reason: &str) {
        if self.observers.remove(&pid).is_some() {
            self.host.leave(pid);
            info!(participant = ?pid, %reason, "Observer disconnected");
        }
    }

    /// Sends this tick's outbound traffic to every observer.
    async fn fan_out(&mut self) {
        let mut outbound: Vec<NetMsg> = self
            .host
            .drain_spawns()
            .into_iter()
            .map(NetMsg::EntitySpawn)
            .collect();
        let batch = self.host.drain_replication();
        if !batch.is_empty() {
            outbound.push(NetMsg::Replicate(batch));
        }
        outbound.extend(self.host.drain_multicasts().into_iter().map(NetMsg::Call));
        outbound.extend(
            self.host
                .drain_deletes()
                .into_iter()
                .map(|id| NetMsg::EntityDelete { id }),
        );
        if outbound.is_empty() {
            return;
        }

        let mut failed = Vec::new();
        for (pid, link) in self.observers.iter_mut() {
            for msg in &outbound {
                if let Err(e) = link.sink.deliver(msg).await {
                    warn!(participant = ?pid, error = %e, "Send failed");
                    failed.push(*pid);
                    break;
                }
            }
        }
        for pid in failed {
            self.drop_observer(pid, "send failed");
        }
    }

    /// Executes a console command.
    pub fn exec_console(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(command) = tokens.first() else {
            return Ok(Vec::new());
        };

        match *command {
            "status" => {
                let session = self.host.session();
                let mut out = vec![
                    format!("Tick: {}", self.host.tick()),
                    format!(
                        "Session: {:?} ({}/{} connected)",
                        session.phase(),
                        session.connected(),
                        session.threshold()
                    ),
                    format!("Teams: {:?}", self.host.team_counts()),
                    format!("Scores: {:?}", session.scores()),
                    format!("Active doors: {}", self.host.active_door_count()),
                ];
                for (pid, link) in &self.observers {
                    let team = self.host.participant(*pid).and_then(|p| p.team);
                    out.push(format!(
                        "  {:?}: name={} team={:?} character={:?} peer={:?}",
                        pid, link.name, team, link.character, link.peer
                    ));
                }
                Ok(out)
            }
            "score" => {
                let parsed = match (tokens.get(1), tokens.get(2)) {
                    (Some(team), Some(points)) => team.parse::<u8>().ok().zip(points.parse::<i32>().ok()),
                    _ => None,
                };
                let Some((team, points)) = parsed else {
                    return Ok(vec!["Usage: score <team> <points>".to_string()]);
                };
                if self.host.award_score(TeamId(team), points) {
                    Ok(vec![format!("Scores: {:?}", self.host.session().scores())])
                } else {
                    Ok(vec![format!("No team {team}")])
                }
            }
            "kick" => {
                let Some(pid) = tokens.get(1).and_then(|t| t.parse::<u32>().ok()) else {
                    return Ok(vec!["Usage: kick <participant>".to_string()]);
                };
                let pid = ParticipantId(pid);
                if self.observers.contains_key(&pid) {
                    self.drop_observer(pid, "kicked");
                    Ok(vec![format!("Kicked {pid:?}")])
                } else {
                    Ok(vec![format!("No participant {pid:?}")])
                }
            }
            "snapshot" => {
                let snapshot = self.host.replication_snapshot();
                let json =
                    serde_json::to_string_pretty(&snapshot).context("serialize snapshot")?;
                Ok(json.lines().map(str::to_string).collect())
            }
            "quit" | "exit" => {
                info!("Server shutting down");
                self.shutdown = true;
                Ok(vec!["Shutting down".to_string()])
            }
            other => Ok(vec![format!("Unknown command: {other}")]),
        }
    }
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(tick_hz: u32) -> anyhow::Result<(GameServer, SessionConfig)> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
    let tcp = ReliableListener::bind(addr).await?;
    let cfg = SessionConfig {
        server_addr: tcp.local_addr()?.to_string(),
        tick_hz,
        ..Default::default()
    };
    Ok((GameServer::with_listener(cfg.clone(), tcp), cfg))
}
