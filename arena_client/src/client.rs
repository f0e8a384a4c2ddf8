//! Client implementation.
//!
//! The client maintains:
//! - One reliable stream to the host (handshake, spawns, field batches,
//!   remote calls)
//! - A reader task forwarding inbound frames to the tick loop
//! - An [`ObserverWorld`] driven by what arrives
//! - Per-tick command generation

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use arena_shared::{
    config::SessionConfig,
    ecs::EntityId,
    math::Vec3,
    net::{NetMsg, PlayerCommand, ReliableConn, ReliableWriter, PROTOCOL_VERSION},
    participant::ParticipantId,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    input::{build_command, InputState},
    observer::ObserverWorld,
};

/// Client connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// Handshake done, receiving replication.
    Connected,
    /// The host closed the stream or sent `Disconnect`.
    Disconnected,
}

#[derive(Debug)]
enum Inbound {
    Frame(NetMsg),
    Closed(String),
}

/// High-level game client.
pub struct GameClient {
    pub participant: ParticipantId,
    pub character: EntityId,
    pub state: ClientState,
    pub world: ObserverWorld,

    writer: ReliableWriter,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    reader: JoinHandle<()>,
    peer: SocketAddr,
    dt: f32,
    tick: u32,
}

impl GameClient {
    /// Connects to a host and performs the handshake.
    pub async fn connect(cfg: &SessionConfig) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        info!(server = %server_addr, name = %cfg.player_name, "Connecting to server");

        let mut conn = ReliableConn::connect(server_addr).await?;
        conn.send(&NetMsg::Hello {
            protocol: PROTOCOL_VERSION,
            name: cfg.player_name.clone(),
        })
        .await?;

        let (participant, character) = match conn.recv().await? {
            NetMsg::Welcome {
                participant,
                character,
            } => (participant, character),
            NetMsg::Disconnect { reason } => anyhow::bail!("refused by server: {reason}"),
            other => anyhow::bail!("expected Welcome, got {other:?}"),
        };
        info!(participant = ?participant, character = ?character, "Connected to server");

        let mut world = ObserverWorld::new(cfg.door);
        world.welcome(participant, character);

        let peer = conn.peer_addr()?;
        let (mut reader, writer) = conn.into_split();
        let (tx, inbound) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            loop {
                match reader.recv().await {
                    Ok(msg) => {
                        if tx.send(Inbound::Frame(msg)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Inbound::Closed(e.to_string()));
                        break;
                    }
                }
            }
        });

        Ok(Self {
            participant,
            character,
            state: ClientState::Connected,
            world,
            writer,
            inbound,
            reader,
            peer,
            dt: cfg.tick_dt(),
            tick: 0,
        })
    }

    /// Applies every frame that has already arrived. Returns how many.
    pub fn poll(&mut self) -> usize {
        let mut n = 0;
        while let Ok(inbound) = self.inbound.try_recv() {
            self.handle_inbound(inbound);
            n += 1;
        }
        n
    }

    /// Waits up to `timeout` for at least one frame, then drains the rest.
    pub async fn poll_timeout(&mut self, timeout: Duration) -> usize {
        match tokio::time::timeout(timeout, self.inbound.recv()).await {
            Ok(Some(inbound)) => {
                self.handle_inbound(inbound);
                1 + self.poll()
            }
            Ok(None) => {
                self.state = ClientState::Disconnected;
                0
            }
            Err(_) => 0,
        }
    }

    fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Frame(msg) => self.handle_message(msg),
            Inbound::Closed(reason) => {
                warn!(%reason, "Reliable connection closed");
                self.state = ClientState::Disconnected;
            }
        }
    }

    fn handle_message(&mut self, msg: NetMsg) {
        match msg {
            NetMsg::EntitySpawn(spawn) => {
                self.world.apply_spawn(&spawn);
            }
            NetMsg::EntityDelete { id } => {
                self.world.apply_delete(id);
            }
            NetMsg::Replicate(batch) => self.world.apply_updates(&batch),
            NetMsg::Call(call) => self.world.receive_call(call),
            NetMsg::Disconnect { reason } => {
                info!(%reason, "Disconnected by server");
                self.state = ClientState::Disconnected;
            }
            other => debug!(?other, "Unhandled message"),
        }
    }

    /// Advances one client tick: apply inbound traffic, step the world,
    /// send queued requests and the movement command.
    pub async fn tick(&mut self, input: InputState) -> anyhow::Result<PlayerCommand> {
        self.poll();
        self.world.step(self.dt);
        if input.action {
            self.world.on_action(input.interaction_vector());
        }
        self.flush_calls().await?;

        let cmd = build_command(self.tick, input);
        self.writer
            .send(&NetMsg::PlayerCommand(cmd.clone()))
            .await?;
        self.tick += 1;
        Ok(cmd)
    }

    /// Requests a toggle of the bound door. Returns false when nothing is
    /// bound, in which case nothing is sent.
    pub async fn interact(&mut self, interaction_vector: Vec3) -> anyhow::Result<bool> {
        let sent = self.world.on_action(interaction_vector);
        self.flush_calls().await?;
        Ok(sent)
    }

    async fn flush_calls(&mut self) -> anyhow::Result<()> {
        for call in self.world.drain_outgoing() {
            self.writer.send(&NetMsg::Call(call)).await?;
        }
        Ok(())
    }

    /// Tells the host we are leaving.
    pub async fn disconnect(&mut self, reason: &str) -> anyhow::Result<()> {
        self.writer
            .send(&NetMsg::Disconnect {
                reason: reason.to_string(),
            })
            .await?;
        self.state = ClientState::Disconnected;
        Ok(())
    }

    /// Executes a console command.
    pub async fn exec_console(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(command) = tokens.first() else {
            return Ok(Vec::new());
        };

        match *command {
            "status" => {
                let mut out = vec![
                    format!("State: {:?}", self.state),
                    format!("Participant: {:?}", self.participant),
                    format!("Team: {:?}", self.world.team_of(self.participant)),
                    format!("Tick: {}", self.tick),
                    format!("Interactable: {:?}", self.world.binding()),
                    format!("Scores: {:?}", self.world.scores()),
                ];
                if let Some(started) = self.world.match_started() {
                    out.push(format!("Match started at {}", started.at));
                }
                for (id, door) in self.world.doors() {
                    out.push(format!(
                        "  door {:?}: {:?} angle={:.1}",
                        id,
                        door.phase(),
                        door.current_angle()
                    ));
                }
                Ok(out)
            }
            "use" => {
                let yaw = tokens
                    .get(1)
                    .and_then(|t| t.parse::<f32>().ok())
                    .unwrap_or(0.0);
                if self.interact(Vec3::from_yaw(yaw)).await? {
                    Ok(vec!["Toggle requested".to_string()])
                } else {
                    Ok(vec!["Nothing to use".to_string()])
                }
            }
            "disconnect" | "quit" | "exit" => {
                self.disconnect("client quit").await?;
                Ok(vec!["Disconnected".to_string()])
            }
            other => Ok(vec![format!("Unknown command: {other}")]),
        }
    }

    pub fn server_peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
