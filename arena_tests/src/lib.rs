//! In-process loopback harness.
//!
//! Runs one [`HostWorld`] and any number of [`ObserverWorld`]s in a single
//! thread, moving the same messages the TCP transport would carry. Delivery
//! can be shuffled per tick to exercise out-of-order field arrival, and
//! paused per observer to simulate a slow link.

use std::collections::BTreeMap;

use arena_client::ObserverWorld;
use arena_server::HostWorld;
use arena_shared::{
    config::SessionConfig, ecs::EntityId, math::Vec3, net::NetMsg, participant::ParticipantId,
};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use tracing::debug;

/// One connected observer and its undelivered traffic.
pub struct Peer {
    pub world: ObserverWorld,
    pub character: EntityId,
    inbox: Vec<NetMsg>,
    paused: bool,
}

impl Peer {
    pub fn pending(&self) -> usize {
        self.inbox.len()
    }

    fn deliver(&mut self) {
        for msg in std::mem::take(&mut self.inbox) {
            match msg {
                NetMsg::EntitySpawn(spawn) => {
                    self.world.apply_spawn(&spawn);
                }
                NetMsg::EntityDelete { id } => {
                    self.world.apply_delete(id);
                }
                NetMsg::Replicate(batch) => self.world.apply_updates(&batch),
                NetMsg::Call(call) => self.world.receive_call(call),
                _ => {}
            }
        }
    }
}

/// Host plus observers wired together in memory.
pub struct Loopback {
    pub host: HostWorld,
    cfg: SessionConfig,
    peers: BTreeMap<ParticipantId, Peer>,
    shuffle: Option<StdRng>,
}

impl Loopback {
    pub fn new(cfg: SessionConfig) -> Self {
        Self {
            host: HostWorld::new(cfg.clone()),
            cfg,
            peers: BTreeMap::new(),
            shuffle: None,
        }
    }

    /// Delivers each tick's traffic in a seeded random order, with field
    /// batches split into single updates. Deletes stay last.
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.shuffle = Some(StdRng::seed_from_u64(seed));
        self
    }

    pub fn dt(&self) -> f32 {
        self.cfg.tick_dt()
    }

    /// Joins a participant and queues the late-join handshake traffic.
    pub fn connect(&mut self, name: &str) -> ParticipantId {
        let joined = self.host.join(name);
        let mut world = ObserverWorld::new(self.cfg.door);
        world.welcome(joined.participant, joined.character);

        let mut inbox: Vec<NetMsg> = self
            .host
            .spawn_messages()
            .into_iter()
            .map(NetMsg::EntitySpawn)
            .collect();
        inbox.push(NetMsg::Replicate(self.host.replication_snapshot()));
        let inbox = self.order(inbox);
        debug!(participant = ?joined.participant, queued = inbox.len(), "Loopback observer connected");

        self.peers.insert(
            joined.participant,
            Peer {
                world,
                character: joined.character,
                inbox,
                paused: false,
            },
        );
        joined.participant
    }

    pub fn disconnect(&mut self, id: ParticipantId) {
        if self.peers.remove(&id).is_some() {
            self.host.leave(id);
            debug!(participant = ?id, "Loopback observer disconnected");
        }
    }

    /// Holds back delivery to one observer until resumed.
    pub fn pause(&mut self, id: ParticipantId, paused: bool) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.paused = paused;
        }
    }

    pub fn peer(&self, id: ParticipantId) -> &Peer {
        &self.peers[&id]
    }

    pub fn peer_mut(&mut self, id: ParticipantId) -> &mut Peer {
        self.peers.get_mut(&id).expect("unknown participant")
    }

    pub fn observer(&self, id: ParticipantId) -> &ObserverWorld {
        &self.peer(id).world
    }

    pub fn observer_mut(&mut self, id: ParticipantId) -> &mut ObserverWorld {
        &mut self.peer_mut(id).world
    }

    pub fn participants(&self) -> Vec<ParticipantId> {
        self.peers.keys().copied().collect()
    }

    /// Places a participant's character on the host; overlap detection
    /// picks it up on the next tick.
    pub fn move_to(&mut self, id: ParticipantId, position: Vec3) {
        let character = self.peer(id).character;
        self.host.teleport(character, position);
    }

    /// One full round: observer requests up, host step, traffic down,
    /// observer step.
    pub fn tick(&mut self) {
        let dt = self.dt();
        for (id, peer) in self.peers.iter_mut() {
            for call in peer.world.drain_outgoing() {
                self.host.receive_call(*id, call);
            }
        }

        self.host.step(dt);

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
        let deletes: Vec<NetMsg> = self
            .host
            .drain_deletes()
            .into_iter()
            .map(|id| NetMsg::EntityDelete { id })
            .collect();

        let ids: Vec<ParticipantId> = self.peers.keys().copied().collect();
        for id in ids {
            let mut msgs = self.order(outbound.clone());
            msgs.extend(deletes.iter().cloned());
            let Some(peer) = self.peers.get_mut(&id) else {
                continue;
            };
            peer.inbox.extend(msgs);
            if !peer.paused {
                peer.deliver();
            }
            peer.world.step(dt);
        }
    }

    pub fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    fn order(&mut self, msgs: Vec<NetMsg>) -> Vec<NetMsg> {
        let Some(rng) = self.shuffle.as_mut() else {
            return msgs;
        };
        let mut split = Vec::new();
        for msg in msgs {
            match msg {
                NetMsg::Replicate(batch) => {
                    split.extend(batch.into_iter().map(|u| NetMsg::Replicate(vec![u])));
                }
                other => split.push(other),
            }
        }
        split.shuffle(rng);
        split
    }
}
