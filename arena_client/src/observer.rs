//! Observer-side world.
//!
//! Mirrors the host's entities from spawn packets and drives door motion
//! locally from replicated fields. Nothing here writes replicated state:
//! the only outbound traffic is validated toggle requests.
//!
//! Replicated fields may arrive in any order relative to each other and to
//! the entity's spawn. Values for entities not spawned yet are kept in the
//! replica and replayed when the spawn arrives.

use std::collections::{BTreeMap, BTreeSet};

use arena_shared::{
    config::DoorConfig,
    door::{Door, Step},
    ecs::{EntityId, EntityKind, Position, World},
    event::{AnimationPlayer, AnimationRequested, DoorToggled, EventBus, MatchStarted, TeamChanged},
    math::Vec3,
    net::EntitySpawn,
    participant::ParticipantId,
    rpc::{HostCall, ObserverCall, Origin, RemoteCall, RemoteCallChannel, Role},
    sync::{Field, FieldMask, FieldUpdate, SyncReplica, SyncTarget, SyncValue},
    team::TeamId,
    trigger::InteractionBinding,
};
use tracing::{debug, info};

/// Replica-driven view of the session.
pub struct ObserverWorld {
    participant: Option<ParticipantId>,
    character: Option<EntityId>,
    door_params: DoorConfig,
    world: World,
    replica: SyncReplica,
    rpc: RemoteCallChannel,
    active_doors: BTreeSet<EntityId>,
    teams: BTreeMap<ParticipantId, TeamId>,
    num_teams: u8,
    scores: Vec<i32>,
    match_started: Option<MatchStarted>,
    animation: Option<Box<dyn AnimationPlayer>>,
    events: EventBus,
}

impl ObserverWorld {
    pub fn new(door_params: DoorConfig) -> Self {
        let mut replica = SyncReplica::new();
        replica.notify_on(FieldMask::IS_OPEN | FieldMask::TEAM);
        Self {
            participant: None,
            character: None,
            door_params,
            world: World::default(),
            replica,
            rpc: RemoteCallChannel::new(Role::Observer),
            active_doors: BTreeSet::new(),
            teams: BTreeMap::new(),
            num_teams: 0,
            scores: Vec::new(),
            match_started: None,
            animation: None,
            events: EventBus::default(),
        }
    }

    /// Routes `PlayAnimation` multicasts to a presentation-side player.
    pub fn with_animation_player(mut self, player: Box<dyn AnimationPlayer>) -> Self {
        self.animation = Some(player);
        self
    }

    /// Handshake result: who we are and which character we control.
    pub fn welcome(&mut self, participant: ParticipantId, character: EntityId) {
        self.participant = Some(participant);
        self.character = Some(character);
    }

    pub fn participant(&self) -> Option<ParticipantId> {
        self.participant
    }

    pub fn character(&self) -> Option<EntityId> {
        self.character
    }

    // ─── Entity lifecycle ───

    /// Mirrors a host entity. Repeated spawns of a live id are ignored.
    pub fn apply_spawn(&mut self, spawn: &EntitySpawn) -> bool {
        if self.world.contains(spawn.id) {
            return false;
        }
        let id = spawn.id;
        self.world.spawn_with_id(id);
        self.world.insert(id, spawn.kind);
        self.world.insert(id, Position(spawn.position));
        match spawn.kind {
            EntityKind::Door => {
                self.world
                    .insert(id, Door::new(spawn.forward, self.door_params));
            }
            EntityKind::Character => {
                self.world.insert(id, InteractionBinding::default());
            }
            EntityKind::SpawnPoint | EntityKind::Prop => {}
        }

        let early = self.replica.values_for(SyncTarget::Entity(id));
        if !early.is_empty() {
            debug!(entity = ?id, fields = early.len(), "Replaying fields received before spawn");
            for (field, value) in &early {
                self.apply_entity_field(id, *field, value, true);
            }
            self.settle_check(id);
        }
        debug!(entity = ?id, kind = ?spawn.kind, "Entity spawned");
        true
    }

    pub fn apply_delete(&mut self, id: EntityId) -> bool {
        self.replica.forget(SyncTarget::Entity(id));
        self.active_doors.remove(&id);
        self.world.despawn(id)
    }

    // ─── Replication ───

    /// Applies one batch of replicated fields in the order received.
    pub fn apply_updates(&mut self, batch: &[FieldUpdate]) {
        let mut touched = BTreeSet::new();
        for update in batch {
            let default = self.local_value(update.target, update.field);
            let applied = self.replica.apply(update, default.as_ref());
            match update.target {
                SyncTarget::Entity(id) => {
                    if self.world.contains(id) {
                        self.apply_entity_field(id, update.field, &update.value, applied.notify);
                        touched.insert(id);
                    }
                }
                SyncTarget::Participant(pid) => match (update.field, update.value.as_team()) {
                    (Field::Team, Some(Some(team))) => {
                        self.teams.insert(pid, team);
                        if applied.notify {
                            self.events.push(TeamChanged {
                                participant: pid,
                                team,
                            });
                        }
                    }
                    // The host clears a team only when the participant leaves.
                    (Field::Team, Some(None)) => {
                        self.teams.remove(&pid);
                        self.replica.forget(update.target);
                        debug!(participant = ?pid, "Participant left");
                    }
                    _ => {}
                },
                SyncTarget::Session => match (update.field, &update.value) {
                    (Field::NumTeams, SyncValue::Count(n)) => self.num_teams = *n,
                    (Field::TeamScores, SyncValue::Scores(s)) => self.scores = s.clone(),
                    _ => {}
                },
            }
        }
        for id in touched {
            self.settle_check(id);
        }
    }

    /// What the local state holds for a field before any replicated value.
    fn local_value(&self, target: SyncTarget, field: Field) -> Option<SyncValue> {
        match target {
            SyncTarget::Entity(id) => {
                if let Some(door) = self.world.get::<Door>(id) {
                    return door.state().field(field);
                }
                self.world
                    .get::<InteractionBinding>(id)
                    .map(|b| SyncValue::Entity(b.bound()))
            }
            SyncTarget::Participant(_) => Some(SyncValue::Team(None)),
            SyncTarget::Session => None,
        }
    }

    fn apply_entity_field(&mut self, id: EntityId, field: Field, value: &SyncValue, notify: bool) {
        if field == Field::Interactable {
            if let (Some(binding), Some(bound)) = (
                self.world.get_mut::<InteractionBinding>(id),
                value.as_entity(),
            ) {
                binding.set(bound);
            }
            return;
        }

        let Some(door) = self.world.get_mut::<Door>(id) else {
            return;
        };
        let toggled = door.apply_replicated(field, value);
        if toggled && notify {
            door.on_toggled();
            let is_open = door.state().is_open;
            self.events.push(DoorToggled { door: id, is_open });
            debug!(door = ?id, is_open, "Door toggled by host");
        }
        if !door.is_at_rest() {
            self.active_doors.insert(id);
        }
    }

    /// A door that came to rest at the wrong pose for its replicated state
    /// starts moving again.
    fn settle_check(&mut self, id: EntityId) {
        if let Some(door) = self.world.get_mut::<Door>(id) {
            if door.resume_if_unsettled() || !door.is_at_rest() {
                self.active_doors.insert(id);
            }
        }
    }

    // ─── Remote calls ───

    /// Transport delivers a call from the host stream.
    pub fn receive_call(&mut self, call: RemoteCall) {
        self.rpc.receive(Origin::Host, call);
    }

    /// Observer-side action: asks the host to toggle the bound door.
    ///
    /// Without a replicated binding this is a no-op and nothing is sent.
    pub fn on_action(&mut self, interaction_vector: Vec3) -> bool {
        let Some(actor) = self.character else {
            return false;
        };
        let Some(door_id) = self.binding() else {
            debug!(actor = ?actor, "Action without an interactable in range");
            return false;
        };
        if let Some(door) = self.world.get_mut::<Door>(door_id) {
            door.store_interaction(interaction_vector);
        }
        self.rpc.call_host(HostCall::RequestToggleDoor {
            actor,
            interaction_vector,
        })
    }

    /// Outbound requests queued since the last drain.
    pub fn drain_outgoing(&mut self) -> Vec<RemoteCall> {
        self.rpc.drain_outgoing()
    }

    // ─── Simulation ───

    /// Runs multicasts received since the last step, then advances doors.
    pub fn step(&mut self, dt: f32) {
        for accepted in self.rpc.dispatch_multicasts() {
            match accepted.call {
                ObserverCall::MatchStarted(started) => {
                    if self.match_started.is_none() {
                        info!(participants = started.participants, at = %started.at, "Match started");
                        self.match_started = Some(started);
                        self.events.push(started);
                    }
                }
                ObserverCall::PlayAnimation { actor, clip } => {
                    if let Some(player) = self.animation.as_mut() {
                        player.play(actor, clip);
                    }
                    self.events.push(AnimationRequested { actor, clip });
                }
            }
        }

        let active: Vec<EntityId> = self.active_doors.iter().copied().collect();
        for id in active {
            let Some(door) = self.world.get_mut::<Door>(id) else {
                self.active_doors.remove(&id);
                continue;
            };
            if let Step::Settled(phase) = door.advance(dt) {
                debug!(door = ?id, ?phase, "Door at rest");
            }
            if door.is_at_rest() {
                self.active_doors.remove(&id);
            }
        }
    }

    // ─── Inspection ───

    /// Door the controlled character may toggle, per the host.
    pub fn binding(&self) -> Option<EntityId> {
        self.character
            .and_then(|c| self.world.get::<InteractionBinding>(c))
            .and_then(InteractionBinding::bound)
    }

    pub fn door(&self, id: EntityId) -> Option<&Door> {
        self.world.get::<Door>(id)
    }

    /// Test hook: direct access to a door's actuator.
    pub fn door_mut(&mut self, id: EntityId) -> Option<&mut Door> {
        self.world.get_mut::<Door>(id)
    }

    pub fn doors(&self) -> impl Iterator<Item = (EntityId, &Door)> {
        self.world.iter::<Door>()
    }

    pub fn is_door_active(&self, id: EntityId) -> bool {
        self.active_doors.contains(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.world.contains(id)
    }

    pub fn team_of(&self, participant: ParticipantId) -> Option<TeamId> {
        self.teams.get(&participant).copied()
    }

    pub fn num_teams(&self) -> u8 {
        self.num_teams
    }

    pub fn scores(&self) -> &[i32] {
        &self.scores
    }

    pub fn match_started(&self) -> Option<&MatchStarted> {
        self.match_started.as_ref()
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_shared::{
        door::{DoorPhase, DoorState, MeshActuator},
        event::ClipHandle,
    };
    use std::sync::{Arc, Mutex};

    const DT: f32 = 1.0 / 64.0;
    const DOOR: EntityId = EntityId(1);
    const ME: EntityId = EntityId(2);

    fn door_spawn() -> EntitySpawn {
        EntitySpawn {
            id: DOOR,
            kind: EntityKind::Door,
            position: Vec3::ZERO,
            forward: Vec3::FORWARD,
        }
    }

    fn character_spawn() -> EntitySpawn {
        EntitySpawn {
            id: ME,
            kind: EntityKind::Character,
            position: Vec3::ZERO,
            forward: Vec3::FORWARD,
        }
    }

    fn observer() -> ObserverWorld {
        let mut obs = ObserverWorld::new(DoorConfig::default());
        obs.welcome(ParticipantId(7), ME);
        obs.apply_spawn(&door_spawn());
        obs.apply_spawn(&character_spawn());
        obs
    }

    fn door_batch(state: &DoorState) -> Vec<FieldUpdate> {
        state
            .fields()
            .into_iter()
            .map(|(field, value)| FieldUpdate {
                target: SyncTarget::Entity(DOOR),
                field,
                value,
            })
            .collect()
    }

    fn opened_state() -> DoorState {
        let mut host = Door::new(Vec3::FORWARD, DoorConfig::default());
        host.toggle_authoritative(Vec3::new(-1.0, 0.0, 0.0));
        *host.state()
    }

    fn run(obs: &mut ObserverWorld, ticks: usize) {
        for _ in 0..ticks {
            obs.step(DT);
        }
    }

    #[test]
    fn action_without_binding_sends_nothing() {
        let mut obs = observer();
        assert!(!obs.on_action(Vec3::FORWARD));
        assert!(obs.drain_outgoing().is_empty());
    }

    #[test]
    fn replicated_binding_enables_requests() {
        let mut obs = observer();
        obs.apply_updates(&[FieldUpdate {
            target: SyncTarget::Entity(ME),
            field: Field::Interactable,
            value: SyncValue::Entity(Some(DOOR)),
        }]);
        assert_eq!(obs.binding(), Some(DOOR));
        assert!(obs.on_action(Vec3::FORWARD));
        assert_eq!(
            obs.drain_outgoing(),
            vec![RemoteCall::ToHost(HostCall::RequestToggleDoor {
                actor: ME,
                interaction_vector: Vec3::FORWARD,
            })]
        );
        // No local prediction.
        assert!(!obs.door(DOOR).unwrap().state().is_open);
    }

    #[test]
    fn replicated_open_runs_reaction_and_converges() {
        let mut obs = observer();
        obs.apply_updates(&door_batch(&opened_state()));
        assert_eq!(obs.events_mut().drain::<DoorToggled>().len(), 1);
        assert!(obs.is_door_active(DOOR));

        run(&mut obs, 200);
        let door = obs.door(DOOR).unwrap();
        assert_eq!(door.phase(), DoorPhase::Open);
        assert!((door.current_angle() + 90.0).abs() <= 1.5);
        assert!(!obs.is_door_active(DOOR));
    }

    #[test]
    fn is_open_before_target_still_converges() {
        let mut obs = observer();
        let mut batch = door_batch(&opened_state());
        // Deliver is_open alone, let the door settle on the stale target,
        // then the rest.
        let is_open = batch.remove(0);
        assert_eq!(is_open.field, Field::IsOpen);
        obs.apply_updates(&[is_open]);
        run(&mut obs, 5);
        obs.apply_updates(&batch);
        run(&mut obs, 200);
        assert!((obs.door(DOOR).unwrap().current_angle() + 90.0).abs() <= 1.5);
    }

    #[test]
    fn fields_before_spawn_are_replayed() {
        let mut obs = ObserverWorld::new(DoorConfig::default());
        obs.apply_updates(&door_batch(&opened_state()));
        assert!(!obs.contains(DOOR));

        obs.apply_spawn(&door_spawn());
        assert!(obs.door(DOOR).unwrap().state().is_open);
        run(&mut obs, 200);
        assert_eq!(obs.door(DOOR).unwrap().phase(), DoorPhase::Open);
    }

    #[test]
    fn duplicate_spawn_is_ignored() {
        let mut obs = observer();
        obs.door_mut(DOOR).unwrap().actuator_mut().add_relative_yaw(30.0);
        assert!(!obs.apply_spawn(&door_spawn()));
        assert_eq!(obs.door(DOOR).unwrap().current_angle(), 30.0);
    }

    #[test]
    fn team_change_notifies_once() {
        let mut obs = observer();
        let update = FieldUpdate {
            target: SyncTarget::Participant(ParticipantId(7)),
            field: Field::Team,
            value: SyncValue::Team(Some(TeamId(1))),
        };
        obs.apply_updates(&[update.clone()]);
        obs.apply_updates(&[update]);
        assert_eq!(obs.team_of(ParticipantId(7)), Some(TeamId(1)));
        assert_eq!(obs.events_mut().drain::<TeamChanged>().len(), 1);
    }

    struct Recorder(Arc<Mutex<Vec<(EntityId, ClipHandle)>>>);

    impl AnimationPlayer for Recorder {
        fn play(&mut self, actor: EntityId, clip: ClipHandle) {
            self.0.lock().unwrap().push((actor, clip));
        }
    }

    #[test]
    fn multicasts_run_on_step() {
        let played = Arc::new(Mutex::new(Vec::new()));
        let mut obs = observer().with_animation_player(Box::new(Recorder(played.clone())));
        obs.receive_call(RemoteCall::ToAllObservers(ObserverCall::PlayAnimation {
            actor: ME,
            clip: ClipHandle(4),
        }));
        // Host-bound calls reaching an observer are dropped.
        obs.receive_call(RemoteCall::ToHost(HostCall::RequestToggleDoor {
            actor: ME,
            interaction_vector: Vec3::FORWARD,
        }));
        obs.step(DT);
        assert_eq!(played.lock().unwrap().as_slice(), &[(ME, ClipHandle(4))]);
        assert_eq!(obs.events_mut().drain::<AnimationRequested>().len(), 1);
    }

    #[test]
    fn session_fields_are_mirrored() {
        let mut obs = observer();
        obs.apply_updates(&[
            FieldUpdate {
                target: SyncTarget::Session,
                field: Field::NumTeams,
                value: SyncValue::Count(2),
            },
            FieldUpdate {
                target: SyncTarget::Session,
                field: Field::TeamScores,
                value: SyncValue::Scores(vec![1, 4]),
            },
        ]);
        assert_eq!(obs.num_teams(), 2);
        assert_eq!(obs.scores(), &[1, 4]);
    }
}
