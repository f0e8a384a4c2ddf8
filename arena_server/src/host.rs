//! Authoritative host world.
//!
//! Everything that writes replicated state lives here and runs inside
//! [`HostWorld::step`] or the join/leave entry points, all on one thread.
//! That serialization is what makes team counting, spawn selection and door
//! toggles safe without locks.
//!
//! The world is transport-agnostic: the caller feeds it remote calls and
//! overlap events, and drains replication batches, multicasts and entity
//! spawn/delete notices after each step.

use std::collections::{BTreeMap, BTreeSet};

use arena_shared::{
    config::SessionConfig,
    door::{Door, Step},
    ecs::{EntityId, EntityKind, Position, World},
    event::{AnimationRequested, ClipHandle, DoorToggled, EventBus, MatchStarted, TeamChanged},
    math::Vec3,
    net::{EntitySpawn, PlayerCommand},
    participant::{Character, Participant, ParticipantId},
    rpc::{
        accept_all, require_actor_ownership, CallContext, HostCall, ObserverCall, Origin,
        RemoteCall, RemoteCallChannel, Role,
    },
    session::SessionController,
    spawn::{SpawnLocation, SpawnPoint, SpawnSelector},
    sync::{Field, FieldUpdate, SyncRegistry, SyncTarget, SyncValue},
    team::{choose_team, team_counts, TeamId},
    trigger::{ProximityDetector, TriggerEvent, TriggerVolume},
};
use tracing::{debug, info, warn};

/// Largest movement a single command may apply.
pub const MAX_MOVE_PER_TICK: f32 = 10.0;

/// Outcome of admitting a participant.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    pub participant: ParticipantId,
    pub character: EntityId,
    pub team: TeamId,
    pub spawn: SpawnLocation,
    /// Set when this join started the match.
    pub match_started: Option<MatchStarted>,
}

/// The authoritative simulation.
pub struct HostWorld {
    cfg: SessionConfig,
    world: World,
    participants: BTreeMap<ParticipantId, Participant>,
    sync: SyncRegistry,
    rpc: RemoteCallChannel,
    session: SessionController,
    spawns: SpawnSelector,
    detector: ProximityDetector,
    /// Doors not at rest; only these are advanced.
    active_doors: BTreeSet<EntityId>,
    pending_spawns: Vec<EntitySpawn>,
    pending_deletes: Vec<EntityId>,
    events: EventBus,
    tick: u32,
}

impl HostWorld {
    pub fn new(cfg: SessionConfig) -> Self {
        let validator = if cfg.validate_actor_ownership {
            require_actor_ownership()
        } else {
            accept_all()
        };
        let session = SessionController::new(cfg.player_threshold, cfg.num_teams);
        let mut sync = SyncRegistry::new();
        sync.register_all(SyncTarget::Session, session.fields());

        Self {
            rpc: RemoteCallChannel::new(Role::Host).with_validator(validator),
            spawns: SpawnSelector::new(cfg.spawn_seed),
            session,
            sync,
            cfg,
            world: World::default(),
            participants: BTreeMap::new(),
            detector: ProximityDetector::default(),
            active_doors: BTreeSet::new(),
            pending_spawns: Vec::new(),
            pending_deletes: Vec::new(),
            events: EventBus::default(),
            tick: 0,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.cfg
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionController {
        &mut self.session
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    // ─── World setup ───

    /// Places a door whose frame faces `forward`.
    pub fn spawn_door(&mut self, position: Vec3, forward: Vec3) -> EntityId {
        let id = self.world.spawn();
        let door = Door::new(forward, self.cfg.door);
        self.sync
            .register_all(SyncTarget::Entity(id), door.state().fields());
        self.world.insert(id, EntityKind::Door);
        self.world.insert(id, Position(position));
        self.world.insert(id, TriggerVolume::door_at(position));
        self.world.insert(id, door);
        self.pending_spawns.push(EntitySpawn {
            id,
            kind: EntityKind::Door,
            position,
            forward,
        });
        debug!(door = ?id, ?position, "Spawned door");
        id
    }

    pub fn add_spawn_point(&mut self, point: SpawnPoint) -> EntityId {
        let id = self.world.spawn();
        self.world.insert(id, EntityKind::SpawnPoint);
        self.world.insert(id, Position(point.position));
        self.world.insert(id, point);
        id
    }

    // ─── Participants ───

    /// Admits a participant: assigns a team, picks a spawn, spawns the
    /// character and counts the join toward match start.
    pub fn join(&mut self, name: &str) -> JoinOutcome {
        let id = ParticipantId::new_unique();
        self.participants.insert(id, Participant::new(id, name));
        self.sync
            .register(SyncTarget::Participant(id), Field::Team, SyncValue::Team(None));

        let team = choose_team(self.participants.values(), self.cfg.num_teams);
        self.set_team(id, team);
        let spawn = self.start_for(id, team);
        let character = self.spawn_character(id, &spawn);

        let match_started = self.session.participant_joined();
        if let Some(started) = match_started {
            self.rpc.multicast(ObserverCall::MatchStarted(started));
            self.events.push(started);
        }

        info!(participant = ?id, %name, team = ?team, character = ?character, "Participant joined");
        JoinOutcome {
            participant: id,
            character,
            team,
            spawn,
            match_started,
        }
    }

    /// Removes a participant and its character. Returns the despawned
    /// character, if any.
    pub fn leave(&mut self, id: ParticipantId) -> Option<EntityId> {
        let participant = self.participants.remove(&id)?;
        // Observers drop the participant on seeing its team cleared.
        let target = SyncTarget::Participant(id);
        if let Err(e) = self.sync.set(target, Field::Team, SyncValue::Team(None)) {
            warn!(error = %e, "Departure not replicated");
        }
        self.sync.retire(target);
        self.session.participant_left();
        let character = participant.character;
        if let Some(ch) = character {
            self.despawn(ch);
        }
        info!(participant = ?id, "Participant left");
        character
    }

    /// Gives a participant a fresh character. An existing team is kept.
    pub fn restart_player(&mut self, id: ParticipantId) -> Option<(EntityId, SpawnLocation)> {
        let old = self.participants.get_mut(&id)?.character.take();
        if let Some(old) = old {
            self.despawn(old);
        }
        let spawn = self.choose_player_start(id)?;
        let character = self.spawn_character(id, &spawn);
        Some((character, spawn))
    }

    /// Assigns the participant's team (if unassigned) and selects a start.
    /// `None` for unknown participants.
    pub fn choose_player_start(&mut self, id: ParticipantId) -> Option<SpawnLocation> {
        let team = match self.participants.get(&id)?.team {
            Some(team) => team,
            None => {
                let team = choose_team(self.participants.values(), self.cfg.num_teams);
                self.set_team(id, team);
                team
            }
        };
        Some(self.start_for(id, team))
    }

    fn start_for(&mut self, id: ParticipantId, team: TeamId) -> SpawnLocation {
        let spawn = self.spawns.choose(team, self.world.iter::<SpawnPoint>());
        debug!(participant = ?id, team = ?team, source = ?spawn.source, "Chose player start");
        spawn
    }

    fn spawn_character(&mut self, owner: ParticipantId, spawn: &SpawnLocation) -> EntityId {
        let character = self.world.spawn();
        self.world.insert(character, EntityKind::Character);
        self.world.insert(character, Position(spawn.position));
        self.world.insert(character, Character::new(owner));
        self.sync.register(
            SyncTarget::Entity(character),
            Field::Interactable,
            SyncValue::Entity(None),
        );
        self.pending_spawns.push(EntitySpawn {
            id: character,
            kind: EntityKind::Character,
            position: spawn.position,
            forward: Vec3::from_yaw(spawn.yaw),
        });
        if let Some(p) = self.participants.get_mut(&owner) {
            p.character = Some(character);
        }
        character
    }

    fn set_team(&mut self, id: ParticipantId, team: TeamId) {
        let Some(p) = self.participants.get_mut(&id) else {
            return;
        };
        p.team = Some(team);
        match self.sync.set(
            SyncTarget::Participant(id),
            Field::Team,
            SyncValue::Team(Some(team)),
        ) {
            Ok(true) => self.events.push(TeamChanged {
                participant: id,
                team,
            }),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Team not replicated"),
        }
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Derived head count per team.
    pub fn team_counts(&self) -> Vec<usize> {
        team_counts(self.participants.values(), self.cfg.num_teams)
    }

    // ─── Interaction ───

    /// Applies an overlap event to the character it names.
    pub fn handle_trigger(&mut self, event: &TriggerEvent) {
        let this = match *event {
            TriggerEvent::EnterRange { this, .. } | TriggerEvent::LeaveRange { this, .. } => this,
        };
        let Some(character) = self.world.get_mut::<Character>(this) else {
            return;
        };
        if character.binding.handle(this, event) {
            let bound = character.binding.bound();
            debug!(character = ?this, interactable = ?bound, "Binding changed");
            self.set_binding_field(this, bound);
        }
    }

    fn set_binding_field(&mut self, character: EntityId, bound: Option<EntityId>) {
        if let Err(e) = self.sync.set(
            SyncTarget::Entity(character),
            Field::Interactable,
            SyncValue::Entity(bound),
        ) {
            warn!(error = %e, "Binding not replicated");
        }
    }

    pub fn binding_of(&self, character: EntityId) -> Option<EntityId> {
        self.world
            .get::<Character>(character)
            .and_then(|c| c.binding.bound())
    }

    /// Host-side action: toggles the door `actor` is bound to.
    ///
    /// Returns false (and changes nothing) when the actor has no binding or
    /// the bound door no longer exists.
    pub fn on_action(&mut self, actor: EntityId, interaction_vector: Vec3) -> bool {
        let Some(door_id) = self.binding_of(actor) else {
            debug!(actor = ?actor, "Action without an interactable in range");
            return false;
        };
        let Some(door) = self.world.get_mut::<Door>(door_id) else {
            debug!(actor = ?actor, door = ?door_id, "Bound interactable is gone");
            if let Some(c) = self.world.get_mut::<Character>(actor) {
                c.binding.clear();
            }
            self.set_binding_field(actor, None);
            return false;
        };

        door.toggle_authoritative(interaction_vector);
        let is_open = door.state().is_open;
        self.publish_door(door_id);
        self.active_doors.insert(door_id);
        self.events.push(DoorToggled {
            door: door_id,
            is_open,
        });
        info!(door = ?door_id, actor = ?actor, is_open, "Door toggled");
        true
    }

    /// Observer movement input.
    pub fn apply_command(&mut self, id: ParticipantId, cmd: &PlayerCommand) {
        let Some(ch) = self.participants.get(&id).and_then(|p| p.character) else {
            return;
        };
        let mut wish = cmd.wish;
        let len = wish.len_sq().sqrt();
        if !len.is_finite() {
            debug!(participant = ?id, "Dropped non-finite movement");
            return;
        }
        if len > MAX_MOVE_PER_TICK {
            wish = wish.scale(MAX_MOVE_PER_TICK / len);
        }
        if let Some(pos) = self.world.get_mut::<Position>(ch) {
            pos.0 = pos.0.add(wish);
        }
    }

    /// Moves a character directly (tests, scripted placement).
    pub fn teleport(&mut self, character: EntityId, position: Vec3) -> bool {
        match self.world.get_mut::<Position>(character) {
            Some(pos) => {
                pos.0 = position;
                true
            }
            None => false,
        }
    }

    // ─── Remote calls ───

    /// Transport delivers a call from an observer.
    pub fn receive_call(&mut self, from: ParticipantId, call: RemoteCall) {
        self.rpc.receive(Origin::Observer(from), call);
    }

    /// Host→all-observers animation request.
    pub fn play_animation(&mut self, actor: EntityId, clip: ClipHandle) {
        self.events.push(AnimationRequested { actor, clip });
        self.rpc.multicast(ObserverCall::PlayAnimation { actor, clip });
    }

    /// Adds to a team's replicated score.
    pub fn award_score(&mut self, team: TeamId, points: i32) -> bool {
        if !self.session.award(team, points) {
            return false;
        }
        let scores = SyncValue::Scores(self.session.scores().to_vec());
        if let Err(e) = self.sync.set(SyncTarget::Session, Field::TeamScores, scores) {
            warn!(error = %e, "Scores not replicated");
        }
        true
    }

    // ─── Simulation ───

    /// Executes one fixed simulation step.
    pub fn step(&mut self, dt: f32) {
        self.dispatch_calls();
        self.detect_overlaps();
        self.advance_doors(dt);
        self.tick = self.tick.wrapping_add(1);
    }

    fn dispatch_calls(&mut self) {
        let participants = &self.participants;
        let accepted = self.rpc.dispatch_host_calls(|sender| CallContext {
            sender,
            controls: participants.get(&sender).and_then(|p| p.character),
        });
        for call in accepted {
            match call.call {
                HostCall::RequestToggleDoor {
                    actor,
                    interaction_vector,
                } => {
                    self.on_action(actor, interaction_vector);
                }
            }
        }
    }

    fn detect_overlaps(&mut self) {
        let characters: Vec<(EntityId, Vec3)> = self
            .world
            .iter::<Character>()
            .filter_map(|(id, _)| self.world.get::<Position>(id).map(|p| (id, p.0)))
            .collect();
        let volumes: Vec<_> = self
            .world
            .iter::<TriggerVolume>()
            .map(|(id, v)| {
                let kind = self
                    .world
                    .get::<EntityKind>(id)
                    .copied()
                    .unwrap_or(EntityKind::Prop);
                (id, kind, *v)
            })
            .collect();
        for event in self.detector.update(&characters, &volumes) {
            self.handle_trigger(&event);
        }
    }

    fn advance_doors(&mut self, dt: f32) {
        let active: Vec<EntityId> = self.active_doors.iter().copied().collect();
        for id in active {
            let Some(door) = self.world.get_mut::<Door>(id) else {
                self.active_doors.remove(&id);
                continue;
            };
            if let Step::Settled(phase) = door.advance(dt) {
                debug!(door = ?id, ?phase, "Door at rest");
            }
            let at_rest = door.is_at_rest();
            self.publish_door(id);
            if at_rest {
                self.active_doors.remove(&id);
            }
        }
    }

    /// Pushes a door's replicated fields into the registry.
    fn publish_door(&mut self, id: EntityId) {
        let Some(door) = self.world.get::<Door>(id) else {
            return;
        };
        for (field, value) in door.state().fields() {
            if let Err(e) = self.sync.set(SyncTarget::Entity(id), field, value) {
                warn!(error = %e, "Door field not replicated");
            }
        }
    }

    fn despawn(&mut self, id: EntityId) {
        if self.world.despawn(id) {
            self.sync.unregister(SyncTarget::Entity(id));
            self.active_doors.remove(&id);
            self.pending_deletes.push(id);
        }
    }

    // ─── Outbound ───

    /// Changed fields since the last drain.
    pub fn drain_replication(&mut self) -> Vec<FieldUpdate> {
        self.sync.drain_dirty()
    }

    /// Every replicated value, for a newly connected observer.
    pub fn replication_snapshot(&self) -> Vec<FieldUpdate> {
        self.sync.snapshot()
    }

    /// Multicasts queued since the last drain.
    pub fn drain_multicasts(&mut self) -> Vec<RemoteCall> {
        self.rpc.drain_outgoing()
    }

    /// Entities spawned since the last drain.
    pub fn drain_spawns(&mut self) -> Vec<EntitySpawn> {
        std::mem::take(&mut self.pending_spawns)
    }

    /// Entities removed since the last drain.
    pub fn drain_deletes(&mut self) -> Vec<EntityId> {
        std::mem::take(&mut self.pending_deletes)
    }

    /// Spawn packets describing every replicated entity currently alive.
    pub fn spawn_messages(&self) -> Vec<EntitySpawn> {
        let mut out = Vec::new();
        for (id, kind) in self.world.iter::<EntityKind>() {
            let position = self
                .world
                .get::<Position>(id)
                .map_or(Vec3::ZERO, |p| p.0);
            let forward = match kind {
                EntityKind::Door => self
                    .world
                    .get::<Door>(id)
                    .map_or(Vec3::FORWARD, |d| d.forward()),
                EntityKind::Character => Vec3::FORWARD,
                EntityKind::SpawnPoint | EntityKind::Prop => continue,
            };
            out.push(EntitySpawn {
                id,
                kind: *kind,
                position,
                forward,
            });
        }
        out
    }

    // ─── Inspection ───

    pub fn door(&self, id: EntityId) -> Option<&Door> {
        self.world.get::<Door>(id)
    }

    /// Test hook: direct access to a door's actuator and state.
    pub fn door_mut(&mut self, id: EntityId) -> Option<&mut Door> {
        self.world.get_mut::<Door>(id)
    }

    pub fn is_door_active(&self, id: EntityId) -> bool {
        self.active_doors.contains(&id)
    }

    pub fn active_door_count(&self) -> usize {
        self.active_doors.len()
    }

    pub fn position_of(&self, id: EntityId) -> Option<Vec3> {
        self.world.get::<Position>(id).map(|p| p.0)
    }

    pub fn rejected_calls(&self) -> u64 {
        self.rpc.rejected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_shared::{door::DoorPhase, spawn::SpawnSource};

    fn cfg() -> SessionConfig {
        SessionConfig {
            spawn_seed: Some(11),
            ..Default::default()
        }
    }

    fn host_with_door() -> (HostWorld, EntityId) {
        let mut host = HostWorld::new(cfg());
        let door = host.spawn_door(Vec3::new(1000.0, 0.0, 0.0), Vec3::FORWARD);
        (host, door)
    }

    fn bind(host: &mut HostWorld, character: EntityId, door: EntityId) {
        host.handle_trigger(&TriggerEvent::EnterRange {
            this: character,
            other: door,
            other_kind: EntityKind::Door,
        });
    }

    #[test]
    fn joins_alternate_teams() {
        let mut host = HostWorld::new(cfg());
        let teams: Vec<TeamId> = (0..6).map(|i| host.join(&format!("p{i}")).team).collect();
        assert_eq!(
            teams,
            vec![TeamId(0), TeamId(1), TeamId(0), TeamId(1), TeamId(0), TeamId(1)]
        );
        assert_eq!(host.team_counts(), vec![3, 3]);
    }

    #[test]
    fn team_survives_respawn() {
        let mut host = HostWorld::new(cfg());
        host.join("a");
        let b = host.join("b");
        let (new_character, _) = host.restart_player(b.participant).unwrap();
        assert_ne!(new_character, b.character);
        assert_eq!(host.participant(b.participant).unwrap().team, Some(TeamId(1)));
        assert_eq!(host.drain_deletes(), vec![b.character]);
    }

    #[test]
    fn team_spawn_points_are_respected() {
        let mut host = HostWorld::new(cfg());
        let red = host.add_spawn_point(SpawnPoint::for_team(Vec3::new(0.0, 500.0, 0.0), 0.0, TeamId(0)));
        let blue =
            host.add_spawn_point(SpawnPoint::for_team(Vec3::new(0.0, -500.0, 0.0), 0.0, TeamId(1)));
        let a = host.join("a");
        let b = host.join("b");
        assert_eq!(a.spawn.point, Some(red));
        assert_eq!(b.spawn.point, Some(blue));
        assert_eq!(host.position_of(b.character), Some(Vec3::new(0.0, -500.0, 0.0)));
    }

    #[test]
    fn join_without_spawn_points_still_admits() {
        let mut host = HostWorld::new(cfg());
        let a = host.join("a");
        assert_eq!(a.spawn.source, SpawnSource::Origin);
        assert!(host.position_of(a.character).is_some());
    }

    #[test]
    fn second_join_starts_match_and_multicasts() {
        let mut host = HostWorld::new(cfg());
        assert!(host.join("a").match_started.is_none());
        assert!(host.join("b").match_started.is_some());
        let calls = host.drain_multicasts();
        assert!(matches!(
            calls.as_slice(),
            [RemoteCall::ToAllObservers(ObserverCall::MatchStarted(_))]
        ));
        assert_eq!(host.events_mut().drain::<MatchStarted>().len(), 1);
    }

    #[test]
    fn action_without_binding_is_a_no_op() {
        let (mut host, door) = host_with_door();
        let a = host.join("a");
        host.drain_replication();
        assert!(!host.on_action(a.character, Vec3::FORWARD));
        assert!(!host.door(door).unwrap().state().is_open);
        assert!(host.drain_replication().is_empty());
    }

    #[test]
    fn bound_action_toggles_and_replicates() {
        let (mut host, door) = host_with_door();
        let a = host.join("a");
        bind(&mut host, a.character, door);
        host.drain_replication();

        assert!(host.on_action(a.character, Vec3::new(-1.0, 0.0, 0.0)));
        let state = *host.door(door).unwrap().state();
        assert!(state.is_open && state.is_opening);
        assert_eq!(state.target_angle, -90.0);

        let batch = host.drain_replication();
        let fields: Vec<Field> = batch.iter().map(|u| u.field).collect();
        assert!(fields.contains(&Field::IsOpen));
        assert!(fields.contains(&Field::TargetAngle));
        assert!(host.is_door_active(door));
    }

    #[test]
    fn active_set_empties_once_door_rests() {
        let (mut host, door) = host_with_door();
        let a = host.join("a");
        bind(&mut host, a.character, door);
        host.on_action(a.character, Vec3::FORWARD);
        for _ in 0..1000 {
            host.step(1.0 / 64.0);
            if host.active_door_count() == 0 {
                break;
            }
        }
        assert_eq!(host.active_door_count(), 0);
        assert_eq!(host.door(door).unwrap().phase(), DoorPhase::Open);
    }

    #[test]
    fn remote_request_uses_host_side_binding() {
        let (mut host, door) = host_with_door();
        let a = host.join("a");
        let b = host.join("b");
        bind(&mut host, a.character, door);

        // b is not in range on the host: dropped as a no-op.
        host.receive_call(
            b.participant,
            RemoteCall::ToHost(HostCall::RequestToggleDoor {
                actor: b.character,
                interaction_vector: Vec3::FORWARD,
            }),
        );
        host.step(1.0 / 64.0);
        assert!(!host.door(door).unwrap().state().is_open);

        host.receive_call(
            a.participant,
            RemoteCall::ToHost(HostCall::RequestToggleDoor {
                actor: a.character,
                interaction_vector: Vec3::FORWARD,
            }),
        );
        host.step(1.0 / 64.0);
        assert!(host.door(door).unwrap().state().is_open);
    }

    #[test]
    fn ownership_validation_rejects_foreign_actor() {
        let mut host = HostWorld::new(SessionConfig {
            validate_actor_ownership: true,
            ..cfg()
        });
        let door = host.spawn_door(Vec3::new(1000.0, 0.0, 0.0), Vec3::FORWARD);
        let a = host.join("a");
        let b = host.join("b");
        bind(&mut host, a.character, door);

        host.receive_call(
            b.participant,
            RemoteCall::ToHost(HostCall::RequestToggleDoor {
                actor: a.character,
                interaction_vector: Vec3::FORWARD,
            }),
        );
        host.step(1.0 / 64.0);
        assert!(!host.door(door).unwrap().state().is_open);
        assert_eq!(host.rejected_calls(), 1);
    }

    #[test]
    fn proximity_binds_and_unbinds() {
        let (mut host, door) = host_with_door();
        let a = host.join("a");
        host.teleport(a.character, Vec3::new(1050.0, 0.0, 0.0));
        host.step(1.0 / 64.0);
        assert_eq!(host.binding_of(a.character), Some(door));

        host.teleport(a.character, Vec3::new(0.0, 0.0, 0.0));
        host.step(1.0 / 64.0);
        assert_eq!(host.binding_of(a.character), None);
    }

    #[test]
    fn movement_is_clamped() {
        let mut host = HostWorld::new(cfg());
        let a = host.join("a");
        let start = host.position_of(a.character).unwrap();
        host.apply_command(
            a.participant,
            &PlayerCommand {
                tick: 0,
                wish: Vec3::new(100.0, 0.0, 0.0),
            },
        );
        let moved = host.position_of(a.character).unwrap().sub(start);
        assert!((moved.x - MAX_MOVE_PER_TICK).abs() < 1e-4);
    }

    #[test]
    fn non_finite_movement_is_dropped() {
        let mut host = HostWorld::new(cfg());
        let a = host.join("a");
        let start = host.position_of(a.character).unwrap();
        for wish in [
            Vec3::new(f32::NAN, 0.0, 0.0),
            Vec3::new(f32::INFINITY, 0.0, 0.0),
        ] {
            host.apply_command(a.participant, &PlayerCommand { tick: 0, wish });
        }
        assert_eq!(host.position_of(a.character), Some(start));
    }

    #[test]
    fn vanished_door_clears_binding() {
        let (mut host, door) = host_with_door();
        let a = host.join("a");
        bind(&mut host, a.character, door);
        host.despawn(door);
        host.drain_replication();

        assert!(!host.on_action(a.character, Vec3::FORWARD));
        assert_eq!(host.binding_of(a.character), None);
        let batch = host.drain_replication();
        assert!(batch.iter().any(|u| u.target == SyncTarget::Entity(a.character)
            && u.field == Field::Interactable
            && u.value == SyncValue::Entity(None)));
    }

    #[test]
    fn leaving_replicates_a_cleared_team() {
        let mut host = HostWorld::new(cfg());
        let a = host.join("a");
        host.drain_replication();
        host.leave(a.participant);

        let batch = host.drain_replication();
        assert!(batch.contains(&FieldUpdate {
            target: SyncTarget::Participant(a.participant),
            field: Field::Team,
            value: SyncValue::Team(None),
        }));
        assert!(host
            .drain_replication()
            .iter()
            .all(|u| u.target != SyncTarget::Participant(a.participant)));
    }

    #[test]
    fn leaving_despawns_and_unregisters() {
        let mut host = HostWorld::new(cfg());
        let a = host.join("a");
        assert_eq!(host.leave(a.participant), Some(a.character));
        assert!(host.position_of(a.character).is_none());
        assert_eq!(host.leave(a.participant), None);
        assert!(host
            .replication_snapshot()
            .iter()
            .all(|u| u.target != SyncTarget::Participant(a.participant)));
    }

    #[test]
    fn scores_replicate() {
        let mut host = HostWorld::new(cfg());
        host.drain_replication();
        assert!(host.award_score(TeamId(1), 2));
        let batch = host.drain_replication();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].value, SyncValue::Scores(vec![0, 2]));
    }

    #[test]
    fn spawn_messages_cover_doors_and_characters() {
        let (mut host, door) = host_with_door();
        host.add_spawn_point(SpawnPoint::new(Vec3::ZERO, 0.0));
        let a = host.join("a");
        let ids: Vec<EntityId> = host.spawn_messages().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![door, a.character]);
    }
}
