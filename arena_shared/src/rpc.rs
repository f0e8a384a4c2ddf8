//! Remote call channel.
//!
//! Two call shapes share one channel type:
//! - [`Direction::ToHost`]: issued by an observer, validated on the host
//!   before it executes. Rejections are dropped silently (debug log only);
//!   the caller never hears back.
//! - [`Direction::ToAllObservers`]: issued by the host, fire-and-forget,
//!   always executes on receipt, no validation.
//!
//! The channel only queues and filters. Executing an accepted call is the
//! owning world's job, inside its own single-threaded step.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    ecs::EntityId,
    event::{ClipHandle, MatchStarted},
    math::Vec3,
    participant::ParticipantId,
};

/// Which side of the session this channel lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Observer,
}

/// Call direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    ToHost,
    ToAllObservers,
}

/// Observer-to-host requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HostCall {
    /// Toggle whatever door `actor` is bound to on the host.
    RequestToggleDoor {
        actor: EntityId,
        interaction_vector: Vec3,
    },
}

impl HostCall {
    /// Actor the call acts through.
    pub fn actor(&self) -> EntityId {
        match self {
            HostCall::RequestToggleDoor { actor, .. } => *actor,
        }
    }
}

/// Host-to-all-observers multicasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObserverCall {
    MatchStarted(MatchStarted),
    PlayAnimation { actor: EntityId, clip: ClipHandle },
}

/// A call on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RemoteCall {
    ToHost(HostCall),
    ToAllObservers(ObserverCall),
}

impl RemoteCall {
    pub fn direction(&self) -> Direction {
        match self {
            RemoteCall::ToHost(_) => Direction::ToHost,
            RemoteCall::ToAllObservers(_) => Direction::ToAllObservers,
        }
    }
}

/// Who sent a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Host,
    Observer(ParticipantId),
}

/// What the host knows about a sender when validating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub sender: ParticipantId,
    /// Character the sender currently controls.
    pub controls: Option<EntityId>,
}

/// Why a call was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Sender does not control the named actor.
    NotOwner,
    /// Multicast from an observer, or a host call arriving at an observer.
    WrongDirection,
}

/// Host-side validation predicate.
pub type Validator = Box<dyn Fn(&CallContext, &HostCall) -> Result<(), RejectReason> + Send + Sync>;

/// Reference validation: everything passes.
pub fn accept_all() -> Validator {
    Box::new(|_, _| Ok(()))
}

/// Only the participant controlling an actor may act through it.
pub fn require_actor_ownership() -> Validator {
    Box::new(|ctx, call| {
        if ctx.controls == Some(call.actor()) {
            Ok(())
        } else {
            Err(RejectReason::NotOwner)
        }
    })
}

/// A call that passed the channel's filters and should now execute.
#[derive(Debug, Clone, PartialEq)]
pub struct Accepted<C> {
    pub origin: Origin,
    pub call: C,
}

/// Remote call channel for one side of the session.
pub struct RemoteCallChannel {
    role: Role,
    validator: Validator,
    outgoing: VecDeque<RemoteCall>,
    incoming: VecDeque<(Origin, RemoteCall)>,
    rejected: u64,
}

impl RemoteCallChannel {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            validator: accept_all(),
            outgoing: VecDeque::new(),
            incoming: VecDeque::new(),
            rejected: 0,
        }
    }

    /// Replaces the host-side validation predicate.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Calls dropped so far.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Observer: request something of the host.
    ///
    /// Returns false if this channel is not an observer's.
    pub fn call_host(&mut self, call: HostCall) -> bool {
        if self.role != Role::Observer {
            warn!(?call, "Host call issued on the host channel; execute it directly");
            return false;
        }
        self.outgoing.push_back(RemoteCall::ToHost(call));
        true
    }

    /// Host: multicast to every observer.
    ///
    /// Returns false if this channel is not the host's.
    pub fn multicast(&mut self, call: ObserverCall) -> bool {
        if self.role != Role::Host {
            warn!(?call, "Observers cannot multicast");
            return false;
        }
        self.outgoing.push_back(RemoteCall::ToAllObservers(call));
        true
    }

    /// Takes queued outgoing calls for the transport.
    pub fn drain_outgoing(&mut self) -> Vec<RemoteCall> {
        self.outgoing.drain(..).collect()
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Transport delivers an inbound call.
    pub fn receive(&mut self, origin: Origin, call: RemoteCall) {
        self.incoming.push_back((origin, call));
    }

    /// Host: validates queued requests and returns those allowed to run.
    ///
    /// `context` resolves what the host knows about each sender.
    pub fn dispatch_host_calls(
        &mut self,
        context: impl Fn(ParticipantId) -> CallContext,
    ) -> Vec<Accepted<HostCall>> {
        let mut out = Vec::new();
        while let Some((origin, call)) = self.incoming.pop_front() {
            let verdict = match (&origin, call) {
                (_, RemoteCall::ToAllObservers(call)) => {
                    Err((RejectReason::WrongDirection, RemoteCall::ToAllObservers(call)))
                }
                (Origin::Host, RemoteCall::ToHost(call)) => Ok(call),
                (Origin::Observer(sender), RemoteCall::ToHost(call)) => {
                    match (self.validator)(&context(*sender), &call) {
                        Ok(()) => Ok(call),
                        Err(reason) => Err((reason, RemoteCall::ToHost(call))),
                    }
                }
            };
            match verdict {
                Ok(call) => out.push(Accepted { origin, call }),
                Err((reason, call)) => {
                    self.rejected += 1;
                    debug!(?origin, ?reason, ?call, "Remote call rejected");
                }
            }
        }
        out
    }

    /// Observer: returns multicasts from the host, in arrival order.
    pub fn dispatch_multicasts(&mut self) -> Vec<Accepted<ObserverCall>> {
        let mut out = Vec::new();
        while let Some((origin, call)) = self.incoming.pop_front() {
            match (origin, call) {
                (Origin::Host, RemoteCall::ToAllObservers(call)) => {
                    out.push(Accepted { origin, call })
                }
                (origin, call) => {
                    self.rejected += 1;
                    debug!(?origin, ?call, "Dropping call not addressed to observers");
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toggle(actor: u64) -> HostCall {
        HostCall::RequestToggleDoor {
            actor: EntityId(actor),
            interaction_vector: Vec3::FORWARD,
        }
    }

    fn ctx_controlling(actor: u64) -> impl Fn(ParticipantId) -> CallContext {
        move |sender| CallContext {
            sender,
            controls: Some(EntityId(actor)),
        }
    }

    #[test]
    fn observer_queues_host_calls_only() {
        let mut ch = RemoteCallChannel::new(Role::Observer);
        assert!(ch.call_host(toggle(1)));
        assert!(!ch.multicast(ObserverCall::PlayAnimation {
            actor: EntityId(1),
            clip: ClipHandle(0),
        }));
        let out = ch.drain_outgoing();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].direction(), Direction::ToHost);
        assert!(!ch.has_outgoing());
    }

    #[test]
    fn reference_validator_accepts_everything() {
        let mut ch = RemoteCallChannel::new(Role::Host);
        ch.receive(Origin::Observer(ParticipantId(1)), RemoteCall::ToHost(toggle(9)));
        ch.receive(Origin::Observer(ParticipantId(2)), RemoteCall::ToHost(toggle(9)));
        let accepted = ch.dispatch_host_calls(ctx_controlling(1));
        assert_eq!(accepted.len(), 2);
        assert_eq!(ch.rejected(), 0);
    }

    #[test]
    fn ownership_validator_drops_foreign_actor() {
        let mut ch = RemoteCallChannel::new(Role::Host).with_validator(require_actor_ownership());
        ch.receive(Origin::Observer(ParticipantId(1)), RemoteCall::ToHost(toggle(5)));
        ch.receive(Origin::Observer(ParticipantId(1)), RemoteCall::ToHost(toggle(6)));
        let accepted = ch.dispatch_host_calls(ctx_controlling(5));
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].call.actor(), EntityId(5));
        assert_eq!(ch.rejected(), 1);
    }

    #[test]
    fn host_drops_multicast_from_observer() {
        let mut ch = RemoteCallChannel::new(Role::Host);
        ch.receive(
            Origin::Observer(ParticipantId(1)),
            RemoteCall::ToAllObservers(ObserverCall::PlayAnimation {
                actor: EntityId(1),
                clip: ClipHandle(3),
            }),
        );
        assert!(ch.dispatch_host_calls(ctx_controlling(1)).is_empty());
        assert_eq!(ch.rejected(), 1);
    }

    #[test]
    fn observer_runs_host_multicasts_only() {
        let mut ch = RemoteCallChannel::new(Role::Observer);
        let anim = ObserverCall::PlayAnimation {
            actor: EntityId(2),
            clip: ClipHandle(7),
        };
        ch.receive(Origin::Host, RemoteCall::ToAllObservers(anim.clone()));
        ch.receive(Origin::Host, RemoteCall::ToHost(toggle(1)));
        let got = ch.dispatch_multicasts();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].call, anim);
        assert_eq!(ch.rejected(), 1);
    }
}
