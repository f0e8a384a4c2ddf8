//! Entity arena (minimal ECS).
//!
//! Typed component storages keyed by entity id. Ids are never reused, so an
//! `EntityId` held elsewhere works as a weak reference: lookups on a despawned
//! entity simply return `None`.
//!
//! Storages are ordered maps so iteration is stable across runs.

use std::{
    any::{Any, TypeId},
    collections::{BTreeMap, BTreeSet, HashMap},
};

use serde::{Deserialize, Serialize};

use crate::math::Vec3;

/// Opaque entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// What an entity is, as far as overlap handling and spawning care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Character,
    Door,
    SpawnPoint,
    Prop,
}

impl EntityKind {
    /// Whether a character may bind to this kind of entity.
    pub fn is_interactable(self) -> bool {
        matches!(self, EntityKind::Door)
    }
}

/// Common component: position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position(pub Vec3);

trait Storage: Send + Sync {
    fn remove_entity(&mut self, entity: EntityId);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: 'static + Send + Sync> Storage for BTreeMap<EntityId, T> {
    fn remove_entity(&mut self, entity: EntityId) {
        self.remove(&entity);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Simple world that can store typed components.
#[derive(Default)]
pub struct World {
    next_id: u64,
    alive: BTreeSet<EntityId>,
    storages: HashMap<TypeId, Box<dyn Storage>>,
}

impl World {
    /// Creates a new entity.
    pub fn spawn(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        self.alive.insert(id);
        id
    }

    /// Registers an entity id chosen elsewhere (observers mirror host ids).
    pub fn spawn_with_id(&mut self, id: EntityId) {
        self.next_id = self.next_id.max(id.0 + 1);
        self.alive.insert(id);
    }

    /// Removes an entity and all its components. Returns false if it was
    /// already gone.
    pub fn despawn(&mut self, entity: EntityId) -> bool {
        if !self.alive.remove(&entity) {
            return false;
        }
        for storage in self.storages.values_mut() {
            storage.remove_entity(entity);
        }
        true
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.alive.contains(&entity)
    }

    /// Inserts/replaces a component for a live entity.
    ///
    /// Returns false (and drops the component) if the entity is not alive.
    pub fn insert<T: 'static + Send + Sync>(&mut self, entity: EntityId, component: T) -> bool {
        if !self.contains(entity) {
            return false;
        }
        let storage = self
            .storages
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(BTreeMap::<EntityId, T>::new()));

        match storage.as_any_mut().downcast_mut::<BTreeMap<EntityId, T>>() {
            Some(storage) => {
                storage.insert(entity, component);
                true
            }
            None => false,
        }
    }

    /// Gets a component reference.
    pub fn get<T: 'static + Send + Sync>(&self, entity: EntityId) -> Option<&T> {
        self.storage::<T>().and_then(|storage| storage.get(&entity))
    }

    /// Gets a mutable component reference.
    pub fn get_mut<T: 'static + Send + Sync>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.storage_mut::<T>()
            .and_then(|storage| storage.get_mut(&entity))
    }

    /// Iterates entities with a given component, in id order.
    pub fn iter<T: 'static + Send + Sync>(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.storage::<T>()
            .into_iter()
            .flat_map(|storage| storage.iter().map(|(k, v)| (*k, v)))
    }

    /// Mutable variant of [`World::iter`].
    pub fn iter_mut<T: 'static + Send + Sync>(
        &mut self,
    ) -> impl Iterator<Item = (EntityId, &mut T)> {
        self.storage_mut::<T>()
            .into_iter()
            .flat_map(|storage| storage.iter_mut().map(|(k, v)| (*k, v)))
    }

    fn storage<T: 'static + Send + Sync>(&self) -> Option<&BTreeMap<EntityId, T>> {
        self.storages
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.as_any().downcast_ref::<BTreeMap<EntityId, T>>())
    }

    fn storage_mut<T: 'static + Send + Sync>(&mut self) -> Option<&mut BTreeMap<EntityId, T>> {
        self.storages
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.as_any_mut().downcast_mut::<BTreeMap<EntityId, T>>())
    }
}
