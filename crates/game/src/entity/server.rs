use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use glam::Vec3;

use crate::net::Datagram;
use crate::props::{NetworkVars, PropError, SendTable};
use crate::simulation::TickInfo;

use super::base::{self, ANGLES, NO_OWNER, ORIGIN, OWNER_CLIENT_ID, PARENT_ENTITY, SCALE};
use super::ids::EntityId;
use super::{Lifecycle, RegistryError};

/// Server-side hooks of an entity class.
///
/// Hooks receive the entity's field storage; writing through
/// `NetworkVars::set` marks fields for the next delta snapshot.
pub trait ServerBehavior {
    fn precache(&mut self) {}

    fn spawn(&mut self, _vars: &mut NetworkVars) {}

    fn think(&mut self, _vars: &mut NetworkVars, _tick: &TickInfo) {}

    fn despawn(&mut self, _vars: &mut NetworkVars) {}

    /// Map entity key/value; return true if the key was consumed.
    fn key_value(&mut self, _vars: &mut NetworkVars, _key: &str, _value: &str) -> bool {
        false
    }
}

/// Behavior of the plain `baseentity` class.
#[derive(Debug, Default)]
pub struct BaseEntityBehavior;

impl ServerBehavior for BaseEntityBehavior {}

pub struct ServerEntity {
    id: EntityId,
    network_name: Arc<str>,
    table: Arc<SendTable>,
    vars: NetworkVars,
    behavior: Box<dyn ServerBehavior>,
    lifecycle: Lifecycle,
}

impl ServerEntity {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn network_name(&self) -> &str {
        &self.network_name
    }

    pub fn table(&self) -> &SendTable {
        &self.table
    }

    pub fn vars(&self) -> &NetworkVars {
        &self.vars
    }

    pub fn vars_mut(&mut self) -> &mut NetworkVars {
        &mut self.vars
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn owner(&self) -> Option<u16> {
        self.vars
            .get(OWNER_CLIENT_ID)
            .filter(|&owner| owner != NO_OWNER)
            .and_then(|owner| u16::try_from(owner).ok())
    }

    pub fn set_owner(&mut self, owner: Option<u16>) {
        self.vars
            .set(OWNER_CLIENT_ID, owner.map_or(NO_OWNER, i32::from));
    }

    pub fn parent(&self) -> Option<EntityId> {
        self.vars.get(PARENT_ENTITY).filter(|&parent| parent != 0)
    }

    pub fn set_parent(&mut self, parent: Option<EntityId>) {
        self.vars.set(PARENT_ENTITY, parent.unwrap_or(0));
    }

    pub fn origin(&self) -> Vec3 {
        self.vars.get(ORIGIN).unwrap_or(Vec3::ZERO)
    }

    pub fn set_origin(&mut self, origin: Vec3) {
        self.vars.set(ORIGIN, origin);
    }

    pub fn angles(&self) -> Vec3 {
        self.vars.get(ANGLES).unwrap_or(Vec3::ZERO)
    }

    pub fn set_angles(&mut self, angles: Vec3) {
        self.vars.set(ANGLES, angles);
    }

    pub fn scale(&self) -> Vec3 {
        self.vars.get(SCALE).unwrap_or(Vec3::ONE)
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.vars.set(SCALE, scale);
    }

    pub fn is_fully_changed(&self) -> bool {
        self.vars.changed().is_fully_changed()
    }

    /// Runs the spawn hook once and schedules every field for the next snapshot.
    pub fn spawn(&mut self) {
        if self.lifecycle != Lifecycle::Initialized {
            return;
        }
        self.behavior.spawn(&mut self.vars);
        self.vars.mark_fully_changed();
        self.lifecycle = Lifecycle::Spawned;
    }

    pub fn think(&mut self, tick: &TickInfo) {
        if self.lifecycle == Lifecycle::Spawned {
            self.behavior.think(&mut self.vars, tick);
        }
    }

    pub fn despawn(&mut self) {
        if self.lifecycle == Lifecycle::Despawned {
            return;
        }
        if self.lifecycle == Lifecycle::Spawned {
            self.behavior.despawn(&mut self.vars);
        }
        self.lifecycle = Lifecycle::Despawned;
    }

    /// Applies one map key/value: the class hook first, then the base fields.
    pub fn key_value(&mut self, key: &str, value: &str) -> bool {
        if self.behavior.key_value(&mut self.vars, key, value) {
            return true;
        }
        let parse_vec = |value: &str| -> Option<Vec3> {
            let parts: Vec<f32> = value
                .split_whitespace()
                .map(str::parse::<f32>)
                .collect::<Result<_, _>>()
                .ok()?;
            match parts.as_slice() {
                [x, y, z] => Some(Vec3::new(*x, *y, *z)),
                [s] => Some(Vec3::splat(*s)),
                _ => None,
            }
        };
        match key {
            "origin" => parse_vec(value).map(|v| self.set_origin(v)).is_some(),
            "angles" => parse_vec(value).map(|v| self.set_angles(v)).is_some(),
            "scale" => parse_vec(value).map(|v| self.set_scale(v)).is_some(),
            _ => false,
        }
    }

    /// Writes `(name, value)` pairs for every prop that belongs in this snapshot
    /// and returns how many were written.
    pub fn write_props(&self, full: bool, dg: &mut Datagram) -> Result<u16, PropError> {
        let mut count = 0u16;
        for prop in self.table.props() {
            if !full && !self.vars.changed().is_changed(prop.field()) {
                continue;
            }
            dg.add_string(prop.name()).map_err(|source| PropError::Datagram {
                prop: prop.name().to_owned(),
                source,
            })?;
            prop.encode(&self.vars, dg)?;
            count += 1;
        }
        Ok(count)
    }

    /// Number of props `write_props` would emit.
    pub fn prop_count(&self, full: bool) -> u16 {
        if full || self.vars.changed().is_fully_changed() {
            return self.table.len() as u16;
        }
        self.table
            .props()
            .iter()
            .filter(|prop| self.vars.changed().is_changed(prop.field()))
            .count() as u16
    }

    pub fn reset_changes(&mut self) {
        self.vars.reset_changes();
    }
}

impl fmt::Debug for ServerEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerEntity")
            .field("id", &self.id)
            .field("network_name", &self.network_name)
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

type ServerFactory = Box<dyn Fn() -> Box<dyn ServerBehavior>>;

struct ServerClass {
    network_name: Arc<str>,
    table: Arc<SendTable>,
    factory: ServerFactory,
}

/// Network class name to factory, plus map classname aliases.
#[derive(Default)]
pub struct ServerRegistry {
    classes: Vec<ServerClass>,
    links: HashMap<String, usize>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `baseentity` already registered.
    pub fn with_base_entity() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.register(base::BASE_ENTITY, base::base_send_table()?, || {
            Box::new(BaseEntityBehavior)
        })?;
        Ok(registry)
    }

    pub fn register<F>(
        &mut self,
        network_name: &str,
        table: Arc<SendTable>,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn ServerBehavior> + 'static,
    {
        if self.find(network_name).is_some() {
            return Err(RegistryError::DuplicateClass(network_name.to_owned()));
        }
        self.classes.push(ServerClass {
            network_name: Arc::from(network_name),
            table,
            factory: Box::new(factory),
        });
        self.links
            .insert(network_name.to_owned(), self.classes.len() - 1);
        Ok(())
    }

    /// Lets map entities named `classname` spawn as `network_name`.
    pub fn link_entity_to_class(
        &mut self,
        classname: &str,
        network_name: &str,
    ) -> Result<(), RegistryError> {
        let index = self
            .find(network_name)
            .ok_or_else(|| RegistryError::UnknownNetworkClass(network_name.to_owned()))?;
        self.links.insert(classname.to_owned(), index);
        Ok(())
    }

    fn find(&self, network_name: &str) -> Option<usize> {
        self.classes
            .iter()
            .position(|class| &*class.network_name == network_name)
    }

    pub fn contains(&self, network_name: &str) -> bool {
        self.find(network_name).is_some()
    }

    /// Network class for a map classname, if one was linked.
    pub fn class_for_map_entity(&self, classname: &str) -> Option<&str> {
        self.links
            .get(classname)
            .map(|&index| &*self.classes[index].network_name)
    }

    pub fn network_names(&self) -> impl Iterator<Item = &str> {
        self.classes.iter().map(|class| &*class.network_name)
    }

    /// Constructs an initialized, not yet spawned entity.
    pub fn create(&self, network_name: &str, id: EntityId) -> Result<ServerEntity, RegistryError> {
        let class = self
            .find(network_name)
            .map(|index| &self.classes[index])
            .ok_or_else(|| RegistryError::UnknownNetworkClass(network_name.to_owned()))?;

        let mut vars = class.table.new_vars();
        base::init_base_fields(&mut vars);
        vars.reset_changes();

        let mut behavior = (class.factory)();
        behavior.precache();

        Ok(ServerEntity {
            id,
            network_name: Arc::clone(&class.network_name),
            table: Arc::clone(&class.table),
            vars,
            behavior,
            lifecycle: Lifecycle::Initialized,
        })
    }
}

impl fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("classes", &self.network_names().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::props::{NetField, SendProp};

    const HEALTH: NetField<i32> = NetField::new(base::FIRST_DERIVED_FIELD);

    struct Counting {
        spawns: Rc<Cell<u32>>,
    }

    impl ServerBehavior for Counting {
        fn spawn(&mut self, vars: &mut NetworkVars) {
            self.spawns.set(self.spawns.get() + 1);
            vars.set(HEALTH, 100);
        }

        fn key_value(&mut self, vars: &mut NetworkVars, key: &str, value: &str) -> bool {
            match (key, value.parse()) {
                ("health", Ok(health)) => vars.set(HEALTH, health),
                _ => false,
            }
        }
    }

    fn registry(spawns: Rc<Cell<u32>>) -> ServerRegistry {
        let table = SendTable::builder("DT_Monster")
            .inherit(&base::base_send_table().unwrap())
            .prop(SendProp::new("health", HEALTH))
            .build()
            .unwrap();
        let mut registry = ServerRegistry::with_base_entity().unwrap();
        registry
            .register("monster", table, move || {
                Box::new(Counting {
                    spawns: Rc::clone(&spawns),
                })
            })
            .unwrap();
        registry
    }

    #[test]
    fn create_initializes_base_fields() {
        let registry = ServerRegistry::with_base_entity().unwrap();
        let entity = registry.create("baseentity", 7).unwrap();
        assert_eq!(entity.id(), 7);
        assert_eq!(entity.owner(), None);
        assert_eq!(entity.scale(), Vec3::ONE);
        assert_eq!(entity.lifecycle(), Lifecycle::Initialized);
        assert!(entity.vars().changed().is_empty());

        let err = registry.create("npc_zombie", 8).unwrap_err();
        assert_eq!(err, RegistryError::UnknownNetworkClass("npc_zombie".into()));
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let mut registry = ServerRegistry::with_base_entity().unwrap();
        let err = registry
            .register("baseentity", base::base_send_table().unwrap(), || {
                Box::new(BaseEntityBehavior)
            })
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateClass("baseentity".into()));
    }

    #[test]
    fn spawn_runs_once_and_marks_everything() {
        let spawns = Rc::new(Cell::new(0));
        let registry = registry(Rc::clone(&spawns));
        let mut entity = registry.create("monster", 1).unwrap();

        entity.spawn();
        entity.spawn();
        assert_eq!(spawns.get(), 1);
        assert!(entity.is_fully_changed());
        assert_eq!(entity.prop_count(false), 6);

        entity.despawn();
        assert_eq!(entity.lifecycle(), Lifecycle::Despawned);
        entity.spawn();
        assert_eq!(spawns.get(), 1);
    }

    #[test]
    fn map_links_and_key_values() {
        let spawns = Rc::new(Cell::new(0));
        let mut registry = registry(spawns);
        registry.link_entity_to_class("monster_headcrab", "monster").unwrap();
        assert_eq!(registry.class_for_map_entity("monster_headcrab"), Some("monster"));
        assert_eq!(registry.class_for_map_entity("monster"), Some("monster"));
        assert!(registry.link_entity_to_class("x", "missing").is_err());

        let mut entity = registry.create("monster", 2).unwrap();
        assert!(entity.key_value("origin", "16 -32 8"));
        assert!(entity.key_value("health", "40"));
        assert!(!entity.key_value("angles", "bogus"));
        assert!(!entity.key_value("targetname", "door1"));
        assert_eq!(entity.origin(), Vec3::new(16.0, -32.0, 8.0));
        assert_eq!(entity.vars().get(HEALTH), Some(40));
    }
}
