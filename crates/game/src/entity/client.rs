use std::fmt;
use std::sync::Arc;

use glam::Vec3;

use crate::net::DatagramIterator;
use crate::props::{NetworkVars, PropError, PropKind, RecvTable};

use super::base::{self, ANGLES, NO_OWNER, ORIGIN, OWNER_CLIENT_ID, PARENT_ENTITY, SCALE};
use super::ids::{ClientId, EntityId};
use super::{Lifecycle, RegistryError};

/// Client-side hooks of a replicated entity class.
pub trait ClientBehavior {
    fn precache(&mut self) {}

    fn spawn(&mut self, _vars: &NetworkVars) {}

    /// Called after a snapshot touched at least one field. `vars.changed()`
    /// holds the fields that arrived.
    fn post_update(&mut self, _vars: &NetworkVars) {}

    fn despawn(&mut self, _vars: &NetworkVars) {}
}

#[derive(Debug, Default)]
pub struct BaseEntityView;

impl ClientBehavior for BaseEntityView {}

/// Local shadow of a server entity.
pub struct ClientEntity {
    id: EntityId,
    network_name: Arc<str>,
    table: Arc<RecvTable>,
    vars: NetworkVars,
    behavior: Box<dyn ClientBehavior>,
    lifecycle: Lifecycle,
    is_owner: bool,
}

impl ClientEntity {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn network_name(&self) -> &str {
        &self.network_name
    }

    pub fn table(&self) -> &RecvTable {
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

    pub fn owner(&self) -> Option<ClientId> {
        self.vars
            .get(OWNER_CLIENT_ID)
            .filter(|&owner| owner != NO_OWNER)
            .and_then(|owner| ClientId::try_from(owner).ok())
    }

    /// Whether the local client owns this entity.
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    pub fn parent(&self) -> Option<EntityId> {
        self.vars.get(PARENT_ENTITY).filter(|&parent| parent != 0)
    }

    pub fn origin(&self) -> Vec3 {
        self.vars.get(ORIGIN).unwrap_or(Vec3::ZERO)
    }

    pub fn angles(&self) -> Vec3 {
        self.vars.get(ANGLES).unwrap_or(Vec3::ZERO)
    }

    pub fn scale(&self) -> Vec3 {
        self.vars.get(SCALE).unwrap_or(Vec3::ONE)
    }

    /// Decodes one prop by name; `Ok(false)` if the table has no such prop.
    pub(crate) fn decode_prop(
        &mut self,
        name: &str,
        dgi: &mut DatagramIterator<'_>,
    ) -> Result<bool, PropError> {
        let Some(prop) = self.table.find(name) else {
            return Ok(false);
        };
        prop.decode(&mut self.vars, dgi)?;
        Ok(true)
    }

    pub(crate) fn spawn(&mut self) {
        if self.lifecycle != Lifecycle::Initialized {
            return;
        }
        self.behavior.spawn(&self.vars);
        self.lifecycle = Lifecycle::Spawned;
    }

    pub(crate) fn post_update(&mut self, local_client: Option<ClientId>) {
        self.is_owner = local_client.is_some() && self.owner() == local_client;
        self.behavior.post_update(&self.vars);
        self.vars.reset_changes();
    }

    pub(crate) fn despawn(&mut self) {
        if self.lifecycle == Lifecycle::Spawned {
            self.behavior.despawn(&self.vars);
        }
        self.lifecycle = Lifecycle::Despawned;
    }
}

impl fmt::Debug for ClientEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientEntity")
            .field("id", &self.id)
            .field("network_name", &self.network_name)
            .field("lifecycle", &self.lifecycle)
            .field("is_owner", &self.is_owner)
            .finish()
    }
}

type ClientFactory = Box<dyn Fn() -> Box<dyn ClientBehavior>>;

struct ClientClass {
    network_name: Arc<str>,
    table: Arc<RecvTable>,
    factory: ClientFactory,
}

#[derive(Default)]
pub struct ClientRegistry {
    classes: Vec<ClientClass>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_entity() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.register(base::BASE_ENTITY, base::base_recv_table()?, || {
            Box::new(BaseEntityView)
        })?;
        Ok(registry)
    }

    pub fn register<F>(
        &mut self,
        network_name: &str,
        table: Arc<RecvTable>,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn ClientBehavior> + 'static,
    {
        if self.contains(network_name) {
            return Err(RegistryError::DuplicateClass(network_name.to_owned()));
        }
        self.classes.push(ClientClass {
            network_name: Arc::from(network_name),
            table,
            factory: Box::new(factory),
        });
        Ok(())
    }

    pub fn contains(&self, network_name: &str) -> bool {
        self.classes
            .iter()
            .any(|class| &*class.network_name == network_name)
    }

    pub fn create(&self, network_name: &str, id: EntityId) -> Result<ClientEntity, RegistryError> {
        let class = self
            .classes
            .iter()
            .find(|class| &*class.network_name == network_name)
            .ok_or_else(|| RegistryError::UnknownNetworkClass(network_name.to_owned()))?;

        let mut vars = class.table.new_vars();
        base::init_base_fields(&mut vars);
        vars.reset_changes();

        let mut behavior = (class.factory)();
        behavior.precache();
        log::debug!("Making client entity {network_name} ({id})");

        Ok(ClientEntity {
            id,
            network_name: Arc::clone(&class.network_name),
            table: Arc::clone(&class.table),
            vars,
            behavior,
            lifecycle: Lifecycle::Initialized,
            is_owner: false,
        })
    }

    /// Wire kind of `prop` across every registered table, if all agree.
    ///
    /// Lets the receiver step over the fields of a class it cannot build.
    pub fn wire_kind(&self, prop: &str) -> Option<PropKind> {
        let mut kinds = self
            .classes
            .iter()
            .filter_map(|class| class.table.find(prop))
            .map(|recv| recv.kind());
        let first = kinds.next()?;
        kinds.all(|kind| kind == first).then_some(first)
    }
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.classes.iter().map(|c| &*c.network_name).collect();
        f.debug_struct("ClientRegistry").field("classes", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props::{NetField, RecvProp};

    fn registry() -> ClientRegistry {
        let base = base::base_recv_table().unwrap();
        let mut registry = ClientRegistry::with_base_entity().unwrap();
        let door = RecvTable::builder("DT_Door")
            .inherit(&base)
            .prop(RecvProp::new("speed", NetField::<f32>::new(5)))
            .build()
            .unwrap();
        let light = RecvTable::builder("DT_Light")
            .inherit(&base)
            .prop(RecvProp::new("speed", NetField::<i32>::new(5)))
            .build()
            .unwrap();
        registry.register("door", door, || Box::new(BaseEntityView)).unwrap();
        registry.register("light", light, || Box::new(BaseEntityView)).unwrap();
        registry
    }

    #[test]
    fn wire_kind_needs_agreement() {
        let registry = registry();
        assert_eq!(registry.wire_kind("origin"), Some(PropKind::Vec3));
        assert_eq!(registry.wire_kind("speed"), None);
        assert_eq!(registry.wire_kind("health"), None);
    }

    #[test]
    fn ownership_follows_local_client() {
        let registry = registry();
        let mut entity = registry.create("door", 3).unwrap();
        entity.vars_mut().set(OWNER_CLIENT_ID, 2);

        entity.post_update(Some(2));
        assert!(entity.is_owner());
        assert!(entity.vars().changed().is_empty());

        entity.post_update(Some(4));
        assert!(!entity.is_owner());
        entity.post_update(None);
        assert!(!entity.is_owner());
    }

    #[test]
    fn unknown_class_fails() {
        let mut registry = registry();
        assert!(matches!(
            registry.create("weapon_crowbar", 1),
            Err(RegistryError::UnknownNetworkClass(_))
        ));
        assert!(registry.register("door", base::base_recv_table().unwrap(), || {
            Box::new(BaseEntityView)
        })
        .is_err());
    }
}
