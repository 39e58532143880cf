use std::sync::Arc;

use glam::Vec3;

use crate::props::{NetField, NetworkVars, RecvProp, RecvTable, SchemaError, SendProp, SendTable};

use super::ids::EntityId;

pub const BASE_ENTITY: &str = "baseentity";

pub const OWNER_CLIENT_ID: NetField<i32> = NetField::new(0);
pub const PARENT_ENTITY: NetField<EntityId> = NetField::new(1);
pub const ORIGIN: NetField<Vec3> = NetField::new(2);
pub const ANGLES: NetField<Vec3> = NetField::new(3);
pub const SCALE: NetField<Vec3> = NetField::new(4);

/// First slot available to tables that inherit the base table.
pub const FIRST_DERIVED_FIELD: u16 = 5;

/// Owner value of entities no client owns.
pub const NO_OWNER: i32 = -1;

pub fn base_send_table() -> Result<Arc<SendTable>, SchemaError> {
    SendTable::builder("DT_BaseEntity")
        .prop(SendProp::new("owner_client_id", OWNER_CLIENT_ID))
        .prop(SendProp::entity("parent_entity", PARENT_ENTITY))
        .prop(SendProp::new("origin", ORIGIN))
        .prop(SendProp::new("angles", ANGLES))
        .prop(SendProp::new("scale", SCALE))
        .build()
}

pub fn base_recv_table() -> Result<Arc<RecvTable>, SchemaError> {
    RecvTable::builder("DT_BaseEntity")
        .prop(RecvProp::new("owner_client_id", OWNER_CLIENT_ID))
        .prop(RecvProp::entity("parent_entity", PARENT_ENTITY))
        .prop(RecvProp::new("origin", ORIGIN))
        .prop(RecvProp::new("angles", ANGLES))
        .prop(RecvProp::new("scale", SCALE))
        .build()
}

/// Resets the base fields to their initial state: unowned, unparented,
/// at the origin with unit scale.
pub fn init_base_fields(vars: &mut NetworkVars) {
    vars.set(OWNER_CLIENT_ID, NO_OWNER);
    vars.set(PARENT_ENTITY, 0);
    vars.set(ORIGIN, Vec3::ZERO);
    vars.set(ANGLES, Vec3::ZERO);
    vars.set(SCALE, Vec3::ONE);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_tables_agree() {
        let send = base_send_table().unwrap();
        let recv = base_recv_table().unwrap();
        assert_eq!(send.len(), FIRST_DERIVED_FIELD as usize);

        for (s, r) in send.props().iter().zip(recv.props()) {
            assert_eq!(s.name(), r.name());
            assert_eq!(s.field(), r.field());
            assert_eq!(s.kind(), r.kind());
        }
    }

    #[test]
    fn initial_fields() {
        let mut vars = base_send_table().unwrap().new_vars();
        init_base_fields(&mut vars);
        assert_eq!(vars.get(OWNER_CLIENT_ID), Some(NO_OWNER));
        assert_eq!(vars.get(SCALE), Some(Vec3::ONE));
        assert_eq!(vars.get(PARENT_ENTITY), Some(0));
    }
}
