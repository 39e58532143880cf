//! Replicated field descriptors.
//!
//! Each entity class declares a `SendTable` (server) and a `RecvTable`
//! (client) listing its fields by name, slot and wire kind. Values live in
//! `NetworkVars`, which also tracks which slots changed since the last delta.

mod table;
mod value;
mod vars;

pub use table::{
    recv_proxy_default, send_proxy_default, RecvProp, RecvProxyFn, RecvTable, RecvTableBuilder,
    SchemaError, SendProp, SendProxyFn, SendTable, SendTableBuilder,
};
pub use value::{decode_value, encode_value, NetField, NetValue, PropError, PropKind, PropValue};
pub use vars::{ChangedFields, NetworkVars, MAX_CHANGED_FIELDS};
